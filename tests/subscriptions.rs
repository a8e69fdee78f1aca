use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use gobj::{
    ev_action, kw, ActionFn, GClass, GMethods, GobjId, Runtime, RuntimeOptions, RC_BROKE,
};

type EvLog = Rc<RefCell<Vec<(String, Value)>>>;

fn capture(log: &EvLog, rc: i32) -> ActionFn {
    let log = log.clone();
    Arc::new(move |_rt, _g, ev, kw, _src| {
        log.borrow_mut().push((ev.to_string(), Value::Object(kw.clone())));
        rc
    })
}

/// Publisher of "data" and "raw".
fn publisher_class(counters: &Rc<RefCell<(i32, i32)>>) -> Arc<GClass> {
    let mut gmt = GMethods::default();
    let c1 = counters.clone();
    gmt.mt_subscription_added = Some(Arc::new(move |_rt, _g, _sid| {
        c1.borrow_mut().0 += 1;
        0
    }));
    let c2 = counters.clone();
    gmt.mt_subscription_deleted = Some(Arc::new(move |_rt, _g, _sid| {
        c2.borrow_mut().1 += 1;
        0
    }));
    GClass::builder("Pub")
        .output_event("data", 0, "")
        .output_event("raw", 0, "")
        .gmt(gmt)
        .build()
}

/// Subscriber accepting the events the tests deliver.
fn subscriber_class(log: &EvLog, rc: i32) -> Arc<GClass> {
    GClass::builder("Sub")
        .input_event("data", 0, "")
        .input_event("raw", 0, "")
        .input_event("cooked", 0, "")
        .state(
            "ST_IDLE",
            vec![
                ev_action("data", Some(capture(log, rc)), None),
                ev_action("raw", Some(capture(log, rc)), None),
                ev_action("cooked", Some(capture(log, rc)), None),
            ],
        )
        .build()
}

struct Bed {
    rt: Runtime,
    x: GobjId,
    y: GobjId,
    log: EvLog,
    counters: Rc<RefCell<(i32, i32)>>,
}

fn bed_with_rc(rc: i32) -> Bed {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let counters = Rc::new(RefCell::new((0, 0)));
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();
    rt.register_gclass(publisher_class(&counters)).unwrap();
    rt.register_gclass(subscriber_class(&log, rc)).unwrap();
    let yuno = rt.yuno_factory("main", json!({})).unwrap();
    let x = rt.create("x", "Pub", kw(json!({})), yuno).unwrap();
    let y = rt.create("y", "Sub", kw(json!({})), yuno).unwrap();
    Bed { rt, x, y, log, counters }
}

fn bed() -> Bed {
    bed_with_rc(0)
}

#[test]
fn selection_filter() -> Result<()> {
    let mut b = bed();
    b.rt.subscribe_event(
        b.x,
        "data",
        kw(json!({"__filter__": {"kind": "alert"}})),
        b.y,
    )?;

    b.rt.publish_event(b.x, "data", kw(json!({"kind": "info"})));
    assert!(b.log.borrow().is_empty());

    b.rt.publish_event(b.x, "data", kw(json!({"kind": "alert", "value": 1})));
    let log = b.log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1["kind"], json!("alert"));
    assert_eq!(log[0].1["value"], json!(1));
    Ok(())
}

#[test]
fn rename_event() -> Result<()> {
    let mut b = bed();
    b.rt.subscribe_event(
        b.x,
        "raw",
        kw(json!({"__config__": {"__rename_event_name__": "cooked"}})),
        b.y,
    )?;
    b.rt.publish_event(b.x, "raw", kw(json!({"n": 1})));

    let log = b.log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, "cooked");
    assert_eq!(log[0].1["__original_event_name__"], json!("raw"));
    assert_eq!(log[0].1["n"], json!(1));
    Ok(())
}

#[test]
fn idempotent_subscribe() -> Result<()> {
    let mut b = bed();
    let kw_subs = json!({"__filter__": {"kind": "alert"}});
    b.rt.subscribe_event(b.x, "data", kw(kw_subs.clone()), b.y)?;
    b.rt.subscribe_event(b.x, "data", kw(kw_subs), b.y)?;

    assert_eq!(b.rt.subscriptions_size(b.x), 1);
    assert_eq!(b.rt.subscribings_size(b.y), 1);
    // the add hook fired once: same logical subscription
    assert_eq!(b.counters.borrow().0, 1);
    assert_eq!(b.counters.borrow().1, 0);

    // different key material is a second subscription
    b.rt.subscribe_event(b.x, "data", kw(json!({})), b.y)?;
    assert_eq!(b.rt.subscriptions_size(b.x), 2);
    assert_eq!(b.counters.borrow().0, 2);
    Ok(())
}

#[test]
fn unsubscribe_strict_match_and_hard() -> Result<()> {
    let mut b = bed();
    b.rt.subscribe_event(b.x, "data", kw(json!({})), b.y)?;
    // wrong key material: no match
    assert!(b
        .rt
        .unsubscribe_event(b.x, "data", kw(json!({"__filter__": {"a": 1}})), b.y)
        .is_err());
    b.rt.unsubscribe_event(b.x, "data", kw(json!({})), b.y)?;
    assert_eq!(b.rt.subscriptions_size(b.x), 0);
    assert_eq!(b.counters.borrow().1, 1);

    // hard subscriptions survive ordinary unsubscribe
    let sid = b.rt.subscribe_event(
        b.x,
        "data",
        kw(json!({"__config__": {"__hard_subscription__": true}})),
        b.y,
    )?;
    assert!(b
        .rt
        .unsubscribe_event(
            b.x,
            "data",
            kw(json!({"__config__": {"__hard_subscription__": true}})),
            b.y
        )
        .is_err());
    assert_eq!(b.rt.subscriptions_size(b.x), 1);
    b.rt.unsubscribe_by_id(sid, true)?;
    assert_eq!(b.rt.subscriptions_size(b.x), 0);
    Ok(())
}

#[test]
fn local_keys_removed_and_global_merged() -> Result<()> {
    let mut b = bed();
    b.rt.subscribe_event(
        b.x,
        "data",
        kw(json!({
            "__local__": ["secret", "meta`token"],
            "__global__": {"channel": "alpha"}
        })),
        b.y,
    )?;
    b.rt.publish_event(
        b.x,
        "data",
        kw(json!({"n": 1, "secret": "s", "meta": {"token": "t", "keep": true}})),
    );

    let log = b.log.borrow();
    assert_eq!(log.len(), 1);
    let got = &log[0].1;
    assert!(got.get("secret").is_none());
    assert!(got["meta"].get("token").is_none());
    assert_eq!(got["meta"]["keep"], json!(true));
    assert_eq!(got["channel"], json!("alpha"));
    assert_eq!(got["n"], json!(1));
    Ok(())
}

#[test]
fn share_kw_accumulates_clone_isolates() -> Result<()> {
    // Two subscribers whose action stamps the kw; with __share_kw__ the
    // second sees the first's stamp, without it each gets a twin.
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let counters = Rc::new(RefCell::new((0, 0)));
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();
    rt.register_gclass(publisher_class(&counters)).unwrap();

    let log2 = log.clone();
    let stamping: ActionFn = Arc::new(move |rt, g, ev, kw, _src| {
        log2.borrow_mut().push((ev.to_string(), Value::Object(kw.clone())));
        let stamps = kw.get("stamps").and_then(Value::as_i64).unwrap_or(0);
        kw.insert("stamps".to_string(), json!(stamps + 1));
        let _ = rt.name(g);
        0
    });
    let sub = GClass::builder("Stamper")
        .input_event("data", 0, "")
        .state("ST_IDLE", vec![ev_action("data", Some(stamping), None)])
        .build();
    rt.register_gclass(sub).unwrap();

    let yuno = rt.yuno_factory("main", json!({})).unwrap();
    let x = rt.create("x", "Pub", kw(json!({})), yuno).unwrap();
    let y1 = rt.create("y1", "Stamper", kw(json!({})), yuno).unwrap();
    let y2 = rt.create("y2", "Stamper", kw(json!({})), yuno).unwrap();

    let shared = json!({"__config__": {"__share_kw__": true}});
    rt.subscribe_event(x, "data", kw(shared.clone()), y1)?;
    rt.subscribe_event(x, "data", kw(shared), y2)?;
    rt.publish_event(x, "data", kw(json!({})));
    {
        let l = log.borrow();
        assert_eq!(l.len(), 2);
        assert!(l[0].1.get("stamps").is_none());
        assert_eq!(l[1].1["stamps"], json!(1)); // saw y1's stamp
    }
    log.borrow_mut().clear();

    // plain subscriptions: deep clones, no bleed-through
    rt.unsubscribe_all(x);
    rt.subscribe_event(x, "data", kw(json!({})), y1)?;
    rt.subscribe_event(x, "data", kw(json!({})), y2)?;
    rt.publish_event(x, "data", kw(json!({})));
    let l = log.borrow();
    assert_eq!(l.len(), 2);
    assert!(l[0].1.get("stamps").is_none());
    assert!(l[1].1.get("stamps").is_none());
    Ok(())
}

#[test]
fn own_event_stops_publication() -> Result<()> {
    // subscriber action answers -1; with __own_event__ the loop breaks
    let mut b = bed_with_rc(-1);
    let z_log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let z = {
        let sub2 = GClass::builder("Sub2")
            .input_event("data", 0, "")
            .state("ST_IDLE", vec![ev_action("data", Some(capture(&z_log, 0)), None)])
            .build();
        b.rt.register_gclass(sub2).unwrap();
        let yuno = b.rt.yuno().unwrap();
        b.rt.create("z", "Sub2", kw(json!({})), yuno)?
    };

    b.rt.subscribe_event(
        b.x,
        "data",
        kw(json!({"__config__": {"__own_event__": true}})),
        b.y,
    )?;
    b.rt.subscribe_event(b.x, "data", kw(json!({})), z)?;

    let rc = b.rt.publish_event(b.x, "data", kw(json!({})));
    assert_eq!(rc, RC_BROKE);
    assert_eq!(b.log.borrow().len(), 1);
    assert!(z_log.borrow().is_empty()); // never reached
    Ok(())
}

#[test]
fn trans_filter_webix() -> Result<()> {
    let mut b = bed();
    b.rt.subscribe_event(
        b.x,
        "data",
        kw(json!({"__config__": {"__trans_filter__": "webix"}})),
        b.y,
    )?;
    b.rt.publish_event(b.x, "data", kw(json!({"n": 5})));
    let log = b.log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1["result"], json!(0));
    assert_eq!(log[0].1["data"]["n"], json!(5));
    Ok(())
}

#[test]
fn find_subscriptions_filters() -> Result<()> {
    let mut b = bed();
    let s1 = b.rt.subscribe_event(b.x, "data", kw(json!({})), b.y)?;
    let s2 = b
        .rt
        .subscribe_event(b.x, "raw", kw(json!({"__filter__": {"kind": "a"}})), b.y)?;

    assert_eq!(b.rt.find_subscriptions(b.x, None, None, None).len(), 2);
    assert_eq!(
        b.rt.find_subscriptions(b.x, Some("data"), None, None),
        vec![s1]
    );
    assert_eq!(
        b.rt
            .find_subscriptions(b.x, None, Some(&kw(json!({"__filter__": {"kind": "a"}}))), None),
        vec![s2]
    );
    assert_eq!(
        b.rt.find_subscribings(b.y, Some("raw"), None, Some(b.x)),
        vec![s2]
    );
    Ok(())
}

#[test]
fn publisher_hooks_control_pipeline() -> Result<()> {
    // mt_publish_event returning 0 suppresses the default distribution
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();

    let mut gmt = GMethods::default();
    gmt.mt_publish_event = Some(Arc::new(|_rt, _g, _ev, _kw| 0));
    let p = GClass::builder("Quiet")
        .output_event("data", 0, "")
        .gmt(gmt)
        .build();
    rt.register_gclass(p).unwrap();
    rt.register_gclass(subscriber_class(&log, 0)).unwrap();

    let yuno = rt.yuno_factory("main", json!({})).unwrap();
    let x = rt.create("x", "Quiet", kw(json!({})), yuno).unwrap();
    let y = rt.create("y", "Sub", kw(json!({})), yuno).unwrap();
    rt.subscribe_event(x, "data", kw(json!({})), y)?;

    assert_eq!(rt.publish_event(x, "data", kw(json!({}))), 0);
    assert!(log.borrow().is_empty());
    Ok(())
}

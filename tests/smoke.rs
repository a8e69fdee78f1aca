use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use gobj::{attr, ev_action, kw, GClass, GMethods, Runtime, RuntimeOptions, SdType, SDF_WR};

// Shared log of lifecycle hook firings.
pub type HookLog = Rc<RefCell<Vec<String>>>;

fn yuno_class() -> Arc<GClass> {
    GClass::builder("Yuno").build()
}

fn worker_class(log: HookLog) -> Arc<GClass> {
    let mut gmt = GMethods::default();
    let l1 = log.clone();
    gmt.mt_start = Some(Arc::new(move |rt, g| {
        l1.borrow_mut().push(format!("start:{}", rt.name(g)));
        0
    }));
    let l2 = log.clone();
    gmt.mt_stop = Some(Arc::new(move |rt, g| {
        l2.borrow_mut().push(format!("stop:{}", rt.name(g)));
        0
    }));
    GClass::builder("Worker")
        .attr(attr("url", SdType::Str, SDF_WR, json!(""), "peer url"))
        .input_event("EV_PING", 0, "")
        .state("ST_IDLE", vec![ev_action("EV_PING", None, None)])
        .gmt(gmt)
        .build()
}

fn boot(log: HookLog) -> (Runtime, gobj::GobjId) {
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("sample", yuno_class()).unwrap();
    rt.register_gclass(worker_class(log)).unwrap();
    let yuno = rt.yuno_factory("main", json!({})).unwrap();
    (rt, yuno)
}

#[test]
fn hierarchical_start_stop() -> Result<()> {
    let log: HookLog = Rc::new(RefCell::new(Vec::new()));
    let (mut rt, yuno) = boot(log.clone());

    let svc = rt.create_service("svc", "Worker", kw(json!({})), yuno)?;
    assert!(rt.is_service(svc));
    assert_eq!(rt.find_service("svc"), Some(svc));

    rt.start_tree(yuno)?;
    assert!(rt.is_running(yuno));
    assert!(rt.is_running(svc));
    assert_eq!(log.borrow().as_slice(), &["start:svc".to_string()]);

    rt.stop_tree(yuno)?;
    assert!(!rt.is_running(yuno));
    assert!(!rt.is_running(svc));
    assert_eq!(
        log.borrow().as_slice(),
        &["start:svc".to_string(), "stop:svc".to_string()]
    );
    Ok(())
}

#[test]
fn naming_and_lookup() -> Result<()> {
    let log: HookLog = Rc::new(RefCell::new(Vec::new()));
    let (mut rt, yuno) = boot(log);

    let a = rt.create("a", "Worker", kw(json!({})), yuno)?;
    let b = rt.create("b", "Worker", kw(json!({})), a)?;

    assert_eq!(rt.short_name(b), "Worker^b");
    assert_eq!(rt.full_name(b), "main`a`b");
    assert_eq!(rt.oid(yuno), "1");
    assert_eq!(rt.oid(b), "1.1.1");

    // path, oid and registry resolution all land on the same gobj
    assert_eq!(rt.find_gobj("main`a`b"), Some(b));
    assert_eq!(rt.find_gobj("1.1.1"), Some(b));
    assert_eq!(rt.find_gobj("main`zzz"), None);

    let u = rt.create_unique("router", "Worker", kw(json!({})), yuno)?;
    assert_eq!(rt.find_unique_gobj("router"), Some(u));
    assert_eq!(rt.find_gobj("router"), Some(u));
    assert!(rt.is_unique(u));

    // children iterate in insertion order
    assert_eq!(rt.childs(yuno), vec![a, u]);
    assert_eq!(rt.child_index(yuno, u), Some(2));
    assert_eq!(rt.child_by_name(yuno, "a"), Some(a));
    Ok(())
}

#[test]
fn yuno_factory_runs_once() {
    let log: HookLog = Rc::new(RefCell::new(Vec::new()));
    let (mut rt, _yuno) = boot(log);
    assert!(rt.yuno_factory("again", json!({})).is_err());
}

#[test]
fn bad_names_rejected() {
    let log: HookLog = Rc::new(RefCell::new(Vec::new()));
    let (mut rt, yuno) = boot(log);

    assert!(rt.create("with`tick", "Worker", kw(json!({})), yuno).is_err());
    assert!(rt.create("with^caret", "Worker", kw(json!({})), yuno).is_err());
    let long = "x".repeat(49);
    assert!(rt.create(&long, "Worker", kw(json!({})), yuno).is_err());
    assert!(rt.create("ok-name", "NoSuchClass", kw(json!({})), yuno).is_err());
}

#[test]
fn unique_name_collision_fails() -> Result<()> {
    let log: HookLog = Rc::new(RefCell::new(Vec::new()));
    let (mut rt, yuno) = boot(log);

    rt.create_unique("dup", "Worker", kw(json!({})), yuno)?;
    assert!(rt.create_unique("dup", "Worker", kw(json!({})), yuno).is_err());
    // the failed creation left no orphan child behind
    assert_eq!(rt.child_size(yuno), 1);
    Ok(())
}

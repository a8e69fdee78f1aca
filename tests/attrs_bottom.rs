use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use gobj::{
    attr, kw, GClass, GMethods, GobjError, Runtime, RuntimeOptions, SdType, SDF_RD, SDF_STATS,
    SDF_VOLATIL, SDF_WR,
};

fn boot() -> Runtime {
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();
    rt
}

fn connex_class() -> Arc<GClass> {
    GClass::builder("Connex")
        .attr(attr("url", SdType::Str, SDF_WR, json!("tcp://"), "peer url"))
        .attr(attr("timeout", SdType::I32, SDF_WR, json!(5), ""))
        .attr(attr("txed", SdType::U64, SDF_STATS | SDF_RD, json!(0), ""))
        .attr(attr("scratch", SdType::Json, SDF_VOLATIL | SDF_WR, json!(null), ""))
        .build()
}

#[test]
fn typed_read_write() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(connex_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Connex", kw(json!({})), yuno)?;

    assert_eq!(rt.read_str_attr(g, "url"), "tcp://");
    rt.write_str_attr(g, "url", "tcp://h:7")?;
    assert_eq!(rt.read_str_attr(g, "url"), "tcp://h:7");

    rt.write_i32_attr(g, "timeout", 30)?;
    assert_eq!(rt.read_i32_attr(g, "timeout"), 30);

    // coercion from numeric strings, rejection of true mismatches
    rt.write_attr(g, "timeout", json!("45"))?;
    assert_eq!(rt.read_i32_attr(g, "timeout"), 45);
    let err = rt.write_attr(g, "timeout", json!([1])).unwrap_err();
    assert!(matches!(err, GobjError::TypeMismatch { .. }));
    assert_eq!(rt.read_i32_attr(g, "timeout"), 45);

    // unknown attr
    assert!(rt.read_attr(g, "nope").is_err());
    assert!(rt.write_attr(g, "nope", json!(1)).is_err());
    Ok(())
}

#[test]
fn creation_kw_fills_attrs() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(connex_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create(
        "g",
        "Connex",
        kw(json!({"url": "tcp://cfg", "timeout": 9})),
        yuno,
    )?;
    assert_eq!(rt.read_str_attr(g, "url"), "tcp://cfg");
    assert_eq!(rt.read_i32_attr(g, "timeout"), 9);
    Ok(())
}

#[test]
fn bottom_chain_delegation() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(connex_class())?;
    let holder = GClass::builder("Holder")
        .attr(attr("label", SdType::Str, SDF_WR, json!(""), ""))
        .build();
    rt.register_gclass(holder)?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let top = rt.create("top", "Holder", kw(json!({})), yuno)?;
    let bottom = rt.create("bottom", "Connex", kw(json!({})), top)?;
    rt.set_bottom_gobj(top, Some(bottom));

    // local attr resolves locally; missing attrs consult the bottom
    assert!(rt.has_attr(top, "label"));
    assert!(!rt.has_attr(top, "url"));
    assert!(rt.has_bottom_attr(top, "url"));
    assert_eq!(rt.read_str_attr(top, "url"), "tcp://");

    // a write through the chain lands on the bottom
    rt.write_str_attr(top, "url", "tcp://via-top")?;
    assert_eq!(rt.read_str_attr(bottom, "url"), "tcp://via-top");

    // not found anywhere
    assert!(rt.read_attr(top, "ghost").is_err());

    // inherited gclass test follows the chain
    assert!(rt.typeof_inherited_gclass(top, "Connex"));
    assert!(!rt.typeof_gclass(top, "Connex"));
    Ok(())
}

#[test]
fn writing_hook_and_reading_hook() -> Result<()> {
    let writes: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();

    let w = writes.clone();
    let mut gmt = GMethods::default();
    gmt.mt_writing = Some(Arc::new(move |_rt, _g, name| {
        w.borrow_mut().push(name.to_string());
    }));
    gmt.mt_reading = Some(Arc::new(|_rt, _g, name, value| {
        if name == "url" {
            if let Value::String(s) = &value {
                return Value::String(format!("{}!", s));
            }
        }
        value
    }));
    let gc = GClass::builder("Hooked")
        .attr(attr("url", SdType::Str, SDF_WR, json!("x"), ""))
        .gmt(gmt)
        .build();
    rt.register_gclass(gc)?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Hooked", kw(json!({})), yuno)?;

    rt.write_str_attr(g, "url", "y")?;
    assert_eq!(writes.borrow().as_slice(), &["url".to_string()]);
    // mt_reading transforms the value on the way out
    assert_eq!(rt.read_str_attr(g, "url"), "y!");
    Ok(())
}

#[test]
fn stats_write_routes_to_service() -> Result<()> {
    let seen: Rc<RefCell<Vec<(String, String, i64, i64)>>> = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();

    let s = seen.clone();
    let mut gmt = GMethods::default();
    gmt.mt_stats_updated = Some(Arc::new(
        move |rt: &mut Runtime, _svc, owner, name: &str, old: &Value, new: &Value| {
            s.borrow_mut().push((
                rt.name(owner),
                name.to_string(),
                old.as_i64().unwrap_or(-1),
                new.as_i64().unwrap_or(-1),
            ));
            0
        },
    ));
    rt.register_gclass(GClass::builder("Svc").gmt(gmt).build())?;
    rt.register_gclass(connex_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let svc = rt.create_service("svc", "Svc", kw(json!({})), yuno)?;
    let leaf = rt.create("leaf", "Connex", kw(json!({})), svc)?;

    rt.write_attr(leaf, "txed", json!(10))?;
    let got = seen.borrow();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], ("leaf".to_string(), "txed".to_string(), 0, 10));
    Ok(())
}

#[test]
fn volatil_reset_and_snapshots() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(connex_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Connex", kw(json!({})), yuno)?;

    rt.write_attr(g, "scratch", json!({"tmp": 1}))?;
    rt.write_attr(g, "txed", json!(3))?;

    let stats = rt.attrs_snapshot(g, SDF_STATS);
    assert_eq!(stats.get("txed"), Some(&json!(3)));
    assert!(stats.get("url").is_none());

    let reset = rt.reset_volatil_attrs(g)?;
    assert_eq!(reset, vec!["scratch".to_string()]);
    assert_eq!(rt.read_json_attr(g, "scratch"), json!(null));

    let writable = rt.writable_attrs(g);
    assert!(writable.contains_key("url"));
    assert!(!writable.contains_key("txed"));
    Ok(())
}

#[test]
fn user_data_paths() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(connex_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Connex", kw(json!({})), yuno)?;

    rt.write_user_data(g, "session", json!({"id": 7}))?;
    assert_eq!(rt.read_user_data(g, "session"), Some(json!({"id": 7})));

    rt.kw_set_user_data(g, "deep`nested`flag", json!(true))?;
    assert_eq!(rt.kw_get_user_data(g, "deep`nested`flag", json!(false)), json!(true));
    assert_eq!(rt.kw_get_user_data(g, "deep`missing", json!("d")), json!("d"));
    assert_eq!(rt.kw_delete_user_data(g, "deep`nested`flag"), Some(json!(true)));
    Ok(())
}

#[test]
fn pointer_attrs_carry_handles() -> Result<()> {
    let mut rt = boot();
    let gc = GClass::builder("Linker")
        .attr(attr("subscriber", SdType::Pointer, SDF_WR, json!(0), ""))
        .build();
    rt.register_gclass(gc)?;
    rt.register_gclass(connex_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let peer = rt.create("peer", "Connex", kw(json!({})), yuno)?;
    let l = rt.create("l", "Linker", kw(json!({})), yuno)?;

    rt.write_pointer_attr(l, "subscriber", Some(peer))?;
    assert_eq!(rt.read_pointer_attr(l, "subscriber"), Some(peer));

    // stale handles dereference to None
    rt.destroy(peer);
    assert_eq!(rt.read_pointer_attr(l, "subscriber"), None);
    Ok(())
}

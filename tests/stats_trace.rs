use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use gobj::{
    attr, kw, GClass, Runtime, RuntimeOptions, SdType, SDF_RD, SDF_RSTATS, SDF_STATS, SDF_WR,
};

fn boot() -> Runtime {
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();
    rt
}

fn counted_class() -> Arc<GClass> {
    GClass::builder("Counted")
        .attr(attr("txed", SdType::U64, SDF_STATS | SDF_RSTATS | SDF_RD, json!(0), ""))
        .attr(attr("url", SdType::Str, SDF_WR, json!(""), ""))
        .trace_level("messages", "trace every message")
        .trace_level("verbose", "everything else")
        .build()
}

#[test]
fn stat_counters() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Counted", kw(json!({})), yuno)?;

    assert_eq!(rt.get_stat(g, "rx"), 0);
    assert_eq!(rt.incr_stat(g, "rx", 3), 3);
    assert_eq!(rt.incr_stat(g, "rx", 2), 5);
    assert_eq!(rt.decr_stat(g, "rx", 1), 4);
    assert_eq!(rt.set_stat(g, "rx", 100), 4); // returns the old value
    assert_eq!(rt.get_stat(g, "rx"), 100);
    assert_eq!(rt.stats_map(g).get("rx"), Some(&json!(100)));
    Ok(())
}

#[test]
fn build_stats_webix_and_reset() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Counted", kw(json!({})), yuno)?;

    rt.write_attr(g, "txed", json!(7))?;
    rt.incr_stat(g, "rx", 9);

    let webix = rt.gobj_stats(g, "", kw(json!({})), None);
    assert_eq!(webix["result"], json!(0));
    assert_eq!(webix["data"]["txed"], json!(7));
    assert_eq!(webix["data"]["rx"], json!(9));
    assert!(webix["data"].get("url").is_none());

    // reset clears rstats attrs and counters
    let webix = rt.gobj_stats(g, "__reset_stats__", kw(json!({})), None);
    assert_eq!(webix["result"], json!(0));
    assert_eq!(rt.read_u64_attr(g, "txed"), 0);
    assert_eq!(rt.get_stat(g, "rx"), 0);
    Ok(())
}

#[test]
fn stats_authz_gate() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Counted", kw(json!({})), yuno)?;

    rt.set_global_authz_checker(Arc::new(|_rt, _g, authz, _kw, _src| {
        authz != "__reset_stats__"
    }));
    let webix = rt.gobj_stats(g, "", kw(json!({})), None);
    assert_eq!(webix["result"], json!(0));
    let webix = rt.gobj_stats(g, "__reset_stats__", kw(json!({})), None);
    assert_eq!(webix["result"], json!(-403));
    Ok(())
}

#[test]
fn trace_masks_join_and_subtract() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Counted", kw(json!({})), yuno)?;

    assert_eq!(rt.trace_level(g) & gobj::trace::TRACE_MACHINE, 0);

    // global level reaches every gobj
    rt.set_global_trace("machine", true)?;
    assert_ne!(rt.trace_level(g) & gobj::trace::TRACE_MACHINE, 0);
    rt.set_global_trace("machine", false)?;

    // gclass user level sits in the low bits
    rt.set_gclass_trace("Counted", "messages", true)?;
    assert_ne!(rt.trace_level(g) & 0x0001, 0);
    assert_eq!(rt.trace_level(g) & 0x0002, 0);
    rt.set_gclass_trace("Counted", "verbose", true)?;
    assert_ne!(rt.trace_level(g) & 0x0002, 0);

    // per-gobj no-trace subtracts
    rt.set_gobj_no_trace(g, "messages", true)?;
    assert_eq!(rt.trace_level(g) & 0x0001, 0);

    // unknown level name
    assert!(rt.set_gclass_trace("Counted", "nope", true).is_err());

    let levels = rt.get_gclass_trace_level("Counted");
    assert!(levels.contains(&"messages".to_string()));
    assert!(levels.contains(&"verbose".to_string()));
    Ok(())
}

#[test]
fn deep_and_panic_trace() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Counted", kw(json!({})), yuno)?;

    rt.set_gobj_no_trace(g, "messages", true)?;

    // deep 1: everything except the no-trace masks
    rt.set_deep_trace(1);
    assert_eq!(rt.get_deep_trace(), 1);
    assert_eq!(rt.trace_level(g) & 0x0001, 0);
    assert_ne!(rt.trace_level(g) & gobj::trace::TRACE_MACHINE, 0);

    // deep >= 2: unconditional
    rt.set_deep_trace(2);
    assert_ne!(rt.trace_level(g) & 0x0001, 0);

    rt.set_deep_trace(0);
    rt.set_panic_trace(true);
    assert_eq!(rt.trace_level(g), u32::MAX);
    Ok(())
}

#[test]
fn trace_filter_gates_class_bits() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let a = rt.create("a", "Counted", kw(json!({"url": "tcp://a"})), yuno)?;
    let b = rt.create("b", "Counted", kw(json!({"url": "tcp://b"})), yuno)?;

    rt.set_gclass_trace("Counted", "messages", true)?;
    rt.add_trace_filter("Counted", "url", "tcp://a")?;

    // only the matching gobj keeps the class bits
    assert_ne!(rt.trace_level(a) & 0x0001, 0);
    assert_eq!(rt.trace_level(b) & 0x0001, 0);

    rt.remove_trace_filter("Counted", "", "")?;
    assert_ne!(rt.trace_level(b) & 0x0001, 0);

    assert!(rt.add_trace_filter("Counted", "nope", "x").is_err());
    Ok(())
}

#[test]
fn introspection_views() -> Result<()> {
    let mut rt = boot();
    rt.register_gclass(counted_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let svc = rt.create_service("svc", "Counted", kw(json!({})), yuno)?;
    let _leaf = rt.create("leaf", "Counted", kw(json!({})), svc)?;

    let gc = rt.gclass2json("Counted").unwrap();
    assert_eq!(gc["gclass"], json!("Counted"));
    assert_eq!(gc["instances"], json!(2));

    let gj = rt.gobj2json(svc).unwrap();
    assert_eq!(gj["gobj"], json!("Counted^svc"));
    assert_eq!(gj["childs"], json!(1));
    assert_eq!(gj["service"], json!(true));

    let tree = rt.view_gobj_tree(yuno);
    assert_eq!(tree["zchilds"][0]["gobj"], json!("Counted^svc"));
    assert_eq!(tree["zchilds"][0]["zchilds"][0]["gobj"], json!("Counted^leaf"));

    let reg = rt.repr_service_register("");
    assert_eq!(reg[0]["service"], json!("svc"));

    let metrics = gobj::metrics::snapshot();
    assert!(metrics.gobjs_created >= 3);
    Ok(())
}

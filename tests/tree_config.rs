use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use gobj::{attr, ev_action, kw, ActionFn, GClass, Runtime, RuntimeOptions, SdType, SDF_WR};

type EvLog = Rc<RefCell<Vec<(String, String)>>>;

fn boot_with_settings(settings: Value) -> Runtime {
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        settings,
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();
    rt
}

fn node_class() -> Arc<GClass> {
    GClass::builder("Node")
        .attr(attr("url", SdType::Str, SDF_WR, json!(""), ""))
        .attr(attr("subscriber", SdType::Pointer, SDF_WR, json!(0), ""))
        .build()
}

#[test]
fn tree_shapes_flags_and_bottom() -> Result<()> {
    let mut rt = boot_with_settings(json!({}));
    rt.register_gclass(node_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let root = rt.create_tree(
        yuno,
        json!({
            "gclass": "Node", "name": "root", "as_service": true,
            "zchilds": [
                {"gclass": "Node", "name": "only", "as_unique": true,
                 "zchilds": [
                    {"gclass": "Node", "name": "g1", "disabled": true},
                    {"gclass": "Node", "name": "g2"}
                 ]}
            ]
        }),
        "",
        "",
    )?;

    assert!(rt.is_service(root));
    assert_eq!(rt.find_service("root"), Some(root));
    let only = rt.child_by_name(root, "only").unwrap();
    assert!(rt.is_unique(only));
    assert_eq!(rt.find_unique_gobj("only"), Some(only));

    // exactly one child => it became the bottom
    assert_eq!(rt.bottom_gobj(root), Some(only));
    // two children => no bottom
    assert_eq!(rt.bottom_gobj(only), None);

    let g1 = rt.child_by_name(only, "g1").unwrap();
    assert!(rt.is_disabled(g1));
    Ok(())
}

#[test]
fn tree_setup_events_reach_parent() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot_with_settings(json!({}));
    rt.register_gclass(node_class())?;

    let l = log.clone();
    let act: ActionFn = Arc::new(move |rt, _g, ev, _kw, src| {
        let src_name = src.map(|s| rt.name(s)).unwrap_or_default();
        l.borrow_mut().push((ev.to_string(), src_name));
        0
    });
    let parent_gc = GClass::builder("Parent")
        .input_event("EV_ON_SETUP", 0, "")
        .input_event("EV_ON_SETUP_COMPLETE", 0, "")
        .state(
            "ST_IDLE",
            vec![
                ev_action("EV_ON_SETUP", Some(act.clone()), None),
                ev_action("EV_ON_SETUP_COMPLETE", Some(act), None),
            ],
        )
        .build();
    rt.register_gclass(parent_gc)?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let holder = rt.create("holder", "Parent", kw(json!({})), yuno)?;
    let _built = rt.create_tree(
        holder,
        json!({
            "gclass": "Node", "name": "n",
            "zchilds": [{"gclass": "Node", "name": "c1"}, {"gclass": "Node", "name": "c2"}]
        }),
        "EV_ON_SETUP",
        "EV_ON_SETUP_COMPLETE",
    )?;

    // the holder saw the new node appear, then the completion with the
    // first child as source
    let got = log.borrow();
    assert_eq!(got[0], ("EV_ON_SETUP".to_string(), "n".to_string()));
    assert!(got
        .iter()
        .any(|(ev, src)| ev == "EV_ON_SETUP_COMPLETE" && src == "c1"));
    Ok(())
}

#[test]
fn subscriber_key_coercion() -> Result<()> {
    let mut rt = boot_with_settings(json!({}));
    rt.register_gclass(node_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let hub = rt.create_unique("hub", "Node", kw(json!({})), yuno)?;

    // a string subscriber resolves through the unique registry
    let a = rt.create_tree(
        yuno,
        json!({"gclass": "Node", "name": "a", "kw": {"subscriber": "hub"}}),
        "",
        "",
    )?;
    assert_eq!(rt.read_pointer_attr(a, "subscriber"), Some(hub));

    // absent subscriber defaults to the parent when the parent is not
    // the yuno
    let b = rt.create_tree(
        a,
        json!({"gclass": "Node", "name": "b"}),
        "",
        "",
    )?;
    assert_eq!(rt.read_pointer_attr(b, "subscriber"), Some(a));

    // under the yuno no default applies
    let c = rt.create_tree(yuno, json!({"gclass": "Node", "name": "c"}), "", "")?;
    assert_eq!(rt.read_pointer_attr(c, "subscriber"), None);
    Ok(())
}

#[test]
fn settings_scoping_and_variables() -> Result<()> {
    let settings = json!({
        "Node.timeout": 30,
        "router.url": "tcp://{{host}}:{{port}}",
        "router.kw": {"tag": "{{tag}}"},
        "__json_config_variables__": {"host": "n1", "port": 7777, "tag": "blue"}
    });
    let mut rt = boot_with_settings(settings);
    let gc = GClass::builder("Node")
        .attr(attr("url", SdType::Str, SDF_WR, json!(""), ""))
        .attr(attr("timeout", SdType::I32, SDF_WR, json!(5), ""))
        .attr(attr("tag", SdType::Str, SDF_WR, json!(""), ""))
        .build();
    rt.register_gclass(gc)?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    // gclass-scoped and gobj-scoped entries override the provided kw
    let router = rt.create("router", "Node", kw(json!({"url": "tcp://default"})), yuno)?;
    assert_eq!(rt.read_str_attr(router, "url"), "tcp://n1:7777");
    assert_eq!(rt.read_i32_attr(router, "timeout"), 30);
    assert_eq!(rt.read_str_attr(router, "tag"), "blue");

    // another gobj of the class gets only the gclass-scoped entry
    let other = rt.create("other", "Node", kw(json!({})), yuno)?;
    assert_eq!(rt.read_i32_attr(other, "timeout"), 30);
    assert_eq!(rt.read_str_attr(other, "url"), "");
    Ok(())
}

#[test]
fn builtin_variables_expand() -> Result<()> {
    let settings = json!({
        "Node.kw": {"url": "yuno:{{__yuno_role__}}/{{__yuno_name__}}"}
    });
    let mut rt = boot_with_settings(settings);
    let gc = GClass::builder("Node")
        .attr(attr("url", SdType::Str, SDF_WR, json!(""), ""))
        .build();
    rt.register_gclass(gc)?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Node", kw(json!({})), yuno)?;
    assert_eq!(rt.read_str_attr(g, "url"), "yuno:test/main");

    let vars = rt.global_variables();
    assert!(vars.contains_key("__hostname__"));
    assert_eq!(vars.get("__yuno_role__"), Some(&json!("test")));
    Ok(())
}

#[test]
fn service_factory_builds_under_yuno() -> Result<()> {
    let mut rt = boot_with_settings(json!({}));
    rt.register_gclass(node_class())?;
    let yuno = rt.yuno_factory("main", json!({}))?;

    let svc = rt.service_factory(
        "gate",
        json!({"gclass": "Node", "zchilds": [{"gclass": "Node", "name": "port"}]}),
    )?;
    assert!(rt.is_service(svc));
    assert_eq!(rt.parent(svc), Some(yuno));
    assert_eq!(rt.find_service("gate"), Some(svc));
    assert!(rt.child_by_name(svc, "port").is_some());
    Ok(())
}

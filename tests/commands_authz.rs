use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use gobj::{
    build_webix, cmd, ev_action, kw, param, ActionFn, GClass, Runtime, RuntimeOptions, SdType,
    SDF_REQUIRED,
};

type EvLog = Rc<RefCell<Vec<(String, Value)>>>;

fn boot() -> Runtime {
    let mut rt = Runtime::start_up(
        RuntimeOptions::default().with_warn_no_subscribers(false),
        json!({}),
    );
    rt.register_yuno("test", GClass::builder("Yuno").build()).unwrap();
    rt
}

fn commanded_class(log: &EvLog) -> Arc<GClass> {
    let l = log.clone();
    let act: ActionFn = Arc::new(move |_rt, _g, ev, kw, _src| {
        l.borrow_mut().push((ev.to_string(), Value::Object(kw.clone())));
        0
    });

    let echo = cmd(
        "echo",
        &[],
        vec![param("text", SdType::Str, SDF_REQUIRED, None, "text to echo")],
        0,
        "Echo back the text",
        Some(Arc::new(|_rt, _g, _cmd, kw_cmd, _src| {
            build_webix(
                0,
                None,
                Value::Null,
                kw_cmd.get("text").cloned().unwrap_or(Value::Null),
            )
        })),
    );
    // no handler + alias list: redirect-to-event combination
    let poke = cmd("poke", &["poke_event"], vec![], 0, "Redirect to the machine", None);

    GClass::builder("Cmd")
        .input_event("poke_event", 0, "")
        .state("ST_IDLE", vec![ev_action("poke_event", Some(act), None)])
        .command(echo)
        .command(poke)
        .build()
}

#[test]
fn direct_handler_returns_webix() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    let webix = rt.command(g, "echo hello", kw(json!({})), None);
    assert_eq!(webix["result"], json!(0));
    assert_eq!(webix["data"], json!("hello"));

    // required parameter taken from the kw when not positional
    let webix = rt.command(g, "echo", kw(json!({"text": "from-kw"})), None);
    assert_eq!(webix["data"], json!("from-kw"));
    Ok(())
}

#[test]
fn command_redirects_to_event() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    // pending (null) response; the engine observed the event
    let webix = rt.command(g, "poke", kw(json!({"n": 1})), None);
    assert!(webix.is_null());
    let got = log.borrow();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, "poke_event");
    assert_eq!(got[0].1["n"], json!(1));
    Ok(())
}

#[test]
fn command_errors() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    let webix = rt.command(g, "nope", kw(json!({})), None);
    assert_eq!(webix["result"], json!(-15));
    assert!(webix["comment"].as_str().unwrap().contains("not available"));

    let webix = rt.command(g, "echo", kw(json!({})), None);
    assert_eq!(webix["result"], json!(-14));
    assert!(webix["comment"].as_str().unwrap().contains("required"));

    let webix = rt.command(g, "echo hello junk", kw(json!({})), None);
    assert_eq!(webix["result"], json!(-14));
    assert!(webix["comment"].as_str().unwrap().contains("extra parameters"));
    Ok(())
}

#[test]
fn audit_sees_every_command() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let audited: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let a = audited.clone();
    rt.audit_commands(Arc::new(move |cmd, _kw| {
        a.borrow_mut().push(cmd.to_string());
    }));
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    let _ = rt.command(g, "echo hi", kw(json!({})), None);
    let _ = rt.command(g, "nope", kw(json!({})), None);
    assert_eq!(
        audited.borrow().as_slice(),
        &["echo hi".to_string(), "nope".to_string()]
    );
    Ok(())
}

#[test]
fn cmds_doc_lists_commands() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    let doc = rt.build_cmds_doc(g, kw(json!({})))?;
    let text = doc.as_str().unwrap();
    assert!(text.contains("Available commands"));
    assert!(text.contains("echo"));
    assert!(text.contains("poke_event"));

    let doc = rt.build_cmds_doc(g, kw(json!({"cmd": "echo"})))?;
    let text = doc.as_str().unwrap();
    assert!(text.starts_with("echo\n====\n"));
    assert!(text.contains("Type:string"));
    Ok(())
}

#[test]
fn authz_default_allows_checker_denies() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    // no checker installed: allowed (local-only behavior)
    assert!(rt.user_has_authz(g, "__execute_command__", &kw(json!({})), None));

    // a global checker is consulted and can deny
    rt.set_global_authz_checker(Arc::new(|_rt, _g, authz, _kw, _src| {
        authz != "__execute_command__"
    }));
    assert!(!rt.user_has_authz(g, "__execute_command__", &kw(json!({})), None));
    assert!(rt.user_has_authz(g, "__read_stats__", &kw(json!({})), None));

    let webix = rt.command(g, "echo hi", kw(json!({})), None);
    assert_eq!(webix["result"], json!(-403));
    Ok(())
}

#[test]
fn authenticate_default_names_os_user() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    let webix = rt.authenticate(g, kw(json!({})), None);
    assert_eq!(webix["result"], json!(0));
    assert!(webix["username"].as_str().is_some());

    rt.set_global_authenticate_parser(Arc::new(|_rt, _g, _kw, _src| {
        let mut w = build_webix(-1, Some("bad token".to_string()), Value::Null, Value::Null);
        w.as_object_mut()
            .unwrap()
            .insert("username".to_string(), json!(""));
        w
    }));
    let webix = rt.authenticate(g, kw(json!({})), None);
    assert_eq!(webix["result"], json!(-1));
    Ok(())
}

#[test]
fn authz_tables_and_docs() -> Result<()> {
    let log: EvLog = Rc::new(RefCell::new(Vec::new()));
    let mut rt = boot();
    rt.register_gclass(commanded_class(&log))?;
    let yuno = rt.yuno_factory("main", json!({}))?;
    let g = rt.create("g", "Cmd", kw(json!({})), yuno)?;

    // the global reserved table
    let global = rt.authzs_list(None, "").unwrap();
    let names: Vec<&str> = global
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"__read_attribute__"));
    assert!(names.contains(&"__execute_command__"));

    let one = rt.authzs_list(None, "__inject_event__").unwrap();
    assert_eq!(one["id"], json!("__inject_event__"));

    // a class without authz table answers None
    assert!(rt.authzs_list(Some(g), "").is_none());

    let doc = rt.build_authzs_doc(g, kw(json!({})));
    assert_eq!(doc["result"], json!(0));
    assert!(doc["data"]["global authzs"].is_array());

    let doc = rt.build_authzs_doc(g, kw(json!({"service": "missing"})));
    assert_eq!(doc["result"], json!(-1));
    Ok(())
}

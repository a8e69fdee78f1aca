//! runtime — the process-wide context every operation goes through.
//!
//! One Runtime owns everything: the gobj arena, the subscription table,
//! the class/service/unique registries and the pluggable collaborators
//! (persistence, parsers, authz checker, monitor sink). There is no other
//! global state; a process builds exactly one Runtime with start_up().
//!
//! Подмодули:
//! - node.rs       arena, ids, naming, tree/info queries
//! - create.rs     the five creation flavors, create_tree, destroy
//! - lifecycle.rs  start/stop/play/pause/enable/disable, tree walks
//! - views.rs      JSON introspection of classes, gobjs and registries

pub mod create;
pub mod lifecycle;
pub mod node;
pub mod views;

pub use create::TreeSpec;
pub use node::{GobjId, WalkOrder};
pub use node::{
    GF_AUTOPLAY, GF_AUTOSTART, GF_CREATED, GF_DEFAULT_SERVICE, GF_DESTROYING, GF_IMMINENT_DESTROY,
    GF_SERVICE, GF_UNIQUE, GF_VOLATIL, GF_YUNO,
};

use indexmap::IndexMap;
use log::{error, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::config::RuntimeOptions;
use crate::consts::*;
use crate::error::{GResult, GobjError};
use crate::gclass::{
    AuthenticateFn, AuthzCheckerFn, CmdFn, GClass, StatsFn,
};
use crate::kw::{kw_or_empty, Kw};
use crate::persist::PersistentAttrs;
use crate::schema::{global_authz_table, AuthzDesc};
use crate::subs::{KwMatchFn, SubsSlot, TransFilterFn};
use crate::util;
use node::{check_gclass_name, GobjNode, Slot};

/// What happened to a gobj, for the monitor sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MonitorKind {
    Create,
    Destroy,
    Start,
    Stop,
    Play,
    Pause,
}

/// Fire-and-forget monitoring/audit transport. Implementations must not
/// propagate errors into the caller.
pub trait MonitorSink {
    fn monitor_gobj(&mut self, _kind: MonitorKind, _short_name: &str) {}
    fn monitor_event(&mut self, _kind: &str, _event: &str, _src: &str, _dst: &str) {}
}

pub(crate) struct ClassEntry {
    pub gclass: Arc<GClass>,
    pub instances: u32,
    pub trace_level: u32,
    pub no_trace_level: u32,
    pub fsm_checked: bool,
    pub trace_filter: Kw,
}

pub struct Runtime {
    // Object arena
    pub(crate) nodes: Vec<Slot>,
    pub(crate) free_slots: Vec<u32>,

    // Subscription table
    pub(crate) subs: Vec<SubsSlot>,
    pub(crate) free_subs: Vec<u32>,

    // Registries
    pub(crate) classes: IndexMap<String, ClassEntry>,
    pub(crate) services: IndexMap<String, GobjId>,
    pub(crate) uniques: IndexMap<String, GobjId>,
    pub(crate) yuno: Option<GobjId>,
    pub(crate) default_service: Option<GobjId>,
    pub(crate) yuno_class: Option<String>,

    // Process identity
    pub(crate) yuno_role: String,
    pub(crate) yuno_name: String,
    pub(crate) yuno_tag: String,
    pub(crate) realm_id: String,
    pub(crate) realm_owner: String,
    pub(crate) realm_role: String,
    pub(crate) realm_name: String,
    pub(crate) realm_env: String,
    pub(crate) node_owner: String,

    // Settings and flags
    pub(crate) global_settings: Kw,
    pub(crate) options: RuntimeOptions,
    pub(crate) global_trace: u32,
    pub(crate) deep_trace: i32,
    pub(crate) panic_trace: bool,
    pub(crate) shutdowning: bool,
    pub(crate) yuno_must_die: bool,
    pub(crate) exit_code: i32,
    /// Depth of re-entrant dispatch, only for trace indentation.
    pub(crate) nested_dispatch: u32,

    // Pluggable collaborators
    pub(crate) persist: Option<Box<dyn PersistentAttrs>>,
    pub(crate) global_command_parser: Option<CmdFn>,
    pub(crate) global_stats_parser: Option<StatsFn>,
    pub(crate) global_authz_checker: Option<AuthzCheckerFn>,
    pub(crate) global_authenticate_parser: Option<AuthenticateFn>,
    pub(crate) monitor: Option<Box<dyn MonitorSink>>,
    pub(crate) audit_cb: Option<Arc<dyn Fn(&str, &Kw)>>,
    pub(crate) trans_filters: IndexMap<String, TransFilterFn>,
    pub(crate) selection_match: KwMatchFn,
    pub(crate) global_authzs: Vec<AuthzDesc>,
}

impl Runtime {
    /// Build the singleton context of the process.
    pub fn start_up(options: RuntimeOptions, global_settings: Value) -> Runtime {
        let mut rt = Runtime {
            nodes: Vec::new(),
            free_slots: Vec::new(),
            subs: Vec::new(),
            free_subs: Vec::new(),
            classes: IndexMap::new(),
            services: IndexMap::new(),
            uniques: IndexMap::new(),
            yuno: None,
            default_service: None,
            yuno_class: None,
            yuno_role: String::new(),
            yuno_name: String::new(),
            yuno_tag: String::new(),
            realm_id: String::new(),
            realm_owner: String::new(),
            realm_role: String::new(),
            realm_name: String::new(),
            realm_env: String::new(),
            node_owner: String::new(),
            global_settings: kw_or_empty(Some(global_settings)),
            deep_trace: options.deep_trace,
            panic_trace: options.panic_trace,
            options,
            global_trace: 0,
            shutdowning: false,
            yuno_must_die: false,
            exit_code: 0,
            nested_dispatch: 0,
            persist: None,
            global_command_parser: None,
            global_stats_parser: None,
            global_authz_checker: None,
            global_authenticate_parser: None,
            monitor: None,
            audit_cb: None,
            trans_filters: IndexMap::new(),
            selection_match: Arc::new(crate::kw::kw_match_simple),
            global_authzs: global_authz_table(),
        };
        rt.register_builtin_trans_filters();
        rt
    }

    /// Orderly teardown: stop services, destroy the yuno tree, close the
    /// persistence store. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutdowning {
            return;
        }
        self.shutdowning = true;
        self.stop_services();
        if let Some(yuno) = self.yuno {
            self.destroy(yuno);
        }
        if let Some(mut p) = self.persist.take() {
            p.teardown();
        }
    }

    pub fn is_shutdowning(&self) -> bool {
        self.shutdowning
    }

    // ---- Pluggable collaborators ----

    /// Install the persistent-attribute store. One per process; the
    /// store's startup() runs here.
    pub fn set_persistent_attrs(&mut self, mut store: Box<dyn PersistentAttrs>) {
        store.startup();
        self.persist = Some(store);
    }

    pub fn set_global_command_parser(&mut self, parser: CmdFn) {
        self.global_command_parser = Some(parser);
    }

    pub fn set_global_stats_parser(&mut self, parser: StatsFn) {
        self.global_stats_parser = Some(parser);
    }

    pub fn set_global_authz_checker(&mut self, checker: AuthzCheckerFn) {
        self.global_authz_checker = Some(checker);
    }

    pub fn set_global_authenticate_parser(&mut self, parser: AuthenticateFn) {
        self.global_authenticate_parser = Some(parser);
    }

    pub fn set_monitor(&mut self, sink: Box<dyn MonitorSink>) {
        self.monitor = Some(sink);
    }

    /// Only one can audit; new calls overwrite the callback.
    pub fn audit_commands(&mut self, cb: Arc<dyn Fn(&str, &Kw)>) {
        self.audit_cb = Some(cb);
    }

    pub(crate) fn monitor_gobj(&mut self, kind: MonitorKind, id: GobjId) {
        if let Some(mut m) = self.monitor.take() {
            m.monitor_gobj(kind, &self.short_name(id));
            self.monitor = Some(m);
        }
    }

    pub(crate) fn monitor_event(&mut self, kind: &str, event: &str, src: Option<GobjId>, dst: GobjId) {
        if let Some(mut m) = self.monitor.take() {
            let src_name = src.map(|s| self.short_name(s)).unwrap_or_default();
            m.monitor_event(kind, event, &src_name, &self.short_name(dst));
            self.monitor = Some(m);
        }
    }

    // ---- Class registry ----

    /// Register the yuno class and its role. The yuno itself is created
    /// later, once, by yuno_factory().
    pub fn register_yuno(&mut self, yuno_role: &str, gclass: Arc<GClass>) -> GResult<()> {
        if self.yuno_class.is_some() {
            return Err(GobjError::Param("yuno class already registered".to_string()));
        }
        let name = gclass.name.clone();
        self.register_gclass(gclass)?;
        self.yuno_class = Some(name);
        self.yuno_role = yuno_role.to_string();
        Ok(())
    }

    /// Registering the same class twice is a no-op.
    pub fn register_gclass(&mut self, gclass: Arc<GClass>) -> GResult<()> {
        check_gclass_name(&gclass.name)?;
        if self.classes.contains_key(&gclass.name) {
            return Ok(());
        }
        if gclass.trace_levels.len() > 16 {
            return Err(GobjError::Schema(format!(
                "gclass '{}': more than 16 user trace levels",
                gclass.name
            )));
        }
        self.classes.insert(
            gclass.name.clone(),
            ClassEntry {
                gclass,
                instances: 0,
                trace_level: 0,
                no_trace_level: 0,
                fsm_checked: false,
                trace_filter: Kw::new(),
            },
        );
        Ok(())
    }

    pub fn find_gclass(&self, gclass_name: &str) -> Option<Arc<GClass>> {
        self.classes.get(gclass_name).map(|e| e.gclass.clone())
    }

    pub fn gclass_instances(&self, gclass_name: &str) -> u32 {
        self.classes.get(gclass_name).map(|e| e.instances).unwrap_or(0)
    }

    pub fn walk_gclass_list<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<GClass>) -> bool,
    {
        for entry in self.classes.values() {
            if !f(&entry.gclass) {
                break;
            }
        }
    }

    // ---- Yuno ----

    /// Create the root gobj. Refuses to run twice.
    pub fn yuno_factory(&mut self, yuno_name: &str, settings: Value) -> GResult<GobjId> {
        if self.yuno.is_some() {
            return Err(GobjError::Param("yuno already created".to_string()));
        }
        let yuno_class = self
            .yuno_class
            .clone()
            .ok_or_else(|| GobjError::Param("no yuno class registered".to_string()))?;
        self.yuno_name = yuno_name.to_string();
        let id = self.create_with_flags(
            yuno_name,
            &yuno_class,
            kw_or_empty(Some(settings)),
            None,
            GF_YUNO,
        )?;
        self.yuno = Some(id);
        Ok(id)
    }

    /// Identity of the process, used in config expansion and metadata.
    pub fn set_realm(
        &mut self,
        node_owner: &str,
        realm_id: &str,
        realm_owner: &str,
        realm_role: &str,
        realm_name: &str,
        realm_env: &str,
    ) {
        self.node_owner = node_owner.to_string();
        self.realm_id = realm_id.to_string();
        self.realm_owner = realm_owner.to_string();
        self.realm_role = realm_role.to_string();
        self.realm_name = realm_name.to_string();
        self.realm_env = realm_env.to_string();
    }

    pub fn set_yuno_tag(&mut self, tag: &str) {
        self.yuno_tag = tag.to_string();
    }

    pub fn yuno(&self) -> Option<GobjId> {
        self.yuno
    }

    pub fn yuno_role(&self) -> &str {
        &self.yuno_role
    }

    pub fn yuno_name(&self) -> &str {
        &self.yuno_name
    }

    pub fn yuno_tag(&self) -> &str {
        &self.yuno_tag
    }

    pub fn yuno_role_plus_name(&self) -> String {
        format!("{}^{}", self.yuno_role, self.yuno_name)
    }

    pub fn realm_id(&self) -> &str {
        &self.realm_id
    }

    pub fn realm_name(&self) -> &str {
        &self.realm_name
    }

    pub fn realm_owner(&self) -> &str {
        &self.realm_owner
    }

    pub fn realm_role(&self) -> &str {
        &self.realm_role
    }

    pub fn realm_env(&self) -> &str {
        &self.realm_env
    }

    pub fn node_owner(&self) -> &str {
        &self.node_owner
    }

    /// The built-in process variables, merged under the config
    /// substitutions (see config.rs).
    pub fn global_variables(&self) -> Kw {
        let mut vars = Kw::new();
        vars.insert(VAR_NODE_OWNER.into(), Value::String(self.node_owner.clone()));
        vars.insert(VAR_REALM_ID.into(), Value::String(self.realm_id.clone()));
        vars.insert(VAR_REALM_OWNER.into(), Value::String(self.realm_owner.clone()));
        vars.insert(VAR_REALM_ROLE.into(), Value::String(self.realm_role.clone()));
        vars.insert(VAR_REALM_NAME.into(), Value::String(self.realm_name.clone()));
        vars.insert(VAR_REALM_ENV.into(), Value::String(self.realm_env.clone()));
        vars.insert(VAR_YUNO_ROLE.into(), Value::String(self.yuno_role.clone()));
        vars.insert(VAR_YUNO_NAME.into(), Value::String(self.yuno_name.clone()));
        vars.insert(VAR_YUNO_TAG.into(), Value::String(self.yuno_tag.clone()));
        vars.insert(
            VAR_YUNO_ROLE_PLUS_NAME.into(),
            Value::String(self.yuno_role_plus_name()),
        );
        vars.insert(VAR_HOSTNAME.into(), Value::String(util::hostname()));
        vars
    }

    // ---- Service / unique lookup ----

    pub fn find_service(&self, service: &str) -> Option<GobjId> {
        self.services.get(service).copied()
    }

    pub fn default_service(&self) -> Option<GobjId> {
        self.default_service
    }

    pub fn find_unique_gobj(&self, unique_name: &str) -> Option<GobjId> {
        self.uniques.get(unique_name).copied()
    }

    /// First service whose gclass (or a base of it) has this name.
    pub fn find_gclass_service(&self, gclass_name: &str) -> Option<GobjId> {
        self.services
            .values()
            .copied()
            .find(|g| self.typeof_subgclass(*g, gclass_name))
    }

    /// Service names, registration order.
    pub fn services(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn unique_names(&self) -> Vec<String> {
        self.uniques.keys().cloned().collect()
    }

    /// Resolve a gobj by full path ("a`b`c"), by oid ("1.3.2"), or by
    /// unique/service name.
    pub fn find_gobj(&self, path: &str) -> Option<GobjId> {
        if path.is_empty() {
            return None;
        }
        if path.contains('`') {
            return self.find_gobj_by_path(path);
        }
        if path.chars().all(|c| c.is_ascii_digit() || c == '.') {
            if let Some(found) = self.find_gobj_by_oid(path) {
                return Some(found);
            }
        }
        self.find_unique_gobj(path)
            .or_else(|| self.find_service(path))
    }

    fn find_gobj_by_path(&self, path: &str) -> Option<GobjId> {
        let yuno = self.yuno?;
        let mut segs = path.split('`');
        let first = segs.next()?;
        let yuno_seg = self.node(yuno)?.segment_name().to_string();
        if first != yuno_seg {
            return None;
        }
        let mut cur = yuno;
        for seg in segs {
            cur = self.childs(cur).into_iter().find(|c| {
                self.node(*c)
                    .map(|n| n.segment_name() == seg)
                    .unwrap_or(false)
            })?;
        }
        Some(cur)
    }

    fn find_gobj_by_oid(&self, oid: &str) -> Option<GobjId> {
        let mut parts = oid.split('.');
        let first: usize = parts.next()?.parse().ok()?;
        if first != 1 {
            return None;
        }
        let mut cur = self.yuno?;
        for part in parts {
            let idx: usize = part.parse().ok()?;
            cur = self.child_by_index(cur, idx)?;
        }
        Some(cur)
    }

    // ---- Registry maintenance used by create/destroy ----

    pub(crate) fn register_unique(&mut self, name: &str, id: GobjId) -> GResult<()> {
        if let Some(old) = self.uniques.get(name) {
            error!("unique gobj '{}' ALREADY REGISTERED ({})", name, old);
            return Err(GobjError::Param(format!(
                "unique gobj '{}' already registered",
                name
            )));
        }
        self.uniques.insert(name.to_string(), id);
        Ok(())
    }

    pub(crate) fn register_service(&mut self, name: &str, id: GobjId) -> GResult<()> {
        if self.services.contains_key(name) {
            // Replace: old entry out first, then insert. No hook fires.
            warn!("service '{}' ALREADY REGISTERED. Will be UPDATED", name);
            self.services.shift_remove(name);
        }
        self.services.insert(name.to_string(), id);
        Ok(())
    }

    pub(crate) fn deregister_gobj_names(&mut self, id: GobjId) {
        self.uniques.retain(|_, g| *g != id);
        self.services.retain(|_, g| *g != id);
        if self.default_service == Some(id) {
            self.default_service = None;
        }
        if self.yuno == Some(id) {
            self.yuno = None;
        }
    }

    // ---- Process exit flags ----

    /// Sticky write-once-true.
    pub fn set_yuno_must_die(&mut self) {
        self.yuno_must_die = true;
    }

    pub fn get_yuno_must_die(&self) -> bool {
        self.yuno_must_die
    }

    /// Last value wins.
    pub fn set_exit_code(&mut self, exit_code: i32) {
        self.exit_code = exit_code;
    }

    pub fn get_exit_code(&self) -> i32 {
        self.exit_code
    }

    // ---- Arena plumbing ----

    pub(crate) fn alloc_node(&mut self, node: GobjNode) -> GobjId {
        if let Some(idx) = self.free_slots.pop() {
            let slot = &mut self.nodes[idx as usize];
            let gen = slot.gen;
            slot.node = Some(GobjNode { gen, ..node });
            GobjId { idx, gen }
        } else {
            let idx = self.nodes.len() as u32;
            let gen = 1;
            self.nodes.push(Slot {
                gen,
                node: Some(GobjNode { gen, ..node }),
            });
            GobjId { idx, gen }
        }
    }

    pub(crate) fn free_node(&mut self, id: GobjId) {
        if let Some(slot) = self.nodes.get_mut(id.idx as usize) {
            if slot.gen == id.gen && slot.node.is_some() {
                slot.node = None;
                slot.gen = slot.gen.wrapping_add(1);
                self.free_slots.push(id.idx);
            }
        }
    }

    /// Count of live gobjs (diagnostics).
    pub fn gobj_count(&self) -> usize {
        self.nodes.iter().filter(|s| s.node.is_some()).count()
    }
}

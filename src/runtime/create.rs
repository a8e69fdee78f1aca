//! create — the creation flavors, declarative trees, and destruction.

use std::cell::RefCell;

use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::attrs::AttrStore;
use crate::config::{expand_variables, settings_overrides};
use crate::error::{GResult, GobjError};
use crate::gclass::{check_fsm, GCF_IGNORE_UNKNOWN_ATTRS};
use crate::kw::{kw_or_empty, kw_update_override, Kw};
use crate::metrics;
use crate::persist::AttrSelector;
use crate::runtime::node::{
    check_gobj_name, GobjNode, GF_AUTOPLAY, GF_AUTOSTART, GF_CREATED, GF_DEFAULT_SERVICE,
    GF_DESTROYING, GF_SERVICE, GF_UNIQUE, GF_VOLATIL, GF_YUNO,
};
use crate::runtime::{GobjId, MonitorKind, Runtime};
use crate::trace::TRACE_CREATE_DELETE;

/// Declarative node of create_tree().
#[derive(Debug, Clone, Deserialize)]
pub struct TreeSpec {
    pub gclass: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kw: Value,
    #[serde(default)]
    pub as_service: bool,
    #[serde(default)]
    pub as_unique: bool,
    #[serde(default)]
    pub default_service: bool,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub zchilds: Vec<TreeSpec>,
}

impl Runtime {
    // ---- The five creation flavors ----

    pub fn create(&mut self, name: &str, gclass: &str, kw: Kw, parent: GobjId) -> GResult<GobjId> {
        self.create_with_flags(name, gclass, kw, Some(parent), 0)
    }

    pub fn create_unique(
        &mut self,
        name: &str,
        gclass: &str,
        kw: Kw,
        parent: GobjId,
    ) -> GResult<GobjId> {
        self.create_with_flags(name, gclass, kw, Some(parent), GF_UNIQUE)
    }

    pub fn create_volatil(
        &mut self,
        name: &str,
        gclass: &str,
        kw: Kw,
        parent: GobjId,
    ) -> GResult<GobjId> {
        self.create_with_flags(name, gclass, kw, Some(parent), GF_VOLATIL)
    }

    pub fn create_service(
        &mut self,
        name: &str,
        gclass: &str,
        kw: Kw,
        parent: GobjId,
    ) -> GResult<GobjId> {
        self.create_with_flags(name, gclass, kw, Some(parent), GF_SERVICE)
    }

    pub fn create_default_service(
        &mut self,
        name: &str,
        gclass: &str,
        kw: Kw,
        parent: GobjId,
    ) -> GResult<GobjId> {
        self.create_with_flags(name, gclass, kw, Some(parent), GF_SERVICE | GF_DEFAULT_SERVICE)
    }

    pub(crate) fn create_with_flags(
        &mut self,
        name: &str,
        gclass_name: &str,
        kw_config: Kw,
        parent: Option<GobjId>,
        flags: u32,
    ) -> GResult<GobjId> {
        if self.shutdowning {
            return Err(GobjError::State("shutdowning, no more creations".to_string()));
        }

        // 1. Names and class gates
        check_gobj_name(name)?;
        let gclass = self
            .find_gclass(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        if Some(gclass_name) == self.yuno_class.as_deref() && flags & GF_YUNO == 0 {
            return Err(GobjError::Param(
                "the yuno class may only be created via yuno_factory()".to_string(),
            ));
        }
        match parent {
            Some(p) => {
                let pn = self.node_ok(p)?;
                if pn.has_flag(GF_DESTROYING) {
                    return Err(GobjError::State(format!(
                        "{}: parent is destroying",
                        pn.short_name()
                    )));
                }
                if self.yuno.is_none() {
                    return Err(GobjError::Param("no yuno created yet".to_string()));
                }
            }
            None => {
                if flags & GF_YUNO == 0 {
                    return Err(GobjError::Param(
                        "only the yuno can be created without parent".to_string(),
                    ));
                }
            }
        }

        // 3. Lazy FSM validation, exactly once per class. Fatal: these are
        // programmer bugs.
        {
            let entry = self.classes.get_mut(gclass_name).unwrap();
            if !entry.fsm_checked {
                if let Err(e) = check_fsm(&entry.gclass) {
                    panic!("FSM validation failed: {}", e);
                }
                entry.fsm_checked = true;
            }
        }

        // 2/4/5. Allocate the instance, FSM at state 0, attrs at defaults.
        let node = GobjNode {
            gen: 0,
            name: name.to_string(),
            gclass: gclass.clone(),
            parent,
            childs: Vec::new(),
            bottom: None,
            flags,
            running: false,
            playing: false,
            disabled: false,
            current_state: 0,
            last_state: 0,
            attrs: AttrStore::new(gclass.attrs.clone()),
            user_data: Kw::new(),
            stats: Kw::new(),
            subscriptions: Vec::new(),
            subscribings: Vec::new(),
            trace_level: 0,
            no_trace_level: 0,
            priv_data: None,
            full_name_cache: RefCell::new(None),
            oid_cache: RefCell::new(None),
        };
        let id = self.alloc_node(node);

        // 6. Registries dictated by the flags.
        fn rollback(rt: &mut Runtime, id: GobjId, err: GobjError) -> GResult<GobjId> {
            rt.deregister_gobj_names(id);
            rt.free_node(id);
            Err(err)
        }
        if flags & GF_UNIQUE != 0 {
            if let Err(e) = self.register_unique(name, id) {
                return rollback(self, id, e);
            }
        }
        if flags & (GF_SERVICE | GF_DEFAULT_SERVICE) != 0 {
            if let Err(e) = self.register_service(name, id) {
                return rollback(self, id, e);
            }
        }
        if flags & GF_DEFAULT_SERVICE != 0 {
            if self.default_service.is_some() {
                return rollback(
                    self,
                    id,
                    GobjError::Param("default service already set".to_string()),
                );
            }
            self.default_service = Some(id);
        }
        self.classes.get_mut(gclass_name).unwrap().instances += 1;

        // 7. Configuration: kw merged with scoped global settings, variable
        // expansion, then written into the attr store.
        let kw_saved = kw_config.clone();
        self.apply_config(id, kw_config);

        // 8. Unique gobjs load their persistent attrs right away.
        if flags & GF_UNIQUE != 0 && self.persist.is_some() {
            if let Err(e) = self.load_persistent_attrs(id, &AttrSelector::All) {
                error!("{}: load_persistent_attrs: {}", self.short_name(id), e);
            }
        }

        // 9. Attach to the parent's children list.
        if let Some(p) = parent {
            if let Some(pn) = self.node_mut(p) {
                pn.childs.push(id);
            }
        }

        // 10. Class creation hook, then the created flag.
        if let Some(cb) = gclass.gmt.mt_create.clone() {
            cb(self, id, &kw_saved);
        }
        if let Some(n) = self.node_mut(id) {
            n.flags |= GF_CREATED;
        }

        // 11. Notify the parent, and the yuno observer if any.
        if let Some(p) = parent {
            if let Some(cb) = self.gclass(p).and_then(|c| c.gmt.mt_child_added.clone()) {
                cb(self, p, id);
            }
        }
        if let Some(y) = self.yuno {
            if y != id {
                if let Some(cb) = self.gclass(y).and_then(|c| c.gmt.mt_gobj_created.clone()) {
                    cb(self, y, id);
                }
            }
        }

        metrics::record_gobj_created();
        self.monitor_gobj(MonitorKind::Create, id);
        if self.trace_level_of(id) & TRACE_CREATE_DELETE != 0 {
            debug!("💙💙⏩ create: {}", self.full_name(id));
        }
        Ok(id)
    }

    /// Merge the creation kw with the scoped global settings, expand
    /// `{{var}}` references and write the result into the attr store.
    /// Unknown keys log an error unless the class opts out.
    fn apply_config(&mut self, id: GobjId, kw_config: Kw) {
        let (gclass, name) = match self.node(id) {
            Some(n) => (n.gclass.clone(), n.name.clone()),
            None => return,
        };

        let mut merged = kw_config;
        let overrides = settings_overrides(&self.global_settings, &gclass.name, &name);
        kw_update_override(&mut merged, &overrides);

        // Substitutions: user table first, built-ins win the reserved names.
        let mut vars = self
            .global_settings
            .get(crate::consts::JSON_CONFIG_VARIABLES)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        kw_update_override(&mut vars, &self.global_variables());
        let mut merged_v = Value::Object(merged);
        expand_variables(&mut merged_v, &vars);
        let merged = kw_or_empty(Some(merged_v));

        for (key, value) in merged {
            if key.starts_with("__") {
                continue;
            }
            if gclass.has_attr(&key) {
                let node = self.node_mut(id).unwrap();
                if let Err(e) = node.attrs.write(&key, value) {
                    error!("{}^{}: config: {}", gclass.name, name, e);
                }
            } else if key == "subscriber" {
                // kept aside for the tree builder / class hooks
                let node = self.node_mut(id).unwrap();
                node.user_data.insert(key, value);
            } else if gclass.gcflag & GCF_IGNORE_UNKNOWN_ATTRS != 0 {
                debug!("{}^{}: config ignores unknown attr '{}'", gclass.name, name, key);
            } else {
                error!("{}^{}: config with unknown attr '{}'", gclass.name, name, key);
            }
        }
    }

    // ---- Declarative tree ----

    /// Build a subtree from a declarative spec. `ev_on_setup` is sent to
    /// each node's parent as every child appears (if the parent declares
    /// it); `ev_on_setup_complete` after the children of a node are done.
    pub fn create_tree(
        &mut self,
        parent: GobjId,
        spec: Value,
        ev_on_setup: &str,
        ev_on_setup_complete: &str,
    ) -> GResult<GobjId> {
        let spec: TreeSpec = serde_json::from_value(spec)
            .map_err(|e| GobjError::Param(format!("bad tree spec: {}", e)))?;
        self.create_tree_node(parent, &spec, ev_on_setup, ev_on_setup_complete)
    }

    fn create_tree_node(
        &mut self,
        parent: GobjId,
        spec: &TreeSpec,
        ev_on_setup: &str,
        ev_on_setup_complete: &str,
    ) -> GResult<GobjId> {
        let gclass = self
            .find_gclass(&spec.gclass)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", spec.gclass)))?;

        // Coerce the subscriber key: names resolve to handles here; integer
        // back-references pass through; absent defaults to the parent when
        // the class wants one and the parent is not the yuno.
        let mut kwc = kw_or_empty(Some(spec.kw.clone()));
        match kwc.get("subscriber").cloned() {
            Some(Value::String(s)) => match self.find_gobj(&s) {
                Some(g) => {
                    kwc.insert("subscriber".to_string(), json!(g.as_u64()));
                }
                None => {
                    warn!("tree spec: subscriber '{}' not found", s);
                    kwc.remove("subscriber");
                }
            },
            Some(Value::Number(_)) => {}
            None => {
                if gclass.has_attr("subscriber") && self.yuno != Some(parent) {
                    kwc.insert("subscriber".to_string(), json!(parent.as_u64()));
                }
            }
            Some(_) => {
                warn!("tree spec: subscriber key with wrong type");
                kwc.remove("subscriber");
            }
        }

        let mut flags = 0u32;
        if spec.as_unique {
            flags |= GF_UNIQUE;
        }
        if spec.as_service {
            flags |= GF_SERVICE;
        }
        if spec.default_service {
            flags |= GF_SERVICE | GF_DEFAULT_SERVICE;
        }
        if spec.autostart {
            flags |= GF_AUTOSTART;
        }
        if spec.autoplay {
            flags |= GF_AUTOPLAY;
        }

        let id = self.create_with_flags(&spec.name, &spec.gclass, kwc, Some(parent), flags)?;
        if spec.disabled {
            let _ = self.disable(id);
        }

        if !ev_on_setup.is_empty() {
            if let Some(pc) = self.gclass(parent) {
                if pc.has_input_event(ev_on_setup, 0) {
                    self.send_event(parent, ev_on_setup, Kw::new(), Some(id));
                }
            }
        }

        let mut first_child = None;
        for child_spec in &spec.zchilds {
            let c = self.create_tree_node(id, child_spec, ev_on_setup, ev_on_setup_complete)?;
            if first_child.is_none() {
                first_child = Some(c);
            }
        }
        // A single child becomes the node's bottom.
        if spec.zchilds.len() == 1 {
            self.set_bottom_gobj(id, first_child);
        }

        if !ev_on_setup_complete.is_empty() {
            if let Some(pc) = self.gclass(parent) {
                if pc.has_input_event(ev_on_setup_complete, 0) {
                    self.send_event(
                        parent,
                        ev_on_setup_complete,
                        Kw::new(),
                        first_child.or(Some(id)),
                    );
                }
            }
        }

        Ok(id)
    }

    /// Run a service from its declarative config, under the yuno.
    pub fn service_factory(&mut self, name: &str, config: Value) -> GResult<GobjId> {
        let yuno = self
            .yuno
            .ok_or_else(|| GobjError::Param("no yuno created yet".to_string()))?;
        let mut spec: TreeSpec = serde_json::from_value(config)
            .map_err(|e| GobjError::Param(format!("bad service config: {}", e)))?;
        spec.as_service = true;
        if !name.is_empty() {
            spec.name = name.to_string();
        }
        self.create_tree_node(yuno, &spec, "", "")
    }

    // ---- Destruction ----

    /// Destroy a gobj and all its children, bottom-up. Idempotent:
    /// double destroy and stale handles are silently absorbed.
    pub fn destroy(&mut self, id: GobjId) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.has_flag(GF_DESTROYING) {
            return;
        }
        let gclass = node.gclass.clone();
        let parent = node.parent;

        if self.trace_level_of(id) & TRACE_CREATE_DELETE != 0 {
            debug!("💔💔⏩ destroy: {}", self.full_name(id));
        }
        self.node_mut(id).unwrap().flags |= GF_DESTROYING;
        self.monitor_gobj(MonitorKind::Destroy, id);

        if self.is_playing(id) {
            warn!("{}: destroying a PLAYING gobj", self.short_name(id));
            let _ = self.pause(id);
        }
        if self.is_running(id) {
            warn!("{}: destroying a RUNNING gobj", self.short_name(id));
            let _ = self.stop(id);
        }

        // Hard subscriptions go too: destruction forces.
        self.unsubscribe_all_of(id);

        // Children before the destroy hook.
        for child in self.childs(id) {
            self.destroy(child);
        }

        if let Some(p) = parent {
            if let Some(pn) = self.node_mut(p) {
                pn.childs.retain(|c| *c != id);
            }
            if let Some(cb) = self.gclass(p).and_then(|c| c.gmt.mt_child_removed.clone()) {
                cb(self, p, id);
            }
        }

        self.deregister_gobj_names(id);

        if let Some(cb) = gclass.gmt.mt_destroy.clone() {
            cb(self, id);
        }

        if let Some(entry) = self.classes.get_mut(&gclass.name) {
            entry.instances = entry.instances.saturating_sub(1);
        }
        metrics::record_gobj_destroyed();
        self.free_node(id);
    }

    /// Destroy all children, keeping the gobj.
    pub fn destroy_childs(&mut self, id: GobjId) {
        for child in self.childs(id) {
            self.destroy(child);
        }
    }

    /// Destroy the children carrying this name.
    pub fn destroy_named_childs(&mut self, id: GobjId, name: &str) {
        for child in self.childs(id) {
            if self.name(child) == name {
                self.destroy(child);
            }
        }
    }
}

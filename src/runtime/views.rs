//! views — JSON introspection of classes, gobjs and registries, used by
//! command layers and tests.

use serde_json::{json, Value};

use crate::kw::Kw;
use crate::runtime::{GobjId, Runtime};
use crate::schema::{sdf_flag_names, SDF_PUBLIC};

impl Runtime {
    /// Description of a gclass: fsm shape, attrs, commands, flags.
    pub fn gclass2json(&self, gclass_name: &str) -> Option<Value> {
        let entry = self.classes.get(gclass_name)?;
        let gc = &entry.gclass;
        let attrs: Vec<Value> = gc
            .attrs
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "type": d.ty.name(),
                    "flag": sdf_flag_names(d.flag),
                    "default": d.default,
                    "description": d.description,
                })
            })
            .collect();
        let commands: Vec<Value> = gc
            .commands
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| json!({"name": c.name, "alias": c.alias, "description": c.description}))
            .collect();
        Some(json!({
            "gclass": gc.name,
            "base": gc.base.as_ref().map(|b| b.name.clone()),
            "instances": entry.instances,
            "states": gc.fsm.state_names,
            "input_events": gc.fsm.input_events.iter().map(|e| e.event.clone()).collect::<Vec<_>>(),
            "output_events": gc.fsm.output_events.iter().map(|e| e.event.clone()).collect::<Vec<_>>(),
            "attrs": attrs,
            "commands": commands,
            "user_trace_levels": gc.trace_levels.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
        }))
    }

    /// Description of a live gobj.
    pub fn gobj2json(&self, id: GobjId) -> Option<Value> {
        let node = self.node(id)?;
        Some(json!({
            "gobj": node.short_name(),
            "full_name": self.full_name(id),
            "oid": self.oid(id),
            "gclass": node.gclass.name,
            "parent": node.parent.map(|p| self.short_name(p)),
            "childs": node.childs.len(),
            "state": self.current_state(id),
            "running": node.running,
            "playing": node.playing,
            "disabled": node.disabled,
            "service": self.is_service(id),
            "unique": self.is_unique(id),
            "volatil": self.is_volatil(id),
            "bottom": node.bottom.map(|b| self.short_name(b)),
            "subscriptions": node.subscriptions.len(),
            "subscribings": node.subscribings.len(),
        }))
    }

    /// The public attrs of a gobj.
    pub fn attrs2json(&self, id: GobjId) -> Kw {
        self.attrs_snapshot(id, SDF_PUBLIC)
    }

    /// Recursive dict view of a subtree.
    pub fn view_gobj_tree(&self, id: GobjId) -> Value {
        let Some(mut view) = self.gobj2json(id) else {
            return Value::Null;
        };
        let childs: Vec<Value> = self
            .childs(id)
            .into_iter()
            .map(|c| self.view_gobj_tree(c))
            .collect();
        if let Some(map) = view.as_object_mut() {
            map.insert("zchilds".to_string(), Value::Array(childs));
        }
        view
    }

    /// `[{gclass, instances}]`, registration order.
    pub fn repr_gclass_register(&self) -> Value {
        Value::Array(
            self.classes
                .iter()
                .map(|(name, e)| json!({"gclass": name, "instances": e.instances}))
                .collect(),
        )
    }

    /// `[{gclass, service}]`, optionally filtered by gclass name.
    pub fn repr_service_register(&self, gclass_name: &str) -> Value {
        Value::Array(
            self.services
                .iter()
                .filter(|(_, g)| {
                    gclass_name.is_empty() || self.gclass_name(**g) == gclass_name
                })
                .map(|(name, g)| json!({"gclass": self.gclass_name(*g), "service": name}))
                .collect(),
        )
    }

    /// The unique gobj names.
    pub fn repr_unique_register(&self) -> Value {
        Value::Array(
            self.uniques
                .keys()
                .map(|n| Value::String(n.clone()))
                .collect(),
        )
    }

    /// Stamp the yuno metadata block (`__md_yuno__`) into a kw.
    pub fn append_yuno_metadata(&self, id: GobjId, kw: &mut Kw, source: &str) {
        let md = json!({
            "__t__": crate::util::now_secs(),
            "__origin__": source,
            "hostname": crate::util::hostname(),
            "realm_name": self.realm_name,
            "yuno_role": self.yuno_role,
            "yuno_name": self.yuno_name,
            "gobj_name": self.name(id),
            "pid": std::process::id(),
        });
        kw.insert("__md_yuno__".to_string(), md);
    }
}

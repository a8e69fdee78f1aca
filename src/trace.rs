//! trace — trace-level control.
//!
//! A gobj's effective trace mask is the OR of three masks (global,
//! gclass, gobj) minus the no-trace masks. The low 16 bits are per-class
//! user levels (named in the gclass), the high 16 bits are the global
//! levels named below. deep_trace=1 turns everything on except the
//! no-trace masks; deep_trace>=2 and panic_trace are unconditional.

use log::error;
use serde_json::Value;

use crate::error::{GResult, GobjError};
use crate::kw::Kw;
use crate::runtime::{GobjId, Runtime};

pub const TRACE_MACHINE: u32 = 0x0001_0000;
pub const TRACE_CREATE_DELETE: u32 = 0x0002_0000;
pub const TRACE_CREATE_DELETE2: u32 = 0x0004_0000;
pub const TRACE_SUBSCRIPTIONS: u32 = 0x0008_0000;
pub const TRACE_START_STOP: u32 = 0x0010_0000;
pub const TRACE_MONITOR: u32 = 0x0020_0000;
pub const TRACE_EVENT_MONITOR: u32 = 0x0040_0000;
pub const TRACE_EV_KW: u32 = 0x0100_0000;
pub const TRACE_AUTHZS: u32 = 0x0200_0000;
pub const TRACE_SUBSCRIPTIONS2: u32 = 0x0400_0000;
pub const TRACE_STATES: u32 = 0x0800_0000;

pub const TRACE_USER_LEVEL: u32 = 0x0000_FFFF;
pub const TRACE_GLOBAL_LEVEL: u32 = 0xFFFF_0000;

pub const GLOBAL_TRACE_NAMES: &[(&str, u32)] = &[
    ("machine", TRACE_MACHINE),
    ("create_delete", TRACE_CREATE_DELETE),
    ("create_delete2", TRACE_CREATE_DELETE2),
    ("subscriptions", TRACE_SUBSCRIPTIONS),
    ("subscriptions2", TRACE_SUBSCRIPTIONS2),
    ("start_stop", TRACE_START_STOP),
    ("monitor", TRACE_MONITOR),
    ("event_monitor", TRACE_EVENT_MONITOR),
    ("ev_kw", TRACE_EV_KW),
    ("authzs", TRACE_AUTHZS),
    ("states", TRACE_STATES),
];

pub fn global_trace_bit(level: &str) -> Option<u32> {
    GLOBAL_TRACE_NAMES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(level))
        .map(|(_, b)| *b)
}

fn mask_names(mask: u32) -> Vec<String> {
    GLOBAL_TRACE_NAMES
        .iter()
        .filter(|(_, b)| mask & b != 0)
        .map(|(n, _)| n.to_string())
        .collect()
}

impl Runtime {
    // ---- Setters ----

    /// Set/reset a global trace level. Empty level means all of them.
    pub fn set_global_trace(&mut self, level: &str, set: bool) -> GResult<()> {
        let bits = if level.is_empty() {
            TRACE_GLOBAL_LEVEL
        } else {
            global_trace_bit(level)
                .ok_or_else(|| GobjError::NotFound(format!("global trace level '{}'", level)))?
        };
        if set {
            self.global_trace |= bits;
        } else {
            self.global_trace &= !bits;
        }
        Ok(())
    }

    /// Set/reset a trace level on a gclass (all its instances). The level
    /// is a user level of the class or a global name; empty means all.
    pub fn set_gclass_trace(&mut self, gclass_name: &str, level: &str, set: bool) -> GResult<()> {
        let bits = self.resolve_class_level(gclass_name, level)?;
        let entry = self
            .classes
            .get_mut(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        if set {
            entry.trace_level |= bits;
        } else {
            entry.trace_level &= !bits;
        }
        Ok(())
    }

    pub fn set_gclass_no_trace(&mut self, gclass_name: &str, level: &str, set: bool) -> GResult<()> {
        let bits = self.resolve_class_level(gclass_name, level)?;
        let entry = self
            .classes
            .get_mut(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        if set {
            entry.no_trace_level |= bits;
        } else {
            entry.no_trace_level &= !bits;
        }
        Ok(())
    }

    /// Set/reset a trace level on one gobj; mt_trace_on/mt_trace_off run
    /// if declared.
    pub fn set_gobj_trace(&mut self, id: GobjId, level: &str, set: bool, kw: Kw) -> GResult<()> {
        let gclass = self
            .gclass(id)
            .ok_or_else(|| GobjError::Param("gobj NULL or DESTROYED".to_string()))?;
        let bits = resolve_level_of(&gclass, level)?;
        {
            let node = self.node_ok_mut(id)?;
            if set {
                node.trace_level |= bits;
            } else {
                node.trace_level &= !bits;
            }
        }
        let hook = if set {
            gclass.gmt.mt_trace_on.clone()
        } else {
            gclass.gmt.mt_trace_off.clone()
        };
        if let Some(cb) = hook {
            cb(self, id, level, &kw);
        }
        Ok(())
    }

    pub fn set_gobj_no_trace(&mut self, id: GobjId, level: &str, set: bool) -> GResult<()> {
        let gclass = self
            .gclass(id)
            .ok_or_else(|| GobjError::Param("gobj NULL or DESTROYED".to_string()))?;
        let bits = resolve_level_of(&gclass, level)?;
        let node = self.node_ok_mut(id)?;
        if set {
            node.no_trace_level |= bits;
        } else {
            node.no_trace_level &= !bits;
        }
        Ok(())
    }

    /// deep_trace: 0 off; 1 everything except the no-trace masks; >=2
    /// everything unconditionally.
    pub fn set_deep_trace(&mut self, level: i32) {
        self.deep_trace = level;
    }

    pub fn get_deep_trace(&self) -> i32 {
        self.deep_trace
    }

    /// Every bit on, no-trace masks ignored.
    pub fn set_panic_trace(&mut self, on: bool) {
        self.panic_trace = on;
    }

    // ---- Query ----

    /// Effective trace mask of a gobj: join of global, gclass and gobj
    /// masks, minus no-trace. See the module doc for deep/panic.
    pub fn trace_level(&self, id: GobjId) -> u32 {
        self.trace_level_of(id)
    }

    pub fn no_trace_level(&self, id: GobjId) -> u32 {
        let Some(node) = self.node(id) else {
            return 0;
        };
        let class_no = self
            .classes
            .get(&node.gclass.name)
            .map(|e| e.no_trace_level)
            .unwrap_or(0);
        class_no | node.no_trace_level
    }

    pub(crate) fn trace_level_of(&self, id: GobjId) -> u32 {
        if self.panic_trace || self.deep_trace >= 2 {
            return u32::MAX;
        }
        let Some(node) = self.node(id) else {
            return self.global_trace;
        };
        let entry = self.classes.get(&node.gclass.name);
        let no = entry.map(|e| e.no_trace_level).unwrap_or(0) | node.no_trace_level;
        if self.deep_trace == 1 {
            return u32::MAX & !no;
        }
        let mut class_bits = entry.map(|e| e.trace_level).unwrap_or(0);
        if class_bits != 0 {
            if let Some(e) = entry {
                if !e.trace_filter.is_empty() && !self.trace_filter_matches(id, &e.trace_filter) {
                    class_bits = 0;
                }
            }
        }
        (self.global_trace | class_bits | node.trace_level) & !no
    }

    fn trace_filter_matches(&self, id: GobjId, filter: &Kw) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        for (attr, values) in filter {
            let Some(current) = node.attrs.read(attr) else {
                return false;
            };
            let current_s = match current {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let hit = values
                .as_array()
                .map(|vs| vs.iter().any(|v| v.as_str() == Some(current_s.as_str())))
                .unwrap_or(false);
            if !hit {
                return false;
            }
        }
        true
    }

    // ---- Trace filters (per-gclass, by attribute value) ----

    /// Replace the whole trace filter of a gclass.
    pub fn load_trace_filter(&mut self, gclass_name: &str, filter: Kw) -> GResult<()> {
        let entry = self
            .classes
            .get_mut(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        entry.trace_filter = filter;
        Ok(())
    }

    pub fn add_trace_filter(&mut self, gclass_name: &str, attr: &str, value: &str) -> GResult<()> {
        let has_attr = self
            .find_gclass(gclass_name)
            .map(|c| c.has_attr(attr))
            .unwrap_or(false);
        if !has_attr {
            error!("add_trace_filter: gclass '{}' has no attr '{}'", gclass_name, attr);
            return Err(GobjError::NotFound(format!("attr '{}'", attr)));
        }
        let entry = self
            .classes
            .get_mut(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        let list = entry
            .trace_filter
            .entry(attr.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = list {
            if !items.iter().any(|v| v.as_str() == Some(value)) {
                items.push(Value::String(value.to_string()));
            }
        }
        Ok(())
    }

    /// Empty attr removes every filter; empty value removes the attr.
    pub fn remove_trace_filter(&mut self, gclass_name: &str, attr: &str, value: &str) -> GResult<()> {
        let entry = self
            .classes
            .get_mut(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        if attr.is_empty() {
            entry.trace_filter.clear();
            return Ok(());
        }
        if value.is_empty() {
            entry.trace_filter.remove(attr);
            return Ok(());
        }
        if let Some(Value::Array(items)) = entry.trace_filter.get_mut(attr) {
            items.retain(|v| v.as_str() != Some(value));
            if items.is_empty() {
                entry.trace_filter.remove(attr);
            }
        }
        Ok(())
    }

    pub fn get_trace_filter(&self, gclass_name: &str) -> Option<Kw> {
        self.classes.get(gclass_name).map(|e| e.trace_filter.clone())
    }

    // ---- Representation ----

    /// Global trace level names currently set.
    pub fn get_global_trace_level(&self) -> Vec<String> {
        mask_names(self.global_trace)
    }

    pub fn get_gclass_trace_level(&self, gclass_name: &str) -> Vec<String> {
        let Some(entry) = self.classes.get(gclass_name) else {
            return Vec::new();
        };
        let mut names = mask_names(entry.trace_level);
        for (i, (name, _)) in entry.gclass.trace_levels.iter().enumerate() {
            if entry.trace_level & (1u32 << i) != 0 {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn get_gobj_trace_level(&self, id: GobjId) -> Vec<String> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut names = mask_names(node.trace_level);
        for (i, (name, _)) in node.gclass.trace_levels.iter().enumerate() {
            if node.trace_level & (1u32 << i) != 0 {
                names.push(name.clone());
            }
        }
        names
    }

    /// All the trace level names a gclass understands (user + global).
    pub fn trace_level_list(&self, gclass_name: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(gc) = self.find_gclass(gclass_name) {
            for (name, _) in gc.trace_levels.iter() {
                out.push(name.clone());
            }
        }
        for (name, _) in GLOBAL_TRACE_NAMES {
            out.push(name.to_string());
        }
        out
    }

    fn resolve_class_level(&self, gclass_name: &str, level: &str) -> GResult<u32> {
        let gclass = self
            .find_gclass(gclass_name)
            .ok_or_else(|| GobjError::NotFound(format!("gclass '{}'", gclass_name)))?;
        resolve_level_of(&gclass, level)
    }
}

fn resolve_level_of(gclass: &crate::gclass::GClass, level: &str) -> GResult<u32> {
    if level.is_empty() {
        return Ok(u32::MAX);
    }
    if let Some(bit) = gclass.user_trace_bit(level) {
        return Ok(bit);
    }
    if let Some(bit) = global_trace_bit(level) {
        return Ok(bit);
    }
    error!("trace level '{}' NOT FOUND in gclass '{}'", level, gclass.name);
    Err(GobjError::NotFound(format!("trace level '{}'", level)))
}

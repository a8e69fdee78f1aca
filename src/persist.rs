//! persist — the pluggable persistent-attribute store.
//!
//! The kernel never touches disk itself: a single store registered at
//! startup receives load/save/remove/list calls, and only for gobjs with
//! a unique name. load_all runs automatically right after a unique gobj
//! is created; save must be invoked explicitly.

use serde_json::Value;

use crate::error::{GResult, GobjError};
use crate::runtime::{GobjId, Runtime};

/// The selector shapes of the original contract: absent (all persistent
/// attrs), one name, a list of names, or a dict naming keys.
#[derive(Debug, Clone)]
pub enum AttrSelector {
    All,
    One(String),
    Many(Vec<String>),
    Keys(Vec<String>),
}

impl AttrSelector {
    pub fn from_value(v: Option<&Value>) -> AttrSelector {
        match v {
            None | Some(Value::Null) => AttrSelector::All,
            Some(Value::String(s)) => {
                if s.is_empty() {
                    AttrSelector::All
                } else {
                    AttrSelector::One(s.clone())
                }
            }
            Some(Value::Array(items)) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|i| i.as_str().map(|s| s.to_string()))
                    .collect();
                if names.is_empty() {
                    AttrSelector::All
                } else {
                    AttrSelector::Many(names)
                }
            }
            Some(Value::Object(map)) => {
                if map.is_empty() {
                    AttrSelector::All
                } else {
                    AttrSelector::Keys(map.keys().cloned().collect())
                }
            }
            Some(_) => AttrSelector::All,
        }
    }

    /// Does the selector cover this attr name?
    pub fn selects(&self, name: &str) -> bool {
        match self {
            AttrSelector::All => true,
            AttrSelector::One(n) => n == name,
            AttrSelector::Many(ns) | AttrSelector::Keys(ns) => ns.iter().any(|n| n == name),
        }
    }
}

/// One registration per process; installed with
/// Runtime::set_persistent_attrs(). Calls receive the runtime so they can
/// read/write the gobj's attrs through the normal surface.
pub trait PersistentAttrs {
    /// Brackets the process lifetime.
    fn startup(&mut self) {}
    fn teardown(&mut self) {}

    fn load_all(&mut self, rt: &mut Runtime, gobj: GobjId, selector: &AttrSelector) -> GResult<()>;
    fn save(&mut self, rt: &mut Runtime, gobj: GobjId, selector: &AttrSelector) -> GResult<()>;
    fn remove(&mut self, rt: &mut Runtime, gobj: GobjId, selector: &AttrSelector) -> GResult<()>;
    fn list(&mut self, rt: &mut Runtime, gobj: GobjId, selector: &AttrSelector) -> GResult<Value>;
}

impl Runtime {
    fn check_persist_target(&self, gobj: GobjId) -> GResult<()> {
        if !self.exists(gobj) {
            return Err(GobjError::Param("gobj NULL or DESTROYED".to_string()));
        }
        if !self.is_unique(gobj) {
            return Err(GobjError::Param(format!(
                "{}: only unique gobjs have persistent attrs",
                self.short_name(gobj)
            )));
        }
        Ok(())
    }

    pub fn load_persistent_attrs(&mut self, gobj: GobjId, selector: &AttrSelector) -> GResult<()> {
        self.check_persist_target(gobj)?;
        let mut store = self
            .persist
            .take()
            .ok_or_else(|| GobjError::Persist("no persistent store registered".to_string()))?;
        let r = store.load_all(self, gobj, selector);
        self.persist = Some(store);
        r
    }

    pub fn save_persistent_attrs(&mut self, gobj: GobjId, selector: &AttrSelector) -> GResult<()> {
        self.check_persist_target(gobj)?;
        let mut store = self
            .persist
            .take()
            .ok_or_else(|| GobjError::Persist("no persistent store registered".to_string()))?;
        let r = store.save(self, gobj, selector);
        self.persist = Some(store);
        r
    }

    pub fn remove_persistent_attrs(&mut self, gobj: GobjId, selector: &AttrSelector) -> GResult<()> {
        self.check_persist_target(gobj)?;
        let mut store = self
            .persist
            .take()
            .ok_or_else(|| GobjError::Persist("no persistent store registered".to_string()))?;
        let r = store.remove(self, gobj, selector);
        self.persist = Some(store);
        r
    }

    pub fn list_persistent_attrs(&mut self, gobj: GobjId, selector: &AttrSelector) -> GResult<Value> {
        self.check_persist_target(gobj)?;
        let mut store = self
            .persist
            .take()
            .ok_or_else(|| GobjError::Persist("no persistent store registered".to_string()))?;
        let r = store.list(self, gobj, selector);
        self.persist = Some(store);
        r
    }
}

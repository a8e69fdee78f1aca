//! node — the gobj arena: generational ids, the node record, naming and
//! the info/tree query surface.
//!
//! Ids are (index, generation) pairs; a destroyed slot bumps its
//! generation, so stale handles dereference to None instead of to a
//! recycled object. An id crosses kw payloads as one u64 (the "pointer"
//! semantic type).

use std::cell::RefCell;
use std::sync::Arc;

use log::error;
use serde_json::Value;

use crate::attrs::AttrStore;
use crate::error::{GResult, GobjError};
use crate::gclass::GClass;
use crate::kw::{kw_delete, kw_get, kw_set, Kw};
use crate::runtime::Runtime;
use crate::subs::SubsId;

// ---- Gobj flags ----

pub const GF_CREATED: u32 = 0x0001;
pub const GF_DESTROYING: u32 = 0x0002;
pub const GF_UNIQUE: u32 = 0x0008;
pub const GF_AUTOPLAY: u32 = 0x0010;
pub const GF_AUTOSTART: u32 = 0x0020;
pub const GF_IMMINENT_DESTROY: u32 = 0x0040;
pub const GF_YUNO: u32 = 0x0080;
pub const GF_DEFAULT_SERVICE: u32 = 0x0100;
pub const GF_SERVICE: u32 = 0x0200;
pub const GF_VOLATIL: u32 = 0x0400;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct GobjId {
    pub(crate) idx: u32,
    pub(crate) gen: u32,
}

impl GobjId {
    /// Opaque integer form, for crossing kw payloads.
    pub fn as_u64(self) -> u64 {
        ((self.gen as u64) << 32) | self.idx as u64
    }

    pub fn from_u64(raw: u64) -> GobjId {
        GobjId {
            idx: (raw & 0xFFFF_FFFF) as u32,
            gen: (raw >> 32) as u32,
        }
    }
}

impl std::fmt::Display for GobjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gobj#{}.{}", self.idx, self.gen)
    }
}

/// Tree walk orders.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WalkOrder {
    /// Parents before children.
    TopToBottom,
    /// Children before parents.
    BottomToTop,
}

pub(crate) struct GobjNode {
    pub gen: u32,
    pub name: String,
    pub gclass: Arc<GClass>,
    pub parent: Option<GobjId>,
    pub childs: Vec<GobjId>,
    pub bottom: Option<GobjId>,
    pub flags: u32,
    pub running: bool,
    pub playing: bool,
    pub disabled: bool,
    pub current_state: usize,
    pub last_state: usize,
    pub attrs: AttrStore,
    pub user_data: Kw,
    pub stats: Kw,
    pub subscriptions: Vec<SubsId>,
    pub subscribings: Vec<SubsId>,
    pub trace_level: u32,
    pub no_trace_level: u32,
    pub priv_data: Option<Box<dyn std::any::Any>>,
    // Derived caches, cleared when the topology around the node changes.
    pub full_name_cache: RefCell<Option<String>>,
    pub oid_cache: RefCell<Option<String>>,
}

impl GobjNode {
    pub fn short_name(&self) -> String {
        format!("{}^{}", self.gclass.name, self.name)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn segment_name(&self) -> &str {
        if self.name.is_empty() {
            &self.gclass.name
        } else {
            &self.name
        }
    }

    pub fn invalidate_caches(&self) {
        *self.full_name_cache.borrow_mut() = None;
        *self.oid_cache.borrow_mut() = None;
    }
}

pub(crate) struct Slot {
    pub gen: u32,
    pub node: Option<GobjNode>,
}

// ---- Arena access, identity, info ----

impl Runtime {
    pub(crate) fn node(&self, id: GobjId) -> Option<&GobjNode> {
        let slot = self.nodes.get(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn node_mut(&mut self, id: GobjId) -> Option<&mut GobjNode> {
        let slot = self.nodes.get_mut(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.node.as_mut()
    }

    pub(crate) fn node_ok(&self, id: GobjId) -> GResult<&GobjNode> {
        self.node(id)
            .ok_or_else(|| GobjError::Param(format!("{}: gobj NULL or DESTROYED", id)))
    }

    pub(crate) fn node_ok_mut(&mut self, id: GobjId) -> GResult<&mut GobjNode> {
        self.node_mut(id)
            .ok_or_else(|| GobjError::Param(format!("{}: gobj NULL or DESTROYED", id)))
    }

    /// The gobj exists and is not being torn down.
    pub fn is_alive(&self, id: GobjId) -> bool {
        match self.node(id) {
            Some(n) => !n.has_flag(GF_DESTROYING),
            None => false,
        }
    }

    pub fn exists(&self, id: GobjId) -> bool {
        self.node(id).is_some()
    }

    pub fn name(&self, id: GobjId) -> String {
        self.node(id).map(|n| n.name.clone()).unwrap_or_default()
    }

    pub fn gclass(&self, id: GobjId) -> Option<Arc<GClass>> {
        self.node(id).map(|n| n.gclass.clone())
    }

    pub fn gclass_name(&self, id: GobjId) -> String {
        self.node(id)
            .map(|n| n.gclass.name.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: GobjId) -> Option<GobjId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn is_running(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.running).unwrap_or(false)
    }

    pub fn is_playing(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.playing).unwrap_or(false)
    }

    pub fn is_disabled(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.disabled).unwrap_or(false)
    }

    pub fn is_destroying(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.has_flag(GF_DESTROYING)).unwrap_or(false)
    }

    pub fn is_created(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.has_flag(GF_CREATED)).unwrap_or(false)
    }

    pub fn is_yuno(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.has_flag(GF_YUNO)).unwrap_or(false)
    }

    pub fn is_service(&self, id: GobjId) -> bool {
        self.node(id)
            .map(|n| n.has_flag(GF_SERVICE | GF_DEFAULT_SERVICE | GF_YUNO))
            .unwrap_or(false)
    }

    pub fn is_unique(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.has_flag(GF_UNIQUE)).unwrap_or(false)
    }

    pub fn is_volatil(&self, id: GobjId) -> bool {
        self.node(id).map(|n| n.has_flag(GF_VOLATIL)).unwrap_or(false)
    }

    pub fn set_volatil(&mut self, id: GobjId, set: bool) {
        if let Some(n) = self.node_mut(id) {
            if set {
                n.flags |= GF_VOLATIL;
            } else {
                n.flags &= !GF_VOLATIL;
            }
        }
    }

    pub fn is_imminent_destroy(&self, id: GobjId) -> bool {
        self.node(id)
            .map(|n| n.has_flag(GF_IMMINENT_DESTROY))
            .unwrap_or(false)
    }

    pub fn set_imminent_destroy(&mut self, id: GobjId, set: bool) {
        if let Some(n) = self.node_mut(id) {
            if set {
                n.flags |= GF_IMMINENT_DESTROY;
            } else {
                n.flags &= !GF_IMMINENT_DESTROY;
            }
        }
    }

    // ---- Naming ----

    pub fn short_name(&self, id: GobjId) -> String {
        self.node(id).map(|n| n.short_name()).unwrap_or_default()
    }

    /// Segment names from the yuno down to this gobj, joined by '`'.
    pub fn full_name(&self, id: GobjId) -> String {
        let Some(node) = self.node(id) else {
            return String::new();
        };
        if let Some(cached) = node.full_name_cache.borrow().as_ref() {
            return cached.clone();
        }
        let mut segs = vec![node.segment_name().to_string()];
        let mut cur = node.parent;
        while let Some(pid) = cur {
            match self.node(pid) {
                Some(p) => {
                    segs.push(p.segment_name().to_string());
                    cur = p.parent;
                }
                None => break,
            }
        }
        segs.reverse();
        let full = segs.join("`");
        *node.full_name_cache.borrow_mut() = Some(full.clone());
        full
    }

    /// Dotted numeric path of 1-based child indexes from the yuno ("1.3.2").
    pub fn oid(&self, id: GobjId) -> String {
        let Some(node) = self.node(id) else {
            return String::new();
        };
        if let Some(cached) = node.oid_cache.borrow().as_ref() {
            return cached.clone();
        }
        let mut idxs: Vec<usize> = Vec::new();
        let mut cur = id;
        while let Some(pid) = self.parent(cur) {
            idxs.push(self.child_index(pid, cur).unwrap_or(0));
            cur = pid;
        }
        idxs.push(1); // the yuno itself
        idxs.reverse();
        let oid = idxs
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(".");
        *node.oid_cache.borrow_mut() = Some(oid.clone());
        oid
    }

    // ---- Type tests ----

    pub fn typeof_gclass(&self, id: GobjId, gclass_name: &str) -> bool {
        self.node(id)
            .map(|n| n.gclass.name == gclass_name)
            .unwrap_or(false)
    }

    pub fn typeof_subgclass(&self, id: GobjId, gclass_name: &str) -> bool {
        self.node(id)
            .map(|n| n.gclass.is_subclass_of(gclass_name))
            .unwrap_or(false)
    }

    /// Check the gclass of this gobj or of any gobj down its bottom chain.
    pub fn typeof_inherited_gclass(&self, id: GobjId, gclass_name: &str) -> bool {
        let mut cur = Some(id);
        while let Some(g) = cur {
            match self.node(g) {
                Some(n) => {
                    if n.gclass.is_subclass_of(gclass_name) {
                        return true;
                    }
                    cur = n.bottom;
                }
                None => break,
            }
        }
        false
    }

    // ---- Bottom chain ----

    pub fn bottom_gobj(&self, id: GobjId) -> Option<GobjId> {
        self.node(id).and_then(|n| n.bottom)
    }

    /// Follow the bottom chain to its last link.
    pub fn last_bottom_gobj(&self, id: GobjId) -> Option<GobjId> {
        let mut last = None;
        let mut cur = self.bottom_gobj(id);
        while let Some(b) = cur {
            last = Some(b);
            cur = self.bottom_gobj(b);
        }
        last
    }

    /// Point one gobj at another for attribute delegation and the start
    /// cascade. Returns the previous bottom.
    pub fn set_bottom_gobj(&mut self, id: GobjId, bottom: Option<GobjId>) -> Option<GobjId> {
        if let Some(b) = bottom {
            if !self.exists(b) {
                error!("{}: set_bottom_gobj with dead bottom {}", self.short_name(id), b);
                return None;
            }
        }
        match self.node_mut(id) {
            Some(n) => {
                let old = n.bottom;
                n.bottom = bottom;
                old
            }
            None => None,
        }
    }

    // ---- Children ----

    pub fn childs(&self, id: GobjId) -> Vec<GobjId> {
        self.node(id).map(|n| n.childs.clone()).unwrap_or_default()
    }

    pub fn child_size(&self, id: GobjId) -> usize {
        self.node(id).map(|n| n.childs.len()).unwrap_or(0)
    }

    pub fn child_by_name(&self, id: GobjId, name: &str) -> Option<GobjId> {
        let node = self.node(id)?;
        node.childs
            .iter()
            .copied()
            .find(|c| self.node(*c).map(|n| n.name == name).unwrap_or(false))
    }

    /// 1-based, like the oid segments.
    pub fn child_by_index(&self, id: GobjId, index: usize) -> Option<GobjId> {
        if index == 0 {
            return None;
        }
        self.node(id)?.childs.get(index - 1).copied()
    }

    /// 1-based position of `child` in `parent`'s list.
    pub fn child_index(&self, parent: GobjId, child: GobjId) -> Option<usize> {
        self.node(parent)?
            .childs
            .iter()
            .position(|c| *c == child)
            .map(|p| p + 1)
    }

    /// First child matching the filter. Filter keys: `__gclass_name__`,
    /// `__inherited_gclass_name__`, `__gobj_name__`, `__prefix_gobj_name__`,
    /// `__state__`, `__disabled__`; any other key matches an attribute by
    /// equality.
    pub fn find_child(&self, id: GobjId, filter: &Kw) -> Option<GobjId> {
        self.childs(id)
            .into_iter()
            .find(|c| self.gobj_matches(*c, filter))
    }

    /// All matching children, first level only.
    pub fn match_childs(&self, id: GobjId, filter: &Kw) -> Vec<GobjId> {
        self.childs(id)
            .into_iter()
            .filter(|c| self.gobj_matches(*c, filter))
            .collect()
    }

    /// All matching children, deep levels.
    pub fn match_childs_tree(&self, id: GobjId, filter: &Kw) -> Vec<GobjId> {
        let mut out = Vec::new();
        self.walk_childs_tree(id, WalkOrder::TopToBottom, &mut |rt, g| {
            if rt.gobj_matches(g, filter) {
                out.push(g);
            }
            true
        });
        out
    }

    /// First child of the given gclass looking down the bottom line.
    pub fn find_bottom_child_by_gclass(&self, id: GobjId, gclass_name: &str) -> Option<GobjId> {
        let mut cur = Some(id);
        while let Some(g) = cur {
            if let Some(hit) = self
                .childs(g)
                .into_iter()
                .find(|c| self.typeof_gclass(*c, gclass_name))
            {
                return Some(hit);
            }
            cur = self.bottom_gobj(g);
        }
        None
    }

    pub(crate) fn gobj_matches(&self, id: GobjId, filter: &Kw) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        for (key, want) in filter {
            let ok = match key.as_str() {
                "__gclass_name__" => want.as_str() == Some(node.gclass.name.as_str()),
                "__inherited_gclass_name__" => match want.as_str() {
                    Some(name) => self.typeof_inherited_gclass(id, name),
                    None => false,
                },
                "__gobj_name__" => want.as_str() == Some(node.name.as_str()),
                "__prefix_gobj_name__" => match want.as_str() {
                    Some(prefix) => node.name.starts_with(prefix),
                    None => false,
                },
                "__state__" => match want.as_str() {
                    Some(st) => node
                        .gclass
                        .fsm
                        .state_names
                        .get(node.current_state)
                        .map(|s| s.eq_ignore_ascii_case(st))
                        .unwrap_or(false),
                    None => false,
                },
                "__disabled__" => {
                    want.as_bool().map(|b| b == node.disabled).unwrap_or(false)
                }
                attr_name => node.attrs.read(attr_name) == Some(want),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Walk the subtree below `id` (the root itself is not visited).
    /// The callback returns false to stop the walk.
    pub fn walk_childs_tree<F>(&self, id: GobjId, order: WalkOrder, f: &mut F) -> bool
    where
        F: FnMut(&Runtime, GobjId) -> bool,
    {
        for child in self.childs(id) {
            match order {
                WalkOrder::TopToBottom => {
                    if !f(self, child) {
                        return false;
                    }
                    if !self.walk_childs_tree(child, order, f) {
                        return false;
                    }
                }
                WalkOrder::BottomToTop => {
                    if !self.walk_childs_tree(child, order, f) {
                        return false;
                    }
                    if !f(self, child) {
                        return false;
                    }
                }
            }
        }
        true
    }

    // ---- FSM state info ----

    pub fn current_state(&self, id: GobjId) -> String {
        self.node(id)
            .and_then(|n| n.gclass.fsm.state_names.get(n.current_state).cloned())
            .unwrap_or_default()
    }

    pub fn last_state(&self, id: GobjId) -> String {
        self.node(id)
            .and_then(|n| n.gclass.fsm.state_names.get(n.last_state).cloned())
            .unwrap_or_default()
    }

    pub fn in_this_state(&self, id: GobjId, state: &str) -> bool {
        self.current_state(id).eq_ignore_ascii_case(state)
    }

    // ---- user_data ----

    pub fn read_user_data(&self, id: GobjId, name: &str) -> Option<Value> {
        self.node(id).and_then(|n| kw_get(&n.user_data, name).cloned())
    }

    pub fn write_user_data(&mut self, id: GobjId, name: &str, value: Value) -> GResult<()> {
        let node = self.node_ok_mut(id)?;
        node.user_data.insert(name.to_string(), value);
        Ok(())
    }

    /// Set a user-data value by '`' path, creating intermediate dicts.
    pub fn kw_set_user_data(&mut self, id: GobjId, path: &str, value: Value) -> GResult<()> {
        let node = self.node_ok_mut(id)?;
        kw_set(&mut node.user_data, path, value);
        Ok(())
    }

    pub fn kw_get_user_data(&self, id: GobjId, path: &str, default: Value) -> Value {
        self.node(id)
            .and_then(|n| kw_get(&n.user_data, path).cloned())
            .unwrap_or(default)
    }

    pub fn kw_delete_user_data(&mut self, id: GobjId, path: &str) -> Option<Value> {
        let node = self.node_mut(id)?;
        kw_delete(&mut node.user_data, path)
    }

    // ---- priv data (opaque per-instance state of the class) ----

    pub fn set_priv<T: 'static>(&mut self, id: GobjId, data: T) -> GResult<()> {
        let node = self.node_ok_mut(id)?;
        node.priv_data = Some(Box::new(data));
        Ok(())
    }

    pub fn priv_ref<T: 'static>(&self, id: GobjId) -> Option<&T> {
        self.node(id)?.priv_data.as_ref()?.downcast_ref::<T>()
    }

    pub fn priv_mut<T: 'static>(&mut self, id: GobjId) -> Option<&mut T> {
        self.node_mut(id)?.priv_data.as_mut()?.downcast_mut::<T>()
    }

    /// Take the priv data out (put it back with set_priv). Lets a handler
    /// mutate its state while re-entering the runtime.
    pub fn take_priv<T: 'static>(&mut self, id: GobjId) -> Option<Box<T>> {
        let node = self.node_mut(id)?;
        let data = node.priv_data.take()?;
        match data.downcast::<T>() {
            Ok(b) => Some(b),
            Err(data) => {
                node.priv_data = Some(data);
                None
            }
        }
    }

    // ---- Matching first service/unique above ----

    /// Nearest ancestor (or self) that is a service (or the yuno).
    pub fn nearest_top_service(&self, id: GobjId) -> Option<GobjId> {
        let mut cur = Some(id);
        while let Some(g) = cur {
            if self.is_service(g) {
                return Some(g);
            }
            cur = self.parent(g);
        }
        None
    }

    /// Nearest ancestor (or self) that is unique or a service.
    pub fn nearest_top_unique(&self, id: GobjId) -> Option<GobjId> {
        let mut cur = Some(id);
        while let Some(g) = cur {
            if self.is_unique(g) || self.is_service(g) {
                return Some(g);
            }
            cur = self.parent(g);
        }
        None
    }
}

// ---- Name validation ----

pub(crate) fn check_gobj_name(name: &str) -> GResult<()> {
    if name.len() > crate::consts::GOBJ_NAME_MAX {
        return Err(GobjError::Param(format!(
            "gobj name too long ({} > {} bytes): '{}'",
            name.len(),
            crate::consts::GOBJ_NAME_MAX,
            name
        )));
    }
    if name.contains(crate::consts::GOBJ_NAME_FORBIDDEN) {
        return Err(GobjError::Param(format!(
            "gobj name with forbidden character: '{}'",
            name
        )));
    }
    Ok(())
}

pub(crate) fn check_gclass_name(name: &str) -> GResult<()> {
    if name.is_empty() {
        return Err(GobjError::Param("empty gclass name".to_string()));
    }
    if name.contains(crate::consts::GCLASS_NAME_FORBIDDEN) {
        return Err(GobjError::Param(format!(
            "gclass name with forbidden character: '{}'",
            name
        )));
    }
    Ok(())
}

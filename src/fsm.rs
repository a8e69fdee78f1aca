//! fsm — the event dispatcher.
//!
//! Contract (per event, synchronous, re-entrant):
//! 1. Dead destination -> RC_NO_GOBJ.
//! 2. Event must be in the class input-event list; otherwise the class
//!    mt_inject_event takes over entirely, or RC_EV_NOT_DEFINED.
//! 3. First transition of the current state matching the event name
//!    (case-insensitive) wins. A declared next_state commits BEFORE the
//!    action runs.
//! 4. After the action, a committed transition publishes
//!    __EV_STATE_CHANGED__ (or runs mt_state_changed) if the gobj is
//!    still running.
//! 5. No match -> RC_EV_REFUSED.

use log::{debug, error, warn};
use serde_json::Value;

use crate::consts::EV_STATE_CHANGED;
use crate::error::{RC_EV_NOT_DEFINED, RC_EV_REFUSED, RC_NO_GOBJ, RC_OK};
use crate::gclass::EventDesc;
use crate::kw::Kw;
use crate::metrics;
use crate::runtime::node::GF_DESTROYING;
use crate::runtime::{GobjId, Runtime};
use crate::trace::{TRACE_EV_KW, TRACE_MACHINE, TRACE_STATES};

impl Runtime {
    /// Send an event, transferring ownership of the kw to the machine.
    pub fn send_event(&mut self, dst: GobjId, event: &str, kw: Kw, src: Option<GobjId>) -> i32 {
        let mut kw = kw;
        self.dispatch_event(dst, event, &mut kw, src)
    }

    /// Send an event with a lent kw: the caller keeps ownership and sees
    /// the receiver's modifications. For events flagged EVF_KW_WRITING.
    pub fn send_event_writing(
        &mut self,
        dst: GobjId,
        event: &str,
        kw: &mut Kw,
        src: Option<GobjId>,
    ) -> i32 {
        self.dispatch_event(dst, event, kw, src)
    }

    pub(crate) fn dispatch_event(
        &mut self,
        dst: GobjId,
        event: &str,
        kw: &mut Kw,
        src: Option<GobjId>,
    ) -> i32 {
        metrics::record_event_sent();

        let Some(node) = self.node(dst) else {
            error!("send_event('{}'): gobj NO exist", event);
            return RC_NO_GOBJ;
        };
        if node.has_flag(GF_DESTROYING) {
            error!(
                "{}: send_event('{}') to a DESTROYING gobj",
                node.short_name(),
                event
            );
            return RC_NO_GOBJ;
        }
        let gclass = node.gclass.clone();
        let entry_state = node.current_state;

        self.nested_dispatch += 1;

        let Some(_ev_desc) = gclass.input_event(event).cloned() else {
            if let Some(inject) = gclass.gmt.mt_inject_event.clone() {
                // The class processes its own unknown events.
                self.nested_dispatch -= 1;
                self.monitor_event("inject", event, src, dst);
                return inject(self, dst, event, kw, src);
            }
            self.nested_dispatch -= 1;
            metrics::record_event_not_defined();
            error!(
                "{}: event '{}' NOT DEFINED in input-event list",
                self.short_name(dst),
                event
            );
            return RC_EV_NOT_DEFINED;
        };

        let tl = self.trace_level_of(dst);
        if tl & TRACE_MACHINE != 0 {
            let indent = "  ".repeat(self.nested_dispatch as usize - 1);
            debug!(
                "{}🔄 mach: {} <- '{}' (st: {}, src: {})",
                indent,
                self.short_name(dst),
                event,
                self.current_state(dst),
                src.map(|s| self.short_name(s)).unwrap_or_default(),
            );
            if tl & TRACE_EV_KW != 0 {
                debug!("{}   kw: {}", indent, Value::Object(kw.clone()));
            }
        }
        self.monitor_event("send", event, src, dst);

        let table = gclass.fsm.states[entry_state].clone();
        for row in &table {
            if !row.event.eq_ignore_ascii_case(event) {
                continue;
            }

            // Commit the transition first.
            let mut committed_to = None;
            if let Some(ns) = &row.next_state {
                let ni = gclass.state_index(ns).unwrap(); // validated FSM
                if let Some(n) = self.node_mut(dst) {
                    n.last_state = n.current_state;
                    n.current_state = ni;
                    committed_to = Some(ni);
                }
                metrics::record_state_change();
                if tl & TRACE_STATES != 0 {
                    debug!(
                        "{}: '{}' -> '{}' on '{}'",
                        self.short_name(dst),
                        gclass.fsm.state_names[entry_state],
                        ns,
                        event
                    );
                }
            }

            let rc = match &row.action {
                Some(a) => {
                    let a = a.clone();
                    a(self, dst, event, kw, src)
                }
                None => RC_OK,
            };

            // State-changed publication, only while running, after the
            // action returned.
            if let Some(ni) = committed_to {
                if self.is_running(dst) {
                    let mut kw2 = Kw::new();
                    kw2.insert(
                        "previous_state".to_string(),
                        Value::String(gclass.fsm.state_names[entry_state].clone()),
                    );
                    kw2.insert(
                        "current_state".to_string(),
                        Value::String(gclass.fsm.state_names[ni].clone()),
                    );
                    if let Some(cb) = gclass.gmt.mt_state_changed.clone() {
                        cb(self, dst, EV_STATE_CHANGED, kw2);
                    } else {
                        self.publish_event(dst, EV_STATE_CHANGED, kw2);
                    }
                }
            }

            self.nested_dispatch -= 1;
            return rc;
        }

        self.nested_dispatch -= 1;
        metrics::record_event_refused();
        if self.is_alive(dst) {
            warn!(
                "{}: event '{}' REFUSED in state '{}'",
                self.short_name(dst),
                event,
                self.current_state(dst)
            );
        }
        RC_EV_REFUSED
    }

    /// Commit a state change without an event. Publishes exactly like a
    /// transition (only while running). Returns true if the state changed.
    pub fn change_state(&mut self, gobj: GobjId, new_state: &str) -> bool {
        let Some(node) = self.node(gobj) else {
            error!("change_state('{}'): gobj NO exist", new_state);
            return false;
        };
        let gclass = node.gclass.clone();
        let cur = node.current_state;
        let Some(ni) = gclass.state_index(new_state) else {
            error!(
                "{}: change_state to unknown state '{}'",
                node.short_name(),
                new_state
            );
            return false;
        };
        if ni == cur {
            return false;
        }
        if let Some(n) = self.node_mut(gobj) {
            n.last_state = cur;
            n.current_state = ni;
        }
        metrics::record_state_change();
        if self.is_running(gobj) {
            let mut kw2 = Kw::new();
            kw2.insert(
                "previous_state".to_string(),
                Value::String(gclass.fsm.state_names[cur].clone()),
            );
            kw2.insert(
                "current_state".to_string(),
                Value::String(gclass.fsm.state_names[ni].clone()),
            );
            if let Some(cb) = gclass.gmt.mt_state_changed.clone() {
                cb(self, gobj, EV_STATE_CHANGED, kw2);
            } else {
                self.publish_event(gobj, EV_STATE_CHANGED, kw2);
            }
        }
        true
    }

    // ---- Event info ----

    pub fn input_event_desc(&self, id: GobjId, event: &str) -> Option<EventDesc> {
        self.gclass(id)?.input_event(event).cloned()
    }

    pub fn output_event_desc(&self, id: GobjId, event: &str) -> Option<EventDesc> {
        self.gclass(id)?.output_event(event).cloned()
    }

    pub fn event_in_input_list(&self, id: GobjId, event: &str, flag: u32) -> bool {
        self.gclass(id)
            .map(|g| g.has_input_event(event, flag))
            .unwrap_or(false)
    }

    pub fn event_in_output_list(&self, id: GobjId, event: &str, flag: u32) -> bool {
        self.gclass(id)
            .map(|g| g.has_output_event(event, flag))
            .unwrap_or(false)
    }

    // ---- Fan-out helpers ----

    pub fn send_event_to_named_child(
        &mut self,
        id: GobjId,
        name: &str,
        event: &str,
        kw: Kw,
        src: Option<GobjId>,
    ) -> i32 {
        match self.child_by_name(id, name) {
            Some(c) => self.send_event(c, event, kw, src),
            None => {
                error!("{}: no child named '{}'", self.short_name(id), name);
                RC_NO_GOBJ
            }
        }
    }

    /// Send to the direct children that declare the event as input.
    /// Returns the count of deliveries, or the first negative result.
    pub fn send_event_to_childs(
        &mut self,
        id: GobjId,
        event: &str,
        kw: Kw,
        src: Option<GobjId>,
    ) -> i32 {
        let mut count = 0;
        for c in self.childs(id) {
            if self.event_in_input_list(c, event, 0) {
                let rc = self.send_event(c, event, kw.clone(), src);
                if rc < 0 {
                    return rc;
                }
                count += 1;
            }
        }
        count
    }

    /// Same as send_event_to_childs, recursive over the whole subtree.
    pub fn send_event_to_childs_tree(
        &mut self,
        id: GobjId,
        event: &str,
        kw: Kw,
        src: Option<GobjId>,
    ) -> i32 {
        let mut count = 0;
        for c in self.childs(id) {
            if self.event_in_input_list(c, event, 0) {
                let rc = self.send_event(c, event, kw.clone(), src);
                if rc < 0 {
                    return rc;
                }
                count += 1;
            }
            let rc = self.send_event_to_childs_tree(c, event, kw.clone(), src);
            if rc < 0 {
                return rc;
            }
            count += rc;
        }
        count
    }

    /// Send to the direct children of the given gclass (or subclass).
    pub fn send_event_to_gclass_instances(
        &mut self,
        id: GobjId,
        gclass_name: &str,
        event: &str,
        kw: Kw,
        src: Option<GobjId>,
    ) -> i32 {
        let mut count = 0;
        for c in self.childs(id) {
            if self.typeof_subgclass(c, gclass_name) {
                let rc = self.send_event(c, event, kw.clone(), src);
                if rc < 0 {
                    return rc;
                }
                count += 1;
            }
        }
        count
    }
}

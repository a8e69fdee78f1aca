//! gclass — the class descriptor: FSM table, attribute schema, command and
//! authz tables, and the capability record (GMethods) of optional hooks.
//!
//! A GClass is immutable after registration and shared by Arc. Mutable
//! per-class state (instance counter, trace masks, fsm-checked flag) lives
//! in the Runtime's class registry, not here.

use std::sync::Arc;

use serde_json::Value;

use crate::kw::Kw;
use crate::runtime::{GobjId, Runtime};
use crate::schema::{AttrDesc, AuthzDesc, CmdDesc};
use crate::subs::SubsId;

// ---- Callback aliases ----
//
// Hooks receive the Runtime context plus plain ids; the engine clones the
// Arc before the call, so hooks are free to re-enter send/publish.

pub type ActionFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, &mut Kw, Option<GobjId>) -> i32>;
pub type CreateFn = Arc<dyn Fn(&mut Runtime, GobjId, &Kw)>;
pub type DestroyFn = Arc<dyn Fn(&mut Runtime, GobjId)>;
pub type LifecycleFn = Arc<dyn Fn(&mut Runtime, GobjId) -> i32>;
pub type WritingFn = Arc<dyn Fn(&mut Runtime, GobjId, &str)>;
pub type ReadingFn = Arc<dyn Fn(&Runtime, GobjId, &str, Value) -> Value>;
pub type SubsHookFn = Arc<dyn Fn(&mut Runtime, GobjId, SubsId) -> i32>;
pub type ChildHookFn = Arc<dyn Fn(&mut Runtime, GobjId, GobjId)>;
pub type PublishEventFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, &mut Kw) -> i32>;
pub type PubPreFilterFn = Arc<dyn Fn(&mut Runtime, GobjId, SubsId, &str, &mut Kw) -> i32>;
pub type PubFilterFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, &Kw, GobjId) -> i32>;
pub type StateChangedFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, Kw)>;
/// Webix-returning callables: command handlers, command/stats parsers.
/// A Null return means "asynchronous response pending".
pub type WebixFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, Kw, Option<GobjId>) -> Value>;
pub type CmdFn = WebixFn;
pub type StatsFn = WebixFn;
pub type AuthzCheckerFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, &Kw, Option<GobjId>) -> bool>;
pub type AuthenticateFn = Arc<dyn Fn(&mut Runtime, GobjId, Kw, Option<GobjId>) -> Value>;
pub type StatsUpdatedFn = Arc<dyn Fn(&mut Runtime, GobjId, GobjId, &str, &Value, &Value) -> i32>;
pub type TraceHookFn = Arc<dyn Fn(&mut Runtime, GobjId, &str, &Kw) -> i32>;

// ---- Event flags ----

/// The action runs with a lent kw; the caller keeps ownership.
pub const EVF_KW_WRITING: u32 = 0x0001;
/// Documented public event, part of the API.
pub const EVF_PUBLIC_EVENT: u32 = 0x0002;
/// Don't warn on "publish without subscribers".
pub const EVF_NO_WARN_SUBS: u32 = 0x0004;
/// System event: delivered only to subscribers that declare it as input.
pub const EVF_SYSTEM_EVENT: u32 = 0x0008;

// ---- Class flags ----

/// start_tree() skips this class.
pub const GCF_MANUAL_START: u32 = 0x0001;
/// When publishing, don't check events against the output-event list.
pub const GCF_NO_CHECK_OUTPUT_EVENTS: u32 = 0x0002;
/// When creating a gobj, ignore config keys naming unknown attrs.
pub const GCF_IGNORE_UNKNOWN_ATTRS: u32 = 0x0004;
/// Refuse play if start was not done (no auto-start).
pub const GCF_REQUIRED_START_TO_PLAY: u32 = 0x0008;

#[derive(Debug, Clone)]
pub struct EventDesc {
    pub event: String,
    pub flag: u32,
    pub description: String,
}

#[derive(Clone)]
pub struct EvAction {
    pub event: String,
    pub action: Option<ActionFn>,
    pub next_state: Option<String>,
}

impl std::fmt::Debug for EvAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvAction")
            .field("event", &self.event)
            .field("action", &self.action.is_some())
            .field("next_state", &self.next_state)
            .finish()
    }
}

/// Transition-row constructor.
pub fn ev_action(event: &str, action: Option<ActionFn>, next_state: Option<&str>) -> EvAction {
    EvAction {
        event: event.to_string(),
        action,
        next_state: next_state.map(|s| s.to_string()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Fsm {
    pub input_events: Vec<EventDesc>,
    pub output_events: Vec<EventDesc>,
    pub state_names: Vec<String>,
    /// Parallel to state_names: the ordered transition table per state.
    pub states: Vec<Vec<EvAction>>,
}

/// Per-class optional hooks, consulted by the engine on every call.
#[derive(Clone, Default)]
pub struct GMethods {
    pub mt_create: Option<CreateFn>,
    pub mt_destroy: Option<DestroyFn>,
    pub mt_start: Option<LifecycleFn>,
    pub mt_stop: Option<LifecycleFn>,
    pub mt_play: Option<LifecycleFn>,
    pub mt_pause: Option<LifecycleFn>,
    pub mt_enable: Option<LifecycleFn>,
    pub mt_disable: Option<LifecycleFn>,
    pub mt_writing: Option<WritingFn>,
    pub mt_reading: Option<ReadingFn>,
    /// Negative return rejects (and rolls back) the new subscription.
    pub mt_subscription_added: Option<SubsHookFn>,
    pub mt_subscription_deleted: Option<SubsHookFn>,
    pub mt_child_added: Option<ChildHookFn>,
    pub mt_child_removed: Option<ChildHookFn>,
    /// Bypass the built-in machine entirely for unknown input events.
    pub mt_inject_event: Option<ActionFn>,
    /// If defined, __EV_STATE_CHANGED__ is not published; this runs instead.
    pub mt_state_changed: Option<StateChangedFn>,
    /// -1 own & stop, 0 continue without default publish, >0 default publish.
    pub mt_publish_event: Option<PublishEventFn>,
    pub mt_publication_pre_filter: Option<PubPreFilterFn>,
    pub mt_publication_filter: Option<PubFilterFn>,
    pub mt_stats: Option<StatsFn>,
    /// User command parser; preference over the class command table.
    pub mt_command_parser: Option<CmdFn>,
    pub mt_authz_checker: Option<AuthzCheckerFn>,
    pub mt_authenticate: Option<AuthenticateFn>,
    /// Offered to the nearest service ancestor on stats-attr writes.
    pub mt_stats_updated: Option<StatsUpdatedFn>,
    pub mt_trace_on: Option<TraceHookFn>,
    pub mt_trace_off: Option<TraceHookFn>,
    /// Only meaningful on the yuno class: notified of every creation.
    pub mt_gobj_created: Option<ChildHookFn>,
}

pub struct GClass {
    pub name: String,
    /// "subclass-of" chain; distinct from the runtime bottom chain.
    pub base: Option<Arc<GClass>>,
    pub fsm: Fsm,
    pub gmt: GMethods,
    pub attrs: Arc<Vec<AttrDesc>>,
    pub commands: Vec<CmdDesc>,
    pub authz_table: Vec<AuthzDesc>,
    /// Up to 16 user trace levels, bit positions 0..15.
    pub trace_levels: Vec<(String, String)>,
    pub gcflag: u32,
}

impl std::fmt::Debug for GClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GClass")
            .field("name", &self.name)
            .field("states", &self.fsm.state_names)
            .field("gcflag", &self.gcflag)
            .finish()
    }
}

impl GClass {
    pub fn builder(name: &str) -> GClassBuilder {
        GClassBuilder::new(name)
    }

    pub fn input_event(&self, event: &str) -> Option<&EventDesc> {
        self.fsm
            .input_events
            .iter()
            .find(|e| e.event.eq_ignore_ascii_case(event))
    }

    pub fn output_event(&self, event: &str) -> Option<&EventDesc> {
        self.fsm
            .output_events
            .iter()
            .find(|e| e.event.eq_ignore_ascii_case(event))
    }

    pub fn has_input_event(&self, event: &str, flag: u32) -> bool {
        match self.input_event(event) {
            Some(e) => flag == 0 || e.flag & flag != 0,
            None => false,
        }
    }

    pub fn has_output_event(&self, event: &str, flag: u32) -> bool {
        match self.output_event(event) {
            Some(e) => flag == 0 || e.flag & flag != 0,
            None => false,
        }
    }

    pub fn state_index(&self, state: &str) -> Option<usize> {
        self.fsm
            .state_names
            .iter()
            .position(|s| s.eq_ignore_ascii_case(state))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|d| d.name == name)
    }

    /// Strict name or any base in the subclass chain.
    pub fn is_subclass_of(&self, gclass_name: &str) -> bool {
        if self.name == gclass_name {
            return true;
        }
        let mut base = self.base.as_ref();
        while let Some(b) = base {
            if b.name == gclass_name {
                return true;
            }
            base = b.base.as_ref();
        }
        false
    }

    /// Bit of a user trace level by name (positions 0..15).
    pub fn user_trace_bit(&self, level: &str) -> Option<u32> {
        self.trace_levels
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(level))
            .map(|i| 1u32 << i)
    }
}

/// Validate the FSM of a class. Failures are programmer bugs; the runtime
/// panics on the first instantiation of a broken class.
pub fn check_fsm(gc: &GClass) -> Result<(), String> {
    let fsm = &gc.fsm;
    if fsm.state_names.len() != fsm.states.len() {
        return Err(format!(
            "gclass '{}': {} state names but {} transition tables",
            gc.name,
            fsm.state_names.len(),
            fsm.states.len()
        ));
    }
    for (si, table) in fsm.states.iter().enumerate() {
        for row in table {
            if gc.input_event(&row.event).is_none() {
                return Err(format!(
                    "gclass '{}', state '{}': event '{}' not in input-event list",
                    gc.name, fsm.state_names[si], row.event
                ));
            }
            if let Some(ns) = &row.next_state {
                if gc.state_index(ns).is_none() {
                    return Err(format!(
                        "gclass '{}', state '{}': next_state '{}' does not exist",
                        gc.name, fsm.state_names[si], ns
                    ));
                }
            }
        }
    }
    Ok(())
}

// ---- Builder ----

pub struct GClassBuilder {
    name: String,
    base: Option<Arc<GClass>>,
    fsm: Fsm,
    gmt: GMethods,
    attrs: Vec<AttrDesc>,
    commands: Vec<CmdDesc>,
    authz_table: Vec<AuthzDesc>,
    trace_levels: Vec<(String, String)>,
    gcflag: u32,
}

impl GClassBuilder {
    pub fn new(name: &str) -> Self {
        GClassBuilder {
            name: name.to_string(),
            base: None,
            fsm: Fsm::default(),
            gmt: GMethods::default(),
            attrs: Vec::new(),
            commands: Vec::new(),
            authz_table: Vec::new(),
            trace_levels: Vec::new(),
            gcflag: 0,
        }
    }

    pub fn base(mut self, base: Arc<GClass>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn input_event(mut self, event: &str, flag: u32, description: &str) -> Self {
        self.fsm.input_events.push(EventDesc {
            event: event.to_string(),
            flag,
            description: description.to_string(),
        });
        self
    }

    pub fn output_event(mut self, event: &str, flag: u32, description: &str) -> Self {
        self.fsm.output_events.push(EventDesc {
            event: event.to_string(),
            flag,
            description: description.to_string(),
        });
        self
    }

    /// Declare a state with its ordered transition table. First declared
    /// state is the initial one.
    pub fn state(mut self, name: &str, transitions: Vec<EvAction>) -> Self {
        self.fsm.state_names.push(name.to_string());
        self.fsm.states.push(transitions);
        self
    }

    pub fn attr(mut self, desc: AttrDesc) -> Self {
        self.attrs.push(desc);
        self
    }

    pub fn attrs(mut self, mut descs: Vec<AttrDesc>) -> Self {
        self.attrs.append(&mut descs);
        self
    }

    pub fn command(mut self, desc: CmdDesc) -> Self {
        self.commands.push(desc);
        self
    }

    pub fn authz(mut self, desc: AuthzDesc) -> Self {
        self.authz_table.push(desc);
        self
    }

    pub fn trace_level(mut self, name: &str, description: &str) -> Self {
        self.trace_levels.push((name.to_string(), description.to_string()));
        self
    }

    pub fn gcflag(mut self, flag: u32) -> Self {
        self.gcflag |= flag;
        self
    }

    pub fn gmt(mut self, gmt: GMethods) -> Self {
        self.gmt = gmt;
        self
    }

    pub fn build(mut self) -> Arc<GClass> {
        if self.fsm.state_names.is_empty() {
            // Stateless container classes still need an initial state.
            self.fsm.state_names.push("ST_IDLE".to_string());
            self.fsm.states.push(Vec::new());
        }
        Arc::new(GClass {
            name: self.name,
            base: self.base,
            fsm: self.fsm,
            gmt: self.gmt,
            attrs: Arc::new(self.attrs),
            commands: self.commands,
            authz_table: self.authz_table,
            trace_levels: self.trace_levels,
            gcflag: self.gcflag,
        })
    }
}

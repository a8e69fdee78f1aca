//! subs — the pub/sub engine: subscription records, idempotent subscribe,
//! the publication pipeline and transformation filters.
//!
//! A subscription record is jointly held by its publisher and subscriber:
//! both keep the record id in their lists, the table owns the record.
//! Whoever dies first tears the record down from both sides.
//!
//! Publication pipeline per subscription (spec order):
//!   pre-filter -> liveness -> event filter -> rename -> share/clone ->
//!   selection filter -> system-event gate -> __local__ removal ->
//!   transformation filters -> __global__ merge -> send.

use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::{json, Value};

use crate::consts::EV_STATE_CHANGED;
use crate::error::{GResult, GobjError, RC_BROKE, RC_NO_GOBJ};
use crate::gclass::{EVF_NO_WARN_SUBS, EVF_SYSTEM_EVENT, GCF_NO_CHECK_OUTPUT_EVENTS};
use crate::kw::{kw_delete, kw_match_simple, kw_update_override, Kw};
use crate::metrics;
use crate::runtime::{GobjId, Runtime};
use crate::trace::TRACE_SUBSCRIPTIONS;

pub type TransFilterFn = Arc<dyn Fn(Kw) -> Kw>;
pub type KwMatchFn = Arc<dyn Fn(&Kw, &Kw) -> bool>;

// ---- Subscription flags ----

pub const SUBS_RENAMED: u32 = 0x0001;
pub const SUBS_HARD: u32 = 0x0002;
pub const SUBS_FIRST_SHOT: u32 = 0x0004;
pub const SUBS_SHARE_KW: u32 = 0x0008;
pub const SUBS_OWN_EVENT: u32 = 0x0010;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SubsId {
    pub(crate) idx: u32,
    pub(crate) gen: u32,
}

impl std::fmt::Display for SubsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subs#{}.{}", self.idx, self.gen)
    }
}

#[derive(Clone, Debug)]
pub struct Subscription {
    pub publisher: GobjId,
    pub subscriber: GobjId,
    /// Empty string means "any event".
    pub event: String,
    pub renamed_event: Option<String>,
    pub flag: u32,
    pub config: Option<Kw>,
    pub global: Option<Kw>,
    /// Dict or list of '`' paths removed from the kw before delivery.
    pub local: Option<Value>,
    pub filter: Option<Kw>,
}

pub(crate) struct SubsSlot {
    pub gen: u32,
    pub rec: Option<Subscription>,
}

fn parse_subs_kw(kw: &Kw) -> (Option<Kw>, Option<Kw>, Option<Value>, Option<Kw>) {
    // HACK only these four subdictionaries are honored; the rest of the
    // kw is ignored.
    let config = kw.get("__config__").and_then(Value::as_object).cloned();
    let global = kw.get("__global__").and_then(Value::as_object).cloned();
    let local = kw.get("__local__").cloned().filter(|v| !v.is_null());
    let filter = kw.get("__filter__").and_then(Value::as_object).cloned();
    (config, global, local, filter)
}

fn flags_from_config(config: &Option<Kw>) -> (u32, Option<String>) {
    let mut flag = 0u32;
    let mut renamed = None;
    if let Some(cfg) = config {
        if let Some(name) = cfg.get("__rename_event_name__").and_then(Value::as_str) {
            if !name.is_empty() {
                flag |= SUBS_RENAMED;
                renamed = Some(name.to_string());
            }
        }
        let truthy = |k: &str| {
            cfg.get(k)
                .map(|v| match v {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
                    _ => false,
                })
                .unwrap_or(false)
        };
        if truthy("__hard_subscription__") {
            flag |= SUBS_HARD;
        }
        if truthy("__first_shot__") {
            flag |= SUBS_FIRST_SHOT;
        }
        if truthy("__share_kw__") {
            flag |= SUBS_SHARE_KW;
        }
        if truthy("__own_event__") {
            flag |= SUBS_OWN_EVENT;
        }
    }
    (flag, renamed)
}

fn remove_local_keys(kw: &mut Kw, local: &Value) {
    match local {
        Value::Array(paths) => {
            for p in paths {
                if let Some(path) = p.as_str() {
                    kw_delete(kw, path);
                }
            }
        }
        Value::Object(map) => {
            for (key, v) in map {
                match (v, kw.get_mut(key)) {
                    (Value::Object(sub), Some(Value::Object(inner))) => {
                        remove_local_keys(inner, &Value::Object(sub.clone()));
                    }
                    _ => {
                        kw.remove(key);
                    }
                }
            }
        }
        _ => {}
    }
}

impl Runtime {
    // ---- Table plumbing ----

    pub(crate) fn alloc_subs(&mut self, rec: Subscription) -> SubsId {
        if let Some(idx) = self.free_subs.pop() {
            let slot = &mut self.subs[idx as usize];
            slot.rec = Some(rec);
            SubsId { idx, gen: slot.gen }
        } else {
            let idx = self.subs.len() as u32;
            self.subs.push(SubsSlot { gen: 1, rec: Some(rec) });
            SubsId { idx, gen: 1 }
        }
    }

    pub(crate) fn free_subs_slot(&mut self, id: SubsId) {
        if let Some(slot) = self.subs.get_mut(id.idx as usize) {
            if slot.gen == id.gen && slot.rec.is_some() {
                slot.rec = None;
                slot.gen = slot.gen.wrapping_add(1);
                self.free_subs.push(id.idx);
            }
        }
    }

    pub fn subscription(&self, id: SubsId) -> Option<&Subscription> {
        let slot = self.subs.get(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.rec.as_ref()
    }

    pub(crate) fn subscription_mut(&mut self, id: SubsId) -> Option<&mut Subscription> {
        let slot = self.subs.get_mut(id.idx as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.rec.as_mut()
    }

    pub fn subscriptions_size(&self, publisher: GobjId) -> usize {
        self.node(publisher)
            .map(|n| n.subscriptions.len())
            .unwrap_or(0)
    }

    pub fn subscribings_size(&self, subscriber: GobjId) -> usize {
        self.node(subscriber)
            .map(|n| n.subscribings.len())
            .unwrap_or(0)
    }

    // ---- Subscribe / unsubscribe ----

    /// Idempotent: a second subscribe with identical key material
    /// (event + four maps + both endpoints) replaces the old record.
    /// The publisher's mt_subscription_added can reject with a negative
    /// return; the subscription is then rolled back.
    pub fn subscribe_event(
        &mut self,
        publisher: GobjId,
        event: &str,
        kw: Kw,
        subscriber: GobjId,
    ) -> GResult<SubsId> {
        if !self.is_alive(publisher) {
            return Err(GobjError::Param("subscribe: publisher NULL or destroying".to_string()));
        }
        if !self.is_alive(subscriber) {
            return Err(GobjError::Param("subscribe: subscriber NULL or destroying".to_string()));
        }

        let gclass = self.gclass(publisher).unwrap();
        if !event.is_empty()
            && event != EV_STATE_CHANGED
            && gclass.output_event(event).is_none()
            && gclass.gcflag & GCF_NO_CHECK_OUTPUT_EVENTS == 0
        {
            error!(
                "{}: subscribe: event '{}' NOT in output-event list",
                self.short_name(publisher),
                event
            );
            return Err(GobjError::NotFound(format!(
                "output event '{}' of '{}'",
                event, gclass.name
            )));
        }

        let (config, global, local, filter) = parse_subs_kw(&kw);
        let (flag, renamed_event) = flags_from_config(&config);

        // Idempotence: an exact match is the same logical subscription.
        // The old record is deleted and replaced silently, so the add/
        // delete hooks fire once per subscription, not per call.
        let replacing = match self.find_exact_subscription(
            publisher, event, &config, &global, &local, &filter, subscriber,
        ) {
            Some(old) => {
                self.unlink_subscription(old);
                self.free_subs_slot(old);
                metrics::record_subscription_deleted();
                true
            }
            None => false,
        };

        let rec = Subscription {
            publisher,
            subscriber,
            event: event.to_string(),
            renamed_event,
            flag,
            config,
            global,
            local,
            filter,
        };
        let sid = self.alloc_subs(rec);
        self.node_mut(publisher).unwrap().subscriptions.push(sid);
        self.node_mut(subscriber).unwrap().subscribings.push(sid);
        metrics::record_subscription_created();

        if self.trace_level_of(publisher) & TRACE_SUBSCRIPTIONS != 0 {
            debug!(
                "🔷 subscribe: {} -> {} ev '{}'",
                self.short_name(subscriber),
                self.short_name(publisher),
                event
            );
        }

        // The publisher can veto. First-shot delivery is this hook's
        // responsibility too (it sees SUBS_FIRST_SHOT in the record).
        if !replacing {
            if let Some(cb) = gclass.gmt.mt_subscription_added.clone() {
                if cb(self, publisher, sid) < 0 {
                    self.unlink_subscription(sid);
                    self.free_subs_slot(sid);
                    metrics::record_subscription_deleted();
                    return Err(GobjError::Param(
                        "subscription rejected by publisher".to_string(),
                    ));
                }
            }
        }

        Ok(sid)
    }

    /// Strict-match unsubscribe (same identity as the idempotent
    /// subscribe). Hard subscriptions refuse; use unsubscribe_by_id with
    /// force for those.
    pub fn unsubscribe_event(
        &mut self,
        publisher: GobjId,
        event: &str,
        kw: Kw,
        subscriber: GobjId,
    ) -> GResult<()> {
        let (config, global, local, filter) = parse_subs_kw(&kw);
        match self.find_exact_subscription(
            publisher, event, &config, &global, &local, &filter, subscriber,
        ) {
            Some(sid) => self.delete_subscription(sid, false, true),
            None => {
                error!(
                    "{}: unsubscribe: subscription NOT FOUND for event '{}'",
                    self.short_name(publisher),
                    event
                );
                Err(GobjError::NotFound(format!("subscription for '{}'", event)))
            }
        }
    }

    /// Unsubscribe by handle. `force` overrides the hard protection.
    pub fn unsubscribe_by_id(&mut self, sid: SubsId, force: bool) -> GResult<()> {
        self.delete_subscription(sid, force, true)
    }

    pub fn unsubscribe_list(&mut self, sids: Vec<SubsId>, force: bool) {
        for sid in sids {
            let _ = self.delete_subscription(sid, force, true);
        }
    }

    /// Drop every subscription touching this gobj, both roles, forced
    /// (hard subscriptions included).
    pub fn unsubscribe_all(&mut self, id: GobjId) {
        self.unsubscribe_all_of(id);
    }

    pub(crate) fn unsubscribe_all_of(&mut self, id: GobjId) {
        let mut sids: Vec<SubsId> = Vec::new();
        if let Some(n) = self.node(id) {
            sids.extend(n.subscriptions.iter().copied());
            sids.extend(n.subscribings.iter().copied());
        }
        for sid in sids {
            let _ = self.delete_subscription(sid, true, true);
        }
    }

    fn unlink_subscription(&mut self, sid: SubsId) {
        let Some(rec) = self.subscription(sid) else {
            return;
        };
        let (publisher, subscriber) = (rec.publisher, rec.subscriber);
        if let Some(n) = self.node_mut(publisher) {
            n.subscriptions.retain(|s| *s != sid);
        }
        if let Some(n) = self.node_mut(subscriber) {
            n.subscribings.retain(|s| *s != sid);
        }
    }

    fn delete_subscription(&mut self, sid: SubsId, force: bool, fire_hook: bool) -> GResult<()> {
        let Some(rec) = self.subscription(sid) else {
            return Err(GobjError::NotFound(format!("{}", sid)));
        };
        if rec.flag & SUBS_HARD != 0 && !force {
            warn!("unsubscribe: HARD subscription refused (use force)");
            return Err(GobjError::State("hard subscription".to_string()));
        }
        let publisher = rec.publisher;
        self.unlink_subscription(sid);
        if fire_hook && self.exists(publisher) {
            if let Some(cb) = self
                .gclass(publisher)
                .and_then(|c| c.gmt.mt_subscription_deleted.clone())
            {
                cb(self, publisher, sid);
            }
        }
        self.free_subs_slot(sid);
        metrics::record_subscription_deleted();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn find_exact_subscription(
        &self,
        publisher: GobjId,
        event: &str,
        config: &Option<Kw>,
        global: &Option<Kw>,
        local: &Option<Value>,
        filter: &Option<Kw>,
        subscriber: GobjId,
    ) -> Option<SubsId> {
        let node = self.node(publisher)?;
        node.subscriptions.iter().copied().find(|sid| {
            self.subscription(*sid)
                .map(|r| {
                    r.subscriber == subscriber
                        && r.event.eq_ignore_ascii_case(event)
                        && r.config == *config
                        && r.global == *global
                        && r.local == *local
                        && r.filter == *filter
                })
                .unwrap_or(false)
        })
    }

    // ---- Enumeration ----

    /// Subscriptions of a publisher filtered by the non-null parameters,
    /// submatch semantics on the four maps.
    pub fn find_subscriptions(
        &self,
        publisher: GobjId,
        event: Option<&str>,
        kw: Option<&Kw>,
        subscriber: Option<GobjId>,
    ) -> Vec<SubsId> {
        let Some(node) = self.node(publisher) else {
            return Vec::new();
        };
        node.subscriptions
            .iter()
            .copied()
            .filter(|sid| self.subs_submatch(*sid, event, kw, None, subscriber))
            .collect()
    }

    /// Subscribings of a subscriber, same filtering.
    pub fn find_subscribings(
        &self,
        subscriber: GobjId,
        event: Option<&str>,
        kw: Option<&Kw>,
        publisher: Option<GobjId>,
    ) -> Vec<SubsId> {
        let Some(node) = self.node(subscriber) else {
            return Vec::new();
        };
        node.subscribings
            .iter()
            .copied()
            .filter(|sid| self.subs_submatch(*sid, event, kw, publisher, None))
            .collect()
    }

    fn subs_submatch(
        &self,
        sid: SubsId,
        event: Option<&str>,
        kw: Option<&Kw>,
        publisher: Option<GobjId>,
        subscriber: Option<GobjId>,
    ) -> bool {
        let Some(rec) = self.subscription(sid) else {
            return false;
        };
        if let Some(p) = publisher {
            if rec.publisher != p {
                return false;
            }
        }
        if let Some(s) = subscriber {
            if rec.subscriber != s {
                return false;
            }
        }
        if let Some(ev) = event {
            if !ev.is_empty() && !rec.event.eq_ignore_ascii_case(ev) {
                return false;
            }
        }
        if let Some(kw) = kw {
            let (config, global, local, filter) = parse_subs_kw(kw);
            if let Some(want) = config {
                match &rec.config {
                    Some(have) => {
                        if !kw_match_simple(have, &want) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            if let Some(want) = global {
                match &rec.global {
                    Some(have) => {
                        if !kw_match_simple(have, &want) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            if let Some(want) = local {
                if rec.local.as_ref() != Some(&want) {
                    return false;
                }
            }
            if let Some(want) = filter {
                match &rec.filter {
                    Some(have) => {
                        if !kw_match_simple(have, &want) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }

    // ---- Publication ----

    /// Publish an event through every subscription of the publisher.
    /// Returns the sum of per-subscriber send returns (non-negative in
    /// the normal path), or RC_BROKE if an owner stopped the loop.
    pub fn publish_event(&mut self, publisher: GobjId, event: &str, kw: Kw) -> i32 {
        metrics::record_publication();
        let Some(node) = self.node(publisher) else {
            error!("publish_event('{}'): gobj NO exist", event);
            return RC_NO_GOBJ;
        };
        let gclass = node.gclass.clone();

        let ev_desc = gclass.output_event(event).cloned();
        let is_system = event == EV_STATE_CHANGED
            || ev_desc
                .as_ref()
                .map(|d| d.flag & EVF_SYSTEM_EVENT != 0)
                .unwrap_or(false);
        if ev_desc.is_none() && !is_system && gclass.gcflag & GCF_NO_CHECK_OUTPUT_EVENTS == 0 {
            error!(
                "{}: publish event '{}' NOT in output-event list",
                self.short_name(publisher),
                event
            );
        }
        let no_warn = is_system
            || ev_desc
                .as_ref()
                .map(|d| d.flag & EVF_NO_WARN_SUBS != 0)
                .unwrap_or(false);

        let mut base = kw;

        // 1. The class can own the whole publication.
        if let Some(cb) = gclass.gmt.mt_publish_event.clone() {
            let r = cb(self, publisher, event, &mut base);
            if r < 0 {
                return RC_BROKE;
            }
            if r == 0 {
                return 0;
            }
        }

        // Snapshot: a subscription added during this publish is not
        // visited by this publish.
        let snapshot: Vec<SubsId> = self
            .node(publisher)
            .map(|n| n.subscriptions.clone())
            .unwrap_or_default();

        let mut sent_count = 0i32;
        let mut ret_sum = 0i32;

        for sid in snapshot {
            // deleted mid-loop by an action
            let Some(rec) = self.subscription(sid).cloned() else {
                continue;
            };

            // a. pre-filter, tri-state
            if let Some(cb) = gclass.gmt.mt_publication_pre_filter.clone() {
                let r = cb(self, publisher, sid, event, &mut base);
                if r < 0 {
                    break;
                }
                if r == 0 {
                    continue;
                }
            }

            // b. subscriber gone
            if !self.is_alive(rec.subscriber) {
                continue;
            }

            // c. event filter ("" = any)
            if !rec.event.is_empty() && !rec.event.eq_ignore_ascii_case(event) {
                continue;
            }

            // d. rename; the original name is recoverable via __global__
            let ev_name = match &rec.renamed_event {
                Some(renamed) if !renamed.is_empty() => {
                    if let Some(live) = self.subscription_mut(sid) {
                        live.global
                            .get_or_insert_with(Kw::new)
                            .insert("__original_event_name__".to_string(), json!(event));
                    }
                    renamed.clone()
                }
                _ => event.to_string(),
            };

            // g. system events only reach subscribers that declare them
            if is_system && !self.event_in_input_list(rec.subscriber, &ev_name, 0) {
                continue;
            }

            // e. one shared kw for everyone, or a private deep clone
            let shared = rec.flag & SUBS_SHARE_KW != 0;
            let mut kw2 = if shared {
                std::mem::take(&mut base)
            } else {
                base.clone()
            };

            // f. selection filter: class method or __filter__
            let mut broke = false;
            let mut skip = false;
            if let Some(cb) = gclass.gmt.mt_publication_filter.clone() {
                let r = cb(self, publisher, event, &kw2, rec.subscriber);
                if r < 0 {
                    broke = true;
                } else if r == 0 {
                    skip = true;
                }
            } else if let Some(filter) = &rec.filter {
                let matcher = self.selection_match.clone();
                if !matcher(&kw2, filter) {
                    skip = true;
                }
            }
            if broke || skip {
                if shared {
                    base = kw2;
                }
                if broke {
                    break;
                }
                continue;
            }

            // h. remove the subscription's local keys
            if let Some(local) = &rec.local {
                remove_local_keys(&mut kw2, local);
            }

            // i. transformation filters, in declared order
            if let Some(tf) = rec.config.as_ref().and_then(|c| c.get("__trans_filter__")) {
                kw2 = self.apply_trans_filters(kw2, tf);
            }

            // j. merge the subscription's global keys (override)
            if let Some(global) = self.subscription(sid).and_then(|r| r.global.clone()) {
                kw_update_override(&mut kw2, &global);
            }

            // k. deliver
            metrics::record_published_event();
            let rc = self.dispatch_event(rec.subscriber, &ev_name, &mut kw2, Some(publisher));
            if shared {
                base = kw2;
            }
            sent_count += 1;
            ret_sum += rc;
            if rc < 0 && rec.flag & SUBS_OWN_EVENT != 0 {
                return RC_BROKE;
            }

            // l. the publisher may have died inside the send
            if !self.is_alive(publisher) {
                break;
            }
        }

        if sent_count == 0 && !no_warn && self.options.warn_no_subscribers {
            warn!(
                "{}: publish event '{}' WITHOUT subscribers",
                self.short_name(publisher),
                event
            );
        }
        ret_sum
    }

    // ---- Selection filter & transformation filters ----

    /// Replace the predicate applied to `__filter__`. Returns the old one.
    pub fn set_publication_selection_filter(&mut self, f: KwMatchFn) -> KwMatchFn {
        std::mem::replace(&mut self.selection_match, f)
    }

    /// Register a named transformation filter for
    /// `__config__.__trans_filter__`.
    pub fn add_publication_trans_filter(&mut self, name: &str, f: TransFilterFn) {
        self.trans_filters.insert(name.to_string(), f);
    }

    pub(crate) fn register_builtin_trans_filters(&mut self) {
        self.add_publication_trans_filter(
            "webix",
            Arc::new(|kw: Kw| {
                let mut out = Kw::new();
                out.insert("result".to_string(), json!(0));
                out.insert("comment".to_string(), Value::Null);
                out.insert("schema".to_string(), Value::Null);
                out.insert("data".to_string(), Value::Object(kw));
                out
            }),
        );
    }

    /// Apply the filters named by a string, a list or a dict, in order.
    /// Unknown names log an error and pass the kw through unchanged.
    pub(crate) fn apply_trans_filters(&mut self, kw: Kw, spec: &Value) -> Kw {
        let mut names: Vec<String> = Vec::new();
        match spec {
            Value::String(s) => names.push(s.clone()),
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        names.push(s.to_string());
                    }
                }
            }
            Value::Object(map) => {
                for name in map.keys() {
                    names.push(name.clone());
                }
            }
            _ => {}
        }
        let mut kw = kw;
        for name in names {
            match self.trans_filters.get(&name) {
                Some(f) => {
                    let f = f.clone();
                    kw = f(kw);
                }
                None => {
                    error!("transformation filter '{}' NOT registered", name);
                }
            }
        }
        kw
    }
}

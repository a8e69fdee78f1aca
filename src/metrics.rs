//! Lightweight global metrics of the kernel.
//!
//! Атомарные счётчики подсистем:
//! - Object model (create/destroy)
//! - FSM dispatch (sent, refused, not defined)
//! - Pub/sub (publications, delivered events, subs created/deleted)
//! - State changes committed
//!
//! The runtime itself is single-threaded; atomics keep the statics Sync
//! and snapshots race-free from test harnesses.

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Object model -----
static GOBJS_CREATED: AtomicU64 = AtomicU64::new(0);
static GOBJS_DESTROYED: AtomicU64 = AtomicU64::new(0);

// ----- FSM dispatch -----
static EVENTS_SENT: AtomicU64 = AtomicU64::new(0);
static EVENTS_REFUSED: AtomicU64 = AtomicU64::new(0);
static EVENTS_NOT_DEFINED: AtomicU64 = AtomicU64::new(0);
static STATE_CHANGES: AtomicU64 = AtomicU64::new(0);

// ----- Pub/sub -----
static PUBLICATIONS: AtomicU64 = AtomicU64::new(0);
static PUBLISHED_EVENTS: AtomicU64 = AtomicU64::new(0);
static SUBS_CREATED: AtomicU64 = AtomicU64::new(0);
static SUBS_DELETED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub gobjs_created: u64,
    pub gobjs_destroyed: u64,

    pub events_sent: u64,
    pub events_refused: u64,
    pub events_not_defined: u64,
    pub state_changes: u64,

    pub publications: u64,
    pub published_events: u64,
    pub subs_created: u64,
    pub subs_deleted: u64,
}

impl MetricsSnapshot {
    pub fn live_gobjs(&self) -> u64 {
        self.gobjs_created.saturating_sub(self.gobjs_destroyed)
    }

    pub fn live_subscriptions(&self) -> u64 {
        self.subs_created.saturating_sub(self.subs_deleted)
    }
}

// ----- Recorders -----

pub fn record_gobj_created() {
    GOBJS_CREATED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_gobj_destroyed() {
    GOBJS_DESTROYED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_event_sent() {
    EVENTS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn record_event_refused() {
    EVENTS_REFUSED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_event_not_defined() {
    EVENTS_NOT_DEFINED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_state_change() {
    STATE_CHANGES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publication() {
    PUBLICATIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_published_event() {
    PUBLISHED_EVENTS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_subscription_created() {
    SUBS_CREATED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_subscription_deleted() {
    SUBS_DELETED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        gobjs_created: GOBJS_CREATED.load(Ordering::Relaxed),
        gobjs_destroyed: GOBJS_DESTROYED.load(Ordering::Relaxed),

        events_sent: EVENTS_SENT.load(Ordering::Relaxed),
        events_refused: EVENTS_REFUSED.load(Ordering::Relaxed),
        events_not_defined: EVENTS_NOT_DEFINED.load(Ordering::Relaxed),
        state_changes: STATE_CHANGES.load(Ordering::Relaxed),

        publications: PUBLICATIONS.load(Ordering::Relaxed),
        published_events: PUBLISHED_EVENTS.load(Ordering::Relaxed),
        subs_created: SUBS_CREATED.load(Ordering::Relaxed),
        subs_deleted: SUBS_DELETED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    GOBJS_CREATED.store(0, Ordering::Relaxed);
    GOBJS_DESTROYED.store(0, Ordering::Relaxed);

    EVENTS_SENT.store(0, Ordering::Relaxed);
    EVENTS_REFUSED.store(0, Ordering::Relaxed);
    EVENTS_NOT_DEFINED.store(0, Ordering::Relaxed);
    STATE_CHANGES.store(0, Ordering::Relaxed);

    PUBLICATIONS.store(0, Ordering::Relaxed);
    PUBLISHED_EVENTS.store(0, Ordering::Relaxed);
    SUBS_CREATED.store(0, Ordering::Relaxed);
    SUBS_DELETED.store(0, Ordering::Relaxed);
}

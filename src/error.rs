//! Error model of the kernel.
//!
//! Two layers, matching the two call styles of the API:
//! - Fallible operations (create, attrs, lifecycle, subscribe...) return
//!   `Result<T, GobjError>`, one variant per error kind.
//! - The event-dispatch path keeps the integer-return contract of the
//!   machine: actions return `i32`, and `send_event`/`publish` return
//!   distinct negative codes declared below. `0` is success / no-action.
//!
//! FSM validation failures are programmer bugs and panic (fatal by design).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GobjError {
    /// Null gobj/class, malformed name, missing required parameter.
    #[error("parameter error: {0}")]
    Param(String),

    /// Operation invalid in current state (e.g. stop when not running).
    #[error("state error: {0}")]
    State(String),

    /// No such class/service/event/attr.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attribute write with a value of the wrong type.
    #[error("type mismatch in attr '{attr}': expected {expected}, got {got}")]
    TypeMismatch {
        attr: String,
        expected: &'static str,
        got: String,
    },

    /// Class definition inconsistency detected outside the fatal validator.
    #[error("schema error: {0}")]
    Schema(String),

    /// Propagated from the pluggable persistent-attribute store.
    #[error("persistence error: {0}")]
    Persist(String),

    /// Distinct kind so callers can map to HTTP-403-like responses.
    #[error("authorization denied: {0}")]
    Authz(String),
}

pub type GResult<T> = Result<T, GobjError>;

// ---- Dispatcher return codes ----

/// Success / action ran (or no action was declared).
pub const RC_OK: i32 = 0;
/// Destination gobj is null, destroying or destroyed.
pub const RC_NO_GOBJ: i32 = -10;
/// Event is not in the class input-event set.
pub const RC_EV_NOT_DEFINED: i32 = -11;
/// Event is defined but the current state has no transition for it.
pub const RC_EV_REFUSED: i32 = -12;
/// Publication loop broken by an owner (`__own_event__` / broke filter).
pub const RC_BROKE: i32 = -1;
/// Authorization denied.
pub const RC_AUTHZ_DENIED: i32 = -403;

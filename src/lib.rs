// Базовые модули
pub mod config;
pub mod consts;
pub mod error;
pub mod kw;
pub mod metrics;
pub mod schema;
pub mod util;

// Ядро: классы, атрибуты, машина и runtime
pub mod attrs;
pub mod fsm;
pub mod gclass;
pub mod runtime; // src/runtime/{mod,node,create,lifecycle,views}.rs
pub mod subs;
pub mod trace;

// Dispatchers (commands, authz, stats) + persistence contract
pub mod authz;
pub mod command;
pub mod persist;
pub mod stats;

// Inter-event codec and stream reassembler
pub mod ievent;
pub mod istream;

// Удобные реэкспорты
pub use attrs::AttrStore;
pub use command::build_webix;
pub use config::RuntimeOptions;
pub use consts::EV_STATE_CHANGED;
pub use error::{
    GResult, GobjError, RC_AUTHZ_DENIED, RC_BROKE, RC_EV_NOT_DEFINED, RC_EV_REFUSED, RC_NO_GOBJ,
    RC_OK,
};
pub use gclass::{
    ev_action, ActionFn, EvAction, EventDesc, Fsm, GClass, GClassBuilder, GMethods,
    EVF_KW_WRITING, EVF_NO_WARN_SUBS, EVF_PUBLIC_EVENT, EVF_SYSTEM_EVENT, GCF_IGNORE_UNKNOWN_ATTRS,
    GCF_MANUAL_START, GCF_NO_CHECK_OUTPUT_EVENTS, GCF_REQUIRED_START_TO_PLAY,
};
pub use ievent::{iev_create, iev_from_buffer, iev_to_buffer, IevMsg};
pub use istream::IStream;
pub use kw::{kw, kw_match_simple, Kw};
pub use persist::{AttrSelector, PersistentAttrs};
pub use runtime::{GobjId, MonitorKind, MonitorSink, Runtime, TreeSpec, WalkOrder};
pub use schema::{
    attr, authz as authz_desc, cmd, param, AttrDesc, AuthzDesc, CmdDesc, ParamDesc, SdType,
    SDF_NOTACCESS, SDF_PERSIST, SDF_PSTATS, SDF_PUBLIC, SDF_RD, SDF_REQUIRED, SDF_RSTATS,
    SDF_STATS, SDF_VOLATIL, SDF_WILD_CMD, SDF_WR,
};
pub use subs::{SubsId, Subscription, SUBS_FIRST_SHOT, SUBS_HARD, SUBS_OWN_EVENT, SUBS_SHARE_KW};

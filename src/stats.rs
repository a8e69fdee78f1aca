//! stats — per-gobj numeric counters and the stats request path.
//!
//! Counters live in the gobj's stats map, separate from attrs. The stats
//! request (gobj_stats) answers with a webix envelope of the
//! SDF_STATS-flagged attrs plus the counters; "__reset_stats__" resets
//! the resettable ones.

use serde_json::{json, Value};

use crate::command::build_webix;
use crate::consts::{AUTHZ_READ_STATS, AUTHZ_RESET_STATS};
use crate::kw::{kw_update_override, Kw};
use crate::runtime::{GobjId, Runtime};
use crate::schema::{SDF_RSTATS, SDF_STATS};

impl Runtime {
    /// Set a counter; returns the old value.
    pub fn set_stat(&mut self, id: GobjId, path: &str, value: i64) -> i64 {
        let Some(node) = self.node_mut(id) else {
            return 0;
        };
        let old = node
            .stats
            .insert(path.to_string(), json!(value))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        old
    }

    /// Add to a counter; returns the new value.
    pub fn incr_stat(&mut self, id: GobjId, path: &str, value: i64) -> i64 {
        let Some(node) = self.node_mut(id) else {
            return 0;
        };
        let new = node
            .stats
            .get(path)
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .saturating_add(value);
        node.stats.insert(path.to_string(), json!(new));
        new
    }

    pub fn decr_stat(&mut self, id: GobjId, path: &str, value: i64) -> i64 {
        self.incr_stat(id, path, -value)
    }

    pub fn get_stat(&self, id: GobjId, path: &str) -> i64 {
        self.node(id)
            .and_then(|n| n.stats.get(path))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn stats_map(&self, id: GobjId) -> Kw {
        self.node(id).map(|n| n.stats.clone()).unwrap_or_default()
    }

    /// The stats request: class mt_stats first, then the global stats
    /// parser, then the built-in answer.
    pub fn gobj_stats(&mut self, id: GobjId, stats: &str, kw: Kw, src: Option<GobjId>) -> Value {
        let Some(gclass) = self.gclass(id) else {
            return build_webix(-1, Some("gobj NULL or DESTROYED".to_string()), Value::Null, Value::Null);
        };
        if let Some(cb) = gclass.gmt.mt_stats.clone() {
            return cb(self, id, stats, kw, src);
        }
        if let Some(cb) = self.global_stats_parser.clone() {
            return cb(self, id, stats, kw, src);
        }
        self.build_stats(id, stats, kw, src)
    }

    /// Built-in stats answer. `stats` beginning with "__reset_stats__"
    /// resets the SDF_RSTATS attrs and the counters first.
    pub fn build_stats(&mut self, id: GobjId, stats: &str, _kw: Kw, src: Option<GobjId>) -> Value {
        let reset = stats.starts_with(AUTHZ_RESET_STATS);
        let authz = if reset { AUTHZ_RESET_STATS } else { AUTHZ_READ_STATS };
        let kw_authz = crate::kw::kw(json!({ "stats": stats }));
        if !self.user_has_authz(id, authz, &kw_authz, src) {
            return build_webix(
                -403,
                Some(format!("No permission to {} stats", if reset { "reset" } else { "read" })),
                Value::Null,
                Value::Null,
            );
        }

        if reset {
            if let Some(node) = self.node_mut(id) {
                node.attrs.reset_defaults(SDF_RSTATS, 0);
                node.stats.clear();
            }
        }

        let mut data = self.attrs_snapshot(id, SDF_STATS);
        let counters = self.stats_map(id);
        kw_update_override(&mut data, &counters);
        build_webix(0, None, Value::Null, Value::Object(data))
    }
}

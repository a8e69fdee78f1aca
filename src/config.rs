//! Centralized configuration of the runtime.
//!
//! Two layers:
//! - RuntimeOptions: process tunables with env overrides (GOBJ_*), the
//!   usual builder-style setters.
//! - Global settings JSON given to Runtime::start_up(): name-scoped
//!   attribute overrides ("<gclass-or-gobj-name>.<attr>", "<...>.kw")
//!   applied to every created gobj, plus `__json_config_variables__`
//!   expansion of `{{name}}` references in configuration strings.

use std::fmt;

use serde_json::Value;

use crate::kw::{kw_update_override, Kw};

/// Process-wide tunables.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Deep tracing: 0 off, 1 all-but-no-trace-masks, >=2 unconditional.
    /// Env: GOBJ_DEEP_TRACE (default 0)
    pub deep_trace: i32,

    /// Force every trace bit on, ignoring no-trace masks.
    /// Env: GOBJ_PANIC_TRACE (default false; "1|true|on|yes" => true)
    pub panic_trace: bool,

    /// Warn when a publication reaches zero subscribers.
    /// Env: GOBJ_WARN_NO_SUBS (default true; "0|false|off|no" => false)
    pub warn_no_subscribers: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            deep_trace: 0,
            panic_trace: false,
            warn_no_subscribers: true,
        }
    }
}

impl RuntimeOptions {
    /// Load options from environment variables.
    pub fn from_env() -> Self {
        let mut opt = Self::default();

        if let Ok(v) = std::env::var("GOBJ_DEEP_TRACE") {
            if let Ok(n) = v.trim().parse::<i32>() {
                opt.deep_trace = n;
            }
        }

        if let Ok(v) = std::env::var("GOBJ_PANIC_TRACE") {
            let s = v.trim().to_ascii_lowercase();
            opt.panic_trace = s == "1" || s == "true" || s == "on" || s == "yes";
        }

        if let Ok(v) = std::env::var("GOBJ_WARN_NO_SUBS") {
            let s = v.trim().to_ascii_lowercase();
            opt.warn_no_subscribers = !(s == "0" || s == "false" || s == "off" || s == "no");
        }

        opt
    }

    pub fn with_deep_trace(mut self, level: i32) -> Self {
        self.deep_trace = level;
        self
    }

    pub fn with_panic_trace(mut self, on: bool) -> Self {
        self.panic_trace = on;
        self
    }

    pub fn with_warn_no_subscribers(mut self, on: bool) -> Self {
        self.warn_no_subscribers = on;
        self
    }
}

impl fmt::Display for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuntimeOptions {{ deep_trace: {}, panic_trace: {}, warn_no_subscribers: {} }}",
            self.deep_trace, self.panic_trace, self.warn_no_subscribers
        )
    }
}

// ---- Global-settings scoping ----

/// Collect the attribute overrides the global settings hold for one gobj:
/// keys "<prefix>.<attr>" where the prefix matches the gclass name or the
/// gobj name, and "<prefix>.kw" nested blocks (merged whole).
/// Gobj-name entries win over gclass-name entries.
pub(crate) fn settings_overrides(settings: &Kw, gclass_name: &str, gobj_name: &str) -> Kw {
    let mut out = Kw::new();
    for prefix in [gclass_name, gobj_name] {
        if prefix.is_empty() {
            continue;
        }
        for (key, value) in settings {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let Some(attr) = rest.strip_prefix('.') else {
                continue;
            };
            if attr == "kw" {
                if let Value::Object(block) = value {
                    kw_update_override(&mut out, block);
                }
            } else if !attr.is_empty() {
                out.insert(attr.to_string(), value.clone());
            }
        }
    }
    out
}

// ---- Variable expansion ----

/// Expand `{{name}}` references in every string of `v` against `vars`.
/// A string that is exactly one reference takes the variable's JSON value
/// (keeping its type); otherwise references are substituted textually.
pub(crate) fn expand_variables(v: &mut Value, vars: &Kw) {
    match v {
        Value::String(s) => {
            if let Some(name) = lone_reference(s) {
                if let Some(val) = vars.get(name) {
                    *v = val.clone();
                    return;
                }
            }
            if s.contains("{{") {
                *s = substitute(s, vars);
            }
        }
        Value::Array(items) => {
            for item in items {
                expand_variables(item, vars);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                expand_variables(item, vars);
            }
        }
        _ => {}
    }
}

fn lone_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn substitute(s: &str, vars: &Kw) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(Value::String(vs)) => out.push_str(vs),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        // unknown reference stays as-is
                        out.push_str(&rest[start..start + 2 + end + 2]);
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kw::kw;
    use serde_json::json;

    #[test]
    fn scoped_overrides() {
        let settings = kw(json!({
            "Connex.timeout": 10,
            "router.timeout": 20,
            "Connex.kw": {"url": "tcp://x"},
            "Other.timeout": 99
        }));
        let ov = settings_overrides(&settings, "Connex", "router");
        assert_eq!(ov.get("timeout"), Some(&json!(20))); // gobj name wins
        assert_eq!(ov.get("url"), Some(&json!("tcp://x")));
        assert!(ov.get("Other.timeout").is_none());
    }

    #[test]
    fn variable_expansion() {
        let vars = kw(json!({"host": "n1", "port": 7777}));
        let mut v = json!({
            "url": "tcp://{{host}}:{{port}}",
            "port": "{{port}}",
            "deep": ["{{host}}", {"k": "{{missing}}"}]
        });
        expand_variables(&mut v, &vars);
        assert_eq!(v["url"], json!("tcp://n1:7777"));
        assert_eq!(v["port"], json!(7777)); // lone reference keeps the type
        assert_eq!(v["deep"][0], json!("n1"));
        assert_eq!(v["deep"][1]["k"], json!("{{missing}}"));
    }
}

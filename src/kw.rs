//! kw — the message payload: a JSON dict (strings, numbers, booleans,
//! nulls, lists, sub-dicts) plus the helpers the kernel uses everywhere.
//!
//! Paths use the backtick delimiter: "a`b`c" walks nested dicts.
//!
//! Ownership discipline: a kw passed by value is consumed by the callee;
//! a kw passed by `&mut` is lent (the caller keeps it). The engine never
//! shares a kw behind the caller's back, see `subs` for the publication
//! clone/share rules.

use log::error;
use serde_json::Value;

pub type Kw = serde_json::Map<String, Value>;

/// Build a Kw from a json!() object literal. Non-objects yield an empty
/// kw and an error log, they are caller bugs.
pub fn kw(v: Value) -> Kw {
    match v {
        Value::Object(m) => m,
        other => {
            error!("kw(): not a json object: {}", other);
            Kw::new()
        }
    }
}

/// Kw from an optional Value; None and null become the empty kw.
pub fn kw_or_empty(v: Option<Value>) -> Kw {
    match v {
        None | Some(Value::Null) => Kw::new(),
        Some(other) => kw(other),
    }
}

// ---- Path access ('`' delimiter) ----

pub fn kw_get<'a>(kw: &'a Kw, path: &str) -> Option<&'a Value> {
    let mut segs = path.split('`');
    let first = segs.next()?;
    let mut cur = kw.get(first)?;
    for seg in segs {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

pub fn kw_has_key(kw: &Kw, path: &str) -> bool {
    kw_get(kw, path).is_some()
}

pub fn kw_get_str<'a>(kw: &'a Kw, path: &str, default: &'a str) -> &'a str {
    kw_get(kw, path).and_then(Value::as_str).unwrap_or(default)
}

pub fn kw_get_bool(kw: &Kw, path: &str, default: bool) -> bool {
    match kw_get(kw, path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => default,
    }
}

pub fn kw_get_int(kw: &Kw, path: &str, default: i64) -> i64 {
    match kw_get(kw, path) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub fn kw_get_real(kw: &Kw, path: &str, default: f64) -> f64 {
    match kw_get(kw, path) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub fn kw_get_dict<'a>(kw: &'a Kw, path: &str) -> Option<&'a Kw> {
    kw_get(kw, path).and_then(Value::as_object)
}

pub fn kw_get_list<'a>(kw: &'a Kw, path: &str) -> Option<&'a Vec<Value>> {
    kw_get(kw, path).and_then(Value::as_array)
}

/// Set a value at a path, creating intermediate dicts. A non-dict found
/// mid-path is replaced by a dict.
pub fn kw_set(kw: &mut Kw, path: &str, value: Value) {
    let segs: Vec<&str> = path.split('`').collect();
    let mut cur = kw;
    for seg in &segs[..segs.len() - 1] {
        let entry = cur
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Kw::new()));
        if !entry.is_object() {
            *entry = Value::Object(Kw::new());
        }
        cur = entry.as_object_mut().unwrap();
    }
    cur.insert(segs[segs.len() - 1].to_string(), value);
}

/// Delete the entry at a path. Returns the removed value if any.
pub fn kw_delete(kw: &mut Kw, path: &str) -> Option<Value> {
    let segs: Vec<&str> = path.split('`').collect();
    let mut cur = kw;
    for seg in &segs[..segs.len() - 1] {
        cur = cur.get_mut(*seg)?.as_object_mut()?;
    }
    cur.remove(segs[segs.len() - 1])
}

// ---- Merging ----

/// Copy entries of `src` that are missing in `dst` (shallow).
pub fn kw_update_missing(dst: &mut Kw, src: &Kw) {
    for (k, v) in src {
        if !dst.contains_key(k) {
            dst.insert(k.clone(), v.clone());
        }
    }
}

/// Copy every entry of `src` into `dst`, overriding (shallow).
pub fn kw_update_override(dst: &mut Kw, src: &Kw) {
    for (k, v) in src {
        dst.insert(k.clone(), v.clone());
    }
}

// ---- Matching ----

/// Default selection-filter predicate: every entry of `filter` must appear
/// in `kw`; sub-dicts are matched recursively, everything else by equality.
/// An empty filter matches anything.
pub fn kw_match_simple(kw: &Kw, filter: &Kw) -> bool {
    for (k, fv) in filter {
        match kw.get(k) {
            None => return false,
            Some(v) => match (v, fv) {
                (Value::Object(vm), Value::Object(fm)) => {
                    if !kw_match_simple(vm, fm) {
                        return false;
                    }
                }
                _ => {
                    if v != fv {
                        return false;
                    }
                }
            },
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_get_set_delete() {
        let mut k = kw(json!({"a": {"b": {"c": 1}}, "x": "y"}));
        assert_eq!(kw_get_int(&k, "a`b`c", 0), 1);
        assert_eq!(kw_get_str(&k, "x", ""), "y");
        assert!(!kw_has_key(&k, "a`z"));

        kw_set(&mut k, "a`b`d", json!(true));
        assert!(kw_get_bool(&k, "a`b`d", false));

        assert_eq!(kw_delete(&mut k, "a`b`c"), Some(json!(1)));
        assert!(!kw_has_key(&k, "a`b`c"));
        assert!(kw_delete(&mut k, "nope`deep").is_none());
    }

    #[test]
    fn match_simple_submatch() {
        let msg = kw(json!({"kind": "alert", "value": 1, "meta": {"zone": "a", "extra": 2}}));
        assert!(kw_match_simple(&msg, &kw(json!({}))));
        assert!(kw_match_simple(&msg, &kw(json!({"kind": "alert"}))));
        assert!(kw_match_simple(&msg, &kw(json!({"meta": {"zone": "a"}}))));
        assert!(!kw_match_simple(&msg, &kw(json!({"kind": "info"}))));
        assert!(!kw_match_simple(&msg, &kw(json!({"missing": 1}))));
    }

    #[test]
    fn merges() {
        let mut dst = kw(json!({"a": 1, "b": 2}));
        kw_update_missing(&mut dst, &kw(json!({"b": 99, "c": 3})));
        assert_eq!(dst, kw(json!({"a": 1, "b": 2, "c": 3})));

        kw_update_override(&mut dst, &kw(json!({"b": 99})));
        assert_eq!(kw_get_int(&dst, "b", 0), 99);
    }
}

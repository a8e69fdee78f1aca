//! attrs — the per-gobj attribute store (schema-driven, typed).
//!
//! The store is passive: hooks (mt_writing / mt_reading / stats routing)
//! and bottom-chain inheritance are driven by the Runtime on top of it,
//! see `Runtime::read_attr` / `Runtime::write_attr`.

use serde_json::{Number, Value};
use std::sync::Arc;

use crate::error::{GResult, GobjError};
use crate::kw::Kw;
use crate::schema::{AttrDesc, SdType};

#[derive(Debug, Clone)]
pub struct AttrStore {
    descs: Arc<Vec<AttrDesc>>,
    values: indexmap::IndexMap<String, Value>, // schema order
}

impl AttrStore {
    /// Build the store from a schema, every attr at its (coerced) default.
    pub fn new(descs: Arc<Vec<AttrDesc>>) -> Self {
        let mut values = indexmap::IndexMap::new();
        for d in descs.iter() {
            let v = coerce(d.ty, d.default.clone(), &d.name).unwrap_or_else(|_| type_zero(d.ty));
            values.insert(d.name.clone(), v);
        }
        AttrStore { descs, values }
    }

    pub fn desc(&self, name: &str) -> Option<&AttrDesc> {
        self.descs.iter().find(|d| d.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn read(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed write. Coerces compatible representations (numeric strings,
    /// 0/1 booleans); a true type mismatch leaves the store unchanged.
    pub fn write(&mut self, name: &str, value: Value) -> GResult<()> {
        let ty = match self.desc(name) {
            Some(d) => d.ty,
            None => return Err(GobjError::NotFound(format!("attr '{}'", name))),
        };
        let v = coerce(ty, value, name)?;
        self.values.insert(name.to_string(), v);
        Ok(())
    }

    /// Attr names whose flags contain all of `include` (0 = any) and none
    /// of `exclude`.
    pub fn keys(&self, include: u32, exclude: u32) -> Vec<String> {
        self.descs
            .iter()
            .filter(|d| (include == 0 || d.flag & include == include) && d.flag & exclude == 0)
            .map(|d| d.name.clone())
            .collect()
    }

    /// JSON view of the attrs whose flags intersect `filter` (0 = all).
    pub fn snapshot(&self, filter: u32) -> Kw {
        let mut out = Kw::new();
        for d in self.descs.iter() {
            if filter == 0 || d.flag & filter != 0 {
                if let Some(v) = self.values.get(&d.name) {
                    out.insert(d.name.clone(), v.clone());
                }
            }
        }
        out
    }

    /// Reset to defaults the attrs matching `include` (0 = all) and not
    /// matching `exclude`. Returns the names reset.
    pub fn reset_defaults(&mut self, include: u32, exclude: u32) -> Vec<String> {
        let mut reset = Vec::new();
        for d in self.descs.iter() {
            if (include == 0 || d.flag & include != 0) && d.flag & exclude == 0 {
                let v = coerce(d.ty, d.default.clone(), &d.name).unwrap_or_else(|_| type_zero(d.ty));
                self.values.insert(d.name.clone(), v);
                reset.push(d.name.clone());
            }
        }
        reset
    }

    /// "Set" for the required-attr check at start: null and the empty
    /// string count as not set.
    pub fn is_set(&self, name: &str) -> bool {
        match self.values.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    pub fn descs(&self) -> &Arc<Vec<AttrDesc>> {
        &self.descs
    }
}

fn type_zero(ty: SdType) -> Value {
    match ty {
        SdType::Str => Value::String(String::new()),
        SdType::Bool => Value::Bool(false),
        SdType::Real => Value::Number(Number::from_f64(0.0).unwrap()),
        SdType::Json => Value::Null,
        SdType::List | SdType::Iter => Value::Array(Vec::new()),
        _ => Value::Number(Number::from(0)),
    }
}

fn mismatch(name: &str, ty: SdType, got: &Value) -> GobjError {
    GobjError::TypeMismatch {
        attr: name.to_string(),
        expected: ty.name(),
        got: match got {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Object(_) => "object".to_string(),
        },
    }
}

/// Coerce a JSON value into the semantic type of an attribute.
pub(crate) fn coerce(ty: SdType, value: Value, name: &str) -> GResult<Value> {
    match ty {
        SdType::Json => Ok(value),
        SdType::Str => match value {
            Value::String(_) => Ok(value),
            Value::Null => Ok(Value::String(String::new())),
            other => Err(mismatch(name, ty, &other)),
        },
        SdType::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::Null => Ok(Value::Bool(false)),
            Value::Number(n) => Ok(Value::Bool(n.as_i64().unwrap_or(0) != 0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" | "" => Ok(Value::Bool(false)),
                _ => Err(mismatch(name, ty, &value)),
            },
            other => Err(mismatch(name, ty, other)),
        },
        SdType::Real => match &value {
            Value::Number(n) => Ok(Value::Number(
                Number::from_f64(n.as_f64().unwrap_or(0.0)).unwrap_or_else(|| Number::from(0)),
            )),
            Value::Null => Ok(Value::Number(Number::from_f64(0.0).unwrap())),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(Value::Number(
                    Number::from_f64(f).unwrap_or_else(|| Number::from(0)),
                )),
                Err(_) => Err(mismatch(name, ty, &value)),
            },
            other => Err(mismatch(name, ty, other)),
        },
        SdType::List | SdType::Iter => match value {
            Value::Array(_) => Ok(value),
            Value::Null => Ok(Value::Array(Vec::new())),
            other => Err(mismatch(name, ty, &other)),
        },
        // Integer family
        SdType::I32 | SdType::U32 | SdType::I64 | SdType::U64 | SdType::Pointer => {
            let n: i128 = match &value {
                Value::Null => 0,
                Value::Bool(b) => *b as i128,
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        i as i128
                    } else if let Some(u) = n.as_u64() {
                        u as i128
                    } else {
                        let f = n.as_f64().unwrap_or(0.0);
                        if f.fract() != 0.0 {
                            return Err(mismatch(name, ty, &value));
                        }
                        f as i128
                    }
                }
                Value::String(s) => match s.trim().parse::<i128>() {
                    Ok(i) => i,
                    Err(_) => return Err(mismatch(name, ty, &value)),
                },
                other => return Err(mismatch(name, ty, other)),
            };
            let in_range = match ty {
                SdType::I32 => n >= i32::MIN as i128 && n <= i32::MAX as i128,
                SdType::U32 => n >= 0 && n <= u32::MAX as i128,
                SdType::I64 => n >= i64::MIN as i128 && n <= i64::MAX as i128,
                SdType::U64 | SdType::Pointer => n >= 0 && n <= u64::MAX as i128,
                _ => unreachable!(),
            };
            if !in_range {
                return Err(mismatch(name, ty, &value));
            }
            if n >= 0 {
                Ok(Value::Number(Number::from(n as u64)))
            } else {
                Ok(Value::Number(Number::from(n as i64)))
            }
        }
    }
}

// ---- Runtime attribute surface: bottom chain, hooks, authz ----

use log::error;

use crate::consts::{AUTHZ_READ_ATTRIBUTE, AUTHZ_WRITE_ATTRIBUTE};
use crate::runtime::node::GF_CREATED;
use crate::runtime::{GobjId, Runtime};
use crate::schema::{SDF_AUTHZ_R, SDF_AUTHZ_W, SDF_STATS, SDF_VOLATIL, SDF_WR};
use serde_json::json;

impl Runtime {
    /// The gobj that actually holds the attr: the gobj itself or the
    /// first link of its bottom chain that has it.
    pub(crate) fn resolve_attr_owner(&self, id: GobjId, name: &str) -> Option<GobjId> {
        let mut cur = Some(id);
        while let Some(g) = cur {
            let n = self.node(g)?;
            if n.attrs.has(name) {
                return Some(g);
            }
            cur = n.bottom;
        }
        None
    }

    pub fn has_attr(&self, id: GobjId, name: &str) -> bool {
        self.node(id).map(|n| n.attrs.has(name)).unwrap_or(false)
    }

    pub fn has_bottom_attr(&self, id: GobjId, name: &str) -> bool {
        self.resolve_attr_owner(id, name).is_some()
    }

    /// Descriptor without bottom inheritance.
    pub fn attr_desc(&self, id: GobjId, name: &str) -> Option<AttrDesc> {
        self.node(id).and_then(|n| n.attrs.desc(name).cloned())
    }

    /// Descriptor with bottom inheritance.
    pub fn bottom_attr_desc(&self, id: GobjId, name: &str) -> Option<AttrDesc> {
        let owner = self.resolve_attr_owner(id, name)?;
        self.attr_desc(owner, name)
    }

    pub fn is_readable_attr(&self, id: GobjId, name: &str) -> bool {
        self.bottom_attr_desc(id, name)
            .map(|d| d.flag & crate::schema::ATTR_READABLE != 0)
            .unwrap_or(false)
    }

    pub fn is_writable_attr(&self, id: GobjId, name: &str) -> bool {
        self.bottom_attr_desc(id, name)
            .map(|d| d.flag & crate::schema::ATTR_WRITABLE != 0)
            .unwrap_or(false)
    }

    /// Read through the bottom chain. The owning class's mt_reading may
    /// transform the returned value.
    pub fn read_attr(&self, id: GobjId, name: &str) -> GResult<Value> {
        let owner = self.resolve_attr_owner(id, name).ok_or_else(|| {
            GobjError::NotFound(format!("{}: attr '{}'", self.short_name(id), name))
        })?;
        let node = self.node(owner).unwrap();
        let value = node.attrs.read(name).cloned().unwrap_or(Value::Null);
        if let Some(cb) = node.gclass.gmt.mt_reading.clone() {
            return Ok(cb(self, owner, name, value));
        }
        Ok(value)
    }

    /// Write through the bottom chain. Fires mt_writing on the owner and
    /// routes stats-flagged writes to the nearest service ancestor.
    /// Writes are rejected before the created flag is observable.
    pub fn write_attr(&mut self, id: GobjId, name: &str, value: Value) -> GResult<()> {
        let node = self.node_ok(id)?;
        if !node.has_flag(GF_CREATED) {
            return Err(GobjError::State(format!(
                "{}: write_attr before creation completes",
                node.short_name()
            )));
        }
        let owner = self.resolve_attr_owner(id, name).ok_or_else(|| {
            GobjError::NotFound(format!("{}: attr '{}'", self.short_name(id), name))
        })?;

        let (gclass, desc_flag, old) = {
            let n = self.node(owner).unwrap();
            let flag = n.attrs.desc(name).map(|d| d.flag).unwrap_or(0);
            let old = n.attrs.read(name).cloned().unwrap_or(Value::Null);
            (n.gclass.clone(), flag, old)
        };

        self.node_ok_mut(owner)?.attrs.write(name, value)?;

        if let Some(cb) = gclass.gmt.mt_writing.clone() {
            cb(self, owner, name);
        }

        if desc_flag & SDF_STATS != 0 {
            let new = self
                .node(owner)
                .and_then(|n| n.attrs.read(name).cloned())
                .unwrap_or(Value::Null);
            self.route_stats_update(owner, name, &old, &new);
        }
        Ok(())
    }

    /// Walk upward to the nearest service (or the yuno) whose class
    /// declares mt_stats_updated and offer it the notification.
    fn route_stats_update(&mut self, owner: GobjId, name: &str, old: &Value, new: &Value) {
        let mut cur = Some(owner);
        while let Some(g) = cur {
            if self.is_service(g) {
                if let Some(cb) = self.gclass(g).and_then(|c| c.gmt.mt_stats_updated.clone()) {
                    if cb(self, g, owner, name, old, new) == 0 {
                        return; // owned
                    }
                }
            }
            cur = self.parent(g);
        }
    }

    // ---- Authz-gated path access ----

    /// Read an attribute by path: '`'-separated segments resolve child
    /// gobjs, the leaf is the attribute. Reads of SDF_AUTHZ_R attrs are
    /// gated by __read_attribute__ when a checker is installed.
    pub fn read_attr_path(&mut self, id: GobjId, path: &str, src: Option<GobjId>) -> GResult<Value> {
        let (gobj, name) = self.resolve_attr_path(id, path)?;
        let flag = self.bottom_attr_desc(gobj, &name).map(|d| d.flag).unwrap_or(0);
        if flag & SDF_AUTHZ_R != 0 {
            let kw_authz = crate::kw::kw(json!({ "path": path }));
            if !self.user_has_authz(gobj, AUTHZ_READ_ATTRIBUTE, &kw_authz, src) {
                return Err(GobjError::Authz(format!("read attr '{}'", path)));
            }
        }
        self.read_attr(gobj, &name)
    }

    pub fn write_attr_path(
        &mut self,
        id: GobjId,
        path: &str,
        value: Value,
        src: Option<GobjId>,
    ) -> GResult<()> {
        let (gobj, name) = self.resolve_attr_path(id, path)?;
        let flag = self.bottom_attr_desc(gobj, &name).map(|d| d.flag).unwrap_or(0);
        if flag & SDF_AUTHZ_W != 0 {
            let kw_authz = crate::kw::kw(json!({ "path": path }));
            if !self.user_has_authz(gobj, AUTHZ_WRITE_ATTRIBUTE, &kw_authz, src) {
                return Err(GobjError::Authz(format!("write attr '{}'", path)));
            }
        }
        self.write_attr(gobj, &name, value)
    }

    fn resolve_attr_path(&self, id: GobjId, path: &str) -> GResult<(GobjId, String)> {
        if !path.contains('`') {
            return Ok((id, path.to_string()));
        }
        let segs: Vec<&str> = path.split('`').collect();
        let mut cur = id;
        for seg in &segs[..segs.len() - 1] {
            cur = self.child_by_name(cur, seg).ok_or_else(|| {
                GobjError::NotFound(format!("{}: child '{}'", self.short_name(id), seg))
            })?;
        }
        Ok((cur, segs[segs.len() - 1].to_string()))
    }

    // ---- Typed wrappers (missing attrs log and return the type zero) ----

    pub fn read_str_attr(&self, id: GobjId, name: &str) -> String {
        match self.read_attr(id, name) {
            Ok(Value::String(s)) => s,
            Ok(other) => other.as_str().map(|s| s.to_string()).unwrap_or_default(),
            Err(e) => {
                error!("read_str_attr: {}", e);
                String::new()
            }
        }
    }

    pub fn read_bool_attr(&self, id: GobjId, name: &str) -> bool {
        match self.read_attr(id, name) {
            Ok(Value::Bool(b)) => b,
            Ok(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            Ok(_) => false,
            Err(e) => {
                error!("read_bool_attr: {}", e);
                false
            }
        }
    }

    pub fn read_i32_attr(&self, id: GobjId, name: &str) -> i32 {
        self.read_i64_attr(id, name) as i32
    }

    pub fn read_u32_attr(&self, id: GobjId, name: &str) -> u32 {
        self.read_u64_attr(id, name) as u32
    }

    pub fn read_i64_attr(&self, id: GobjId, name: &str) -> i64 {
        match self.read_attr(id, name) {
            Ok(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Ok(_) => 0,
            Err(e) => {
                error!("read_i64_attr: {}", e);
                0
            }
        }
    }

    pub fn read_u64_attr(&self, id: GobjId, name: &str) -> u64 {
        match self.read_attr(id, name) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Ok(_) => 0,
            Err(e) => {
                error!("read_u64_attr: {}", e);
                0
            }
        }
    }

    pub fn read_real_attr(&self, id: GobjId, name: &str) -> f64 {
        match self.read_attr(id, name) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Ok(_) => 0.0,
            Err(e) => {
                error!("read_real_attr: {}", e);
                0.0
            }
        }
    }

    pub fn read_json_attr(&self, id: GobjId, name: &str) -> Value {
        self.read_attr(id, name).unwrap_or(Value::Null)
    }

    /// Pointer attrs carry gobj handles as integers.
    pub fn read_pointer_attr(&self, id: GobjId, name: &str) -> Option<GobjId> {
        let raw = self.read_u64_attr(id, name);
        if raw == 0 {
            return None;
        }
        let gobj = GobjId::from_u64(raw);
        self.exists(gobj).then_some(gobj)
    }

    pub fn write_str_attr(&mut self, id: GobjId, name: &str, value: &str) -> GResult<()> {
        self.write_attr(id, name, Value::String(value.to_string()))
    }

    pub fn write_bool_attr(&mut self, id: GobjId, name: &str, value: bool) -> GResult<()> {
        self.write_attr(id, name, Value::Bool(value))
    }

    pub fn write_i32_attr(&mut self, id: GobjId, name: &str, value: i32) -> GResult<()> {
        self.write_attr(id, name, json!(value))
    }

    pub fn write_u32_attr(&mut self, id: GobjId, name: &str, value: u32) -> GResult<()> {
        self.write_attr(id, name, json!(value))
    }

    pub fn write_i64_attr(&mut self, id: GobjId, name: &str, value: i64) -> GResult<()> {
        self.write_attr(id, name, json!(value))
    }

    pub fn write_u64_attr(&mut self, id: GobjId, name: &str, value: u64) -> GResult<()> {
        self.write_attr(id, name, json!(value))
    }

    pub fn write_real_attr(&mut self, id: GobjId, name: &str, value: f64) -> GResult<()> {
        self.write_attr(id, name, json!(value))
    }

    pub fn write_json_attr(&mut self, id: GobjId, name: &str, value: Value) -> GResult<()> {
        self.write_attr(id, name, value)
    }

    pub fn write_pointer_attr(&mut self, id: GobjId, name: &str, value: Option<GobjId>) -> GResult<()> {
        self.write_attr(id, name, json!(value.map(|g| g.as_u64()).unwrap_or(0)))
    }

    // ---- Bulk views ----

    /// The publicly writable attrs and their values.
    pub fn writable_attrs(&self, id: GobjId) -> Kw {
        self.node(id)
            .map(|n| n.attrs.snapshot(crate::schema::ATTR_WRITABLE))
            .unwrap_or_default()
    }

    /// Write every writable key of `kw` present in the schema.
    pub fn update_writable_attrs(&mut self, id: GobjId, kw: Kw, src: Option<GobjId>) -> GResult<()> {
        for (key, value) in kw {
            let writable = self
                .attr_desc(id, &key)
                .map(|d| d.flag & SDF_WR != 0)
                .unwrap_or(false);
            if !writable {
                continue;
            }
            self.write_attr_path(id, &key, value, src)?;
        }
        Ok(())
    }

    /// Reset the SDF_VOLATIL attrs to their defaults.
    pub fn reset_volatil_attrs(&mut self, id: GobjId) -> GResult<Vec<String>> {
        let node = self.node_ok_mut(id)?;
        Ok(node.attrs.reset_defaults(SDF_VOLATIL, 0))
    }

    /// Batch-write attrs bypassing hooks and the created gate. Entry
    /// point of the persistence loader, whose values have the highest
    /// prevalence and land while the gobj is still being created.
    pub fn load_attrs(&mut self, id: GobjId, kw: Kw) -> GResult<()> {
        let node = self.node_ok_mut(id)?;
        for (key, value) in kw {
            if !node.attrs.has(&key) {
                continue;
            }
            if let Err(e) = node.attrs.write(&key, value) {
                error!("load_attrs: {}", e);
            }
        }
        Ok(())
    }

    /// Snapshot of the SDF_PERSIST attrs, what a store saves.
    pub fn persistent_attrs_snapshot(&self, id: GobjId) -> Kw {
        self.attrs_snapshot(id, crate::schema::SDF_PERSIST)
    }

    /// Full attr snapshot (0 = every attr).
    pub fn attrs_snapshot(&self, id: GobjId, filter: u32) -> Kw {
        self.node(id)
            .map(|n| n.attrs.snapshot(filter))
            .unwrap_or_default()
    }
}

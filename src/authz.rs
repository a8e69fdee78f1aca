//! authz — authorization dispatch and authentication.
//!
//! Same shape as the command parser but keyed on the authz tables. The
//! answer chain for a check is: class mt_authz_checker, else the global
//! checker, else "allowed". That local-only default is intentional:
//! install a checker before exposing anything.

use log::error;
use serde_json::{json, Value};

use crate::command::build_webix;
use crate::kw::{kw_get_str, Kw};
use crate::runtime::{GobjId, Runtime};
use crate::schema::{AuthzDesc, SDF_NOTACCESS};
use crate::trace::TRACE_AUTHZS;
use crate::util;

/// Find an authz descriptor by name or alias (alias first, the
/// redirect-style combination of the command parser).
pub fn authz_get_level_desc<'a>(table: &'a [AuthzDesc], authz: &str) -> Option<&'a AuthzDesc> {
    for desc in table {
        if desc.alias.iter().any(|a| a.eq_ignore_ascii_case(authz)) {
            return Some(desc);
        }
        if desc.name.eq_ignore_ascii_case(authz) {
            return Some(desc);
        }
    }
    None
}

fn authz2json(desc: &AuthzDesc) -> Value {
    let params: Vec<Value> = desc
        .params
        .iter()
        .filter(|p| p.flag & SDF_NOTACCESS == 0)
        .map(|p| {
            json!({
                "name": p.name,
                "type": p.ty.name(),
                "description": p.description,
            })
        })
        .collect();
    json!({
        "id": desc.name,
        "description": desc.description,
        "parameters": params,
    })
}

impl Runtime {
    /// The process-wide reserved authz table.
    pub fn global_authz_table(&self) -> &[AuthzDesc] {
        &self.global_authzs
    }

    /// List the authzs of a gobj (None = the global table). With a
    /// non-empty `authz`, return just that descriptor.
    pub fn authzs_list(&self, gobj: Option<GobjId>, authz: &str) -> Option<Value> {
        let table: Vec<AuthzDesc> = match gobj {
            None => self.global_authzs.clone(),
            Some(g) => {
                let gclass = self.gclass(g)?;
                if gclass.authz_table.is_empty() {
                    return None;
                }
                gclass.authz_table.clone()
            }
        };
        if authz.is_empty() {
            return Some(Value::Array(table.iter().map(authz2json).collect()));
        }
        match authz_get_level_desc(&table, authz) {
            Some(desc) => Some(authz2json(desc)),
            None => {
                error!("authz '{}' not found", authz);
                None
            }
        }
    }

    /// Does the requester hold this authorization on the gobj?
    /// HACK with no checker installed the answer is true.
    pub fn user_has_authz(
        &mut self,
        id: GobjId,
        authz: &str,
        kw: &Kw,
        src: Option<GobjId>,
    ) -> bool {
        let checker = self
            .gclass(id)
            .and_then(|c| c.gmt.mt_authz_checker.clone())
            .or_else(|| self.global_authz_checker.clone());
        let allowed = match checker {
            Some(cb) => cb(self, id, authz, kw, src),
            None => true,
        };
        if self.trace_level_of(id) & TRACE_AUTHZS != 0 {
            log::debug!(
                "🔑 authz '{}' on {}: {}",
                authz,
                self.short_name(id),
                if allowed { "allowed" } else { "DENIED" }
            );
        }
        allowed
    }

    /// Authenticate a requester. With no parser installed the answer is a
    /// success naming the OS user — local-only behavior, be careful.
    pub fn authenticate(&mut self, id: GobjId, kw: Kw, src: Option<GobjId>) -> Value {
        let parser = self
            .gclass(id)
            .and_then(|c| c.gmt.mt_authenticate.clone())
            .or_else(|| self.global_authenticate_parser.clone());
        match parser {
            Some(cb) => cb(self, id, kw, src),
            None => {
                let mut webix = build_webix(0, None, Value::Null, Value::Null);
                if let Some(map) = webix.as_object_mut() {
                    map.insert("username".to_string(), json!(util::os_user()));
                }
                webix
            }
        }
    }

    /// Webix doc of authz tables: global plus per-service, filterable by
    /// "authz" and "service" keys of the kw.
    pub fn build_authzs_doc(&mut self, _gobj: GobjId, kw: Kw) -> Value {
        let authz = kw_get_str(&kw, "authz", "").to_string();
        let service = kw_get_str(&kw, "service", "").to_string();

        if !service.is_empty() {
            let Some(service_gobj) = self.find_service(&service) else {
                return build_webix(
                    -1,
                    Some(format!("Service not found: '{}'", service)),
                    Value::Null,
                    Value::Null,
                );
            };
            let Some(jn_authzs) = self.authzs_list(Some(service_gobj), &authz) else {
                let comment = if authz.is_empty() {
                    format!("Service without authzs table: '{}'", service)
                } else {
                    format!("Authz not found: '{}' in service: '{}'", authz, service)
                };
                return build_webix(-1, Some(comment), Value::Null, Value::Null);
            };
            return build_webix(0, None, Value::Null, jn_authzs);
        }

        let mut out = Kw::new();
        out.insert(
            "global authzs".to_string(),
            self.authzs_list(None, &authz).unwrap_or(Value::Null),
        );
        for name in self.services() {
            if let Some(svc) = self.find_service(&name) {
                let has_table = self
                    .gclass(svc)
                    .map(|c| !c.authz_table.is_empty())
                    .unwrap_or(false);
                if has_table {
                    out.insert(
                        name,
                        self.authzs_list(Some(svc), &authz).unwrap_or(Value::Null),
                    );
                }
            }
        }
        build_webix(0, None, Value::Null, Value::Object(out))
    }

    /// Build the parameter kw of an authorization request from its
    /// schema: kw values first, then declared defaults.
    pub fn build_authz_kw(
        &self,
        id: GobjId,
        authz: &str,
        kw: &Kw,
    ) -> Result<Kw, String> {
        let table = self
            .gclass(id)
            .map(|c| c.authz_table.clone())
            .unwrap_or_default();
        let desc = match authz_get_level_desc(&table, authz) {
            Some(d) => d.clone(),
            None => match authz_get_level_desc(&self.global_authzs, authz) {
                Some(d) => d.clone(),
                None => return Err(format!("authz '{}' not found", authz)),
            },
        };
        let mut out = Kw::new();
        for p in &desc.params {
            if p.flag & SDF_NOTACCESS != 0 {
                continue;
            }
            if let Some(v) = kw.get(&p.name) {
                out.insert(p.name.clone(), v.clone());
            } else if let Some(d) = &p.default {
                out.insert(p.name.clone(), json!(d));
            }
        }
        Ok(out)
    }
}

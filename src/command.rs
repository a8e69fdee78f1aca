//! command — schema-driven command dispatch.
//!
//! A command arrives as a line "name arg1 arg2 key3=val3 ..." plus an
//! optional kw with pre-parsed parameters. The schema entry either has a
//! direct handler (returns a webix envelope) or redirects to an FSM event
//! named by its first alias, answering Null ("asynchronous response").

use log::debug;
use serde_json::{json, Value};

use crate::consts::AUTHZ_EXECUTE_COMMAND;
use crate::error::GobjError;
use crate::kw::{kw_update_missing, Kw};
use crate::runtime::{GobjId, Runtime};
use crate::schema::{
    sdf_flag_names, CmdDesc, ParamDesc, SdType, SDF_NOTACCESS, SDF_PERSIST, SDF_REQUIRED,
    SDF_WILD_CMD,
};
use crate::trace::TRACE_EV_KW;

/// The `{result, comment, schema, data}` reply shape of commands, stats
/// and authentication.
pub fn build_webix(result: i64, comment: Option<String>, schema: Value, data: Value) -> Value {
    json!({
        "result": result,
        "comment": comment.map(Value::String).unwrap_or(Value::Null),
        "schema": schema,
        "data": data,
    })
}

// ---- Tokenizer ----

/// Take the next blank-separated token; single quotes group.
fn next_token<'a>(input: &mut &'a str) -> Option<&'a str> {
    let s = input.trim_start();
    if s.is_empty() {
        *input = s;
        return None;
    }
    if let Some(stripped) = s.strip_prefix('\'') {
        match stripped.find('\'') {
            Some(end) => {
                let tok = &stripped[..end];
                *input = &stripped[end + 1..];
                return Some(tok);
            }
            None => {
                *input = "";
                return Some(stripped);
            }
        }
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    let tok = &s[..end];
    *input = &s[end..];
    Some(tok)
}

/// Split "key=value", honoring a quoted value ('...' kept whole).
fn split_key_value(tok: &str, rest: &mut &str) -> Option<(String, String)> {
    let eq = tok.find('=')?;
    let key = tok[..eq].to_string();
    let mut value = tok[eq + 1..].to_string();
    // 'quoted value with blanks': the token splitter stopped early
    if value.starts_with('\'') {
        value.remove(0);
        if let Some(end) = value.find('\'') {
            value.truncate(end);
        } else {
            let tail = *rest;
            match tail.find('\'') {
                Some(end) => {
                    value.push_str(&tail[..end]);
                    *rest = &tail[end + 1..];
                }
                None => {
                    value.push_str(tail);
                    *rest = "";
                }
            }
        }
    }
    Some((key, value))
}

/// Typed parse of a textual parameter.
fn parameter2json(gobj_label: &str, ty: SdType, name: &str, s: &str) -> Result<Value, String> {
    match ty {
        SdType::Str => Ok(Value::String(s.to_string())),
        SdType::Bool => {
            if s.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if s.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(s.trim().parse::<i64>().unwrap_or(0) != 0))
            }
        }
        SdType::I32 | SdType::U32 | SdType::I64 | SdType::U64 | SdType::Pointer => {
            Ok(json!(s.trim().parse::<i64>().unwrap_or(0)))
        }
        SdType::Real => Ok(json!(s.trim().parse::<f64>().unwrap_or(0.0))),
        SdType::Json | SdType::List | SdType::Iter => match serde_json::from_str::<Value>(s) {
            Ok(v) => Ok(v),
            Err(_) => Ok(Value::String(s.to_string())),
        },
        #[allow(unreachable_patterns)]
        _ => Err(format!(
            "{}: type '{}' of parameter '{}' is unknown",
            gobj_label,
            ty.name(),
            name
        )),
    }
}

fn find_ip_parameter<'a>(params: &'a [ParamDesc], key: &str) -> Option<&'a ParamDesc> {
    params.iter().find(|p| p.name.eq_ignore_ascii_case(key))
}

/// Find a command descriptor by name or alias. Aliases take precedence
/// when the entry has no direct handler (the redirect-to-event
/// combination); otherwise name first, then aliases.
pub fn get_cmd_desc<'a>(command_table: &'a [CmdDesc], cmd: &str) -> Option<&'a CmdDesc> {
    for desc in command_table {
        if desc.name.is_empty() {
            continue; // separator/title row
        }
        let mut alias_checked = false;
        if desc.handler.is_none() && !desc.alias.is_empty() {
            alias_checked = true;
            if desc.alias.iter().any(|a| a.eq_ignore_ascii_case(cmd)) {
                return Some(desc);
            }
        }
        if desc.name.eq_ignore_ascii_case(cmd) {
            return Some(desc);
        }
        if !alias_checked && desc.alias.iter().any(|a| a.eq_ignore_ascii_case(cmd)) {
            return Some(desc);
        }
    }
    None
}

/// Build the command kw from the positional line and the incoming kw.
/// On failure returns a descriptive message.
pub fn build_cmd_kw(
    gobj_label: &str,
    desc: &CmdDesc,
    parameters: &str,
    kw: &Kw,
) -> Result<Kw, String> {
    let wild = desc.flag & SDF_WILD_CMD != 0;
    let mut kw_cmd = Kw::new();
    let mut rest = parameters;

    if desc.params.is_empty() {
        kw_update_missing(&mut kw_cmd, kw);
        return Ok(kw_cmd);
    }

    // 1. Required parameters, positionally; fall back to the kw.
    let mut idx = 0;
    while idx < desc.params.len() {
        let ip = &desc.params[idx];
        if ip.flag & SDF_NOTACCESS != 0 {
            idx += 1;
            continue;
        }
        if ip.flag & SDF_REQUIRED == 0 {
            break;
        }
        match next_token(&mut rest) {
            None => match kw.get(&ip.name) {
                Some(v) => {
                    kw_cmd.insert(ip.name.clone(), v.clone());
                }
                None => {
                    return Err(format!(
                        "{}: command '{}', parameter '{}' is required",
                        gobj_label, desc.name, ip.name
                    ));
                }
            },
            Some(tok) if tok.contains('=') => {
                // already at key=value: the required one is missing
                return Err(format!(
                    "{}: required parameter '{}' not found",
                    gobj_label, ip.name
                ));
            }
            Some(tok) => {
                let v = parameter2json(gobj_label, ip.ty, &ip.name, tok)?;
                kw_cmd.insert(ip.name.clone(), v);
            }
        }
        idx += 1;
    }

    // 2. Remaining schema entries: kw value or declared default.
    while idx < desc.params.len() {
        let ip = &desc.params[idx];
        idx += 1;
        if ip.flag & SDF_NOTACCESS != 0 {
            continue;
        }
        if let Some(v) = kw.get(&ip.name) {
            // a string value for a non-string type is re-parsed
            if ip.ty != SdType::Str {
                if let Value::String(s) = v {
                    let parsed = parameter2json(gobj_label, ip.ty, &ip.name, s)?;
                    kw_cmd.insert(ip.name.clone(), parsed);
                    continue;
                }
            }
            kw_cmd.insert(ip.name.clone(), v.clone());
            continue;
        }
        if let Some(default) = &ip.default {
            let v = parameter2json(gobj_label, ip.ty, &ip.name, default)?;
            kw_cmd.insert(ip.name.clone(), v);
        }
    }

    // 3. key=value leftovers from the line.
    loop {
        let save = rest;
        let Some(tok) = next_token(&mut rest) else {
            break;
        };
        if !tok.contains('=') {
            rest = save;
            break;
        }
        let Some((key, value)) = split_key_value(tok, &mut rest) else {
            return Err(format!(
                "{}: command '{}', optional parameters must be with key=value format ('{}=?')",
                gobj_label, desc.name, tok
            ));
        };
        let v = match find_ip_parameter(&desc.params, &key) {
            Some(ip) => parameter2json(gobj_label, ip.ty, &ip.name, &value)?,
            None => {
                if wild {
                    parameter2json(gobj_label, SdType::Str, "wild-option", &value)?
                } else {
                    return Err(format!(
                        "{}: '{}' command has no option '{}'",
                        gobj_label, desc.name, key
                    ));
                }
            }
        };
        kw_cmd.insert(key, v);
    }

    // 4. Unconsumed leftovers are errors.
    if !rest.trim().is_empty() {
        return Err(format!(
            "{}: command '{}' with extra parameters: '{}'",
            gobj_label,
            desc.name,
            rest.trim()
        ));
    }

    // 5. The incoming kw completes the missing keys.
    kw_update_missing(&mut kw_cmd, kw);
    Ok(kw_cmd)
}

impl Runtime {
    /// Execute a command against a gobj. Returns the webix envelope, or
    /// Null when the command was redirected to an FSM event
    /// (asynchronous response pending).
    pub fn command(&mut self, id: GobjId, command: &str, kw: Kw, src: Option<GobjId>) -> Value {
        let Some(gclass) = self.gclass(id) else {
            return build_webix(
                -1,
                Some("gobj NULL or DESTROYED".to_string()),
                Value::Null,
                Value::Null,
            );
        };

        if let Some(cb) = self.audit_cb.clone() {
            cb(command, &kw);
        }

        // AUTHZ: only meaningful when some checker is installed.
        if self.global_authz_checker.is_some() || gclass.gmt.mt_authz_checker.is_some() {
            let kw_authz = crate::kw::kw(json!({
                "command": command,
                "kw": Value::Object(kw.clone()),
            }));
            if !self.user_has_authz(id, AUTHZ_EXECUTE_COMMAND, &kw_authz, src) {
                return build_webix(
                    -403,
                    Some("No permission to execute command".to_string()),
                    Value::Null,
                    Value::Null,
                );
            }
        }

        // User command parser has preference over the command table.
        if let Some(cb) = gclass.gmt.mt_command_parser.clone() {
            return cb(self, id, command, kw, src);
        }
        if gclass.commands.is_empty() {
            if let Some(cb) = self.global_command_parser.clone() {
                return cb(self, id, command, kw, src);
            }
            return build_webix(
                -1,
                Some(format!("{}: no command table", self.short_name(id))),
                Value::Null,
                Value::Null,
            );
        }

        let mut line = command;
        let Some(cmd_name) = next_token(&mut line) else {
            return build_webix(-15, Some("No command".to_string()), Value::Null, Value::Null);
        };
        let Some(desc) = get_cmd_desc(&gclass.commands, cmd_name) else {
            return build_webix(
                -15,
                Some(format!(
                    "{}: command '{}' not available. Try 'help' command.",
                    self.short_name(id),
                    cmd_name
                )),
                Value::Null,
                Value::Null,
            );
        };
        let desc = desc.clone();

        let kw_cmd = match build_cmd_kw(&self.short_name(id), &desc, line, &kw) {
            Ok(kw_cmd) => kw_cmd,
            Err(msg) => return build_webix(-14, Some(msg), Value::Null, Value::Null),
        };
        if self.trace_level_of(id) & TRACE_EV_KW != 0 {
            debug!("expanded_command: kw_cmd {}", Value::Object(kw_cmd.clone()));
        }

        match desc.handler.clone() {
            Some(handler) => handler(self, id, &desc.name, kw_cmd, src),
            None => {
                // Redirect the command to an event.
                let event = desc
                    .alias
                    .first()
                    .cloned()
                    .unwrap_or_else(|| desc.name.clone());
                self.send_event(id, &event, kw_cmd, src);
                Value::Null // asynchronous response
            }
        }
    }

    /// Descriptor lookup, alias-aware.
    pub fn command_desc(&self, id: GobjId, command: &str) -> Option<CmdDesc> {
        let gclass = self.gclass(id)?;
        get_cmd_desc(&gclass.commands, command).cloned()
    }

    /// Textual documentation of the command table. kw keys: "cmd"
    /// (single-command extended help) and "level" (include children).
    pub fn build_cmds_doc(&self, id: GobjId, kw: Kw) -> Result<Value, GobjError> {
        let gclass = self
            .gclass(id)
            .ok_or_else(|| GobjError::Param("gobj NULL or DESTROYED".to_string()))?;
        let level = kw.get("level").and_then(Value::as_i64).unwrap_or(0);
        let cmd = kw.get("cmd").and_then(Value::as_str).unwrap_or("");

        if !cmd.is_empty() {
            if let Some(desc) = get_cmd_desc(&gclass.commands, cmd) {
                return Ok(Value::String(single_cmd_doc(cmd, desc)));
            }
            if level != 0 {
                for child in self.childs(id) {
                    if let Some(cg) = self.gclass(child) {
                        if let Some(desc) = get_cmd_desc(&cg.commands, cmd) {
                            return Ok(Value::String(single_cmd_doc(cmd, desc)));
                        }
                    }
                }
            }
            return Ok(Value::String(format!(
                "{}: command '{}' not available.\n",
                self.short_name(id),
                cmd
            )));
        }

        let mut out = String::new();
        out.push_str("Available commands\n");
        out.push_str("==================\n");
        if !gclass.commands.is_empty() {
            out.push_str(&format!("\n> {}\n", self.short_name(id)));
            for desc in &gclass.commands {
                table_row(&mut out, desc);
            }
        }
        if level != 0 {
            for child in self.childs(id) {
                if let Some(cg) = self.gclass(child) {
                    if !cg.commands.is_empty() {
                        out.push_str(&format!("\n> {}\n", self.short_name(child)));
                        for desc in &cg.commands {
                            table_row(&mut out, desc);
                        }
                    }
                }
            }
        }
        Ok(Value::String(out))
    }
}

fn table_row(out: &mut String, desc: &CmdDesc) {
    if desc.name.is_empty() {
        // Separator row: a title if the description is set, else a blank.
        if !desc.description.is_empty() {
            out.push_str(&desc.description);
        }
        out.push('\n');
        return;
    }
    add_command_help(out, desc, false);
}

fn add_command_help(out: &mut String, desc: &CmdDesc, extended: bool) {
    if !desc.alias.is_empty() {
        out.push_str(&format!("- {:<28} ({})", desc.name, desc.alias.join(", ")));
    } else {
        out.push_str(&format!("- {:<28}", desc.name));
    }
    let mut any_param = false;
    for p in &desc.params {
        if p.flag & SDF_REQUIRED != 0 && p.flag & SDF_PERSIST == 0 {
            out.push_str(&format!(" <{}>", p.name));
        } else {
            out.push_str(&format!(
                " [{}='{}']",
                p.name,
                p.default.as_deref().unwrap_or("?")
            ));
        }
        any_param = true;
    }
    if any_param {
        out.push_str(&format!(". {}\n", desc.description));
    } else {
        out.push_str(&format!(" {}\n", desc.description));
    }

    if extended {
        out.push('\n');
        for p in &desc.params {
            out.push_str(&format!(
                "    - {:<16} Type:{:<8}, Desc:{:<35}, Flag:{}\n",
                p.name,
                p.ty.name(),
                p.description,
                sdf_flag_names(p.flag)
            ));
        }
    }
}

fn single_cmd_doc(cmd: &str, desc: &CmdDesc) -> String {
    let mut out = String::new();
    out.push_str(cmd);
    out.push('\n');
    out.push_str(&"=".repeat(cmd.len()));
    out.push('\n');
    if !desc.description.is_empty() {
        out.push_str(&desc.description);
        out.push('\n');
    }
    add_command_help(&mut out, desc, true);
    out.push('\n');
    out
}

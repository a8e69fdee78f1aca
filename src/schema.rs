//! schema — sdata-style declarative descriptors.
//!
//! One descriptor family serves three tables of a gclass:
//! - attribute schema (`AttrDesc`): typed fields with flags and defaults
//! - command table (`CmdDesc` + `ParamDesc`): parsed "cmd a b k=v" input
//! - authz table (`AuthzDesc` + `ParamDesc`): authorization levels

use serde_json::Value;

use crate::gclass::CmdFn;

/// Semantic attribute/parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdType {
    Str,
    Bool,
    I32,
    U32,
    I64,
    U64,
    Real,
    Json,
    /// Opaque handle stored as integer (gobj ids cross kw as u64).
    Pointer,
    List,
    Iter,
}

impl SdType {
    pub fn name(self) -> &'static str {
        match self {
            SdType::Str => "string",
            SdType::Bool => "boolean",
            SdType::I32 => "int32",
            SdType::U32 => "uint32",
            SdType::I64 => "int64",
            SdType::U64 => "uint64",
            SdType::Real => "real",
            SdType::Json => "json",
            SdType::Pointer => "pointer",
            SdType::List => "list",
            SdType::Iter => "iter",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            SdType::I32 | SdType::U32 | SdType::I64 | SdType::U64 | SdType::Pointer
        )
    }
}

// ---- Flags (SDF_*) ----

pub const SDF_RD: u32 = 0x0001; // readable (public)
pub const SDF_WR: u32 = 0x0002; // writable (public)
pub const SDF_REQUIRED: u32 = 0x0004; // must be set before start
pub const SDF_PERSIST: u32 = 0x0008; // saved/loaded by the persistent store
pub const SDF_STATS: u32 = 0x0010; // statistic attr, nearest service notified
pub const SDF_VOLATIL: u32 = 0x0020; // reset to default on demand
pub const SDF_RSTATS: u32 = 0x0040; // resettable statistic
pub const SDF_PSTATS: u32 = 0x0080; // persistent statistic
pub const SDF_PUBLIC: u32 = 0x0100; // exported in public views
pub const SDF_AUTHZ_R: u32 = 0x0200; // read gated by __read_attribute__
pub const SDF_AUTHZ_W: u32 = 0x0400; // write gated by __write_attribute__
pub const SDF_NOTACCESS: u32 = 0x0800; // hidden from parsers
pub const SDF_WILD_CMD: u32 = 0x1000; // command accepts any key=value

pub const ATTR_WRITABLE: u32 = SDF_WR | SDF_PERSIST;
pub const ATTR_READABLE: u32 =
    SDF_RD | SDF_WR | SDF_PERSIST | SDF_STATS | SDF_VOLATIL | SDF_RSTATS | SDF_PSTATS;

/// Render a flag set for doc output, "rd|wr|persist" style.
pub fn sdf_flag_names(flag: u32) -> String {
    const NAMES: &[(u32, &str)] = &[
        (SDF_RD, "rd"),
        (SDF_WR, "wr"),
        (SDF_REQUIRED, "required"),
        (SDF_PERSIST, "persist"),
        (SDF_STATS, "stats"),
        (SDF_VOLATIL, "volatil"),
        (SDF_RSTATS, "rstats"),
        (SDF_PSTATS, "pstats"),
        (SDF_PUBLIC, "public"),
        (SDF_AUTHZ_R, "authz-r"),
        (SDF_AUTHZ_W, "authz-w"),
        (SDF_NOTACCESS, "notaccess"),
        (SDF_WILD_CMD, "wild"),
    ];
    let mut out = Vec::new();
    for (bit, name) in NAMES {
        if flag & bit != 0 {
            out.push(*name);
        }
    }
    out.join("|")
}

// ---- Attribute descriptor ----

#[derive(Debug, Clone)]
pub struct AttrDesc {
    pub name: String,
    pub ty: SdType,
    pub flag: u32,
    pub default: Value,
    pub description: String,
}

/// Shorthand constructor for attribute schemas.
pub fn attr(name: &str, ty: SdType, flag: u32, default: Value, description: &str) -> AttrDesc {
    AttrDesc {
        name: name.to_string(),
        ty,
        flag,
        default,
        description: description.to_string(),
    }
}

// ---- Command / authz descriptors ----

#[derive(Debug, Clone)]
pub struct ParamDesc {
    pub name: String,
    pub ty: SdType,
    pub flag: u32,
    /// Textual default, parsed against `ty` when used.
    pub default: Option<String>,
    pub description: String,
}

pub fn param(name: &str, ty: SdType, flag: u32, default: Option<&str>, description: &str) -> ParamDesc {
    ParamDesc {
        name: name.to_string(),
        ty,
        flag,
        default: default.map(|s| s.to_string()),
        description: description.to_string(),
    }
}

#[derive(Clone)]
pub struct CmdDesc {
    /// Empty name marks a separator/title row in the doc listing.
    pub name: String,
    pub alias: Vec<String>,
    pub params: Vec<ParamDesc>,
    pub flag: u32,
    pub description: String,
    /// Direct handler. None turns the entry into a redirect: the command
    /// becomes an FSM event named by the first alias (or the entry name).
    pub handler: Option<CmdFn>,
}

impl std::fmt::Debug for CmdDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdDesc")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("params", &self.params)
            .field("flag", &self.flag)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

pub fn cmd(
    name: &str,
    alias: &[&str],
    params: Vec<ParamDesc>,
    flag: u32,
    description: &str,
    handler: Option<CmdFn>,
) -> CmdDesc {
    CmdDesc {
        name: name.to_string(),
        alias: alias.iter().map(|s| s.to_string()).collect(),
        params,
        flag,
        description: description.to_string(),
        handler,
    }
}

#[derive(Debug, Clone)]
pub struct AuthzDesc {
    pub name: String,
    pub alias: Vec<String>,
    pub params: Vec<ParamDesc>,
    pub description: String,
}

pub fn authz(name: &str, alias: &[&str], params: Vec<ParamDesc>, description: &str) -> AuthzDesc {
    AuthzDesc {
        name: name.to_string(),
        alias: alias.iter().map(|s| s.to_string()).collect(),
        params,
        description: description.to_string(),
    }
}

/// The reserved process-wide authz table.
pub fn global_authz_table() -> Vec<AuthzDesc> {
    use crate::consts::*;
    vec![
        authz(
            AUTHZ_READ_ATTRIBUTE,
            &[],
            vec![param("path", SdType::Str, 0, None, "attribute path")],
            "Authorization to read gobj's attributes",
        ),
        authz(
            AUTHZ_WRITE_ATTRIBUTE,
            &[],
            vec![param("path", SdType::Str, 0, None, "attribute path")],
            "Authorization to write gobj's attributes",
        ),
        authz(
            AUTHZ_EXECUTE_COMMAND,
            &[],
            vec![
                param("command", SdType::Str, 0, None, "command"),
                param("kw", SdType::Json, 0, None, "command kw"),
            ],
            "Authorization to execute gobj's commands",
        ),
        authz(
            AUTHZ_INJECT_EVENT,
            &[],
            vec![],
            "Authorization to inject events to gobj",
        ),
        authz(
            AUTHZ_SUBSCRIBE_EVENT,
            &[],
            vec![
                param("event", SdType::Str, 0, None, "event"),
                param("kw", SdType::Json, 0, None, "subscription kw"),
            ],
            "Authorization to subscribe events of gobj",
        ),
        authz(
            AUTHZ_READ_STATS,
            &[],
            vec![
                param("stats", SdType::Str, 0, None, "stats"),
                param("kw", SdType::Json, 0, None, "stats kw"),
            ],
            "Authorization to read gobj's stats",
        ),
        authz(
            AUTHZ_RESET_STATS,
            &[],
            vec![
                param("stats", SdType::Str, 0, None, "stats"),
                param("kw", SdType::Json, 0, None, "stats kw"),
            ],
            "Authorization to reset gobj's stats",
        ),
    ]
}

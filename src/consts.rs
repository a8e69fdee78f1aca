//! Reserved names and hard limits of the kernel.

/// Max length of a gobj name in bytes.
pub const GOBJ_NAME_MAX: usize = 48;

/// Max length of an event name in the inter-event codec.
pub const EVENT_NAME_MAX: usize = 63;

/// System event published by the engine on every committed transition.
pub const EV_STATE_CHANGED: &str = "__EV_STATE_CHANGED__";

/// Characters forbidden in gobj names.
pub const GOBJ_NAME_FORBIDDEN: &[char] = &['`', '^'];

/// Characters forbidden in gclass names.
pub const GCLASS_NAME_FORBIDDEN: &[char] = &['`', '^', '.'];

// ---- Reserved global authz names ----

pub const AUTHZ_READ_ATTRIBUTE: &str = "__read_attribute__";
pub const AUTHZ_WRITE_ATTRIBUTE: &str = "__write_attribute__";
pub const AUTHZ_EXECUTE_COMMAND: &str = "__execute_command__";
pub const AUTHZ_INJECT_EVENT: &str = "__inject_event__";
pub const AUTHZ_SUBSCRIBE_EVENT: &str = "__subscribe_event__";
pub const AUTHZ_READ_STATS: &str = "__read_stats__";
pub const AUTHZ_RESET_STATS: &str = "__reset_stats__";

// ---- Built-in process variables (config expansion, global variables) ----

pub const VAR_NODE_OWNER: &str = "__node_owner__";
pub const VAR_REALM_ID: &str = "__realm_id__";
pub const VAR_REALM_OWNER: &str = "__realm_owner__";
pub const VAR_REALM_ROLE: &str = "__realm_role__";
pub const VAR_REALM_NAME: &str = "__realm_name__";
pub const VAR_REALM_ENV: &str = "__realm_env__";
pub const VAR_YUNO_ROLE: &str = "__yuno_role__";
pub const VAR_YUNO_NAME: &str = "__yuno_name__";
pub const VAR_YUNO_TAG: &str = "__yuno_tag__";
pub const VAR_YUNO_ROLE_PLUS_NAME: &str = "__yuno_role_plus_name__";
pub const VAR_HOSTNAME: &str = "__hostname__";

/// Key of the substitution table inside the global settings.
pub const JSON_CONFIG_VARIABLES: &str = "__json_config_variables__";

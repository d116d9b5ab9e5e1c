use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{GateError, Result};

/// How the producer treats authorization for incoming queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Trust the client; queries run as-is after the default-schema stamp.
    Complete,
    /// Enforce the policy store and weave row filters into queries.
    Restricted,
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::Restricted
    }
}

/// One static username/password pair. Passwords are hashed at load time and
/// never kept in clear text past configuration parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    /// Login name, also the JWT `sub` claim.
    pub username: String,
    /// Clear-text password as written in the config file.
    pub password: String,
}

/// Kind of object an access rule grants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectKind {
    /// A catalog table addressed as `database.schema.table`.
    #[serde(rename = "BASE_TABLE", alias = "TABLE", alias = "BASE TABLE")]
    BaseTable,
    /// A table-function invocation such as `read_parquet(path)`.
    #[serde(rename = "TABLE_FUNCTION")]
    TableFunction,
}

/// One rule in the access policy: a principal may read an object, optionally
/// only the rows satisfying `filter`, until `expiration`.
///
/// The same shape deserializes from the static TOML configuration
/// (kebab-case keys) and from the remote resolve document (camelCase keys);
/// unknown fields in either source are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccessRule {
    /// User or group name the rule applies to. Absent on rows returned by
    /// the resolve endpoint, which are already scoped to the caller.
    #[serde(default)]
    pub principal: Option<String>,
    /// Catalog the rule is scoped to, for base tables.
    #[serde(default)]
    pub database: Option<String>,
    /// Schema the rule is scoped to, for base tables.
    #[serde(default)]
    pub schema: Option<String>,
    /// Table name (exact or glob-suffix) or path prefix/glob.
    #[serde(default, alias = "tableOrPath")]
    pub table_or_path: Option<String>,
    /// What kind of object this row grants.
    #[serde(default = "default_object_kind", alias = "tableType")]
    pub object_kind: ObjectKind,
    /// Column restriction; empty means all columns.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Row filter as a SQL WHERE fragment.
    #[serde(default)]
    pub filter: Option<String>,
    /// Table-function name for function-name matches.
    #[serde(default, alias = "functionName")]
    pub function_name: Option<String>,
    /// `YYYY-MM-DD` (datetime prefixes accepted); expired rows never match.
    #[serde(default)]
    pub expiration: Option<String>,
}

fn default_object_kind() -> ObjectKind {
    ObjectKind::BaseTable
}

/// Global server configuration shared across producer/engine/auth layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// gRPC listen port.
    pub port: u16,
    /// Authorization mode.
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Directory under which ingest writes land.
    #[serde(default = "default_warehouse_path")]
    pub warehouse_path: String,
    /// Default catalog for unqualified names when the client sends none.
    #[serde(default = "default_database")]
    pub database: String,
    /// Default schema for unqualified names when the client sends none.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Rows per batch when the client does not send `fetch-size`.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Static password store.
    #[serde(default)]
    pub users: Vec<UserCredential>,
    /// Group membership used when matching rule principals.
    #[serde(default)]
    pub user_groups: HashMap<String, Vec<String>>,
    /// Static access policy rows.
    #[serde(default)]
    pub access_rules: Vec<AccessRule>,
    /// Base login URL; the resolve URL derives from it.
    #[serde(default, alias = "login_url")]
    pub login_url: Option<String>,
    /// HS256 signing secret; generated per run when absent.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Statements executed once against the root engine connection at
    /// startup (ATTACH, CREATE SCHEMA, ...).
    #[serde(default)]
    pub init_sql: Vec<String>,
}

fn default_warehouse_path() -> String {
    "./duckgate_warehouse".to_string()
}

fn default_database() -> String {
    "memory".to_string()
}

fn default_schema() -> String {
    "main".to_string()
}

fn default_fetch_size() -> usize {
    crate::headers::DEFAULT_FETCH_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 50550,
            access_mode: AccessMode::default(),
            warehouse_path: default_warehouse_path(),
            database: default_database(),
            schema: default_schema(),
            fetch_size: default_fetch_size(),
            users: Vec::new(),
            user_groups: HashMap::new(),
            access_rules: Vec::new(),
            login_url: None,
            jwt_secret: None,
            init_sql: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a `.toml` or `.json` file.
    pub fn load(path: &str) -> Result<Self> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let s = fs::read_to_string(path)?;
                toml::from_str(&s).map_err(|e| GateError::BadRequest(format!("config parse failed: {e}")))
            }
            Some("json") => {
                let s = fs::read_to_string(path)?;
                serde_json::from_str(&s)
                    .map_err(|e| GateError::BadRequest(format!("config parse failed: {e}")))
            }
            Some(other) => Err(GateError::BadRequest(format!(
                "unsupported config extension '.{other}'; use .toml or .json"
            ))),
            None => Err(GateError::BadRequest(
                "config path must include extension .toml or .json".to_string(),
            )),
        }
    }

    /// Groups the given user belongs to.
    pub fn groups_of(&self, user: &str) -> Vec<String> {
        self.user_groups.get(user).cloned().unwrap_or_default()
    }

    /// Resolve URL derived from `login_url` by replacing a trailing
    /// `/login` with `/resolve` (else appending `/resolve`).
    pub fn resolve_url(&self) -> Option<String> {
        let login = self.login_url.as_deref()?;
        let login = login.trim_end_matches('/');
        Some(match login.strip_suffix("/login") {
            Some(base) => format!("{base}/resolve"),
            None => format!("{login}/resolve"),
        })
    }
}

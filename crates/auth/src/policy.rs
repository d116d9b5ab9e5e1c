//! Access policy stores: who may read which tables, paths, and functions.

use async_trait::async_trait;
use duckgate_common::{AccessRule, GateError, ObjectKind, Result};
use serde::Deserialize;

use crate::identity::Identity;
use duckgate_sql::{TableKind, TableRef};

/// Source of access rows for an authorization decision.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Rows that may apply to this identity. Matching against individual
    /// references happens in [`find_matching_row`].
    async fn rows_for(&self, identity: &Identity) -> Result<Vec<AccessRule>>;
}

/// Policy store loaded from server configuration at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicyStore {
    rules: Vec<AccessRule>,
}

impl StaticPolicyStore {
    /// Build the store from configured rules.
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn rows_for(&self, identity: &Identity) -> Result<Vec<AccessRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|rule| match &rule.principal {
                Some(principal) => identity.matches_principal(principal),
                None => false,
            })
            .cloned()
            .collect())
    }
}

/// Document returned by the resolve endpoint.
#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    tables: Vec<AccessRule>,
    #[serde(default)]
    functions: Vec<AccessRule>,
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
}

/// Policy store that asks a remote resolve endpoint on every decision,
/// forwarding the caller's original bearer token. Any transport error,
/// non-200 status, or malformed body is an authorization failure — never an
/// allow. No caching.
pub struct RemotePolicyStore {
    resolve_url: String,
    client: reqwest::Client,
}

impl RemotePolicyStore {
    /// Store resolving against the given URL (see
    /// [`duckgate_common::ServerConfig::resolve_url`]).
    pub fn new(resolve_url: String) -> Self {
        Self {
            resolve_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PolicyStore for RemotePolicyStore {
    async fn rows_for(&self, identity: &Identity) -> Result<Vec<AccessRule>> {
        let bearer = identity.bearer_token().ok_or_else(|| {
            GateError::Unauthorized(
                "no bearer token available for redirect authorization".to_string(),
            )
        })?;

        let response = self
            .client
            .get(&self.resolve_url)
            .header("Authorization", format!("Bearer {bearer}"))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %self.resolve_url, error = %e, "resolve endpoint unreachable");
                GateError::Unauthorized(format!("failed to resolve access: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(GateError::Unauthorized(format!(
                "resolve endpoint returned status {}",
                response.status().as_u16()
            )));
        }

        let document: ResolveResponse = response.json().await.map_err(|e| {
            GateError::Unauthorized(format!("malformed resolve response: {e}"))
        })?;

        let mut rows = document.tables;
        for row in &mut rows {
            row.object_kind = ObjectKind::BaseTable;
        }
        let mut functions = document.functions;
        for row in &mut functions {
            row.object_kind = ObjectKind::TableFunction;
        }
        rows.extend(functions);
        Ok(rows)
    }
}

/// First non-expired row granting `table_ref` to `identity`, if any.
///
/// Matching:
/// - base tables: rule database and schema equal the reference's, and the
///   table name matches exactly or by glob-like prefix;
/// - table functions: the rule path is a prefix of the reference path, or
///   the rule function name equals the reference's.
pub fn find_matching_row<'r>(
    rows: &'r [AccessRule],
    table_ref: &TableRef,
) -> Option<&'r AccessRule> {
    rows.iter().find(|rule| {
        if is_expired(rule) {
            return false;
        }
        match (rule.object_kind, table_ref.kind) {
            (ObjectKind::BaseTable, TableKind::BaseTable) => {
                rule.database.as_deref() == table_ref.catalog.as_deref()
                    && rule.schema.as_deref() == table_ref.schema.as_deref()
                    && match (&rule.table_or_path, &table_ref.table_or_path) {
                        (Some(rule_table), Some(ref_table)) => {
                            name_matches(rule_table, ref_table)
                        }
                        _ => false,
                    }
            }
            (ObjectKind::TableFunction, TableKind::TableFunction) => {
                let path_match = match (&rule.table_or_path, &table_ref.table_or_path) {
                    (Some(rule_path), Some(ref_path)) => path_prefix_matches(rule_path, ref_path),
                    _ => false,
                };
                let function_match = match (&rule.function_name, &table_ref.function_name) {
                    (Some(rule_fn), Some(ref_fn)) => rule_fn.eq_ignore_ascii_case(ref_fn),
                    _ => false,
                };
                path_match || function_match
            }
            _ => false,
        }
    })
}

/// Exact table name, or a `prefix*` glob on the rule side.
fn name_matches(rule_table: &str, ref_table: &str) -> bool {
    match rule_table.strip_suffix('*') {
        Some(prefix) => ref_table.starts_with(prefix),
        None => rule_table == ref_table,
    }
}

/// Glob segments truncate the compared prefix on either side, so
/// `example/hive_table` grants `example/hive_table/*/*/*.parquet` and an
/// identical glob grants itself.
fn path_prefix_matches(rule_path: &str, ref_path: &str) -> bool {
    let rule_prefix = prefix_before_wildcard(rule_path);
    let ref_prefix = prefix_before_wildcard(ref_path);
    ref_prefix.starts_with(rule_prefix)
}

fn prefix_before_wildcard(path: &str) -> &str {
    match path.find(['*', '?', '[']) {
        Some(idx) => &path[..idx],
        None => path,
    }
}

fn is_expired(rule: &AccessRule) -> bool {
    let Some(expiration) = &rule.expiration else {
        return false;
    };
    let date_part = if expiration.len() >= 10 {
        &expiration[..10]
    } else {
        expiration.as_str()
    };
    match date_part.parse::<chrono::NaiveDate>() {
        Ok(date) => chrono::Utc::now().date_naive() > date,
        Err(_) => {
            tracing::warn!(expiration = %expiration, "unparseable rule expiration, treating as not expired");
            false
        }
    }
}

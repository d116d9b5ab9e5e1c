//! The authorizer: policy check plus row-filter weaving.

use duckgate_common::{GateError, Result};
use sqlparser::ast::Statement;

use crate::identity::Identity;
use crate::policy::{find_matching_row, PolicyStore};
use duckgate_sql::{
    add_filter_to_base_table, add_filter_to_table_function, all_tables_or_paths,
    compile_filter_string, with_updated_database_schema, HiveSpec, TableKind,
};

/// Callback inferring hive partition types for a path whose invocation does
/// not carry `hive_types`. Lives outside this crate so the AST layer and the
/// authorizer stay free of filesystem access.
pub type HiveProber<'a> = &'a (dyn Fn(&str) -> Option<HiveSpec> + Send + Sync);

/// Authorize `statement` for `identity` and rewrite it in place.
///
/// Every referenced table, path, and table function must have a matching
/// access row; the first matched row carrying a filter has that filter woven
/// back into the tree. On success the statement is also stamped with the
/// default catalog/schema.
pub async fn authorize(
    identity: &Identity,
    database: &str,
    schema: &str,
    statement: &mut Statement,
    store: &dyn PolicyStore,
    hive_prober: HiveProber<'_>,
) -> Result<()> {
    let refs = all_tables_or_paths(statement, database, schema)?;
    if refs.is_empty() {
        return Err(GateError::Unauthorized(
            "no table or path found in query".to_string(),
        ));
    }

    let rows = store.rows_for(identity).await?;

    // Authorize each reference; remember the first matched row carrying a
    // filter together with the reference it matched.
    let mut first_filtered = None;
    for table_ref in &refs {
        let matched = find_matching_row(&rows, table_ref).ok_or_else(|| {
            tracing::debug!(
                user = %identity.user,
                object = %table_ref.display_name(),
                "authorization denied"
            );
            GateError::Unauthorized(format!("no access to {}", table_ref.display_name()))
        })?;
        if first_filtered.is_none() {
            if let Some(filter) = &matched.filter {
                first_filtered = Some((filter.clone(), table_ref.clone()));
            }
        }
    }

    with_updated_database_schema(statement, database, schema)?;

    let Some((filter, table_ref)) = first_filtered else {
        return Ok(());
    };
    let compiled = compile_filter_string(&filter)?;

    match table_ref.kind {
        TableKind::BaseTable => add_filter_to_base_table(statement, compiled),
        TableKind::TableFunction => {
            let hive = match table_ref.function_name.as_deref() {
                Some("read_parquet") => table_ref
                    .hive_spec()
                    .or_else(|| table_ref.table_or_path.as_deref().and_then(hive_prober)),
                _ => None,
            };
            add_filter_to_table_function(statement, compiled, hive.as_ref())
        }
    }
}

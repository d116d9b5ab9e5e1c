//! Metadata SQL builders for the Flight SQL catalog RPCs.
//!
//! The catalog surface is answered by executing SQL over DuckDB's own
//! introspection functions and streaming the result like any other query.

/// SQL listing catalogs, one row per attached database.
pub fn catalogs_sql() -> String {
    "select distinct(database_name) as TABLE_CAT from duckdb_columns() order by database_name"
        .to_string()
}

/// SQL listing schemas, optionally filtered by exact catalog and a LIKE
/// pattern on the schema name.
pub fn schemas_sql(catalog: Option<&str>, schema_pattern: Option<&str>) -> String {
    let mut sql = String::from(
        "select distinct database_name as TABLE_CATALOG, schema_name as TABLE_SCHEM \
         from duckdb_columns()",
    );
    push_predicates(
        &mut sql,
        &[
            catalog.map(|c| format!("database_name = '{}'", escape(c))),
            schema_pattern.map(|p| format!("schema_name like '{}'", escape(p))),
        ],
    );
    sql.push_str(" order by database_name, schema_name");
    sql
}

/// SQL listing tables, optionally filtered by exact catalog and LIKE
/// patterns on schema and table names.
pub fn tables_sql(
    catalog: Option<&str>,
    schema_pattern: Option<&str>,
    table_pattern: Option<&str>,
) -> String {
    let mut sql = String::from(
        "select database_name as TABLE_CAT, schema_name as TABLE_SCHEM, \
         table_name as TABLE_NAME, 'BASE TABLE' as TABLE_TYPE from duckdb_tables()",
    );
    push_predicates(
        &mut sql,
        &[
            catalog.map(|c| format!("database_name = '{}'", escape(c))),
            schema_pattern.map(|p| format!("schema_name like '{}'", escape(p))),
            table_pattern.map(|p| format!("table_name like '{}'", escape(p))),
        ],
    );
    sql.push_str(" order by database_name, schema_name, table_name");
    sql
}

fn push_predicates(sql: &mut String, predicates: &[Option<String>]) {
    let mut first = true;
    for predicate in predicates.iter().flatten() {
        sql.push_str(if first { " where " } else { " and " });
        sql.push_str(predicate);
        first = false;
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

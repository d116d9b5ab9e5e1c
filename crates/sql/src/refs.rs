//! Reference extraction: every base table and table function a query reads.

use duckgate_common::{GateError, Result};
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, ObjectName, ObjectNamePart, Query, SetExpr, Statement,
    TableFactor, TableWithJoins, Value,
};

use crate::types::{SqlType, TableKind, TableRef};

/// Collect every base-table reference and table-function invocation reachable
/// from `statement`, walking `FROM` lists, joins, derived subqueries, set
/// operations, and CTE bodies. Unqualified base-table names are reported with
/// the supplied defaults substituted.
pub fn all_tables_or_paths(
    statement: &Statement,
    default_db: &str,
    default_schema: &str,
) -> Result<Vec<TableRef>> {
    let query = match statement {
        Statement::Query(query) => query,
        other => {
            return Err(GateError::BadRequest(format!(
                "expected a query statement, got: {other}"
            )))
        }
    };
    let mut out = Vec::new();
    walk_query(query, default_db, default_schema, &mut out);
    Ok(out)
}

fn walk_query(query: &Query, db: &str, schema: &str, out: &mut Vec<TableRef>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            walk_query(&cte.query, db, schema, out);
        }
    }
    walk_set_expr(&query.body, db, schema, out);
}

fn walk_set_expr(body: &SetExpr, db: &str, schema: &str, out: &mut Vec<TableRef>) {
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in &select.from {
                walk_table_with_joins(table_with_joins, db, schema, out);
            }
        }
        SetExpr::Query(query) => walk_query(query, db, schema, out),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, db, schema, out);
            walk_set_expr(right, db, schema, out);
        }
        _ => {}
    }
}

fn walk_table_with_joins(twj: &TableWithJoins, db: &str, schema: &str, out: &mut Vec<TableRef>) {
    walk_table_factor(&twj.relation, db, schema, out);
    for join in &twj.joins {
        walk_table_factor(&join.relation, db, schema, out);
    }
}

fn walk_table_factor(factor: &TableFactor, db: &str, schema: &str, out: &mut Vec<TableRef>) {
    match factor {
        TableFactor::Table { name, args, .. } => match args {
            Some(function_args) => out.push(function_ref(name, &function_args.args)),
            None => out.push(base_table_ref(name, db, schema)),
        },
        TableFactor::Derived { subquery, .. } => walk_query(subquery, db, schema, out),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => walk_table_with_joins(table_with_joins, db, schema, out),
        _ => {}
    }
}

fn base_table_ref(name: &ObjectName, db: &str, schema: &str) -> TableRef {
    let parts = object_name_strings(name);
    let (catalog, schema_name, table) = match parts.len() {
        0 => (None, None, String::new()),
        1 => (
            Some(db.to_string()),
            Some(schema.to_string()),
            parts[0].clone(),
        ),
        2 => (Some(db.to_string()), Some(parts[0].clone()), parts[1].clone()),
        _ => (
            Some(parts[0].clone()),
            Some(parts[1].clone()),
            parts[2].clone(),
        ),
    };
    TableRef {
        catalog,
        schema: schema_name,
        table_or_path: Some(table),
        kind: TableKind::BaseTable,
        function_name: None,
        hive_partitioning: false,
        hive_types: Vec::new(),
    }
}

fn function_ref(name: &ObjectName, args: &[FunctionArg]) -> TableRef {
    let function_name = object_name_strings(name)
        .last()
        .map(|n| n.to_ascii_lowercase());

    let mut path = None;
    let mut hive_partitioning = false;
    let mut hive_types = Vec::new();

    for arg in args {
        match named_arg(arg) {
            Some((name, value)) if name.eq_ignore_ascii_case("hive_partitioning") => {
                hive_partitioning = value.to_string().eq_ignore_ascii_case("true");
            }
            Some((name, value)) if name.eq_ignore_ascii_case("hive_types") => {
                hive_types = dictionary_types(value);
            }
            Some(_) => {}
            None => {
                // First positional string literal is the path argument.
                if path.is_none() {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) = arg {
                        if let Some(s) = string_literal(expr) {
                            path = Some(s.to_string());
                        }
                    }
                }
            }
        }
    }

    TableRef {
        catalog: None,
        schema: None,
        table_or_path: path,
        kind: TableKind::TableFunction,
        function_name,
        hive_partitioning,
        hive_types,
    }
}

/// Named argument as `(name, value expression)`, accepting both the parser's
/// named-argument form and the `name = value` binary form the DuckDB dialect
/// may produce inside argument lists.
pub(crate) fn named_arg(arg: &FunctionArg) -> Option<(&str, &Expr)> {
    match arg {
        FunctionArg::Named {
            name,
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Some((name.value.as_str(), expr)),
        FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::BinaryOp { left, op, right }))
            if op == &sqlparser::ast::BinaryOperator::Eq =>
        {
            match left.as_ref() {
                Expr::Identifier(ident) => Some((ident.value.as_str(), right.as_ref())),
                _ => None,
            }
        }
        _ => None,
    }
}

pub(crate) fn dictionary_types(expr: &Expr) -> Vec<(String, SqlType)> {
    match expr {
        Expr::Dictionary(fields) => fields
            .iter()
            .map(|field| {
                (
                    field.key.value.clone(),
                    SqlType::parse(&field.value.to_string()),
                )
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn string_literal(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn object_name_strings(name: &ObjectName) -> Vec<String> {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            #[allow(unreachable_patterns)]
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{first_statement, parse_sql};
    use crate::types::{SqlType, TableKind};

    fn refs_of(sql: &str) -> Vec<TableRef> {
        let stmt = first_statement(parse_sql(sql).expect("parse")).expect("first");
        all_tables_or_paths(&stmt, "producer_test_catalog", "test_schema").expect("refs")
    }

    #[test]
    fn collects_unqualified_base_table_with_defaults() {
        let refs = refs_of("SELECT * FROM test_table");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, TableKind::BaseTable);
        assert_eq!(refs[0].catalog.as_deref(), Some("producer_test_catalog"));
        assert_eq!(refs[0].schema.as_deref(), Some("test_schema"));
        assert_eq!(refs[0].table_or_path.as_deref(), Some("test_table"));
    }

    #[test]
    fn collects_qualified_base_table_verbatim() {
        let refs = refs_of("SELECT * FROM cat.sch.tbl");
        assert_eq!(refs[0].catalog.as_deref(), Some("cat"));
        assert_eq!(refs[0].schema.as_deref(), Some("sch"));
        assert_eq!(refs[0].table_or_path.as_deref(), Some("tbl"));
    }

    #[test]
    fn collects_table_function_with_path_and_hive_args() {
        let refs = refs_of(
            "select * from read_parquet('example/hive_table', hive_partitioning = true, hive_types = {'dt': DATE, 'p': VARCHAR})",
        );
        assert_eq!(refs.len(), 1);
        let r = &refs[0];
        assert_eq!(r.kind, TableKind::TableFunction);
        assert_eq!(r.function_name.as_deref(), Some("read_parquet"));
        assert_eq!(r.table_or_path.as_deref(), Some("example/hive_table"));
        assert!(r.hive_partitioning);
        assert_eq!(
            r.hive_types,
            vec![
                ("dt".to_string(), SqlType::Date),
                ("p".to_string(), SqlType::Varchar)
            ]
        );
    }

    #[test]
    fn collects_generate_series_without_path() {
        let refs = refs_of("SELECT * FROM generate_series(10)");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].function_name.as_deref(), Some("generate_series"));
        assert_eq!(refs[0].table_or_path, None);
    }

    #[test]
    fn walks_joins_ctes_and_subqueries() {
        let refs = refs_of(
            "with c as (select * from inner_table) \
             select * from c_outer join (select * from derived_table) d on true, read_delta('lake/t')",
        );
        let names: Vec<_> = refs.iter().map(TableRef::display_name).collect();
        assert!(names.iter().any(|n| n.contains("inner_table")));
        assert!(names.iter().any(|n| n.contains("c_outer")));
        assert!(names.iter().any(|n| n.contains("derived_table")));
        assert!(names.iter().any(|n| n.contains("read_delta")));
    }

    #[test]
    fn walks_union_branches() {
        let refs = refs_of("select * from a union all select * from b");
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn rejects_non_query_statements() {
        let stmt = first_statement(parse_sql("CREATE TABLE t (x INT)").expect("parse")).expect("first");
        assert!(all_tables_or_paths(&stmt, "db", "s").is_err());
    }
}

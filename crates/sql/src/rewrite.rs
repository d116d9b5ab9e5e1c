//! Tree rewrites: default stamping, row-filter weaving, hive hints, and
//! shard file substitution.
//!
//! Constructed nodes are produced by rendering SQL text and re-parsing it in
//! the same dialect, then splicing the resulting subtree. That keeps every
//! rewrite within shapes the parser itself produces.

use duckgate_common::{GateError, Result};
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, ObjectName, ObjectNamePart, Query, SetExpr, Statement,
    TableAlias, TableFactor, TableWithJoins,
};

use crate::parse::{first_statement, parse_sql};
use crate::refs::{named_arg, object_name_strings};
use crate::types::HiveSpec;

/// Stamp every unqualified base-table reference with the default catalog and
/// schema so downstream rewrites are unambiguous. Table functions and fully
/// qualified names are untouched.
pub fn with_updated_database_schema(statement: &mut Statement, db: &str, schema: &str) -> Result<()> {
    let query = query_mut(statement)?;
    visit_factors(query, &mut |factor| {
        if let TableFactor::Table {
            name, args: None, ..
        } = factor
        {
            let parts = object_name_strings(name);
            let stamped: Vec<String> = match parts.len() {
                1 => vec![db.to_string(), schema.to_string(), parts[0].clone()],
                2 => vec![db.to_string(), parts[0].clone(), parts[1].clone()],
                _ => return false,
            };
            *name = object_name(&stamped);
        }
        false
    });
    Ok(())
}

/// Wrap the first base-table reference in a filtered derived subquery,
/// aliased to the original name so outer column references keep resolving.
pub fn add_filter_to_base_table(statement: &mut Statement, filter: Expr) -> Result<()> {
    let query = query_mut(statement)?;
    let mut pending = Some(filter);
    let mut failure: Option<GateError> = None;

    visit_factors(query, &mut |factor| {
        if !matches!(
            factor,
            TableFactor::Table {
                args: None,
                ..
            }
        ) {
            return false;
        }
        let Some(filter) = pending.take() else {
            return true;
        };
        match wrap_in_filtered_subquery(factor, filter) {
            Ok(()) => {}
            Err(e) => failure = Some(e),
        }
        true
    });

    if let Some(e) = failure {
        return Err(e);
    }
    if pending.is_some() {
        return Err(GateError::BadRequest(
            "no base table reference to attach filter to".to_string(),
        ));
    }
    Ok(())
}

/// AND a row filter into the statement's top-level SELECT. When the first
/// table function is `read_parquet` and a [`HiveSpec`] is supplied, inject
/// `hive_partitioning = true` and `hive_types = {...}` named arguments if
/// they are absent, so partition columns are visible to the filter.
pub fn add_filter_to_table_function(
    statement: &mut Statement,
    filter: Expr,
    hive: Option<&HiveSpec>,
) -> Result<()> {
    let query = query_mut(statement)?;
    and_into_selection(query, filter)?;

    if let Some(hive) = hive {
        let mut failure: Option<GateError> = None;
        visit_factors(query, &mut |factor| {
            if function_name_of(factor).as_deref() == Some("read_parquet") {
                if let Err(e) = inject_hive_args(factor, hive) {
                    failure = Some(e);
                }
                return true;
            }
            false
        });
        if let Some(e) = failure {
            return Err(e);
        }
    }
    Ok(())
}

/// Swap the first `read_parquet`/`read_delta` source for an explicit file
/// list (`read_delta` becomes `read_parquet` over its data files), applying
/// hive named arguments. Split-planner support: every shard query is the
/// original statement with the source replaced by its file subset.
pub fn replace_table_function_files(
    statement: &mut Statement,
    files: &[String],
    hive: Option<&HiveSpec>,
) -> Result<()> {
    let query = query_mut(statement)?;
    let mut replaced = false;
    let mut failure: Option<GateError> = None;

    visit_factors(query, &mut |factor| {
        let fname = match function_name_of(factor) {
            Some(name) if name == "read_parquet" || name == "read_delta" => name,
            _ => return false,
        };
        let mut rendered = vec![render_file_list(files)];
        if fname == "read_parquet" {
            if let TableFactor::Table {
                args: Some(fargs), ..
            } = factor
            {
                rendered.extend(
                    fargs
                        .args
                        .iter()
                        .skip(1)
                        .filter(|arg| {
                            !matches!(
                                named_arg(arg),
                                Some((name, _)) if name.eq_ignore_ascii_case("hive_partitioning")
                                    || name.eq_ignore_ascii_case("hive_types")
                            )
                        })
                        .map(ToString::to_string),
                );
            }
        }
        if let Some(hive) = hive {
            rendered.push("hive_partitioning = true".to_string());
            if !hive.types.is_empty() {
                rendered.push(format!("hive_types = {}", hive.render_types()));
            }
        }
        match parse_table_factor(&format!("read_parquet({})", rendered.join(", "))) {
            Ok(mut new_factor) => {
                move_alias(factor, &mut new_factor);
                *factor = new_factor;
                replaced = true;
            }
            Err(e) => failure = Some(e),
        }
        true
    });

    if let Some(e) = failure {
        return Err(e);
    }
    if !replaced {
        return Err(GateError::BadRequest(
            "no read_parquet or read_delta source to shard".to_string(),
        ));
    }
    Ok(())
}

fn query_mut(statement: &mut Statement) -> Result<&mut Query> {
    match statement {
        Statement::Query(query) => Ok(query),
        other => Err(GateError::BadRequest(format!(
            "expected a query statement, got: {other}"
        ))),
    }
}

/// Depth-first factor visitor matching the reference walker's order: CTE
/// bodies first, then the body's FROM lists and joins, recursing into
/// derived subqueries. The closure returns `true` to stop the walk.
fn visit_factors<F>(query: &mut Query, f: &mut F) -> bool
where
    F: FnMut(&mut TableFactor) -> bool,
{
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            if visit_factors(&mut cte.query, f) {
                return true;
            }
        }
    }
    visit_set_expr(&mut query.body, f)
}

fn visit_set_expr<F>(body: &mut SetExpr, f: &mut F) -> bool
where
    F: FnMut(&mut TableFactor) -> bool,
{
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in &mut select.from {
                if visit_table_with_joins(table_with_joins, f) {
                    return true;
                }
            }
            false
        }
        SetExpr::Query(query) => visit_factors(query, f),
        SetExpr::SetOperation { left, right, .. } => {
            visit_set_expr(left, f) || visit_set_expr(right, f)
        }
        _ => false,
    }
}

fn visit_table_with_joins<F>(twj: &mut TableWithJoins, f: &mut F) -> bool
where
    F: FnMut(&mut TableFactor) -> bool,
{
    if visit_factor(&mut twj.relation, f) {
        return true;
    }
    for join in &mut twj.joins {
        if visit_factor(&mut join.relation, f) {
            return true;
        }
    }
    false
}

fn visit_factor<F>(factor: &mut TableFactor, f: &mut F) -> bool
where
    F: FnMut(&mut TableFactor) -> bool,
{
    if f(factor) {
        return true;
    }
    match factor {
        TableFactor::Derived { subquery, .. } => visit_factors(subquery, f),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => visit_table_with_joins(table_with_joins, f),
        _ => false,
    }
}

fn and_into_selection(query: &mut Query, filter: Expr) -> Result<()> {
    let select = match first_select_mut(&mut query.body) {
        Some(select) => select,
        None => {
            return Err(GateError::BadRequest(
                "statement has no SELECT to attach filter to".to_string(),
            ))
        }
    };
    select.selection = Some(match select.selection.take() {
        None => filter,
        Some(existing) => Expr::BinaryOp {
            left: Box::new(Expr::Nested(Box::new(existing))),
            op: BinaryOperator::And,
            right: Box::new(Expr::Nested(Box::new(filter))),
        },
    });
    Ok(())
}

fn first_select_mut(body: &mut SetExpr) -> Option<&mut sqlparser::ast::Select> {
    match body {
        SetExpr::Select(select) => Some(select),
        SetExpr::Query(query) => first_select_mut(&mut query.body),
        SetExpr::SetOperation { left, .. } => first_select_mut(left),
        _ => None,
    }
}

fn wrap_in_filtered_subquery(factor: &mut TableFactor, filter: Expr) -> Result<()> {
    let alias_ident = match factor {
        TableFactor::Table { name, alias, .. } => match alias {
            Some(alias) => alias.name.clone(),
            None => object_name_strings(name)
                .last()
                .map(|n| Ident::new(n.clone()))
                .ok_or_else(|| GateError::Internal("table reference without a name".to_string()))?,
        },
        _ => return Err(GateError::Internal("expected a base table factor".to_string())),
    };

    let mut template = match first_statement(parse_sql("SELECT * FROM __dg_placeholder__")?)? {
        Statement::Query(query) => query,
        _ => return Err(GateError::Internal("subquery template was not a query".to_string())),
    };
    let original = std::mem::replace(&mut *factor, parse_table_factor("__dg_placeholder__")?);
    if let SetExpr::Select(select) = &mut *template.body {
        select.from[0].relation = original;
        select.selection = Some(filter);
    }

    *factor = TableFactor::Derived {
        lateral: false,
        subquery: template,
        alias: Some(TableAlias {
            name: alias_ident,
            columns: vec![],
        }),
    };
    Ok(())
}

fn inject_hive_args(factor: &mut TableFactor, hive: &HiveSpec) -> Result<()> {
    let (name, fargs) = match factor {
        TableFactor::Table {
            name,
            args: Some(fargs),
            ..
        } => (name.clone(), fargs),
        _ => return Ok(()),
    };

    let mut has_partitioning = false;
    let mut has_types = false;
    for arg in &fargs.args {
        match named_arg(arg) {
            Some((n, _)) if n.eq_ignore_ascii_case("hive_partitioning") => has_partitioning = true,
            Some((n, _)) if n.eq_ignore_ascii_case("hive_types") => has_types = true,
            _ => {}
        }
    }
    if has_partitioning && has_types {
        return Ok(());
    }

    let mut rendered: Vec<String> = fargs.args.iter().map(ToString::to_string).collect();
    if !has_partitioning {
        rendered.push("hive_partitioning = true".to_string());
    }
    if !has_types && !hive.types.is_empty() {
        rendered.push(format!("hive_types = {}", hive.render_types()));
    }

    let new_factor = parse_table_factor(&format!("{}({})", name, rendered.join(", ")))?;
    if let (
        TableFactor::Table { args, .. },
        TableFactor::Table {
            args: new_args, ..
        },
    ) = (&mut *factor, new_factor)
    {
        *args = new_args;
    }
    Ok(())
}

fn move_alias(old: &mut TableFactor, new: &mut TableFactor) {
    if let (TableFactor::Table { alias, .. }, TableFactor::Table { alias: new_alias, .. }) =
        (old, new)
    {
        *new_alias = alias.take();
    }
}

fn parse_table_factor(rendered: &str) -> Result<TableFactor> {
    let statement = first_statement(parse_sql(&format!("SELECT * FROM {rendered}"))?)?;
    match statement {
        Statement::Query(mut query) => {
            if let SetExpr::Select(select) = &mut *query.body {
                if let Some(twj) = select.from.drain(..).next() {
                    return Ok(twj.relation);
                }
            }
            Err(GateError::Internal(format!(
                "rendered factor did not parse as a table source: {rendered}"
            )))
        }
        _ => Err(GateError::Internal(format!(
            "rendered factor did not parse as a query: {rendered}"
        ))),
    }
}

fn render_file_list(files: &[String]) -> String {
    let quoted: Vec<String> = files
        .iter()
        .map(|f| format!("'{}'", f.replace('\'', "''")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn object_name(parts: &[String]) -> ObjectName {
    ObjectName(
        parts
            .iter()
            .map(|p| ObjectNamePart::Identifier(Ident::new(p.clone())))
            .collect(),
    )
}

fn function_name_of(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table {
            name,
            args: Some(_),
            ..
        } => object_name_strings(name)
            .last()
            .map(|n| n.to_ascii_lowercase()),
        _ => None,
    }
}

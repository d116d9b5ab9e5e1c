//! Parse/deparse entry points for the DuckDB dialect.

use duckgate_common::{GateError, Result};
use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

/// Parse a SQL string into statements.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    Parser::parse_sql(&DuckDbDialect {}, sql).map_err(|e| GateError::BadRequest(e.to_string()))
}

/// The first top-level statement; fails on empty input.
pub fn first_statement(statements: Vec<Statement>) -> Result<Statement> {
    statements
        .into_iter()
        .next()
        .ok_or_else(|| GateError::BadRequest("empty statement".to_string()))
}

/// Parse a `WHERE`-clause fragment into an expression in the same dialect.
pub fn compile_filter_string(fragment: &str) -> Result<Expr> {
    let dialect = DuckDbDialect {};
    Parser::new(&dialect)
        .try_with_sql(fragment)
        .map_err(|e| GateError::BadRequest(format!("invalid filter {fragment:?}: {e}")))?
        .parse_expr()
        .map_err(|e| GateError::BadRequest(format!("invalid filter {fragment:?}: {e}")))
}

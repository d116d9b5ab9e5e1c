//! Pure AST utilities over the DuckDB SQL dialect.
//!
//! Architecture role:
//! - parse/deparse entry points shared by authorizer and split planner
//! - reference extraction (`FROM` lists, joins, subqueries, CTE bodies)
//! - rewrites: default catalog/schema stamping, row-filter weaving,
//!   hive-partitioning hints, shard file substitution
//!
//! Everything here is pure: no I/O, no engine calls, deterministic over the
//! input tree. Deparse is `Display` on the AST.

pub mod parse;
pub mod refs;
pub mod rewrite;
pub mod types;

pub use parse::{compile_filter_string, first_statement, parse_sql};
pub use refs::all_tables_or_paths;
pub use rewrite::{
    add_filter_to_base_table, add_filter_to_table_function, replace_table_function_files,
    with_updated_database_schema,
};
pub use types::{HiveSpec, SqlType, TableKind, TableRef};

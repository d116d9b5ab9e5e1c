//! Shard construction: one sub-query per file group.

use std::path::Path;

use duckgate_common::Result;
use sqlparser::ast::Statement;

use crate::{delta, hive};
use duckgate_sql::{all_tables_or_paths, replace_table_function_files, TableKind};

/// Plan shard queries for a statement whose top-level FROM reads a
/// partitioned file source.
///
/// Returns `None` when the statement is not splittable (no leading
/// `read_parquet`/`read_delta` source), an empty list when the source
/// matches zero files, and otherwise one statement per group of
/// `split_size` files. Unreachable paths fail with `NotFound`.
pub fn plan_splits(statement: &Statement, split_size: usize) -> Result<Option<Vec<Statement>>> {
    let refs = match all_tables_or_paths(statement, "", "") {
        Ok(refs) => refs,
        Err(_) => return Ok(None),
    };
    let Some(first) = refs.first() else {
        return Ok(None);
    };
    if first.kind != TableKind::TableFunction {
        return Ok(None);
    }
    let Some(path) = first.table_or_path.as_deref() else {
        return Ok(None);
    };

    let (files, hive) = match first.function_name.as_deref() {
        Some("read_parquet") => {
            let files = hive::expand_files(path)?;
            let hive = first.hive_spec().or_else(|| hive::infer_hive_spec(path));
            (files, hive)
        }
        Some("read_delta") => {
            let snapshot = delta::read_snapshot(Path::new(path))?;
            (snapshot.files, snapshot.hive)
        }
        _ => return Ok(None),
    };

    tracing::debug!(
        source = %path,
        files = files.len(),
        split_size,
        "planning splits"
    );

    let shards = files
        .chunks(split_size.max(1))
        .map(|group| {
            let mut shard = statement.clone();
            replace_table_function_files(&mut shard, group, hive.as_ref())?;
            Ok(shard)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(shards))
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_common::GateError;
    use duckgate_sql::{first_statement, parse_sql};
    use std::fs;

    fn stmt_of(sql: &str) -> Statement {
        first_statement(parse_sql(sql).expect("parse")).expect("first")
    }

    fn hive_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (dt, p, name) in [
            ("2024-01-01", "1", "a.parquet"),
            ("2024-01-01", "2", "b.parquet"),
            ("2024-01-02", "1", "c.parquet"),
        ] {
            let leaf = dir.path().join(format!("hive_table/dt={dt}/p={p}"));
            fs::create_dir_all(&leaf).expect("mkdir");
            fs::write(leaf.join(name), b"").expect("touch");
        }
        dir
    }

    #[test]
    fn one_shard_per_file_at_split_size_one() {
        let dir = hive_fixture();
        let stmt = stmt_of(&format!(
            "select * from read_parquet('{}/hive_table', hive_types = {{'dt': DATE, 'p': VARCHAR}})",
            dir.path().display()
        ));
        let shards = plan_splits(&stmt, 1).expect("plan").expect("splittable");
        assert_eq!(shards.len(), 3);
        for shard in &shards {
            let sql = shard.to_string();
            assert!(sql.contains("hive_partitioning = true"), "shard: {sql}");
            assert!(sql.contains("hive_types = {'dt': DATE, 'p': VARCHAR}"), "shard: {sql}");
            assert_eq!(sql.matches(".parquet").count(), 1, "shard: {sql}");
        }
    }

    #[test]
    fn split_size_groups_files() {
        let dir = hive_fixture();
        let stmt = stmt_of(&format!(
            "select * from read_parquet('{}/hive_table')",
            dir.path().display()
        ));
        let shards = plan_splits(&stmt, 2).expect("plan").expect("splittable");
        assert_eq!(shards.len(), 2);
    }

    #[test]
    fn non_file_sources_are_not_splittable() {
        let stmt = stmt_of("select * from generate_series(10)");
        assert_eq!(plan_splits(&stmt, 1).expect("plan"), None);

        let stmt = stmt_of("select * from some_table");
        assert_eq!(plan_splits(&stmt, 1).expect("plan"), None);
    }

    #[test]
    fn unreachable_path_fails_with_not_found() {
        let stmt = stmt_of("select * from read_parquet('definitely/not/here')");
        assert!(matches!(
            plan_splits(&stmt, 1),
            Err(GateError::NotFound(_))
        ));
    }

    #[test]
    fn delta_sources_shard_per_live_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = crate::delta::tests::write_delta_fixture(dir.path());
        let stmt = stmt_of(&format!(
            "select * from read_delta('{}')",
            table.display()
        ));
        let shards = plan_splits(&stmt, 1).expect("plan").expect("splittable");
        assert_eq!(shards.len(), 2);
        for shard in &shards {
            let sql = shard.to_string();
            assert!(sql.contains("read_parquet"), "shard: {sql}");
            assert!(sql.contains("hive_types = {'p': VARCHAR}"), "shard: {sql}");
        }
    }

    #[test]
    fn zero_matches_plan_zero_shards() {
        let dir = hive_fixture();
        let stmt = stmt_of(&format!(
            "select * from read_parquet('{}/hive_table/*/*/*.orc')",
            dir.path().display()
        ));
        let shards = plan_splits(&stmt, 1).expect("plan").expect("splittable");
        assert!(shards.is_empty());
    }
}

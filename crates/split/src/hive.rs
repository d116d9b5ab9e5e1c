//! Hive layout support: file enumeration and partition type inference.

use std::path::{Path, PathBuf};

use duckgate_common::{GateError, Result};
use duckgate_sql::{HiveSpec, SqlType};

/// Expand a path or glob into the parquet files it covers, sorted for
/// deterministic shard assignment.
///
/// - a glob expands through the filesystem; an unreachable fixed prefix is
///   `NotFound`, an empty match set is an empty list;
/// - a directory is walked recursively for `*.parquet` files;
/// - a plain file is itself.
pub fn expand_files(path_or_glob: &str) -> Result<Vec<String>> {
    if has_glob_meta(path_or_glob) {
        let prefix = fixed_prefix(path_or_glob);
        if !prefix.as_os_str().is_empty() && !prefix.exists() {
            return Err(GateError::NotFound(format!(
                "path not found: {path_or_glob}"
            )));
        }
        let entries = glob::glob(path_or_glob)
            .map_err(|e| GateError::BadRequest(format!("invalid glob {path_or_glob:?}: {e}")))?;
        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        files.sort();
        return Ok(files);
    }

    let root = Path::new(path_or_glob);
    if !root.exists() {
        return Err(GateError::NotFound(format!("path not found: {path_or_glob}")));
    }
    if root.is_file() {
        return Ok(vec![path_or_glob.to_string()]);
    }
    let mut files = Vec::new();
    walk_parquet_files(root, &mut files)?;
    let mut files: Vec<String> = files
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    files.sort();
    Ok(files)
}

/// Infer hive partition types from the `k=v` segments of the first file the
/// path covers: values shaped like dates become `DATE`, everything else
/// `VARCHAR`. `None` when the layout carries no partition segments.
pub fn infer_hive_spec(path_or_glob: &str) -> Option<HiveSpec> {
    let files = expand_files(path_or_glob).ok()?;
    let first = files.first()?;
    let types: Vec<(String, SqlType)> = Path::new(first)
        .components()
        .filter_map(|c| {
            let segment = c.as_os_str().to_str()?;
            let (key, value) = segment.split_once('=')?;
            let ty = if value.parse::<chrono::NaiveDate>().is_ok() {
                SqlType::Date
            } else {
                SqlType::Varchar
            };
            Some((key.to_string(), ty))
        })
        .collect();
    if types.is_empty() {
        None
    } else {
        Some(HiveSpec { types })
    }
}

fn has_glob_meta(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

fn fixed_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    for part in Path::new(pattern).components() {
        if part.as_os_str().to_string_lossy().contains(['*', '?', '[']) {
            break;
        }
        prefix.push(part);
    }
    prefix
}

fn walk_parquet_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_parquet_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            out.push(path);
        }
    }
    Ok(())
}

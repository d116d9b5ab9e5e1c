//! Delta table support: replay the JSON commit log into the current
//! snapshot's add-file list.
//!
//! Checkpoint parquet files are not read; the replay covers the JSON
//! commits, applying add and remove actions in version order and keeping
//! the newest table metadata for partition typing.

use std::collections::BTreeSet;
use std::path::Path;

use duckgate_common::{GateError, Result};
use duckgate_sql::{HiveSpec, SqlType};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LogAction {
    add: Option<AddAction>,
    remove: Option<RemoveAction>,
    #[serde(rename = "metaData")]
    meta_data: Option<MetaAction>,
}

#[derive(Debug, Deserialize)]
struct AddAction {
    path: String,
}

#[derive(Debug, Deserialize)]
struct RemoveAction {
    path: String,
}

#[derive(Debug, Deserialize)]
struct MetaAction {
    #[serde(rename = "partitionColumns", default)]
    partition_columns: Vec<String>,
    #[serde(rename = "schemaString", default)]
    schema_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaSchema {
    #[serde(default)]
    fields: Vec<DeltaField>,
}

#[derive(Debug, Deserialize)]
struct DeltaField {
    name: String,
    #[serde(rename = "type")]
    type_name: serde_json::Value,
}

/// Current state of a Delta table as far as planning needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSnapshot {
    /// Live data files, absolute, sorted.
    pub files: Vec<String>,
    /// Partition columns typed from the table schema, when partitioned.
    pub hive: Option<HiveSpec>,
}

/// Read the snapshot of the Delta table rooted at `table_path`.
pub fn read_snapshot(table_path: &Path) -> Result<DeltaSnapshot> {
    let log_dir = table_path.join("_delta_log");
    if !log_dir.is_dir() {
        return Err(GateError::NotFound(format!(
            "no delta log under {}",
            table_path.display()
        )));
    }

    let mut commits: Vec<(u64, std::path::PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(version) = name.strip_suffix(".json").and_then(|v| v.parse::<u64>().ok()) {
            commits.push((version, path));
        }
    }
    commits.sort_by_key(|(version, _)| *version);

    let mut live = BTreeSet::new();
    let mut meta: Option<MetaAction> = None;
    for (_, commit) in &commits {
        let content = std::fs::read_to_string(commit)?;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let action: LogAction = serde_json::from_str(line).map_err(|e| {
                GateError::BadRequest(format!(
                    "malformed delta log entry in {}: {e}",
                    commit.display()
                ))
            })?;
            if let Some(add) = action.add {
                live.insert(add.path);
            }
            if let Some(remove) = action.remove {
                live.remove(&remove.path);
            }
            if let Some(m) = action.meta_data {
                meta = Some(m);
            }
        }
    }

    let files = live
        .into_iter()
        .map(|rel| table_path.join(rel).to_string_lossy().into_owned())
        .collect();

    Ok(DeltaSnapshot {
        files,
        hive: meta.as_ref().and_then(hive_spec_of),
    })
}

fn hive_spec_of(meta: &MetaAction) -> Option<HiveSpec> {
    if meta.partition_columns.is_empty() {
        return None;
    }
    let schema: Option<DeltaSchema> = meta
        .schema_string
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());
    let types = meta
        .partition_columns
        .iter()
        .map(|column| {
            let delta_type = schema
                .as_ref()
                .and_then(|s| s.fields.iter().find(|f| &f.name == column))
                .and_then(|f| f.type_name.as_str().map(str::to_string));
            (column.clone(), sql_type_of(delta_type.as_deref()))
        })
        .collect();
    Some(HiveSpec { types })
}

fn sql_type_of(delta_type: Option<&str>) -> SqlType {
    match delta_type {
        Some("string") => SqlType::Varchar,
        Some("date") => SqlType::Date,
        Some("integer") | Some("short") | Some("byte") => SqlType::Integer,
        Some("long") => SqlType::Bigint,
        Some("double") | Some("float") => SqlType::Double,
        Some("boolean") => SqlType::Boolean,
        Some(other) => SqlType::Other(other.to_ascii_uppercase()),
        None => SqlType::Varchar,
    }
}

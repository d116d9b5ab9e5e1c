//! Parquet ingest writer with at-most-once semantics per target path.
//!
//! Batches are staged into a temp file next to the target; publication is a
//! hard link, which fails atomically if the target appeared in the meantime.
//! The prior file is never touched on any failure path.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use duckgate_common::{GateError, Result};
use parquet::arrow::ArrowWriter;

/// Staged Parquet write under the warehouse root.
pub struct IngestWriter {
    target: PathBuf,
    staged: PathBuf,
    writer: Option<ArrowWriter<File>>,
    rows: u64,
}

impl IngestWriter {
    /// Start an ingest for `{warehouse_root}/{relative_path}`. Fails with
    /// `Conflict` when the target already exists and with `BadRequest` when
    /// the relative path escapes the warehouse.
    pub fn create(warehouse_root: &Path, relative_path: &str, schema: SchemaRef) -> Result<Self> {
        let relative = sanitize(relative_path)?;
        let target = warehouse_root.join(relative);
        if target.exists() {
            return Err(GateError::Conflict(format!(
                "ingest target already exists: {relative_path}"
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let staged = target.with_extension(format!("staged-{}.tmp", uuid::Uuid::new_v4()));
        let file = File::create(&staged)?;
        let writer = ArrowWriter::try_new(file, schema, None)
            .map_err(|e| GateError::Engine(format!("parquet writer open failed: {e}")))?;

        Ok(Self {
            target,
            staged,
            writer: Some(writer),
            rows: 0,
        })
    }

    /// Append one batch.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| GateError::Internal("ingest writer already finished".to_string()))?;
        writer
            .write(batch)
            .map_err(|e| GateError::Engine(format!("parquet write failed: {e}")))?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    /// Close the staged file and publish it. The hard link fails if the
    /// target appeared since `create`, preserving the existing file.
    pub fn finish(mut self) -> Result<u64> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| GateError::Internal("ingest writer already finished".to_string()))?;
        writer
            .close()
            .map_err(|e| GateError::Engine(format!("parquet close failed: {e}")))?;

        let publish = fs::hard_link(&self.staged, &self.target);
        let _ = fs::remove_file(&self.staged);
        publish.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                GateError::Conflict(format!(
                    "ingest target already exists: {}",
                    self.target.display()
                ))
            } else {
                GateError::Io(e)
            }
        })?;
        Ok(self.rows)
    }
}

impl Drop for IngestWriter {
    fn drop(&mut self) {
        // Abandoned ingest (client error or disconnect): drop the stage.
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.staged);
        }
    }
}

fn sanitize(relative_path: &str) -> Result<&Path> {
    let path = Path::new(relative_path);
    let valid = !relative_path.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(GateError::BadRequest(format!(
            "invalid ingest path: {relative_path:?}"
        )))
    }
}

//! Split planning: turn one query over a partitioned file source into many
//! independently fetchable shard queries.
//!
//! Architecture role:
//! - hive layout: glob/directory expansion and partition type inference
//! - delta layout: `_delta_log` replay into the current add-file snapshot
//! - shard construction: the original statement with its source swapped for
//!   a file subset
//!
//! The union of all shard results equals the unsplit query's result; order
//! across shards is unspecified.

pub mod delta;
pub mod hive;
pub mod planner;

pub use delta::{read_snapshot, DeltaSnapshot};
pub use hive::{expand_files, infer_hive_spec};
pub use planner::plan_splits;

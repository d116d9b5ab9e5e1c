//! Flight call header names and parsing helpers.
//!
//! Every header is string-valued gRPC metadata. Clients may send them on any
//! call; the producer reads them where they matter (`database`/`schema` at
//! planning time, `fetch-size` at fetch time, and so on).

use crate::error::{GateError, Result};

/// Default catalog for unqualified table references.
pub const HEADER_DATABASE: &str = "database";
/// Default schema for unqualified table references.
pub const HEADER_SCHEMA: &str = "schema";
/// Maximum rows per produced Arrow batch.
pub const HEADER_FETCH_SIZE: &str = "fetch-size";
/// Number of files grouped into one shard during split planning.
pub const HEADER_SPLIT_SIZE: &str = "split-size";
/// `"true"` enables split planning for partitioned sources.
pub const HEADER_PARALLELIZE: &str = "parallelize";
/// URL-encoded schema string used to coerce single-scalar results.
pub const HEADER_DATA_SCHEMA: &str = "data-schema";

/// Rows per batch when the client does not send `fetch-size`.
pub const DEFAULT_FETCH_SIZE: usize = 10_000;
/// Files per shard when the client does not send `split-size`.
pub const DEFAULT_SPLIT_SIZE: usize = 1;

/// Parse a positive-integer header value; `None` input yields the default.
pub fn positive_usize(name: &str, value: Option<&str>, default: usize) -> Result<usize> {
    match value {
        None => Ok(default),
        Some(raw) => {
            let parsed: usize = raw
                .trim()
                .parse()
                .map_err(|_| GateError::BadRequest(format!("header {name} must be a positive integer, got {raw:?}")))?;
            if parsed == 0 {
                return Err(GateError::BadRequest(format!(
                    "header {name} must be a positive integer, got 0"
                )));
            }
            Ok(parsed)
        }
    }
}

/// Whether a `parallelize`-style boolean header is set.
pub fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_usize_defaults_and_parses() {
        assert_eq!(positive_usize("fetch-size", None, 7).expect("default"), 7);
        assert_eq!(
            positive_usize("fetch-size", Some("12"), 7).expect("parse"),
            12
        );
    }

    #[test]
    fn positive_usize_rejects_zero_and_garbage() {
        assert!(positive_usize("fetch-size", Some("0"), 7).is_err());
        assert!(positive_usize("fetch-size", Some("ten"), 7).is_err());
        assert!(positive_usize("fetch-size", Some("-1"), 7).is_err());
    }

    #[test]
    fn parallelize_header_is_case_insensitive() {
        assert!(is_true(Some("true")));
        assert!(is_true(Some("TRUE")));
        assert!(!is_true(Some("1")));
        assert!(!is_true(None));
    }
}

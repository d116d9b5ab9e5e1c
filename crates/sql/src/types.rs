//! Data model shared by the reference walker and the rewrites.

use std::fmt;

/// Kind of relation a query references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// A catalog table addressed as `database.schema.table`.
    BaseTable,
    /// A table-function invocation such as `read_parquet(path)`.
    TableFunction,
}

/// SQL type name used in `hive_types` maps. Only the types hive partition
/// values can take are distinguished; everything else round-trips as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    /// `VARCHAR`
    Varchar,
    /// `DATE`
    Date,
    /// `INTEGER`
    Integer,
    /// `BIGINT`
    Bigint,
    /// `DOUBLE`
    Double,
    /// `BOOLEAN`
    Boolean,
    /// Any other type name, kept verbatim.
    Other(String),
}

impl SqlType {
    /// Parse a type name as it appears in SQL text.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "VARCHAR" | "TEXT" | "STRING" => Self::Varchar,
            "DATE" => Self::Date,
            "INTEGER" | "INT" | "INT4" => Self::Integer,
            "BIGINT" | "LONG" | "INT8" => Self::Bigint,
            "DOUBLE" | "FLOAT8" => Self::Double,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Varchar => write!(f, "VARCHAR"),
            Self::Date => write!(f, "DATE"),
            Self::Integer => write!(f, "INTEGER"),
            Self::Bigint => write!(f, "BIGINT"),
            Self::Double => write!(f, "DOUBLE"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Hive partitioning hints attached to a `read_parquet` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiveSpec {
    /// Partition column name → type, in path order.
    pub types: Vec<(String, SqlType)>,
}

impl HiveSpec {
    /// Render the `hive_types` named-argument value, e.g.
    /// `{'dt': DATE, 'p': VARCHAR}`.
    pub fn render_types(&self) -> String {
        let fields: Vec<String> = self
            .types
            .iter()
            .map(|(name, ty)| format!("'{}': {}", name.replace('\'', "''"), ty))
            .collect();
        format!("{{{}}}", fields.join(", "))
    }
}

/// One relation referenced by a query, as extracted from the AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Catalog, after default substitution for unqualified base tables.
    pub catalog: Option<String>,
    /// Schema, after default substitution for unqualified base tables.
    pub schema: Option<String>,
    /// Table name for base tables; path argument for table functions that
    /// take one (`read_parquet`, `read_delta`).
    pub table_or_path: Option<String>,
    /// Base table or table function.
    pub kind: TableKind,
    /// Function name for table functions, lower-cased.
    pub function_name: Option<String>,
    /// Whether the invocation already carries `hive_partitioning = true`.
    pub hive_partitioning: bool,
    /// `hive_types` named argument, when present on the invocation.
    pub hive_types: Vec<(String, SqlType)>,
}

impl TableRef {
    /// Human-readable name used in authorization failures.
    pub fn display_name(&self) -> String {
        match self.kind {
            TableKind::BaseTable => {
                let mut parts = Vec::new();
                if let Some(c) = &self.catalog {
                    parts.push(c.clone());
                }
                if let Some(s) = &self.schema {
                    parts.push(s.clone());
                }
                if let Some(t) = &self.table_or_path {
                    parts.push(t.clone());
                }
                parts.join(".")
            }
            TableKind::TableFunction => match (&self.function_name, &self.table_or_path) {
                (Some(f), Some(p)) => format!("{f}('{p}')"),
                (Some(f), None) => format!("{f}(...)"),
                (None, Some(p)) => p.clone(),
                (None, None) => "<table function>".to_string(),
            },
        }
    }

    /// Hive hints carried by this reference, if any.
    pub fn hive_spec(&self) -> Option<HiveSpec> {
        if self.hive_types.is_empty() {
            None
        } else {
            Some(HiveSpec {
                types: self.hive_types.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_type_parse_and_display_round_trip() {
        assert_eq!(SqlType::parse("date"), SqlType::Date);
        assert_eq!(SqlType::parse("String"), SqlType::Varchar);
        assert_eq!(SqlType::parse("uuid").to_string(), "UUID");
        assert_eq!(SqlType::Bigint.to_string(), "BIGINT");
    }

    #[test]
    fn hive_spec_renders_in_declaration_order() {
        let spec = HiveSpec {
            types: vec![
                ("dt".to_string(), SqlType::Date),
                ("p".to_string(), SqlType::Varchar),
            ],
        };
        assert_eq!(spec.render_types(), "{'dt': DATE, 'p': VARCHAR}");
    }
}

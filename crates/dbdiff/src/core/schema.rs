//! Table descriptors and key-range types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::value::SqlValue;

/// Logical column type used to pick a cross-engine normalization expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    Decimal,
    Float,
    Boolean,
    Timestamp,
    Date,
    Uuid,
    Binary,
}

/// Equality strategy applied to a comparison scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Per-side aggregate of row count and summed row hashes.
    Checksum,
    /// Fetch every row from both sides and compare value by value.
    FullRow,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Checksum => "checksum",
            StrategyKind::FullRow => "full_row",
        }
    }
}

/// Immutable description of one table to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name, also used as the `table` metric label.
    pub name: String,

    /// Primary key column(s). A single string is accepted for one column.
    #[serde(deserialize_with = "one_or_many")]
    pub primary_key: Vec<String>,

    /// Ordered columns used to derive chunk boundaries.
    #[serde(deserialize_with = "one_or_many")]
    pub batch_columns: Vec<String>,

    /// Columns whose values take part in content comparison.
    pub comparison_columns: Vec<String>,

    /// Per-table strategy override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,

    /// Logical types for normalization; unlisted columns are compared as text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_types: BTreeMap<String, ColumnType>,
}

impl TableSpec {
    pub fn new(
        name: impl Into<String>,
        primary_key: &[&str],
        batch_columns: &[&str],
        comparison_columns: &[&str],
    ) -> Self {
        let owned = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        Self {
            name: name.into(),
            primary_key: owned(primary_key),
            batch_columns: owned(batch_columns),
            comparison_columns: owned(comparison_columns),
            strategy: None,
            column_types: BTreeMap::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_column_type(mut self, column: impl Into<String>, ty: ColumnType) -> Self {
        self.column_types.insert(column.into(), ty);
        self
    }

    pub fn column_type(&self, column: &str) -> ColumnType {
        self.column_types.get(column).copied().unwrap_or_default()
    }

    /// Comparison columns that are not already part of the primary key.
    pub fn value_columns(&self) -> Vec<&str> {
        self.comparison_columns
            .iter()
            .filter(|c| !self.primary_key.contains(c))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(col) => vec![col],
        OneOrMany::Many(cols) => cols,
    })
}

/// Values of the batch columns for one row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct KeyTuple(pub Vec<SqlValue>);

impl KeyTuple {
    pub fn values(&self) -> &[SqlValue] {
        &self.0
    }

    pub fn has_null(&self) -> bool {
        self.0.iter().any(SqlValue::is_null)
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", v)?;
        }
        f.write_str(")")
    }
}

/// One end of a key range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// Before the first row.
    Start,
    Key(KeyTuple),
    /// After the last row.
    End,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Start => f.write_str("START"),
            Bound::Key(k) => write!(f, "{}", k),
            Bound::End => f.write_str("END"),
        }
    }
}

/// A half-open key range `[lower, upper)` over the batch columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkBoundary {
    pub id: u64,
    pub lower: Bound,
    pub upper: Bound,
}

impl ChunkBoundary {
    /// Whether a key falls inside this range, using tuple ordering.
    pub fn contains(&self, key: &KeyTuple) -> bool {
        let above_lower = match &self.lower {
            Bound::Start => true,
            Bound::Key(lower) => key >= lower,
            Bound::End => false,
        };
        let below_upper = match &self.upper {
            Bound::Start => false,
            Bound::Key(upper) => key < upper,
            Bound::End => true,
        };
        above_lower && below_upper
    }
}

/// The set of rows a strategy compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Table,
    Chunk(ChunkBoundary),
}

impl Scope {
    pub fn chunk_id(&self) -> Option<u64> {
        match self {
            Scope::Table => None,
            Scope::Chunk(c) => Some(c.id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Table => f.write_str("whole table"),
            Scope::Chunk(c) => write!(f, "chunk {} [{}, {})", c.id, c.lower, c.upper),
        }
    }
}

//! SQL generation for comparison queries.
//!
//! Every statement is rendered for one side's dialect. Key ranges are
//! expressed as expanded lexicographic predicates so composite and
//! non-numeric batch keys work on every engine:
//!
//! ```text
//! (a, b) >= (1, 'x')   =>   ("a" > 1) OR ("a" = 1 AND "b" >= 'x')
//! ```

use crate::core::schema::{Bound, ChunkBoundary, KeyTuple, Scope, TableSpec};
use crate::core::traits::{Dialect, KeySample, Query, QueryType};
use crate::drivers::DialectImpl;

/// Table alias used by ordered statements. `ORDER BY` names qualified with it
/// always bind to table columns, never to select-list outputs.
const ROW_SOURCE: &str = "src";

/// Renders the statements for one table on one side.
pub struct QueryBuilder<'a> {
    dialect: &'a DialectImpl,
    schema: &'a str,
    table: &'a TableSpec,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(dialect: &'a DialectImpl, schema: &'a str, table: &'a TableSpec) -> Self {
        Self {
            dialect,
            schema,
            table,
        }
    }

    fn from_clause(&self) -> String {
        format!("FROM {}", self.dialect.qualify(self.schema, &self.table.name))
    }

    fn aliased_from_clause(&self) -> String {
        format!(
            "{} AS {}",
            self.from_clause(),
            self.dialect.quote_ident(ROW_SOURCE)
        )
    }

    fn where_clause(&self, scope: &Scope) -> String {
        match scope {
            Scope::Table => String::new(),
            Scope::Chunk(chunk) => match self.range_predicate(chunk) {
                Some(pred) => format!(" WHERE {}", pred),
                None => String::new(),
            },
        }
    }

    fn query(&self, query_type: QueryType, scope: &Scope, sql: String) -> Query {
        Query {
            query_type,
            table: self.table.name.clone(),
            scope: scope.clone(),
            sample: None,
            sql,
        }
    }

    /// Row count for a scope.
    pub fn count(&self, scope: &Scope) -> Query {
        let sql = format!(
            "SELECT {} {}{}",
            self.dialect.count_expr(),
            self.from_clause(),
            self.where_clause(scope)
        );
        self.query(QueryType::Count, scope, sql)
    }

    /// Row count plus the summed 32-bit row hashes, rendered as text.
    ///
    /// Rows are hashed over the primary key followed by the remaining
    /// comparison columns.
    pub fn checksum(&self, scope: &Scope) -> Query {
        let row_text = self.dialect.concat(&self.normalized_columns());
        let sql = format!(
            "SELECT {}, {} {}{}",
            self.dialect.count_expr(),
            self.dialect
                .sum_as_text(&self.dialect.row_hash_expr(&row_text)),
            self.from_clause(),
            self.where_clause(scope)
        );
        self.query(QueryType::Checksum, scope, sql)
    }

    /// Normalized primary key and comparison values, ordered by primary key.
    pub fn fetch_rows(&self, scope: &Scope) -> Query {
        let order_by = self.source_columns(&self.table.primary_key);
        let sql = format!(
            "SELECT {} {}{} ORDER BY {}",
            self.normalized_columns().join(", "),
            self.aliased_from_clause(),
            self.where_clause(scope),
            order_by
        );
        self.query(QueryType::FetchRows, scope, sql)
    }

    /// The batch key `sample.offset` rows past `lower` in key order.
    pub fn sample_key(&self, chunk_id: u64, lower: &Bound, sample: KeySample) -> Query {
        let keys: Vec<String> = self
            .table
            .batch_columns
            .iter()
            .map(|c| self.dialect.key_text_expr(c))
            .collect();
        let predicate = match lower {
            Bound::Key(key) => {
                let last = if sample.exclusive { ">" } else { ">=" };
                format!(" WHERE {}", self.lexicographic(key, ">", last))
            }
            Bound::Start | Bound::End => String::new(),
        };
        let sql = format!(
            "SELECT {} {}{} {}",
            keys.join(", "),
            self.aliased_from_clause(),
            predicate,
            self.dialect
                .order_offset_one(&self.source_columns(&self.table.batch_columns), sample.offset)
        );

        let scope = Scope::Chunk(ChunkBoundary {
            id: chunk_id,
            lower: lower.clone(),
            upper: Bound::End,
        });
        let mut query = self.query(QueryType::SampleKey, &scope, sql);
        query.sample = Some(sample);
        query
    }

    /// Predicate selecting `[lower, upper)`, or `None` for the whole table.
    pub fn range_predicate(&self, chunk: &ChunkBoundary) -> Option<String> {
        let mut parts = Vec::new();
        if let Bound::Key(key) = &chunk.lower {
            parts.push(self.lexicographic(key, ">", ">="));
        }
        if let Bound::Key(key) = &chunk.upper {
            parts.push(self.lexicographic(key, "<", "<"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }

    /// Expanded tuple comparison over the batch columns.
    ///
    /// `op` applies to every prefix position, `last_op` to the final column.
    fn lexicographic(&self, key: &KeyTuple, op: &str, last_op: &str) -> String {
        let cols = &self.table.batch_columns;
        let values = key.values();
        let n = cols.len().min(values.len());

        let terms: Vec<String> = (0..n)
            .map(|i| {
                let mut conds: Vec<String> = (0..i)
                    .map(|j| {
                        format!(
                            "{} = {}",
                            self.dialect.quote_ident(&cols[j]),
                            self.dialect.literal(&values[j])
                        )
                    })
                    .collect();
                let cmp = if i + 1 == n { last_op } else { op };
                conds.push(format!(
                    "{} {} {}",
                    self.dialect.quote_ident(&cols[i]),
                    cmp,
                    self.dialect.literal(&values[i])
                ));
                format!("({})", conds.join(" AND "))
            })
            .collect();

        format!("({})", terms.join(" OR "))
    }

    fn normalized_columns(&self) -> Vec<String> {
        self.table
            .primary_key
            .iter()
            .map(String::as_str)
            .chain(self.table.value_columns())
            .map(|c| self.dialect.normalize_expr(c, self.table.column_type(c)))
            .collect()
    }

    fn source_columns(&self, cols: &[String]) -> String {
        let source = self.dialect.quote_ident(ROW_SOURCE);
        cols.iter()
            .map(|c| format!("{}.{}", source, self.dialect.quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

//! Chunk boundary planning for large tables.
//!
//! Boundaries are sampled keys, found by walking the batch columns in
//! ascending order with a keyset + `OFFSET` query against the source side.
//! Each boundary is computed only when the chunk loop asks for the next
//! chunk, so stopping the loop early also stops planning.

use tracing::debug;

use crate::core::schema::{Bound, ChunkBoundary, KeyTuple, TableSpec};
use crate::core::traits::KeySample;
use crate::error::{DiffError, Result};

use super::runner::{QueryRunner, Side};

/// Produces [`ChunkPlan`]s targeting a fixed number of rows per chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    chunk_size: u64,
}

impl ChunkPlanner {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Start a fresh plan for `table`.
    ///
    /// `row_count_hint` is the source count confirmed by the row-count check.
    pub fn plan<'a>(
        &self,
        table: &'a TableSpec,
        row_count_hint: i64,
        side: &'a Side,
        runner: &'a QueryRunner,
    ) -> Result<ChunkPlan<'a>> {
        if table.batch_columns.is_empty() {
            return Err(DiffError::chunk_planning(
                &table.name,
                "no batch columns configured",
            ));
        }

        Ok(ChunkPlan {
            table,
            side,
            runner,
            chunk_size: self.chunk_size,
            hint: row_count_hint.max(0) as u64,
            next_id: 0,
            lower: Some(Bound::Start),
        })
    }
}

/// Lazy, finite sequence of contiguous chunk boundaries.
pub struct ChunkPlan<'a> {
    table: &'a TableSpec,
    side: &'a Side,
    runner: &'a QueryRunner,
    chunk_size: u64,
    hint: u64,
    next_id: u64,
    /// Lower bound of the next chunk; `None` once `End` was handed out.
    lower: Option<Bound>,
}

impl<'a> ChunkPlan<'a> {
    /// Number of chunks the row count hint implies.
    pub fn expected_chunks(&self) -> u64 {
        self.hint.div_ceil(self.chunk_size).max(1)
    }

    /// Compute the next boundary, or `None` when the table is covered.
    pub async fn next_chunk(&mut self) -> Result<Option<ChunkBoundary>> {
        let lower = match self.lower.take() {
            Some(lower) => lower,
            None => return Ok(None),
        };
        let id = self.next_id;

        let upper = if (id + 1).saturating_mul(self.chunk_size) >= self.hint {
            Bound::End
        } else {
            self.sample_upper(id, &lower).await?
        };

        self.next_id += 1;
        if matches!(upper, Bound::Key(_)) {
            self.lower = Some(upper.clone());
        }

        let chunk = ChunkBoundary { id, lower, upper };
        debug!(
            "{}: planned chunk {} [{}, {})",
            self.table.name, chunk.id, chunk.lower, chunk.upper
        );
        Ok(Some(chunk))
    }

    /// Drain the remaining boundaries.
    pub async fn collect(mut self) -> Result<Vec<ChunkBoundary>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    async fn sample_upper(&self, id: u64, lower: &Bound) -> Result<Bound> {
        let sampled = self
            .sample(
                id,
                lower,
                KeySample {
                    offset: self.chunk_size,
                    exclusive: false,
                },
            )
            .await?;

        match sampled {
            None => Ok(Bound::End),
            Some(key) if matches!(lower, Bound::Key(l) if *l == key) => {
                // More than chunk_size rows share the lower key.
                debug!(
                    "{}: duplicate batch key {} spans chunk {}, skipping past it",
                    self.table.name, key, id
                );
                let next = self
                    .sample(
                        id,
                        lower,
                        KeySample {
                            offset: 0,
                            exclusive: true,
                        },
                    )
                    .await?;
                Ok(next.map(Bound::Key).unwrap_or(Bound::End))
            }
            Some(key) => Ok(Bound::Key(key)),
        }
    }

    async fn sample(&self, id: u64, lower: &Bound, sample: KeySample) -> Result<Option<KeyTuple>> {
        let query = self.side.queries(self.table).sample_key(id, lower, sample);
        let rows = self
            .runner
            .run(self.side, &query)
            .await
            .map_err(|e| self.wrap(e))?;

        let row = match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        };
        if row.len() != self.table.batch_columns.len() {
            return Err(DiffError::chunk_planning(
                &self.table.name,
                format!(
                    "boundary query returned {} values for {} batch columns",
                    row.len(),
                    self.table.batch_columns.len()
                ),
            ));
        }

        let key = KeyTuple(row);
        if key.has_null() {
            return Err(DiffError::chunk_planning(
                &self.table.name,
                format!("batch columns contain NULL at {}", key),
            ));
        }
        Ok(Some(key))
    }

    fn wrap(&self, err: DiffError) -> DiffError {
        match err {
            DiffError::Query { .. } | DiffError::Timeout { .. } => {
                DiffError::chunk_planning(&self.table.name, err)
            }
            other => other,
        }
    }
}

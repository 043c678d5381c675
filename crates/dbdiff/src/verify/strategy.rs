//! Equality strategies.
//!
//! Each strategy answers one question for a scope: do both sides hold the
//! same rows? Collaborator failures are returned as errors and become
//! `Error` outcomes in the engine.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::core::outcome::{ComparisonOutcome, RowCounts};
use crate::core::schema::{Scope, StrategyKind, TableSpec};
use crate::core::value::Row;
use crate::error::{DiffError, Result};

use super::runner::{QueryRunner, Side};

/// Everything a strategy needs to query one table on both sides.
pub struct StrategyContext<'a> {
    pub table: &'a TableSpec,
    pub source: &'a Side,
    pub target: &'a Side,
    pub runner: &'a QueryRunner,
}

#[async_trait]
pub trait EqualityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compare(&self, ctx: &StrategyContext<'_>, scope: &Scope) -> Result<ComparisonOutcome>;
}

/// Resolve a strategy kind to its implementation.
pub fn strategy_for(kind: StrategyKind) -> &'static dyn EqualityStrategy {
    match kind {
        StrategyKind::Checksum => &ChecksumCompare,
        StrategyKind::FullRow => &FullRowCompare,
    }
}

/// Compares `COUNT(*)` per side.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCountCheck;

impl RowCountCheck {
    pub async fn counts(&self, ctx: &StrategyContext<'_>, scope: &Scope) -> Result<RowCounts> {
        let source_query = ctx.source.queries(ctx.table).count(scope);
        let target_query = ctx.target.queries(ctx.table).count(scope);
        let (source_rows, target_rows) = ctx
            .runner
            .run_both((ctx.source, &source_query), (ctx.target, &target_query))
            .await?;

        Ok(RowCounts {
            source: single_count(ctx.source, &source_rows)?,
            target: single_count(ctx.target, &target_rows)?,
        })
    }
}

#[async_trait]
impl EqualityStrategy for RowCountCheck {
    fn name(&self) -> &'static str {
        "row_count"
    }

    async fn compare(&self, ctx: &StrategyContext<'_>, scope: &Scope) -> Result<ComparisonOutcome> {
        let counts = self.counts(ctx, scope).await?;
        Ok(ComparisonOutcome::from_equal(counts.source == counts.target))
    }
}

/// Compares `(count, sum of row hashes)` computed on each side.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumCompare;

#[async_trait]
impl EqualityStrategy for ChecksumCompare {
    fn name(&self) -> &'static str {
        StrategyKind::Checksum.as_str()
    }

    async fn compare(&self, ctx: &StrategyContext<'_>, scope: &Scope) -> Result<ComparisonOutcome> {
        let source_query = ctx.source.queries(ctx.table).checksum(scope);
        let target_query = ctx.target.queries(ctx.table).checksum(scope);
        let (source_rows, target_rows) = ctx
            .runner
            .run_both((ctx.source, &source_query), (ctx.target, &target_query))
            .await?;

        let source = checksum_pair(ctx.source, &source_rows)?;
        let target = checksum_pair(ctx.target, &target_rows)?;
        if source != target {
            debug!(
                "{} {}: checksum {:?} on {} vs {:?} on {}",
                ctx.table.name,
                scope,
                source,
                ctx.source.name(),
                target,
                ctx.target.name()
            );
        }
        Ok(ComparisonOutcome::from_equal(source == target))
    }
}

/// Fetches every row in scope and compares values by primary key.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullRowCompare;

#[async_trait]
impl EqualityStrategy for FullRowCompare {
    fn name(&self) -> &'static str {
        StrategyKind::FullRow.as_str()
    }

    async fn compare(&self, ctx: &StrategyContext<'_>, scope: &Scope) -> Result<ComparisonOutcome> {
        let source_query = ctx.source.queries(ctx.table).fetch_rows(scope);
        let target_query = ctx.target.queries(ctx.table).fetch_rows(scope);
        let (source_rows, target_rows) = ctx
            .runner
            .run_both((ctx.source, &source_query), (ctx.target, &target_query))
            .await?;

        if source_rows.len() != target_rows.len() {
            debug!(
                "{} {}: {} rows on {} vs {} on {}",
                ctx.table.name,
                scope,
                source_rows.len(),
                ctx.source.name(),
                target_rows.len(),
                ctx.target.name()
            );
            return Ok(ComparisonOutcome::Inconsistent);
        }

        let pk_len = ctx.table.primary_key.len();
        let mut source_map: HashMap<Vec<String>, Vec<String>> =
            HashMap::with_capacity(source_rows.len());
        for row in &source_rows {
            let (pk, values) = split_row(ctx.source, row, pk_len)?;
            source_map.insert(pk, values);
        }

        for row in &target_rows {
            let (pk, values) = split_row(ctx.target, row, pk_len)?;
            match source_map.remove(&pk) {
                Some(expected) if expected == values => {}
                Some(_) => {
                    debug!("{} {}: values differ at key {:?}", ctx.table.name, scope, pk);
                    return Ok(ComparisonOutcome::Inconsistent);
                }
                None => {
                    debug!(
                        "{} {}: key {:?} missing on {}",
                        ctx.table.name,
                        scope,
                        pk,
                        ctx.source.name()
                    );
                    return Ok(ComparisonOutcome::Inconsistent);
                }
            }
        }

        Ok(ComparisonOutcome::from_equal(source_map.is_empty()))
    }
}

fn single_count(side: &Side, rows: &[Row]) -> Result<i64> {
    rows.first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_i64())
        .ok_or_else(|| DiffError::query(side.name(), "count query returned no value"))
}

fn checksum_pair(side: &Side, rows: &[Row]) -> Result<(i64, String)> {
    let row = rows
        .first()
        .ok_or_else(|| DiffError::query(side.name(), "checksum query returned no rows"))?;
    match row.as_slice() {
        [count, sum, ..] => {
            let count = count
                .as_i64()
                .ok_or_else(|| DiffError::query(side.name(), "checksum count is not an integer"))?;
            Ok((count, sum.as_text().trim().to_string()))
        }
        _ => Err(DiffError::query(
            side.name(),
            format!("checksum query returned {} columns, expected 2", row.len()),
        )),
    }
}

fn split_row(side: &Side, row: &Row, pk_len: usize) -> Result<(Vec<String>, Vec<String>)> {
    if row.len() < pk_len {
        return Err(DiffError::query(
            side.name(),
            format!("row has {} columns, primary key needs {}", row.len(), pk_len),
        ));
    }
    let text: Vec<String> = row.iter().map(|v| v.as_text()).collect();
    let (pk, values) = text.split_at(pk_len);
    Ok((pk.to_vec(), values.to_vec()))
}

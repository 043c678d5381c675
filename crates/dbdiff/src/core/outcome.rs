//! Comparison outcomes and per-run records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DiffError, ErrorKind, Result};

use super::schema::{ChunkBoundary, StrategyKind};

/// Result of comparing one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    Consistent,
    Inconsistent,
    /// The comparison could not be completed. Says nothing about the data.
    Error { kind: ErrorKind, detail: String },
}

impl ComparisonOutcome {
    pub fn from_error(err: &DiffError) -> Self {
        ComparisonOutcome::Error {
            kind: err.kind().unwrap_or(ErrorKind::QueryError),
            detail: err.to_string(),
        }
    }

    pub fn from_equal(equal: bool) -> Self {
        if equal {
            ComparisonOutcome::Consistent
        } else {
            ComparisonOutcome::Inconsistent
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, ComparisonOutcome::Consistent)
    }

    /// Gauge value: 1 consistent, 0 inconsistent, -1 error.
    pub fn status_value(&self) -> f64 {
        match self {
            ComparisonOutcome::Consistent => 1.0,
            ComparisonOutcome::Inconsistent => 0.0,
            ComparisonOutcome::Error { .. } => -1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ComparisonOutcome::Consistent => "consistent",
            ComparisonOutcome::Inconsistent => "inconsistent",
            ComparisonOutcome::Error { .. } => "error",
        }
    }
}

/// Phase of a table run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Counting,
    Comparing,
    Planning,
    ChunkLoop,
    Done,
    Error,
    Cancelled,
}

/// Outcome of one chunk of a large table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    pub chunk_id: u64,
    pub lower: String,
    pub upper: String,
    pub outcome: ComparisonOutcome,
}

impl ChunkOutcome {
    pub fn new(chunk: &ChunkBoundary, outcome: ComparisonOutcome) -> Self {
        Self {
            chunk_id: chunk.id,
            lower: chunk.lower.to_string(),
            upper: chunk.upper.to_string(),
            outcome,
        }
    }
}

/// Row counts observed on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub source: i64,
    pub target: i64,
}

impl RowCounts {
    pub fn difference(&self) -> i64 {
        self.source - self.target
    }
}

/// Record of one engine execution for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableComparisonRun {
    pub run_id: String,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: RunPhase,
    /// Every phase entered, in order.
    pub phases: Vec<RunPhase>,
    pub row_counts: Option<RowCounts>,
    pub strategy: Option<StrategyKind>,
    pub chunks: Vec<ChunkOutcome>,
    /// `None` while running and after cancellation.
    pub outcome: Option<ComparisonOutcome>,
}

impl TableComparisonRun {
    pub fn start(table: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            table: table.into(),
            started_at: Utc::now(),
            finished_at: None,
            phase: RunPhase::Pending,
            phases: vec![RunPhase::Pending],
            row_counts: None,
            strategy: None,
            chunks: Vec::new(),
            outcome: None,
        }
    }

    pub fn transition(&mut self, next: RunPhase) {
        debug!("{}: {:?} -> {:?}", self.table, self.phase, next);
        self.phase = next;
        self.phases.push(next);
    }

    /// Close the run with a final outcome.
    pub fn finish(&mut self, outcome: ComparisonOutcome) {
        let phase = match outcome {
            ComparisonOutcome::Error { .. } => RunPhase::Error,
            _ => RunPhase::Done,
        };
        self.transition(phase);
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    /// Close the run without an outcome.
    pub fn cancel(&mut self) {
        self.transition(RunPhase::Cancelled);
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn chunks_compared(&self) -> usize {
        self.chunks.len()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

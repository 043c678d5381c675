//! In-memory connection provider for unit tests.
//!
//! Answers the structured fields of a [`Query`] instead of its SQL text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::DatabaseType;
use crate::core::schema::{Bound, KeyTuple, Scope};
use crate::core::traits::{Connection, ConnectionProvider, Query, QueryType};
use crate::core::value::{Row, SqlValue};
use crate::drivers::DialectImpl;
use crate::error::{DiffError, Result};

#[derive(Debug, Clone)]
pub(crate) struct MemoryRow {
    key: KeyTuple,
    pk: Vec<String>,
    values: Vec<String>,
}

/// Rows of one table, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryTable {
    rows: Vec<MemoryRow>,
}

impl MemoryTable {
    /// Rows `1..=n` keyed by their integer id, with status `status-{id}`.
    pub(crate) fn sequential(n: i64) -> Self {
        let mut table = Self::default();
        for id in 1..=n {
            let pk = id.to_string();
            let status = format!("status-{}", id);
            table.push(vec![SqlValue::Int(id)], &[pk.as_str()], &[status.as_str()]);
        }
        table
    }

    pub(crate) fn push(&mut self, key: Vec<SqlValue>, pk: &[&str], values: &[&str]) {
        self.rows.push(MemoryRow {
            key: KeyTuple(key),
            pk: pk.iter().map(|s| s.to_string()).collect(),
            values: values.iter().map(|s| s.to_string()).collect(),
        });
    }

    pub(crate) fn set_values(&mut self, pk: &str, values: &[&str]) {
        for row in self.rows.iter_mut().filter(|r| r.pk.first().map(String::as_str) == Some(pk)) {
            row.values = values.iter().map(|s| s.to_string()).collect();
        }
    }

    pub(crate) fn remove(&mut self, pk: &str) {
        self.rows
            .retain(|r| r.pk.first().map(String::as_str) != Some(pk));
    }

    pub(crate) fn keys(&self) -> Vec<KeyTuple> {
        self.rows.iter().map(|r| r.key.clone()).collect()
    }

    fn in_scope(&self, scope: &Scope) -> Vec<&MemoryRow> {
        let mut rows: Vec<&MemoryRow> = self
            .rows
            .iter()
            .filter(|r| match scope {
                Scope::Table => true,
                Scope::Chunk(chunk) => chunk.contains(&r.key),
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

#[derive(Default)]
struct State {
    tables: Mutex<HashMap<String, MemoryTable>>,
    count_overrides: Mutex<HashMap<String, i64>>,
    exhausted: AtomicBool,
    fail_on: Mutex<Option<QueryType>>,
    fail_table: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    discarded: AtomicUsize,
    log: Mutex<Vec<Query>>,
}

pub(crate) struct MemoryProvider {
    name: String,
    dialect: DialectImpl,
    state: Arc<State>,
}

impl MemoryProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dialect: DialectImpl::for_type(DatabaseType::Postgres),
            state: Arc::new(State::default()),
        }
    }

    pub(crate) fn with_table(self, name: &str, table: MemoryTable) -> Self {
        self.state
            .tables
            .lock()
            .unwrap()
            .insert(name.to_string(), table);
        self
    }

    /// Report `count` for whole-table counts regardless of stored rows.
    pub(crate) fn with_row_count(self, name: &str, count: i64) -> Self {
        self.state
            .count_overrides
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
        self
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Make `acquire` fail as if the pool had no free connection.
    pub(crate) fn set_exhausted(&self, exhausted: bool) {
        self.state.exhausted.store(exhausted, Ordering::SeqCst);
    }

    pub(crate) fn fail_on(&self, query_type: QueryType) {
        *self.state.fail_on.lock().unwrap() = Some(query_type);
    }

    /// Fail every query against one table.
    pub(crate) fn fail_table(&self, name: &str) {
        *self.state.fail_table.lock().unwrap() = Some(name.to_string());
    }

    /// Most connections ever checked out at once.
    pub(crate) fn peak_in_use(&self) -> usize {
        self.state.peak_in_use.load(Ordering::SeqCst)
    }

    /// Connections closed instead of being returned to the pool.
    pub(crate) fn discarded(&self) -> usize {
        self.state.discarded.load(Ordering::SeqCst)
    }

    pub(crate) fn update_table(&self, name: &str, f: impl FnOnce(&mut MemoryTable)) {
        let mut tables = self.state.tables.lock().unwrap();
        f(tables.entry(name.to_string()).or_default());
    }

    pub(crate) fn queries(&self) -> Vec<Query> {
        self.state.log.lock().unwrap().clone()
    }

    pub(crate) fn queries_of(&self, query_type: QueryType) -> usize {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.query_type == query_type)
            .count()
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        if self.state.exhausted.load(Ordering::SeqCst) {
            return Err(DiffError::connection(&self.name, "pool exhausted"));
        }
        let in_use = self.state.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_use.fetch_max(in_use, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            name: self.name.clone(),
            state: self.state.clone(),
        }))
    }

    fn connections_in_use(&self) -> usize {
        self.state.in_use.load(Ordering::SeqCst)
    }
}

struct MemoryConnection {
    name: String,
    state: Arc<State>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.state.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>> {
        self.state.log.lock().unwrap().push(query.clone());

        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.state.fail_on.lock().unwrap() == Some(query.query_type) {
            return Err(DiffError::query(&self.name, "injected failure"));
        }
        if self.state.fail_table.lock().unwrap().as_deref() == Some(query.table.as_str()) {
            return Err(DiffError::query(&self.name, "relation does not exist"));
        }

        let tables = self.state.tables.lock().unwrap();
        let empty = MemoryTable::default();
        let table = tables.get(&query.table).unwrap_or(&empty);

        let rows = match query.query_type {
            QueryType::Count => {
                let overridden = match query.scope {
                    Scope::Table => self
                        .state
                        .count_overrides
                        .lock()
                        .unwrap()
                        .get(&query.table)
                        .copied(),
                    Scope::Chunk(_) => None,
                };
                let count = overridden.unwrap_or(table.in_scope(&query.scope).len() as i64);
                vec![vec![SqlValue::Int(count)]]
            }
            QueryType::Checksum => {
                let rows = table.in_scope(&query.scope);
                let sum: u64 = rows
                    .iter()
                    .map(|r| fnv1a(&r.pk.iter().chain(&r.values).cloned().collect::<Vec<_>>().join("|")))
                    .sum();
                vec![vec![
                    SqlValue::Int(rows.len() as i64),
                    SqlValue::Text(sum.to_string()),
                ]]
            }
            QueryType::FetchRows => {
                let mut rows = table.in_scope(&query.scope);
                rows.sort_by(|a, b| a.pk.cmp(&b.pk));
                rows.iter()
                    .map(|r| {
                        r.pk.iter()
                            .chain(&r.values)
                            .map(|v| SqlValue::Text(v.clone()))
                            .collect()
                    })
                    .collect()
            }
            QueryType::SampleKey => {
                let sample = query.sample.unwrap_or(crate::core::traits::KeySample {
                    offset: 0,
                    exclusive: false,
                });
                let lower = match &query.scope {
                    Scope::Chunk(chunk) => chunk.lower.clone(),
                    Scope::Table => Bound::Start,
                };
                table
                    .in_scope(&Scope::Table)
                    .into_iter()
                    .filter(|r| match &lower {
                        Bound::Key(k) if sample.exclusive => r.key > *k,
                        Bound::Key(k) => r.key >= *k,
                        Bound::Start => true,
                        Bound::End => false,
                    })
                    .nth(sample.offset as usize)
                    .map(|r| vec![r.key.values().to_vec()])
                    .unwrap_or_default()
            }
        };
        Ok(rows)
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    fn discard(&mut self) {
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

fn fnv1a(text: &str) -> u64 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as u64
}

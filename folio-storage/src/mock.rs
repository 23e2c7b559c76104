//! Scriptable in-memory backing store for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use folio_core::StorageError;

use crate::backing::{BackingStore, FetchMode, QueryData, Row, Statement, WriteAck};

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Ack(WriteAck),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: Response,
}

/// In-memory backing store answering by SQL substring.
///
/// Rules are matched in registration order; the first rule whose pattern
/// occurs in the statement's SQL decides the response. Unmatched reads
/// return no rows, unmatched writes acknowledge zero changes.
#[derive(Debug)]
pub struct MockBackingStore {
    rules: RwLock<Vec<Rule>>,
    executed: RwLock<Vec<Statement>>,
    calls: AtomicUsize,
    delay: RwLock<Option<Duration>>,
    healthy: RwLock<bool>,
}

impl Default for MockBackingStore {
    fn default() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            executed: RwLock::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: RwLock::new(None),
            healthy: RwLock::new(true),
        }
    }
}

impl MockBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `pattern` with `rows`.
    pub fn with_rows(self, pattern: &str, rows: Vec<Row>) -> Self {
        self.push_rule(pattern, Response::Rows(rows));
        self
    }

    /// Acknowledge writes containing `pattern` with `changes` affected rows.
    pub fn with_ack(self, pattern: &str, changes: u64, last_row_id: Option<i64>) -> Self {
        self.push_rule(
            pattern,
            Response::Ack(WriteAck {
                changes,
                last_row_id,
            }),
        );
        self
    }

    /// Fail statements containing `pattern` with a driver error.
    pub fn failing_on(self, pattern: &str, message: &str) -> Self {
        self.push_rule(pattern, Response::Fail(message.to_string()));
        self
    }

    /// Sleep before answering, on the tokio clock.
    pub fn with_delay(self, delay: Duration) -> Self {
        if let Ok(mut guard) = self.delay.write() {
            *guard = Some(delay);
        }
        self
    }

    /// Replace any existing rules for `pattern` with `rows`.
    pub fn set_rows(&self, pattern: &str, rows: Vec<Row>) {
        if let Ok(mut rules) = self.rules.write() {
            rules.retain(|r| r.pattern != pattern);
        }
        self.push_rule(pattern, Response::Rows(rows));
    }

    pub fn set_healthy(&self, healthy: bool) {
        if let Ok(mut guard) = self.healthy.write() {
            *guard = healthy;
        }
    }

    /// Number of statements that reached the store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of executed statements whose SQL contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.executed
            .read()
            .map(|log| log.iter().filter(|s| s.sql.contains(pattern)).count())
            .unwrap_or(0)
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.executed.read().map(|log| log.clone()).unwrap_or_default()
    }

    fn push_rule(&self, pattern: &str, response: Response) {
        if let Ok(mut rules) = self.rules.write() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                response,
            });
        }
    }

    fn respond(&self, statement: &Statement) -> Result<Option<Response>, StorageError> {
        let rules = self.rules.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rules
            .iter()
            .find(|r| statement.sql.contains(&r.pattern))
            .map(|r| r.response.clone()))
    }
}

#[async_trait]
impl BackingStore for MockBackingStore {
    async fn execute(&self, statement: &Statement) -> Result<QueryData, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(statement.clone());

        let delay = *self.delay.read().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.respond(statement)?;
        match (response, statement.mode) {
            (Some(Response::Fail(message)), _) => {
                Err(StorageError::QueryFailed { reason: message })
            }
            (Some(Response::Rows(rows)), FetchMode::All) => Ok(QueryData::Rows(rows)),
            (Some(Response::Rows(rows)), FetchMode::First) => {
                Ok(QueryData::Row(rows.into_iter().next()))
            }
            (Some(Response::Rows(rows)), FetchMode::Run) => Ok(QueryData::Ack(WriteAck {
                changes: rows.len() as u64,
                last_row_id: None,
            })),
            (Some(Response::Ack(ack)), FetchMode::Run) => Ok(QueryData::Ack(ack)),
            (Some(Response::Ack(_)) | None, FetchMode::All) => Ok(QueryData::Rows(Vec::new())),
            (Some(Response::Ack(_)) | None, FetchMode::First) => Ok(QueryData::Row(None)),
            (None, FetchMode::Run) => Ok(QueryData::Ack(WriteAck::default())),
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let healthy = *self.healthy.read().map_err(|_| StorageError::LockPoisoned)?;
        if healthy {
            Ok(())
        } else {
            Err(StorageError::ConnectionFailed {
                reason: "mock store marked unhealthy".to_string(),
            })
        }
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
pub fn row<I, K>(columns: I) -> Row
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    columns.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_matching_rule_wins() -> Result<(), StorageError> {
        let store = MockBackingStore::new()
            .with_rows("FROM posts", vec![row([("id", json!(1))]), row([("id", json!(2))])])
            .failing_on("FROM users", "relation \"users\" does not exist");

        let all = store
            .execute(&Statement::all("SELECT * FROM posts", vec![]))
            .await?;
        assert!(matches!(all, QueryData::Rows(ref rows) if rows.len() == 2));

        let first = store
            .execute(&Statement::first("SELECT * FROM posts WHERE id = ?", vec![json!(1)]))
            .await?;
        assert_eq!(first, QueryData::Row(Some(row([("id", json!(1))]))));

        let err = store
            .execute(&Statement::all("SELECT * FROM users", vec![]))
            .await;
        assert!(matches!(err, Err(StorageError::QueryFailed { .. })));
        assert_eq!(store.calls(), 3);
        assert_eq!(store.calls_matching("FROM posts"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unmatched_defaults() -> Result<(), StorageError> {
        let store = MockBackingStore::new();
        assert_eq!(
            store.execute(&Statement::all("SELECT 1", vec![])).await?,
            QueryData::Rows(vec![])
        );
        assert_eq!(
            store.execute(&Statement::run("DELETE FROM t", vec![])).await?,
            QueryData::Ack(WriteAck::default())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let store = MockBackingStore::new();
        assert!(store.health_check().await.is_ok());
        store.set_healthy(false);
        assert!(store.health_check().await.is_err());
    }
}

//! Backing relational store boundary.
//!
//! The executor only needs `prepare(sql).bind(params).{run|all|first}()`:
//! a [`Statement`] carries all three, and a [`BackingStore`] turns it into
//! [`QueryData`].

use async_trait::async_trait;
use folio_core::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A result row as column name to JSON value.
pub type Row = Map<String, Value>;

/// How the caller wants the statement's result shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Execute for side effects; yields a [`WriteAck`].
    Run,
    /// Every row.
    All,
    /// The first row, if any.
    First,
}

/// A prepared statement with bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub mode: FetchMode,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>, mode: FetchMode) -> Self {
        Self {
            sql: sql.into(),
            params,
            mode,
        }
    }

    pub fn all(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(sql, params, FetchMode::All)
    }

    pub fn first(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(sql, params, FetchMode::First)
    }

    pub fn run(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(sql, params, FetchMode::Run)
    }

    pub fn kind(&self) -> QueryKind {
        QueryKind::classify(&self.sql)
    }
}

/// Write acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteAck {
    pub changes: u64,
    pub last_row_id: Option<i64>,
}

/// Result of executing a [`Statement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryData {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Ack(WriteAck),
}

impl QueryData {
    /// Whether this value has the shape `mode` produces.
    pub fn matches_mode(&self, mode: FetchMode) -> bool {
        matches!(
            (self, mode),
            (QueryData::Rows(_), FetchMode::All)
                | (QueryData::Row(_), FetchMode::First)
                | (QueryData::Ack(_), FetchMode::Run)
        )
    }

    /// Plain JSON for response bodies: an array, an object or null, or the ack.
    pub fn into_json(self) -> Value {
        match self {
            QueryData::Rows(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
            QueryData::Row(Some(row)) => Value::Object(row),
            QueryData::Row(None) => Value::Null,
            QueryData::Ack(ack) => serde_json::json!({
                "changes": ack.changes,
                "lastRowId": ack.last_row_id,
            }),
        }
    }
}

/// Read/write classification of SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Read,
    Write,
}

const READ_KEYWORDS: &[&str] = &["select", "with", "explain", "show", "pragma", "values"];

/// Leading keywords whose body may still carry a write
/// (`WITH d AS (DELETE ...)`, `EXPLAIN ANALYZE UPDATE ...`).
const WRAPPING_KEYWORDS: &[&str] = &["with", "explain"];

const WRITE_KEYWORDS: &[&str] = &["insert", "update", "delete", "merge"];

impl QueryKind {
    /// Classify by the statement's leading keyword.
    ///
    /// Anything that does not start with a read keyword is a write, so
    /// unknown statements are never cached. `WITH` and `EXPLAIN` statements
    /// are writes when their body names a write keyword outside quoted text.
    pub fn classify(sql: &str) -> Self {
        let leading = sql
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if !READ_KEYWORDS.contains(&leading.as_str()) {
            return QueryKind::Write;
        }
        if WRAPPING_KEYWORDS.contains(&leading.as_str())
            && unquoted_words(sql).any(|w| WRITE_KEYWORDS.contains(&w.as_str()))
        {
            return QueryKind::Write;
        }
        QueryKind::Read
    }

    pub fn is_read(self) -> bool {
        matches!(self, QueryKind::Read)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Read => "read",
            QueryKind::Write => "write",
        }
    }
}

/// Lowercased words of `sql`, skipping quoted literals, quoted identifiers
/// and comments.
fn unquoted_words(sql: &str) -> impl Iterator<Item = String> + '_ {
    let mut chars = sql.chars().peekable();
    std::iter::from_fn(move || loop {
        let c = chars.next()?;
        match c {
            '\'' | '"' => {
                // Doubled quotes are escapes; skipping them pairwise is equivalent.
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                word.push(c.to_ascii_lowercase());
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        word.push(n.to_ascii_lowercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                return Some(word);
            }
            _ => {}
        }
    })
}

/// The relational store queries ultimately run against.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Execute a statement, shaping the result according to `statement.mode`.
    async fn execute(&self, statement: &Statement) -> Result<QueryData, StorageError>;

    /// Cheap round trip used by readiness probes.
    async fn health_check(&self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_reads() {
        for sql in [
            "SELECT * FROM posts",
            "  select id from users",
            "WITH recent AS (SELECT 1) SELECT * FROM recent",
            "(SELECT 1) UNION (SELECT 2)",
            "EXPLAIN SELECT 1",
        ] {
            assert_eq!(QueryKind::classify(sql), QueryKind::Read, "{sql}");
        }
    }

    #[test]
    fn test_classify_writes() {
        for sql in [
            "INSERT INTO posts (title) VALUES (?)",
            "update posts set title = ?",
            "DELETE FROM comments WHERE id = ?",
            "CREATE TABLE t (id int)",
            "WITH d AS (DELETE FROM posts WHERE id = ? RETURNING id) SELECT * FROM d",
            "with moved as (update posts set status = 'archived' returning id) select count(*) from moved",
            "WITH src AS (SELECT 1 AS id) INSERT INTO audit (id) SELECT id FROM src",
            "EXPLAIN ANALYZE DELETE FROM posts",
            "",
        ] {
            assert_eq!(QueryKind::classify(sql), QueryKind::Write, "{sql}");
        }
    }

    #[test]
    fn test_classify_ignores_write_words_in_quotes_and_comments() {
        for sql in [
            "WITH t AS (SELECT 'delete me' AS note) SELECT * FROM t",
            "WITH t AS (SELECT \"update\" FROM logs) SELECT * FROM t",
            "WITH t AS (SELECT updated_at FROM posts) SELECT * FROM t -- insert later",
            "WITH t AS (SELECT 1 /* merge */) SELECT * FROM t",
            "WITH t AS (SELECT 'it''s an insert') SELECT * FROM t",
        ] {
            assert_eq!(QueryKind::classify(sql), QueryKind::Read, "{sql}");
        }
    }

    #[test]
    fn test_matches_mode() {
        assert!(QueryData::Rows(vec![]).matches_mode(FetchMode::All));
        assert!(QueryData::Row(None).matches_mode(FetchMode::First));
        assert!(!QueryData::Rows(vec![]).matches_mode(FetchMode::First));
        assert!(QueryData::Ack(WriteAck::default()).matches_mode(FetchMode::Run));
    }

    #[test]
    fn test_into_json() {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(5));
        assert_eq!(
            QueryData::Rows(vec![row.clone()]).into_json(),
            json!([{"id": 5}])
        );
        assert_eq!(QueryData::Row(Some(row)).into_json(), json!({"id": 5}));
        assert_eq!(QueryData::Row(None).into_json(), Value::Null);
    }
}

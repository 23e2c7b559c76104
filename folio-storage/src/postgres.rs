//! PostgreSQL backing store over a deadpool connection pool.
//!
//! Statements are written with `?` placeholders and rewritten to `$n`.
//! Parameters arrive as JSON and are converted according to the types the
//! server inferred when preparing the statement. Rows come back as JSON
//! objects built server-side with `row_to_json`, so no per-column decoding
//! is needed here.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use folio_core::StorageError;
use serde_json::Value;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;

use crate::backing::{BackingStore, FetchMode, QueryData, Row, Statement, WriteAck};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "folio".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("FOLIO_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("FOLIO_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("FOLIO_DB_NAME").unwrap_or_else(|_| "folio".to_string()),
            user: std::env::var("FOLIO_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("FOLIO_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("FOLIO_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("FOLIO_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, StorageError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::ConnectionFailed {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// STORE
// ============================================================================

/// [`BackingStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, StorageError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl BackingStore for PostgresStore {
    async fn execute(&self, statement: &Statement) -> Result<QueryData, StorageError> {
        let client = self.get_conn().await?;
        let sql = rewrite_placeholders(&statement.sql);

        let sql = match statement.mode {
            FetchMode::Run => sql,
            // A CTE also accepts INSERT/UPDATE/DELETE ... RETURNING.
            FetchMode::All | FetchMode::First => format!(
                "WITH q AS ({sql}) SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json) FROM q"
            ),
        };

        let prepared = client.prepare_cached(&sql).await.map_err(query_failed)?;
        let params = bind_params(&statement.params, prepared.params())?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        match statement.mode {
            FetchMode::Run => {
                let changes = client.execute(&prepared, &refs).await.map_err(query_failed)?;
                Ok(QueryData::Ack(WriteAck {
                    changes,
                    last_row_id: None,
                }))
            }
            FetchMode::All | FetchMode::First => {
                let row = client.query_one(&prepared, &refs).await.map_err(query_failed)?;
                let json: Value = row.try_get(0).map_err(|e| StorageError::Decode {
                    reason: e.to_string(),
                })?;
                let rows = json_rows(json)?;
                Ok(match statement.mode {
                    FetchMode::First => QueryData::Row(rows.into_iter().next()),
                    _ => QueryData::Rows(rows),
                })
            }
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let client = self.get_conn().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(query_failed)?;
        Ok(())
    }
}

fn query_failed(e: tokio_postgres::Error) -> StorageError {
    StorageError::QueryFailed {
        reason: e
            .as_db_error()
            .map(|db| db.message().to_string())
            .unwrap_or_else(|| e.to_string()),
    }
}

fn json_rows(json: Value) -> Result<Vec<Row>, StorageError> {
    let Value::Array(items) = json else {
        return Err(StorageError::Decode {
            reason: "expected a JSON array of rows".to_string(),
        });
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            other => Err(StorageError::Decode {
                reason: format!("expected a JSON object row, got {other}"),
            }),
        })
        .collect()
}

// ============================================================================
// PLACEHOLDERS AND PARAMETERS
// ============================================================================

/// Rewrite `?` placeholders to `$1..$n`, leaving quoted text alone.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    let mut in_single = false;
    let mut in_double = false;
    for c in sql.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '?' if !in_single && !in_double => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn bind_params(values: &[Value], types: &[Type]) -> Result<Vec<BoxedParam>, StorageError> {
    if values.len() != types.len() {
        return Err(StorageError::InvalidParameter {
            index: values.len().min(types.len()),
            reason: format!(
                "statement expects {} parameters, got {}",
                types.len(),
                values.len()
            ),
        });
    }
    values
        .iter()
        .zip(types)
        .enumerate()
        .map(|(index, (value, ty))| bind_param(index, value, ty))
        .collect()
}

fn bind_param(index: usize, value: &Value, ty: &Type) -> Result<BoxedParam, StorageError> {
    let invalid = |reason: &str| StorageError::InvalidParameter {
        index,
        reason: format!("{reason} for {ty}, got {value}"),
    };

    if *ty == Type::BOOL {
        let v = match value {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::String(s) => Some(s.parse::<bool>().map_err(|_| invalid("expected boolean"))?),
            _ => return Err(invalid("expected boolean")),
        };
        return Ok(Box::new(v));
    }

    if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        let v = match value {
            Value::Null => None,
            Value::Number(n) => Some(n.as_i64().ok_or_else(|| invalid("expected integer"))?),
            Value::String(s) => Some(s.trim().parse::<i64>().map_err(|_| invalid("expected integer"))?),
            _ => return Err(invalid("expected integer")),
        };
        let boxed: BoxedParam = if *ty == Type::INT2 {
            Box::new(v.map(i16::try_from).transpose().map_err(|_| invalid("out of range"))?)
        } else if *ty == Type::INT4 {
            Box::new(v.map(i32::try_from).transpose().map_err(|_| invalid("out of range"))?)
        } else {
            Box::new(v)
        };
        return Ok(boxed);
    }

    if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        let v = match value {
            Value::Null => None,
            Value::Number(n) => Some(n.as_f64().ok_or_else(|| invalid("expected number"))?),
            Value::String(s) => Some(s.trim().parse::<f64>().map_err(|_| invalid("expected number"))?),
            _ => return Err(invalid("expected number")),
        };
        let boxed: BoxedParam = if *ty == Type::FLOAT4 {
            Box::new(v.map(|f| f as f32))
        } else {
            Box::new(v)
        };
        return Ok(boxed);
    }

    if *ty == Type::JSON || *ty == Type::JSONB {
        let v = (!value.is_null()).then(|| value.clone());
        return Ok(Box::new(v));
    }

    // Text and anything else the server can cast from text.
    let v = match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    };
    Ok(Box::new(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrite_placeholders() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM posts WHERE id = ? AND status = ?"),
            "SELECT * FROM posts WHERE id = $1 AND status = $2"
        );
        assert_eq!(
            rewrite_placeholders("SELECT '?' AS q, \"col?\" FROM t WHERE a = ?"),
            "SELECT '?' AS q, \"col?\" FROM t WHERE a = $1"
        );
        assert_eq!(rewrite_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_bind_param_count_mismatch() {
        let result = bind_params(&[json!(1)], &[Type::INT8, Type::TEXT]);
        assert!(matches!(result, Err(StorageError::InvalidParameter { .. })));
    }

    #[test]
    fn test_bind_param_type_errors() {
        assert!(bind_param(0, &json!("abc"), &Type::INT8).is_err());
        assert!(bind_param(0, &json!(70000), &Type::INT2).is_err());
        assert!(bind_param(0, &json!([1]), &Type::BOOL).is_err());
        assert!(bind_param(0, &json!("42"), &Type::INT4).is_ok());
        assert!(bind_param(0, &Value::Null, &Type::INT4).is_ok());
        assert!(bind_param(0, &json!({"a": 1}), &Type::JSONB).is_ok());
        assert!(bind_param(0, &json!(3.5), &Type::TEXT).is_ok());
    }

    #[test]
    fn test_json_rows() {
        let rows = json_rows(json!([{"id": 1}, {"id": 2}])).expect("array of objects");
        assert_eq!(rows.len(), 2);
        assert!(json_rows(json!({"id": 1})).is_err());
        assert!(json_rows(json!([1])).is_err());
    }

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "folio");
    }
}

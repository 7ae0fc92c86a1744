//! Postgres-backed transactional resource.
//!
//! A physical transaction is a pooled connection with an explicit
//! BEGIN/COMMIT/ROLLBACK lifecycle. The handle owns the connection behind a
//! shared async mutex so entity accessors obtained from the ambient scope
//! execute against the same transaction in issue order; finalizing the
//! handle releases the connection back to the pool.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config;
use crate::context::actor;
use crate::transaction::error::TxError;
use crate::transaction::resource::{
    DataAccessor, TransactionHandle, TransactionalResource, TxHandle,
};

type SharedConn = Arc<Mutex<Option<PoolConnection<Postgres>>>>;

/// Postgres transactional resource over a connection pool.
pub struct PgResource {
    pool: PgPool,
}

impl PgResource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the named database, swapping the database name into
    /// DATABASE_URL and sizing the pool from config.
    pub async fn connect(database_name: &str) -> Result<Self, TxError> {
        if !is_valid_identifier(database_name) {
            return Err(TxError::InvalidEntityName(database_name.to_string()));
        }

        let connection_string = build_connection_string(database_name)?;
        let database = &config::config().database;

        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .acquire_timeout(Duration::from_secs(database.acquire_timeout_secs))
            .connect(&connection_string)
            .await?;

        info!("Created database pool for: {}", database_name);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn downcast<'a>(handle: &'a TxHandle) -> Result<&'a PgTransactionHandle, TxError> {
        handle
            .as_any()
            .downcast_ref::<PgTransactionHandle>()
            .ok_or(TxError::ForeignHandle)
    }
}

fn build_connection_string(database_name: &str) -> Result<String, TxError> {
    let base =
        std::env::var("DATABASE_URL").map_err(|_| TxError::ConfigMissing("DATABASE_URL"))?;

    let mut url = url::Url::parse(&base).map_err(|_| TxError::InvalidDatabaseUrl)?;
    // Replace the path with the database name (ensure leading slash)
    url.set_path(&format!("/{}", database_name));
    Ok(String::from(url))
}

#[async_trait]
impl TransactionalResource for PgResource {
    async fn begin(&self) -> Result<TxHandle, TxError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN").execute(&mut *conn).await?;

        let handle = PgTransactionHandle {
            id: Uuid::new_v4(),
            conn: Arc::new(Mutex::new(Some(conn))),
        };
        debug!("BEGIN transaction {}", handle.id);
        Ok(Arc::new(handle))
    }

    async fn commit(&self, handle: &TxHandle) -> Result<(), TxError> {
        Self::downcast(handle)?.finalize("COMMIT").await
    }

    async fn rollback(&self, handle: &TxHandle) -> Result<(), TxError> {
        Self::downcast(handle)?.finalize("ROLLBACK").await
    }
}

/// A live Postgres transaction: one pooled connection between BEGIN and
/// COMMIT/ROLLBACK.
pub struct PgTransactionHandle {
    id: Uuid,
    conn: SharedConn,
}

impl PgTransactionHandle {
    async fn finalize(&self, sql: &str) -> Result<(), TxError> {
        let mut guard = self.conn.lock().await;
        let mut conn = guard.take().ok_or(TxError::HandleClosed)?;
        let result = sqlx::query(sql).execute(&mut *conn).await;
        // Dropping the connection returns it to the pool either way
        drop(conn);
        result?;
        Ok(())
    }
}

impl TransactionHandle for PgTransactionHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn accessor(&self, entity_kind: &str) -> Result<Box<dyn DataAccessor>, TxError> {
        if !is_valid_identifier(entity_kind) {
            return Err(TxError::InvalidEntityName(entity_kind.to_string()));
        }
        Ok(Box::new(PgAccessor {
            table_name: entity_kind.to_string(),
            conn: Arc::clone(&self.conn),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Entity-kind-scoped accessor bound to one transaction's connection.
pub struct PgAccessor {
    table_name: String,
    conn: SharedConn,
}

impl PgAccessor {
    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[Value],
        id: Option<Uuid>,
    ) -> Result<Vec<PgRow>, TxError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(TxError::HandleClosed)?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        if let Some(id) = id {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&mut **conn).await?)
    }
}

#[async_trait]
impl DataAccessor for PgAccessor {
    async fn insert(&self, mut record: Map<String, Value>) -> Result<Map<String, Value>, TxError> {
        // Audit stamping from the ambient actor; explicit fields win
        for (key, value) in actor::creation_stamp() {
            record.entry(key).or_insert(value);
        }

        let columns: Vec<String> = record.keys().cloned().collect();
        for column in &columns {
            if !is_valid_identifier(column) {
                return Err(TxError::InvalidEntityName(column.clone()));
            }
        }

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote_identifier(&self.table_name),
            column_list,
            placeholders
        );

        let params: Vec<Value> = record.values().cloned().collect();
        let rows = self.fetch_rows(&sql, &params, None).await?;
        rows.first()
            .map(row_to_map)
            .ok_or_else(|| TxError::Storage("INSERT returned no row".to_string()))
    }

    async fn update(
        &self,
        id: Uuid,
        mut changes: Map<String, Value>,
    ) -> Result<Map<String, Value>, TxError> {
        for (key, value) in actor::update_stamp() {
            changes.insert(key, value);
        }
        changes
            .entry("updated_at".to_string())
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let columns: Vec<String> = changes.keys().cloned().collect();
        for column in &columns {
            if !is_valid_identifier(column) {
                return Err(TxError::InvalidEntityName(column.clone()));
            }
        }

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", quote_identifier(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${} RETURNING *",
            quote_identifier(&self.table_name),
            assignments,
            columns.len() + 1
        );

        let params: Vec<Value> = changes.values().cloned().collect();
        let rows = self.fetch_rows(&sql, &params, Some(id)).await?;
        rows.first()
            .map(row_to_map)
            .ok_or_else(|| TxError::NotFound(format!("{} {}", self.table_name, id)))
    }

    async fn delete(&self, id: Uuid) -> Result<(), TxError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = $1 RETURNING id",
            quote_identifier(&self.table_name)
        );
        let rows = self.fetch_rows(&sql, &[], Some(id)).await?;
        if rows.is_empty() {
            return Err(TxError::NotFound(format!("{} {}", self.table_name, id)));
        }
        Ok(())
    }

    async fn select_one(&self, id: Uuid) -> Result<Option<Map<String, Value>>, TxError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = $1",
            quote_identifier(&self.table_name)
        );
        let rows = self.fetch_rows(&sql, &[], Some(id)).await?;
        Ok(rows.first().map(row_to_map))
    }

    async fn select_all(&self) -> Result<Vec<Map<String, Value>>, TxError> {
        let sql = format!("SELECT * FROM {}", quote_identifier(&self.table_name));
        let rows = self.fetch_rows(&sql, &[], None).await?;
        Ok(rows.iter().map(row_to_map).collect())
    }
}

fn bind_param<'q>(
    q: sqlx::query::Query<'q, Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                // Postgres doesn't have u64; cast down if safe
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        Value::Array(_) => q.bind(v.clone()), // JSONB
        Value::Object(_) => q.bind(v.clone()), // JSONB
    }
}

fn row_to_map(row: &PgRow) -> Map<String, Value> {
    let mut map = Map::new();
    for i in 0..row.len() {
        let column_name = row.column(i).name();

        let json_value = match row.try_get::<Option<Value>, _>(i) {
            Ok(Some(v)) => v,
            Ok(None) => Value::Null,
            Err(_) => {
                // Try concrete types if direct JSON extraction fails
                if let Ok(s) = row.try_get::<String, _>(i) {
                    Value::String(s)
                } else if let Ok(i64_val) = row.try_get::<i64, _>(i) {
                    Value::Number(i64_val.into())
                } else if let Ok(f64_val) = row.try_get::<f64, _>(i) {
                    Value::Number(
                        serde_json::Number::from_f64(f64_val).unwrap_or_else(|| 0.into()),
                    )
                } else if let Ok(bool_val) = row.try_get::<bool, _>(i) {
                    Value::Bool(bool_val)
                } else if let Ok(uuid_val) = row.try_get::<Uuid, _>(i) {
                    Value::String(uuid_val.to_string())
                } else if let Ok(ts_val) = row.try_get::<DateTime<Utc>, _>(i) {
                    Value::String(ts_val.to_rfc3339())
                } else {
                    Value::Null
                }
            }
        };

        map.insert(column_name.to_string(), json_value);
    }
    map
}

fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

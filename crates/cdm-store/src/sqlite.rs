//! SQLite-backed store.
//!
//! Tables are created with the declared column types. Table schemas are kept
//! in `cdm_tables`, counters in `cdm_counters` and key mappings in
//! `cdm_key_map`. Uniqueness of both the external and the internal key per
//! kind is enforced by the database, and every multi-statement write runs in
//! an `IMMEDIATE` transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::debug;

use cdm_model::{EntityKind, KeyAssignment, KeyMapping, Row, TableSchema, Value};

use crate::error::{Result, StoreError};
use crate::{Store, check_arity};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store persisted in a SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|err| classify("open", err))?;
        debug!(path = %path.display(), "opened sqlite store");
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|err| classify("open", err))?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| classify("bootstrap", err))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cdm_tables (
                name TEXT PRIMARY KEY,
                schema_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cdm_counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cdm_key_map (
                kind TEXT NOT NULL,
                external_key TEXT NOT NULL,
                internal_key INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (kind, external_key),
                UNIQUE (kind, internal_key)
            );
            ",
        )
        .map_err(|err| classify("bootstrap", err))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn schema_of(conn: &Connection, table: &str) -> Result<Option<TableSchema>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT schema_json FROM cdm_tables WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| classify("table_schema", err))?;
        json.map(|text| {
            serde_json::from_str(&text).map_err(|err| StoreError::Backend {
                message: format!("corrupt schema for {table}: {err}"),
            })
        })
        .transpose()
    }

    fn require_schema(conn: &Connection, table: &str) -> Result<TableSchema> {
        Self::schema_of(conn, table)?.ok_or_else(|| StoreError::TableNotFound {
            table: table.to_string(),
        })
    }

    fn draw(tx: &Transaction<'_>, counter: &str) -> Result<i64> {
        tx.query_row(
            "INSERT INTO cdm_counters (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
            params![counter],
            |row| row.get(0),
        )
        .map_err(|err| classify("next_value", err))
    }

    fn assign_in(
        tx: &Transaction<'_>,
        kind: EntityKind,
        external_key: &str,
        now: &str,
    ) -> Result<KeyAssignment> {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT internal_key FROM cdm_key_map WHERE kind = ?1 AND external_key = ?2",
                params![kind.as_str(), external_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| classify("assign_key", err))?;
        if let Some(internal_key) = existing {
            return Ok(KeyAssignment::existing(internal_key));
        }
        let internal_key = Self::draw(tx, &kind.counter_name())?;
        tx.execute(
            "INSERT INTO cdm_key_map (kind, external_key, internal_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), external_key, internal_key, now],
        )
        .map_err(|err| classify("assign_key", err))?;
        Ok(KeyAssignment::created(internal_key))
    }
}

impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn, "create_table")?;
        match Self::schema_of(&tx, &schema.name)? {
            Some(existing) if existing == *schema => return Ok(()),
            Some(_) => {
                return Err(StoreError::SchemaConflict {
                    table: schema.name.clone(),
                });
            }
            None => {}
        }
        let columns: Vec<String> = schema
            .columns
            .iter()
            .map(|def| format!("{} {}", quote_ident(&def.name), def.column_type.sql_type()))
            .collect();
        let ddl = format!(
            "CREATE TABLE {} ({})",
            quote_ident(&schema.name),
            columns.join(", ")
        );
        tx.execute(&ddl, [])
            .map_err(|err| classify("create_table", err))?;
        let json = serde_json::to_string(schema).map_err(|err| StoreError::Backend {
            message: err.to_string(),
        })?;
        tx.execute(
            "INSERT INTO cdm_tables (name, schema_json) VALUES (?1, ?2)",
            params![schema.name, json],
        )
        .map_err(|err| classify("create_table", err))?;
        tx.commit().map_err(|err| classify("create_table", err))
    }

    fn table_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        let conn = self.lock()?;
        Self::schema_of(&conn, table)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn, "drop_table")?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])
            .map_err(|err| classify("drop_table", err))?;
        tx.execute("DELETE FROM cdm_tables WHERE name = ?1", params![table])
            .map_err(|err| classify("drop_table", err))?;
        tx.commit().map_err(|err| classify("drop_table", err))
    }

    fn truncate(&self, table: &str) -> Result<()> {
        let conn = self.lock()?;
        Self::require_schema(&conn, table)?;
        conn.execute(&format!("DELETE FROM {}", quote_ident(table)), [])
            .map_err(|err| classify("truncate", err))?;
        Ok(())
    }

    fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<usize> {
        let mut conn = self.lock()?;
        let schema = Self::require_schema(&conn, table)?;
        check_arity(&schema, rows)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let placeholders: Vec<String> = (1..=schema.arity()).map(|idx| format!("?{idx}")).collect();
        let sql = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders.join(", ")
        );
        let tx = begin(&mut conn, "insert_batch")?;
        {
            let mut stmt = tx
                .prepare_cached(&sql)
                .map_err(|err| classify("insert_batch", err))?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(row.iter().map(to_sql)))
                    .map_err(|err| classify("insert_batch", err))?;
            }
        }
        tx.commit().map_err(|err| classify("insert_batch", err))?;
        Ok(rows.len())
    }

    fn scan(&self, table: &str) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        let schema = Self::require_schema(&conn, table)?;
        let arity = schema.arity();
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table)))
            .map_err(|err| classify("scan", err))?;
        let rows = stmt
            .query_map([], |row| {
                (0..arity)
                    .map(|idx| row.get_ref(idx).map(from_sql))
                    .collect::<rusqlite::Result<Row>>()
            })
            .map_err(|err| classify("scan", err))?;
        rows.collect::<rusqlite::Result<Vec<Row>>>()
            .map_err(|err| classify("scan", err))
    }

    fn count(&self, table: &str) -> Result<u64> {
        let conn = self.lock()?;
        if Self::schema_of(&conn, table)?.is_none() {
            return Ok(0);
        }
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
                [],
                |row| row.get(0),
            )
            .map_err(|err| classify("count", err))?;
        Ok(count.max(0) as u64)
    }

    fn next_value(&self, counter: &str) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn, "next_value")?;
        let value = Self::draw(&tx, counter)?;
        tx.commit().map_err(|err| classify("next_value", err))?;
        Ok(value)
    }

    fn current_value(&self, counter: &str) -> Result<i64> {
        let conn = self.lock()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM cdm_counters WHERE name = ?1",
                params![counter],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| classify("current_value", err))?;
        Ok(value.unwrap_or(0))
    }

    fn assign_key(&self, kind: EntityKind, external_key: &str) -> Result<KeyAssignment> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let tx = begin(&mut conn, "assign_key")?;
        let assignment = Self::assign_in(&tx, kind, external_key, &now)?;
        tx.commit().map_err(|err| classify("assign_key", err))?;
        Ok(assignment)
    }

    fn assign_keys(
        &self,
        kind: EntityKind,
        external_keys: &[String],
    ) -> Result<Vec<KeyAssignment>> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let tx = begin(&mut conn, "assign_keys")?;
        let mut assignments = Vec::with_capacity(external_keys.len());
        for key in external_keys {
            assignments.push(Self::assign_in(&tx, kind, key, &now)?);
        }
        tx.commit().map_err(|err| classify("assign_keys", err))?;
        Ok(assignments)
    }

    fn key_mappings(&self, kind: EntityKind) -> Result<Vec<KeyMapping>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT external_key, internal_key, created_at FROM cdm_key_map
                 WHERE kind = ?1 ORDER BY internal_key",
            )
            .map_err(|err| classify("key_mappings", err))?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|err| classify("key_mappings", err))?;
        let mut mappings = Vec::new();
        for row in rows {
            let (external_key, internal_key, created_at) =
                row.map_err(|err| classify("key_mappings", err))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|value| value.with_timezone(&Utc))
                .map_err(|err| StoreError::Backend {
                    message: format!("invalid mapping timestamp '{created_at}': {err}"),
                })?;
            mappings.push(KeyMapping {
                kind,
                external_key,
                internal_key,
                created_at,
            });
        }
        Ok(mappings)
    }

    fn mapping_count(&self, kind: EntityKind) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM cdm_key_map WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| classify("mapping_count", err))?;
        Ok(count.max(0) as u64)
    }

    fn truncate_mappings(&self, kind: EntityKind) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn, "truncate_mappings")?;
        tx.execute(
            "DELETE FROM cdm_key_map WHERE kind = ?1",
            params![kind.as_str()],
        )
        .map_err(|err| classify("truncate_mappings", err))?;
        tx.execute(
            "DELETE FROM cdm_counters WHERE name = ?1",
            params![kind.counter_name()],
        )
        .map_err(|err| classify("truncate_mappings", err))?;
        tx.commit().map_err(|err| classify("truncate_mappings", err))
    }
}

fn begin<'c>(conn: &'c mut Connection, operation: &'static str) -> Result<Transaction<'c>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| classify(operation, err))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Date(value) => SqlValue::Text(value.format("%Y-%m-%d").to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Int(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Maps a SQLite error onto the store taxonomy.
///
/// Lock contention becomes [`StoreError::Busy`] so the retry layer can
/// treat it as transient.
fn classify(operation: &'static str, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Busy {
                operation,
                message: err.to_string(),
            },
            ErrorCode::ConstraintViolation => StoreError::Constraint {
                operation,
                message: err.to_string(),
            },
            _ => StoreError::Backend {
                message: format!("{operation}: {err}"),
            },
        },
        _ => StoreError::Backend {
            message: format!("{operation}: {err}"),
        },
    }
}

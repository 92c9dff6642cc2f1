//! SQLite-backed employee store.
//!
//! # Invariants
//! - `email` is unique ignoring ASCII case, `tel` is unique; both enforced by indexes.
//! - The duplicate lookup and the inserts run inside one `IMMEDIATE` transaction,
//!   so a concurrent writer cannot slip in between them.
//! - The schema is created on open if missing; existing tables are left as they are.

use super::{EmployeeStore, page_offset};
use crate::duplicates::{duplicate_exists, ensure_unique_in_batch};
use crate::error::{AppError, Result};
use crate::models::{Employee, NewEmployee, Page};
use async_trait::async_trait;
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params, params_from_iter,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SCHEMA: &str = include_str!("schema.sql");

fn bootstrap_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn row_to_employee(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        tel: row.get("tel")?,
        joined: row.get("joined")?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Rows per collision lookup; each row binds two variables.
const LOOKUP_CHUNK_ROWS: usize = 400;

fn find_collision_in_chunk(conn: &Connection, chunk: &[NewEmployee]) -> Result<Option<Employee>> {
    let sql = format!(
        "SELECT id, name, email, tel, joined
         FROM employees
         WHERE email IN ({emails}) OR tel IN ({tels})
         ORDER BY id
         LIMIT 1;",
        emails = placeholders(chunk.len()),
        tels = placeholders(chunk.len()),
    );
    let values = chunk
        .iter()
        .map(|e| e.email.as_str())
        .chain(chunk.iter().map(|e| e.tel.as_str()));

    let existing = conn
        .query_row(&sql, params_from_iter(values), row_to_employee)
        .optional()?;
    Ok(existing)
}

fn find_first_collision(conn: &Connection, batch: &[NewEmployee]) -> Result<Option<Employee>> {
    for chunk in batch.chunks(LOOKUP_CHUNK_ROWS) {
        if let Some(existing) = find_collision_in_chunk(conn, chunk)? {
            return Ok(Some(existing));
        }
    }
    Ok(None)
}

/// Inserts every row, reporting a uniqueness violation as `DuplicateExists`.
fn insert_rows(conn: &Connection, batch: &[NewEmployee]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO employees (name, email, tel, joined) VALUES (?1, ?2, ?3, ?4);",
    )?;
    for employee in batch {
        stmt.execute(params![
            employee.name,
            employee.email,
            employee.tel,
            employee.joined
        ])
        .map_err(|err| {
            if is_constraint_violation(&err) {
                AppError::DuplicateExists {
                    name: employee.name.clone(),
                    email: employee.email.clone(),
                    tel: employee.tel.clone(),
                }
            } else {
                AppError::Storage(err)
            }
        })?;
    }
    Ok(batch.len())
}

fn insert_batch(conn: &mut Connection, batch: &[NewEmployee]) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(existing) = find_first_collision(&tx, batch)? {
        return Err(duplicate_exists(&existing));
    }
    let inserted = insert_rows(&tx, batch)?;

    tx.commit()?;
    Ok(inserted)
}

/// Employee store on a single SQLite connection shared behind a mutex.
#[derive(Clone)]
pub(crate) struct SqliteEmployeeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEmployeeStore {
    /// Opens (creating if needed) a database file and ensures the schema exists.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let started_at = Instant::now();
        let conn = Connection::open(path.as_ref())?;
        bootstrap_connection(&conn)?;
        tracing::info!(
            "Opened SQLite database {} in {}ms",
            path.as_ref().display(),
            started_at.elapsed().as_millis()
        );
        Ok(Self::from_connection(conn))
    }

    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        bootstrap_connection(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs blocking SQLite work off the async runtime.
    async fn with_conn<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Task("SQLite connection mutex poisoned".to_string()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| AppError::Task(format!("SQLite task failed: {e}")))?
    }
}

#[async_trait]
impl EmployeeStore for SqliteEmployeeStore {
    async fn add_batch(&self, batch: Vec<NewEmployee>) -> Result<usize> {
        if batch.is_empty() {
            return Err(AppError::EmptyPayload(
                "at least one employee is required".to_string(),
            ));
        }
        ensure_unique_in_batch(&batch)?;

        let count = self.with_conn(move |conn| insert_batch(conn, &batch)).await?;
        tracing::debug!("Stored {} employees in SQLite.", count);
        Ok(count)
    }

    async fn get_page(&self, page: u32, page_size: u32) -> Result<Page<Employee>> {
        let offset = i64::try_from(page_offset(page, page_size)).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM employees;", [], |row| row.get(0))?;
            let mut stmt = conn.prepare(
                "SELECT id, name, email, tel, joined
                 FROM employees
                 ORDER BY name, email
                 LIMIT ?1 OFFSET ?2;",
            )?;
            let items = stmt
                .query_map(params![i64::from(page_size), offset], row_to_employee)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page {
                items,
                page,
                page_size,
                total_count: u64::try_from(total).unwrap_or_default(),
            })
        })
        .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Employee>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, email, tel, joined
                 FROM employees
                 WHERE name = ?1 COLLATE NOCASE
                 ORDER BY email;",
            )?;
            let items = stmt
                .query_map([name.as_str()], row_to_employee)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }
}

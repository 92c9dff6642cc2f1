//! Storage contract for employee records and its backends.
//!
//! Every backend must make "check existing identities" and "insert the batch"
//! a single critical section, and must report collisions as
//! `AppError::DuplicateExists` rather than a storage failure.

mod memory;
mod sqlite;

pub(crate) use memory::InMemoryEmployeeStore;
pub(crate) use sqlite::SqliteEmployeeStore;

use crate::config::{Config, StorageBackend};
use crate::error::Result;
use crate::models::{Employee, NewEmployee, Page};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub(crate) trait EmployeeStore: Send + Sync {
    /// Inserts the whole batch or nothing, returning the number inserted.
    async fn add_batch(&self, batch: Vec<NewEmployee>) -> Result<usize>;

    /// Returns a 1-indexed page ordered by name then email, with the unfiltered total.
    async fn get_page(&self, page: u32, page_size: u32) -> Result<Page<Employee>>;

    /// Returns employees whose name matches ignoring case, ordered by email.
    async fn find_by_name(&self, name: &str) -> Result<Vec<Employee>>;
}

/// Number of rows to skip for a 1-indexed page.
pub(crate) fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}

/// Opens the backend selected in the configuration.
pub(crate) fn open_store(config: &Config) -> Result<Arc<dyn EmployeeStore>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory employee store");
            Ok(Arc::new(InMemoryEmployeeStore::new()))
        }
        StorageBackend::Sqlite => {
            tracing::info!("Using SQLite employee store at {}", config.database_path);
            let store = if config.database_path == ":memory:" {
                SqliteEmployeeStore::open_in_memory()?
            } else {
                SqliteEmployeeStore::open(&config.database_path)?
            };
            Ok(Arc::new(store))
        }
    }
}

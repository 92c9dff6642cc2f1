use super::{EmployeeStore, page_offset};
use crate::duplicates::{email_key, ensure_no_existing, ensure_unique_in_batch};
use crate::error::{AppError, Result};
use crate::models::{Employee, NewEmployee, Page};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    employees: Vec<Employee>,
    next_id: i64,
}

/// Process-local store. One lock guards both the duplicate check and the append.
#[derive(Debug, Default)]
pub(crate) struct InMemoryEmployeeStore {
    inner: Mutex<Inner>,
}

impl InMemoryEmployeeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

fn sort_key(employee: &Employee) -> (&str, String) {
    (employee.name.as_str(), email_key(&employee.email))
}

#[async_trait]
impl EmployeeStore for InMemoryEmployeeStore {
    async fn add_batch(&self, batch: Vec<NewEmployee>) -> Result<usize> {
        if batch.is_empty() {
            return Err(AppError::EmptyPayload(
                "at least one employee is required".to_string(),
            ));
        }
        ensure_unique_in_batch(&batch)?;

        let mut inner = self.inner.lock().await;
        ensure_no_existing(&inner.employees, &batch)?;

        let count = batch.len();
        for employee in batch {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.employees.push(Employee::from_new(id, employee));
        }

        tracing::debug!("Stored {} employees in memory ({} total).", count, inner.employees.len());
        Ok(count)
    }

    async fn get_page(&self, page: u32, page_size: u32) -> Result<Page<Employee>> {
        let inner = self.inner.lock().await;
        let mut sorted: Vec<&Employee> = inner.employees.iter().collect();
        sorted.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

        let offset = usize::try_from(page_offset(page, page_size)).unwrap_or(usize::MAX);
        let items = sorted
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page,
            page_size,
            total_count: inner.employees.len() as u64,
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Employee>> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<Employee> = inner
            .employees
            .iter()
            .filter(|e| e.name.eq_ignore_ascii_case(name))
            .cloned()
            .collect();
        matches.sort_by_key(|e| email_key(&e.email));
        Ok(matches)
    }
}

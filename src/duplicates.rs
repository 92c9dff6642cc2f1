//! Identity-collision checks shared by every storage backend.
//!
//! Two records are the same identity when they share an email (ignoring case)
//! or a phone number (exact).

use crate::error::{AppError, Result};
use crate::models::{Employee, NewEmployee};
use std::collections::HashSet;

/// Key used to compare emails; ASCII case folding, matching SQLite `NOCASE`.
pub(crate) fn email_key(email: &str) -> String {
    email.to_ascii_lowercase()
}

/// Fails on the first email, then the first phone, that appears twice in the batch.
pub(crate) fn ensure_unique_in_batch(batch: &[NewEmployee]) -> Result<()> {
    let mut seen_emails = HashSet::with_capacity(batch.len());
    if let Some(dup) = batch.iter().find(|e| !seen_emails.insert(email_key(&e.email))) {
        return Err(AppError::DuplicateInBatch {
            field: "email",
            value: dup.email.clone(),
        });
    }

    let mut seen_tels = HashSet::with_capacity(batch.len());
    if let Some(dup) = batch.iter().find(|e| !seen_tels.insert(e.tel.as_str())) {
        return Err(AppError::DuplicateInBatch {
            field: "tel",
            value: dup.tel.clone(),
        });
    }

    Ok(())
}

/// Builds the error reported when an incoming record collides with stored data.
pub(crate) fn duplicate_exists(employee: &Employee) -> AppError {
    AppError::DuplicateExists {
        name: employee.name.clone(),
        email: employee.email.clone(),
        tel: employee.tel.clone(),
    }
}

/// Fails with the first stored employee that collides with any record in the batch.
pub(crate) fn ensure_no_existing<'a, I>(existing: I, batch: &[NewEmployee]) -> Result<()>
where
    I: IntoIterator<Item = &'a Employee>,
{
    let emails: HashSet<String> = batch.iter().map(|e| email_key(&e.email)).collect();
    let tels: HashSet<&str> = batch.iter().map(|e| e.tel.as_str()).collect();

    match existing
        .into_iter()
        .find(|stored| emails.contains(&email_key(&stored.email)) || tels.contains(stored.tel.as_str()))
    {
        Some(stored) => Err(duplicate_exists(stored)),
        None => Ok(()),
    }
}

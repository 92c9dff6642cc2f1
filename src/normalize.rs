//! Trims and validates a single parsed employee record.

use crate::error::{AppError, Result};
use crate::models::{NewEmployee, RawEmployee};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .expect("Failed to compile email regex pattern. This should not happen.")
});

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{10,11}|\d{2,4}-\d{3,4}-\d{4})$")
        .expect("Failed to compile phone regex pattern. This should not happen.")
});

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

pub(crate) fn is_valid_phone(tel: &str) -> bool {
    PHONE_REGEX.is_match(tel)
}

/// Normalizes one record coming from either parser.
///
/// # Arguments
/// * `raw` - The record as produced by the CSV or JSON parser.
///
/// # Returns
/// * `Ok(NewEmployee)` with name, email and tel trimmed.
/// * `Err(AppError::InvalidName | InvalidEmail | InvalidPhone)` for the first failing field,
///   checked in that order.
pub(crate) fn normalize_and_validate(raw: RawEmployee) -> Result<NewEmployee> {
    let name = raw.name.trim();
    let email = raw.email.trim();
    let tel = raw.tel.trim();

    if name.is_empty() {
        return Err(AppError::InvalidName);
    }
    if !is_valid_email(email) {
        return Err(AppError::InvalidEmail(email.to_string()));
    }
    if !is_valid_phone(tel) {
        return Err(AppError::InvalidPhone(tel.to_string()));
    }

    Ok(NewEmployee {
        name: name.to_string(),
        email: email.to_string(),
        tel: tel.to_string(),
        joined: raw.joined,
    })
}

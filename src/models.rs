//! Defines the core data structures used in the employee-import application.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A record as produced by one of the format parsers.
/// Text fields are untrimmed and unvalidated; only the date has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawEmployee {
    pub name: String,
    pub email: String,
    pub tel: String,
    pub joined: NaiveDate,
}

/// A trimmed, validated record ready to be handed to storage.
/// Only `normalize::normalize_and_validate` constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewEmployee {
    pub name: String,
    pub email: String,
    pub tel: String,
    pub joined: NaiveDate,
}

impl From<NewEmployee> for RawEmployee {
    fn from(employee: NewEmployee) -> Self {
        RawEmployee {
            name: employee.name,
            email: employee.email,
            tel: employee.tel,
            joined: employee.joined,
        }
    }
}

/// A persisted employee, identity assigned by the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Employee {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub tel: String,
    /// Serialized as `yyyy-MM-dd`.
    pub joined: NaiveDate,
}

impl Employee {
    pub(crate) fn from_new(id: i64, employee: NewEmployee) -> Self {
        Employee {
            id,
            name: employee.name,
            email: employee.email,
            tel: employee.tel,
            joined: employee.joined,
        }
    }
}

/// One page of a listing, plus the unfiltered total.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
}

/// The payload format decided once at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PayloadSource {
    Csv(String),
    Json(String),
}

/// Input to the import orchestrator: at most one side is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ImportRequest {
    pub csv: Option<String>,
    pub json: Option<String>,
}

impl From<PayloadSource> for ImportRequest {
    fn from(source: PayloadSource) -> Self {
        match source {
            PayloadSource::Csv(text) => ImportRequest {
                csv: Some(text),
                json: None,
            },
            PayloadSource::Json(text) => ImportRequest {
                csv: None,
                json: Some(text),
            },
        }
    }
}

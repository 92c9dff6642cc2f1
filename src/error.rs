//! Defines the custom error types for the employee-import application.

use thiserror::Error;

/// The primary error type for the import pipeline and its queries.
///
/// Every variant above `Storage` is a caller fault: it is reported back with its
/// message. The remaining variants are internal faults and are only logged.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// The payload, file or parsed batch contained nothing to import.
    #[error("{0}")]
    EmptyPayload(String),

    /// An uploaded file had an extension other than `.csv` or `.json`.
    #[error("only .csv or .json files are supported: {0}")]
    UnsupportedFormat(String),

    /// A CSV line did not split into exactly four columns.
    #[error("csv row must have 4 columns: {0}")]
    MalformedRow(String),

    /// The JSON text could not be parsed at all.
    #[error("invalid json payload: {0}")]
    MalformedPayload(String),

    /// The JSON text parsed, but its top level is neither an object nor an array.
    #[error("json payload must be an object or an array, got {0}")]
    InvalidShape(String),

    /// A join date in neither `yyyy.MM.dd` nor `yyyy-MM-dd` form.
    #[error("invalid joined date: {0}")]
    InvalidDate(String),

    #[error("name is required")]
    InvalidName,

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("invalid tel: {0}")]
    InvalidPhone(String),

    /// Both or neither of the CSV and JSON payloads were supplied.
    #[error("exactly one of csv or json must be provided")]
    AmbiguousInput,

    /// Two records in the same batch share an email or a phone number.
    #[error("duplicate {field} in request: {value}")]
    DuplicateInBatch {
        /// Either `email` or `tel`.
        field: &'static str,
        /// The colliding value as it appeared in the batch.
        value: String,
    },

    /// A record in the batch collides with one that is already stored.
    #[error("duplicate employee exists: {name}/{email}/{tel}")]
    DuplicateExists {
        name: String,
        email: String,
        tel: String,
    },

    #[error("page and pageSize must be greater than zero (page={page}, pageSize={page_size})")]
    InvalidPaging { page: i64, page_size: i64 },

    #[error("name is required")]
    InvalidNameQuery,

    /// Error raised by the SQLite backend.
    #[error("Storage Error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Error related to concurrency or task execution.
    #[error("Task Execution Error: {0}")]
    Task(String),

    /// The import was cancelled before anything was written.
    #[error("import cancelled")]
    Cancelled,
}

impl AppError {
    /// True for errors the caller caused and can fix by changing the request.
    pub(crate) fn is_client_error(&self) -> bool {
        !matches!(
            self,
            AppError::Storage(_) | AppError::Task(_) | AppError::Cancelled
        )
    }

    /// Stable machine-readable code reported alongside the message.
    pub(crate) fn code(&self) -> &'static str {
        match self {
            AppError::EmptyPayload(_) => "empty_payload",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::MalformedRow(_) => "malformed_row",
            AppError::MalformedPayload(_) => "malformed_payload",
            AppError::InvalidShape(_) => "invalid_shape",
            AppError::InvalidDate(_) => "invalid_date",
            AppError::InvalidName => "invalid_name",
            AppError::InvalidEmail(_) => "invalid_email",
            AppError::InvalidPhone(_) => "invalid_phone",
            AppError::AmbiguousInput => "ambiguous_input",
            AppError::DuplicateInBatch { .. } => "duplicate_in_batch",
            AppError::DuplicateExists { .. } => "duplicate_exists",
            AppError::InvalidPaging { .. } => "invalid_paging",
            AppError::InvalidNameQuery => "invalid_name_query",
            AppError::Cancelled => "cancelled",
            AppError::Storage(_) | AppError::Task(_) => "internal_error",
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;

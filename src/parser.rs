//! Decoders turning CSV or JSON text into raw employee records.

use crate::error::{AppError, Result};
use crate::models::{PayloadSource, RawEmployee};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const NAME_HEADERS: [&str; 2] = ["name", "이름"];
const EMAIL_HEADERS: [&str; 4] = ["email", "mail", "메일", "이메일"];

static DOTTED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}\.\d{2}\.\d{2}$")
        .expect("Failed to compile dotted date regex pattern. This should not happen.")
});

static DASHED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$")
        .expect("Failed to compile dashed date regex pattern. This should not happen.")
});

/// Parses a join date written as `yyyy.MM.dd` or `yyyy-MM-dd`.
/// Surrounding whitespace is not tolerated; callers trim where the format allows it.
pub(crate) fn parse_joined(input: &str) -> Result<NaiveDate> {
    let format = if DOTTED_DATE.is_match(input) {
        "%Y.%m.%d"
    } else if DASHED_DATE.is_match(input) {
        "%Y-%m-%d"
    } else {
        return Err(AppError::InvalidDate(input.to_string()));
    };

    NaiveDate::parse_from_str(input, format).map_err(|_| AppError::InvalidDate(input.to_string()))
}

/// Dispatches to the decoder matching the resolved payload format.
pub(crate) fn parse_payload(source: &PayloadSource) -> Result<Vec<RawEmployee>> {
    match source {
        PayloadSource::Csv(text) => parse_csv(text),
        PayloadSource::Json(text) => parse_json(text),
    }
}

fn is_header_line(line: &str) -> bool {
    let values: Vec<String> = line
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
        .collect();
    if values.len() < 4 {
        return false;
    }

    NAME_HEADERS.contains(&values[0].as_str()) && EMAIL_HEADERS.contains(&values[1].as_str())
}

/// Parses CSV text with rows of `name, email, tel, joined`.
///
/// A leading byte-order mark is dropped, blank lines are skipped and an optional
/// English or Korean header line is removed. Row order is preserved.
pub(crate) fn parse_csv(text: &str) -> Result<Vec<RawEmployee>> {
    let text = text.trim_start_matches('\u{feff}');
    let mut lines: Vec<&str> = text
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return Err(AppError::EmptyPayload("csv payload is empty".to_string()));
    }

    if is_header_line(lines[0]) {
        tracing::debug!("Dropping csv header line: {}", lines[0]);
        lines.remove(0);
    }

    if lines.is_empty() {
        return Err(AppError::EmptyPayload(
            "csv payload has no data rows".to_string(),
        ));
    }

    let mut records = Vec::with_capacity(lines.len());
    for line in lines {
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.len() != 4 {
            return Err(AppError::MalformedRow(line.to_string()));
        }

        let joined = parse_joined(cols[3])?;
        records.push(RawEmployee {
            name: cols[0].to_string(),
            email: cols[1].to_string(),
            tel: cols[2].to_string(),
            joined,
        });
    }

    tracing::debug!("Parsed {} csv rows.", records.len());
    Ok(records)
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Looks up a string property by case-insensitive key; missing or null reads as empty.
fn string_field(object: &Map<String, Value>, key: &str) -> Result<String> {
    let found = object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v);

    match found {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AppError::MalformedPayload(format!(
            "field '{}' must be a string, got {}",
            key,
            describe(other)
        ))),
    }
}

fn record_from_object(object: &Map<String, Value>) -> Result<RawEmployee> {
    let joined = string_field(object, "joined")?;
    Ok(RawEmployee {
        name: string_field(object, "name")?,
        email: string_field(object, "email")?,
        tel: string_field(object, "tel")?,
        joined: parse_joined(&joined)?,
    })
}

/// Parses a JSON object or array of objects with `name`, `email`, `tel` and `joined`
/// properties, matched case-insensitively. Array order is preserved.
pub(crate) fn parse_json(text: &str) -> Result<Vec<RawEmployee>> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    let candidates: Vec<&Map<String, Value>> = match &root {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(object) => Ok(object),
                other => Err(AppError::InvalidShape(format!(
                    "array element of type {}",
                    describe(other)
                ))),
            })
            .collect::<Result<_>>()?,
        Value::Object(object) if object.is_empty() => Vec::new(),
        Value::Object(object) => vec![object],
        other => return Err(AppError::InvalidShape(describe(other).to_string())),
    };

    if candidates.is_empty() {
        return Err(AppError::EmptyPayload("json payload is empty".to_string()));
    }

    let records = candidates
        .into_iter()
        .map(record_from_object)
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!("Parsed {} json records.", records.len());
    Ok(records)
}

//! Decides whether an incoming request carries CSV or JSON employee data.
//!
//! Requests arrive either as a form (multipart or url-encoded) holding a file
//! or named text fields, or as a raw text body. The output is an
//! [`ImportRequest`]; the orchestrator enforces that exactly one side is set.

use crate::error::{AppError, Result};
use crate::models::{ImportRequest, PayloadSource};
use bytes::Bytes;
use multer::Multipart;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

static DATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}\.\d{2}\.\d{2}")
        .expect("Failed to compile date token regex pattern. This should not happen.")
});

/// An uploaded file part.
#[derive(Debug, Clone)]
pub(crate) struct FilePart {
    pub file_name: String,
    pub content: Bytes,
}

/// The decoded contents of a form submission.
#[derive(Debug, Clone, Default)]
pub(crate) struct FormPayload {
    /// First part that carried a non-empty filename and non-empty content.
    pub file: Option<FilePart>,
    /// Text fields by name; repeated names keep every value in order.
    pub fields: HashMap<String, Vec<String>>,
}

impl FormPayload {
    /// Returns the trimmed field value, or `None` when missing or blank.
    /// Repeated values are joined one per line.
    fn field_text(&self, name: &str) -> Option<String> {
        let joined = self.fields.get(name)?.join("\n");
        non_blank(&joined)
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// True if the text starts like a JSON object or array.
pub(crate) fn is_json_by_shape(payload: &str) -> bool {
    let trimmed = payload.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// True for `application/json` and any `+json` structured media type.
pub(crate) fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let lowered = content_type.to_ascii_lowercase();
    let essence = lowered.split(';').next().unwrap_or("").trim();
    lowered.contains("application/json") || essence.ends_with("+json")
}

/// Restores row breaks in CSV text whose newlines were collapsed into spaces.
///
/// Text that already has a newline, looks like JSON, or carries fewer than two
/// `yyyy.MM.dd` tokens is returned untouched. Otherwise a line break is placed
/// after every date token, replacing the whitespace that follows it.
pub(crate) fn repair_collapsed_rows(text: &str) -> Cow<'_, str> {
    if text.contains('\n') || is_json_by_shape(text) {
        return Cow::Borrowed(text);
    }

    let tokens: Vec<_> = DATE_TOKEN.find_iter(text).collect();
    if tokens.len() < 2 {
        return Cow::Borrowed(text);
    }

    let mut repaired = String::with_capacity(text.len() + tokens.len());
    let mut cursor = 0;
    for token in tokens {
        repaired.push_str(&text[cursor..token.end()]);
        let rest = &text[token.end()..];
        cursor = token.end() + (rest.len() - rest.trim_start().len());
        if cursor < text.len() {
            repaired.push('\n');
        }
    }
    repaired.push_str(&text[cursor..]);

    tracing::debug!("Repaired collapsed csv text into {} rows.", repaired.lines().count());
    Cow::Owned(repaired)
}

/// Resolves an uploaded file by its extension.
pub(crate) fn resolve_file(file_name: &str, content: &[u8]) -> Result<PayloadSource> {
    let text = String::from_utf8_lossy(content);
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::EmptyPayload(format!(
            "uploaded file is empty: {}",
            file_name
        )));
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") => Ok(PayloadSource::Csv(text.to_string())),
        Some("json") => Ok(PayloadSource::Json(text.to_string())),
        _ => Err(AppError::UnsupportedFormat(file_name.to_string())),
    }
}

/// Resolves a decoded form: file part first, then `csv`/`json` fields, then `data`.
pub(crate) fn resolve_form(form: &FormPayload) -> Result<ImportRequest> {
    if let Some(file) = &form.file {
        tracing::debug!("Resolving uploaded file '{}'", file.file_name);
        return resolve_file(&file.file_name, &file.content).map(ImportRequest::from);
    }

    let csv = form.field_text("csv");
    let json = form.field_text("json");
    if csv.is_some() || json.is_some() {
        return Ok(ImportRequest { csv, json });
    }

    if let Some(data) = form.field_text("data") {
        let data = repair_collapsed_rows(&data).into_owned();
        let source = if is_json_by_shape(&data) {
            PayloadSource::Json(data)
        } else {
            PayloadSource::Csv(data)
        };
        return Ok(source.into());
    }

    Err(AppError::EmptyPayload(
        "form contains no file or csv/json/data field".to_string(),
    ))
}

/// Resolves a raw text body using the declared content type, then its shape.
pub(crate) fn resolve_raw_body(content_type: Option<&str>, body: &[u8]) -> Result<ImportRequest> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::EmptyPayload("request body is empty".to_string()));
    }

    let source = if is_json_content_type(content_type) || is_json_by_shape(text) {
        PayloadSource::Json(text.to_string())
    } else {
        PayloadSource::Csv(text.to_string())
    };
    Ok(source.into())
}

/// Collects the parts of a multipart body.
pub(crate) async fn read_multipart_form(body: Bytes, boundary: String) -> Result<FormPayload> {
    let body_stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = Multipart::new(body_stream, boundary);
    let mut form = FormPayload::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Multipart parsing error: {}", e);
        AppError::MalformedPayload(format!("multipart parsing failed: {e}"))
    })? {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::MalformedPayload(format!("failed to read form part: {e}")))?;

        match file_name {
            Some(file_name) if !file_name.is_empty() => {
                if form.file.is_none() && !data.is_empty() {
                    form.file = Some(FilePart {
                        file_name,
                        content: data,
                    });
                }
            }
            _ => {
                if let Some(name) = name {
                    form.fields
                        .entry(name)
                        .or_default()
                        .push(String::from_utf8_lossy(&data).into_owned());
                }
            }
        }
    }

    Ok(form)
}

/// Decodes an `application/x-www-form-urlencoded` body.
pub(crate) fn read_urlencoded_form(body: &[u8]) -> Result<FormPayload> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| AppError::MalformedPayload(format!("invalid form body: {e}")))?;

    let mut form = FormPayload::default();
    for (name, value) in pairs {
        form.fields.entry(name).or_default().push(value);
    }
    Ok(form)
}

/// Entry point used by the HTTP layer.
pub(crate) async fn resolve_payload(content_type: Option<&str>, body: Bytes) -> Result<ImportRequest> {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some("multipart/form-data") => {
            let boundary = multer::parse_boundary(content_type.unwrap_or_default())
                .map_err(|e| AppError::MalformedPayload(format!("invalid multipart boundary: {e}")))?;
            let form = read_multipart_form(body, boundary).await?;
            resolve_form(&form)
        }
        Some("application/x-www-form-urlencoded") => resolve_form(&read_urlencoded_form(&body)?),
        _ => resolve_raw_body(content_type, &body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_with(fields: &[(&str, &str)]) -> FormPayload {
        let mut form = FormPayload::default();
        for (name, value) in fields {
            form.fields
                .entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
        form
    }

    fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &str)]) -> Bytes {
        let mut body = String::new();
        for (name, file_name, content) in parts {
            body.push_str(&format!("--{boundary}\r\n"));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        Bytes::from(body)
    }

    #[test]
    fn test_repair_splits_on_date_tokens() {
        let text = "우건건,a@x.com,010-1111-2222,2017.01.07 김김김,b@x.com,010-3333-4444,2017.02.01";
        let repaired = repair_collapsed_rows(text);
        assert_eq!(
            repaired,
            "우건건,a@x.com,010-1111-2222,2017.01.07\n김김김,b@x.com,010-3333-4444,2017.02.01"
        );
    }

    #[test]
    fn test_repair_breaks_after_each_date_token() {
        let text = "2017.01.07 우건건,a@x.com,010... 2017.02.01 김김김,b@x.com,010...";
        let repaired = repair_collapsed_rows(text);
        assert!(repaired.contains("2017.01.07\n우건건"));
        assert!(repaired.contains("2017.02.01\n김김김"));
    }

    #[test]
    fn test_repair_leaves_single_row_alone() {
        let text = "우건건,a@x.com,010-1111-2222,2017.01.07";
        assert!(matches!(repair_collapsed_rows(text), Cow::Borrowed(_)));
    }

    #[test]
    fn test_repair_leaves_existing_newlines_and_json_alone() {
        let text = "a,a@x.com,0101111222,2017.01.07\nb,b@x.com,0101111333,2017.02.01 c";
        assert_eq!(repair_collapsed_rows(text), text);
        let json = r#"[{"joined":"2017.01.07"},{"joined":"2017.02.01"}]"#;
        assert_eq!(repair_collapsed_rows(json), json);
    }

    #[test]
    fn test_json_content_type_detection() {
        assert!(is_json_content_type(Some("application/json")));
        assert!(is_json_content_type(Some("Application/JSON; charset=utf-8")));
        assert!(is_json_content_type(Some("application/vnd.api+json")));
        assert!(!is_json_content_type(Some("text/plain")));
        assert!(!is_json_content_type(None));
    }

    #[test]
    fn test_raw_body_classification() {
        let req = resolve_raw_body(Some("text/plain"), b"  [{\"name\":\"a\"}]  ").unwrap();
        assert_eq!(req.json.as_deref(), Some("[{\"name\":\"a\"}]"));
        assert!(req.csv.is_none());

        let req = resolve_raw_body(Some("application/json"), b"not really json").unwrap();
        assert!(req.json.is_some());

        let req = resolve_raw_body(None, b"a,a@x.com,01011112222,2020-01-01\n").unwrap();
        assert_eq!(req.csv.as_deref(), Some("a,a@x.com,01011112222,2020-01-01"));
    }

    #[test]
    fn test_raw_body_blank_is_empty_payload() {
        assert!(matches!(
            resolve_raw_body(Some("text/plain"), b" \n\t"),
            Err(AppError::EmptyPayload(_))
        ));
    }

    #[test]
    fn test_file_extension_decides_format() {
        assert!(matches!(
            resolve_file("staff.CSV", b"a,b,c,d").unwrap(),
            PayloadSource::Csv(_)
        ));
        assert!(matches!(
            resolve_file("staff.json", b" {} ").unwrap(),
            PayloadSource::Json(ref t) if t == "{}"
        ));
        assert!(matches!(
            resolve_file("staff.xlsx", b"data"),
            Err(AppError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            resolve_file("staff", b"data"),
            Err(AppError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            resolve_file("staff.csv", b"   \n"),
            Err(AppError::EmptyPayload(_))
        ));
    }

    #[test]
    fn test_form_typed_fields_take_priority_over_data() {
        let form = form_with(&[("csv", " a,b,c,d "), ("data", "{}")]);
        let req = resolve_form(&form).unwrap();
        assert_eq!(req.csv.as_deref(), Some("a,b,c,d"));
        assert!(req.json.is_none());
    }

    #[test]
    fn test_form_both_typed_fields_are_passed_through() {
        let form = form_with(&[("csv", "a,b,c,d"), ("json", "[]")]);
        let req = resolve_form(&form).unwrap();
        assert!(req.csv.is_some() && req.json.is_some());
    }

    #[test]
    fn test_form_typed_fields_are_not_repaired() {
        let text = "a,a@x.com,0101111222,2017.01.07 b,b@x.com,0101111333,2017.02.01";
        let req = resolve_form(&form_with(&[("csv", text)])).unwrap();
        assert_eq!(req.csv.as_deref(), Some(text));
    }

    #[test]
    fn test_form_data_field_is_sniffed_and_repaired() {
        let req = resolve_form(&form_with(&[("data", r#" {"name":"a"} "#)])).unwrap();
        assert_eq!(req.json.as_deref(), Some(r#"{"name":"a"}"#));

        let text = "a,a@x.com,0101111222,2017.01.07 b,b@x.com,0101111333,2017.02.01";
        let req = resolve_form(&form_with(&[("data", text)])).unwrap();
        assert_eq!(req.csv.as_deref().map(|c| c.lines().count()), Some(2));
    }

    #[test]
    fn test_form_without_usable_fields() {
        let form = form_with(&[("csv", "  "), ("other", "x")]);
        assert!(matches!(resolve_form(&form), Err(AppError::EmptyPayload(_))));
    }

    #[tokio::test]
    async fn test_multipart_file_part() {
        let body = multipart_body(
            "XBOUNDARY",
            &[(
                "file",
                Some("employees.csv"),
                "name,email,tel,joined\n김철수,user11@example.com,01012341234,2018.03.07",
            )],
        );
        let req = resolve_payload(Some("multipart/form-data; boundary=XBOUNDARY"), body)
            .await
            .unwrap();
        assert!(req.csv.unwrap().starts_with("name,email"));
        assert!(req.json.is_none());
    }

    #[tokio::test]
    async fn test_multipart_empty_file_falls_back_to_fields() {
        let body = multipart_body(
            "XBOUNDARY",
            &[
                ("file", Some("empty.csv"), ""),
                ("json", None, r#"{"name":"a"}"#),
            ],
        );
        let req = resolve_payload(Some("multipart/form-data; boundary=XBOUNDARY"), body)
            .await
            .unwrap();
        assert_eq!(req.json.as_deref(), Some(r#"{"name":"a"}"#));
    }

    #[tokio::test]
    async fn test_multipart_without_boundary_is_malformed() {
        let err = resolve_payload(Some("multipart/form-data"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_urlencoded_data_field() {
        let body = Bytes::from_static(b"data=a%2Ca%40x.com%2C01011112222%2C2020-01-01");
        let req = resolve_payload(Some("application/x-www-form-urlencoded"), body)
            .await
            .unwrap();
        assert_eq!(req.csv.as_deref(), Some("a,a@x.com,01011112222,2020-01-01"));
    }
}

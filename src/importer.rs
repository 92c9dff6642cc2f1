//! Import orchestration and the read-side queries.

use crate::duplicates::ensure_unique_in_batch;
use crate::error::{AppError, Result};
use crate::models::{Employee, ImportRequest, NewEmployee, Page, PayloadSource};
use crate::normalize::normalize_and_validate;
use crate::parser::parse_payload;
use crate::store::EmployeeStore;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Stages an import moves through; any of them may end in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImportStage {
    AwaitingPayload,
    Parsed,
    Normalized,
    DuplicateChecked,
    Persisted,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::AwaitingPayload => "awaiting_payload",
            ImportStage::Parsed => "parsed",
            ImportStage::Normalized => "normalized",
            ImportStage::DuplicateChecked => "duplicate_checked",
            ImportStage::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

fn checkpoint(cancel: &CancellationToken, reached: ImportStage) -> Result<()> {
    if cancel.is_cancelled() {
        tracing::info!(target: "import_task", "Import cancelled after stage {}", reached);
        return Err(AppError::Cancelled);
    }
    tracing::debug!(target: "import_task", "Import reached stage {}", reached);
    Ok(())
}

/// Picks the single non-blank payload, or fails with `AmbiguousInput`.
fn select_source(request: ImportRequest) -> Result<PayloadSource> {
    let csv = request.csv.filter(|text| !text.trim().is_empty());
    let json = request.json.filter(|text| !text.trim().is_empty());

    match (csv, json) {
        (Some(csv), None) => Ok(PayloadSource::Csv(csv)),
        (None, Some(json)) => Ok(PayloadSource::Json(json)),
        _ => Err(AppError::AmbiguousInput),
    }
}

/// Parses, validates, de-duplicates and stores one batch.
///
/// # Returns
/// * `Ok(n)` where `n` is the full batch size; nothing is stored on any error.
pub(crate) async fn import_employees(
    store: &dyn EmployeeStore,
    request: ImportRequest,
    cancel: &CancellationToken,
) -> Result<usize> {
    let source = select_source(request)?;
    checkpoint(cancel, ImportStage::AwaitingPayload)?;

    let raw = parse_payload(&source)?;
    checkpoint(cancel, ImportStage::Parsed)?;

    let batch = raw
        .into_iter()
        .map(normalize_and_validate)
        .collect::<Result<Vec<NewEmployee>>>()?;
    checkpoint(cancel, ImportStage::Normalized)?;

    ensure_unique_in_batch(&batch)?;
    checkpoint(cancel, ImportStage::DuplicateChecked)?;

    let inserted = store.add_batch(batch).await?;
    tracing::info!(target: "import_task", "Import reached stage {}: {} employees", ImportStage::Persisted, inserted);
    Ok(inserted)
}

/// Returns one page of employees after checking that both values are positive.
pub(crate) async fn list_employees(
    store: &dyn EmployeeStore,
    page: i64,
    page_size: i64,
) -> Result<Page<Employee>> {
    let invalid = || AppError::InvalidPaging { page, page_size };
    if page <= 0 || page_size <= 0 {
        return Err(invalid());
    }
    let page_u32 = u32::try_from(page).map_err(|_| invalid())?;
    let page_size_u32 = u32::try_from(page_size).map_err(|_| invalid())?;

    store.get_page(page_u32, page_size_u32).await
}

/// Looks employees up by trimmed name; a blank name is rejected.
pub(crate) async fn find_employees_by_name(
    store: &dyn EmployeeStore,
    name: &str,
) -> Result<Vec<Employee>> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidNameQuery);
    }
    store.find_by_name(name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryEmployeeStore, SqliteEmployeeStore};

    fn csv(text: &str) -> ImportRequest {
        ImportRequest {
            csv: Some(text.to_string()),
            json: None,
        }
    }

    fn json(text: &str) -> ImportRequest {
        ImportRequest {
            csv: None,
            json: Some(text.to_string()),
        }
    }

    async fn import(store: &dyn EmployeeStore, request: ImportRequest) -> Result<usize> {
        import_employees(store, request, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_inserts_single_csv_row() {
        let store = InMemoryEmployeeStore::new();
        let count = import(&store, csv("홍길동, user1@example.com, 010-1234-5678, 2020-01-01"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_inserts_multiple_csv_rows() {
        let store = InMemoryEmployeeStore::new();
        let text = "김철수, kim@example.com, 010-1111-2222, 2018.03.07\n\
                    박영희, park@example.com, 010-3333-4444, 2019.06.15\n\
                    이순신, lee@example.com, 010-5555-6666, 2020.11.20";
        assert_eq!(import(&store, csv(text)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_inserts_json_array() {
        let store = InMemoryEmployeeStore::new();
        let text = r#"[
            {"name":"강감찬","email":"kang@example.com","tel":"010-1010-2020","joined":"2015-08-10"},
            {"name":"을지문덕","email":"eulji@example.com","tel":"010-3030-4040","joined":"2016-02-28"},
            {"name":"장보고","email":"jang@example.com","tel":"010-5050-6060","joined":"2017-09-01"}
        ]"#;
        assert_eq!(import(&store, json(text)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_csv_and_json_store_identical_records() {
        let from_csv = InMemoryEmployeeStore::new();
        import(&from_csv, csv(" 홍길동 , hong@x.com , 010-1234-5678 , 2020-01-01"))
            .await
            .unwrap();
        let from_json = InMemoryEmployeeStore::new();
        import(
            &from_json,
            json(r#"{"name":" 홍길동 ","email":" hong@x.com","tel":"010-1234-5678 ","joined":"2020-01-01"}"#),
        )
        .await
        .unwrap();

        assert_eq!(
            from_csv.get_page(1, 10).await.unwrap().items,
            from_json.get_page(1, 10).await.unwrap().items
        );
    }

    #[tokio::test]
    async fn test_requires_exactly_one_payload() {
        let store = InMemoryEmployeeStore::new();
        let both = ImportRequest {
            csv: Some("a,b,c,2020-01-01".to_string()),
            json: Some("[]".to_string()),
        };
        assert!(matches!(import(&store, both).await, Err(AppError::AmbiguousInput)));
        assert!(matches!(
            import(&store, ImportRequest::default()).await,
            Err(AppError::AmbiguousInput)
        ));
        let blanks = ImportRequest {
            csv: Some(String::new()),
            json: Some("  ".to_string()),
        };
        assert!(matches!(import(&store, blanks).await, Err(AppError::AmbiguousInput)));
    }

    #[tokio::test]
    async fn test_empty_payloads_are_empty_payload_errors() {
        let store = InMemoryEmployeeStore::new();
        assert!(matches!(
            import(&store, csv("name,email,tel,joined")).await,
            Err(AppError::EmptyPayload(_))
        ));
        assert!(matches!(import(&store, json("[]")).await, Err(AppError::EmptyPayload(_))));
    }

    #[tokio::test]
    async fn test_one_bad_record_rejects_whole_batch() {
        let store = InMemoryEmployeeStore::new();
        let text = "김철수, kim@example.com, 010-1111-2222, 2018.03.07\n\
                    박영희, not-email, 010-3333-4444, 2019.06.15";
        assert!(matches!(import(&store, csv(text)).await, Err(AppError::InvalidEmail(_))));
        assert_eq!(store.get_page(1, 10).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn test_validation_errors_same_for_both_formats() {
        let store = InMemoryEmployeeStore::new();
        assert!(matches!(
            import(&store, csv("홍길동, not-email, 010-1234-5678, 2020-01-01")).await,
            Err(AppError::InvalidEmail(_))
        ));
        assert!(matches!(
            import(&store, json(r#"{"name":"홍길동","email":"not-email","tel":"010-1234-5678","joined":"2020-01-01"}"#)).await,
            Err(AppError::InvalidEmail(_))
        ));
        assert!(matches!(
            import(&store, csv("홍길동, hong@example.com, 12345, 2020-01-01")).await,
            Err(AppError::InvalidPhone(_))
        ));
        assert!(matches!(
            import(&store, json(r#"{"name":"홍길동","email":"hong@example.com","tel":"12345","joined":"2020-01-01"}"#)).await,
            Err(AppError::InvalidPhone(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicates_within_request() {
        let store = InMemoryEmployeeStore::new();
        let same_email = "홍길동, user1@example.com, 010-1234-5678, 2020-01-01\n\
                          이몽룡, USER1@example.com, 010-9999-0000, 2020-01-02";
        assert!(matches!(
            import(&store, csv(same_email)).await,
            Err(AppError::DuplicateInBatch { field: "email", .. })
        ));
        let same_tel = "홍길동, hong@example.com, 010-1234-5678, 2020-01-01\n\
                        이몽룡, lee@example.com, 010-1234-5678, 2020-01-02";
        assert!(matches!(
            import(&store, csv(same_tel)).await,
            Err(AppError::DuplicateInBatch { field: "tel", .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicates_against_existing_for_both_backends() {
        let memory = InMemoryEmployeeStore::new();
        let sqlite = SqliteEmployeeStore::open_in_memory().unwrap();
        let stores: [&dyn EmployeeStore; 2] = [&memory, &sqlite];

        for store in stores {
            import(store, csv("홍길동, e@example.com, 010-1234-5678, 2020-01-01"))
                .await
                .unwrap();
            assert!(matches!(
                import(store, csv("임꺽정, e@example.com, 010-2222-3333, 2020-01-03")).await,
                Err(AppError::DuplicateExists { .. })
            ));
            assert!(matches!(
                import(store, csv("임꺽정, e2@example.com, 010-1234-5678, 2020-01-03")).await,
                Err(AppError::DuplicateExists { .. })
            ));
            assert_eq!(
                import(store, csv("이몽룡, lee@example.com, 010-8888-9999, 2021-05-15"))
                    .await
                    .unwrap(),
                1
            );
        }
    }

    #[tokio::test]
    async fn test_cancelled_import_writes_nothing() {
        let store = InMemoryEmployeeStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = import_employees(
            &store,
            csv("홍길동, hong@example.com, 010-1234-5678, 2020-01-01"),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(store.get_page(1, 10).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn test_list_employees_paging() {
        let store = InMemoryEmployeeStore::new();
        let text = "김철수, kim@example.com, 010-1111-2222, 2018.03.07\n\
                    박영희, park@example.com, 010-3333-4444, 2019.06.15\n\
                    이순신, lee@example.com, 010-5555-6666, 2020.11.20\n\
                    강감찬, kang@example.com, 010-7777-8888, 2015.01.15\n\
                    을지문덕, eulji@example.com, 010-9999-0000, 2016.02.28";
        import(&store, csv(text)).await.unwrap();

        let page = list_employees(&store, 1, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_count, 5);
        assert_eq!(list_employees(&store, 3, 2).await.unwrap().items.len(), 1);

        let empty = list_employees(&InMemoryEmployeeStore::new(), 1, 10).await.unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.total_count, 0);
    }

    #[tokio::test]
    async fn test_list_employees_rejects_bad_paging() {
        let store = InMemoryEmployeeStore::new();
        for (page, size) in [(0, 10), (-1, 10), (1, 0), (1, -5), (i64::MAX, 10)] {
            assert!(matches!(
                list_employees(&store, page, size).await,
                Err(AppError::InvalidPaging { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_find_by_name() {
        let store = InMemoryEmployeeStore::new();
        let text = "홍길동, hong1@example.com, 010-1111-2222, 2020-01-01\n\
                    홍길동, hong2@example.com, 010-3333-4444, 2021-05-15\n\
                    이몽룡, lee@example.com, 010-5555-6666, 2022-03-10";
        import(&store, csv(text)).await.unwrap();

        let found = find_employees_by_name(&store, " 홍길동 ").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|e| e.name == "홍길동"));
        assert!(find_employees_by_name(&store, "존재하지않음").await.unwrap().is_empty());
        assert!(matches!(
            find_employees_by_name(&store, "   ").await,
            Err(AppError::InvalidNameQuery)
        ));
    }
}

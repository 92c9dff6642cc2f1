//! API server for employee-import.

use crate::config::Config;
use crate::error::AppError;
use crate::importer::{find_employees_by_name, import_employees, list_employees};
use crate::models::ImportRequest;
use crate::payload::resolve_payload;
use crate::store::EmployeeStore;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Shared state handed to every request.
#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<dyn EmployeeStore>,
    /// Limits concurrent imports.
    pub semaphore: Arc<Semaphore>,
    pub default_page_size: u32,
    pub max_body_bytes: u64,
}

impl AppState {
    pub(crate) fn new(config: &Config, store: Arc<dyn EmployeeStore>) -> Self {
        AppState {
            store,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            default_page_size: config.default_page_size,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// API response structure
#[derive(Serialize, Deserialize)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct CreatedResponse {
    inserted: usize,
}

#[derive(Deserialize, Debug)]
struct ListQuery {
    page: Option<i64>,
    #[serde(rename = "pageSize")]
    page_size: Option<i64>,
}

/// Rejection carrying an application error to `handle_rejection`.
#[derive(Debug)]
struct ApiError(AppError);

impl warp::reject::Reject for ApiError {}

fn reject(err: AppError) -> Rejection {
    warp::reject::custom(ApiError(err))
}

/// The request body exceeded `max_body_bytes`.
#[derive(Debug)]
struct BodyTooLarge {
    limit: u64,
}

impl warp::reject::Reject for BodyTooLarge {}

/// Collects the request body, with or without a `Content-Length` header,
/// rejecting it once it grows past `limit` bytes.
async fn read_limited_body<S, B>(declared: Option<u64>, body: S, limit: u64) -> Result<Bytes, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if declared.is_some_and(|len| len > limit) {
        return Err(warp::reject::custom(BodyTooLarge { limit }));
    }

    let mut body = Box::pin(body);
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.try_next().await.map_err(|e| {
        reject(AppError::MalformedPayload(format!(
            "failed to read request body: {e}"
        )))
    })? {
        if (collected.len() + chunk.remaining()) as u64 > limit {
            return Err(warp::reject::custom(BodyTooLarge { limit }));
        }
        collected.put(chunk);
    }
    Ok(collected.freeze())
}

/// Runs an import on its own task so it keeps observing `cancel` after the
/// request future that spawned it has been dropped.
fn spawn_import(
    store: Arc<dyn EmployeeStore>,
    request: ImportRequest,
    cancel: CancellationToken,
    permit: OwnedSemaphorePermit,
) -> JoinHandle<crate::error::Result<usize>> {
    tokio::spawn(async move {
        let result = import_employees(store.as_ref(), request, &cancel).await;
        drop(permit);
        result
    })
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// All routes, with rejections already turned into JSON replies.
pub(crate) fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let max_body_bytes = state.max_body_bytes;

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&ApiResponse {
                success: true,
                message: "Employee import API is running".to_string(),
            })
        });

    let list = warp::path!("api" / "employee")
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and(with_state(state.clone()))
        .and_then(handle_list);

    let by_name = warp::path!("api" / "employee" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_find_by_name);

    let limited_body = warp::header::optional::<u64>("content-length")
        .and(warp::body::stream())
        .and_then(move |declared: Option<u64>, body| {
            read_limited_body(declared, body, max_body_bytes)
        });

    let create = warp::path!("api" / "employee")
        .and(warp::post())
        .and(warp::header::optional::<String>("content-type"))
        .and(limited_body)
        .and(with_state(state))
        .and_then(handle_create);

    health
        .or(list)
        .or(by_name)
        .or(create)
        .with(warp::cors().allow_any_origin().allow_methods(vec!["GET", "POST"]))
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Start the API server and run until Ctrl-C.
pub(crate) async fn start_api_server(
    config: &Config,
    store: Arc<dyn EmployeeStore>,
) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let state = AppState::new(config, store);

    let (bound, server) =
        warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })?;

    tracing::info!("API server listening on {}", bound);
    server.await;
    tracing::info!("API server stopped");

    Ok(())
}

async fn handle_list(query: ListQuery, state: AppState) -> Result<Response, Rejection> {
    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or_else(|| i64::from(state.default_page_size));

    let result = list_employees(state.store.as_ref(), page, page_size)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&result).into_response())
}

async fn handle_find_by_name(raw_name: String, state: AppState) -> Result<Response, Rejection> {
    let name = percent_decode_str(&raw_name).decode_utf8_lossy();

    let found = find_employees_by_name(state.store.as_ref(), &name)
        .await
        .map_err(reject)?;

    if found.is_empty() {
        tracing::debug!("No employees named '{}'", name.trim());
        return Ok(warp::reply::with_status(
            warp::reply::json(&ApiResponse {
                success: false,
                message: format!("no employee named {}", name.trim()),
            }),
            StatusCode::NOT_FOUND,
        )
        .into_response());
    }

    Ok(warp::reply::json(&found).into_response())
}

async fn handle_create(
    content_type: Option<String>,
    body: Bytes,
    state: AppState,
) -> Result<Response, Rejection> {
    let permit = state
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| reject(AppError::Task(format!("import semaphore closed: {e}"))))?;

    tracing::info!(target: "import_task", "Processing import request ({} bytes)", body.len());
    let request = resolve_payload(content_type.as_deref(), body)
        .await
        .map_err(reject)?;

    // Dropping this future (client gone) cancels the spawned import at its next stage.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let inserted = spawn_import(state.store.clone(), request, cancel, permit)
        .await
        .map_err(|e| reject(AppError::Task(format!("import task failed: {e}"))))?
        .map_err(reject)?;
    guard.disarm();

    Ok(warp::reply::with_header(
        warp::reply::with_status(
            warp::reply::json(&CreatedResponse { inserted }),
            StatusCode::CREATED,
        ),
        "location",
        "/api/employee",
    )
    .into_response())
}

fn error_reply(status: StatusCode, code: &'static str, message: String) -> Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            success: false,
            code,
            message,
        }),
        status,
    )
    .into_response()
}

/// Handle API rejections
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(ApiError(app_error)) = err.find::<ApiError>() {
        if app_error.is_client_error() {
            tracing::warn!("Rejected request: {}", app_error);
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                app_error.code(),
                app_error.to_string(),
            ));
        }

        tracing::error!("Internal error while handling request: {}", app_error);
        return Ok(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            app_error.code(),
            "internal server error".to_string(),
        ));
    }

    if err.is_not_found() {
        Ok(error_reply(
            StatusCode::NOT_FOUND,
            "not_found",
            "Not Found".to_string(),
        ))
    } else if let Some(BodyTooLarge { limit }) = err.find::<BodyTooLarge>() {
        tracing::warn!("Rejected request body larger than {} bytes", limit);
        Ok(error_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("request body exceeds {limit} bytes"),
        ))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method Not Allowed".to_string(),
        ))
    } else {
        tracing::debug!("Unhandled rejection: {:?}", err);
        Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "Bad request".to_string(),
        ))
    }
}

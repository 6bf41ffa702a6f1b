//! Report server - local presentation surface for interactive browsing
//!
//! Exposes the materialized report over a local HTTP endpoint:
//!
//! - `GET /report` - table rows as JSON; `sql`, `filter`, `sort`, `limit`
//!   query parameters slice through the query module
//! - `GET /runs` - registered runs with their parameter mappings
//! - `GET /records/{index}` - one record rendered per the configured
//!   [`ViewMode`] (a presentation concern, decoupled from scoring)
//!
//! The server holds the report cache directory as a scoped resource: acquired
//! on start, released on shutdown, with a `Drop` backstop so the lock never
//! outlives the process.

use crate::dataset::{Dataset, Record};
use crate::query::{SliceEngine, SliceExecutor, SlicePlan};
use crate::registry::RunRegistry;
use crate::report::{batch_to_json_rows, ReportConfig, ReportRow, ReportTable, ViewMode};
use crate::{Error, Result};
use arrow::array::RecordBatch;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Scoped report cache directory.
///
/// Acquisition creates the directory and a `.cotejo-lock` marker; release
/// removes the marker. A second acquisition of a locked directory fails, so
/// two servers never share one cache.
#[derive(Debug)]
pub struct CacheDir {
    path: PathBuf,
    lock_path: PathBuf,
    released: bool,
}

impl CacheDir {
    /// Acquire the cache directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created or is
    /// already locked by another server.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)
            .map_err(|e| Error::Storage(format!("Failed to create cache dir: {e}")))?;
        let lock_path = path.join(".cotejo-lock");
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::Storage(format!(
                    "Cache dir '{}' is locked or not writable: {e}",
                    path.display()
                ))
            })?;
        Ok(Self {
            path,
            lock_path,
            released: false,
        })
    }

    /// Cache directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the lock file cannot be removed.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        std::fs::remove_file(&self.lock_path)
            .map_err(|e| Error::Storage(format!("Failed to release cache lock: {e}")))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for CacheDir {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.lock_path) {
                warn!(path = %self.lock_path.display(), error = %e, "failed to release cache lock");
            }
        }
    }
}

/// Run metadata exposed by `GET /runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run name
    pub name: String,
    /// Parameter mapping that produced the run
    pub params: std::collections::BTreeMap<String, crate::Scalar>,
    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
    /// Prediction count
    pub num_predictions: usize,
}

struct AppState {
    batch: RecordBatch,
    rows: Vec<ReportRow>,
    runs: Vec<RunSummary>,
    records: Vec<Record>,
    view: ViewMode,
    input_column: String,
    label_column: String,
}

/// Query parameters accepted by `GET /report`.
#[derive(Debug, Default, Deserialize)]
struct ReportParams {
    /// Full SQL slice query (overrides the other parameters)
    sql: Option<String>,
    /// Simple predicate, e.g. `score < 1` or `run = dunce`
    filter: Option<String>,
    /// Sort column, optionally suffixed `:desc`
    sort: Option<String>,
    /// Row cap
    limit: Option<usize>,
}

/// Error body returned by all handlers.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Parse(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// A running report server.
///
/// Serves until [`shutdown`](Self::shutdown) is called; dropping the handle
/// without shutdown leaves the task running but still releases the cache lock
/// via [`CacheDir`]'s `Drop`.
pub struct ReportServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
    cache: Option<CacheDir>,
}

impl ReportServer {
    /// Bind and start serving the report.
    ///
    /// When `config.cache_path` is set the directory is acquired as a scoped
    /// resource and the materialized report is persisted into it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serve`] if the address cannot be bound, or
    /// [`Error::Storage`] if the cache directory cannot be acquired.
    pub async fn start(
        dataset: &Dataset,
        registry: &RunRegistry,
        table: &ReportTable,
        config: &ReportConfig,
        addr: SocketAddr,
    ) -> Result<Self> {
        let cache = config
            .cache_path
            .as_ref()
            .map(CacheDir::acquire)
            .transpose()?;
        if let Some(cache) = &cache {
            table.write_parquet(cache.path().join("report.parquet"))?;
        }

        let state = Arc::new(AppState {
            batch: table.to_record_batch()?,
            rows: table.rows(),
            runs: registry
                .iter()
                .map(|run| RunSummary {
                    name: run.name().to_string(),
                    params: run.params().clone(),
                    registered_at: run.registered_at(),
                    num_predictions: run.predictions().len(),
                })
                .collect(),
            records: dataset.records().to_vec(),
            view: config.view,
            input_column: config
                .input_column
                .clone()
                .unwrap_or_else(|| dataset.input_column().to_string()),
            label_column: dataset.label_column().to_string(),
        });

        let app = Router::new()
            .route("/report", get(report_handler))
            .route("/runs", get(runs_handler))
            .route("/records/{index}", get(record_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Serve(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Serve(format!("failed to read local addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "report server exited with error");
            }
        });

        info!(addr = %local_addr, "report server listening");
        Ok(Self {
            addr: local_addr,
            shutdown_tx,
            handle,
            cache,
        })
    }

    /// Address the server is bound to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the server and release the cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serve`] if the server task panicked, or
    /// [`Error::Storage`] if the cache lock cannot be released.
    pub async fn shutdown(mut self) -> Result<()> {
        debug!("shutting down report server");
        let _ = self.shutdown_tx.send(());
        self.handle
            .await
            .map_err(|e| Error::Serve(format!("server task failed: {e}")))?;
        if let Some(mut cache) = self.cache.take() {
            cache.release()?;
        }
        Ok(())
    }
}

async fn report_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReportParams>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let plan = match slice_plan(&params) {
        Ok(plan) => plan,
        Err(e) => return Err(ApiError(e)),
    };

    match plan {
        None => Ok(Json(serde_json::json!({ "rows": &state.rows }))),
        Some(plan) => {
            let sliced = SliceExecutor::new()
                .execute(&plan, &state.batch)
                .map_err(ApiError)?;
            let rows = batch_to_json_rows(&sliced).map_err(ApiError)?;
            Ok(Json(serde_json::json!({ "rows": rows })))
        }
    }
}

/// Translate request parameters into a slice plan, if any slicing was asked for.
fn slice_plan(params: &ReportParams) -> Result<Option<SlicePlan>> {
    if let Some(sql) = &params.sql {
        return SliceEngine::new().parse(sql).map(Some);
    }
    if params.filter.is_none() && params.sort.is_none() && params.limit.is_none() {
        return Ok(None);
    }

    let order_by = params.sort.as_ref().map(|sort| {
        sort.strip_suffix(":desc").map_or_else(
            || (sort.clone(), crate::query::OrderDirection::Asc),
            |col| (col.to_string(), crate::query::OrderDirection::Desc),
        )
    });

    Ok(Some(SlicePlan {
        columns: vec!["*".to_string()],
        table: "report".to_string(),
        filter: params.filter.clone(),
        order_by,
        limit: params.limit,
    }))
}

async fn runs_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "runs": &state.runs }))
}

async fn record_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(index): UrlPath<usize>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    state.records.get(index).map_or_else(
        || {
            Err((
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("no record at index {index}"),
                }),
            ))
        },
        |record| {
            Ok(Json(render_record(
                record,
                index,
                state.view,
                &state.input_column,
                &state.label_column,
            )))
        },
    )
}

/// Render a record per the configured view mode.
fn render_record(
    record: &Record,
    index: usize,
    view: ViewMode,
    input_column: &str,
    label_column: &str,
) -> serde_json::Value {
    match view {
        ViewMode::PlainText => serde_json::json!({
            "index": index,
            "text": format!("{}\n{}", record.input(), record.label()),
        }),
        ViewMode::Structured => {
            let mut body = serde_json::Map::new();
            body.insert("index".to_string(), serde_json::json!(index));
            body.insert(
                input_column.to_string(),
                serde_json::json!(record.input()),
            );
            body.insert(
                label_column.to_string(),
                serde_json::json!(record.label()),
            );
            body.insert(
                "metadata".to_string(),
                serde_json::to_value(record.metadata()).unwrap_or_default(),
            );
            serde_json::Value::Object(body)
        }
    }
}

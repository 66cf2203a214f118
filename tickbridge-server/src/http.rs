//! Historical and control HTTP handlers.
//!
//! Every failure surfaces as a stable named kind in a JSON body
//! (`{"error": "...", "message": "..."}`); path handling funnels through the
//! archive reader so canonicalization and the read cap live in one place.

use std::path::PathBuf;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tickbridge_config::loader;
use tickbridge_core::ArchiveError;
use tickbridge_model::{
    ArchiveEntry, ArchiveStat, HealthReport, ReadMode, RolloverAlert, StoredSnapshot, Symbol,
    SymbolRecord,
};

use crate::state::AppState;

/// A handler failure with its stable kind and HTTP mapping.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn no_data(symbol: &Symbol) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "no-data",
            format!("no snapshot stored for {symbol}"),
        )
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        let status = match &err {
            ArchiveError::Forbidden(_) => StatusCode::FORBIDDEN,
            ArchiveError::NotFound(_) => StatusCode::NOT_FOUND,
            ArchiveError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ArchiveError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(err, ArchiveError::Forbidden(_)) {
            warn!("forbidden archive request: {err}");
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.report(&state.archive, &state.engine, &state.hub))
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub entries: Vec<ArchiveEntry>,
}

pub async fn list_dir(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let entries = state.archive.list(&query.path).await?;
    Ok(Json(ListResponse { entries }))
}

pub async fn stat_path(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<ArchiveStat>, ApiError> {
    Ok(Json(state.archive.stat(&query.path).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub path: PathBuf,
    #[serde(default)]
    pub offset: u64,
    pub length: u64,
    #[serde(default = "default_read_mode")]
    pub mode: ReadMode,
}

fn default_read_mode() -> ReadMode {
    ReadMode::Binary
}

pub async fn read_range(
    State(state): State<AppState>,
    Query(query): Query<ReadQuery>,
) -> Result<Response, ApiError> {
    let bytes = state
        .archive
        .read_range(&query.path, query.offset, query.length, query.mode)
        .await?;
    let content_type = match query.mode {
        ReadMode::Binary => "application/octet-stream",
        ReadMode::Text => "text/plain; charset=utf-8",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    pub symbol: Symbol,
}

pub async fn latest_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<StoredSnapshot>, ApiError> {
    let (snapshot, seq) = state
        .engine
        .latest(&query.symbol)
        .ok_or_else(|| ApiError::no_data(&query.symbol))?;
    Ok(Json(StoredSnapshot::from_parts(snapshot, seq)))
}

pub async fn active_symbols(State(state): State<AppState>) -> Json<Vec<SymbolRecord>> {
    Json(state.registry.active_records())
}

#[derive(Debug, Deserialize)]
pub struct RolloverQuery {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
}

fn default_horizon_days() -> i64 {
    10
}

pub async fn rollover_alerts(
    State(state): State<AppState>,
    Query(query): Query<RolloverQuery>,
) -> Json<Vec<RolloverAlert>> {
    Json(
        state
            .registry
            .rollover_alerts(Utc::now().date_naive(), query.horizon_days),
    )
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
    pub symbols: usize,
    pub epoch: u64,
}

/// Re-read the config file and swap the symbol table. Invalid config leaves
/// the running table untouched and reports `config-invalid`.
pub async fn reload_config(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let loaded = loader::load(Some(&state.config_path)).map_err(|err| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            err.kind(),
            err.to_string(),
        )
    })?;
    let symbols = loaded.config.symbols;
    let count = symbols.len();
    state.registry.reload(symbols).map_err(|err| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            err.kind(),
            err.to_string(),
        )
    })?;
    info!(symbols = count, "configuration reloaded");
    Ok(Json(ReloadResponse {
        reloaded: true,
        symbols: count,
        epoch: state.registry.epoch(),
    }))
}

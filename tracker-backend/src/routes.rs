use crate::AppState;
use crate::error::AppError;
use crate::helpers::{api_key_matches, now};
use crate::validation;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use headers::Authorization;
use headers::authorization::Bearer;
use serde::Deserialize;
use std::sync::Arc;
use tracker_db::{ObservedPlayer, PollInput, ProximityOptions, ServerIdentity, ServerObservation};

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

#[derive(Deserialize)]
pub(crate) struct RecentQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IngestServer {
    #[serde(rename = "type")]
    server_type: String,
    host: String,
    port: u32,
    #[serde(flatten)]
    observation: ServerObservation,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IngestRequest {
    server: IngestServer,
    #[serde(default)]
    players: Vec<ObservedPlayer>,
    #[serde(default, alias = "queriedAt")]
    timestamp: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ExactRequest {
    dry_run: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ProximityRequest {
    dry_run: bool,
    merge_gap_ms: Option<i64>,
}

/// Reject the request unless it carries the configured key.
fn authorize(state: &AppState, auth: BearerHeader) -> Result<(), AppError> {
    let Some(expected) = state.config.ingest_api_key.as_deref() else {
        return Ok(());
    };

    match auth {
        Some(TypedHeader(auth)) if api_key_matches(auth.token(), expected) => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

/// Admin routes rewrite the ledger, so they stay closed until a key exists.
fn authorize_admin(state: &AppState, auth: BearerHeader) -> Result<(), AppError> {
    if state.config.ingest_api_key.is_none() {
        return Err(AppError::AdminDisabled);
    }
    authorize(state, auth)
}

fn server_from_path(
    (server_type, host, port): (String, String, u32),
) -> Result<ServerIdentity, AppError> {
    let port = validation::validate_server(&server_type, &host, port)?;
    Ok(ServerIdentity::new(server_type, host, port))
}

pub(crate) async fn list_servers(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let servers = state.db.list_servers().await?;
    Ok(Json(servers))
}

pub(crate) async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, u32)>,
) -> Result<impl IntoResponse, AppError> {
    let server = server_from_path(path)?;

    match state.db.get_server(server).await? {
        Some(summary) => Ok(Json(summary)),
        None => Err(AppError::NotFound("Server")),
    }
}

pub(crate) async fn active_sessions(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, u32)>,
) -> Result<impl IntoResponse, AppError> {
    let server = server_from_path(path)?;
    let sessions = state.db.list_active_sessions(server).await?;
    Ok(Json(sessions))
}

pub(crate) async fn recent_sessions(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, u32)>,
    Query(query): Query<RecentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let server = server_from_path(path)?;
    let limit = validation::validate_limit(
        query.limit,
        state.config.recent_sessions_default_limit,
        state.config.recent_sessions_max_limit,
    )?;

    let sessions = state.db.list_recent_sessions(server, limit).await?;
    Ok(Json(sessions))
}

pub(crate) async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.db.database_stats().await?;
    Ok(Json(stats))
}

pub(crate) async fn players(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let players = state.db.list_player_session_stats().await?;
    Ok(Json(players))
}

#[debug_handler]
pub(crate) async fn ingest(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(payload): Json<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, auth)?;

    let IngestServer {
        server_type,
        host,
        port,
        observation,
    } = payload.server;
    let port = validation::validate_server(&server_type, &host, port)?;
    validation::validate_player_count(payload.players.len())?;
    let timestamp = payload.timestamp.unwrap_or_else(now);
    validation::validate_timestamp(timestamp)?;

    let outcome = state
        .db
        .ingest_poll(PollInput {
            server: ServerIdentity::new(server_type, host, port),
            observation,
            players: payload.players,
            timestamp,
        })
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}

pub(crate) async fn consolidate_exact(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(payload): Json<ExactRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize_admin(&state, auth)?;

    let summary = state.db.consolidate_exact_duplicates(payload.dry_run).await?;
    Ok(Json(summary))
}

pub(crate) async fn consolidate_proximity(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(payload): Json<ProximityRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize_admin(&state, auth)?;

    let merge_gap_ms = payload.merge_gap_ms.unwrap_or(state.config.merge_gap_ms);
    validation::validate_merge_gap(merge_gap_ms)?;

    let summary = state
        .db
        .consolidate_by_proximity(ProximityOptions {
            dry_run: payload.dry_run,
            merge_gap_ms,
        })
        .await?;
    Ok(Json(summary))
}

pub(crate) async fn query_metrics(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<impl IntoResponse, AppError> {
    authorize_admin(&state, auth)?;

    let metrics = state.db.list_api_query_metrics().await?;
    Ok(Json(metrics))
}

//! IPC 경계 — 로컬 HTTP/JSON (axum)
//!
//! UI/CLI 수집기는 이 라우터를 통해서만 코어에 접근합니다.
//! 실패 응답은 항상 `{ ok:false, error, error_code, severity }` 형태입니다.

use anyhow::Result;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::core::DownloaderCore;
use crate::error::DownloaderError;
use crate::settings::Settings;
use crate::snapshot::SnapshotKind;

type HandlerResult = std::result::Result<axum::response::Response, DownloaderError>;

/// 예약/즉시 설치 요청. `version`이 없으면 현재 선택 버전 사용
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionRequest {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub core: Arc<DownloaderCore>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(core: Arc<DownloaderCore>, listen_addr: &str) -> Self {
        Self {
            core,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health))
            .route("/api/settings", get(get_settings).put(put_settings))
            .route("/api/sources", get(list_sources))
            .route("/api/versions", get(cached_versions))
            .route("/api/versions/resolve", post(resolve_versions))
            .route("/api/tasks", get(list_tasks).post(schedule_task))
            .route("/api/tasks/:name", delete(delete_task))
            .route("/api/install", post(install_once))
            .route("/api/events", get(events))
            .route("/api/history", get(history).delete(clear_history))
            .route("/api/history/:id/abort", post(abort_install))
            .route("/api/snapshots", get(list_snapshots))
            .route("/api/snapshots/:kind/:version", delete(prune_snapshot))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("[IPC] HTTP server starting on {}", self.listen_addr);

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("[IPC] listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// 본문이 없으면 기본값. 본문이 있는데 잘못됐으면 INVALID_INPUT
fn optional_body<T: Default>(payload: std::result::Result<Json<T>, JsonRejection>) -> std::result::Result<T, DownloaderError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(rejection.into()),
    }
}

/// 요청 버전 또는 현재 선택 버전
async fn requested_version(state: &IPCServer, req: VersionRequest) -> std::result::Result<String, DownloaderError> {
    match req.version.filter(|v| !v.trim().is_empty()) {
        Some(v) => Ok(v),
        None => {
            let selected = state.core.settings().await?.version;
            if selected.is_empty() {
                return Err(DownloaderError::InvalidInput("no version selected".into()));
            }
            Ok(selected)
        }
    }
}

/// GET /api/health - 데몬/백엔드 버전
async fn health(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(json!({ "ok": true, "health": state.core.health().await }))
}

/// GET /api/settings
async fn get_settings(State(state): State<IPCServer>) -> HandlerResult {
    let settings = state.core.settings().await?;
    Ok(Json(json!({ "ok": true, "settings": settings })).into_response())
}

/// PUT /api/settings - 문서 전체 교체
async fn put_settings(
    State(state): State<IPCServer>,
    payload: std::result::Result<Json<Settings>, JsonRejection>,
) -> HandlerResult {
    let Json(settings) = payload?;
    let saved = state.core.replace_settings(settings).await?;
    Ok(Json(json!({ "ok": true, "settings": saved })).into_response())
}

/// GET /api/sources - 등록된 빌드 소스
async fn list_sources(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(json!({ "ok": true, "sources": state.core.sources() }))
}

/// GET /api/versions - 마지막으로 완료된 카탈로그
async fn cached_versions(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(json!({ "ok": true, "catalog": state.core.cached_catalog().await }))
}

/// POST /api/versions/resolve
async fn resolve_versions(State(state): State<IPCServer>) -> HandlerResult {
    let versions = state.core.resolve_versions().await?;
    Ok(Json(json!({ "ok": true, "versions": versions })).into_response())
}

/// GET /api/tasks
async fn list_tasks(State(state): State<IPCServer>) -> HandlerResult {
    let tasks = state.core.list_tasks().await?;
    Ok(Json(json!({ "ok": true, "tasks": tasks })).into_response())
}

/// POST /api/tasks - 검증/고정 후 202, 결과는 이벤트로
async fn schedule_task(
    State(state): State<IPCServer>,
    body: std::result::Result<Json<VersionRequest>, JsonRejection>,
) -> HandlerResult {
    let version = requested_version(&state, optional_body(body)?).await?;
    let accepted = state.core.schedule(&version).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "accepted": accepted }))).into_response())
}

/// DELETE /api/tasks/:name
async fn delete_task(
    State(state): State<IPCServer>,
    name: std::result::Result<Path<String>, PathRejection>,
) -> HandlerResult {
    let Path(name) = name?;
    let accepted = state.core.delete_task(&name).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "accepted": accepted }))).into_response())
}

/// POST /api/install
async fn install_once(
    State(state): State<IPCServer>,
    body: std::result::Result<Json<VersionRequest>, JsonRejection>,
) -> HandlerResult {
    let version = requested_version(&state, optional_body(body)?).await?;
    let accepted = state.core.install_once(&version).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "accepted": accepted }))).into_response())
}

/// GET /api/events?since=N
async fn events(
    State(state): State<IPCServer>,
    query: std::result::Result<Query<EventsQuery>, QueryRejection>,
) -> HandlerResult {
    let Query(q) = query?;
    let events = state.core.events_since(q.since).await;
    let last_seq = events.last().map(|e| e.seq).unwrap_or(q.since);
    Ok(Json(json!({ "ok": true, "events": events, "last_seq": last_seq })).into_response())
}

/// GET /api/history
async fn history(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(json!({ "ok": true, "history": state.core.history() }))
}

/// DELETE /api/history - 이력 파일 삭제 (진행 중인 설치는 중단하지 않음)
async fn clear_history(State(state): State<IPCServer>) -> HandlerResult {
    let removed = state.core.clear_history()?;
    Ok(Json(json!({ "ok": true, "removed": removed })).into_response())
}

/// POST /api/history/:id/abort - 진행 중인 설치 중단
async fn abort_install(
    State(state): State<IPCServer>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> HandlerResult {
    let Path(id) = id?;
    let record = state.core.abort_install(&id).await?;
    Ok(Json(json!({ "ok": true, "record": record })).into_response())
}

/// GET /api/snapshots
async fn list_snapshots(State(state): State<IPCServer>) -> HandlerResult {
    let snapshots = state.core.snapshots()?;
    Ok(Json(json!({ "ok": true, "snapshots": snapshots })).into_response())
}

/// DELETE /api/snapshots/:kind/:version
async fn prune_snapshot(
    State(state): State<IPCServer>,
    path: std::result::Result<Path<(SnapshotKind, String)>, PathRejection>,
) -> HandlerResult {
    let Path((kind, version)) = path?;
    let removed = state.core.prune_snapshot(kind, &version)?;
    Ok(Json(json!({ "ok": true, "removed": removed })).into_response())
}

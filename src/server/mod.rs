//! Ingestion, classification and reporting server. Every observation is
//! classified synchronously while it is inserted; reporting reads never
//! touch the write path.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api::{
        self, ErrorResponse, IngestRequest, IngestResponse, KeylogRequest, ObservationRow,
        OverrideRequest, UserResponse,
    },
    config::ServerConfig,
    model::{ClassificationResult, KeylogEntry, Observation},
};

use classify::Classifier;
use query::{grouped_report, ungrouped_report, PageMeta, PageRequest};
use store::{ObservationFilter, Store};

pub mod classify;
pub mod query;
pub mod store;

pub struct ServerState {
    store: Arc<dyn Store>,
    classifier: Classifier,
    config: ServerConfig,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn handler_error(status: StatusCode, code: &str, error: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn storage_error(e: anyhow::Error) -> HandlerError {
    warn!("storage failure: {e:?}");
    handler_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "STORAGE_ERROR",
        "storage failure",
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/observations
///
/// Classification is server-authoritative and runs exactly once, while
/// the observation is inserted. A tag-lookup failure degrades to the
/// idle fallback; the observation is never lost over it.
async fn ingest(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), HandlerError> {
    let user = state
        .store
        .user(request.monitored_user_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            handler_error(
                StatusCode::NOT_FOUND,
                "USER_NOT_FOUND",
                format!("unknown monitored user {}", request.monitored_user_id),
            )
        })?;

    let screenshot = match &request.screenshot {
        None => None,
        Some(encoded) => {
            let decoded = BASE64.decode(encoded).map_err(|e| {
                handler_error(
                    StatusCode::BAD_REQUEST,
                    "INVALID_SCREENSHOT",
                    format!("screenshot is not valid base64: {e}"),
                )
            })?;
            if decoded.len() > state.config.screenshot_max_bytes {
                warn!(
                    "stripping oversized screenshot ({} bytes) for user {}",
                    decoded.len(),
                    user.id
                );
                None
            } else {
                Some(decoded)
            }
        }
    };

    let candidates = match state.store.keyword_candidates(user.department_id).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("tag lookup failed, falling back to idle labels: {e:?}");
            vec![]
        }
    };
    let classification = state.classifier.classify(
        &request.active_window_title,
        request.idle_seconds,
        &candidates,
    );

    let id = Uuid::new_v4();
    let captured_at = request.captured_at.unwrap_or_else(Utc::now);
    let observation = Observation {
        id,
        monitored_user_id: user.id,
        captured_at,
        window_title: request.active_window_title.into(),
        idle_seconds: request.idle_seconds,
        domain: request.domain.map(Into::into),
        application: request.application.map(Into::into),
        duration_seconds: request.duration_seconds,
        screenshot,
        face_presence_seconds: request.face_presence_seconds,
        category: classification.category.clone(),
        productivity: classification.productivity,
    };
    let result = classification
        .matched
        .map(|(tag_id, confidence)| ClassificationResult {
            observation_id: id,
            tag_id,
            confidence,
        });

    state
        .store
        .insert_classified(observation, result)
        .await
        .map_err(storage_error)?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            id,
            category: classification.category.to_string(),
            productivity: classification.productivity,
            user_name: user.name.to_string(),
            captured_at,
        }),
    ))
}

/// POST /api/keylogs
async fn ingest_keylog(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<KeylogRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), HandlerError> {
    let user = state
        .store
        .user(request.monitored_user_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            handler_error(
                StatusCode::NOT_FOUND,
                "USER_NOT_FOUND",
                format!("unknown monitored user {}", request.monitored_user_id),
            )
        })?;

    state
        .store
        .insert_keylog(KeylogEntry {
            monitored_user_id: user.id,
            captured_at: request.captured_at,
            text: request.text_content,
            window_title: request.window_title.into(),
            domain: request.domain.map(Into::into),
            application: request.application.map(Into::into),
        })
        .await
        .map_err(storage_error)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "ok" })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportParams {
    category: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    monitored_user_id: Option<i64>,
    grouped: Option<bool>,
    page: Option<u64>,
    page_size: Option<u64>,
}

fn with_page_headers(meta: PageMeta, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(api::HEADER_TOTAL_COUNT, meta.total_count.into());
    headers.insert(api::HEADER_PAGE, meta.page.into());
    headers.insert(api::HEADER_PER_PAGE, meta.per_page.into());
    headers.insert(api::HEADER_TOTAL_PAGES, meta.total_pages.into());
    response
}

/// GET /api/observations
///
/// A storage failure degrades to an empty result set so reporting stays
/// available under partial storage degradation.
async fn report(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ReportParams>,
) -> Response {
    let request = PageRequest::new(params.page, params.page_size, state.config.page_size_cap);
    let filter = ObservationFilter {
        category: params.category,
        start: params.start_time,
        end: params.end_time,
        monitored_user_id: params.monitored_user_id,
    };

    let observations = match state.store.observations(&filter).await {
        Ok(observations) => observations,
        Err(e) => {
            warn!("report query degraded to empty result set: {e:?}");
            vec![]
        }
    };

    if params.grouped.unwrap_or(false) {
        let (rows, meta) = grouped_report(observations, request);
        with_page_headers(meta, Json(rows))
    } else {
        let (rows, meta) = ungrouped_report(observations, request);
        with_page_headers(meta, Json(rows))
    }
}

/// PATCH /api/observations/{id}
///
/// Plain field update, deliberately not a re-classification.
async fn override_observation(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<ObservationRow>, HandlerError> {
    let updated = state
        .store
        .apply_override(id, request.category.as_deref(), request.productivity)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            handler_error(
                StatusCode::NOT_FOUND,
                "OBSERVATION_NOT_FOUND",
                format!("unknown observation {id}"),
            )
        })?;
    Ok(Json(ObservationRow::from(&updated)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveParams {
    os_user: String,
}

/// GET /api/users/resolve
async fn resolve_user(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<UserResponse>, HandlerError> {
    let user = state
        .store
        .user_by_os_name(&params.os_user)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            handler_error(
                StatusCode::NOT_FOUND,
                "USER_NOT_FOUND",
                format!("no monitored user for OS account {:?}", params.os_user),
            )
        })?;
    Ok(Json(UserResponse {
        id: user.id,
        name: user.name.to_string(),
        os_user: user.os_user.to_string(),
        department_id: user.department_id,
    }))
}

pub fn router(config: ServerConfig, store: Arc<dyn Store>) -> Router {
    let classifier = Classifier::new(config.away_idle_seconds, config.idle_idle_seconds);
    let state = Arc::new(ServerState {
        store,
        classifier,
        config,
    });

    Router::new()
        .route("/health", get(health))
        .route(api::OBSERVATIONS_PATH, post(ingest).get(report))
        .route(api::KEYLOGS_PATH, post(ingest_keylog))
        .route("/api/observations/:id", patch(override_observation))
        .route(api::USER_RESOLVE_PATH, get(resolve_user))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Binds the server and serves it on a background task. Returns the
/// bound address and a shutdown handle.
pub async fn run(
    config: ServerConfig,
    store: Arc<dyn Store>,
) -> Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let port = config.port;
    let app = router(config, store);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    info!("server listening on http://{actual_addr}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("server shutdown signal received");
            })
            .await
        {
            warn!("server error: {e}");
        }
    });

    Ok((actual_addr, shutdown_tx))
}

/// Seeds a [store::MemoryStore] from the administrator configuration
/// and serves it; entry point for the `serve` subcommand.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let store = Arc::new(store::MemoryStore::new());
    store
        .seed(
            config.monitored_users.clone(),
            config.tags.clone(),
            config.tag_keywords.clone(),
        )
        .await;

    let (_, shutdown_tx) = run(config, store).await?;
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(());
    Ok(())
}

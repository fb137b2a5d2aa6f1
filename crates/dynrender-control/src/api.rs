use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
};
use dynrender_engine::{CancelMark, RenderCommand, RenderSettings, settings};
use dynrender_model::{RenderRequest, RenderTarget, StatusMessageId, UserProfile};
use serde_json::Value;

use crate::error::ApiError;
use crate::request_meta::RequestMeta;
use crate::security;
use crate::state::{AppState, SpawnError};
use crate::status_board::StatusSnapshot;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/renders", post(submit_render))
        .route("/renders/:id", get(get_render))
        .route("/renders/:id/cancel", post(cancel_render))
        .route("/queue", get(list_queue).delete(clear_queue))
        .route("/settings", get(list_settings))
        .route("/settings/:key", put(put_setting))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_api_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .layer(middleware::from_fn(security::request_id))
        .with_state(state)
}

#[derive(Debug, serde::Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    store: &'static str,
    live_renders: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: state.engine.store().backend(),
        live_renders: state.tasks.len(),
    })
}

#[derive(Debug, serde::Deserialize)]
struct SubmitRenderRequest {
    requester: UserProfile,
    #[serde(default)]
    status_message_id: Option<StatusMessageId>,
    target: RenderTarget,
    #[serde(default)]
    radius: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
struct SubmitRenderResponse {
    status_message_id: StatusMessageId,
}

async fn submit_render(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<SubmitRenderRequest>,
) -> Result<(StatusCode, Json<SubmitRenderResponse>), ApiError> {
    let rid = &meta.request_id;
    if body.requester.id.0.trim().is_empty() {
        return Err(ApiError::new(rid, "invalid_param", "invalid requester")
            .with_field("requester.id", "must not be empty"));
    }
    let key = body.status_message_id.unwrap_or_default();
    if key.0.trim().is_empty() {
        return Err(ApiError::new(rid, "invalid_param", "invalid status message id")
            .with_field("status_message_id", "must not be empty"));
    }

    if state.tasks.is_live(&key) {
        return Err(ApiError::new(
            rid,
            "conflict",
            format!("a render for `{key}` is already running"),
        ));
    }

    state.users.remember(&body.requester);
    state.board.begin(&key, &body.requester);
    let command = RenderCommand {
        requester: body.requester.clone(),
        status_message_id: key.clone(),
        target: body.target,
        radius: body.radius,
    };

    match state
        .tasks
        .spawn(state.engine.clone(), command, state.board.clone())
    {
        Ok(()) => {}
        Err(SpawnError::AlreadyRunning) => {
            return Err(ApiError::new(
                rid,
                "conflict",
                format!("a render for `{key}` is already running"),
            ));
        }
        Err(SpawnError::ShuttingDown) => {
            return Err(ApiError::new(rid, "shutting_down", "the service is shutting down")
                .with_hint("retry once the service is back"));
        }
    }

    tracing::info!(request_id = %rid, key = %key, requester = %body.requester.id, "render submitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRenderResponse {
            status_message_id: key,
        }),
    ))
}

async fn get_render(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    state
        .board
        .get(&StatusMessageId(id))
        .map(Json)
        .ok_or_else(|| ApiError::new(&meta.request_id, "not_found", "render not found"))
}

#[derive(Debug, serde::Deserialize)]
struct CancelRenderRequest {
    user: UserProfile,
    #[serde(default)]
    is_staff: bool,
}

#[derive(Debug, serde::Serialize)]
struct CancelRenderResponse {
    result: &'static str,
}

async fn cancel_render(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(body): Json<CancelRenderRequest>,
) -> Result<(StatusCode, Json<CancelRenderResponse>), ApiError> {
    let rid = &meta.request_id;
    state.users.remember(&body.user);

    let mark = state
        .engine
        .request_cancellation(&StatusMessageId(id), &body.user, body.is_staff)
        .await
        .map_err(|e| ApiError::from_render(rid, &e))?;

    match mark {
        CancelMark::Marked => Ok((
            StatusCode::ACCEPTED,
            Json(CancelRenderResponse { result: "marked" }),
        )),
        CancelMark::AlreadyRequested => Ok((
            StatusCode::OK,
            Json(CancelRenderResponse {
                result: "already_requested",
            }),
        )),
        CancelMark::NotPermitted => Err(ApiError::new(
            rid,
            "forbidden",
            "only the requester or staff can cancel this render",
        )),
        CancelMark::NotFound => Err(ApiError::new(rid, "not_found", "render is not queued")),
    }
}

#[derive(Debug, serde::Serialize)]
struct QueueEntry {
    position: usize,
    #[serde(flatten)]
    request: RenderRequest,
}

async fn list_queue(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<Vec<QueueEntry>>, ApiError> {
    let list = state
        .engine
        .queue()
        .list()
        .await
        .map_err(|e| ApiError::from_render(&meta.request_id, &e))?;
    Ok(Json(
        list.into_iter()
            .enumerate()
            .map(|(i, request)| QueueEntry {
                position: i + 1,
                request,
            })
            .collect(),
    ))
}

#[derive(Debug, serde::Serialize)]
struct ClearQueueResponse {
    removed: usize,
}

async fn clear_queue(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<ClearQueueResponse>, ApiError> {
    let removed = state
        .engine
        .queue()
        .clear()
        .await
        .map_err(|e| ApiError::from_render(&meta.request_id, &e))?;
    tracing::warn!(request_id = %meta.request_id, removed, "render queue cleared");
    Ok(Json(ClearQueueResponse { removed }))
}

async fn list_settings(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<BTreeMap<String, Value>>, ApiError> {
    let all = state.engine.store().all().await.map_err(|e| {
        tracing::error!(request_id = %meta.request_id, error = %e, "failed to read settings");
        ApiError::new(&meta.request_id, "store_error", "failed to read settings")
    })?;
    let all = all
        .into_iter()
        .filter(|(k, _)| k != settings::RENDER_QUEUE_KEY)
        .collect();
    Ok(Json(settings::redact(all)))
}

#[derive(Debug, serde::Deserialize)]
struct PutSettingRequest {
    value: Value,
}

async fn put_setting(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(key): Path<String>,
    Json(body): Json<PutSettingRequest>,
) -> Result<StatusCode, ApiError> {
    let rid = &meta.request_id;
    RenderSettings::validate_value(&key, &body.value).map_err(|e| {
        ApiError::new(rid, "invalid_param", "invalid setting").with_field(&key, e)
    })?;

    state.engine.store().set(&key, body.value).await.map_err(|e| {
        tracing::error!(request_id = %rid, error = %e, key, "failed to store setting");
        ApiError::new(rid, "store_error", "failed to store setting")
    })?;

    let logged = if settings::REDACTED_KEYS.contains(&key.as_str()) {
        "<redacted>"
    } else {
        "updated"
    };
    tracing::info!(request_id = %rid, key, value = logged, "setting changed");
    Ok(StatusCode::NO_CONTENT)
}

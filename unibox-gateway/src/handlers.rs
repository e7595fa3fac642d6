//! Handler functions for the gateway API
//!
//! Submission endpoints acknowledge immediately; actual success or
//! failure is observed via status polling or the event stream.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use unibox_core::events::{EventEnvelope, Topic};
use unibox_core::{Error, ErrorKind};
use unibox_jobs::{
    JobKind, NewJob, NewOutboxEntry, NewScheduledMessage, OutboxEntry, OutboxSink, ScheduleStatus,
    SubmitOutcome,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Liveness probe
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ---------- Jobs ----------

pub async fn submit_job_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewJob>,
) -> Response {
    let job = state.queue.enqueue(payload).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job.id, "status": "queued" })),
    )
        .into_response()
}

pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<unibox_jobs::JobStatusView>> {
    let view = state.queue.status(id).await?;
    Ok(Json(view))
}

// ---------- Scheduling ----------

pub async fn create_schedule_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewScheduledMessage>,
) -> ApiResult<Response> {
    let message = state.dispatcher.schedule(payload).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

pub async fn cancel_schedule_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<unibox_jobs::ScheduledMessage>> {
    let cancelled = state.dispatcher.cancel(id).await?;
    Ok(Json(cancelled))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub status: Option<String>,
}

fn parse_schedule_status(raw: &str) -> ApiResult<ScheduleStatus> {
    match raw {
        "pending" => Ok(ScheduleStatus::Pending),
        "sent" => Ok(ScheduleStatus::Sent),
        "failed" => Ok(ScheduleStatus::Failed),
        "cancelled" => Ok(ScheduleStatus::Cancelled),
        other => Err(ApiError(Error::Permanent(format!(
            "unknown schedule status: {}",
            other
        )))),
    }
}

pub async fn list_schedules_handler(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> ApiResult<Json<Vec<unibox_jobs::ScheduledMessage>>> {
    let status = query
        .status
        .as_deref()
        .map(parse_schedule_status)
        .transpose()?;

    let messages = state
        .dispatcher
        .list(
            query.user_id.as_deref(),
            query.conversation_id.as_deref(),
            status,
        )
        .await;
    Ok(Json(messages))
}

// ---------- Webhook intake ----------

fn signature_from(headers: &HeaderMap) -> Option<String> {
    for name in ["x-hub-signature-256", "x-signature"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            return Some(value.to_string());
        }
    }
    None
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Provider webhook intake
///
/// The payload is never parsed or trusted before its signature checks
/// out against the channel's shared secret.
pub async fn webhook_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let adapter = match state.channels.get(&channel) {
        Some(adapter) => adapter,
        None => {
            return ApiError(Error::NotFound(format!("channel {}", channel))).into_response()
        }
    };

    let signature = match signature_from(&headers) {
        Some(s) => s,
        None => return unauthorized("missing webhook signature"),
    };

    if let Err(e) = adapter.verify_webhook(&signature, &body) {
        warn!(channel = %channel, error = %e, "webhook signature rejected");
        return unauthorized("invalid webhook signature");
    }

    let message = match adapter.parse_webhook_payload(&body) {
        Ok(message) => message,
        Err(e) => return ApiError(e.into()).into_response(),
    };

    info!(channel = %channel, id = %message.id, "webhook message accepted");

    // Fan the arrival out and queue analysis off the request path;
    // neither blocks this response
    state
        .hub
        .publish(
            &Topic::conversation(message.from.clone()),
            EventEnvelope::new(
                "message.received",
                json!({
                    "channel": channel,
                    "id": message.id,
                    "from": message.from,
                    "text": message.text,
                    "timestamp": message.timestamp,
                }),
            ),
        )
        .await;

    let job = state
        .queue
        .enqueue(NewJob {
            kind: JobKind::Sentiment,
            user_id: message.from.clone(),
            message_id: message.id.clone(),
            content: message.text.clone(),
            conversation_context: None,
        })
        .await;

    (
        StatusCode::ACCEPTED,
        Json(json!({ "id": message.id, "analysis_job_id": job.id })),
    )
        .into_response()
}

// ---------- Pull-based refresh ----------

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub since: Option<chrono::DateTime<chrono::Utc>>,
}

/// Recent messages for a conversation, straight from the channel
///
/// The event stream has no replay buffer; clients that were offline
/// reconcile through this endpoint after reconnecting.
pub async fn fetch_messages_handler(
    State(state): State<AppState>,
    Path((channel, conversation_id)): Path<(String, String)>,
    Query(query): Query<FetchQuery>,
) -> ApiResult<Json<Vec<unibox_channels::WebhookMessage>>> {
    let adapter = state
        .channels
        .get(&channel)
        .ok_or_else(|| ApiError(Error::NotFound(format!("channel {}", channel))))?;

    let messages = adapter
        .fetch_messages(&conversation_id, query.since)
        .await
        .map_err(|e| ApiError(e.into()))?;
    Ok(Json(messages))
}

// ---------- Offline sync ----------

#[derive(Debug, Deserialize)]
pub struct SyncEntryRequest {
    pub id: Uuid,
    pub conversation_id: String,
    pub content: String,
    pub channel: String,
}

#[derive(Debug, Serialize)]
pub struct SyncEntryResponse {
    pub id: Uuid,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the client should keep the entry queued and retry
    pub retryable: bool,
}

/// Bulk replay of client outbox entries
///
/// Per-entry verdicts; a duplicate client id is acknowledged without
/// creating a second message.
pub async fn sync_outbox_handler(
    State(state): State<AppState>,
    Json(entries): Json<Vec<SyncEntryRequest>>,
) -> Json<Vec<SyncEntryResponse>> {
    let mut responses = Vec::with_capacity(entries.len());

    for request in entries {
        let entry = OutboxEntry::new(NewOutboxEntry {
            id: request.id,
            conversation_id: request.conversation_id,
            content: request.content,
            channel: request.channel,
        });

        let response = match state.sink.submit(&entry).await {
            Ok(SubmitOutcome::Accepted { message_ref }) => SyncEntryResponse {
                id: request.id,
                outcome: "accepted",
                message_ref: Some(message_ref),
                error: None,
                retryable: false,
            },
            Ok(SubmitOutcome::Duplicate) => SyncEntryResponse {
                id: request.id,
                outcome: "duplicate",
                message_ref: None,
                error: None,
                retryable: false,
            },
            Ok(SubmitOutcome::Rejected { reason }) => SyncEntryResponse {
                id: request.id,
                outcome: "rejected",
                message_ref: None,
                error: Some(reason),
                retryable: false,
            },
            Err(e) => SyncEntryResponse {
                id: request.id,
                outcome: "rejected",
                message_ref: None,
                error: Some(e.to_string()),
                retryable: e.kind() == ErrorKind::Transient,
            },
        };
        responses.push(response);
    }

    Json(responses)
}

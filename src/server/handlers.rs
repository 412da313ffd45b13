//! HTTP producers: chat posts, history and AI turns.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::ai::AiRequest;
use crate::auth::bearer_token;
use crate::error::{ApiError, AuthError};
use crate::protocol::{
    AiPromptRequest, CompletePayload, CreateMessageRequest, Envelope, ErrorPayload, EventType,
    HistoryQuery, ResponsePayload, StoredMessage, TypingPayload,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// The user behind a valid `Authorization: Bearer` token.
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        Ok(AuthUser(state.validator.validate(token)?))
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.hub.stats().await.unwrap_or_default();
    let status = if state.hub.is_shut_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.rooms,
        "members": stats.members,
    }))
}

/// POST /api/v1/rooms/{id}/messages
///
/// A store failure does not stop delivery; the room gets a transient record
/// and the caller gets `202 Accepted`.
pub async fn create_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<ResponsePayload>), ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let (status, note, message) = match state.store.create(&room_id, &user_id, &req.message).await
    {
        Ok(message) => (StatusCode::CREATED, "Message created successfully", message),
        Err(e) => {
            warn!(room = %room_id, user = %user_id, error = %e, "message not persisted");
            (
                StatusCode::ACCEPTED,
                "Message delivered but not persisted",
                transient_message(&room_id, &user_id, None, &req.message),
            )
        }
    };

    publish(&state, &room_id, &user_id, EventType::Message, &message).await?;
    Ok((status, Json(ResponsePayload::ok(note, &message))))
}

/// GET /api/v1/rooms/{id}/messages?limit=&offset=
///
/// History is public; only producing events needs a token.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ResponsePayload>, ApiError> {
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let messages = state
        .store
        .list(&room_id, limit, offset)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(ResponsePayload::ok(
        "Messages retrieved successfully",
        &messages,
    )))
}

#[derive(Serialize)]
struct AiTurnResult {
    prompt: String,
    response: String,
    model: String,
    usage: crate::ai::Usage,
    message: StoredMessage,
}

/// POST /api/v1/rooms/{id}/ai
///
/// typing -> provider call -> streamed chunks -> persisted answer -> complete.
/// Turns in one room never overlap. The turn runs on its own task, so a caller
/// that hangs up does not cut the room's event sequence short.
pub async fn ai_prompt(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<AiPromptRequest>,
) -> Result<Json<ResponsePayload>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }

    let turn = tokio::spawn(run_ai_turn(state, room_id, user_id, req));
    let result = turn
        .await
        .map_err(|e| ApiError::internal(format!("AI turn aborted: {e}")))??;
    Ok(Json(ResponsePayload::ok("AI request successful", result)))
}

async fn run_ai_turn(
    state: AppState,
    room_id: String,
    user_id: String,
    req: AiPromptRequest,
) -> Result<AiTurnResult, ApiError> {
    let _turn = state.turns.acquire(&room_id).await;

    let typing = TypingPayload {
        user_id: user_id.clone(),
        status: "processing".to_string(),
    };
    publish(&state, &room_id, &user_id, EventType::AiTyping, &typing).await?;

    let request = AiRequest {
        prompt: req.prompt.clone(),
        model: req.model.clone(),
        max_tokens: req.max_tokens,
        cache: req.cache,
    };
    let reply = match state.ai.complete(&request).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(room = %room_id, user = %user_id, error = %e, "AI provider failed");
            let failure = ErrorPayload {
                user_id: user_id.clone(),
                error: e.to_string(),
            };
            publish(&state, &room_id, &user_id, EventType::AiError, &failure).await?;
            return Err(e.into());
        }
    };

    let stream_id = state.relay.relay(&room_id, &user_id, &reply.text).await?;

    let ai = state.relay.identity();
    let message = match state.store.create(&room_id, &ai.user_id, &reply.text).await {
        Ok(message) => message,
        Err(e) => {
            warn!(
                room = %room_id,
                error = %e,
                "AI answer not persisted, sending transient record"
            );
            transient_message(&room_id, &ai.user_id, Some(ai.user_name.as_str()), &reply.text)
        }
    };

    let complete = CompletePayload {
        temp_id: stream_id,
        user_id: user_id.clone(),
        message: message.clone(),
    };
    publish(&state, &room_id, &user_id, EventType::AiComplete, &complete).await?;

    info!(
        room = %room_id,
        user = %user_id,
        response_len = reply.text.len(),
        "AI turn complete"
    );

    Ok(AiTurnResult {
        prompt: req.prompt,
        response: reply.text,
        model: reply.model,
        usage: reply.usage,
        message,
    })
}

async fn publish(
    state: &AppState,
    room_id: &str,
    user_id: &str,
    event_type: EventType,
    payload: impl Serialize,
) -> Result<(), ApiError> {
    let envelope = Envelope::new(room_id, user_id, event_type, payload)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    state.hub.broadcast(envelope).await?;
    Ok(())
}

fn transient_message(
    room_id: &str,
    user_id: &str,
    user_name: Option<&str>,
    text: &str,
) -> StoredMessage {
    StoredMessage {
        id: format!("transient-{}", Uuid::new_v4().simple()),
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        user_name: user_name.map(str::to_string),
        message: text.to_string(),
        created_at: Utc::now(),
    }
}

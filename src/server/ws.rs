//! WebSocket attachment point.
//!
//! GET /api/v1/rooms/{id}/chat/ws?token=...

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use super::connection::{Connection, Frame};
use super::AppState;
use crate::auth::bearer_token;
use crate::error::{ApiError, AuthError};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Validates the token, attaches a member, then upgrades.
///
/// Browsers cannot set headers on the upgrade request, so the token is read
/// from the query string first and from `Authorization` second.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or(AuthError::MissingToken)?;
    let user_id = state.validator.validate(token)?;

    let conn = Connection::attach(&state.hub, &room_id, &user_id, state.ping_interval).await?;
    info!(room = %room_id, user = %user_id, member = conn.member_id(), "websocket accepted");

    let detach = conn.detach_handle();
    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!(error = %e, "websocket upgrade failed");
            tokio::spawn(async move {
                detach.detach().await;
            });
        })
        .on_upgrade(move |socket| serve_socket(socket, conn)))
}

async fn serve_socket(socket: WebSocket, conn: Connection) {
    let (sink, stream) = socket.split();
    let reader = stream.map(|msg| msg.map(Frame::from));
    let writer = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))));
    conn.run(reader, writer).await;
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(data) => Frame::Ping(data.to_vec()),
            Message::Pong(data) => Frame::Pong(data.to_vec()),
            Message::Close(_) => Frame::Close,
        }
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

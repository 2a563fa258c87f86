use std::borrow::Cow;
use std::sync::Arc;
use axum::{
    extract::{Path, Query, State, ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade}},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::models::{CollabError, ErrorResponse, ReceivedMessage, SendMessage};
use crate::services::{auth_service::get_ws_token, Identity, ResolvedFile};
use crate::websocket::msg_cursor_handler::handle_cursor_message;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::websocket::msg_update_handler::handle_update_message;
use crate::ws::{ConnCtx, Room, OUTBOUND_QUEUE_CAPACITY};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// WebSocket handler. Every check runs before the upgrade, so a rejected
/// client gets a plain HTTP error and never touches a room.
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    Path(file_path): Path<String>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New WebSocket connection attempt for '{}'", file_path);
    match authorize(&state, &file_path, params.token.as_deref(), &headers).await {
        Ok((identity, file, permit)) => {
            let ctx = ConnCtx::new(identity.username, file.key.clone());
            ws.on_upgrade(move |socket| handle_socket(socket, state, ctx, file, permit))
        }
        Err(rejection) => {
            warn!("WebSocket for '{}' rejected with {}: {}", file_path, rejection.0, rejection.1.error);
            rejection.into_response()
        }
    }
}

async fn authorize(
    state: &AppState,
    file_path: &str,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<(Identity, ResolvedFile, OwnedSemaphorePermit), (StatusCode, Json<ErrorResponse>)> {
    // 1. Feature flag
    if !state.config.enable_collaboration {
        return Err(ErrorResponse::reply(StatusCode::SERVICE_UNAVAILABLE, "Collaboration is disabled"));
    }

    // 2. Identity
    let token = get_ws_token(query_token, headers)
        .map_err(CollabError::AuthenticationFailure)?;
    let identity = state.identity.resolve(&token).await?;

    // 3. Access to the file, which also yields the room key
    let file = state
        .files
        .resolve_file(&identity, file_path)
        .await?
        .ok_or_else(|| CollabError::AccessDenied(file_path.to_string()))?;

    // 4. Room capacity
    state.registry.can_host(&file.key).await?;

    // 5. Connection limit
    let permit = state.registry.admit()?;

    Ok((identity, file, permit))
}

/// Handle WebSocket connection
async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    ctx: ConnCtx,
    file: ResolvedFile,
    _permit: OwnedSemaphorePermit,
) {
    // The room holds the only sender, so eviction or leave ends the send loop
    let (tx, mut rx) = mpsc::channel::<SendMessage>(OUTBOUND_QUEUE_CAPACITY);

    // Join the room; storage is only read when the room has to be created
    let files = state.files.clone();
    let joined = state
        .registry
        .join(&ctx.path, ctx.connection_id, &ctx.username, tx, || {
            let files = files.clone();
            let file = file.clone();
            async move { files.read_text(&file).await }
        })
        .await;
    let room = match joined {
        Ok((room, snapshot)) => {
            info!("WebSocket connection established for {} ({} users in room)", ctx, snapshot.users.len());
            room
        }
        Err(e) => {
            error!("Failed to join room for {}: {}", ctx, e);
            let _ = socket.send(Message::Close(Some(close_frame(&e)))).await;
            return;
        }
    };

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Drain this member's queue into the socket
    let send_ctx = ctx.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize message for {}: {}", send_ctx, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("Socket of {} is gone", send_ctx);
                break;
            }
        }
    });

    // Dispatch incoming messages
    let recv_ctx = ctx.clone();
    let recv_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatch(&text, &recv_ctx, &recv_room).await,
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) => warn!("Ignoring binary frame from {}", recv_ctx),
                Ok(_) => {}
                Err(e) => {
                    debug!("Socket error for {}: {}", recv_ctx, e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    let outcome = state.registry.leave(&ctx.path, ctx.connection_id).await;
    info!("WebSocket connection terminated for {} ({} remaining)", ctx, outcome.remaining);
}

/// Close frame for a connection that was upgraded but could not join its room
fn close_frame(err: &CollabError) -> CloseFrame<'static> {
    const MAX_REASON_BYTES: usize = 123;

    let code = match err {
        CollabError::CapacityExceeded(_) => close_code::AGAIN,
        _ => close_code::ERROR,
    };
    let mut reason = err.to_string();
    if reason.len() > MAX_REASON_BYTES {
        let mut end = MAX_REASON_BYTES;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    CloseFrame { code, reason: Cow::Owned(reason) }
}

async fn dispatch(text: &str, ctx: &ConnCtx, room: &Room) {
    let msg: ReceivedMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Ignoring malformed message from {}: {}", ctx, e);
            return;
        }
    };

    match msg {
        ReceivedMessage::ContentUpdate(update_msg) => handle_update_message(update_msg, ctx, room).await,
        ReceivedMessage::CursorUpdate(cursor_msg) => handle_cursor_message(cursor_msg, ctx, room).await,
        ReceivedMessage::Ping(_) => handle_ping_message(ctx, room).await,
    }
}

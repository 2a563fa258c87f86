use tracing::{debug, error};
use chrono::Utc;
use crate::models::{PongMessage, SendMessage};
use crate::ws::{ConnCtx, Room};

/// Handle PingMessage: answer the sender only.
pub async fn handle_ping_message(ctx: &ConnCtx, room: &Room) {
    debug!("Ping from {}", ctx);
    let pong = SendMessage::Pong(PongMessage { date: Utc::now().to_rfc3339() });
    if let Err(e) = room.send_to(ctx.connection_id, pong).await {
        error!("Failed to queue Pong for {}: {}", ctx, e);
    }
}

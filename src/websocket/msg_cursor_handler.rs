use tracing::{debug, warn};
use crate::models::CursorMoveMessage;
use crate::ws::{ConnCtx, Room};

/// Handle CursorMoveMessage. The position is attributed to the authenticated
/// user, whatever name the client sent along.
pub async fn handle_cursor_message(cursor_msg: CursorMoveMessage, ctx: &ConnCtx, room: &Room) {
    match room.update_cursor(ctx.connection_id, cursor_msg.position).await {
        Ok(recipients) => debug!("Cursor of {} at {} sent to {} members", ctx, cursor_msg.position, recipients),
        Err(e) => warn!("Cursor update from {} failed: {}", ctx, e),
    }
}

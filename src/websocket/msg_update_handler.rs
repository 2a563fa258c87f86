use tracing::{debug, warn};
use crate::models::{CollabError, ContentUpdateMessage};
use crate::ws::{ConnCtx, Room};

/// Handle ContentUpdateMessage: replace the room content and fan it out.
pub async fn handle_update_message(update_msg: ContentUpdateMessage, ctx: &ConnCtx, room: &Room) {
    let len = update_msg.content.len();
    match room.apply_content_update(ctx.connection_id, update_msg.content).await {
        Ok(recipients) => debug!("Content update from {} ({} bytes) sent to {} members", ctx, len, recipients),
        Err(e @ CollabError::MalformedMessage(_)) => warn!("Dropped content update from {}: {}", ctx, e),
        Err(e) => warn!("Content update from {} failed: {}", ctx, e),
    }
}

//! Channel/room multiplexer
//!
//! Places connections into rooms. Every connection of a user sits in that user's
//! personal room; conversation rooms are joined on demand.

use tracing::info;

use crate::connection::Connection;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::registry;
use crate::requests;
use crate::room::Room;
use crate::state::AppState;

/// Set up a freshly authenticated connection
///
/// Announces the session, joins the personal room and replays pending requests.
pub async fn establish(state: &AppState, conn: &Connection) -> Result<(), AppError> {
    let user = conn.user()?;
    conn.send(ServerMessage::session(user))?;
    state.hub.join(conn.id, Room::Personal(user.id)).await?;
    info!("{} ({}) joined personal room", user.name, conn.id);
    requests::replay_pending(state, conn).await?;
    Ok(())
}

/// Open the conversation with the owner of `peer_code`
pub async fn join_conversation(
    state: &AppState,
    conn: &Connection,
    peer_code: &str,
) -> Result<(), AppError> {
    let actor = conn.user()?;
    let (conversation_id, peer) =
        registry::resolve_dm(state.store.as_ref(), actor, peer_code).await?;
    if !state.store.is_participant(conversation_id, actor.id).await? {
        return Err(AppError::NotParticipant);
    }

    let room = Room::Conversation(conversation_id);
    state.hub.join(conn.id, room.clone()).await?;
    conn.send(ServerMessage::connected(conversation_id, &peer))?;

    // Tell a peer already in the room that the actor is present
    state
        .hub
        .emit(
            room,
            ServerMessage::connected(conversation_id, actor),
            Some(conn.id),
        )
        .await
}

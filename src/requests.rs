//! Connection-request state machine
//!
//! A request is keyed by the ordered pair (from, to) and moves from `pending` to
//! `accepted` or `rejected`. Only the stored row is durable: live events to the
//! recipient's personal room are dropped when nobody is connected, and
//! [`replay_pending`] re-delivers them on the recipient's next connect.

use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::AppError;
use crate::identity;
use crate::message::ServerMessage;
use crate::model::RequestStatus;
use crate::registry;
use crate::room::Room;
use crate::state::AppState;
use crate::types::UserId;

/// Ask the owner of `peer_code` to connect
pub async fn request(state: &AppState, conn: &Connection, peer_code: &str) -> Result<(), AppError> {
    let actor = conn.user()?;
    let peer = identity::resolve_by_code(state.store.as_ref(), peer_code).await?;
    if peer.id == actor.id {
        return Err(AppError::SelfConnection);
    }

    // Already connected: open the conversation for the requester only
    if let Some(conversation_id) = state.store.find_dm(actor.id, peer.id).await? {
        state
            .hub
            .join(conn.id, Room::Conversation(conversation_id))
            .await?;
        conn.send(ServerMessage::RequestSent {
            ok: true,
            already_connected: Some(true),
            pending: None,
            peer_code: Some(peer.code()),
            conversation_id: Some(conversation_id),
            error: None,
        })?;
        conn.send(ServerMessage::connected(conversation_id, &peer))?;
        return Ok(());
    }

    if state.store.request_status(actor.id, peer.id).await? == Some(RequestStatus::Pending) {
        debug!("Request {} -> {} already pending", actor.id, peer.id);
        conn.send(ServerMessage::RequestSent {
            ok: true,
            already_connected: None,
            pending: Some(true),
            peer_code: None,
            conversation_id: None,
            error: None,
        })?;
        return Ok(());
    }

    state.store.open_request(actor.id, peer.id).await?;
    info!("Connection request {} -> {}", actor.id, peer.id);
    conn.send(ServerMessage::request_sent())?;
    state
        .hub
        .emit(
            Room::Personal(peer.id),
            ServerMessage::connection_request(actor),
            None,
        )
        .await
}

/// Accept the pending request sent by `from`
pub async fn accept(state: &AppState, conn: &Connection, from: UserId) -> Result<(), AppError> {
    let actor = conn.user()?;
    let requester = state
        .store
        .user_by_id(from)
        .await?
        .ok_or(AppError::RequestNotFound)?;
    if state.store.request_status(from, actor.id).await? != Some(RequestStatus::Pending) {
        return Err(AppError::RequestNotFound);
    }

    // The request stays pending until its conversation exists
    let conversation_id =
        registry::find_or_create_dm(state.store.as_ref(), requester.id, actor.id).await?;
    if !state
        .store
        .settle_request(from, actor.id, RequestStatus::Accepted)
        .await?
    {
        return Err(AppError::RequestNotFound);
    }
    // A crossing request from the acceptor is answered by the same conversation
    if state
        .store
        .settle_request(actor.id, from, RequestStatus::Accepted)
        .await?
    {
        debug!("Crossing request {} -> {} settled", actor.id, from);
    }
    let room = Room::Conversation(conversation_id);
    info!(
        "Connection request {} -> {} accepted, conversation {}",
        from, actor.id, conversation_id
    );

    state.hub.join(conn.id, room.clone()).await?;
    conn.send(ServerMessage::connected(conversation_id, &requester))?;

    // The requester may not be in the conversation room yet
    let requester_room = Room::Personal(requester.id);
    state
        .hub
        .join_members(requester_room.clone(), room)
        .await?;
    state
        .hub
        .emit(
            requester_room.clone(),
            ServerMessage::ConnectionRequestAccepted {
                conversation_id,
                peer_name: actor.name.clone(),
                peer_avatar: actor.avatar_url.clone(),
                peer_code: actor.code(),
            },
            None,
        )
        .await?;
    state
        .hub
        .emit(
            requester_room,
            ServerMessage::connected(conversation_id, actor),
            None,
        )
        .await
}

/// Reject the pending request sent by `from`
pub async fn reject(state: &AppState, conn: &Connection, from: UserId) -> Result<(), AppError> {
    let actor = conn.user()?;
    if !state
        .store
        .settle_request(from, actor.id, RequestStatus::Rejected)
        .await?
    {
        return Err(AppError::RequestNotFound);
    }
    info!("Connection request {} -> {} rejected", from, actor.id);

    state
        .hub
        .emit(
            Room::Personal(from),
            ServerMessage::RequestRejected {
                by_name: actor.name.clone(),
            },
            None,
        )
        .await
}

/// Re-deliver every pending request addressed to the actor to this connection only
///
/// Returns the number of requests replayed.
pub async fn replay_pending(state: &AppState, conn: &Connection) -> Result<usize, AppError> {
    let actor = conn.user()?;
    let requesters = state.store.pending_requesters(actor.id).await?;
    for requester in &requesters {
        conn.send(ServerMessage::connection_request(requester))?;
    }
    if !requesters.is_empty() {
        debug!(
            "Replayed {} pending requests to {}",
            requesters.len(),
            conn.id
        );
    }
    Ok(requesters.len())
}

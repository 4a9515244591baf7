//! Message pipeline
//!
//! A send is broadcast to the conversation room as a provisional message before it is
//! stored. Persistence runs on its own task and ends in either `message_confirmed` to
//! the room or `message_failed` to the sender alone, both correlated by temp id. Every
//! event of a send goes through the hub queue, so the provisional broadcast always
//! precedes its outcome.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::error::AppError;
use crate::hub::HubHandle;
use crate::message::ServerMessage;
use crate::model::ChatMessage;
use crate::registry;
use crate::room::Room;
use crate::state::AppState;
use crate::store::Store;
use crate::types::{ConnectionId, TempId};

/// Description sent with `message_failed`
const SAVE_FAILED: &str = "Message could not be saved";

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Broadcast a provisional message and hand it off for persistence
///
/// Returns once the provisional broadcast is queued.
pub async fn send(
    state: &AppState,
    conn: &Connection,
    peer_code: &str,
    content: Option<String>,
    media_url: Option<String>,
) -> Result<TempId, AppError> {
    let actor = conn.user()?;
    let content = non_blank(content);
    let media_url = non_blank(media_url);
    if content.is_none() && media_url.is_none() {
        return Err(AppError::EmptyMessage);
    }
    let max_len = state.config.max_message_len;
    if content.as_ref().is_some_and(|c| c.chars().count() > max_len) {
        return Err(AppError::MessageTooLong(max_len));
    }

    let (conversation_id, _peer) =
        registry::resolve_dm(state.store.as_ref(), actor, peer_code).await?;
    let room = Room::Conversation(conversation_id);
    state.hub.join(conn.id, room.clone()).await?;

    let temp_id = TempId::generate();
    let provisional =
        ChatMessage::provisional(temp_id.clone(), conversation_id, actor, content, media_url);
    state
        .hub
        .emit(
            room.clone(),
            ServerMessage::ReceiveMessage(provisional.clone()),
            None,
        )
        .await?;

    tokio::spawn(persist(
        state.store.clone(),
        state.hub.clone(),
        conn.id,
        room,
        temp_id.clone(),
        provisional,
    ));

    Ok(temp_id)
}

async fn persist(
    store: Arc<dyn Store>,
    hub: HubHandle,
    sender: ConnectionId,
    room: Room,
    temp_id: TempId,
    provisional: ChatMessage,
) {
    let outcome = match store.insert_message(&provisional.to_new()).await {
        Ok(message) => {
            debug!("Message {} committed as {:?}", temp_id, message.id);
            hub.emit(room, ServerMessage::MessageConfirmed { temp_id, message }, None)
                .await
        }
        Err(e) => {
            error!("Failed to save message {}: {}", temp_id, e);
            hub.deliver(
                sender,
                ServerMessage::MessageFailed {
                    temp_id,
                    error: SAVE_FAILED.to_string(),
                },
            )
            .await
        }
    };
    if let Err(e) = outcome {
        error!("Could not report message outcome: {}", e);
    }
}

/// Recent committed messages with a peer, oldest first
///
/// Never fails: any problem yields an empty history.
pub async fn load_history(state: &AppState, conn: &Connection, peer_code: &str) -> Vec<ChatMessage> {
    match try_load_history(state, conn, peer_code).await {
        Ok(messages) => messages,
        Err(e) => {
            info!("History for {} unavailable: {}", conn.display_name(), e);
            Vec::new()
        }
    }
}

async fn try_load_history(
    state: &AppState,
    conn: &Connection,
    peer_code: &str,
) -> Result<Vec<ChatMessage>, AppError> {
    let actor = conn.user()?;
    let (conversation_id, _peer) =
        registry::resolve_dm(state.store.as_ref(), actor, peer_code).await?;
    Ok(state
        .store
        .recent_messages(conversation_id, state.config.history_limit)
        .await?)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::{FanoutBus, LocalBus};
    use crate::model::MessageKind;
    use crate::multiplexer;
    use crate::store::SqliteStore;
    use crate::testutil::{assert_quiet, next_event, Fixture};

    fn provisional_of(event: ServerMessage) -> ChatMessage {
        match event {
            ServerMessage::ReceiveMessage(message) => message,
            other => panic!("expected receive_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_broadcasts_then_confirms() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx_a) = fx.sign_in(&alice).await;
        let (b, mut rx_b) = fx.sign_in(&bob).await;
        multiplexer::join_conversation(&fx.state, &b, alice.code().as_str())
            .await
            .unwrap();
        next_event(&mut rx_b).await;

        let temp_id = send(&fx.state, &a, bob.code().as_str(), Some("hi".into()), None)
            .await
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let provisional = provisional_of(next_event(rx).await);
            assert!(provisional.optimistic);
            assert!(provisional.id.is_none());
            assert_eq!(provisional.temp_id.as_ref(), Some(&temp_id));
            assert_eq!(provisional.message_type, MessageKind::Text);

            match next_event(rx).await {
                ServerMessage::MessageConfirmed {
                    temp_id: confirmed,
                    message,
                } => {
                    assert_eq!(confirmed, temp_id);
                    assert!(!message.optimistic);
                    assert!(message.id.is_some());
                    assert_eq!(message.content, provisional.content);
                    assert_eq!(message.media_url, provisional.media_url);
                }
                other => panic!("expected message_confirmed, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_send_classifies_media() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx_a) = fx.sign_in(&alice).await;

        send(
            &fx.state,
            &a,
            bob.code().as_str(),
            None,
            Some("/uploads/clip.MP4?x=1".into()),
        )
        .await
        .unwrap();

        let provisional = provisional_of(next_event(&mut rx_a).await);
        assert_eq!(provisional.message_type, MessageKind::Video);
        assert!(provisional.content.is_none());
    }

    #[tokio::test]
    async fn test_send_validates_before_broadcast() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx_a) = fx.sign_in(&alice).await;
        let code = bob.code();

        assert!(matches!(
            send(&fx.state, &a, code.as_str(), Some("   ".into()), None).await,
            Err(AppError::EmptyMessage)
        ));
        let long = "x".repeat(fx.state.config.max_message_len + 1);
        assert!(matches!(
            send(&fx.state, &a, code.as_str(), Some(long), None).await,
            Err(AppError::MessageTooLong(_))
        ));
        assert!(matches!(
            send(&fx.state, &a, "12345678", Some("hi".into()), None).await,
            Err(AppError::UserNotFound(_))
        ));
        assert_quiet(&mut rx_a).await;
    }

    #[tokio::test]
    async fn test_anonymous_send_is_unauthorized() {
        let fx = Fixture::new().await;
        let bob = fx.user("Bob").await;
        let (anonymous, _rx) = fx.connect(None).await;

        assert!(matches!(
            send(&fx.state, &anonymous, bob.code().as_str(), Some("hi".into()), None).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_reaches_sender_only() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx_a) = fx.sign_in(&alice).await;
        let (b, mut rx_b) = fx.sign_in(&bob).await;
        multiplexer::join_conversation(&fx.state, &b, alice.code().as_str())
            .await
            .unwrap();
        next_event(&mut rx_b).await;

        sqlx::query("DROP TABLE messages")
            .execute(fx.store.pool())
            .await
            .unwrap();

        let temp_id = send(&fx.state, &a, bob.code().as_str(), Some("hi".into()), None)
            .await
            .unwrap();

        provisional_of(next_event(&mut rx_a).await);
        assert_eq!(
            next_event(&mut rx_a).await,
            ServerMessage::MessageFailed {
                temp_id: temp_id.clone(),
                error: SAVE_FAILED.to_string(),
            }
        );

        assert_eq!(
            provisional_of(next_event(&mut rx_b).await).temp_id,
            Some(temp_id)
        );
        assert_quiet(&mut rx_b).await;
    }

    #[tokio::test]
    async fn test_send_reaches_peer_on_other_instance() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let bus: Arc<dyn FanoutBus> = Arc::new(LocalBus::default());
        let east = Fixture::on(store.clone(), bus.clone()).await;
        let west = Fixture::on(store, bus).await;
        let alice = east.user("Alice").await;
        let bob = east.user("Bob").await;

        let (a, mut rx_a) = east.sign_in(&alice).await;
        let (b, mut rx_b) = west.sign_in(&bob).await;
        multiplexer::join_conversation(&west.state, &b, alice.code().as_str())
            .await
            .unwrap();
        // Bob's own connected; Alice is not in the conversation room yet
        next_event(&mut rx_b).await;

        let temp_id = send(&east.state, &a, bob.code().as_str(), Some("hi".into()), None)
            .await
            .unwrap();

        let provisional = provisional_of(next_event(&mut rx_b).await);
        assert_eq!(provisional.temp_id, Some(temp_id.clone()));
        assert!(matches!(
            next_event(&mut rx_b).await,
            ServerMessage::MessageConfirmed { temp_id: t, .. } if t == temp_id
        ));
        provisional_of(next_event(&mut rx_a).await);
    }

    #[tokio::test]
    async fn test_load_history_oldest_first() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx_a) = fx.sign_in(&alice).await;

        for text in ["one", "two", "three"] {
            send(&fx.state, &a, bob.code().as_str(), Some(text.into()), None)
                .await
                .unwrap();
            // Wait for the confirmation so rows land in send order
            provisional_of(next_event(&mut rx_a).await);
            next_event(&mut rx_a).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let history = load_history(&fx.state, &a, bob.code().as_str()).await;
        let contents: Vec<_> = history.iter().filter_map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_load_history_never_fails() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let (a, _rx_a) = fx.sign_in(&alice).await;
        let (anonymous, _rx) = fx.connect(None).await;

        assert!(load_history(&fx.state, &a, "bogus").await.is_empty());
        assert!(load_history(&fx.state, &anonymous, alice.code().as_str())
            .await
            .is_empty());
    }
}

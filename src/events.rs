//! Client event dispatch
//!
//! Routes one decoded client message to its component and turns every failure into a
//! client-visible event. Nothing here ends the connection.

use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::multiplexer;
use crate::pipeline;
use crate::registry;
use crate::requests;
use crate::state::AppState;

/// Handle one client message
pub async fn dispatch(state: &AppState, conn: &Connection, msg: ClientMessage) {
    let outcome = match msg {
        ClientMessage::JoinConversation { conversation_id } => {
            multiplexer::join_conversation(state, conn, &conversation_id).await
        }
        ClientMessage::RequestConnection { peer_code } => {
            // Failures answer the request itself rather than raising an error event
            match requests::request(state, conn, &peer_code).await {
                Err(e) if !matches!(e, AppError::Unauthorized) => {
                    log_failure(conn, &e);
                    send(conn, request_failure(e));
                    Ok(())
                }
                other => other,
            }
        }
        ClientMessage::AcceptConnectionRequest { from_user_id } => {
            requests::accept(state, conn, from_user_id).await
        }
        ClientMessage::RejectConnectionRequest { from_user_id } => {
            requests::reject(state, conn, from_user_id).await
        }
        ClientMessage::SendMessage {
            conversation_id,
            content,
            media_url,
        } => pipeline::send(state, conn, &conversation_id, content, media_url)
            .await
            .map(|temp_id| debug!("{} sent {}", conn.display_name(), temp_id)),
        ClientMessage::LoadMessages { conversation_id } => {
            let messages = pipeline::load_history(state, conn, &conversation_id).await;
            send(conn, ServerMessage::PreviousMessages { messages });
            Ok(())
        }
        ClientMessage::ListConversations => registry::list_conversations(state, conn)
            .await
            .map(|conversations| send(conn, ServerMessage::Conversations { conversations })),
    };

    if let Err(e) = outcome {
        log_failure(conn, &e);
        send(conn, e.into());
    }
}

/// `request_sent{ok: false}` carrying the client-facing reason
fn request_failure(err: AppError) -> ServerMessage {
    match ServerMessage::from(err) {
        ServerMessage::Error { message, .. } => ServerMessage::request_failed(message),
        other => other,
    }
}

fn log_failure(conn: &Connection, err: &AppError) {
    if err.is_internal() {
        error!("Event from {} failed: {}", conn.id, err);
    } else {
        debug!("Event from {} rejected: {}", conn.id, err);
    }
}

fn send(conn: &Connection, msg: ServerMessage) {
    if conn.send(msg).is_err() {
        debug!("Connection {} closed before reply", conn.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;
    use crate::testutil::{next_event, Fixture};

    fn decode(json: &str) -> ClientMessage {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_peer_answers_request_sent_failure() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let (a, mut rx) = fx.sign_in(&alice).await;

        dispatch(
            &fx.state,
            &a,
            decode(r#"{"type":"request_connection","peer_code":"00000000"}"#),
        )
        .await;

        match next_event(&mut rx).await {
            ServerMessage::RequestSent { ok, error, .. } => {
                assert!(!ok);
                assert!(error.unwrap().contains("00000000"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_anonymous_actions_get_unauthorized() {
        let fx = Fixture::new().await;
        let bob = fx.user("Bob").await;
        let (anonymous, mut rx) = fx.connect(None).await;

        let events = [
            format!(r#"{{"type":"request_connection","peer_code":"{}"}}"#, bob.code()),
            format!(r#"{{"type":"join_conversation","conversation_id":"{}"}}"#, bob.code()),
            format!(r#"{{"type":"accept_connection_request","from_user_id":"{}"}}"#, bob.id),
            r#"{"type":"list_conversations"}"#.to_string(),
        ];
        for json in &events {
            dispatch(&fx.state, &anonymous, decode(json)).await;
            assert!(matches!(
                next_event(&mut rx).await,
                ServerMessage::Error {
                    code: ErrorCode::Unauthorized,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_load_messages_for_unknown_peer_is_empty() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let (a, mut rx) = fx.sign_in(&alice).await;

        dispatch(
            &fx.state,
            &a,
            decode(r#"{"type":"load_messages","conversation_id":"nobody"}"#),
        )
        .await;

        assert_eq!(
            next_event(&mut rx).await,
            ServerMessage::PreviousMessages { messages: vec![] }
        );
    }

    #[tokio::test]
    async fn test_empty_send_is_invalid_message() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx) = fx.sign_in(&alice).await;

        dispatch(
            &fx.state,
            &a,
            decode(&format!(
                r#"{{"type":"send_message","conversation_id":"{}","content":""}}"#,
                bob.code()
            )),
        )
        .await;

        assert!(matches!(
            next_event(&mut rx).await,
            ServerMessage::Error {
                code: ErrorCode::InvalidMessage,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_conversations_shows_peer() {
        let fx = Fixture::new().await;
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let (a, mut rx) = fx.sign_in(&alice).await;
        let conversation = fx.conversation(&alice, &bob).await;

        dispatch(&fx.state, &a, decode(r#"{"type":"list_conversations"}"#)).await;

        match next_event(&mut rx).await {
            ServerMessage::Conversations { conversations } => {
                assert_eq!(conversations.len(), 1);
                assert_eq!(conversations[0].conversation_id, conversation);
                assert_eq!(conversations[0].peer_name, "Bob");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

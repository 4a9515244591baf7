//! Conversation registry
//!
//! At most one 1:1 conversation exists per unordered user pair. Creation is lazy and
//! find-before-create; the store's pair key makes concurrent first contact converge on
//! one canonical row.

use tracing::info;

use crate::connection::Connection;
use crate::error::AppError;
use crate::identity;
use crate::model::{ConversationSummary, User};
use crate::state::AppState;
use crate::store::Store;
use crate::types::{ConversationId, UserId};

/// Return the 1:1 conversation between two users, creating it on first contact
pub async fn find_or_create_dm(
    store: &dyn Store,
    a: UserId,
    b: UserId,
) -> Result<ConversationId, AppError> {
    if let Some(existing) = store.find_dm(a, b).await? {
        return Ok(existing);
    }
    let created = store.create_dm(a, b).await?;
    info!("Conversation {} opened between {} and {}", created, a, b);
    Ok(created)
}

/// Resolve a peer short code to the actor's conversation with that peer
pub async fn resolve_dm(
    store: &dyn Store,
    actor: &User,
    peer_code: &str,
) -> Result<(ConversationId, User), AppError> {
    let peer = identity::resolve_by_code(store, peer_code).await?;
    if peer.id == actor.id {
        return Err(AppError::SelfConnection);
    }
    let conversation = find_or_create_dm(store, actor.id, peer.id).await?;
    Ok((conversation, peer))
}

/// Every 1:1 conversation of the actor, newest first
pub async fn list_conversations(
    state: &AppState,
    conn: &Connection,
) -> Result<Vec<ConversationSummary>, AppError> {
    let actor = conn.user()?;
    Ok(state.store.list_dms(actor.id).await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::SqliteStore;
    use crate::testutil::{self, user_named};

    #[tokio::test]
    async fn test_find_or_create_twice_returns_same_conversation() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (alice, bob) = (user_named("Alice"), user_named("Bob"));
        store.upsert_user(&alice).await.unwrap();
        store.upsert_user(&bob).await.unwrap();

        let first = find_or_create_dm(&store, alice.id, bob.id).await.unwrap();
        let second = find_or_create_dm(&store, alice.id, bob.id).await.unwrap();
        let reversed = find_or_create_dm(&store, bob.id, alice.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, reversed);
    }

    #[tokio::test]
    async fn test_concurrent_first_contact_converges() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let (alice, bob) = (user_named("Alice"), user_named("Bob"));
        store.upsert_user(&alice).await.unwrap();
        store.upsert_user(&bob).await.unwrap();

        let (s1, s2) = (store.clone(), store.clone());
        let (x, y) = (alice.id, bob.id);
        let (a, b) = tokio::join!(
            async move { find_or_create_dm(s1.as_ref(), x, y).await },
            async move { find_or_create_dm(s2.as_ref(), y, x).await },
        );

        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_dm_rejects_own_code() {
        let store = SqliteStore::in_memory().await.unwrap();
        let alice = user_named("Alice");
        store.upsert_user(&alice).await.unwrap();

        let result = resolve_dm(&store, &alice, alice.code().as_str()).await;
        assert!(matches!(result, Err(AppError::SelfConnection)));
    }

    #[tokio::test]
    async fn test_list_conversations_requires_identity() {
        let fixture = testutil::Fixture::new().await;
        let (anonymous, _rx) = fixture.connect(None).await;

        let result = list_conversations(&fixture.state, &anonymous).await;
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }
}

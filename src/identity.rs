//! Identity resolution
//!
//! Maps short codes and session tokens to users. Codes are prefixes of the user id and
//! are not guaranteed unique, so a code that matches more than one user is refused
//! rather than resolved to an arbitrary one.

use tracing::{debug, warn};

use crate::error::AppError;
use crate::model::User;
use crate::store::Store;
use crate::types::ShortCode;

/// Cookie and query parameter carrying the session token
pub const SESSION_KEY: &str = "session";

/// Resolve a short code to exactly one user
pub async fn resolve_by_code(store: &dyn Store, code: &str) -> Result<User, AppError> {
    let parsed =
        ShortCode::parse(code).ok_or_else(|| AppError::UserNotFound(code.trim().to_string()))?;

    // Two rows are enough to detect a collision
    let mut users = store.users_by_code(&parsed, 2).await?;
    match users.len() {
        0 => Err(AppError::UserNotFound(parsed.to_string())),
        1 => Ok(users.remove(0)),
        _ => {
            warn!("Short code {} matches several users", parsed);
            Err(AppError::AmbiguousCode(parsed.to_string()))
        }
    }
}

/// Resolve the session token presented at handshake
pub async fn resolve_by_session(store: &dyn Store, token: Option<&str>) -> Result<User, AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;
    match store.user_by_session(token).await? {
        Some(user) => Ok(user),
        None => {
            debug!("Unknown or expired session token");
            Err(AppError::Unauthorized)
        }
    }
}

/// Extract the session token from the handshake's Cookie header or query string
///
/// The cookie wins when both are present. A query value is form-decoded.
pub fn session_token(cookie_header: Option<&str>, query: Option<&str>) -> Option<String> {
    let from_cookie = cookie_header.and_then(|header| {
        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_KEY).then(|| value.trim_matches('"').to_string())
        })
    });

    from_cookie
        .or_else(|| {
            query.and_then(|q| {
                q.split('&').find_map(|pair| {
                    let (name, value) = pair.split_once('=')?;
                    if name != SESSION_KEY {
                        return None;
                    }
                    urlencoding::decode(&value.replace('+', " "))
                        .map(|decoded| decoded.into_owned())
                        .ok()
                })
            })
        })
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::store::SqliteStore;
    use crate::testutil::user_named;
    use crate::types::UserId;

    #[test]
    fn test_session_token_from_cookie() {
        let token = session_token(Some("theme=dark; session=abc123; lang=en"), None);
        assert_eq!(token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_session_token_from_query() {
        assert_eq!(
            session_token(None, Some("v=2&session=xyz")).as_deref(),
            Some("xyz")
        );
        assert_eq!(
            session_token(Some("session=c"), Some("session=q")).as_deref(),
            Some("c")
        );
    }

    #[test]
    fn test_session_token_query_is_decoded() {
        assert_eq!(
            session_token(None, Some("session=a%2Fb%3D%3D&x=1")).as_deref(),
            Some("a/b==")
        );
        assert_eq!(
            session_token(None, Some("session=a+b")).as_deref(),
            Some("a b")
        );
        assert!(session_token(None, Some("session=%FF")).is_none());
    }

    #[test]
    fn test_session_token_missing_or_empty() {
        assert!(session_token(None, None).is_none());
        assert!(session_token(Some("sessionid=1"), Some("session=")).is_none());
    }

    #[tokio::test]
    async fn test_resolve_by_code() {
        let store = SqliteStore::in_memory().await.unwrap();
        let alice = user_named("Alice");
        store.upsert_user(&alice).await.unwrap();

        let code = alice.code().to_string().to_uppercase();
        let found = resolve_by_code(&store, &format!(" {} ", code)).await.unwrap();
        assert_eq!(found, alice);

        assert!(matches!(
            resolve_by_code(&store, "00000000").await,
            Err(AppError::UserNotFound(_))
        ));
        assert!(matches!(
            resolve_by_code(&store, "not-a-code").await,
            Err(AppError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_colliding_code_is_ambiguous() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = User {
            id: UserId(Uuid::parse_str("abc12345-0000-4000-8000-000000000001").unwrap()),
            name: "First".to_string(),
            avatar_url: None,
        };
        let second = User {
            id: UserId(Uuid::parse_str("abc12345-0000-4000-8000-000000000002").unwrap()),
            name: "Second".to_string(),
            avatar_url: None,
        };
        store.upsert_user(&first).await.unwrap();
        store.upsert_user(&second).await.unwrap();

        assert!(matches!(
            resolve_by_code(&store, "abc12345").await,
            Err(AppError::AmbiguousCode(code)) if code == "abc12345"
        ));
    }

    #[tokio::test]
    async fn test_resolve_by_session() {
        let store = SqliteStore::in_memory().await.unwrap();
        let alice = user_named("Alice");
        store.upsert_user(&alice).await.unwrap();
        store
            .insert_session("tok", alice.id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(resolve_by_session(&store, Some("tok")).await.unwrap(), alice);
        assert!(matches!(
            resolve_by_session(&store, None).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            resolve_by_session(&store, Some("other")).await,
            Err(AppError::Unauthorized)
        ));
    }
}

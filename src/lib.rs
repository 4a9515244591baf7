//! 1:1 Messaging Coordination Server Library
//!
//! Real-time 1:1 messaging over WebSocket: contacts are addressed by short codes,
//! conversations are opened through a request/accept handshake, and messages are
//! broadcast optimistically before they are stored.
//!
//! # Features
//! - Session-based identity resolved once per connection
//! - Short-code lookup with collision detection
//! - Connection requests with replay of pending requests on connect
//! - Optimistic send with confirm/fail reconciliation by temp id
//! - Message history and conversation listing
//! - Multi-instance fanout over Redis pub/sub
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the per-instance actor owning connections and room membership
//! - Each connection has a `handler` task dispatching its events in arrival order
//! - A `FanoutBus` mirrors room emits and joins to every other instance
//! - The relational `Store` is the single source of truth
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use pairchat::{handle_connection, AppState, Hub, LocalBus, ServerConfig, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::from_env();
//!     let store = SqliteStore::connect(&config.database_url, 5).await.unwrap();
//!     store.migrate().await.unwrap();
//!     let hub = Hub::start(Arc::new(LocalBus::default())).await.unwrap();
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let state = AppState::new(Arc::new(store), hub, config);
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, state.clone()));
//!     }
//! }
//! ```

pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod hub;
pub mod identity;
pub mod message;
pub mod model;
pub mod multiplexer;
pub mod pipeline;
pub mod registry;
pub mod requests;
pub mod room;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use bus::{FanoutBus, LocalBus, RedisBus};
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{AppError, BusError, SendError, StoreError};
pub use handler::handle_connection;
pub use hub::{Hub, HubHandle};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use model::{ChatMessage, User};
pub use room::Room;
pub use state::AppState;
pub use store::{SqliteStore, Store};
pub use types::{ConversationId, ShortCode, TempId, UserId};

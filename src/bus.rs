//! Fanout bus
//!
//! Propagates room-scoped emits and joins between server instances that share no
//! memory. Delivery is at most once per subscriber per publish; nothing is queued for
//! instances that are not subscribed at publish time.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::message::ServerMessage;
use crate::room::Room;
use crate::types::{ConnectionId, InstanceId};

/// Delay between Redis subscriber reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One published operation, stamped with the instance that applied it first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: InstanceId,
    pub op: BusOp,
}

/// Room operation replayed on every other instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BusOp {
    /// Deliver `event` to the room, skipping one connection
    Emit {
        room: Room,
        event: ServerMessage,
        except: Option<ConnectionId>,
    },
    /// Add every local member of `members_of` to `room`
    Join { members_of: Room, room: Room },
}

/// Publish/subscribe transport
#[async_trait]
pub trait FanoutBus: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError>;

    /// Start receiving every envelope published from now on
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Envelope>, BusError>;
}

/// In-process bus
///
/// Used when a single instance runs alone, and to wire several hubs together in tests.
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl FanoutBus for LocalBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError> {
        // No subscribers is not an error
        let _ = self.tx.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Envelope>, BusError> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if out_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Local bus subscriber lagged, {} envelopes dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Local bus subscriber ended");
        });
        Ok(out_rx)
    }
}

/// Redis pub/sub bus
///
/// All instances publish to and subscribe on one channel; rooms are resolved by each
/// instance against its own membership.
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
}

impl RedisBus {
    pub async fn new(redis_url: &str, channel: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        info!("Redis fanout bus connected, channel {}", channel);
        Ok(Self {
            client,
            publisher,
            channel: channel.to_string(),
        })
    }
}

async fn open_pubsub(client: &redis::Client, channel: &str) -> Result<PubSub, redis::RedisError> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

async fn run_subscriber(
    client: redis::Client,
    channel: String,
    mut pubsub: PubSub,
    out: mpsc::UnboundedSender<Envelope>,
) {
    loop {
        {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable payload on {}: {}", channel, e);
                        continue;
                    }
                };
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => {
                        if out.send(envelope).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Invalid envelope on {}: {}", channel, e),
                }
            }
        }

        warn!("Redis subscription on {} ended, reconnecting", channel);
        pubsub = loop {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if out.is_closed() {
                return;
            }
            match open_pubsub(&client, &channel).await {
                Ok(pubsub) => {
                    info!("Redis subscription on {} restored", channel);
                    break pubsub;
                }
                Err(e) => error!("Redis subscribe failed: {}", e),
            }
        };
    }
}

#[async_trait]
impl FanoutBus for RedisBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.publisher.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Envelope>, BusError> {
        let pubsub = open_pubsub(&self.client, &self.channel).await?;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_subscriber(
            self.client.clone(),
            self.channel.clone(),
            pubsub,
            out_tx,
        ));
        Ok(out_rx)
    }
}

//! Hub actor implementation
//!
//! The room multiplexer of one server instance. Owns the live connections and their
//! room membership, delivers room events locally and mirrors every room operation onto
//! the fanout bus so other instances apply it to their own connections.
//! Uses the Actor pattern with mpsc channels for message passing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::{BusOp, Envelope, FanoutBus};
use crate::error::{AppError, BusError};
use crate::message::ServerMessage;
use crate::room::{Room, RoomTable};
use crate::types::{ConnectionId, InstanceId};

/// Channel buffer size for hub commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Commands sent from connection handlers to the Hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// New connection established
    Register {
        conn: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection closed
    Unregister { conn: ConnectionId },
    /// Add a local connection to a room
    Join { conn: ConnectionId, room: Room },
    /// Deliver an event to every member of a room, on every instance
    Emit {
        room: Room,
        event: ServerMessage,
        except: Option<ConnectionId>,
    },
    /// Add every member of one room to another, on every instance
    JoinMembers { members_of: Room, room: Room },
    /// Deliver an event to one local connection, after everything queued before it
    Deliver {
        conn: ConnectionId,
        event: ServerMessage,
    },
    /// Local members of a room
    Members {
        room: Room,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
}

/// The Hub actor
///
/// Manages local connections and rooms and processes commands from handlers and
/// envelopes from the bus.
pub struct Hub {
    instance: InstanceId,
    /// Live connections: ConnectionId -> outbound channel
    clients: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    rooms: RoomTable,
    receiver: mpsc::Receiver<HubCommand>,
    remote: mpsc::UnboundedReceiver<Envelope>,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl Hub {
    /// Subscribe to the bus and spawn the hub and its publisher task
    pub async fn start(bus: Arc<dyn FanoutBus>) -> Result<HubHandle, BusError> {
        let instance = InstanceId::new();
        let remote = bus.subscribe().await?;

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_publisher(bus, outbox_rx));

        let (tx, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let hub = Hub {
            instance,
            clients: HashMap::new(),
            rooms: RoomTable::new(),
            receiver,
            remote,
            outbox,
        };
        tokio::spawn(hub.run());

        Ok(HubHandle { tx, instance })
    }

    /// Run the Hub event loop
    ///
    /// Continuously processes commands until all handles are dropped.
    async fn run(mut self) {
        info!("Hub {} started", self.instance);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(envelope) = self.remote.recv() => self.handle_remote(envelope),
            }
        }

        info!("Hub {} shutting down", self.instance);
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { conn, sender } => {
                self.clients.insert(conn, sender);
                debug!(
                    "Total connections: {}, Total rooms: {}",
                    self.clients.len(),
                    self.rooms.room_count()
                );
            }
            HubCommand::Unregister { conn } => {
                self.clients.remove(&conn);
                let left = self.rooms.leave_all(conn);
                debug!("Connection {} removed from {} rooms", conn, left.len());
            }
            HubCommand::Join { conn, room } => {
                if self.rooms.join(conn, room.clone()) {
                    debug!("Connection {} joined {}", conn, room);
                }
            }
            HubCommand::Emit {
                room,
                event,
                except,
            } => {
                self.deliver(&room, &event, except);
                self.publish(BusOp::Emit {
                    room,
                    event,
                    except,
                });
            }
            HubCommand::JoinMembers { members_of, room } => {
                self.join_members(&members_of, &room);
                self.publish(BusOp::Join { members_of, room });
            }
            HubCommand::Deliver { conn, event } => self.push(conn, event),
            HubCommand::Members { room, reply } => {
                let _ = reply.send(self.rooms.members(&room));
            }
        }
    }

    /// Apply an operation published by another instance
    fn handle_remote(&mut self, envelope: Envelope) {
        // Already applied locally before publishing
        if envelope.origin == self.instance {
            return;
        }
        match envelope.op {
            BusOp::Emit {
                room,
                event,
                except,
            } => self.deliver(&room, &event, except),
            BusOp::Join { members_of, room } => self.join_members(&members_of, &room),
        }
    }

    fn deliver(&self, room: &Room, event: &ServerMessage, except: Option<ConnectionId>) {
        for conn in self.rooms.members(room) {
            if Some(conn) == except {
                continue;
            }
            self.push(conn, event.clone());
        }
    }

    /// Queue an event for one local connection without waiting on it
    fn push(&self, conn: ConnectionId, event: ServerMessage) {
        let Some(sender) = self.clients.get(&conn) else {
            return;
        };
        if let Err(TrySendError::Full(event)) = sender.try_send(event) {
            warn!("Connection {} is not reading, dropped {:?}", conn, event);
        }
    }

    fn join_members(&mut self, members_of: &Room, room: &Room) {
        for conn in self.rooms.members(members_of) {
            if self.rooms.join(conn, room.clone()) {
                debug!("Connection {} joined {} via {}", conn, room, members_of);
            }
        }
    }

    fn publish(&self, op: BusOp) {
        let envelope = Envelope {
            origin: self.instance,
            op,
        };
        if self.outbox.send(envelope).is_err() {
            warn!("Fanout publisher stopped, operation stays local");
        }
    }
}

/// Publish envelopes one at a time so other instances see them in hub order
async fn run_publisher(bus: Arc<dyn FanoutBus>, mut outbox: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbox.recv().await {
        if let Err(e) = bus.publish(&envelope).await {
            warn!("Fanout publish failed: {}", e);
        }
    }
}

/// Cloneable handle to a running Hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    instance: InstanceId,
}

impl HubHandle {
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), AppError> {
        self.tx.send(cmd).await.map_err(|_| AppError::ChannelSend)
    }

    pub async fn register(
        &self,
        conn: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), AppError> {
        self.send(HubCommand::Register { conn, sender }).await
    }

    pub async fn unregister(&self, conn: ConnectionId) -> Result<(), AppError> {
        self.send(HubCommand::Unregister { conn }).await
    }

    pub async fn join(&self, conn: ConnectionId, room: Room) -> Result<(), AppError> {
        self.send(HubCommand::Join { conn, room }).await
    }

    pub async fn emit(
        &self,
        room: Room,
        event: ServerMessage,
        except: Option<ConnectionId>,
    ) -> Result<(), AppError> {
        self.send(HubCommand::Emit {
            room,
            event,
            except,
        })
        .await
    }

    pub async fn join_members(&self, members_of: Room, room: Room) -> Result<(), AppError> {
        self.send(HubCommand::JoinMembers { members_of, room }).await
    }

    pub async fn deliver(&self, conn: ConnectionId, event: ServerMessage) -> Result<(), AppError> {
        self.send(HubCommand::Deliver { conn, event }).await
    }

    pub async fn members(&self, room: Room) -> Result<Vec<ConnectionId>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Members { room, reply }).await?;
        rx.await.map_err(|_| AppError::ChannelSend)
    }
}

//! The broadcast hub.
//!
//! One task owns the [`RoomRegistry`] and consumes a single control channel.
//! Everything else talks to it through the cloneable [`Hub`] handle, so
//! membership changes and fan-out are applied in the order they were queued.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{MemberId, RoomRegistry};
use crate::error::HubError;
use crate::protocol::Envelope;

pub const DEFAULT_CONTROL_CAPACITY: usize = 1024;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity of the control channel shared by all producers.
    pub control_capacity: usize,
    /// Capacity of each member's outbound queue.
    pub outbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub rooms: usize,
    pub members: usize,
}

/// One connection's attachment to a room, as handed out by [`Hub::register`].
#[derive(Debug)]
pub struct Member {
    pub id: MemberId,
    pub room_id: String,
    pub user_id: String,
    /// Envelopes queued for this member, in room submission order.
    pub outbound: mpsc::Receiver<Arc<Envelope>>,
}

struct MemberSlot {
    user_id: String,
    tx: mpsc::Sender<Arc<Envelope>>,
    dropped: u64,
}

enum HubCommand {
    Register {
        room_id: String,
        user_id: String,
        reply: oneshot::Sender<Member>,
    },
    Deregister {
        room_id: String,
        member_id: MemberId,
    },
    Broadcast(Arc<Envelope>),
    Stats(oneshot::Sender<HubStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable handle to the hub task.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawns the coordination task. Must be called inside a tokio runtime.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.control_capacity.max(1));
        let task = tokio::spawn(run_hub(rx, config.outbound_capacity.max(1)));
        (Self { tx }, task)
    }

    /// Attaches a new member to `room_id`.
    ///
    /// Once this returns, every broadcast submitted afterwards to the room is
    /// delivered to the new member.
    pub async fn register(
        &self,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Member, HubError> {
        let (reply, ack) = oneshot::channel();
        self.tx
            .send(HubCommand::Register {
                room_id: room_id.into(),
                user_id: user_id.into(),
                reply,
            })
            .await
            .map_err(|_| HubError::ShutDown)?;
        ack.await.map_err(|_| HubError::ShutDown)
    }

    /// Removes a member. Idempotent; a no-op once the hub has shut down.
    pub async fn deregister(&self, room_id: &str, member_id: MemberId) {
        let cmd = HubCommand::Deregister {
            room_id: room_id.to_string(),
            member_id,
        };
        if self.tx.send(cmd).await.is_err() {
            debug!("deregister of member {} after hub shutdown", member_id);
        }
    }

    /// Queues an envelope for every current member of `envelope.room_id`.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.tx
            .send(HubCommand::Broadcast(Arc::new(envelope)))
            .await
            .map_err(|_| HubError::ShutDown)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Stats(reply))
            .await
            .map_err(|_| HubError::ShutDown)?;
        rx.await.map_err(|_| HubError::ShutDown)
    }

    /// Stops the hub for good and tears down every attached member.
    ///
    /// Returns once the hub task has released all member queues.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(HubCommand::Shutdown(ack)).await.is_ok() {
            done.await.ok();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn run_hub(mut rx: mpsc::Receiver<HubCommand>, outbound_capacity: usize) {
    let mut registry: RoomRegistry<MemberSlot> = RoomRegistry::new();
    let mut next_id: MemberId = 1;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Register {
                room_id,
                user_id,
                reply,
            } => {
                let id = next_id;
                next_id += 1;
                let (tx, outbound) = mpsc::channel(outbound_capacity);
                registry.add(
                    &room_id,
                    id,
                    MemberSlot {
                        user_id: user_id.clone(),
                        tx,
                        dropped: 0,
                    },
                );
                let member = Member {
                    id,
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    outbound,
                };
                if reply.send(member).is_err() {
                    // caller gave up before the ack
                    registry.remove(&room_id, id);
                    continue;
                }
                info!(
                    room = %room_id,
                    user = %user_id,
                    member = id,
                    total = registry.member_count(),
                    "member attached"
                );
            }
            HubCommand::Deregister { room_id, member_id } => {
                if let Some(slot) = registry.remove(&room_id, member_id) {
                    info!(
                        room = %room_id,
                        user = %slot.user_id,
                        member = member_id,
                        total = registry.member_count(),
                        "member detached"
                    );
                }
            }
            HubCommand::Broadcast(envelope) => fan_out(&mut registry, envelope),
            HubCommand::Stats(reply) => {
                reply
                    .send(HubStats {
                        rooms: registry.room_count(),
                        members: registry.member_count(),
                    })
                    .ok();
            }
            HubCommand::Shutdown(ack) => {
                rx.close();
                let mut waiters = vec![ack];
                // Pending registrations see their reply dropped and fail.
                while let Some(cmd) = rx.recv().await {
                    if let HubCommand::Shutdown(ack) = cmd {
                        waiters.push(ack);
                    }
                }
                let released = registry.drain().len();
                info!(members = released, "hub shut down");
                for ack in waiters {
                    ack.send(()).ok();
                }
                return;
            }
        }
    }
    debug!("hub control channel closed");
}

fn fan_out(registry: &mut RoomRegistry<MemberSlot>, envelope: Arc<Envelope>) {
    let room_id = envelope.room_id.as_str();
    let mut gone = Vec::new();

    for (id, slot) in registry.members_of_mut(room_id) {
        match slot.tx.try_send(envelope.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                slot.dropped += 1;
                warn!(
                    room = %room_id,
                    user = %slot.user_id,
                    member = id,
                    dropped = slot.dropped,
                    "outbound queue full, dropping envelope"
                );
            }
            Err(TrySendError::Closed(_)) => gone.push(id),
        }
    }

    for id in gone {
        registry.remove(room_id, id);
        debug!(room = %room_id, member = id, "pruned member with closed queue");
    }
}

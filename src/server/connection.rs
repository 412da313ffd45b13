//! Per-connection read and write pumps.
//!
//! The adapter is transport agnostic: it reads [`Frame`]s from any stream and
//! writes them to any sink. The WebSocket route adapts axum's socket to that
//! shape; tests drive it with in-memory channels.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::hub::{Hub, Member};
use super::registry::MemberId;
use crate::error::HubError;
use crate::protocol::Envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    PeerClosed,
    ReadError,
    WriteError,
    /// The hub released the member queue (deregistered elsewhere or shut down).
    HubClosed,
}

/// Sends the single deregister for one member, however many times it fires.
#[derive(Clone)]
pub struct Detach {
    hub: Hub,
    room_id: Arc<str>,
    member_id: MemberId,
    done: Arc<AtomicBool>,
}

impl Detach {
    pub fn new(hub: Hub, room_id: &str, member_id: MemberId) -> Self {
        Self {
            hub,
            room_id: Arc::from(room_id),
            member_id,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `true` only for the call that actually deregistered.
    pub async fn detach(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.hub.deregister(&self.room_id, self.member_id).await;
        true
    }
}

pub struct Connection {
    member: Member,
    detach: Detach,
    ping_interval: Option<Duration>,
}

impl Connection {
    /// Registers the connection under `(room_id, user_id)`.
    ///
    /// Fails only when the hub has shut down.
    pub async fn attach(
        hub: &Hub,
        room_id: &str,
        user_id: &str,
        ping_interval: Option<Duration>,
    ) -> Result<Self, HubError> {
        let member = hub.register(room_id, user_id).await?;
        let detach = Detach::new(hub.clone(), &member.room_id, member.id);
        Ok(Self {
            member,
            detach,
            ping_interval,
        })
    }

    pub fn member_id(&self) -> MemberId {
        self.member.id
    }

    pub fn detach_handle(&self) -> Detach {
        self.detach.clone()
    }

    /// Pumps frames until either side fails or closes, then detaches.
    pub async fn run<R, W, E>(self, reader: R, writer: W) -> Teardown
    where
        R: Stream<Item = Result<Frame, E>> + Unpin,
        E: Display,
        W: Sink<Frame> + Unpin + Send + 'static,
        W::Error: Display,
    {
        let Connection {
            member,
            detach,
            ping_interval,
        } = self;
        let Member {
            id,
            room_id,
            user_id,
            outbound,
        } = member;

        let mut write_task = tokio::spawn(write_loop(
            outbound,
            writer,
            ping_interval,
            detach.clone(),
            id,
        ));
        let read = read_loop(reader, detach.clone(), id);
        tokio::pin!(read);

        let cause = tokio::select! {
            cause = &mut read => {
                write_task.abort();
                cause
            }
            joined = &mut write_task => joined.unwrap_or(Teardown::WriteError),
        };

        // covers the aborted write pump
        detach.detach().await;
        info!(room = %room_id, user = %user_id, member = id, ?cause, "connection closed");
        cause
    }
}

async fn read_loop<R, E>(mut reader: R, detach: Detach, member_id: MemberId) -> Teardown
where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let cause = loop {
        match reader.next().await {
            None | Some(Ok(Frame::Close)) => break Teardown::PeerClosed,
            Some(Ok(Frame::Text(_) | Frame::Binary(_))) => {
                debug!(member = member_id, "ignoring inbound data frame");
            }
            Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => {}
            Some(Err(e)) => {
                warn!(member = member_id, error = %e, "read failed");
                break Teardown::ReadError;
            }
        }
    };
    detach.detach().await;
    cause
}

async fn write_loop<W>(
    mut outbound: mpsc::Receiver<Arc<Envelope>>,
    mut writer: W,
    ping_interval: Option<Duration>,
    detach: Detach,
    member_id: MemberId,
) -> Teardown
where
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    let mut ping = tokio::time::interval(ping_interval.unwrap_or(Duration::from_secs(3600)));
    ping.tick().await;

    let cause = loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(envelope) = next else {
                    writer.send(Frame::Close).await.ok();
                    break Teardown::HubClosed;
                };
                let text = match envelope.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(member = member_id, error = %e, "failed to encode envelope");
                        break Teardown::WriteError;
                    }
                };
                if let Err(e) = writer.send(Frame::Text(text)).await {
                    warn!(member = member_id, error = %e, "write failed");
                    break Teardown::WriteError;
                }
            }
            _ = ping.tick(), if ping_interval.is_some() => {
                if let Err(e) = writer.send(Frame::Ping(Vec::new())).await {
                    warn!(member = member_id, error = %e, "keep-alive ping failed");
                    break Teardown::WriteError;
                }
            }
        }
    };
    detach.detach().await;
    cause
}

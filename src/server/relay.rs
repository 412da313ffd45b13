//! Simulated token streaming.
//!
//! A finished AI answer is replayed into a room as a paced series of
//! `ai_stream` envelopes. The pacing is a presentation choice, unrelated to
//! the upstream provider's own cadence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use super::hub::Hub;
use crate::error::RelayError;
use crate::protocol::{Envelope, EventType, StreamChunkPayload};

pub const DEFAULT_CHUNK_SIZE: usize = 20;
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Characters per chunk.
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl RelayConfig {
    pub fn new(chunk_size: usize, chunk_delay: Duration) -> Result<Self, RelayError> {
        if chunk_size == 0 {
            return Err(RelayError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            chunk_delay,
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }
}

/// Who the streamed text is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiIdentity {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
}

impl Default for AiIdentity {
    fn default() -> Self {
        Self {
            user_id: "ai-agent".to_string(),
            user_name: "AI Agent".to_string(),
            user_email: "ai@agent.com".to_string(),
        }
    }
}

/// Splits `text` into `(chunk, accumulated)` pairs of at most `chunk_size`
/// characters. Never splits inside a character.
pub fn chunk_text(text: &str, chunk_size: usize) -> Result<Vec<(&str, &str)>, RelayError> {
    if chunk_size == 0 {
        return Err(RelayError::InvalidChunkSize);
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut ends: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .step_by(chunk_size)
        .skip(1)
        .collect();
    ends.push(text.len());

    let mut start = 0;
    Ok(ends
        .into_iter()
        .map(|end| {
            let pair = (&text[start..end], &text[..end]);
            start = end;
            pair
        })
        .collect())
}

#[derive(Clone)]
pub struct StreamRelay {
    hub: Hub,
    config: RelayConfig,
    identity: AiIdentity,
}

impl StreamRelay {
    pub fn new(hub: Hub, config: RelayConfig, identity: AiIdentity) -> Result<Self, RelayError> {
        let config = RelayConfig::new(config.chunk_size, config.chunk_delay)?;
        Ok(Self {
            hub,
            config,
            identity,
        })
    }

    pub fn identity(&self) -> &AiIdentity {
        &self.identity
    }

    /// Streams `text` into `room_id` and returns the correlation id carried
    /// by every chunk. Empty text emits nothing.
    ///
    /// Runs in the caller's task; the delay is only awaited between chunks.
    pub async fn relay(
        &self,
        room_id: &str,
        actor_user_id: &str,
        text: &str,
    ) -> Result<String, RelayError> {
        let stream_id = format!("ai-temp-{}", Uuid::new_v4().simple());
        let chunks = chunk_text(text, self.config.chunk_size)?;
        let total = chunks.len();

        for (i, (chunk, accumulated)) in chunks.into_iter().enumerate() {
            if i > 0 && !self.config.chunk_delay.is_zero() {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
            let payload = StreamChunkPayload {
                id: stream_id.clone(),
                content: accumulated.to_string(),
                chunk: chunk.to_string(),
                user_id: actor_user_id.to_string(),
                user_name: self.identity.user_name.clone(),
                user_email: self.identity.user_email.clone(),
            };
            let envelope = Envelope::new(room_id, actor_user_id, EventType::AiStream, payload)?;
            self.hub.broadcast(envelope).await?;
        }

        debug!(room = %room_id, stream = %stream_id, chunks = total, "relay finished");
        Ok(stream_id)
    }
}

/// At most one AI turn in flight per room.
#[derive(Clone, Default)]
pub struct TurnGate {
    rooms: Arc<Mutex<HashMap<String, GateEntry>>>,
}

struct GateEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Turns holding or waiting for `lock`.
    claims: usize,
}

/// Counts one holder or waiter; dropping it releases the room entry once the
/// count reaches zero, whether or not the lock was ever obtained.
struct Claim {
    room_id: String,
    gate: TurnGate,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut rooms = self.gate.rooms();
        if let Some(entry) = rooms.get_mut(&self.room_id) {
            entry.claims -= 1;
            if entry.claims == 0 {
                rooms.remove(&self.room_id);
            }
        }
    }
}

pub struct Turn {
    _guard: OwnedMutexGuard<()>,
    _claim: Claim,
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other turn is running in `room_id`.
    ///
    /// Cancelling the wait gives up the place in line without leaking the
    /// room's entry.
    pub async fn acquire(&self, room_id: &str) -> Turn {
        let (lock, claim) = self.claim(room_id);
        let guard = lock.lock_owned().await;
        Turn {
            _guard: guard,
            _claim: claim,
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms().len()
    }

    fn claim(&self, room_id: &str) -> (Arc<tokio::sync::Mutex<()>>, Claim) {
        let mut rooms = self.rooms();
        let entry = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| GateEntry {
                lock: Arc::default(),
                claims: 0,
            });
        entry.claims += 1;
        let claim = Claim {
            room_id: room_id.to_string(),
            gate: self.clone(),
        };
        (entry.lock.clone(), claim)
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, GateEntry>> {
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

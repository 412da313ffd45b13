use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;

use crate::error::StoreError;
use crate::protocol::StoredMessage;

/// Persistence for chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(
        &self,
        room_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Returns up to `limit` messages of a room, oldest first, skipping the
    /// `offset` most recent ones.
    async fn list(
        &self,
        room_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

struct Shared {
    messages: RwLock<Vec<StoredMessage>>,
    path: PathBuf,
}

/// Keeps every message in memory and rewrites `messages.json` on each save.
#[derive(Clone)]
pub struct FileStore {
    shared: Arc<Shared>,
}

impl FileStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;

        let path = data_dir.join("messages.json");
        let messages = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Vec::new()
        };

        Ok(Self {
            shared: Arc::new(Shared {
                messages: RwLock::new(messages),
                path,
            }),
        })
    }

    pub fn save_message(
        &self,
        room_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<StoredMessage, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let msg = StoredMessage {
            id: generate_id(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            message: text.to_string(),
            created_at: Utc::now(),
        };

        let mut messages = self.write();
        messages.push(msg.clone());
        if let Err(e) = write_json(&self.shared.path, &*messages) {
            messages.pop();
            return Err(e);
        }
        Ok(msg)
    }

    pub fn get_history(&self, room_id: &str, limit: usize, offset: usize) -> Vec<StoredMessage> {
        let messages = self.read();
        let in_room: Vec<&StoredMessage> = messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .collect();
        let end = in_room.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        in_room[start..end].iter().map(|m| (*m).clone()).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StoredMessage>> {
        self.shared
            .messages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<StoredMessage>> {
        self.shared
            .messages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn create(
        &self,
        room_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<StoredMessage, StoreError> {
        let store = self.clone();
        let (room_id, user_id, text) = (room_id.to_string(), user_id.to_string(), text.to_string());
        tokio::task::spawn_blocking(move || store.save_message(&room_id, &user_id, &text))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn list(
        &self,
        room_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.get_history(room_id, limit, offset))
    }
}

fn generate_id() -> String {
    let ts = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let rand_part: u16 = rand::thread_rng().gen_range(0..0xFFFF);
    format!("{}-{:04x}", ts, rand_part)
}

fn write_json(path: &Path, v: &impl Serialize) -> Result<(), StoreError> {
    let data = serde_json::to_string_pretty(v)?;
    fs::write(path, data)?;
    Ok(())
}

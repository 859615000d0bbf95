//! In-memory storage implementation for development and testing
//!
//! History lives as long as the process does, which is enough for a room
//! actor to retire and come back with its backlog intact.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::*;
use crate::core::room_key::RoomId;
use crate::error::Result;

/// One room's entries
#[derive(Default)]
pub struct MemoryRoomStorage {
    entries: RwLock<BTreeMap<String, String>>,
    attachments: RwLock<HashMap<Uuid, SessionAttachment>>,
}

impl MemoryRoomStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl RoomStorage for MemoryRoomStorage {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self, reverse: bool, limit: usize) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let values = if reverse {
            entries.values().rev().take(limit).cloned().collect()
        } else {
            entries.values().take(limit).cloned().collect()
        };
        Ok(values)
    }

    async fn put_attachment(&self, attachment: &SessionAttachment) -> Result<()> {
        self.attachments
            .write()
            .await
            .insert(attachment.connection_id, attachment.clone());
        Ok(())
    }

    async fn delete_attachment(&self, connection_id: &Uuid) -> Result<()> {
        self.attachments.write().await.remove(connection_id);
        Ok(())
    }

    async fn list_attachments(&self) -> Result<Vec<SessionAttachment>> {
        Ok(self.attachments.read().await.values().cloned().collect())
    }
}

/// In-memory provider keeping every room's storage for the process lifetime
#[derive(Default)]
pub struct MemoryStorage {
    rooms: RwLock<HashMap<RoomId, Arc<MemoryRoomStorage>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed access to a room's store, creating it on first use
    pub async fn room(&self, room_id: &RoomId) -> Arc<MemoryRoomStorage> {
        if let Some(existing) = self.rooms.read().await.get(room_id) {
            return existing.clone();
        }
        self.rooms
            .write()
            .await
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(MemoryRoomStorage::new()))
            .clone()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn open(&self, room_id: &RoomId) -> Result<Arc<dyn RoomStorage>> {
        let room: Arc<dyn RoomStorage> = self.room(room_id).await;
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::room_key::RoomKey;

    #[tokio::test]
    async fn test_list_orders_by_key() {
        let store = MemoryRoomStorage::new();
        store.put("2024-01-01T00:00:00.002Z", "c").await.unwrap();
        store.put("2024-01-01T00:00:00.000Z", "a").await.unwrap();
        store.put("2024-01-01T00:00:00.001Z", "b").await.unwrap();

        assert_eq!(store.list(false, 10).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.list(true, 2).await.unwrap(), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_attachments_round_trip() {
        let store = MemoryRoomStorage::new();
        let attachment = SessionAttachment {
            connection_id: Uuid::new_v4(),
            limiter_identity: "127.0.0.1".to_string(),
            name: None,
        };
        store.put_attachment(&attachment).await.unwrap();
        assert_eq!(store.list_attachments().await.unwrap(), vec![attachment.clone()]);

        store.delete_attachment(&attachment.connection_id).await.unwrap();
        assert!(store.list_attachments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_returns_same_room() {
        let provider = MemoryStorage::new();
        let room_id = RoomKey::parse("general").unwrap().room_id();

        provider.open(&room_id).await.unwrap().put("k", "v").await.unwrap();
        let again = provider.open(&room_id).await.unwrap();
        assert_eq!(again.list(true, 1).await.unwrap(), vec!["v"]);

        let other = provider
            .open(&RoomKey::parse("random").unwrap().room_id())
            .await
            .unwrap();
        assert!(other.list(true, 1).await.unwrap().is_empty());
    }
}

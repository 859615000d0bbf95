//! Abstract storage interfaces for pluggable backends
//!
//! A room actor only ever talks to its own [`RoomStorage`]; the
//! [`StorageProvider`] hands those out per room id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::room_key::RoomId;
use crate::error::Result;

/// Per-connection metadata persisted alongside a room's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttachment {
    pub connection_id: Uuid,
    pub limiter_identity: String,
    pub name: Option<String>,
}

/// Key-ordered durable store owned by one room
#[async_trait]
pub trait RoomStorage: Send + Sync {
    /// Write `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Values ordered by key; newest first when `reverse` is set
    async fn list(&self, reverse: bool, limit: usize) -> Result<Vec<String>>;

    async fn put_attachment(&self, attachment: &SessionAttachment) -> Result<()>;

    async fn delete_attachment(&self, connection_id: &Uuid) -> Result<()>;

    async fn list_attachments(&self) -> Result<Vec<SessionAttachment>>;
}

/// Resolves a room id to that room's storage
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn open(&self, room_id: &RoomId) -> Result<Arc<dyn RoomStorage>>;
}

//! File-backed storage
//!
//! Each room gets a directory under the configured root holding an
//! append-only `messages.jsonl` log and an `attachments/` directory with one
//! JSON document per live connection.

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::traits::*;
use crate::core::room_key::RoomId;
use crate::error::Result;

const MESSAGE_LOG: &str = "messages.jsonl";
const ATTACHMENT_DIR: &str = "attachments";

#[derive(Serialize, Deserialize)]
struct LogRecord {
    key: String,
    value: String,
}

/// Where a record's JSON sits in the log, without its trailing newline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordSpan {
    offset: u64,
    len: usize,
}

pub struct FileRoomStorage {
    dir: PathBuf,
    /// Latest record for every key, in key order. Built once on open and
    /// kept current by `put`, so reads only touch the records they return.
    index: Mutex<BTreeMap<String, RecordSpan>>,
}

impl FileRoomStorage {
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(dir.join(ATTACHMENT_DIR)).await?;
        let index = build_index(&dir.join(MESSAGE_LOG)).await?;
        debug!("Indexed {} records in {}", index.len(), dir.display());
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(MESSAGE_LOG)
    }

    fn attachment_path(&self, connection_id: &Uuid) -> PathBuf {
        self.dir
            .join(ATTACHMENT_DIR)
            .join(format!("{}.json", connection_id))
    }
}

/// Scan the log once; later writes to a key win
async fn build_index(path: &Path) -> Result<BTreeMap<String, RecordSpan>> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    let mut index = BTreeMap::new();
    let mut offset = 0u64;
    for line in contents.split(|b| *b == b'\n') {
        if !line.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<LogRecord>(line) {
                Ok(record) => {
                    let span = RecordSpan {
                        offset,
                        len: line.len(),
                    };
                    index.insert(record.key, span);
                }
                // a torn write after a crash
                Err(e) => warn!("Skipping unreadable record in {}: {}", path.display(), e),
            }
        }
        offset += line.len() as u64 + 1;
    }
    Ok(index)
}

/// True when the log is empty or its last byte ends a line
async fn ends_with_newline(file: &mut File, len: u64) -> Result<bool> {
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

#[async_trait]
impl RoomStorage for FileRoomStorage {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let record = serde_json::to_vec(&LogRecord {
            key: key.to_string(),
            value: value.to_string(),
        })?;

        // held across the append so offsets match write order
        let mut index = self.index.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.log_path())
            .await?;
        let mut offset = file.metadata().await?.len();

        let mut line = Vec::with_capacity(record.len() + 2);
        if !ends_with_newline(&mut file, offset).await? {
            // terminate a torn record so this one starts on its own line
            warn!("Closing off a torn record in {}", self.log_path().display());
            line.push(b'\n');
            offset += 1;
        }
        line.extend_from_slice(&record);
        line.push(b'\n');

        file.write_all(&line).await?;
        file.flush().await?;

        index.insert(
            key.to_string(),
            RecordSpan {
                offset,
                len: record.len(),
            },
        );
        Ok(())
    }

    async fn list(&self, reverse: bool, limit: usize) -> Result<Vec<String>> {
        let spans: Vec<RecordSpan> = {
            let index = self.index.lock().await;
            if reverse {
                index.values().rev().take(limit).copied().collect()
            } else {
                index.values().take(limit).copied().collect()
            }
        };
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let mut file = File::open(self.log_path()).await?;
        let mut values = Vec::with_capacity(spans.len());
        let mut buf = Vec::new();
        for span in spans {
            buf.resize(span.len, 0);
            file.seek(SeekFrom::Start(span.offset)).await?;
            file.read_exact(&mut buf).await?;
            let record: LogRecord = serde_json::from_slice(&buf)?;
            values.push(record.value);
        }
        Ok(values)
    }

    async fn put_attachment(&self, attachment: &SessionAttachment) -> Result<()> {
        let body = serde_json::to_vec(attachment)?;
        fs::write(self.attachment_path(&attachment.connection_id), body).await?;
        Ok(())
    }

    async fn delete_attachment(&self, connection_id: &Uuid) -> Result<()> {
        match fs::remove_file(self.attachment_path(connection_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_attachments(&self) -> Result<Vec<SessionAttachment>> {
        let mut attachments = Vec::new();
        let mut dir = fs::read_dir(self.dir.join(ATTACHMENT_DIR)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let body = fs::read(entry.path()).await?;
            match serde_json::from_slice::<SessionAttachment>(&body) {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => warn!("Ignoring attachment {}: {}", entry.path().display(), e),
            }
        }
        Ok(attachments)
    }
}

/// Provider rooted at a data directory
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl StorageProvider for FileStorage {
    async fn open(&self, room_id: &RoomId) -> Result<Arc<dyn RoomStorage>> {
        let room = FileRoomStorage::open(self.root.join(room_id.as_str())).await?;
        Ok(Arc::new(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::room_key::RoomKey;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("roomcast-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let root = scratch_dir();
        let provider = FileStorage::new(&root);
        let room_id = RoomKey::parse("general").unwrap().room_id();

        let store = provider.open(&room_id).await.unwrap();
        store.put("2024-01-01T00:00:00.001Z", "b").await.unwrap();
        store.put("2024-01-01T00:00:00.000Z", "a").await.unwrap();
        drop(store);

        let reopened = provider.open(&room_id).await.unwrap();
        assert_eq!(reopened.list(true, 100).await.unwrap(), vec!["b", "a"]);
        assert_eq!(reopened.list(false, 1).await.unwrap(), vec!["a"]);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_torn_lines_are_skipped() {
        let root = scratch_dir();
        fs::create_dir_all(&root).await.unwrap();
        fs::write(
            root.join(MESSAGE_LOG),
            format!("{}\n{{\"key\":\"k2\",\"val", r#"{"key":"k1","value":"v1"}"#),
        )
        .await
        .unwrap();

        let store = FileRoomStorage::open(root.clone()).await.unwrap();
        assert_eq!(store.list(true, 10).await.unwrap(), vec!["v1"]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_append_after_torn_write_is_kept() {
        let root = scratch_dir();
        let store = FileRoomStorage::open(root.clone()).await.unwrap();
        store.put("k1", "v1").await.unwrap();

        // a crashed writer left half a record without a newline
        let mut file = OpenOptions::new()
            .append(true)
            .open(root.join(MESSAGE_LOG))
            .await
            .unwrap();
        file.write_all(br#"{"key":"k2","val"#).await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        store.put("k3", "v3").await.unwrap();
        assert_eq!(store.list(false, 10).await.unwrap(), vec!["v1", "v3"]);

        let reopened = FileRoomStorage::open(root.clone()).await.unwrap();
        assert_eq!(reopened.list(false, 10).await.unwrap(), vec!["v1", "v3"]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_rewritten_key_reads_latest_value() {
        let root = scratch_dir();
        let store = FileRoomStorage::open(root.clone()).await.unwrap();
        store.put("a", "first").await.unwrap();
        store.put("b", "other").await.unwrap();
        store.put("a", "second").await.unwrap();
        assert_eq!(store.list(false, 10).await.unwrap(), vec!["second", "other"]);

        let reopened = FileRoomStorage::open(root.clone()).await.unwrap();
        assert_eq!(reopened.list(true, 1).await.unwrap(), vec!["other"]);
        assert_eq!(reopened.list(false, 1).await.unwrap(), vec!["second"]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_tail_read_from_long_log() {
        let root = scratch_dir();
        let store = FileRoomStorage::open(root.clone()).await.unwrap();
        for i in 0..500 {
            store
                .put(&format!("{:05}", i), &format!("value with \"quotes\" {}", i))
                .await
                .unwrap();
        }
        drop(store);

        let reopened = FileRoomStorage::open(root.clone()).await.unwrap();
        let tail = reopened.list(true, 3).await.unwrap();
        assert_eq!(
            tail,
            vec![
                "value with \"quotes\" 499",
                "value with \"quotes\" 498",
                "value with \"quotes\" 497"
            ]
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_attachment_files() {
        let root = scratch_dir();
        let store = FileRoomStorage::open(root.clone()).await.unwrap();
        let attachment = SessionAttachment {
            connection_id: Uuid::new_v4(),
            limiter_identity: "10.0.0.9".to_string(),
            name: Some("alice".to_string()),
        };

        store.put_attachment(&attachment).await.unwrap();
        assert_eq!(store.list_attachments().await.unwrap(), vec![attachment.clone()]);

        store.delete_attachment(&attachment.connection_id).await.unwrap();
        // deleting twice is fine
        store.delete_attachment(&attachment.connection_id).await.unwrap();
        assert!(store.list_attachments().await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(root);
    }
}

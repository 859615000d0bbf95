//! Storage mechanisms for persisting room history

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use traits::{RoomStorage, SessionAttachment, StorageProvider};

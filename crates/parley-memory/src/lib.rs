pub mod db;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use error::{MemoryError, Result};
pub use manager::MemoryManager;
pub use store::{MessageStore, SqliteMessageStore};
pub use types::{ContextBlob, NewMessage, StoredMessage, Summarizer};

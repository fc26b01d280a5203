//! In-memory file store
//!
//! Holds the contents of recently discovered files and decides which of them
//! is advertised as the latest and which are due for eviction.

pub mod file_store;
pub mod record;

pub use file_store::{FileStore, RetentionPolicy};
pub use record::{NameRule, MAX_NAME_LENGTH};

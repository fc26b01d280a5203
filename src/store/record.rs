//! File records and name acceptance

use std::time::{Duration, Instant};

/// Hard upper bound on a name: the wire format carries its length in one byte
pub const MAX_NAME_LENGTH: usize = 255;

/// Store error types
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Name is empty")]
    EmptyName,

    #[error("Name too long ({0} bytes)")]
    NameTooLong(usize),

    #[error("Name '{name}' does not end with '{suffix}'")]
    WrongSuffix { name: String, suffix: String },

    #[error("Content too large ({0} bytes)")]
    ContentTooLarge(usize),
}

/// Rule deciding which file names the store accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRule {
    suffix: String,
    max_len: usize,
}

impl NameRule {
    /// Create a rule; `max_len` is clamped to [`MAX_NAME_LENGTH`]
    pub fn new(suffix: impl Into<String>, max_len: usize) -> Self {
        Self {
            suffix: suffix.into(),
            max_len: max_len.min(MAX_NAME_LENGTH),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Check a name against the rule
    pub fn check(&self, name: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if name.len() > self.max_len {
            return Err(StoreError::NameTooLong(name.len()));
        }
        if !name.ends_with(&self.suffix) {
            return Err(StoreError::WrongSuffix {
                name: name.to_string(),
                suffix: self.suffix.clone(),
            });
        }
        Ok(())
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.check(name).is_ok()
    }
}

impl Default for NameRule {
    fn default() -> Self {
        Self::new(".jpg", MAX_NAME_LENGTH)
    }
}

/// Snapshot of one discovered file
///
/// Content and size are fixed at construction, so a record obtained from the
/// store can be read without holding the store's lock.
#[derive(Debug)]
pub struct FileRecord {
    name: String,
    size: u32,
    content: Vec<u8>,
    discovered_at: Instant,
}

impl FileRecord {
    pub fn new(name: String, content: Vec<u8>, discovered_at: Instant) -> Result<Self, StoreError> {
        let size =
            u32::try_from(content.len()).map_err(|_| StoreError::ContentTooLarge(content.len()))?;
        Ok(Self {
            name,
            size,
            content,
            discovered_at,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Age relative to `now`; zero if `now` precedes discovery
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.discovered_at)
    }

    /// Bytes `[start, end)` if the range is non-empty and within the content
    pub fn range(&self, start: u32, end: u32) -> Option<&[u8]> {
        if end <= start || end > self.size {
            return None;
        }
        self.content.get(start as usize..end as usize)
    }
}

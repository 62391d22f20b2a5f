//! NFC tag transport contract.
//!
//! The reader hardware is a black box: it reports whether it can be used,
//! yields the raw bytes of a tapped tag and writes bytes back. Turning
//! those bytes into a credential is the wallet's job.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Whether the reader can be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagAvailability {
    Unsupported,
    PermissionDenied,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("this device has no NFC reader")]
    Unsupported,

    #[error("NFC permission denied")]
    PermissionDenied,

    #[error("no card was tapped")]
    NoTag,

    #[error("tag contents are not text")]
    NotText,

    #[error("reader error: {0}")]
    Io(String),
}

impl TagAvailability {
    /// `Ok` only for [`TagAvailability::Available`].
    pub fn require(self) -> Result<(), TagError> {
        match self {
            TagAvailability::Available => Ok(()),
            TagAvailability::Unsupported => Err(TagError::Unsupported),
            TagAvailability::PermissionDenied => Err(TagError::PermissionDenied),
        }
    }
}

#[async_trait]
pub trait TagTransport: Send + Sync {
    async fn availability(&self) -> TagAvailability;

    /// Raw bytes of the next tapped tag.
    async fn read(&self) -> Result<Vec<u8>, TagError>;

    async fn write(&self, payload: &[u8]) -> Result<(), TagError>;
}

/// Tag bytes as the UTF-8 text the card payload is stored as. Trailing NUL
/// padding left by some tags is dropped.
pub fn payload_text(bytes: &[u8]) -> Result<String, TagError> {
    let text = std::str::from_utf8(bytes).map_err(|_| TagError::NotText)?;
    Ok(text.trim_end_matches('\0').to_string())
}

/// A reader holding one virtual tag.
#[derive(Debug)]
pub struct MemoryTag {
    availability: TagAvailability,
    contents: Mutex<Option<Vec<u8>>>,
}

impl Default for MemoryTag {
    fn default() -> Self {
        Self::new(TagAvailability::Available)
    }
}

impl MemoryTag {
    pub fn new(availability: TagAvailability) -> Self {
        Self {
            availability,
            contents: Mutex::new(None),
        }
    }

    pub fn with_contents(contents: impl Into<Vec<u8>>) -> Self {
        let tag = Self::default();
        *tag.contents.lock() = Some(contents.into());
        tag
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.contents.lock().clone()
    }
}

#[async_trait]
impl TagTransport for MemoryTag {
    async fn availability(&self) -> TagAvailability {
        self.availability
    }

    async fn read(&self) -> Result<Vec<u8>, TagError> {
        self.availability.require()?;
        self.contents.lock().clone().ok_or(TagError::NoTag)
    }

    async fn write(&self, payload: &[u8]) -> Result<(), TagError> {
        self.availability.require()?;
        *self.contents.lock() = Some(payload.to_vec());
        Ok(())
    }
}

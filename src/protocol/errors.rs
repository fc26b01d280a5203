//! Protocol Error Types
//!
//! Reasons a datagram could not be decoded or a response could not be built.
//! None of these are ever reported back to the peer.

/// Wire protocol error types
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty datagram")]
    Empty,

    #[error("Unknown tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("Truncated datagram: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("File name is not valid UTF-8")]
    InvalidName,

    #[error("File name too long ({0} bytes)")]
    NameTooLong(usize),

    #[error("Datagram too large ({0} bytes)")]
    TooLarge(usize),
}

impl ProtocolError {
    /// Whether the error was caused by the received bytes rather than by
    /// the response we tried to build
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            ProtocolError::Empty
                | ProtocolError::UnknownTag(_)
                | ProtocolError::Truncated { .. }
                | ProtocolError::InvalidName
        )
    }

    /// Create a Truncated error when `got` is short of `needed`
    pub fn check_len(needed: usize, got: usize) -> Result<(), Self> {
        if got < needed {
            Err(ProtocolError::Truncated { needed, got })
        } else {
            Ok(())
        }
    }
}

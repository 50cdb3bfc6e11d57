//! Error types for protocol operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Illegal system ID (0)")]
    IllegalSystemId,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("TIE element does not match TIE type {expected}")]
    ElementTypeMismatch { expected: String },

    #[error("Invalid level: {level} (max: {max})")]
    InvalidLevel { level: u8, max: u8 },

    #[error("Unsupported protocol version: {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u16 },

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

impl ProtocolError {
    /// True for errors that invalidate a single received message only
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::IllegalSystemId
                | ProtocolError::MalformedPayload(_)
                | ProtocolError::ElementTypeMismatch { .. }
                | ProtocolError::InvalidLevel { .. }
                | ProtocolError::UnsupportedVersion { .. }
        )
    }
}

//! Flooding error types

use crate::LinkId;
use rift_protocol::{ProtocolError, SystemId};
use rift_tiedb::TieDbError;
use thiserror::Error;

/// Flooding-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FloodingError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("TIE database error: {0}")]
    TieDb(#[from] TieDbError),

    #[error("Packet from {actual} received on link to {expected}")]
    UnexpectedSender { expected: SystemId, actual: SystemId },

    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    #[error("Link already exists: {0}")]
    LinkExists(LinkId),

    #[error("Link {0} is shut down")]
    LinkClosed(LinkId),
}

impl FloodingError {
    /// Whether the error concerns a single received packet only
    pub fn is_packet_local(&self) -> bool {
        match self {
            FloodingError::Protocol(_) | FloodingError::UnexpectedSender { .. } => true,
            FloodingError::TieDb(TieDbError::Protocol(_)) => true,
            _ => false,
        }
    }
}

/// Result type for flooding operations
pub type Result<T> = std::result::Result<T, FloodingError>;

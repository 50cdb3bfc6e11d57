//! TIE database error types

use rift_protocol::{ProtocolError, TieId};
use thiserror::Error;

/// TIE database errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TieDbError {
    #[error("Unknown TIE ID: {0}")]
    UnknownTieId(TieId),

    #[error("TIE {0} is not originated by this node")]
    NotLocallyOriginated(TieId),

    #[error("Sequence number space exhausted for TIE {0}")]
    SequenceExhausted(TieId),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type for TIE database operations
pub type Result<T> = std::result::Result<T, TieDbError>;

use thiserror::Error;

use crate::cryptography::CryptoError;
use crate::pake::PakeError;
use crate::protocol::{error_code, ProtocolError};

/// Classified failures surfaced by the public client interface.
///
/// Every error propagates up unchanged; the core never retries.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to connect to relay: {0}")]
    Connect(#[source] std::io::Error),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("room not found")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("code phrase mismatch")]
    CodeMismatch,

    #[error("PAKE key exchange failed")]
    PakeFailed,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("peer closed the transfer")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Maps a relay-reported error code to the matching variant.
    pub fn from_relay_code(code: &str, message: String) -> Self {
        match code {
            error_code::ROOM_NOT_FOUND => TransferError::RoomNotFound,
            error_code::ROOM_FULL => TransferError::RoomFull,
            error_code::CODE_MISMATCH => TransferError::CodeMismatch,
            error_code::PAKE_FAILED => TransferError::PakeFailed,
            error_code::TIMEOUT => TransferError::Timeout,
            _ => TransferError::TransferFailed(message),
        }
    }
}

impl From<PakeError> for TransferError {
    fn from(_: PakeError) -> Self {
        TransferError::PakeFailed
    }
}

impl From<ProtocolError> for TransferError {
    fn from(err: ProtocolError) -> Self {
        TransferError::ProtocolViolation(err.to_string())
    }
}

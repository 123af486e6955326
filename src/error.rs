//! Error types for the CZDB engine.

use thiserror::Error;

use crate::byte_util::OutOfBounds;
use crate::decrypt::DecryptError;

#[derive(Error, Debug)]
pub enum CzdbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decryption error: {0}")]
    Decrypt(#[from] DecryptError),

    /// The client id inside the encrypted license does not match the clear header.
    #[error("Client ID mismatch: header {header}, license {decrypted}")]
    ClientIdMismatch { header: u32, decrypted: u32 },

    /// Expiration date (YYMMDD) is before today (YYMMDD).
    #[error("Database expired on {expiration:06}, today is {today:06}")]
    Expired { expiration: u32, today: u32 },

    #[error("Corrupt database: {0}")]
    CorruptDatabase(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Short read at position {position}: wanted {expected} bytes, got {read}")]
    ShortRead {
        position: u64,
        expected: usize,
        read: usize,
    },

    #[error("Searcher is closed")]
    Closed,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Unknown search mode: {0}")]
    InvalidSearchMode(String),
}

/// Reads past the end of a database structure mean the file is corrupt.
impl From<OutOfBounds> for CzdbError {
    fn from(e: OutOfBounds) -> Self {
        CzdbError::CorruptDatabase(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CzdbError>;

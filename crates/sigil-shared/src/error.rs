use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Invalid UID length: expected 32 bytes, got {0}")]
    InvalidUidLength(usize),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Unknown group v2 category: {0}")]
    UnknownCategory(String),

    #[error("Empty cryptographic identity")]
    EmptyIdentity,
}

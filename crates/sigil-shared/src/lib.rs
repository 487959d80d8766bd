//! # sigil-shared
//!
//! Value types shared by every part of the identity engine: cryptographic
//! identities, 32-byte UIDs, group v2 identifiers and device capabilities.

pub mod capabilities;
pub mod constants;
pub mod error;
pub mod types;

pub use capabilities::Capability;
pub use error::TypeError;
pub use types::{CryptoId, GroupV2Category, GroupV2Identifier, Uid};

//! # sigil-directory
//!
//! Persistent identity directory of the messenger: owned identities and
//! their devices, contacts and contact devices, identity and group details
//! with their photos, contact groups with members and pending members, and
//! the schedule of server-side user data to refresh.
//!
//! Everything lives in one SQLite database. Reads go through a [`Reader`];
//! every mutation goes through a [`DirectoryTx`], which collects the change
//! notifications of the transaction and delivers them, coalesced, to the
//! attached [`NotificationSink`] once SQLite has committed.

pub mod backup;
pub mod config;
pub mod database;
pub mod events;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod photos;
pub mod server_user_data;
pub mod snapshot;
pub mod transaction;

mod changes;
mod contact_devices;
mod contacts;
mod error;
mod group_details;
mod groups;
mod identity_details;
mod owned_devices;
mod owned_identities;
mod pending_members;

#[cfg(test)]
mod test_support;

pub use backup::{DirectoryBackup, RestoreStats};
pub use config::DirectoryConfig;
pub use database::{Directory, Reader};
pub use error::{DirectoryError, Result};
pub use events::{BroadcastSink, IdentityEvent, NotificationSink};
pub use models::*;
pub use photos::PhotoStore;
pub use server_user_data::UserDataSync;
pub use snapshot::OwnedIdentitySnapshotNode;
pub use transaction::{CommitReport, DirectoryTx, Effect};

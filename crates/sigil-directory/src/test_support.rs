use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use sigil_shared::{CryptoId, Uid};

use crate::database::Directory;
use crate::events::{IdentityEvent, NotificationSink, SinkError, EVENT_BACKUPABLE_CONTENT_CHANGED};
use crate::models::{ContactKey, DetailsInput, GroupKey, OwnedIdentityKey};
use crate::transaction::CommitReport;

pub const BACKUPABLE: &str = EVENT_BACKUPABLE_CONTENT_CHANGED;

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<IdentityEvent>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn post(&self, event: &IdentityEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn recording_directory() -> (Directory, Arc<RecordingSink>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let dir = Directory::open_at(&tmp.path().join("directory.db"), &tmp.path().join("photos"))
        .unwrap()
        .with_sink(sink.clone());
    (dir, sink, tmp)
}

pub fn test_directory() -> (Directory, tempfile::TempDir) {
    let (dir, _sink, tmp) = recording_directory();
    (dir, tmp)
}

pub fn crypto_id(n: u8) -> CryptoId {
    CryptoId::from_bytes(vec![n; 32]).unwrap()
}

pub fn uid(n: u8) -> Uid {
    Uid([n; 32])
}

pub fn details(version: i64, serialized: &str) -> DetailsInput {
    DetailsInput::new(version, serialized)
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap()
}

pub fn event_names(report: &CommitReport) -> Vec<&'static str> {
    report.events.iter().map(|e| e.name()).collect()
}

/// Owned identity `crypto_id(n)` whose current device is `uid(100 + n)`.
pub fn create_owned(dir: &mut Directory, n: u8) -> OwnedIdentityKey {
    let mut tx = dir.transaction().unwrap();
    let key = tx
        .create_owned_identity(&crypto_id(n), uid(100 + n), None, &details(0, "owned"))
        .unwrap();
    tx.commit().unwrap();
    key
}

/// Owned identity 1 with a single directly trusted contact, "bob" (2).
pub fn owned_with_contact(dir: &mut Directory) -> (OwnedIdentityKey, ContactKey) {
    let owned = create_owned(dir, 1);
    let mut tx = dir.transaction().unwrap();
    let contact = tx
        .add_contact(owned, &crypto_id(2), &details(0, "bob"), "direct")
        .unwrap();
    tx.commit().unwrap();
    (owned, contact)
}

pub fn create_owned_group(dir: &mut Directory, owned: OwnedIdentityKey, n: u8) -> GroupKey {
    let mut tx = dir.transaction().unwrap();
    let group = tx
        .create_owned_group(owned, uid(n), &details(0, "group"), None, &[])
        .unwrap();
    tx.commit().unwrap();
    group
}

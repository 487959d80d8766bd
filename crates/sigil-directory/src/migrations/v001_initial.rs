//! v001 -- Initial schema creation.
//!
//! Creates the identity graph: owned identities and their devices, contacts
//! and their devices, identity details, groups with their details, members
//! and pending members.
//!
//! Relationship columns are nullable: a two-phase restore inserts bare rows
//! first and links them afterwards.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Owned identities
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS owned_identities (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    crypto_identity BLOB NOT NULL UNIQUE,
    is_active       INTEGER NOT NULL DEFAULT 1
);

-- ----------------------------------------------------------------
-- Owned devices (exactly one of current_of / remote_of is set)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS owned_devices (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    uid                 BLOB NOT NULL,                -- 32 bytes
    current_of          INTEGER,                      -- FK -> owned_identities(id)
    remote_of           INTEGER,                      -- FK -> owned_identities(id)
    name                TEXT,
    capabilities        TEXT,                         -- sorted, '|' separated
    expiration          TEXT,                         -- RFC-3339
    latest_registration TEXT,                         -- RFC-3339

    FOREIGN KEY (current_of) REFERENCES owned_identities(id) ON DELETE CASCADE,
    FOREIGN KEY (remote_of)  REFERENCES owned_identities(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_owned_devices_current ON owned_devices(current_of);
CREATE INDEX IF NOT EXISTS idx_owned_devices_remote  ON owned_devices(remote_of);

-- ----------------------------------------------------------------
-- Contact identities
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contact_identities (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    crypto_identity       BLOB NOT NULL,
    owned_identity_id     INTEGER,                    -- FK -> owned_identities(id)
    trust_level           TEXT NOT NULL,
    is_revoked            INTEGER NOT NULL DEFAULT 0,
    is_forcefully_trusted INTEGER NOT NULL DEFAULT 0,
    is_one_to_one         INTEGER,

    FOREIGN KEY (owned_identity_id) REFERENCES owned_identities(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_identity_owner
    ON contact_identities(crypto_identity, owned_identity_id);

-- ----------------------------------------------------------------
-- Contact devices
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contact_devices (
    id                           INTEGER PRIMARY KEY AUTOINCREMENT,
    uid                          BLOB NOT NULL,
    contact_id                   INTEGER,             -- FK -> contact_identities(id)
    capabilities                 TEXT,
    latest_channel_creation_ping TEXT,

    FOREIGN KEY (contact_id) REFERENCES contact_identities(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_contact_devices_uid_contact
    ON contact_devices(uid, contact_id);

-- ----------------------------------------------------------------
-- Identity details (owned published, contact published / trusted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS identity_details (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    kind                    TEXT NOT NULL,
    owned_identity_id       INTEGER,
    contact_id              INTEGER,
    version                 INTEGER NOT NULL,
    serialized_core_details TEXT NOT NULL,
    photo_filename          TEXT,                     -- relative to the photo directory
    photo_server_key        BLOB,
    photo_server_label      BLOB,

    FOREIGN KEY (owned_identity_id) REFERENCES owned_identities(id) ON DELETE CASCADE,
    FOREIGN KEY (contact_id) REFERENCES contact_identities(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_identity_details_owned
    ON identity_details(kind, owned_identity_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_identity_details_contact
    ON identity_details(kind, contact_id);

-- ----------------------------------------------------------------
-- Group details (latest / published / trusted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_details (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    kind                    TEXT NOT NULL,
    version                 INTEGER NOT NULL,
    serialized_core_details TEXT NOT NULL,
    photo_filename          TEXT,
    photo_server_key        BLOB,
    photo_server_label      BLOB
);

-- ----------------------------------------------------------------
-- Groups (owned / joined)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contact_groups (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    kind                  TEXT NOT NULL,              -- 'owned' | 'joined'
    group_uid             BLOB NOT NULL,
    owned_identity_id     INTEGER,                    -- FK -> owned_identities(id)
    group_owner_id        INTEGER,                    -- FK -> contact_identities(id), joined only
    group_members_version INTEGER NOT NULL DEFAULT 0,
    published_details_id  INTEGER,
    latest_details_id     INTEGER,                    -- owned only
    trusted_details_id    INTEGER,                    -- joined only

    FOREIGN KEY (owned_identity_id)    REFERENCES owned_identities(id) ON DELETE CASCADE,
    FOREIGN KEY (group_owner_id)       REFERENCES contact_identities(id) ON DELETE CASCADE,
    FOREIGN KEY (published_details_id) REFERENCES group_details(id),
    FOREIGN KEY (latest_details_id)    REFERENCES group_details(id),
    FOREIGN KEY (trusted_details_id)   REFERENCES group_details(id)
);

CREATE INDEX IF NOT EXISTS idx_contact_groups_owner ON contact_groups(owned_identity_id, group_uid);

CREATE TABLE IF NOT EXISTS group_members (
    group_id   INTEGER NOT NULL,
    contact_id INTEGER NOT NULL,

    PRIMARY KEY (group_id, contact_id),
    FOREIGN KEY (group_id)   REFERENCES contact_groups(id) ON DELETE CASCADE,
    FOREIGN KEY (contact_id) REFERENCES contact_identities(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Pending group members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_group_members (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id           INTEGER,                       -- FK -> contact_groups(id)
    crypto_identity    BLOB NOT NULL,
    serialized_details TEXT NOT NULL,
    declined           INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (group_id) REFERENCES contact_groups(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_members_identity_group
    ON pending_group_members(crypto_identity, group_id);
"#;

/// Apply the v001 migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

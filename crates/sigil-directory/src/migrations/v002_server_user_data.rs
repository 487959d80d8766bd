//! v002 -- Server user data.
//!
//! Tracks assets uploaded to the server (profile and group photos) together
//! with the date they must next be refreshed.

use rusqlite::Connection;

/// SQL executed when upgrading from version 1 to version 2.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS server_user_data (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    kind                TEXT NOT NULL,                -- 'identity' | 'group' | 'group_v2'
    owned_identity      BLOB NOT NULL,                -- raw crypto identity, not a FK
    label               BLOB NOT NULL,                -- 32 bytes
    next_refresh        TEXT NOT NULL,                -- RFC-3339
    group_uid           BLOB,                         -- 'group' only
    group_v2_uid        BLOB,                         -- 'group_v2' only
    group_v2_server_url TEXT,
    group_v2_category   TEXT
);

-- Labels are unique per owner, except for group v2 assets which are
-- disambiguated by the full group identifier.
CREATE UNIQUE INDEX IF NOT EXISTS idx_server_user_data_label
    ON server_user_data(owned_identity, label)
    WHERE kind <> 'group_v2';

CREATE UNIQUE INDEX IF NOT EXISTS idx_server_user_data_group_v2
    ON server_user_data(owned_identity, label, group_v2_uid, group_v2_server_url, group_v2_category)
    WHERE kind = 'group_v2';
"#;

/// Apply the v002 migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

/// Application name
pub const APP_NAME: &str = "sigil";

/// Size of a UID in bytes (device UIDs, group UIDs, server labels)
pub const UID_SIZE: usize = 32;

/// Separator used when a capability set is flattened to a single string
pub const CAPABILITY_SEPARATOR: char = '|';

/// Default interval between two refreshes of a server-hosted asset, in days
pub const DEFAULT_USER_DATA_REFRESH_DAYS: i64 = 7;

/// Version written into every backup produced by this engine
pub const BACKUP_FORMAT_VERSION: u32 = 1;

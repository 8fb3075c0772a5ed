//! redb table definitions for the Confgate store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types, or raw UTF-8 for the path and meta tables).

use redb::TableDefinition;

/// Configuration bundles keyed by `{configuration_id}`.
pub const CONFIGURATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("configurations");

/// Local filesystem paths of downloaded blobs, keyed by `{blob_id}`.
pub const BLOBS_AVAILABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs_available");

/// Singleton bookkeeping values (last upstream sequence token).
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

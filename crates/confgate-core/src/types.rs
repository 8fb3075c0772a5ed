//! Domain types for Confgate.
//!
//! These types represent persisted configuration bundles and the readiness
//! snapshots computed from them. All types are serializable to/from JSON
//! for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a configuration bundle.
pub type ConfigurationId = String;

/// Unique identifier for a payload blob.
pub type BlobId = String;

/// Monotonically increasing readiness version. Rendered as a decimal
/// string on the wire.
pub type Version = u64;

// ── Configuration ──────────────────────────────────────────────────

/// A deployable configuration bundle. Immutable once persisted; the
/// readiness machinery only reads these records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    pub id: ConfigurationId,
    pub org_id: String,
    pub env_id: String,
    /// Blob holding the bundle definition. Always required.
    pub bean_blob_id: BlobId,
    /// Blob holding auxiliary resources. Empty when the bundle has none.
    pub resource_blob_id: BlobId,
    /// Bundle category, e.g. "CONFIGURATION". Exact-match filterable.
    pub config_type: String,
    pub name: String,
    pub revision: String,
    /// Filesystem path the bundle deploys under.
    pub path: String,
    /// Creation timestamp as recorded upstream (legacy renderings allowed,
    /// see [`crate::timefmt`]).
    pub created: String,
    pub created_by: String,
    pub updated: String,
    pub updated_by: String,
}

impl Configuration {
    /// Whether this bundle references an auxiliary resource blob at all.
    pub fn has_resource_blob(&self) -> bool {
        !self.resource_blob_id.is_empty()
    }
}

// ── ReadySet ───────────────────────────────────────────────────────

/// A readiness snapshot: the configurations deployable right now, bound to
/// the version that produced them. Snapshots are immutable; a newer one
/// supersedes, never mutates, an older one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadySet {
    pub version: Version,
    pub configurations: Vec<Configuration>,
}

impl ReadySet {
    /// An empty snapshot at the given version.
    pub fn empty(version: Version) -> Self {
        Self {
            version,
            configurations: Vec::new(),
        }
    }

    /// Wire rendering of the version token.
    pub fn version_token(&self) -> String {
        self.version.to_string()
    }
}

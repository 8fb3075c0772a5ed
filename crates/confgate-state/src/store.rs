//! ConfigStore contract and the redb-backed implementation.
//!
//! `ConfigStore` is the read-mostly contract the readiness machinery
//! consumes; `RedbStore` implements it and adds the write paths the
//! upstream sync pipeline uses to ingest configuration bundles. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use confgate_core::{Configuration, resolver};

use crate::error::{StoreError, StoreResult};
use crate::tables::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

const LAST_SEQUENCE_KEY: &str = "last_sequence";

/// Storage contract consumed by the readiness machinery.
///
/// `ready_configurations` and `unready_blob_ids` must each evaluate over a
/// consistent (configurations, available blobs) pair. Lookups distinguish
/// "unmapped" (`Ok(None)`) from storage failure (`Err`); callers must not
/// conflate the two.
pub trait ConfigStore: Send + Sync {
    /// Configurations whose blobs are all available locally, optionally
    /// restricted to one bundle type, ordered by id.
    fn ready_configurations(&self, type_filter: Option<&str>) -> StoreResult<Vec<Configuration>>;

    /// Referenced blob ids not yet downloaded. Empty references excluded.
    fn unready_blob_ids(&self) -> StoreResult<BTreeSet<String>>;

    /// Point lookup of a configuration bundle.
    fn configuration_by_id(&self, id: &str) -> StoreResult<Option<Configuration>>;

    /// Record where a downloaded blob landed. Idempotent: the first write
    /// wins and later calls for the same blob id succeed without altering
    /// the mapping. Returns `true` when the blob was newly recorded.
    /// Empty blob ids are rejected as invalid input.
    fn record_blob_local_path(&self, blob_id: &str, local_path: &str) -> StoreResult<bool>;

    /// Local path of a downloaded blob, `None` when not yet available.
    fn blob_local_path(&self, blob_id: &str) -> StoreResult<Option<String>>;

    /// The last upstream sequence token persisted by the sync pipeline.
    fn last_sequence_token(&self) -> StoreResult<Option<String>>;
}

/// Thread-safe configuration store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "configuration store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory configuration store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CONFIGURATIONS).map_err(map_err!(Table))?;
        txn.open_table(BLOBS_AVAILABLE).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Ingestion (sync pipeline) ──────────────────────────────────

    /// Insert or update a configuration bundle.
    pub fn put_configuration(&self, config: &Configuration) -> StoreResult<()> {
        if config.id.is_empty() {
            return Err(StoreError::InvalidInput(
                "configuration id must not be empty".to_string(),
            ));
        }
        let value = serde_json::to_vec(config).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONFIGURATIONS).map_err(map_err!(Table))?;
            table
                .insert(config.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %config.id, "configuration stored");
        Ok(())
    }

    /// Delete a configuration bundle. Returns true if it existed.
    pub fn delete_configuration(&self, id: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CONFIGURATIONS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "configuration deleted");
        Ok(existed)
    }

    /// Persist the upstream sequence token the sync pipeline reached.
    pub fn set_last_sequence_token(&self, token: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(META).map_err(map_err!(Table))?;
            table
                .insert(LAST_SEQUENCE_KEY, token.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read all configurations and the available-blob set in one read
    /// transaction, so readiness always evaluates over a consistent pair.
    fn read_world(&self) -> StoreResult<(Vec<Configuration>, BTreeSet<String>)> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;

        let configs_table = txn.open_table(CONFIGURATIONS).map_err(map_err!(Table))?;
        let mut configs = Vec::new();
        for entry in configs_table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let config: Configuration =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            configs.push(config);
        }

        let blobs_table = txn.open_table(BLOBS_AVAILABLE).map_err(map_err!(Table))?;
        let mut available = BTreeSet::new();
        for entry in blobs_table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            available.insert(key.value().to_string());
        }

        Ok((configs, available))
    }
}

impl ConfigStore for RedbStore {
    fn ready_configurations(&self, type_filter: Option<&str>) -> StoreResult<Vec<Configuration>> {
        let (configs, available) = self.read_world()?;
        Ok(resolver::compute_ready(&configs, &available, type_filter))
    }

    fn unready_blob_ids(&self) -> StoreResult<BTreeSet<String>> {
        let (configs, available) = self.read_world()?;
        Ok(resolver::compute_unready(&configs, &available))
    }

    fn configuration_by_id(&self, id: &str) -> StoreResult<Option<Configuration>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONFIGURATIONS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let config: Configuration =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    fn record_blob_local_path(&self, blob_id: &str, local_path: &str) -> StoreResult<bool> {
        if blob_id.is_empty() {
            return Err(StoreError::InvalidInput(
                "blob id must not be empty".to_string(),
            ));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let recorded;
        {
            let mut table = txn.open_table(BLOBS_AVAILABLE).map_err(map_err!(Table))?;
            // First writer wins; a repeat record is a successful no-op.
            let already = table.get(blob_id).map_err(map_err!(Read))?.is_some();
            if already {
                recorded = false;
            } else {
                table
                    .insert(blob_id, local_path.as_bytes())
                    .map_err(map_err!(Write))?;
                recorded = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if recorded {
            debug!(%blob_id, %local_path, "blob recorded as available");
        }
        Ok(recorded)
    }

    fn blob_local_path(&self, blob_id: &str) -> StoreResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS_AVAILABLE).map_err(map_err!(Table))?;
        match table.get(blob_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let path =
                    String::from_utf8(guard.value().to_vec()).map_err(map_err!(Deserialize))?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    fn last_sequence_token(&self) -> StoreResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(META).map_err(map_err!(Table))?;
        match table.get(LAST_SEQUENCE_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let token =
                    String::from_utf8(guard.value().to_vec()).map_err(map_err!(Deserialize))?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }
}

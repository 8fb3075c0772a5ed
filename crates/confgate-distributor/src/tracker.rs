//! Blob fetch tracking.
//!
//! The download pipeline reports completed blobs here. Recording is
//! idempotent at the store level; only a genuinely new blob nudges the
//! change distributor, so repeated reports of the same download never
//! burn a readiness version.

use std::sync::Arc;

use tracing::debug;

use confgate_state::{ConfigStore, StoreResult};

use crate::distributor::DistributorHandle;

/// Records where downloaded blobs landed and signals the change
/// distributor when a blob becomes newly available.
#[derive(Clone)]
pub struct FetchTracker {
    store: Arc<dyn ConfigStore>,
    distributor: DistributorHandle,
}

impl FetchTracker {
    pub fn new(store: Arc<dyn ConfigStore>, distributor: DistributorHandle) -> Self {
        Self { store, distributor }
    }

    /// Record a completed download. The first record for a blob id wins;
    /// repeats succeed without rewriting the mapping or waking the
    /// distributor.
    pub async fn record_available(&self, blob_id: &str, local_path: &str) -> StoreResult<()> {
        let newly_recorded = self.store.record_blob_local_path(blob_id, local_path)?;
        if newly_recorded {
            debug!(%blob_id, "blob available, signalling change");
            self.distributor.record_event().await;
        }
        Ok(())
    }

    /// Where a blob landed locally, `None` when not yet downloaded.
    /// A storage failure is an `Err`, distinct from the unmapped case.
    pub fn lookup(&self, blob_id: &str) -> StoreResult<Option<String>> {
        self.store.blob_local_path(blob_id)
    }
}

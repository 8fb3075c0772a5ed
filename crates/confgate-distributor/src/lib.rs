//! confgate-distributor — change distribution for Confgate.
//!
//! The change distributor is a single control loop that owns the
//! readiness version, the current snapshot, and the set of parked
//! long-poll waiters. Blob-arrival events are debounced (quiet window
//! plus a hard cap), each settled batch recomputes readiness off the
//! loop, and the resulting snapshot fans out to every parked waiter.
//!
//! [`FetchTracker`] is the ingestion seam: the download pipeline calls it
//! as blobs land, and it records the mapping and nudges the distributor.

pub mod distributor;
pub mod tracker;

pub use distributor::{
    ChangeDistributor, Delivery, DistributorClosed, DistributorConfig, DistributorHandle,
    RecomputeError, Waiter, WaiterId,
};
pub use tracker::FetchTracker;

//! confgate-state — embedded configuration store for Confgate.
//!
//! Backed by [redb](https://docs.rs/redb), persists configuration bundles,
//! the blob-id → local-path map filled in as downloads complete, and the
//! last upstream sequence token.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Consumers hold the store as `Arc<dyn ConfigStore>` (the read-side
//! contract); the concrete [`RedbStore`] additionally exposes the write
//! paths used by the upstream sync pipeline. `RedbStore` is `Clone` +
//! `Send` + `Sync` (backed by `Arc<Database>`) and can be shared across
//! async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use store::{ConfigStore, RedbStore};

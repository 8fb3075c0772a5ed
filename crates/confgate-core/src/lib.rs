//! confgate-core — domain types and pure logic for Confgate.
//!
//! Holds the configuration-bundle data model, the readiness resolver that
//! decides which bundles are fully deployable given the set of locally
//! available blobs, and timestamp normalization for the legacy renderings
//! found in persisted records.
//!
//! Everything in this crate is side-effect-free; storage and distribution
//! live in `confgate-state` and `confgate-distributor`.

pub mod resolver;
pub mod timefmt;
pub mod types;

pub use types::*;

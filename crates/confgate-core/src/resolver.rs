//! Readiness resolution.
//!
//! A configuration bundle is ready when its bean blob has been downloaded
//! and, if it references a resource blob, that blob has been downloaded
//! too. Both functions are pure over a consistent (configurations,
//! available blob ids) pair; callers are responsible for reading the pair
//! atomically.

use std::collections::BTreeSet;

use crate::types::Configuration;

/// Compute the configurations that are fully deployable, optionally
/// restricted to one bundle type (exact match). Results are ordered by id
/// so repeated calls over the same inputs are reproducible.
pub fn compute_ready(
    configs: &[Configuration],
    available: &BTreeSet<String>,
    type_filter: Option<&str>,
) -> Vec<Configuration> {
    let mut ready: Vec<Configuration> = configs
        .iter()
        .filter(|c| type_filter.is_none_or(|t| c.config_type == t))
        .filter(|c| is_ready(c, available))
        .cloned()
        .collect();
    ready.sort_by(|a, b| a.id.cmp(&b.id));
    ready
}

/// Compute the referenced blob ids still missing locally. Empty blob-id
/// references never count as missing; duplicates collapse under set
/// semantics.
pub fn compute_unready(
    configs: &[Configuration],
    available: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut missing = BTreeSet::new();
    for c in configs {
        if !c.bean_blob_id.is_empty() && !available.contains(&c.bean_blob_id) {
            missing.insert(c.bean_blob_id.clone());
        }
        if c.has_resource_blob() && !available.contains(&c.resource_blob_id) {
            missing.insert(c.resource_blob_id.clone());
        }
    }
    missing
}

fn is_ready(config: &Configuration, available: &BTreeSet<String>) -> bool {
    available.contains(&config.bean_blob_id)
        && (!config.has_resource_blob() || available.contains(&config.resource_blob_id))
}

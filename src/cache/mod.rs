//! Partitioned request/response cache for offline support.
//!
//! Responses are stored under named partitions (`static-<gen>`, `api-<gen>`,
//! `form-data`) keyed by request identity. Eviction is generational: on
//! activation every partition outside the expected set is dropped wholesale.
//! There is no per-key eviction.

mod storage;

pub use storage::{CacheStorage, SqliteStorage};

/// Transient partition for form drafts saved through the control channel.
pub const FORM_DATA_PARTITION: &str = "form-data";

/// Partition holding long-lived static resources for the given generation.
pub fn static_partition(generation: &str) -> String {
  format!("static-{}", generation)
}

/// Partition holding short-lived API responses for the given generation.
pub fn api_partition(generation: &str) -> String {
  format!("api-{}", generation)
}

/// The full set of partitions the current generation is allowed to keep.
pub fn expected_partitions(generation: &str) -> std::collections::BTreeSet<String> {
  [
    static_partition(generation),
    api_partition(generation),
    FORM_DATA_PARTITION.to_string(),
  ]
  .into_iter()
  .collect()
}

//! Tunables shared by the resolver and the node driver.

/// Default number of side-branch block bodies kept in memory.
pub const DEFAULT_SIDE_BLOCK_CACHE_CAPACITY: usize = 256;

/// Default depth below the best tip for which block nodes stay resident.
/// Deeper nodes are re-materialized from storage on demand.
pub const DEFAULT_NODE_RETENTION_DEPTH: u64 = 2016;

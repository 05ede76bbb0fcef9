//! Implementation limits.

/// Maximum size of a stored string, in bytes.
pub const MAX_STRING_SIZE: usize = 0x00FF_FFF8;

/// Maximum size of a stored binary value, in bytes.
pub const MAX_BINARY_SIZE: usize = 0x00FF_FFF8;

/// Number of rows a cluster holds before it splits.
pub const CLUSTER_NODE_SIZE: usize = 256;

/// Lower occupancy bound for clusters. A cluster that drops below this
/// after an erase is merged with a sibling or borrows rows from one;
/// only the sole cluster of a table may be smaller.
pub const CLUSTER_MIN_OCCUPANCY: usize = CLUSTER_NODE_SIZE / 4;

/// Maximum children per interior node of a cluster tree.
pub const CLUSTER_INNER_FANOUT: usize = 16;

/// Maximum depth of a cluster tree. With the fanout above this bounds
/// addressable rows far beyond the 63-bit key space.
pub const CLUSTER_MAX_DEPTH: usize = 20;

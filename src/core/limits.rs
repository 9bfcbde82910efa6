/*!
 * Allocator Limits and Defaults
 *
 * Default block manager parameters, grouped by the structure they size.
 * `BlockManagerConfig::default()` is built from these values.
 */

// =============================================================================
// BLOCK RECORD POOL
// =============================================================================

/// Block records created when the manager is constructed
pub const DEFAULT_POOL_INITIAL_RECORDS: usize = 64;

/// Hard cap on block records owned by one manager
pub const DEFAULT_POOL_MAX_RECORDS: usize = 1024;

/// Records added each time the pool list runs dry
pub const DEFAULT_POOL_INCREMENT: usize = 64;

// =============================================================================
// HEAP CHAIN
// =============================================================================

/// Size of the first heap requested through `grow_heap` (512KB)
pub const DEFAULT_HEAP_INITIAL_SIZE: usize = 512 * 1024;

/// Size of every subsequent heap (512KB)
pub const DEFAULT_HEAP_INCREMENT: usize = 512 * 1024;

/// Upper bound on the sum of all registered heap sizes (16MB)
pub const DEFAULT_HEAP_MAX_TOTAL: usize = 16 * 1024 * 1024;

/// Upper bound on registered heaps (32 x 512KB = 16MB)
pub const DEFAULT_HEAP_MAX_COUNT: usize = 32;

// =============================================================================
// BLOCK GEOMETRY
// =============================================================================

/// Block granularity (2KB), also the implicit minimum alignment
pub const DEFAULT_HEAP_GRANULARITY: usize = 0x0800;

/// Smallest fragment a split may leave behind (2KB)
pub const DEFAULT_MIN_BLOCK_SIZE: usize = 0x0800;

/// Alignment of scratch space blocks
pub const SCRATCH_SPACE_ALIGN: usize = 1024;

/// Most blocks a single batch allocation may request
pub const MAX_BATCH_BLOCKS: usize = 64;

// =============================================================================
// PRESSURE THRESHOLDS
// =============================================================================

/// Usage ratio reported as medium pressure
pub const PRESSURE_MEDIUM_RATIO: f64 = 0.60;

/// Usage ratio reported as high pressure
pub const PRESSURE_HIGH_RATIO: f64 = 0.80;

/// Usage ratio reported as critical pressure
pub const PRESSURE_CRITICAL_RATIO: f64 = 0.95;

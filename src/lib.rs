use once_cell::sync::Lazy;

pub mod config;
pub mod counter_position;
pub mod counters;
pub mod error;
pub mod many_to_one_queue;
pub mod memory;
pub(crate) mod node;
pub(crate) mod node_allocator;
pub mod position;

pub use config::CountersConfig;
pub use counter_position::CounterPosition;
pub use counters::{COUNTER_LENGTH, CounterReclaimer, CounterState, CountersManager, counter_offset};
pub use error::{CountersError, Result};
pub use many_to_one_queue::{ManyToOneLinkedQueue, Producer};
pub use memory::{AlignedBuffer, MappedRegion, MemoryRegion};
pub use position::{CLOSED_POSITION_VALUE, Position, ReadablePosition};

/// Alignment for cache lines (typically 64 bytes on modern CPUs)
pub(crate) static CACHE_LINE_SIZE: Lazy<usize> = Lazy::new(|| {
    // Try data cache first (most relevant for our use case)
    cache_size::cache_line_size(1, cache_size::CacheType::Data)
        // Fall back to unified cache if data cache info isn't available
        .or_else(|| cache_size::cache_line_size(1, cache_size::CacheType::Unified))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Data))
        // Layouts need a power of two, anything else is treated as undetected
        .filter(|size| size.is_power_of_two())
        .unwrap_or(64)
});

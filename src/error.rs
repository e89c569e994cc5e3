use thiserror::Error;

/// Errors that can occur when mapping or allocating counter slots.
#[derive(Error, Debug)]
pub enum CountersError {
    /// A construction argument was rejected (negative id, empty region, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested range does not fit inside the backing region.
    #[error("out of bounds: offset {offset} + length {length} exceeds capacity {capacity}")]
    OutOfBounds {
        /// Byte offset of the access.
        offset: usize,
        /// Number of bytes requested.
        length: usize,
        /// Size of the region in bytes.
        capacity: usize,
    },

    /// The address at `offset` is not aligned for the requested access.
    #[error("misaligned access: offset {offset} is not {alignment}-byte aligned")]
    Misaligned {
        /// Byte offset of the access.
        offset: usize,
        /// Alignment the access requires.
        alignment: usize,
    },

    /// Every counter slot is either allocated or still waiting out its reuse timeout.
    #[error("no counter slot available: capacity {capacity}")]
    CapacityExhausted {
        /// Number of slots managed.
        capacity: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Creating, sizing or mapping a backing file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for counter operations.
pub type Result<T> = std::result::Result<T, CountersError>;

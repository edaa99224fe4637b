//! # Memory Error Types
//!
//! Allocation failures are fatal by policy: they are reported through
//! [`AllocError`] and escalated by [`fatal`]. Pool access errors and
//! configuration errors are ordinary, recoverable results.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the arena, free lists and the size-class allocator.
///
/// Every variant describes an unrecoverable condition. The non-fatal entry
/// points (`try_*`) hand it back as a result so the caller decides where the
/// process dies; everything else routes it through [`fatal`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "allocation errors are unrecoverable and must not be ignored"]
pub enum AllocError {
    /// The arena has no room left to carve a fresh block for a size class.
    #[error(
        "size class {class_size} exhausted: requested {requested} bytes, arena at {used}/{capacity} bytes"
    )]
    ClassExhausted {
        /// Requested allocation size.
        requested: usize,
        /// Block size of the class that could not grow.
        class_size: usize,
        /// Arena bytes in use.
        used: usize,
        /// Arena capacity.
        capacity: usize,
    },

    /// A direct arena allocation did not fit.
    #[error("arena exhausted: requested {requested} bytes, arena at {used}/{capacity} bytes")]
    ArenaExhausted {
        /// Requested allocation size.
        requested: usize,
        /// Arena bytes in use.
        used: usize,
        /// Arena capacity.
        capacity: usize,
    },

    /// A free list was asked for a block while empty.
    #[error("free list is empty")]
    FreeListEmpty,

    /// The general heap refused an oversized request.
    #[error("heap allocation of {requested} bytes failed")]
    HeapExhausted {
        /// Requested allocation size.
        requested: usize,
    },

    /// A null pointer was handed back to a free list or the allocator.
    #[error("null pointer returned (size {size})")]
    NullPointer {
        /// Size the caller claimed for the block.
        size: usize,
    },
}

/// Errors raised when accessing pooled objects through handles.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The handle does not reference an object.
    #[error("null handle")]
    NullHandle,

    /// The object behind this handle was released through another copy.
    #[error("stale handle: generation {handle} but slot is at {slot}")]
    StaleHandle {
        /// Generation recorded in the handle.
        handle: u32,
        /// Current generation of the slot.
        slot: u32,
    },

    /// The object is being accessed and cannot be borrowed or released now.
    #[error("pooled object is already in use")]
    SlotBusy,
}

/// Errors raised while loading or validating allocator configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema.
    #[error("invalid allocator config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Arena capacity is zero.
    #[error("arena capacity must be greater than zero")]
    ZeroCapacity,

    /// No size classes were configured.
    #[error("at least one size class is required")]
    NoSizeClasses,

    /// Size classes are not strictly ascending.
    #[error("size classes must be strictly ascending: {previous} followed by {next}")]
    UnorderedSizeClasses {
        /// Earlier threshold.
        previous: usize,
        /// Threshold that is not larger than its predecessor.
        next: usize,
    },

    /// A size class cannot hold a free-list link.
    #[error("size class {size} is smaller than a free-list link ({minimum} bytes)")]
    SizeClassTooSmall {
        /// Offending threshold.
        size: usize,
        /// Smallest permitted block size.
        minimum: usize,
    },
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Result type for pool handle operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Logs an allocation failure and terminates.
///
/// The workspace builds with `panic = "abort"`, so this ends the process.
/// Test builds unwind instead, which lets `#[should_panic]` observe it.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(error: AllocError) -> ! {
    tracing::error!(%error, "fatal allocator error");
    panic!("fatal allocator error: {error}");
}

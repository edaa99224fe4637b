//! # Tessera Memory
//!
//! Deterministic allocation for the real-time hot path:
//! - O(1) allocate/free for fixed-size blocks
//! - Zero fragmentation over time
//! - Fail-fast: exhaustion terminates instead of degrading
//!
//! ## Architecture Rules
//!
//! 1. **One arena, reserved once** - size classes grow lazily out of it
//! 2. **Freed blocks are recycled, never returned** - LIFO per size class
//! 3. **Clean memory** - every in-class block is handed out zero-filled
//! 4. **Single-threaded** - callers bring their own synchronization
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_memory::{AllocatorConfig, AllocatorContext, Pool};
//!
//! let config = AllocatorConfig::from_toml_file("config/memory.toml")?;
//! let context = AllocatorContext::from_config(&config)?;
//!
//! // Raw blocks
//! let block = context.allocate(100); // served by the 128-byte class
//! unsafe { context.free(block.as_ptr(), 100) };
//!
//! // Typed objects
//! let pool: Pool<Projectile> = Pool::new(&context);
//! let mut shot = pool.borrow();
//! shot.with_mut(|p| p.speed = 40.0)?;
//! shot.release()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;

pub use config::{AllocatorConfig, DEFAULT_ARENA_CAPACITY, DEFAULT_SIZE_CLASSES};
pub use error::{fatal, AllocError, AllocResult, ConfigError, ConfigResult, PoolError, PoolResult};
pub use memory::{
    AllocatorContext, AllocatorStats, Arena, FreeList, Handle, Pool, SizeClassAllocator,
    SizeClassStats, ARENA_ALIGN,
};

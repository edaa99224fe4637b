//! # Memory Management
//!
//! The allocator stack, leaves first:
//!
//! - [`Arena`] - fixed-capacity bump allocator, reset only as a whole
//! - [`FreeList`] - intrusive LIFO stack of reclaimed same-size blocks
//! - [`SizeClassAllocator`] - one arena feeding segregated size classes
//! - [`Pool`] - typed objects on top, with generation-checked [`Handle`]s
//!
//! ## Design Philosophy
//!
//! All arena memory is reserved once at startup. During gameplay:
//! - O(1) allocate and free
//! - No fragmentation over time
//! - Exhaustion is a sizing bug: fatal, logged, never retried

mod arena;
mod context;
mod free_list;
mod pool;
mod size_class;

pub use arena::{Arena, ARENA_ALIGN};
pub use context::AllocatorContext;
pub use free_list::FreeList;
pub use pool::{Handle, Pool};
pub use size_class::{AllocatorStats, SizeClassAllocator, SizeClassStats};

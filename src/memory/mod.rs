//! Local-memory management
//!
//! The engine's on-chip scratch region is a single fixed-size span of bytes.
//! This module subdivides it:
//! 1. Compute the byte footprint of each tensor before any allocation
//! 2. Allocate with first-fit over a free-block list
//! 3. Free explicitly, coalescing adjacent free blocks
//! 4. Reset releases everything at context teardown
//!
//! The allocator is not internally synchronized; one context means one
//! logical thread of control.

pub mod arena;
pub mod calculator;

pub use arena::LocalMemoryArena;
pub use calculator::MemoryCalculator;

//! # segalloc - A Segregated Free-List Allocator
//!
//! This crate provides a drop-in replacement for the C allocator
//! (`malloc`, `calloc`, `realloc`, `free` and the aligned family) backed by
//! one fixed-size arena instead of memory requested from the OS.
//!
//! ## Overview
//!
//! The arena is tiled by header-prefixed blocks. Free blocks are linked into
//! bins by size class; allocation takes the first fitting block from the
//! request's class upward and splits off the excess, release merges a block
//! with its free neighbours immediately.
//!
//! ```text
//!   Segregated Free Lists:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              ARENA                                   │
//!   │                                                                      │
//!   │   ┌─────┬──────┬─────┬─────────┬─────┬──────────────────────────┐    │
//!   │   │ A   │ F    │ A   │ F       │ A   │ F                        │    │
//!   │   └─────┴──▲───┴─────┴────▲────┴─────┴────────────▲─────────────┘    │
//!   │            │              │                      │                  │
//!   │   bins:    │              │                      │                  │
//!   │   [0] ─────┘              │                      │                  │
//!   │   [1] ────────────────────┘                      │                  │
//!   │   ...                                            │                  │
//!   │   [23] ──────────────────────────────────────────┘                  │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   A = allocated, F = free. No two free blocks are ever adjacent.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── arena      - Fixed backing region
//!   ├── bin        - Size classes and free lists (internal)
//!   ├── block      - Header, free node and wrapper layout (internal)
//!   ├── config     - Layout constants and arena capacity
//!   ├── error      - AllocError, HeapCorruption
//!   ├── facade     - malloc/calloc/realloc/free and the aligned family
//!   ├── ffi        - C ABI exports (feature "interpose")
//!   ├── global     - Process-wide heap
//!   └── heap       - Heap engine: alloc, release, split, coalesce
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, Arena};
//!
//! let mut region = vec![0u8; 1 << 20];
//! let mut allocator = Allocator::new(Arena::new(&mut region));
//!
//! // Allocate memory for a u64
//! let ptr = allocator.malloc(8).unwrap().cast::<u64>();
//!
//! unsafe {
//!     // Use the memory
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     // Free the memory
//!     allocator.free(ptr.as_ptr().cast());
//! }
//!
//! assert_eq!(allocator.heap().stats().free_blocks, 1);
//! ```
//!
//! ## How It Works
//!
//! Each block starts with a two-word header:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ prev_size: P    │  │  ┌──────────────────────────┐  │
//!   │  │ tag: N | ALLOC  │  │  │                          │  │
//!   │  └─────────────────┘  │  │   N - 16 bytes usable    │  │
//!   │      16 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! `prev_size` locates the block before, `tag` gives the block after, so
//! both neighbours are found in O(1) when a block is released. While a block
//! is free its first payload words hold the links of its bin.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Fixed capacity**: The arena never grows
//! - **No corruption detection**: Double frees and foreign pointers are
//!   undefined behavior
//! - **No page alignment**: `valloc` and `pvalloc` behave as `malloc`
//!
//! ## Safety
//!
//! Releasing memory takes raw pointers and is `unsafe`: a pointer must come
//! from the same allocator and be released once.

pub mod align;
pub mod arena;
mod bin;
mod block;
pub mod config;
pub mod error;
mod facade;
pub mod ffi;
pub mod global;
mod heap;

pub use arena::{Arena, StaticRegion};
pub use block::BlockKind;
pub use error::{AllocError, HeapCorruption};
pub use facade::Allocator;
pub use global::{GlobalHeap, HEAP};
pub use heap::{BlockInfo, Blocks, Heap, HeapStats};

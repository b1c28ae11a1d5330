//! # binalloc - A Binned Free-List Memory Allocator
//!
//! This crate provides a single-threaded **segregated free-list allocator**
//! over a contiguous, break-grown arena, together with the trace-replay
//! machinery used to validate it.
//!
//! ## Overview
//!
//! The heap is a tiling of blocks, each bounded by identical 4-byte
//! metadata words, with freed blocks recycled through 28 size-class bins:
//!
//! ```text
//!   Heap Shape:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            ARENA                                     │
//!   │                                                                      │
//!   │  ┌────┬──────────────┬──────────┬──────────────┬──────────────────┐  │
//!   │  │pad │  block       │  block   │  block       │   tail slack     │  │
//!   │  │ 4B │  (in use)    │  (free)  │  (in use)    │   (reusable)     │  │
//!   │  └────┴──────────────┴──────────┴──────────────┴──────────────────┘  │
//!   │                           ▲                     ▲                ▲   │
//!   │                           │                     │                │   │
//!   │                    on a free list           heap_end      physical  │
//!   │                    for its size class     (logical tail)    break   │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Each block:                          Size classes:
//!   ┌────────┬─────────────┬────────┐    bin x holds free blocks with
//!   │ header │   payload   │ footer │    2^(x+3) <= size < 2^(x+4) bytes
//!   │  4 B   │             │  4 B   │
//!   └────────┴─────────────┴────────┘    header == footer, so neighbours
//!                                        are found in constant time
//! ```
//!
//! Allocation is first-fit within the lowest size class that can satisfy
//! the request, with oversized blocks split when the leftover is worth
//! keeping. A free merges with both neighbours immediately, and a block
//! touching the logical tail is absorbed by retreating `heap_end` so the
//! space is reused without arena traffic.
//!
//! ## Crate Structure
//!
//! ```text
//!   binalloc
//!   ├── align      - align8! macro (payload alignment)
//!   ├── block      - header/footer metadata words and size-class math
//!   ├── memlib     - MemArena, the mmap-backed host arena
//!   ├── freelist   - segregated free list (internal)
//!   ├── binned     - BinnedAllocator: malloc / free / realloc / check
//!   ├── interface  - Allocator, the driver-facing dispatch trait
//!   ├── trace      - ALLOC / REALLOC / FREE / WRITE trace records
//!   └── validator  - trace replay with overlap and copy checking
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use binalloc::{BinnedAllocator, MemArena};
//!
//! let arena = MemArena::new(1 << 20).expect("arena mapping");
//! let mut heap = BinnedAllocator::new(arena).expect("heap init");
//!
//! unsafe {
//!   let p = heap.malloc(100) as *mut u64;
//!   *p = 42;
//!   assert_eq!(*p, 42);
//!   heap.free(p as *mut u8);
//! }
//!
//! heap.check().expect("heap invariants hold");
//! ```
//!
//! ## Features
//!
//! - **Binned reuse**: 28 logarithmic size classes with cached nonempty
//!   bounds keep the search short
//! - **Immediate coalescing**: footers let a free merge with both
//!   neighbours in constant time
//! - **Tail trimming**: frees at the heap edge retreat the logical end so
//!   the space is reused without growing the arena
//! - **Self checking**: a three-pass consistency checker cross-validates
//!   the free lists against a full heap walk
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; callers
//!   serialize externally
//! - **Grow-only arena**: memory is never returned to the OS, only to the
//!   logical tail
//! - **Unix-only**: the arena is backed by `mmap` via `libc`
//!
//! ## Safety
//!
//! The allocation entry points are `unsafe`: they hand out raw pointers
//! into the arena and trust the caller to free each payload exactly once.
//! The arena, the metadata words, and the free-list links are only touched
//! inside bounded unsafe regions whose requirements are stated where they
//! apply.

pub mod align;
pub mod block;
mod binned;
mod freelist;
mod interface;
mod memlib;
mod trace;
mod validator;

pub use binned::{BinnedAllocator, CheckError, SPLIT_THRESHOLD};
pub use interface::{Allocator, OutOfMemory};
pub use memlib::{MapError, MemArena};
pub use trace::{Trace, TraceOp, TraceParseError, TraceParseErrorKind};
pub use validator::{Fault, ValidationError, replay};

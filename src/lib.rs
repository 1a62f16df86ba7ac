//! # nextfit - A Next-Fit Heap over a Caller-Owned Region
//!
//! This crate provides a **next-fit allocator** that manages a fixed,
//! pre-allocated byte region. It never asks the system allocator for memory:
//! the caller hands over a buffer once and every block header lives inside it.
//!
//! ## Overview
//!
//! ```text
//!   Managed Region (after a few allocations):
//!
//!   ┌────┬────────┬────┬────────────┬────┬──────────────────────┬────┐
//!   │ H  │  used  │ H  │    used    │ H  │         free         │ S  │
//!   └────┴────────┴────┴────────────┴────┴──────────────────────┴────┘
//!     │             ▲ │                ▲ │                        ▲ │
//!     └─────────────┘ └────────────────┘ └────────────────────────┘ │
//!     ▲                                                             │
//!     └─────────────────────────────────────────────────────────────┘
//!
//!   H = 8 byte header, S = end sentinel (used, zero payload).
//!   Each header links to the next one; the sentinel links back to the first.
//! ```
//!
//! Blocks form a circular singly-linked list. A block's size is never stored:
//! it is the distance from the end of its header to the next header. The free
//! flag is packed into bit 0 of the link word.
//!
//! ## Crate Structure
//!
//! ```text
//!   nextfit
//!   ├── align      - Alignment macros (align!, align_down!)
//!   ├── block      - Tagged-pointer block header (internal)
//!   ├── error      - InitError, InvariantViolation
//!   ├── heap       - Heap: init, allocate, release, reallocate
//!   └── region     - MappedRegion, an mmap-backed region (unix)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use nextfit::Heap;
//!
//! #[repr(align(8))]
//! struct Arena([u8; 1024]);
//!
//! let mut arena = Arena([0; 1024]);
//! let mut heap = Heap::new(&mut arena.0);
//!
//! let ptr = heap.allocate(13).expect("out of memory");
//! assert_eq!(ptr.as_ptr() as usize % 8, 0);
//!
//! unsafe { ptr.as_ptr().write_bytes(0xAB, 13) };
//!
//! heap.release(ptr.as_ptr());
//! assert_eq!(heap.check_invariants(), Ok(()));
//! ```
//!
//! ## How It Works
//!
//! ```text
//!   allocate(n):
//!     n is rounded up to a multiple of 8
//!     start at the roaming cursor, walk at most one revolution
//!       free block? absorb free successors, then
//!         size >= n and remainder big enough  -> split, cursor = remainder
//!         size >= n and remainder too small   -> take whole, cursor = next
//!
//!   release(p):
//!     ignore null, out-of-region, non-block and already free pointers
//!     mark free, merge with a free successor, merge into a free predecessor
//!     cursor = merged block
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a `Heap` is neither `Send` nor `Sync`
//! - **Linear release**: finding the predecessor walks the list from the start
//! - **Fixed size**: the region never grows
//! - **8-byte alignment**: larger alignments are refused
//!
//! ## Safety
//!
//! Allocation and release are safe to call: releases are validated against the
//! block list before anything is written. Using the returned memory is, as
//! with any allocator, up to the caller.

pub mod align;
mod block;
mod error;
mod heap;
#[cfg(unix)]
mod region;

pub use block::HEADER_SIZE;
pub use error::{InitError, InvariantViolation};
pub use heap::{BlockInfo, Blocks, Heap, MIN_PAYLOAD};
#[cfg(unix)]
pub use region::MappedRegion;

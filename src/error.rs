use thiserror::Error;

/// Why a heap could not lay out its block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InitError {
  #[error(
    "region of {available} usable bytes cannot hold one free block and the end sentinel ({required} bytes needed)"
  )]
  RegionTooSmall { available: usize, required: usize },
}

/// A structural defect found by [`Heap::check_invariants`](crate::Heap::check_invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvariantViolation {
  #[error("heap is not initialized")]
  Uninitialized,
  #[error("block header at {addr:#x} is not 8-byte aligned")]
  Misaligned { addr: usize },
  #[error("block header at {addr:#x} lies outside the managed region")]
  OutOfRegion { addr: usize },
  #[error("block at {addr:#x} links backwards to {next:#x}")]
  NotAscending { addr: usize, next: usize },
  #[error("blocks at {addr:#x} and {next:#x} are both free")]
  AdjacentFree { addr: usize, next: usize },
  #[error("end sentinel at {addr:#x} is misplaced or marked free")]
  BadSentinel { addr: usize },
  #[error("block list does not return to the first block")]
  NotCircular,
}

use std::{alloc::Layout, fmt, marker::PhantomData, ptr, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
  align,
  align::{ALIGNMENT, checked_align},
  align_down,
  block::{Block, BlockHeader, HEADER_SIZE},
  error::{InitError, InvariantViolation},
};

/// Smallest payload worth splitting off as a separate free block.
pub const MIN_PAYLOAD: usize = 8;

/// One free block plus the end sentinel.
const MIN_REGION: usize = 2 * HEADER_SIZE + MIN_PAYLOAD;

/// Next-fit allocator over a caller-owned region.
///
/// The region is carved into a circular singly-linked list of blocks. The
/// highest block is a permanently used, zero-sized sentinel that links back to
/// the first block. A roaming cursor remembers where the last search stopped.
#[derive(Debug)]
pub struct Heap<'a> {
  start: *mut u8,
  end: usize,
  first: Option<Block>,
  current: Option<Block>,
  _region: PhantomData<&'a mut [u8]>,
}

/// Snapshot of one block, as reported by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the header.
  pub header: usize,
  /// Address handed out to callers.
  pub payload: usize,
  /// Usable bytes; zero for the end sentinel.
  pub size: usize,
  pub free: bool,
}

impl BlockInfo {
  fn of(block: Block) -> Self {
    Self {
      header: block.addr(),
      payload: block.payload_addr(),
      size: block.size(),
      free: block.is_free(),
    }
  }
}

impl<'a> Heap<'a> {
  /// Creates an uninitialised heap managing `region`.
  ///
  /// Nothing is written until [`Heap::init`] or the first allocation.
  pub fn new(region: &'a mut [u8]) -> Self {
    let range = region.as_mut_ptr_range();

    Self {
      start: range.start,
      end: range.end.addr(),
      first: None,
      current: None,
      _region: PhantomData,
    }
  }

  /// Creates an uninitialised heap managing the bytes in `start..end`.
  ///
  /// # Safety
  ///
  /// `start..end` must be valid for reads and writes for `'a` and must not be
  /// accessed other than through this heap and the pointers it returns.
  pub unsafe fn from_raw(
    start: *mut u8,
    end: *mut u8,
  ) -> Self {
    Self {
      start,
      end: end.addr(),
      first: None,
      current: None,
      _region: PhantomData,
    }
  }

  pub fn is_initialized(&self) -> bool {
    self.first.is_some()
  }

  /// Lays out one free block spanning the region, closed by the sentinel.
  ///
  /// Calling this on an initialised heap does nothing. A region too small to
  /// hold a block leaves the heap uninitialised, and every allocation fails.
  pub fn init(&mut self) {
    let _ = self.try_init();
  }

  /// Same as [`Heap::init`], but reports why the layout failed.
  pub fn try_init(&mut self) -> Result<(), InitError> {
    if self.first.is_some() {
      return Ok(());
    }

    let aligned_end = align_down!(self.end);
    let aligned_start = checked_align(self.start.addr()).unwrap_or(usize::MAX);
    let available = aligned_end.saturating_sub(aligned_start);

    if available < MIN_REGION {
      let error = InitError::RegionTooSmall {
        available,
        required: MIN_REGION,
      };
      warn!("heap at {:p} not initialized: {}", self.start, error);
      return Err(error);
    }

    // SAFETY: both headers are aligned and lie inside the region.
    let (first, last) = unsafe {
      (
        Block::from_raw(self.header_at(aligned_start)),
        Block::from_raw(self.header_at(aligned_end - HEADER_SIZE)),
      )
    };

    first.write(last, true);
    last.write(first, false);

    self.first = Some(first);
    self.current = Some(first);

    debug!(
      "heap initialized at {:#x}..{:#x}, {} bytes free",
      aligned_start,
      aligned_end,
      first.size()
    );

    Ok(())
  }

  fn header_at(
    &self,
    addr: usize,
  ) -> *mut BlockHeader {
    self.start.with_addr(addr).cast()
  }

  /// Returns at least `size` usable bytes, or `None` when no free block fits.
  ///
  /// The request is rounded up to a multiple of 8 and the returned pointer is
  /// 8-byte aligned. Initialises the heap on first use.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    let Some(aligned_size) = checked_align(size) else {
      debug!("allocation of {size} bytes failed: size overflows");
      return None;
    };

    self.allocate_aligned(size, aligned_size)
  }

  /// Like [`Heap::allocate`], for layouts whose alignment is at most 8.
  pub fn allocate_layout(
    &mut self,
    layout: Layout,
  ) -> Option<NonNull<u8>> {
    if layout.align() > ALIGNMENT {
      debug!(
        "allocation of {} bytes failed: alignment {} is not supported",
        layout.size(),
        layout.align()
      );
      return None;
    }

    self.allocate_aligned(layout.size(), align!(layout.size()))
  }

  fn allocate_aligned(
    &mut self,
    requested: usize,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if self.try_init().is_err() {
      return None;
    }

    let (first, start) = (self.first?, self.current?);
    let mut block = start;

    loop {
      if block.is_free() {
        absorb_free_successors(block, start, first);

        let available = block.size();

        if available >= size {
          if available - size < HEADER_SIZE + MIN_PAYLOAD {
            block.set_free(false);
            self.current = Some(block.next());
          } else {
            // SAFETY: the remainder header ends at least `MIN_PAYLOAD` bytes
            // before the next header, so it is inside the region and aligned.
            let remainder = unsafe { block.at_payload_offset(size) };

            remainder.write(block.next(), true);
            block.set_next(remainder);
            block.set_free(false);
            self.current = Some(remainder);
          }

          debug!(
            "allocated {} bytes at {:#x} (requested {}, block {})",
            size,
            block.payload_addr(),
            requested,
            block.size()
          );

          return NonNull::new(block.payload());
        }
      }

      block = block.next();

      if block == start {
        break;
      }
    }

    debug!("allocation of {requested} bytes failed: no free block of {size} bytes");
    None
  }

  /// Returns a block obtained from [`Heap::allocate`] to the free pool.
  ///
  /// Null, out-of-region and already free pointers are ignored, as are
  /// addresses that are not the payload of a block in the list. The freed
  /// block is merged with free neighbours on both sides and becomes the new
  /// search cursor.
  ///
  /// Finding the predecessor is a linear walk from the first block, since
  /// headers carry no backward link.
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let addr = ptr.addr();

    if addr < self.start.addr() || addr >= self.end {
      warn!("ignoring release of {ptr:p}: outside the managed region");
      return;
    }

    let Some((prev, block)) = self.find_with_predecessor(addr) else {
      warn!("ignoring release of {ptr:p}: not a block payload");
      return;
    };

    if block.is_free() {
      warn!("ignoring release of {ptr:p}: block is already free");
      return;
    }

    let size = block.size();
    block.set_free(true);

    let next = block.next();

    if next.is_free() {
      trace!("merging {:#x} into {:#x}", next.payload_addr(), addr);
      block.set_next(next.next());
    }

    let merged = if prev.is_free() {
      trace!("merging {:#x} into {:#x}", addr, prev.payload_addr());
      prev.set_next(block.next());
      prev
    } else {
      block
    };

    self.current = Some(merged);

    debug!("released {size} bytes at {ptr:p}");
  }

  /// Resizes an allocation, moving it when the current block is too small.
  ///
  /// A null pointer allocates; a zero size releases and returns `None`. On
  /// failure the existing allocation is left untouched.
  pub fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if ptr.is_null() {
      return self.allocate(size);
    }

    if size == 0 {
      self.release(ptr);
      return None;
    }

    let Some(block) = self.live_block(ptr.addr()) else {
      warn!("ignoring reallocation of {ptr:p}: not an allocated block");
      return None;
    };

    let aligned_size = checked_align(size)?;
    let old_size = block.size();

    if old_size >= aligned_size {
      return NonNull::new(block.payload());
    }

    let moved = self.allocate_aligned(size, aligned_size)?;

    // SAFETY: `block` is still allocated, so the new block cannot overlap it,
    // and both hold at least `old_size` bytes.
    unsafe { ptr::copy_nonoverlapping(block.payload(), moved.as_ptr(), old_size) };

    self.release(block.payload());

    Some(moved)
  }

  /// Usable size of a live allocation.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    self.live_block(ptr.addr()).map(Block::size)
  }

  fn live_block(
    &self,
    payload: usize,
  ) -> Option<Block> {
    self
      .find_with_predecessor(payload)
      .map(|(_, block)| block)
      .filter(|block| !block.is_free())
  }

  /// Walks the list for the non-sentinel block owning `payload`.
  fn find_with_predecessor(
    &self,
    payload: usize,
  ) -> Option<(Block, Block)> {
    let first = self.first?;
    let mut prev = first;

    loop {
      let block = prev.next();

      if block.payload_addr() == payload && block.next() != first {
        return Some((prev, block));
      }

      if block == first {
        return None;
      }

      prev = block;
    }
  }

  /// Iterates over every block once, starting at the first one.
  ///
  /// The sentinel is the last item. Empty while uninitialised.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      first: self.first,
      next: self.first,
      _heap: PhantomData,
    }
  }

  /// Total usable bytes held by free blocks.
  pub fn free_bytes(&self) -> usize {
    self
      .blocks()
      .filter(|info| info.free)
      .map(|info| info.size)
      .sum()
  }

  /// Total usable bytes held by allocated blocks.
  pub fn used_bytes(&self) -> usize {
    self
      .blocks()
      .filter(|info| !info.free)
      .map(|info| info.size)
      .sum()
  }

  /// Verifies the list structure without trusting any link it has not
  /// range-checked first.
  pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
    let first = self.first.ok_or(InvariantViolation::Uninitialized)?;
    let low = first.addr();
    let sentinel = align_down!(self.end) - HEADER_SIZE;
    let max_blocks = (sentinel - low) / HEADER_SIZE + 1;

    let mut block = first;

    for _ in 0..max_blocks {
      let addr = block.addr();
      let next = block.next();

      if next == first {
        return if addr == sentinel && !block.is_free() {
          Ok(())
        } else {
          Err(InvariantViolation::BadSentinel { addr })
        };
      }

      let next_addr = next.addr();

      if next_addr % ALIGNMENT != 0 {
        return Err(InvariantViolation::Misaligned { addr: next_addr });
      }

      if next_addr < low || next_addr > sentinel {
        return Err(InvariantViolation::OutOfRegion { addr: next_addr });
      }

      if next_addr <= addr {
        return Err(InvariantViolation::NotAscending {
          addr,
          next: next_addr,
        });
      }

      if block.is_free() && next.is_free() {
        return Err(InvariantViolation::AdjacentFree {
          addr,
          next: next_addr,
        });
      }

      block = next;
    }

    Err(InvariantViolation::NotCircular)
  }
}

/// Folds every free block directly after `block` into it.
///
/// Stops before `stop` (where the current search started) and before `first`,
/// so a scan never swallows its own starting point.
fn absorb_free_successors(
  block: Block,
  stop: Block,
  first: Block,
) {
  let mut next = block.next();

  while next.is_free() && next != stop && next != first {
    trace!(
      "coalescing {:#x} into {:#x}",
      next.payload_addr(),
      block.payload_addr()
    );
    block.set_next(next.next());
    next = block.next();
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'h> {
  first: Option<Block>,
  next: Option<Block>,
  _heap: PhantomData<&'h ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = self.next?;
    let next = block.next();

    self.next = (Some(next) != self.first).then_some(next);

    Some(BlockInfo::of(block))
  }
}

impl fmt::Display for Heap<'_> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    if !self.is_initialized() {
      return writeln!(f, "heap {:p}..{:#x}: uninitialized", self.start, self.end);
    }

    writeln!(
      f,
      "heap {:p}..{:#x}: {} bytes free, {} bytes used",
      self.start,
      self.end,
      self.free_bytes(),
      self.used_bytes()
    )?;

    let cursor = self.current.map(Block::addr);

    for info in self.blocks() {
      writeln!(
        f,
        "  {:#x} {:>8} bytes {}{}",
        info.payload,
        info.size,
        if info.free { "free" } else { "used" },
        if Some(info.header) == cursor { " <- cursor" } else { "" }
      )?;
    }

    Ok(())
  }
}

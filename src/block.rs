use std::mem;

/// Bit 0 of the link word marks the block as free.
const FREE_BIT: usize = 0x1;

/// In-band header written in front of every payload.
///
/// The single word holds the address of the next header with the free flag
/// packed into its low bit. Headers always sit on 8-byte boundaries, so that
/// bit is otherwise unused.
#[repr(C, align(8))]
pub struct BlockHeader {
  link: usize,
}

/// Size of one block header in bytes.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Handle to a header that lives inside a heap region.
///
/// The size of a block is implicit: the distance between the end of its header
/// and the start of the next one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Block(*mut BlockHeader);

impl Block {
  /// # Safety
  ///
  /// `header` must be 8-byte aligned and point into a region that stays
  /// writable for as long as the handle (or any handle derived from it) is used.
  pub unsafe fn from_raw(header: *mut BlockHeader) -> Self {
    Self(header)
  }

  /// Overwrites the whole header, discarding whatever was stored there.
  pub fn write(
    self,
    next: Block,
    free: bool,
  ) {
    let link = next.addr() | free as usize;
    // SAFETY: guaranteed by `from_raw`.
    unsafe { self.0.write(BlockHeader { link }) };
  }

  fn link(self) -> usize {
    // SAFETY: guaranteed by `from_raw`.
    unsafe { self.0.read().link }
  }

  fn set_link(
    self,
    link: usize,
  ) {
    // SAFETY: guaranteed by `from_raw`.
    unsafe { self.0.write(BlockHeader { link }) };
  }

  /// Address of the header.
  pub fn addr(self) -> usize {
    self.0.addr()
  }

  pub fn next(self) -> Block {
    Block(self.0.with_addr(self.link() & !FREE_BIT))
  }

  /// Redirects the link, keeping the free flag.
  pub fn set_next(
    self,
    next: Block,
  ) {
    self.set_link(next.addr() | (self.link() & FREE_BIT));
  }

  pub fn is_free(self) -> bool {
    self.link() & FREE_BIT != 0
  }

  pub fn set_free(
    self,
    free: bool,
  ) {
    self.set_link((self.link() & !FREE_BIT) | free as usize);
  }

  /// Address of the first payload byte.
  pub fn payload_addr(self) -> usize {
    self.addr() + HEADER_SIZE
  }

  pub fn payload(self) -> *mut u8 {
    self.0.wrapping_add(1).cast()
  }

  /// Usable bytes between this header and the next one.
  ///
  /// The end sentinel links back to the start of the region and reports zero.
  pub fn size(self) -> usize {
    self.next().addr().saturating_sub(self.payload_addr())
  }

  /// Handle for a header placed `offset` bytes past this block's payload start.
  ///
  /// # Safety
  ///
  /// The target must satisfy the contract of [`Block::from_raw`].
  pub unsafe fn at_payload_offset(
    self,
    offset: usize,
  ) -> Block {
    Block(self.payload().wrapping_add(offset).cast())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C, align(8))]
  struct Words([usize; 8]);

  #[test]
  fn test_header_size() {
    assert_eq!(8, HEADER_SIZE);
    assert_eq!(8, mem::align_of::<BlockHeader>());
  }

  #[test]
  fn test_free_bit_packing() {
    let mut words = Words([0; 8]);
    let base = words.0.as_mut_ptr().cast::<BlockHeader>();

    unsafe {
      let first = Block::from_raw(base);
      let last = Block::from_raw(base.add(7));

      first.write(last, true);
      last.write(first, false);

      assert!(first.is_free());
      assert!(!last.is_free());
      assert_eq!(last, first.next());
      assert_eq!(first, last.next());
      assert_eq!(48, first.size());
      assert_eq!(0, last.size());

      first.set_free(false);
      assert!(!first.is_free());
      assert_eq!(last, first.next());

      let middle = first.at_payload_offset(16);
      assert_eq!(first.addr() + 24, middle.addr());

      middle.write(last, true);
      first.set_next(middle);
      assert!(!first.is_free());
      assert_eq!(16, first.size());
      assert_eq!(24, middle.size());
      assert_eq!(middle.addr() + HEADER_SIZE, middle.payload() as usize);
    }
  }
}

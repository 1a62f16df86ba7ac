use std::{io, ptr, slice};

use log::{debug, warn};

use crate::Heap;

/// Page-aligned, zero-filled memory obtained from the kernel with `mmap(2)`.
///
/// Stands in for a static buffer when the embedder wants a "simulated heap"
/// of a size only known at run time. The mapping is returned on drop.
pub struct MappedRegion {
  start: *mut u8,
  len: usize,
}

impl MappedRegion {
  pub fn new(len: usize) -> io::Result<Self> {
    if len == 0 {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "region length must be non-zero",
      ));
    }

    // SAFETY: an anonymous private mapping aliases no existing memory.
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    debug!("mapped {len} bytes at {address:p}");

    Ok(Self {
      start: address.cast(),
      len,
    })
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    // SAFETY: the mapping is readable, writable and owned by `self`.
    unsafe { slice::from_raw_parts_mut(self.start, self.len) }
  }

  /// An uninitialised heap over the whole mapping.
  pub fn heap(&mut self) -> Heap<'_> {
    Heap::new(self.as_mut_slice())
  }
}

impl Drop for MappedRegion {
  fn drop(&mut self) {
    // SAFETY: `start..start + len` is exactly the mapping created in `new`.
    if unsafe { libc::munmap(self.start.cast(), self.len) } != 0 {
      warn!(
        "failed to unmap {} bytes at {:p}: {}",
        self.len,
        self.start,
        io::Error::last_os_error()
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::HEADER_SIZE;

  #[test]
  fn test_zero_length_rejected() {
    let error = MappedRegion::new(0).err().unwrap();

    assert_eq!(io::ErrorKind::InvalidInput, error.kind());
  }

  #[test]
  fn test_heap_over_mapping() {
    let mut region = MappedRegion::new(4096).unwrap();

    assert_eq!(4096, region.len());
    assert!(!region.is_empty());
    assert!(region.as_mut_slice().iter().all(|byte| *byte == 0));

    let range = region.as_mut_slice().as_mut_ptr_range();
    let mut heap = region.heap();

    heap.init();

    let blocks: Vec<_> = heap.blocks().collect();
    assert_eq!(2, blocks.len());
    assert_eq!(range.start as usize, blocks[0].header);
    assert_eq!(range.end as usize - HEADER_SIZE, blocks[1].header);
    assert_eq!(4096 - 2 * HEADER_SIZE, heap.free_bytes());

    let ptr = heap.allocate(4096 - 2 * HEADER_SIZE).unwrap();
    assert_eq!(range.start as usize + HEADER_SIZE, ptr.as_ptr() as usize);
    assert!(heap.allocate(1).is_none());

    heap.release(ptr.as_ptr());
    assert_eq!(4096 - 2 * HEADER_SIZE, heap.free_bytes());
    assert_eq!(Ok(()), heap.check_invariants());
  }
}

use std::ptr::NonNull;

use nextfit::{HEADER_SIZE, Heap, MIN_PAYLOAD};
use pretty_assertions::assert_eq;

const REGION: usize = 8192;

#[repr(C, align(8))]
struct Arena([u8; REGION]);

/// Deterministic xorshift so failures reproduce.
struct Rng(u64);

impl Rng {
  fn next(&mut self) -> u64 {
    self.0 ^= self.0 << 13;
    self.0 ^= self.0 >> 7;
    self.0 ^= self.0 << 17;
    self.0
  }

  fn below(
    &mut self,
    bound: usize,
  ) -> usize {
    (self.next() % bound as u64) as usize
  }
}

struct Live {
  ptr: NonNull<u8>,
  size: usize,
  tag: u8,
}

fn fill(live: &Live) {
  unsafe { live.ptr.as_ptr().write_bytes(live.tag, live.size) };
}

fn intact(live: &Live) -> bool {
  let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.size) };
  bytes.iter().all(|byte| *byte == live.tag)
}

fn run(seed: u64) {
  let mut arena = Arena([0; REGION]);
  let mut heap = Heap::new(&mut arena.0);
  let mut rng = Rng(seed);
  let mut live: Vec<Live> = Vec::new();

  heap.init();
  let initial_free = heap.free_bytes();
  assert_eq!(REGION - 2 * HEADER_SIZE, initial_free);

  for step in 0..2000 {
    if live.is_empty() || rng.below(3) != 0 {
      let size = rng.below(200);

      if let Some(ptr) = heap.allocate(size) {
        assert_eq!(0, ptr.as_ptr() as usize % 8, "step {step}");
        assert!(heap.usable_size(ptr.as_ptr()).unwrap() >= size);

        let entry = Live {
          ptr,
          size,
          tag: (step % 251) as u8 + 1,
        };
        fill(&entry);
        live.push(entry);
      }
    } else {
      let entry = live.swap_remove(rng.below(live.len()));

      assert!(intact(&entry), "step {step}: block at {:p} overwritten", entry.ptr);
      heap.release(entry.ptr.as_ptr());
    }

    assert_eq!(Ok(()), heap.check_invariants(), "step {step}\n{heap}");

    let overhead: usize = heap.blocks().count() * HEADER_SIZE;
    assert_eq!(REGION, heap.free_bytes() + heap.used_bytes() + overhead);
  }

  for entry in live.drain(..) {
    assert!(intact(&entry));
    heap.release(entry.ptr.as_ptr());
  }

  assert_eq!(initial_free, heap.free_bytes());
  assert_eq!(2, heap.blocks().count());
}

#[test]
fn test_random_sequences_keep_invariants() {
  for seed in [1, 0x9E37_79B9_7F4A_7C15, 42, 0xDEAD_BEEF] {
    run(seed);
  }
}

#[test]
fn test_fragmented_heap_recovers() {
  let mut arena = Arena([0; REGION]);
  let mut heap = Heap::new(&mut arena.0);

  let mut blocks = Vec::new();
  while let Some(ptr) = heap.allocate(MIN_PAYLOAD) {
    blocks.push(ptr);
  }

  assert_eq!(0, heap.free_bytes());
  assert!(heap.allocate(16).is_none());

  // Every other block free: the largest hole holds 16 bytes.
  for ptr in blocks.iter().step_by(2) {
    heap.release(ptr.as_ptr());
  }

  assert!(heap.allocate(32).is_none());
  assert_eq!(Ok(()), heap.check_invariants());

  for ptr in blocks.iter().skip(1).step_by(2) {
    heap.release(ptr.as_ptr());
  }

  assert_eq!(REGION - 2 * HEADER_SIZE, heap.free_bytes());
  assert!(heap.allocate(REGION - 2 * HEADER_SIZE).is_some());
}

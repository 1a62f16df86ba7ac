use std::{
  env,
  io::{self, BufWriter, Read, Write},
  mem,
  process::ExitCode,
  ptr::NonNull,
};

use log::{debug, error};
use nextfit::{Heap, MappedRegion};

const DEFAULT_REGION_SIZE: usize = 64 * 1024;

/// Growable `i32` stack whose storage comes from a [`Heap`].
struct Collection {
  data: Option<NonNull<i32>>,
  size: usize,
  capacity: usize,
}

impl Collection {
  fn new(heap: &mut Heap) -> Option<Self> {
    let capacity = 4;
    let data = heap.allocate(capacity * mem::size_of::<i32>())?;

    Some(Self {
      data: Some(data.cast()),
      size: 0,
      capacity,
    })
  }

  fn push(
    &mut self,
    heap: &mut Heap,
    value: i32,
  ) -> Option<()> {
    let data = self.data?;

    let data = if self.size == self.capacity {
      let capacity = self.capacity * 2;
      let grown = heap.reallocate(data.as_ptr().cast(), capacity * mem::size_of::<i32>())?;

      self.capacity = capacity;
      self.data = Some(grown.cast());
      grown.cast()
    } else {
      data
    };

    // SAFETY: `size < capacity` and the block holds `capacity` elements.
    unsafe { data.as_ptr().add(self.size).write(value) };
    self.size += 1;

    Some(())
  }

  fn pop(&mut self) {
    self.size = self.size.saturating_sub(1);
  }

  fn as_slice(&self) -> &[i32] {
    match self.data {
      // SAFETY: the first `size` elements were written by `push`.
      Some(data) => unsafe { std::slice::from_raw_parts(data.as_ptr(), self.size) },
      None => &[],
    }
  }

  fn free(
    &mut self,
    heap: &mut Heap,
  ) {
    if let Some(data) = self.data.take() {
      heap.release(data.as_ptr().cast());
    }

    self.size = 0;
    self.capacity = 0;
  }
}

fn print_collection(
  out: &mut impl Write,
  values: &[i32],
) -> io::Result<()> {
  for (i, value) in values.iter().enumerate() {
    if i > 0 {
      out.write_all(b",")?;
    }
    write!(out, "{value}")?;
  }

  out.write_all(b";\n")?;
  out.flush()
}

/// Reads single-byte commands from stdin:
///
/// - `a` appends the counter and advances it
/// - `b` advances the counter
/// - `c` drops the last element and advances the counter
///
/// Anything else, including end of input, stops processing.
fn main() -> ExitCode {
  env_logger::init();

  let region_size = match env::args().nth(1).map(|arg| arg.parse::<usize>()) {
    Some(Ok(size)) => size,
    Some(Err(e)) => {
      error!("invalid region size: {e}");
      return ExitCode::FAILURE;
    }
    None => DEFAULT_REGION_SIZE,
  };

  let mut region = match MappedRegion::new(region_size) {
    Ok(region) => region,
    Err(e) => {
      error!("failed to map {region_size} bytes: {e}");
      return ExitCode::FAILURE;
    }
  };

  let mut heap = region.heap();

  let Some(mut collection) = Collection::new(&mut heap) else {
    error!("heap of {region_size} bytes cannot hold the collection");
    return ExitCode::FAILURE;
  };

  let mut counter = 0;

  for byte in io::stdin().lock().bytes() {
    match byte {
      Ok(b'a') => {
        if collection.push(&mut heap, counter).is_none() {
          debug!("out of memory after {} elements", collection.size);
          break;
        }
      }
      Ok(b'b') => {}
      Ok(b'c') => collection.pop(),
      _ => break,
    }
    counter += 1;
  }

  let mut out = BufWriter::new(io::stdout().lock());
  let printed = print_collection(&mut out, collection.as_slice());

  collection.free(&mut heap);
  debug!("{heap}");

  match printed {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("failed to write output: {e}");
      ExitCode::FAILURE
    }
  }
}

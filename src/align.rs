/// Payload alignment, in bytes, of every block handed out by the heap.
///
/// Block headers are exactly one alignment unit wide, so a header placed on an
/// aligned address always yields an aligned payload.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// The caller must ensure that the addition cannot overflow; use
/// [`checked_align`] for untrusted values.
///
/// # Examples
///
/// ```rust
/// use nextfit::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Rounds the given address down to the previous multiple of [`ALIGNMENT`].
///
/// ```rust
/// use nextfit::align_down;
///
/// assert_eq!(align_down!(15), 8);
/// assert_eq!(align_down!(16), 16);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr) => {
    $value & !($crate::align::ALIGNMENT - 1)
  };
}

/// Same as [`align!`], but returns `None` instead of overflowing.
#[inline]
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(value) => Some(value & !(ALIGNMENT - 1)),
    None => None,
  }
}

/// Rounds a size up to the allocator's minimum alignment.
///
/// Every block size and every payload address in the heap is a multiple of
/// [`MIN_ALIGN`](crate::config::MIN_ALIGN), which is two machine words.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use segalloc::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 16), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::config::MIN_ALIGN)
  };
}

/// Rounds a value up to the next multiple of `$align`, which must be a
/// power of two.
///
/// ```rust
/// use segalloc::align_to;
///
/// assert_eq!(align_to!(100, 64), 128);
/// assert_eq!(align_to!(128, 64), 128);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Like [`align_to!`] but returns `None` instead of wrapping around.
pub const fn checked_align_to(
  value: usize,
  align: usize,
) -> Option<usize> {
  match value.checked_add(align - 1) {
    Some(raised) => Some(raised & !(align - 1)),
    None => None,
  }
}

/// Rounds an address down to a multiple of `align` (a power of two).
pub const fn align_down(
  value: usize,
  align: usize,
) -> usize {
  value & !(align - 1)
}

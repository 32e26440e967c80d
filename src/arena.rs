use std::{cell::UnsafeCell, marker::PhantomData, ptr::NonNull};

use crate::{align, align::align_down, config::MIN_ALIGN};

/// The fixed backing store of a heap.
///
/// An arena is a borrowed byte region whose base and length have been
/// trimmed to [`MIN_ALIGN`]. It never grows and is never handed back.
///
/// ```text
///   region:  ┌──┬────────────────────────────────────────────┬─┐
///            │  │                  arena                     │ │
///            └──┴────────────────────────────────────────────┴─┘
///            ▲  ▲                                            ▲
///            │  base (MIN_ALIGN aligned)                     base + capacity
///            region start
/// ```
pub struct Arena<'a> {
  base: NonNull<u8>,
  capacity: usize,
  _region: PhantomData<&'a mut [u8]>,
}

impl<'a> Arena<'a> {
  /// Wraps a mutable byte region.
  ///
  /// Leading bytes needed to reach [`MIN_ALIGN`] and trailing bytes that do
  /// not fill a whole alignment unit are left unused.
  pub fn new(region: &'a mut [u8]) -> Self {
    unsafe { Self::from_raw_parts(region.as_mut_ptr(), region.len()) }
  }

  /// Wraps `len` bytes starting at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be non-null and valid for reads and writes of `len` bytes
  /// for `'a`, and nothing else may access that memory while the arena
  /// lives.
  pub unsafe fn from_raw_parts(
    ptr: *mut u8,
    len: usize,
  ) -> Self {
    let start = ptr as usize;
    let aligned = align!(start);
    let pad = aligned - start;
    let capacity = if len > pad { align_down(len - pad, MIN_ALIGN) } else { 0 };

    Self {
      base: unsafe { NonNull::new_unchecked(ptr.add(pad.min(len))) },
      capacity,
      _region: PhantomData,
    }
  }

  /// First usable byte.
  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  /// Usable bytes, always a multiple of [`MIN_ALIGN`].
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// One past the last usable byte.
  pub fn end(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.capacity) }
  }

  /// Whether `ptr` points inside the arena.
  pub fn contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    let addr = ptr as usize;
    let base = self.base.as_ptr() as usize;
    addr >= base && addr < base + self.capacity
  }

  /// Byte offset of `ptr` from the arena base. `ptr` must be inside the
  /// arena or one past its end.
  pub fn offset_of(
    &self,
    ptr: *const u8,
  ) -> usize {
    ptr as usize - self.base.as_ptr() as usize
  }

  /// Pointer at `offset` bytes from the base.
  ///
  /// # Safety
  ///
  /// `offset` must not exceed the capacity.
  pub unsafe fn at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
  }
}

/// Zero-initialized storage for a process-lifetime arena, placed in `.bss`.
#[repr(C, align(16))]
pub struct StaticRegion<const N: usize>(UnsafeCell<[u8; N]>);

unsafe impl<const N: usize> Sync for StaticRegion<N> {}

impl<const N: usize> StaticRegion<N> {
  pub const fn new() -> Self {
    Self(UnsafeCell::new([0; N]))
  }

  /// Hands the region out as an arena.
  ///
  /// # Safety
  ///
  /// Must be called at most once per region; the returned arena has
  /// exclusive access to the bytes.
  pub unsafe fn arena(&'static self) -> Arena<'static> {
    unsafe { Arena::from_raw_parts(self.0.get().cast::<u8>(), N) }
  }
}

impl<const N: usize> Default for StaticRegion<N> {
  fn default() -> Self {
    Self::new()
  }
}

//! The C allocator surface on top of a [`Heap`].
//!
//! [`Allocator`] owns the lazy initialization of its heap and the policies
//! the heap does not know about: zeroing for `calloc`, copy-and-release for a
//! growing `realloc`, and the wrapper record behind over-aligned pointers.
//!
//! ```text
//!   aligned_alloc(256, n):
//!
//!   ┌────────┬───────────────────────────┬────────────┬───────────┬──────┐
//!   │ header │ padding                   │ underlying │ tag       │ n .. │
//!   │        │                           │ (raw ptr)  │ ALIGNED   │      │
//!   └────────┴───────────────────────────┴────────────┴───────────┴──────┘
//!            ▲                                                    ▲
//!            raw = malloc(n + 2 * 256 + 2 * header)               aligned (% 256 == 0)
//! ```

use std::ptr::{self, NonNull};

use log::trace;

use crate::{
  align::checked_align_to,
  arena::Arena,
  block::{self, BlockKind, HEADER_SIZE, WRAPPER_SIZE},
  config::MIN_ALIGN,
  error::AllocError,
  heap::Heap,
};

/// A libc-style allocator over one heap.
pub struct Allocator<'a> {
  heap: Heap<'a>,
}

impl<'a> Allocator<'a> {
  /// Creates an allocator over `arena`. The heap is initialized on the first
  /// allocation call, or explicitly with [`init`](Self::init).
  pub fn new(arena: Arena<'a>) -> Self {
    Self {
      heap: Heap::new(arena),
    }
  }

  /// Initializes the heap; `false` if it already was.
  pub fn init(&mut self) -> bool {
    self.heap.init()
  }

  pub fn heap(&self) -> &Heap<'a> {
    &self.heap
  }

  fn ensure_init(&mut self) {
    if !self.heap.is_initialized() {
      self.heap.init();
    }
  }

  pub fn malloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self.ensure_init();
    self.heap.alloc(size)
  }

  /// Allocates `count * size` zeroed bytes.
  pub fn calloc(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let total = count.checked_mul(size).ok_or(AllocError::Overflow)?;
    let ptr = self.malloc(total)?;
    unsafe { ptr.as_ptr().write_bytes(0, total) };
    Ok(ptr)
  }

  /// Resizes an allocation.
  ///
  /// - null `ptr` behaves as `malloc(size)`;
  /// - `size == 0` releases `ptr` and yields `None`;
  /// - a size that still fits returns `ptr` unchanged, without shrinking;
  /// - otherwise the contents move to a new block and `ptr` is released.
  ///   If that allocation fails, `ptr` is left untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator.
  pub unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    let Some(old) = NonNull::new(ptr) else {
      return self.malloc(size).map(Some);
    };

    if size == 0 {
      unsafe { self.free(ptr) };
      return Ok(None);
    }

    let capacity = unsafe { self.usable_size(ptr) };
    if size <= capacity {
      trace!("realloc({:p}, {}): fits in {}", old, size, capacity);
      return Ok(Some(old));
    }

    let new = self.malloc(size)?;
    unsafe {
      ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), capacity.min(size));
      self.free(ptr);
    }

    trace!("realloc({:p}, {}) moved to {:p}", old, size, new);
    Ok(Some(new))
  }

  /// Releases a pointer from `malloc` or the aligned family. Null is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(payload) = NonNull::new(ptr) else {
      return;
    };

    unsafe {
      match block::kind_of(payload) {
        BlockKind::Plain => self.heap.release(ptr),
        BlockKind::Aligned { underlying } => {
          block::erase_wrapper(payload);
          self.heap.release(underlying.as_ptr());
        }
      }
    }
  }

  /// Bytes usable at `ptr`. For an aligned pointer this is measured from the
  /// aligned address to the end of the underlying block.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    let Some(payload) = NonNull::new(ptr) else {
      return 0;
    };

    unsafe {
      match block::kind_of(payload) {
        BlockKind::Plain => self.heap.capacity_of(payload),
        BlockKind::Aligned { underlying } => {
          let skipped = payload.as_ptr() as usize - underlying.as_ptr() as usize;
          self.heap.capacity_of(underlying).saturating_sub(skipped)
        }
      }
    }
  }

  /// Allocates `size` bytes at an address that is a multiple of
  /// `alignment`, which must be a power of two.
  ///
  /// Alignments the heap already guarantees are served by plain `malloc`.
  /// Larger ones over-allocate and place a wrapper record below the aligned
  /// address that names the underlying block.
  pub fn aligned_alloc(
    &mut self,
    alignment: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if !alignment.is_power_of_two() {
      return Err(AllocError::InvalidAlignment { alignment });
    }
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }
    if alignment <= MIN_ALIGN {
      return self.malloc(size);
    }

    let total = alignment
      .checked_mul(2)
      .and_then(|slack| slack.checked_add(2 * HEADER_SIZE))
      .and_then(|slack| slack.checked_add(size))
      .ok_or(AllocError::Overflow)?;

    let raw = self.malloc(total)?;
    let start = raw.as_ptr() as usize + WRAPPER_SIZE;
    let Some(target) = checked_align_to(start, alignment) else {
      unsafe { self.heap.release(raw.as_ptr()) };
      return Err(AllocError::Overflow);
    };

    unsafe {
      let aligned = NonNull::new_unchecked(raw.as_ptr().add(target - raw.as_ptr() as usize));
      block::write_wrapper(aligned, raw);

      trace!(
        "aligned_alloc({}, {}) = {:p} inside {:p}",
        alignment,
        size,
        aligned,
        raw
      );
      Ok(aligned)
    }
  }

  /// Same contract as [`aligned_alloc`](Self::aligned_alloc).
  pub fn memalign(
    &mut self,
    alignment: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self.aligned_alloc(alignment, size)
  }

  /// POSIX variant: the alignment must also be a multiple of the pointer
  /// size, and the result is written through `out`.
  ///
  /// A zero size stores null and succeeds. On failure `out` is not written.
  pub fn posix_memalign(
    &mut self,
    out: &mut *mut u8,
    alignment: usize,
    size: usize,
  ) -> Result<(), AllocError> {
    if !alignment.is_power_of_two() || alignment % size_of::<*mut u8>() != 0 {
      return Err(AllocError::InvalidAlignment { alignment });
    }
    if size == 0 {
      *out = ptr::null_mut();
      return Ok(());
    }

    *out = self.aligned_alloc(alignment, size)?.as_ptr();
    Ok(())
  }

  /// Page alignment is not honored; behaves as `malloc`.
  pub fn valloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self.malloc(size)
  }

  /// Page alignment is not honored; behaves as `malloc`.
  pub fn pvalloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self.malloc(size)
  }
}

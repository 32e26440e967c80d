//! C ABI entry points.
//!
//! With the `interpose` feature the cdylib exports `malloc`, `calloc`,
//! `realloc`, `free`, `cfree`, `aligned_alloc`, `memalign`,
//! `posix_memalign`, `valloc`, `pvalloc` and `malloc_usable_size`, all
//! backed by [`global::HEAP`](crate::global::HEAP):
//!
//! ```text
//! cargo build --release --features interpose
//! LD_PRELOAD=target/release/libsegalloc.so ./program
//! ```
//!
//! Failures come back as NULL with `errno` set to `ENOMEM` or `EINVAL`;
//! `posix_memalign` returns the code instead. The exports do no locking,
//! so the host program must be single-threaded or serialize its calls.

use std::ptr::{self, NonNull};

use libc::{c_int, c_void};

use crate::error::AllocError;

/// Collapses an allocation result into the C convention.
pub fn into_raw(result: Result<NonNull<u8>, AllocError>) -> *mut c_void {
  match result {
    Ok(ptr) => ptr.as_ptr().cast(),
    Err(err) => {
      set_errno(err.errno());
      ptr::null_mut()
    }
  }
}

/// Like [`into_raw`], but a successful empty result is a plain NULL.
pub fn optional_into_raw(result: Result<Option<NonNull<u8>>, AllocError>) -> *mut c_void {
  match result {
    Ok(Some(ptr)) => ptr.as_ptr().cast(),
    Ok(None) => ptr::null_mut(),
    Err(err) => {
      set_errno(err.errno());
      ptr::null_mut()
    }
  }
}

/// Converts a `posix_memalign` result into its return code.
pub fn status(result: Result<(), AllocError>) -> c_int {
  match result {
    Ok(()) => 0,
    Err(err) => err.errno(),
  }
}

#[cfg(target_os = "linux")]
pub fn set_errno(value: c_int) {
  unsafe { *libc::__errno_location() = value };
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub fn set_errno(value: c_int) {
  unsafe { *libc::__error() = value };
}

#[cfg(not(any(
  target_os = "linux",
  target_os = "macos",
  target_os = "ios",
  target_os = "freebsd"
)))]
pub fn set_errno(_value: c_int) {}

#[cfg(feature = "interpose")]
mod exports {
  use libc::{c_int, c_void, size_t};

  use super::{into_raw, optional_into_raw, status};
  use crate::global::HEAP;

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    into_raw(unsafe { HEAP.allocator() }.malloc(size))
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn calloc(
    count: size_t,
    size: size_t,
  ) -> *mut c_void {
    into_raw(unsafe { HEAP.allocator() }.calloc(count, size))
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn realloc(
    ptr: *mut c_void,
    size: size_t,
  ) -> *mut c_void {
    optional_into_raw(unsafe { HEAP.allocator().realloc(ptr.cast(), size) })
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { HEAP.allocator().free(ptr.cast()) };
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn cfree(ptr: *mut c_void) {
    unsafe { free(ptr) };
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn aligned_alloc(
    alignment: size_t,
    size: size_t,
  ) -> *mut c_void {
    into_raw(unsafe { HEAP.allocator() }.aligned_alloc(alignment, size))
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn memalign(
    alignment: size_t,
    size: size_t,
  ) -> *mut c_void {
    into_raw(unsafe { HEAP.allocator() }.memalign(alignment, size))
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn posix_memalign(
    out: *mut *mut c_void,
    alignment: size_t,
    size: size_t,
  ) -> c_int {
    if out.is_null() {
      return libc::EINVAL;
    }

    let mut result = std::ptr::null_mut();
    let code = status(unsafe { HEAP.allocator() }.posix_memalign(&mut result, alignment, size));
    if code == 0 {
      unsafe { out.write(result.cast()) };
    }
    code
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn valloc(size: size_t) -> *mut c_void {
    into_raw(unsafe { HEAP.allocator() }.valloc(size))
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn pvalloc(size: size_t) -> *mut c_void {
    into_raw(unsafe { HEAP.allocator() }.pvalloc(size))
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> size_t {
    unsafe { HEAP.allocator().usable_size(ptr.cast()) }
  }
}

//! Allocation error types.

use thiserror::Error;

/// Errors returned by the heap engine and the allocation façade.
///
/// The C entry points collapse these into a NULL return plus `errno`, or a
/// status code for `posix_memalign`.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AllocError {
  /// Zero-byte requests are refused rather than given a unique pointer.
  #[error("zero-size allocation request")]
  ZeroSize,
  /// No bin from the request's size class upward holds a large enough block.
  #[error("out of memory: no free block can hold {requested} bytes")]
  OutOfMemory {
    /// Block size that was needed, header included.
    requested: usize,
  },
  /// Alignment is not a power of two (or, for `posix_memalign`, not a
  /// multiple of the pointer size).
  #[error("invalid alignment {alignment}")]
  InvalidAlignment {
    /// The rejected alignment.
    alignment: usize,
  },
  /// A size computation overflowed `usize`.
  #[error("allocation size overflows usize")]
  Overflow,
}

/// A broken whole-heap invariant, reported by [`Heap::check`](crate::Heap::check).
///
/// Offsets are relative to the arena base.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HeapCorruption {
  #[error("block at {offset} has invalid size {size}")]
  BadSize { offset: usize, size: usize },
  #[error("block at {offset} runs past the arena end")]
  Overrun { offset: usize },
  #[error("block at {offset} records prev_size {recorded}, actual {actual}")]
  PrevSizeMismatch {
    offset: usize,
    recorded: usize,
    actual: usize,
  },
  #[error("free blocks at {offset} and {next} are adjacent")]
  UncoalescedNeighbours { offset: usize, next: usize },
  #[error("bin {bin} links {offset}, which is not a free block start")]
  StrayNode { bin: usize, offset: usize },
  #[error("bin {bin} links block at {offset} of size {size} from another class")]
  WrongBin {
    bin: usize,
    offset: usize,
    size: usize,
  },
  #[error("bin {bin} is not sorted at {offset}")]
  Unsorted { bin: usize, offset: usize },
  #[error("bin {bin} has a broken back link at {offset}")]
  BrokenLink { bin: usize, offset: usize },
  #[error("{linked} blocks linked in bins, {free} free blocks in the arena")]
  FreeCountMismatch { linked: usize, free: usize },
}

impl AllocError {
  /// The `errno` value a libc allocator reports for this error.
  pub fn errno(&self) -> libc::c_int {
    match self {
      Self::InvalidAlignment { .. } => libc::EINVAL,
      Self::ZeroSize | Self::OutOfMemory { .. } | Self::Overflow => libc::ENOMEM,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn errno_mapping() {
    assert_eq!(AllocError::OutOfMemory { requested: 64 }.errno(), libc::ENOMEM);
    assert_eq!(AllocError::Overflow.errno(), libc::ENOMEM);
    assert_eq!(AllocError::InvalidAlignment { alignment: 3 }.errno(), libc::EINVAL);
  }

  #[test]
  fn display_names_the_request() {
    let err = AllocError::OutOfMemory { requested: 2 << 20 };
    assert_eq!(
      err.to_string(),
      "out of memory: no free block can hold 2097152 bytes"
    );
  }
}

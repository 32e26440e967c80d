//! Heap sizing parameters.
//!
//! Layout constants are fixed at compile time. The capacity of the process
//! arena can be overridden at build time with `SEGALLOC_ARENA_SIZE` (a
//! decimal byte count), e.g.
//!
//! ```text
//! SEGALLOC_ARENA_SIZE=268435456 cargo build --release --features interpose
//! ```

use std::mem;

use crate::error::AllocError;

/// Minimum alignment of every block and payload: two machine words.
pub const MIN_ALIGN: usize = 2 * mem::size_of::<usize>();

/// Number of size-class bins.
pub const BIN_COUNT: usize = 24;

/// Default capacity of the process arena (64 MiB).
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

/// Capacity of the process arena after applying the build-time override.
pub const ARENA_CAPACITY: usize = match option_env!("SEGALLOC_ARENA_SIZE") {
  Some(raw) => parse_capacity(raw),
  None => DEFAULT_CAPACITY,
};

/// Parses a decimal byte count at compile time.
///
/// Anything that is not a plain decimal number aborts the build.
const fn parse_capacity(raw: &str) -> usize {
  let bytes = raw.as_bytes();
  assert!(!bytes.is_empty(), "SEGALLOC_ARENA_SIZE is empty");

  let mut value: usize = 0;
  let mut i = 0;
  while i < bytes.len() {
    let digit = bytes[i];
    assert!(digit.is_ascii_digit(), "SEGALLOC_ARENA_SIZE must be a decimal byte count");
    value = match value.checked_mul(10) {
      Some(v) => match v.checked_add((digit - b'0') as usize) {
        Some(v) => v,
        None => panic!("SEGALLOC_ARENA_SIZE overflows usize"),
      },
      None => panic!("SEGALLOC_ARENA_SIZE overflows usize"),
    };
    i += 1;
  }
  value
}

/// Configuration for a heap instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Total arena capacity in bytes, headers included.
  ///
  /// Default: [`ARENA_CAPACITY`]. Never grows after initialization.
  pub capacity: usize,
}

impl HeapConfig {
  /// Creates a config for an arena of `capacity` bytes.
  pub const fn new(capacity: usize) -> Self {
    Self { capacity }
  }

  /// Rejects capacities that cannot hold a single minimum-size block.
  pub fn validate(&self) -> Result<(), AllocError> {
    if self.capacity < crate::block::MIN_BLOCK_SIZE {
      return Err(AllocError::OutOfMemory {
        requested: crate::block::MIN_BLOCK_SIZE,
      });
    }
    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new(ARENA_CAPACITY)
  }
}

const _: () = assert!(MIN_ALIGN.is_power_of_two());
const _: () = assert!(ARENA_CAPACITY >= 4096, "SEGALLOC_ARENA_SIZE must be at least 4096");

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_capacity_accepts_decimal() {
    assert_eq!(parse_capacity("1048576"), 1 << 20);
    assert_eq!(parse_capacity("0"), 0);
  }

  #[test]
  fn default_config_uses_arena_capacity() {
    assert_eq!(HeapConfig::default().capacity, ARENA_CAPACITY);
  }

  #[test]
  fn validate_rejects_tiny_capacity() {
    assert!(HeapConfig::new(8).validate().is_err());
    assert!(HeapConfig::new(1 << 20).validate().is_ok());
  }

  #[test]
  fn min_align_is_two_words() {
    assert_eq!(MIN_ALIGN, 2 * mem::size_of::<usize>());
  }
}

//! Size-class bins.
//!
//! Bin `i` holds free blocks whose total size lies in
//! `[MIN_BLOCK_SIZE << i, MIN_BLOCK_SIZE << (i + 1))`; the last bin is
//! open-ended. Each bin is a doubly linked list threaded through the
//! payloads of its blocks and kept sorted by ascending size, so the first
//! fit inside a bin is also the best fit inside it.
//!
//! ```text
//!   bins[0]  32..64    ──► [32] ◄─► [48]
//!   bins[1]  64..128   ──► (empty)
//!   bins[2]  128..256  ──► [144] ◄─► [160] ◄─► [240]
//!     ...
//!   bins[23] 2^28..    ──► [whole arena]
//! ```

use std::ptr::NonNull;

use crate::{
  block::{Block, FreeNode, MIN_BLOCK_SIZE},
  config::BIN_COUNT,
};

/// Maps a block size to its size class.
pub fn bin_index(size: usize) -> usize {
  let size = size.max(MIN_BLOCK_SIZE);
  let class = (size.ilog2() - MIN_BLOCK_SIZE.ilog2()) as usize;
  class.min(BIN_COUNT - 1)
}

/// The free-list heads, one per size class.
pub struct Bins {
  heads: [Option<NonNull<FreeNode>>; BIN_COUNT],
}

impl Bins {
  pub const fn new() -> Self {
    Self {
      heads: [None; BIN_COUNT],
    }
  }

  /// Forgets every list.
  pub fn clear(&mut self) {
    self.heads = [None; BIN_COUNT];
  }

  pub fn head(
    &self,
    index: usize,
  ) -> Option<NonNull<FreeNode>> {
    self.heads[index]
  }

  /// Links a free block into its bin, keeping the bin sorted by size.
  ///
  /// # Safety
  ///
  /// `block` must be a free block with an initialized header that is not
  /// linked anywhere.
  pub unsafe fn insert(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let size = block.size();
      let index = bin_index(size);
      let node = block.node();

      let mut prev: Option<NonNull<FreeNode>> = None;
      let mut current = self.heads[index];

      while let Some(cur) = current {
        if Block::from_node(cur).size() >= size {
          break;
        }
        prev = current;
        current = (*cur.as_ptr()).next;
      }

      node.as_ptr().write(FreeNode {
        next: current,
        prev,
      });

      if let Some(next) = current {
        (*next.as_ptr()).prev = Some(node);
      }

      match prev {
        Some(prev) => (*prev.as_ptr()).next = Some(node),
        None => self.heads[index] = Some(node),
      }
    }
  }

  /// Unlinks a free block from its bin.
  ///
  /// # Safety
  ///
  /// `block` must currently be linked into the bin matching its size.
  pub unsafe fn remove(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let node = block.node();
      let FreeNode { next, prev } = node.as_ptr().read();

      match prev {
        Some(prev) => (*prev.as_ptr()).next = next,
        None => self.heads[bin_index(block.size())] = next,
      }

      if let Some(next) = next {
        (*next.as_ptr()).prev = prev;
      }
    }
  }

  /// First free block of at least `needed` bytes, searching the bin that
  /// `needed` maps to and then every higher bin in order.
  ///
  /// # Safety
  ///
  /// Every linked node must belong to a live free block.
  pub unsafe fn find(
    &self,
    needed: usize,
  ) -> Option<Block> {
    unsafe {
      for index in bin_index(needed)..BIN_COUNT {
        let mut current = self.heads[index];
        while let Some(node) = current {
          let block = Block::from_node(node);
          if block.size() >= needed {
            return Some(block);
          }
          current = (*node.as_ptr()).next;
        }
      }
      None
    }
  }

  /// Walks the blocks linked into bin `index`.
  ///
  /// # Safety
  ///
  /// The bin must not be modified while the iterator lives.
  pub unsafe fn iter(
    &self,
    index: usize,
  ) -> BinIter {
    BinIter {
      current: self.head(index),
    }
  }
}

impl Default for Bins {
  fn default() -> Self {
    Self::new()
  }
}

pub struct BinIter {
  current: Option<NonNull<FreeNode>>,
}

impl Iterator for BinIter {
  type Item = Block;

  fn next(&mut self) -> Option<Self::Item> {
    let node = self.current?;
    unsafe {
      self.current = (*node.as_ptr()).next;
      Some(Block::from_node(node))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C, align(16))]
  struct Scratch([u8; 4096]);

  unsafe fn free_block(
    scratch: &mut Scratch,
    offset: usize,
    size: usize,
  ) -> Block {
    unsafe {
      let block = Block::at(NonNull::new_unchecked(scratch.0.as_mut_ptr().add(offset)));
      block.set(size, false);
      block
    }
  }

  #[test]
  fn test_bin_index_classes() {
    assert_eq!(bin_index(0), 0);
    assert_eq!(bin_index(MIN_BLOCK_SIZE), 0);
    assert_eq!(bin_index(2 * MIN_BLOCK_SIZE - 1), 0);
    assert_eq!(bin_index(2 * MIN_BLOCK_SIZE), 1);
    assert_eq!(bin_index(4 * MIN_BLOCK_SIZE), 2);
    assert_eq!(bin_index(usize::MAX), BIN_COUNT - 1);
  }

  #[test]
  fn test_bin_index_is_monotonic() {
    let mut last = 0;
    for size in (MIN_BLOCK_SIZE..1 << 20).step_by(16) {
      let index = bin_index(size);
      assert!(index >= last);
      assert!(size >= MIN_BLOCK_SIZE << index);
      last = index;
    }
  }

  #[test]
  fn test_insert_keeps_bin_sorted() {
    let mut scratch = Scratch([0; 4096]);
    let mut bins = Bins::new();

    unsafe {
      let big = free_block(&mut scratch, 0, 240);
      let small = free_block(&mut scratch, 512, 144);
      let mid = free_block(&mut scratch, 1024, 160);

      bins.insert(big);
      bins.insert(small);
      bins.insert(mid);

      let sizes: Vec<usize> = bins.iter(bin_index(144)).map(|b| b.size()).collect();
      assert_eq!(sizes, vec![144, 160, 240]);

      bins.remove(mid);
      let sizes: Vec<usize> = bins.iter(bin_index(144)).map(|b| b.size()).collect();
      assert_eq!(sizes, vec![144, 240]);

      bins.remove(small);
      assert_eq!(bins.head(bin_index(240)), Some(big.node()));
      bins.remove(big);
      assert_eq!(bins.head(bin_index(240)), None);
    }
  }

  #[test]
  fn test_find_falls_through_to_higher_bins() {
    let mut scratch = Scratch([0; 4096]);
    let mut bins = Bins::new();

    unsafe {
      let small = free_block(&mut scratch, 0, 160);
      let large = free_block(&mut scratch, 1024, 1024);
      bins.insert(small);
      bins.insert(large);

      assert_eq!(bins.find(144), Some(small));
      // Same class as `small` but too big for it.
      assert_eq!(bins.find(192), Some(large));
      assert_eq!(bins.find(1024), Some(large));
      assert_eq!(bins.find(1040), None);
    }
  }

  #[test]
  fn test_clear_empties_every_bin() {
    let mut scratch = Scratch([0; 4096]);
    let mut bins = Bins::new();

    unsafe {
      bins.insert(free_block(&mut scratch, 0, 64));
      bins.clear();
      assert!((0..BIN_COUNT).all(|i| bins.head(i).is_none()));
    }
  }
}

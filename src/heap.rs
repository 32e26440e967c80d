//! The heap engine: allocation, release, splitting and coalescing over a
//! single fixed arena.
//!
//! ```text
//!   arena:
//!   ┌────────┬──────────────┬────────┬─────────────────────────────────┐
//!   │ A 64   │ F 144        │ A 1040 │ F (rest of the arena)           │
//!   └────────┴──────────────┴────────┴─────────────────────────────────┘
//!     blocks tile the arena; no two free blocks are ever adjacent
//!
//!   alloc(100): needed = align(100) + header = 128
//!     bins[bin_index(128)] → ... → first block with size >= 128
//!     F 144 is found; 144 - 128 < MIN_BLOCK_SIZE so it is taken whole
//!
//!   release(A 1040): merges with the free block after it and is relinked
//!   into the bin for the merged size
//! ```

use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
  align::checked_align_to,
  arena::Arena,
  bin::{Bins, bin_index},
  block::{Block, HEADER_SIZE, MIN_BLOCK_SIZE},
  config::{BIN_COUNT, HeapConfig, MIN_ALIGN},
  error::{AllocError, HeapCorruption},
};

/// Accounting snapshot of a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Arena capacity in bytes.
  pub capacity: usize,
  /// Bytes held by free blocks, headers included.
  pub free_bytes: usize,
  pub free_blocks: usize,
  /// Bytes held by allocated blocks, headers included.
  pub allocated_bytes: usize,
  pub allocated_blocks: usize,
  /// Size of the largest free block, header included.
  pub largest_free: usize,
}

/// One block as seen by [`Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the block header from the arena base.
  pub offset: usize,
  /// Total size, header included.
  pub size: usize,
  pub allocated: bool,
}

/// A segregated free-list heap over one arena.
///
/// Not thread-safe: every call takes `&mut self`, and a process-wide
/// instance must be serialized by its owner.
pub struct Heap<'a> {
  arena: Arena<'a>,
  bins: Bins,
  initialized: bool,
}

impl<'a> Heap<'a> {
  /// Creates a heap over `arena`. The arena is not touched until
  /// [`init`](Self::init).
  pub fn new(arena: Arena<'a>) -> Self {
    Self {
      arena,
      bins: Bins::new(),
      initialized: false,
    }
  }

  /// Turns the whole arena into one free block.
  ///
  /// Returns `true` only for the call that did the work; later calls are
  /// no-ops. An arena too small for a single block stays uninitialized and
  /// every allocation from it fails.
  pub fn init(&mut self) -> bool {
    if self.initialized {
      return false;
    }

    let capacity = self.arena.capacity();
    if let Err(err) = HeapConfig::new(capacity).validate() {
      warn!("arena of {capacity} bytes cannot hold a block: {err}");
      return false;
    }

    self.bins.clear();
    unsafe {
      let block = Block::at(self.arena.base());
      block.set_prev_size(0);
      block.set(capacity, false);
      self.bins.insert(block);
    }
    self.initialized = true;

    debug!(
      "heap initialized: base = {:p}, capacity = {}, bin = {}",
      self.arena.base(),
      capacity,
      bin_index(capacity)
    );
    true
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  pub fn arena(&self) -> &Arena<'a> {
    &self.arena
  }

  pub fn capacity(&self) -> usize {
    self.arena.capacity()
  }

  /// Allocates a block with room for `size` bytes and returns its payload.
  ///
  /// The search starts at the size class of the needed block and moves up
  /// through every higher class. A found block is split when the leftover
  /// can hold a block of its own; otherwise it is handed out whole.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let needed = checked_align_to(size, MIN_ALIGN)
      .and_then(|aligned| aligned.checked_add(HEADER_SIZE))
      .ok_or(AllocError::Overflow)?
      .max(MIN_BLOCK_SIZE);

    let Some(block) = (unsafe { self.bins.find(needed) }) else {
      warn!("alloc({size}) failed: no free block of {needed} bytes");
      return Err(AllocError::OutOfMemory { requested: needed });
    };

    unsafe {
      self.bins.remove(block);

      let total = block.size();
      if total - needed >= MIN_BLOCK_SIZE {
        block.set(needed, true);

        let rest = Block::at(NonNull::new_unchecked(block.addr().as_ptr().add(needed)));
        rest.set_prev_size(needed);
        rest.set(total - needed, false);
        self.link_successor(rest);
        self.bins.insert(rest);

        trace!(
          "split {:p}: {} -> {} + {}",
          block.addr(),
          total,
          needed,
          total - needed
        );
      } else {
        block.set(total, true);
      }

      trace!("alloc({}) = {:p}, block size = {}", size, block.payload(), block.size());
      Ok(block.payload())
    }
  }

  /// Returns a block to the heap, merging it with free neighbours.
  ///
  /// Null is a no-op. Pointers outside the arena are ignored.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a pointer returned by [`alloc`](Self::alloc)
  /// on this heap that has not been released since.
  pub unsafe fn release(
    &mut self,
    payload: *mut u8,
  ) {
    let Some(payload) = NonNull::new(payload) else {
      return;
    };
    let Some(block) = self.block_of(payload) else {
      warn!("release({:p}): pointer outside the arena", payload);
      return;
    };

    unsafe {
      debug_assert!(block.is_allocated(), "release of a free block");

      let mut start = block;
      let mut size = block.size();

      if let Some(next) = self.next_of(block) {
        if !next.is_allocated() {
          self.bins.remove(next);
          size += next.size();
          trace!("coalesce {:p} with next {:p}", block.addr(), next.addr());
        }
      }

      if let Some(prev) = self.prev_of(block) {
        if !prev.is_allocated() {
          self.bins.remove(prev);
          size += prev.size();
          start = prev;
          trace!("coalesce {:p} with prev {:p}", block.addr(), prev.addr());
        }
      }

      start.set(size, false);
      self.link_successor(start);
      self.bins.insert(start);

      trace!("release({:p}): free block {:p} of {}", payload, start.addr(), size);
    }
  }

  /// Maps a payload pointer to its block header.
  ///
  /// Fails for pointers outside the arena or off the block grid; it does
  /// not check that a header actually lives there.
  pub(crate) fn block_of(
    &self,
    payload: NonNull<u8>,
  ) -> Option<Block> {
    if !self.initialized || !self.arena.contains(payload.as_ptr()) {
      return None;
    }

    let offset = self.arena.offset_of(payload.as_ptr());
    if offset < HEADER_SIZE || offset % MIN_ALIGN != 0 {
      return None;
    }

    Some(unsafe { Block::from_payload(payload) })
  }

  /// Bytes the caller may use at `payload`, or 0 for foreign pointers.
  ///
  /// # Safety
  ///
  /// `payload` must be a live pointer returned by [`alloc`](Self::alloc).
  pub unsafe fn capacity_of(
    &self,
    payload: NonNull<u8>,
  ) -> usize {
    match self.block_of(payload) {
      Some(block) => unsafe { block.capacity() },
      None => 0,
    }
  }

  /// Whether `ptr` points into this heap's arena.
  pub fn contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.arena.contains(ptr)
  }

  /// Walks every block in address order.
  pub fn blocks(&self) -> Blocks<'_, 'a> {
    Blocks {
      arena: &self.arena,
      offset: if self.initialized { 0 } else { self.arena.capacity() },
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      capacity: self.arena.capacity(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      if block.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += block.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += block.size;
        stats.largest_free = stats.largest_free.max(block.size);
      }
    }

    stats
  }

  /// Verifies the whole-heap invariants: blocks tile the arena, boundary
  /// sizes agree, no two free blocks touch, and every free block is linked
  /// exactly once into the sorted bin of its class.
  ///
  /// Intended for tests and debugging; it walks every bin against the whole
  /// arena.
  pub fn check(&self) -> Result<(), HeapCorruption> {
    if !self.initialized {
      return Ok(());
    }

    let capacity = self.arena.capacity();
    let mut offset = 0;
    let mut prev: Option<BlockInfo> = None;
    let mut free = 0;

    while offset < capacity {
      let block = unsafe { Block::at(self.arena.at(offset)) };
      let (size, allocated, recorded) =
        unsafe { (block.size(), block.is_allocated(), block.prev_size()) };

      if size < MIN_BLOCK_SIZE || size % MIN_ALIGN != 0 {
        return Err(HeapCorruption::BadSize { offset, size });
      }
      if size > capacity - offset {
        return Err(HeapCorruption::Overrun { offset });
      }

      let actual = prev.map_or(0, |p| p.size);
      if recorded != actual {
        return Err(HeapCorruption::PrevSizeMismatch {
          offset,
          recorded,
          actual,
        });
      }

      if let Some(p) = prev {
        if !p.allocated && !allocated {
          return Err(HeapCorruption::UncoalescedNeighbours {
            offset: p.offset,
            next: offset,
          });
        }
      }

      if !allocated {
        free += 1;
      }
      prev = Some(BlockInfo {
        offset,
        size,
        allocated,
      });
      offset += size;
    }

    let mut linked = 0;
    for bin in 0..BIN_COUNT {
      let mut last_size = 0;
      let mut expected_prev = None;

      for block in unsafe { self.bins.iter(bin) } {
        let addr = block.addr().as_ptr();
        if !self.arena.contains(addr) {
          return Err(HeapCorruption::StrayNode {
            bin,
            offset: addr as usize,
          });
        }

        let offset = self.arena.offset_of(addr);
        if !self.is_free_block_start(offset) {
          return Err(HeapCorruption::StrayNode { bin, offset });
        }

        let size = unsafe { block.size() };
        if bin_index(size) != bin {
          return Err(HeapCorruption::WrongBin { bin, offset, size });
        }
        if size < last_size {
          return Err(HeapCorruption::Unsorted { bin, offset });
        }
        if unsafe { (*block.node().as_ptr()).prev } != expected_prev {
          return Err(HeapCorruption::BrokenLink { bin, offset });
        }

        linked += 1;
        if linked > free {
          return Err(HeapCorruption::FreeCountMismatch { linked, free });
        }
        last_size = size;
        expected_prev = Some(block.node());
      }
    }

    if linked != free {
      return Err(HeapCorruption::FreeCountMismatch { linked, free });
    }
    Ok(())
  }

  fn is_free_block_start(
    &self,
    offset: usize,
  ) -> bool {
    self
      .blocks()
      .take_while(|b| b.offset <= offset)
      .any(|b| b.offset == offset && !b.allocated)
  }

  /// Block physically after `block`, if it is not the last one.
  unsafe fn next_of(
    &self,
    block: Block,
  ) -> Option<Block> {
    unsafe {
      let end = block.end();
      if end as usize >= self.arena.end() as usize {
        None
      } else {
        Some(Block::at(NonNull::new_unchecked(end)))
      }
    }
  }

  /// Block physically before `block`, if it is not the first one.
  unsafe fn prev_of(
    &self,
    block: Block,
  ) -> Option<Block> {
    unsafe {
      if block.addr() == self.arena.base() {
        None
      } else {
        let addr = block.addr().as_ptr().sub(block.prev_size());
        Some(Block::at(NonNull::new_unchecked(addr)))
      }
    }
  }

  /// Records `block`'s size in the boundary field of its successor.
  unsafe fn link_successor(
    &self,
    block: Block,
  ) {
    unsafe {
      if let Some(next) = self.next_of(block) {
        next.set_prev_size(block.size());
      }
    }
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'h, 'a> {
  arena: &'h Arena<'a>,
  offset: usize,
}

impl Iterator for Blocks<'_, '_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let capacity = self.arena.capacity();
    if self.offset >= capacity {
      return None;
    }

    let block = unsafe { Block::at(self.arena.at(self.offset)) };
    let (size, allocated) = unsafe { (block.size(), block.is_allocated()) };
    let info = BlockInfo {
      offset: self.offset,
      size,
      allocated,
    };

    // A zero size would never advance; stop the walk instead.
    self.offset = if size == 0 { capacity } else { self.offset.saturating_add(size) };
    Some(info)
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn region(capacity: usize) -> Vec<u8> {
    vec![0u8; capacity + MIN_ALIGN]
  }

  fn heap(region: &mut [u8]) -> Heap<'_> {
    let mut heap = Heap::new(Arena::new(region));
    assert!(heap.init());
    heap
  }

  #[test]
  fn test_init_creates_one_free_block() {
    let mut region = region(1 << 16);
    let mut heap = heap(&mut region);
    let capacity = heap.capacity();

    assert!(capacity >= 1 << 16);
    assert_eq!(
      heap.blocks().collect::<Vec<_>>(),
      vec![BlockInfo {
        offset: 0,
        size: capacity,
        allocated: false
      }]
    );
    assert!(!heap.init());
    assert_eq!(heap.stats().free_blocks, 1);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_uninitialized_heap_fails_allocation() {
    let mut region = region(4096);
    let mut heap = Heap::new(Arena::new(&mut region));

    assert!(!heap.is_initialized());
    assert!(matches!(heap.alloc(16), Err(AllocError::OutOfMemory { .. })));
    assert_eq!(heap.blocks().count(), 0);
  }

  #[test]
  fn test_tiny_arena_stays_uninitialized() {
    let mut region = [0u8; MIN_BLOCK_SIZE - 1];
    let mut heap = Heap::new(Arena::new(&mut region));
    assert!(!heap.init());
    assert!(heap.alloc(1).is_err());
  }

  #[test]
  fn test_zero_size_fails() {
    let mut region = region(4096);
    let mut heap = heap(&mut region);
    assert_eq!(heap.alloc(0), Err(AllocError::ZeroSize));
  }

  #[test]
  fn test_overflowing_size_fails() {
    let mut region = region(4096);
    let mut heap = heap(&mut region);
    assert_eq!(heap.alloc(usize::MAX), Err(AllocError::Overflow));
    assert!(matches!(
      heap.alloc(usize::MAX - 4 * MIN_ALIGN),
      Err(AllocError::OutOfMemory { .. })
    ));
  }

  #[test]
  fn test_alloc_is_writable_and_release_restores_state() {
    let mut region = region(1 << 16);
    let mut heap = heap(&mut region);
    let before = heap.stats();

    for size in [1, 15, 16, 17, 100, 1000, 4096, 30000] {
      let ptr = heap.alloc(size).unwrap();
      assert_eq!(ptr.as_ptr() as usize % MIN_ALIGN, 0);

      let capacity = unsafe { heap.capacity_of(ptr) };
      assert!(capacity >= size);
      unsafe { ptr.as_ptr().write_bytes(0xAB, capacity) };
      assert_eq!(heap.check(), Ok(()));

      unsafe { heap.release(ptr.as_ptr()) };
      assert_eq!(heap.stats(), before);
      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_reverse_release_coalesces_whole_arena() {
    let mut region = region(1 << 16);
    let mut heap = heap(&mut region);
    let capacity = heap.capacity();

    let ptrs: Vec<_> = (0..32).map(|_| heap.alloc(256).unwrap()).collect();
    assert_eq!(heap.stats().allocated_blocks, 32);

    for ptr in ptrs.into_iter().rev() {
      unsafe { heap.release(ptr.as_ptr()) };
      assert_eq!(heap.check(), Ok(()));
    }

    assert_eq!(
      heap.blocks().collect::<Vec<_>>(),
      vec![BlockInfo {
        offset: 0,
        size: capacity,
        allocated: false
      }]
    );
  }

  #[test]
  fn test_release_merges_both_neighbours() {
    let mut region = region(1 << 14);
    let mut heap = heap(&mut region);

    let a = heap.alloc(100).unwrap();
    let b = heap.alloc(100).unwrap();
    let c = heap.alloc(100).unwrap();
    let d = heap.alloc(100).unwrap();

    unsafe {
      heap.release(a.as_ptr());
      heap.release(c.as_ptr());
      assert_eq!(heap.stats().free_blocks, 3);

      heap.release(b.as_ptr());
      assert_eq!(heap.check(), Ok(()));

      let blocks: Vec<_> = heap.blocks().collect();
      assert_eq!(blocks.len(), 3);
      assert!(!blocks[0].allocated);
      assert_eq!(blocks[0].size, 3 * 128);
      assert!(blocks[1].allocated);

      heap.release(d.as_ptr());
    }
    assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn test_small_leftover_is_not_split() {
    let mut region = region(4096);
    let mut heap = heap(&mut region);
    let capacity = heap.capacity();

    // Leaves MIN_ALIGN bytes, too few for a block of their own.
    let size = capacity - HEADER_SIZE - MIN_ALIGN;
    let ptr = heap.alloc(size).unwrap();

    assert_eq!(unsafe { heap.capacity_of(ptr) }, capacity - HEADER_SIZE);
    assert_eq!(heap.stats().free_blocks, 0);
    assert!(heap.alloc(1).is_err());

    unsafe { heap.release(ptr.as_ptr()) };
    assert_eq!(heap.stats().free_bytes, capacity);
  }

  #[test]
  fn test_whole_arena_scenario() {
    let mut region = region(1 << 20);
    let mut heap = heap(&mut region);

    for _ in 0..100 {
      assert!(heap.alloc(1024).is_ok());
    }
    assert_eq!(
      heap.alloc(2 << 20),
      Err(AllocError::OutOfMemory {
        requested: (2 << 20) + HEADER_SIZE
      })
    );
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_freed_block_is_reused() {
    let mut region = region(1 << 16);
    let mut heap = heap(&mut region);

    let first = heap.alloc(64).unwrap();
    unsafe { heap.release(first.as_ptr()) };
    let second = heap.alloc(64).unwrap();

    assert_eq!(first, second);
  }

  #[test]
  fn test_best_fit_within_class() {
    let mut region = region(1 << 16);
    let mut heap = heap(&mut region);

    // Two holes in the same class, larger one first in address order.
    let big = heap.alloc(224).unwrap();
    let _fence1 = heap.alloc(16).unwrap();
    let small = heap.alloc(144).unwrap();
    let _fence2 = heap.alloc(16).unwrap();

    unsafe {
      heap.release(big.as_ptr());
      heap.release(small.as_ptr());
    }

    assert_eq!(heap.alloc(140).unwrap(), small);
  }

  #[test]
  fn test_release_null_and_foreign_pointers() {
    let mut region = region(4096);
    let mut heap = heap(&mut region);
    let before = heap.stats();

    let mut outside = [0u8; 64];
    unsafe {
      heap.release(std::ptr::null_mut());
      heap.release(outside.as_mut_ptr().add(MIN_ALIGN));
    }

    assert_eq!(heap.stats(), before);
  }

  #[test]
  fn test_check_reports_unlinked_free_block() {
    let mut region = region(4096);
    let mut heap = heap(&mut region);

    let _a = heap.alloc(32).unwrap();
    let b = heap.alloc(32).unwrap();
    let _c = heap.alloc(32).unwrap();

    unsafe {
      let block = heap.block_of(b).unwrap();
      block.set(block.size(), false);
    }

    assert_eq!(
      heap.check(),
      Err(HeapCorruption::FreeCountMismatch { linked: 1, free: 2 })
    );
  }

  #[derive(Clone, Debug)]
  enum Op {
    Alloc(usize),
    Release(usize),
  }

  fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
      3 => (1usize..3000).prop_map(Op::Alloc),
      2 => any::<usize>().prop_map(Op::Release),
    ]
  }

  proptest! {
    #[test]
    fn invariants_hold_under_random_traffic(ops in prop::collection::vec(arb_op(), 1..120)) {
      let mut region = region(1 << 16);
      let mut heap = heap(&mut region);
      let capacity = heap.capacity();
      let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

      for (step, op) in ops.into_iter().enumerate() {
        match op {
          Op::Alloc(size) => {
            if let Ok(ptr) = heap.alloc(size) {
              let fill = step as u8;
              unsafe { ptr.as_ptr().write_bytes(fill, size) };
              live.push((ptr, size, fill));
            }
          }
          Op::Release(pick) => {
            if !live.is_empty() {
              let (ptr, size, fill) = live.swap_remove(pick % live.len());
              let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
              prop_assert!(bytes.iter().all(|&b| b == fill));
              unsafe { heap.release(ptr.as_ptr()) };
            }
          }
        }
        prop_assert_eq!(heap.check(), Ok(()));
      }

      for (ptr, _, _) in live.drain(..) {
        unsafe { heap.release(ptr.as_ptr()) };
      }
      let stats = heap.stats();
      prop_assert_eq!(stats.free_blocks, 1);
      prop_assert_eq!(stats.free_bytes, capacity);
    }
  }
}

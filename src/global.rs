//! The process-wide heap behind the C entry points.
//!
//! The arena lives in `.bss` and the allocator over it is built on the first
//! call that needs it, guarded by an atomic flag. Nothing here locks: the
//! caller must serialize every access.

use std::{
  cell::UnsafeCell,
  sync::atomic::{AtomicBool, Ordering},
};

use crate::{arena::StaticRegion, config::ARENA_CAPACITY, facade::Allocator};

/// A statically allocated arena plus the allocator that manages it.
pub struct GlobalHeap<const N: usize> {
  region: StaticRegion<N>,
  allocator: UnsafeCell<Option<Allocator<'static>>>,
  ready: AtomicBool,
}

unsafe impl<const N: usize> Sync for GlobalHeap<N> {}

impl<const N: usize> GlobalHeap<N> {
  pub const fn new() -> Self {
    Self {
      region: StaticRegion::new(),
      allocator: UnsafeCell::new(None),
      ready: AtomicBool::new(false),
    }
  }

  /// Whether the heap has been set up.
  pub fn is_ready(&self) -> bool {
    self.ready.load(Ordering::Acquire)
  }

  /// Builds and initializes the allocator once; later calls do nothing.
  ///
  /// # Safety
  ///
  /// No other access to this heap may run concurrently.
  pub unsafe fn ensure_init(&'static self) {
    if self.ready.load(Ordering::Acquire) {
      return;
    }

    unsafe { self.slot().init() };
    self.ready.store(true, Ordering::Release);
  }

  /// The allocator, initialized on first use.
  ///
  /// # Safety
  ///
  /// No other access to this heap may run concurrently, and the returned
  /// reference must be dropped before the next call.
  #[allow(clippy::mut_from_ref)]
  pub unsafe fn allocator(&'static self) -> &'static mut Allocator<'static> {
    unsafe {
      self.ensure_init();
      self.slot()
    }
  }

  /// The allocator, built over the region the first time it is needed.
  #[allow(clippy::mut_from_ref)]
  unsafe fn slot(&'static self) -> &'static mut Allocator<'static> {
    unsafe {
      (*self.allocator.get()).get_or_insert_with(|| Allocator::new(self.region.arena()))
    }
  }
}

impl<const N: usize> Default for GlobalHeap<N> {
  fn default() -> Self {
    Self::new()
  }
}

/// The heap every exported C symbol uses.
pub static HEAP: GlobalHeap<ARENA_CAPACITY> = GlobalHeap::new();

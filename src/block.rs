use std::{mem, ptr::NonNull};

use crate::config::MIN_ALIGN;

/// Tag bit: the block is handed out to a caller.
pub const ALLOCATED: usize = 0b01;

/// Tag bit: the tag word belongs to an aligned-allocation wrapper, not to a
/// block header.
pub const ALIGNED: usize = 0b10;

const FLAGS: usize = ALLOCATED | ALIGNED;

/// Metadata at the start of every block.
///
/// ```text
///   ┌────────────────────┬──────────────────────────┬───────────────────┐
///   │ prev_size          │ tag                      │ payload ...       │
///   │ size of the block  │ size of this block       │                   │
///   │ physically before  │ | ALLOCATED              │ (FreeNode while   │
///   │ (0 for the first)  │                          │  the block free)  │
///   └────────────────────┴──────────────────────────┴───────────────────┘
///                                                   ▲
///                                                   └── payload pointer
/// ```
///
/// Sizes include the header and are multiples of [`MIN_ALIGN`], which keeps
/// the two flag bits of `tag` clear.
#[repr(C)]
pub struct Header {
  pub prev_size: usize,
  pub tag: usize,
}

/// Free-list links, stored in the payload of a free block.
#[repr(C)]
pub struct FreeNode {
  pub next: Option<NonNull<FreeNode>>,
  pub prev: Option<NonNull<FreeNode>>,
}

/// Record written just below a pointer returned by the aligned-allocation
/// family. Its `tag` sits at the same offset from the payload as a header's
/// `tag`, so the word below any pointer handed out is always a tag.
#[repr(C)]
pub struct Wrapper {
  pub underlying: *mut u8,
  pub tag: usize,
}

pub const HEADER_SIZE: usize = mem::size_of::<Header>();

pub const WRAPPER_SIZE: usize = mem::size_of::<Wrapper>();

/// Smallest block that can hold its own free-list links.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + mem::size_of::<FreeNode>();

const _: () = assert!(HEADER_SIZE == MIN_ALIGN);
const _: () = assert!(WRAPPER_SIZE == HEADER_SIZE);
const _: () = assert!(mem::offset_of!(Header, tag) == mem::offset_of!(Wrapper, tag));
const _: () = assert!(MIN_BLOCK_SIZE.is_power_of_two());
const _: () = assert!(MIN_BLOCK_SIZE % MIN_ALIGN == 0);

/// What a pointer handed out by the façade refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
  /// The pointer is a block payload; its header sits right below it.
  Plain,
  /// The pointer came from the aligned-allocation family and lives inside
  /// the payload of `underlying`.
  Aligned { underlying: NonNull<u8> },
}

/// Decodes the tag word below a pointer handed out by the façade.
///
/// # Safety
///
/// `payload` must be a live pointer returned by `malloc` or by the
/// aligned-allocation family.
pub unsafe fn kind_of(payload: NonNull<u8>) -> BlockKind {
  unsafe {
    let wrapper = payload.as_ptr().sub(WRAPPER_SIZE).cast::<Wrapper>();
    let tag = (*wrapper).tag;

    if tag & ALIGNED != 0 {
      BlockKind::Aligned {
        underlying: NonNull::new_unchecked((*wrapper).underlying),
      }
    } else {
      BlockKind::Plain
    }
  }
}

/// Writes an aligned-allocation wrapper just below `aligned`.
///
/// # Safety
///
/// The [`WRAPPER_SIZE`] bytes below `aligned` must lie inside the payload of
/// the live block whose payload is `underlying`.
pub unsafe fn write_wrapper(
  aligned: NonNull<u8>,
  underlying: NonNull<u8>,
) {
  unsafe {
    aligned
      .as_ptr()
      .sub(WRAPPER_SIZE)
      .cast::<Wrapper>()
      .write(Wrapper {
        underlying: underlying.as_ptr(),
        tag: ALIGNED | ALLOCATED,
      });
  }
}

/// Clears the wrapper below `aligned` so a stale copy cannot be decoded.
///
/// # Safety
///
/// Same as [`write_wrapper`].
pub unsafe fn erase_wrapper(aligned: NonNull<u8>) {
  unsafe {
    aligned
      .as_ptr()
      .sub(WRAPPER_SIZE)
      .cast::<Wrapper>()
      .write(Wrapper {
        underlying: std::ptr::null_mut(),
        tag: 0,
      });
  }
}

/// Handle to a block header inside an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block(NonNull<Header>);

impl Block {
  /// # Safety
  ///
  /// `addr` must point at a block boundary inside an arena.
  pub unsafe fn at(addr: NonNull<u8>) -> Self {
    Self(addr.cast())
  }

  /// # Safety
  ///
  /// `payload` must be the payload pointer of a block.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    unsafe { Self(NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast()) }
  }

  /// # Safety
  ///
  /// `node` must be the free-list node of a free block.
  pub unsafe fn from_node(node: NonNull<FreeNode>) -> Self {
    unsafe { Self::from_payload(node.cast()) }
  }

  pub fn addr(self) -> NonNull<u8> {
    self.0.cast()
  }

  pub fn payload(self) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(self.addr().as_ptr().add(HEADER_SIZE)) }
  }

  pub fn node(self) -> NonNull<FreeNode> {
    self.payload().cast()
  }

  /// Total size in bytes, header included.
  ///
  /// # Safety
  ///
  /// The header must be initialized.
  pub unsafe fn size(self) -> usize {
    unsafe { (*self.0.as_ptr()).tag & !FLAGS }
  }

  /// Bytes available to the caller.
  ///
  /// # Safety
  ///
  /// The header must be initialized.
  pub unsafe fn capacity(self) -> usize {
    unsafe { self.size() - HEADER_SIZE }
  }

  /// # Safety
  ///
  /// The header must be initialized.
  pub unsafe fn is_allocated(self) -> bool {
    unsafe { (*self.0.as_ptr()).tag & ALLOCATED != 0 }
  }

  /// # Safety
  ///
  /// The header must be writable; `size` must be a multiple of
  /// [`MIN_ALIGN`].
  pub unsafe fn set(
    self,
    size: usize,
    allocated: bool,
  ) {
    debug_assert_eq!(size % MIN_ALIGN, 0);
    let flags = if allocated { ALLOCATED } else { 0 };
    unsafe { (*self.0.as_ptr()).tag = size | flags };
  }

  /// # Safety
  ///
  /// The header must be initialized.
  pub unsafe fn prev_size(self) -> usize {
    unsafe { (*self.0.as_ptr()).prev_size }
  }

  /// # Safety
  ///
  /// The header must be writable.
  pub unsafe fn set_prev_size(
    self,
    prev_size: usize,
  ) {
    unsafe { (*self.0.as_ptr()).prev_size = prev_size };
  }

  /// Address right after this block.
  ///
  /// # Safety
  ///
  /// The header must be initialized.
  pub unsafe fn end(self) -> *mut u8 {
    unsafe { self.addr().as_ptr().add(self.size()) }
  }
}

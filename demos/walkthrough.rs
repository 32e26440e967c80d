use std::{io::Read, ptr};

use segalloc::{Allocator, Arena, Heap};

/// Waits until the user presses ENTER, when run with `--step`.
/// Useful for following the block layout one call at a time.
fn block_until_enter_pressed(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints every block of the heap in address order.
fn print_blocks(
  label: &str,
  heap: &Heap<'_>,
) {
  let stats = heap.stats();
  println!(
    "[{}] {} allocated / {} free blocks, {} free bytes, largest free = {}",
    label, stats.allocated_blocks, stats.free_blocks, stats.free_bytes, stats.largest_free,
  );
  for block in heap.blocks() {
    println!(
      "    {:>8} +{:<8} {}",
      block.offset,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn main() {
  let step = std::env::args().any(|arg| arg == "--step");

  // A 64 KiB arena. The allocator only ever uses these bytes.
  let mut region = vec![0u8; 64 * 1024];
  let mut allocator = Allocator::new(Arena::new(&mut region));

  allocator.init();
  print_blocks("start", allocator.heap());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) Allocate space for a u32. The whole arena is split in two.
  // --------------------------------------------------------------------
  let first_block = allocator.malloc(4).unwrap();
  println!("\n[1] malloc(4) = {:?}", first_block);

  let first_ptr = first_block.cast::<u32>();
  unsafe { first_ptr.write(0xDEADBEEF) };
  println!("[1] Value written to first_block = 0x{:X}", unsafe { first_ptr.read() });
  print_blocks("1", allocator.heap());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) calloc 12 bytes: comes back zeroed.
  // --------------------------------------------------------------------
  let second_block = allocator.calloc(12, 1).unwrap();
  println!("\n[2] calloc(12, 1) = {:?}", second_block);
  unsafe { ptr::write_bytes(second_block.as_ptr(), 0xAB, 12) };
  println!("[2] Initialized second block with 0xAB");
  print_blocks("2", allocator.heap());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) Over-aligned allocation through a wrapper record.
  // --------------------------------------------------------------------
  let third_block = allocator.aligned_alloc(256, 64).unwrap();
  let addr_third = third_block.as_ptr() as usize;
  println!("\n[3] aligned_alloc(256, 64) = {:?}", third_block);
  println!("[3] Address = {:#X}, addr % 256 = {}", addr_third, addr_third % 256);
  print_blocks("3", allocator.heap());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Free the first block, then ask for 2 bytes: the hole is reused.
  // --------------------------------------------------------------------
  unsafe { allocator.free(first_block.as_ptr()) };
  println!("\n[4] Freed first_block at {:?}", first_block);

  let fifth_block = allocator.malloc(2).unwrap();
  println!(
    "[4] fifth_block == first_block? {}",
    if fifth_block == first_block {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  print_blocks("4", allocator.heap());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Grow the second block with realloc: contents move.
  // --------------------------------------------------------------------
  let grown = unsafe { allocator.realloc(second_block.as_ptr(), 1000) }
    .unwrap()
    .unwrap();
  println!("\n[5] realloc(second_block, 1000) = {:?}", grown);
  println!("[5] First byte after the move = 0x{:X}", unsafe { grown.read() });
  print_blocks("5", allocator.heap());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 6) A request larger than the arena fails instead of growing it.
  // --------------------------------------------------------------------
  match allocator.malloc(128 * 1024) {
    Ok(ptr) => println!("\n[6] Unexpected success: {:?}", ptr),
    Err(err) => println!("\n[6] malloc(128 KiB) failed: {err}"),
  }
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 7) Free everything: the arena coalesces back into one block.
  // --------------------------------------------------------------------
  unsafe {
    allocator.free(third_block.as_ptr());
    allocator.free(fifth_block.as_ptr());
    allocator.free(grown.as_ptr());
  }
  print_blocks("end", allocator.heap());
}

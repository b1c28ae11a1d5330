use binalloc::{BinnedAllocator, MemArena, Trace, replay};

/// The workload replayed at the end of the walkthrough: interleaved
/// allocation, growth, and release across four slots.
const DEMO_TRACE: &str = "\
ALLOC 0 512
ALLOC 1 128
ALLOC 2 24
FREE 1
ALLOC 3 96
REALLOC 0 2048
ALLOC 1 64
FREE 2
REALLOC 3 1024
FREE 0
FREE 1
FREE 3
";

/// Prints where the logical tail and the physical break currently sit.
fn print_heap_state(
  label: &str,
  heap: &BinnedAllocator,
) {
  println!(
    "[{}] heap_end = lo + {}, physical footprint = {} bytes",
    label,
    heap.heap_end() as usize - heap.heap_lo() as usize,
    heap.heap_size(),
  );
}

fn main() {
  // A 4 MiB arena is plenty for the walkthrough.
  let arena = MemArena::new(1 << 22).expect("arena mapping");
  let mut heap = BinnedAllocator::new(arena).expect("heap init");

  unsafe {
    print_heap_state("start", &heap);

    // --------------------------------------------------------------------
    // 1) Two allocations grow the tail.
    // --------------------------------------------------------------------
    let a = heap.malloc(100);
    let b = heap.malloc(100);
    println!("\n[1] malloc(100) twice -> {:?}, {:?}", a, b);
    print_heap_state("after growth", &heap);

    // --------------------------------------------------------------------
    // 2) Freeing the first block parks it in a size-class bin; a
    //    same-class request takes it straight back.
    // --------------------------------------------------------------------
    heap.free(a);
    let c = heap.malloc(100);
    println!(
      "\n[2] free(a); malloc(100) -> {:?} ({})",
      c,
      if c == a {
        "reused the freed block"
      } else {
        "allocated somewhere else"
      }
    );

    // --------------------------------------------------------------------
    // 3) Freeing the newest block retreats the logical tail instead of
    //    touching a bin, so the space is reused without arena traffic.
    // --------------------------------------------------------------------
    let big = heap.malloc(64 * 1024);
    print_heap_state("after 64 KiB alloc", &heap);
    heap.free(big);
    print_heap_state("after its free (tail trimmed)", &heap);

    // --------------------------------------------------------------------
    // 4) A realloc of the block at the tail stretches in place.
    // --------------------------------------------------------------------
    let d = heap.malloc(1000);
    let e = heap.realloc(d, 2000);
    println!(
      "\n[4] realloc(malloc(1000), 2000) -> {:?} ({})",
      e,
      if e == d { "extended in place" } else { "moved" }
    );

    heap.free(b);
    heap.free(c);
    heap.free(e);
  }

  match heap.check() {
    Ok(()) => println!("\nchecker verdict: ok"),
    Err(err) => println!("\nchecker verdict: {err}"),
  }

  // ----------------------------------------------------------------------
  // 5) Replay a whole trace through the validator, which checks
  //    alignment, heap placement, overlap, and realloc copies.
  // ----------------------------------------------------------------------
  let trace: Trace = DEMO_TRACE.parse().expect("trace parses");
  match replay(&mut heap, &trace) {
    Ok(()) => println!("replay verdict: ok ({} records)", trace.ops().len()),
    Err(err) => println!("replay verdict: {err}"),
  }
}

//! # Binned Heap Allocator
//!
//! The core allocator: a block-structured heap grown at the tail of a
//! [`MemArena`], with freed blocks recycled through the segregated
//! [`FreeList`].
//!
//! ## Heap Layout
//!
//! The arena is padded by one header width at initialization, then tiled
//! with adjacent blocks up to the logical tail `heap_end`:
//!
//! ```text
//!    lo()                                    heap_end      physical break
//!     │                                          │                │
//!     ▼                                          ▼                ▼
//!   ┌────┬───────────┬────────┬─────────────────┬────────────────┐
//!   │pad │  block    │ block  │      block      │  tail slack    │
//!   │ 4B │ (in use)  │ (free) │    (in use)     │ (reusable)     │
//!   └────┴───────────┴────────┴─────────────────┴────────────────┘
//!          ▲
//!          └── headers at addresses ≡ 4 (mod 8), payloads ≡ 0 (mod 8)
//! ```
//!
//! `heap_end` lags the physical break whenever a free at the tail retreats
//! it; the slack in between is handed out again without touching the arena.
//!
//! ## Allocation
//!
//! ```text
//!   malloc(n):
//!     total = align8(n + header + footer), at least MIN_BLOCK_SIZE
//!     scan bins from max(class(total), lowest nonempty) upward,
//!       first fit inside each bin's list
//!     hit  -> split the block if the leftover is worth keeping
//!     miss -> grow the tail by total and stamp a fresh block
//! ```
//!
//! ## Free
//!
//! A freed block merges with a free left neighbour (found through the
//! footer just below its header) and a free right neighbour (found through
//! the header just past its footer). A merged block that touches
//! `heap_end` is absorbed by retreating the tail instead of entering a
//! list, so a tight alloc/free loop at the tail costs no list traffic and
//! no arena growth.
//!
//! ## Thread Safety
//!
//! This allocator is **NOT** thread-safe; callers share it across threads
//! only with external serialization. No operation blocks or yields.

use std::ptr;

use crate::align8;
use crate::block::{
  self, BINS, FREE_FLAG, HEADER_SIZE, Header, MAX_REQUEST, MIN_BLOCK_SIZE,
};
use crate::freelist::{self, FreeList};
use crate::interface::{Allocator, OutOfMemory};
use crate::memlib::MemArena;

/// Leftover size (bytes) above which a reused free block is split.
/// Smaller leftovers ride along with the allocation instead of becoming
/// fragments too small to be useful.
pub const SPLIT_THRESHOLD: usize = 64;

/// A consistency violation found by [`BinnedAllocator::check`].
///
/// Offsets are byte distances from the arena's low address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
  /// The logical tail points past the physical break.
  TailPastBreak { heap_end: usize, brk: usize },
  /// A free-list entry's free flag is clear.
  EntryNotFree { bin: usize, offset: usize, word: Header },
  /// A free-list entry's size is outside its bin's class range.
  EntryOutsideClass { bin: usize, offset: usize, size: usize },
  /// The cached lowest nonempty bin disagrees with the lists.
  StaleLowestCache { cached: isize, found: isize },
  /// The cached highest nonempty bin disagrees with the lists.
  StaleHighestCache { cached: isize, found: isize },
  /// A walked block is smaller than any legal block.
  RuntBlock { offset: usize, size: usize },
  /// A walked block's footer disagrees with its header.
  FooterMismatch {
    offset: usize,
    size: usize,
    header: Header,
    footer: Header,
  },
  /// The block walk did not land exactly on the logical tail.
  WalkOvershoot { offset: usize, heap_end: usize },
  /// Free blocks counted by the walk disagree with a list's length.
  CountMismatch {
    bin: usize,
    list_len: usize,
    walked: usize,
  },
}

impl std::fmt::Display for CheckError {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>,
  ) -> std::fmt::Result {
    match *self {
      CheckError::TailPastBreak { heap_end, brk } => {
        write!(f, "logical tail at offset {heap_end} is past the break at {brk}")
      }
      CheckError::EntryNotFree { bin, offset, word } => {
        write!(
          f,
          "free-list entry not marked free: bin {bin}, offset {offset}, word {word:#010x}"
        )
      }
      CheckError::EntryOutsideClass { bin, offset, size } => {
        write!(
          f,
          "free-list entry has a size outside its class: bin {bin}, offset {offset}, size {size}"
        )
      }
      CheckError::StaleLowestCache { cached, found } => {
        write!(f, "lowest nonempty bin cache is {cached}, lists say {found}")
      }
      CheckError::StaleHighestCache { cached, found } => {
        write!(f, "highest nonempty bin cache is {cached}, lists say {found}")
      }
      CheckError::RuntBlock { offset, size } => {
        write!(f, "block at offset {offset} has impossible size {size}")
      }
      CheckError::FooterMismatch {
        offset,
        size,
        header,
        footer,
      } => {
        write!(
          f,
          "header and footer do not match: offset {offset}, size {size}, header {header:#010x}, footer {footer:#010x}"
        )
      }
      CheckError::WalkOvershoot { offset, heap_end } => {
        write!(
          f,
          "block walk ended at offset {offset} instead of the logical tail at {heap_end}"
        )
      }
      CheckError::CountMismatch {
        bin,
        list_len,
        walked,
      } => {
        write!(
          f,
          "bin {bin} free-list length {list_len} does not match {walked} free blocks in the heap"
        )
      }
    }
  }
}

/// A binned free-list heap over a break-grown arena.
///
/// # Fields
///
/// * `mem` - The arena the heap grows into; the only external mutation the
///   allocator performs is extending its break.
/// * `heap_end` - One past the last byte currently tiled by blocks. Lags
///   the physical break after a tail free.
/// * `freelist` - The 28-bin segregated free list.
pub struct BinnedAllocator {
  mem: MemArena,
  heap_end: *mut u8,
  freelist: FreeList,
}

impl BinnedAllocator {
  /// Builds a heap over `mem` and initializes it.
  pub fn new(mem: MemArena) -> Result<Self, OutOfMemory> {
    let mut heap = Self {
      mem,
      heap_end: ptr::null_mut(),
      freelist: FreeList::new(),
    };
    heap.init()?;
    Ok(heap)
  }

  /// Clears the bins and seeds the heap.
  ///
  /// The arena is padded by one header width so that every header sits at
  /// an address ≡ 4 (mod 8) and every payload at ≡ 0 (mod 8). The pad word
  /// is never written; reads of it (a first block probing for a left
  /// neighbour) see zero, which has the free flag clear.
  pub fn init(&mut self) -> Result<(), OutOfMemory> {
    self.freelist.clear();

    if self.mem.size() < HEADER_SIZE {
      let pad = HEADER_SIZE - self.mem.size();
      self.mem.sbrk(pad).ok_or(OutOfMemory)?;
    }
    self.heap_end = unsafe { self.mem.lo().add(HEADER_SIZE) };
    Ok(())
  }

  /// Lowest arena address.
  pub fn heap_lo(&self) -> *mut u8 {
    self.mem.lo()
  }

  /// Highest in-use arena address.
  pub fn heap_hi(&self) -> *mut u8 {
    self.mem.hi()
  }

  /// Physical arena footprint in bytes.
  pub fn heap_size(&self) -> usize {
    self.mem.size()
  }

  /// One past the last byte currently tiled by blocks.
  ///
  /// Lags [`heap_hi`](Self::heap_hi) whenever a tail free has retreated
  /// the logical end of the heap.
  pub fn heap_end(&self) -> *mut u8 {
    self.heap_end
  }

  /// Serves `size` bytes at the logical tail, returning their start.
  ///
  /// When the physical break already covers the request (a tail free left
  /// slack behind), the arena is not consulted; otherwise the break is
  /// extended by the shortfall, after which the tail and the break
  /// coincide again. `None` when the arena refuses to grow.
  fn grow(
    &mut self,
    size: usize,
  ) -> Option<*mut u8> {
    debug_assert!(size > 0);

    let brk = unsafe { self.mem.lo().add(self.mem.size()) };
    let new_end = self.heap_end.wrapping_add(size);

    if new_end > brk {
      let shortfall = new_end as usize - brk as usize;
      self.mem.sbrk(shortfall)?;
      debug_assert_eq!(new_end as usize, self.mem.lo() as usize + self.mem.size());
    }

    let old = self.heap_end;
    self.heap_end = new_end;
    Some(old)
  }

  /// Allocates a block holding at least `size` payload bytes.
  ///
  /// # Returns
  ///
  /// An 8-byte aligned payload pointer, or null when `size` exceeds
  /// [`MAX_REQUEST`] or the arena cannot grow. The block's header and
  /// footer record its true size.
  ///
  /// # Safety
  ///
  /// The heap must be initialized; the caller must serialize access.
  pub unsafe fn malloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size > MAX_REQUEST {
      return ptr::null_mut();
    }

    // Room for the header in front of the payload and the footer behind
    // it; a freed block must later be able to hold its two link words.
    let mut total = align8!(size + 2 * HEADER_SIZE);
    if total < MIN_BLOCK_SIZE {
      total = MIN_BLOCK_SIZE;
    }

    // The block's class index must stay inside the bin array, on the free
    // path as much as in the search below, so the block itself has to stay
    // below 2^(BINS+3) bytes.
    let want_bin = block::bin_of(total) as isize;
    if want_bin >= BINS as isize {
      return ptr::null_mut();
    }
    debug_assert!(want_bin >= 1);

    let start_bin = want_bin.max(self.freelist.lowest());

    for bin in start_bin..=self.freelist.highest() {
      let bin = bin as usize;
      let mut cur = self.freelist.head(bin);

      while !cur.is_null() {
        let word = unsafe { block::read(cur) };
        debug_assert!(block::is_free(word));
        let cur_size = block::decode_size(word);
        debug_assert!(cur_size >= 1 << (bin + 3));
        debug_assert!(cur_size < 1 << (bin + 4));

        if cur_size >= total {
          // First fit within the class. The head wins ties, so a
          // just-freed block is the first to be handed out again.
          return unsafe { self.split_and_alloc(cur, total, bin) };
        }

        cur = unsafe { freelist::next_of(cur) };
      }
    }

    match self.grow(total) {
      Some(blk) => unsafe {
        block::stamp(blk, total, false);
        blk.add(HEADER_SIZE)
      },
      None => ptr::null_mut(),
    }
  }

  /// Carves `total` bytes out of a free block taken from `bin`.
  ///
  /// Leftovers up to [`SPLIT_THRESHOLD`] ride along with the allocation;
  /// a larger tail becomes a new free block in its own size class.
  ///
  /// # Safety
  ///
  /// `chosen` must be on `bin`'s list with a recorded size >= `total`.
  unsafe fn split_and_alloc(
    &mut self,
    chosen: *mut u8,
    total: usize,
    bin: usize,
  ) -> *mut u8 {
    debug_assert_eq!(total, align8!(total));

    let chosen_size = block::decode_size(unsafe { block::read(chosen) });
    let leftover = chosen_size - total;

    unsafe {
      self.freelist.remove(bin, chosen);

      if leftover <= SPLIT_THRESHOLD {
        // Hand out the whole block: keep the recorded size, clear the
        // free flag at both ends.
        let word = block::read(chosen) & !FREE_FLAG;
        block::write(chosen, word);
        block::write(chosen.add(chosen_size - HEADER_SIZE), word);
        return chosen.add(HEADER_SIZE);
      }

      let rest = chosen.add(total);
      block::stamp(rest, leftover, true);
      self.freelist.insert(block::bin_of(leftover), rest);

      block::stamp(chosen, total, false);
      chosen.add(HEADER_SIZE)
    }
  }

  /// Returns `ptr`'s block to the heap, merging with free neighbours.
  ///
  /// A block whose merged extent touches the logical tail is absorbed by
  /// retreating `heap_end` instead of entering a free list. Null is a
  /// no-op, matching `free(3)`.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a payload previously returned by
  /// [`malloc`](Self::malloc)/[`realloc`](Self::realloc) on this heap and
  /// not freed since.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let mut blk = unsafe { ptr.sub(HEADER_SIZE) };
    let word = unsafe { block::read(blk) };
    debug_assert!(!block::is_free(word), "double free");
    let mut size = block::decode_size(word);
    debug_assert!(block::bin_of(size) < BINS);

    // Merge with the block on the left, located through its footer. For
    // the first block that word is the init pad, which is never written
    // and reads as zero.
    let prev_ftr = blk.wrapping_sub(HEADER_SIZE);
    if prev_ftr >= self.mem.lo() {
      let ftr = unsafe { block::read(prev_ftr) };
      if block::is_free(ftr) {
        let prev_size = block::decode_size(ftr);
        let prev_blk = unsafe { blk.sub(prev_size) };
        debug_assert!(prev_blk >= self.mem.lo());
        debug_assert_eq!(unsafe { block::read(prev_blk) }, ftr);

        unsafe { self.freelist.remove(block::bin_of(prev_size), prev_blk) };
        size += prev_size;
        blk = prev_blk;
      }
    }

    // A block at the tail is absorbed by retreating the logical end; no
    // list traffic, and there cannot be a right neighbour.
    if unsafe { blk.add(size) } == self.heap_end {
      self.heap_end = blk;
      return;
    }

    // Merge with the block on the right.
    let next_blk = unsafe { blk.add(size) };
    if next_blk < self.heap_end {
      let next_word = unsafe { block::read(next_blk) };
      if block::is_free(next_word) {
        let next_size = block::decode_size(next_word);
        unsafe { self.freelist.remove(block::bin_of(next_size), next_blk) };
        size += next_size;
      }
    }

    let bin = block::bin_of(size);
    debug_assert!(bin < BINS, "coalesced block too large to bin");
    unsafe {
      block::stamp(blk, size, true);
      self.freelist.insert(bin, blk);
    }
  }

  /// Resizes the allocation at `ptr` to hold at least `size` bytes.
  ///
  /// Shrinks return `ptr` unchanged; a block at the logical tail is
  /// stretched in place; anything else moves through an
  /// allocate-copy-free sequence.
  ///
  /// # Returns
  ///
  /// An 8-byte aligned payload pointer (possibly `ptr` itself), or null
  /// when the arena cannot supply the growth; on null the old payload is
  /// left intact.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live payload of this heap.
  pub unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    debug_assert!(!ptr.is_null());

    let blk = unsafe { ptr.sub(HEADER_SIZE) };
    let old_total = block::decode_size(unsafe { block::read(blk) });

    // Header-only accounting: the in-place paths keep the existing footer
    // position, and the move path goes through `malloc`, which accounts
    // for both words itself.
    let new_total = align8!(size + HEADER_SIZE);

    // The recorded size is deliberately not rewritten on a shrink; the
    // tail slack is recovered when the block is next freed.
    if new_total <= old_total {
      return ptr;
    }

    // A block at the logical tail stretches without moving.
    if self.heap_end as usize - old_total == blk as usize {
      if self.grow(new_total - old_total).is_none() {
        return ptr::null_mut();
      }
      unsafe { block::stamp(blk, new_total, false) };
      return ptr;
    }

    let new_ptr = unsafe { self.malloc(size) };
    if new_ptr.is_null() {
      return ptr::null_mut();
    }

    // Copies the whole old payload plus the old footer word. The
    // overshoot stays inside the fresh block, which is at least 8 bytes
    // larger than the old one.
    unsafe {
      ptr::copy_nonoverlapping(ptr, new_ptr, old_total - HEADER_SIZE);
      self.free(ptr);
    }
    new_ptr
  }

  /// Verifies the heap invariants; read-only.
  ///
  /// Three passes: every bin's list (flags, class ranges, cache
  /// tightness), the block tiling from the pad to the logical tail
  /// (header/footer agreement, per-bin free counts), and the cross-check
  /// of list lengths against walked counts.
  pub fn check(&self) -> Result<(), CheckError> {
    let lo = self.mem.lo();
    let off = |p: *mut u8| p as usize - lo as usize;

    let brk = unsafe { lo.add(self.mem.size()) };
    if self.heap_end > brk {
      return Err(CheckError::TailPastBreak {
        heap_end: off(self.heap_end),
        brk: self.mem.size(),
      });
    }

    // Pass 1: walk the lists.
    let mut list_lens = [0usize; BINS];
    let mut found_lowest = BINS as isize;
    let mut found_highest = -1isize;

    for bin in 0..BINS {
      let mut entry = self.freelist.head(bin);
      while !entry.is_null() {
        let word = unsafe { block::read(entry) };
        if !block::is_free(word) {
          return Err(CheckError::EntryNotFree {
            bin,
            offset: off(entry),
            word,
          });
        }
        let entry_size = block::decode_size(word);
        if entry_size < 1 << (bin + 3) || entry_size >= 1 << (bin + 4) {
          return Err(CheckError::EntryOutsideClass {
            bin,
            offset: off(entry),
            size: entry_size,
          });
        }
        list_lens[bin] += 1;
        entry = unsafe { freelist::next_of(entry) };
      }

      if list_lens[bin] > 0 {
        if found_lowest == BINS as isize {
          found_lowest = bin as isize;
        }
        found_highest = bin as isize;
      }
    }

    if self.freelist.lowest() != found_lowest {
      return Err(CheckError::StaleLowestCache {
        cached: self.freelist.lowest(),
        found: found_lowest,
      });
    }
    if self.freelist.highest() != found_highest {
      return Err(CheckError::StaleHighestCache {
        cached: self.freelist.highest(),
        found: found_highest,
      });
    }

    // Pass 2: walk the block tiling.
    let mut walked = [0usize; BINS];
    let mut cursor = unsafe { lo.add(HEADER_SIZE) };

    while cursor < self.heap_end {
      let header = unsafe { block::read(cursor) };
      let walk_size = block::decode_size(header);

      if walk_size < MIN_BLOCK_SIZE {
        return Err(CheckError::RuntBlock {
          offset: off(cursor),
          size: walk_size,
        });
      }
      let end = cursor.wrapping_add(walk_size);
      if end > self.heap_end {
        return Err(CheckError::WalkOvershoot {
          offset: off(end),
          heap_end: off(self.heap_end),
        });
      }

      if block::is_free(header) {
        walked[block::bin_of(walk_size)] += 1;
      }

      let footer = unsafe { block::read(end.sub(HEADER_SIZE)) };
      if header != footer {
        return Err(CheckError::FooterMismatch {
          offset: off(cursor),
          size: walk_size,
          header,
          footer,
        });
      }

      cursor = end;
    }

    // Every step was bounds-checked above, so the loop can only exit on
    // the logical tail exactly.
    debug_assert_eq!(cursor, self.heap_end);

    // Pass 3: the lists and the walk must agree bin by bin.
    for bin in 0..BINS {
      if list_lens[bin] != walked[bin] {
        return Err(CheckError::CountMismatch {
          bin,
          list_len: list_lens[bin],
          walked: walked[bin],
        });
      }
    }

    Ok(())
  }
}

impl Allocator for BinnedAllocator {
  fn init(&mut self) -> Result<(), OutOfMemory> {
    BinnedAllocator::init(self)
  }

  unsafe fn malloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe { BinnedAllocator::malloc(self, size) }
  }

  unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    unsafe { BinnedAllocator::free(self, ptr) }
  }

  unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { BinnedAllocator::realloc(self, ptr, size) }
  }

  fn check(&self) -> Result<(), CheckError> {
    BinnedAllocator::check(self)
  }

  fn heap_lo(&self) -> *mut u8 {
    self.mem.lo()
  }

  fn heap_hi(&self) -> *mut u8 {
    self.mem.hi()
  }

  fn reset_brk(&mut self) {
    self.mem.reset();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn heap(capacity: usize) -> BinnedAllocator {
    let mem = MemArena::new(capacity).expect("arena mapping");
    BinnedAllocator::new(mem).expect("heap init")
  }

  fn is_aligned(ptr: *mut u8) -> bool {
    (ptr as usize) % 8 == 0
  }

  #[test]
  fn payloads_are_aligned_and_in_heap() {
    let mut h = heap(1 << 20);

    unsafe {
      for size in [1, 7, 8, 13, 100, 4096] {
        let p = h.malloc(size);
        assert!(!p.is_null());
        assert!(is_aligned(p), "payload {p:?} must be 8-byte aligned");
        assert!(p as usize >= h.heap_lo() as usize);
        assert!((p as usize + size) <= h.heap_end() as usize);
      }
    }
    h.check().unwrap();
  }

  #[test]
  fn payload_survives_neighbouring_allocations() {
    let mut h = heap(1 << 20);

    unsafe {
      let a = h.malloc(8) as *mut u64;
      a.write(0xDEADBEEFDEADBEEF);

      let b = h.malloc(64) as *mut u8;
      ptr::write_bytes(b, 0xAB, 64);

      assert_eq!(a.read(), 0xDEADBEEFDEADBEEF);
      for i in 0..64 {
        assert_eq!(b.add(i).read(), 0xAB);
      }
    }
  }

  #[test]
  fn freed_block_is_handed_out_again() {
    let mut h = heap(1 << 20);

    unsafe {
      let p1 = h.malloc(100);
      let _p2 = h.malloc(100);

      // p1 is not at the tail, so it lands in a bin...
      h.free(p1);
      h.check().unwrap();

      // ...and a same-class request takes it straight back.
      let p3 = h.malloc(100);
      assert_eq!(p3, p1);
    }
    h.check().unwrap();
  }

  #[test]
  fn coalesced_frees_retreat_the_tail() {
    let mut h = heap(1 << 20);
    let end0 = h.heap_end();

    unsafe {
      let p1 = h.malloc(16);
      let p2 = h.malloc(16);
      let p3 = h.malloc(16);

      h.free(p1);
      h.free(p3);
      h.free(p2);
    }

    // All three blocks merged and were absorbed into the tail.
    assert_eq!(h.heap_end(), end0);
    h.check().unwrap();
  }

  #[test]
  fn tail_free_reuses_slack_without_growing() {
    let mut h = heap(1 << 20);

    unsafe {
      let p = h.malloc(4096);
      let footprint = h.heap_size();
      h.free(p);

      let q = h.malloc(4096);
      assert_eq!(q, p);
      assert_eq!(h.heap_size(), footprint);
    }
  }

  #[test]
  fn large_leftover_is_split_into_its_own_class() {
    let mut h = heap(1 << 20);

    unsafe {
      let p1 = h.malloc(1024);
      let _guard = h.malloc(16);
      h.free(p1);
      h.check().unwrap();

      // Taking a small piece out of the 1032-byte block must leave the
      // remainder on a list, not waste it.
      let p2 = h.malloc(64);
      assert_eq!(p2, p1);
      h.check().unwrap();

      let p3 = h.malloc(256);
      assert!(p3 as usize > p2 as usize);
      assert!((p3 as usize) < _guard as usize);
    }
    h.check().unwrap();
  }

  #[test]
  fn small_leftover_rides_along() {
    let mut h = heap(1 << 20);

    unsafe {
      let p1 = h.malloc(96);
      let _guard = h.malloc(16);
      h.free(p1);

      // 104-byte block, 104 - 48 = 56 <= SPLIT_THRESHOLD: handed out whole.
      let p2 = h.malloc(40);
      assert_eq!(p2, p1);
    }
    h.check().unwrap();
  }

  #[test]
  fn realloc_shrink_is_a_no_op() {
    let mut h = heap(1 << 20);

    unsafe {
      let p = h.malloc(256);
      let end = h.heap_end();

      assert_eq!(h.realloc(p, 100), p);
      assert_eq!(h.realloc(p, 252), p);
      assert_eq!(h.heap_end(), end);
    }
    h.check().unwrap();
  }

  #[test]
  fn realloc_at_the_tail_stretches_in_place() {
    let mut h = heap(1 << 20);

    unsafe {
      let p = h.malloc(1000);
      let end = h.heap_end() as usize;

      let q = h.realloc(p, 2000);
      assert_eq!(q, p);

      let expected_growth = align8!(2000 + HEADER_SIZE) - align8!(1000 + 2 * HEADER_SIZE);
      assert_eq!(h.heap_end() as usize, end + expected_growth);
    }
    h.check().unwrap();
  }

  #[test]
  fn realloc_away_from_the_tail_moves_and_copies() {
    let mut h = heap(1 << 20);

    unsafe {
      let p1 = h.malloc(32);
      for i in 0..32 {
        p1.add(i).write(i as u8 ^ 0xA5);
      }
      let _p2 = h.malloc(32);

      let p3 = h.realloc(p1, 2000);
      assert_ne!(p3, p1);
      for i in 0..32 {
        assert_eq!(p3.add(i).read(), i as u8 ^ 0xA5);
      }
    }
    h.check().unwrap();
  }

  #[test]
  fn oversize_requests_are_rejected() {
    let mut h = heap(1 << 16);
    let footprint = h.heap_size();

    unsafe {
      // The top size class has no bin, so the ceiling itself is rejected
      // along with everything above it.
      assert!(h.malloc(MAX_REQUEST).is_null());
      assert!(h.malloc(MAX_REQUEST + 1).is_null());
      assert!(h.malloc(1 << 34).is_null());
    }
    assert_eq!(h.heap_size(), footprint);
    h.check().unwrap();
  }

  #[test]
  fn exhausted_arena_yields_null_and_keeps_state() {
    let mut h = heap(4096);

    unsafe {
      let p = h.malloc(1024);
      assert!(!p.is_null());

      assert!(h.malloc(1 << 20).is_null());
      h.check().unwrap();

      // The failure left the heap usable.
      let q = h.malloc(1024);
      assert!(!q.is_null());
    }
    h.check().unwrap();
  }

  #[test]
  fn failed_realloc_leaves_the_payload_intact() {
    let mut h = heap(4096);

    unsafe {
      let p = h.malloc(64);
      for i in 0..64 {
        p.add(i).write(i as u8);
      }
      let _pin = h.malloc(64);

      // Too big for the remaining arena: must fail without moving p.
      assert!(h.realloc(p, 1 << 20).is_null());
      for i in 0..64 {
        assert_eq!(p.add(i).read(), i as u8);
      }
    }
    h.check().unwrap();
  }

  #[test]
  fn free_of_null_is_a_no_op() {
    let mut h = heap(1 << 16);
    unsafe { h.free(ptr::null_mut()) };
    h.check().unwrap();
  }

  #[test]
  fn checker_reports_a_clobbered_footer() {
    let mut h = heap(1 << 20);

    unsafe {
      let p = h.malloc(64);
      let _pin = h.malloc(64);
      h.free(p);
      h.check().unwrap();

      // Smash the free block's footer.
      let blk = p.sub(HEADER_SIZE);
      let size = block::decode_size(block::read(blk));
      block::write(blk.add(size - HEADER_SIZE), 0);

      assert!(matches!(
        h.check(),
        Err(CheckError::FooterMismatch { .. })
      ));
    }
  }

  #[test]
  fn checker_reports_a_phantom_free_block() {
    let mut h = heap(1 << 20);

    unsafe {
      let p = h.malloc(64);
      let _pin = h.malloc(64);

      // Flag the block free without putting it on a list.
      let blk = p.sub(HEADER_SIZE);
      let size = block::decode_size(block::read(blk));
      block::stamp(blk, size, true);

      assert!(matches!(h.check(), Err(CheckError::CountMismatch { .. })));
    }
  }
}

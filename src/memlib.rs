//! Host memory arena.
//!
//! The allocator core never talks to the OS directly. It grows into a
//! [`MemArena`]: a private anonymous mapping with a break pointer that can
//! only move up during normal operation.
//!
//! ```text
//!           lo()                     hi()
//!            │                        │
//!            ▼                        ▼
//!   ┌────────────────────────────────────┬────────────────────────┐
//!   │           in use (brk bytes)       │     unmapped-in-spirit │
//!   └────────────────────────────────────┴────────────────────────┘
//!            │                            │                       │
//!            └─────────── sbrk(n) moves the break ──►             │
//!                                                             capacity
//! ```
//!
//! The whole capacity is mapped up front; `sbrk` only moves the break
//! within it. Owning the mapping rather than using the real process break
//! keeps `reset()` possible between traces and keeps concurrently running
//! tests out of each other's way.

use std::{fmt, io, ptr};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};

/// The arena mapping could not be created.
#[derive(Debug)]
pub struct MapError {
  /// Bytes the failed mapping asked for.
  pub requested: usize,
  /// OS error reported by `mmap`.
  pub source: io::Error,
}

impl fmt::Display for MapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "failed to map a {}-byte arena: {}",
      self.requested, self.source
    )
  }
}

/// A contiguous byte arena with a monotonic break pointer.
///
/// Addresses below the break are in use by the allocator; the break is
/// extended with [`sbrk`](Self::sbrk) and never lowered except by
/// [`reset`](Self::reset) between replay runs.
pub struct MemArena {
  /// Base address of the mapping; stable for the arena's lifetime.
  base: *mut u8,

  /// Mapped length, rounded up to the page size.
  capacity: usize,

  /// Current break, as an offset from `base`.
  brk: usize,
}

impl MemArena {
  /// Maps `capacity` bytes of private anonymous memory.
  ///
  /// The capacity is rounded up to the page size. Anonymous mappings read
  /// as zero until written, which later lets the allocator treat the word
  /// below its first block as a never-free footer.
  pub fn new(capacity: usize) -> Result<Self, MapError> {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let capacity = (capacity + page - 1) & !(page - 1);

    let base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if base == MAP_FAILED {
      return Err(MapError {
        requested: capacity,
        source: io::Error::last_os_error(),
      });
    }

    Ok(Self {
      base: base as *mut u8,
      capacity,
      brk: 0,
    })
  }

  /// Lowest address of the mapping.
  pub fn lo(&self) -> *mut u8 {
    self.base
  }

  /// Last in-use byte of the mapping; moves as the break is extended.
  /// One below `lo()` while the arena is empty.
  pub fn hi(&self) -> *mut u8 {
    self.base.wrapping_add(self.brk).wrapping_sub(1)
  }

  /// Extends the break by `incr` bytes and returns the old break, or
  /// `None` when the mapping cannot hold `incr` more bytes. On `None` the
  /// break is left where it was.
  pub fn sbrk(
    &mut self,
    incr: usize,
  ) -> Option<*mut u8> {
    if incr > self.capacity - self.brk {
      return None;
    }

    let old = unsafe { self.base.add(self.brk) };
    self.brk += incr;
    Some(old)
  }

  /// Returns the break to its initial position.
  ///
  /// Replay plumbing, not part of normal operation. The mapping contents
  /// are left as they are; the allocator restamps everything it reuses.
  pub fn reset(&mut self) {
    self.brk = 0;
  }

  /// Current break offset in bytes, for diagnostics and footprint checks.
  pub fn size(&self) -> usize {
    self.brk
  }
}

impl Drop for MemArena {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base as *mut c_void, self.capacity);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sbrk_returns_the_old_break_and_advances() {
    let mut arena = MemArena::new(1 << 16).unwrap();
    assert_eq!(arena.size(), 0);

    let first = arena.sbrk(64).unwrap();
    assert_eq!(first, arena.lo());
    assert_eq!(arena.size(), 64);

    let second = arena.sbrk(32).unwrap();
    assert_eq!(second as usize, arena.lo() as usize + 64);
    assert_eq!(arena.size(), 96);
    assert_eq!(arena.hi() as usize, arena.lo() as usize + 95);
  }

  #[test]
  fn exhaustion_leaves_the_break_in_place() {
    let mut arena = MemArena::new(4096).unwrap();
    arena.sbrk(4096).unwrap();

    assert!(arena.sbrk(1).is_none());
    assert_eq!(arena.size(), 4096);
  }

  #[test]
  fn reset_rewinds_to_the_mapping_base() {
    let mut arena = MemArena::new(1 << 16).unwrap();
    arena.sbrk(1024).unwrap();

    arena.reset();
    assert_eq!(arena.size(), 0);
    assert_eq!(arena.sbrk(8).unwrap(), arena.lo());
  }

  #[test]
  fn fresh_mapping_reads_as_zero() {
    let mut arena = MemArena::new(4096).unwrap();
    let p = arena.sbrk(16).unwrap();

    for i in 0..16 {
      assert_eq!(unsafe { p.add(i).read() }, 0);
    }
  }
}

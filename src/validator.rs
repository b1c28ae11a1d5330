//! Trace replay driver.
//!
//! Replays a [`Trace`] against any [`Allocator`] and checks the contract a
//! caller can observe from outside: payloads are 8-byte aligned, lie inside
//! the heap, never overlap another live payload, and survive `realloc`
//! copies byte for byte.
//!
//! Every payload is filled with a pattern derived from its own pointer
//! value, so an overlapping handout or a botched copy surfaces as a pattern
//! mismatch on a later operation. The extents of all live payloads are kept
//! in a range list for the disjointness check.

use std::{fmt, ptr};

use crate::block::ALIGNMENT;
use crate::interface::Allocator;
use crate::trace::{Trace, TraceOp};

/// Why a replay rejected an allocator, and at which trace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationError {
  /// Zero-based position of the offending record in the trace.
  pub opnum: usize,
  pub fault: Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
  InitFailed,
  AllocFailed { size: usize },
  ReallocFailed { size: usize },
  /// A payload pointer is not 8-byte aligned.
  Misaligned { addr: usize },
  /// A payload extends outside the heap.
  OutsideHeap { addr: usize, size: usize },
  /// A payload overlaps another live payload (which starts at `other`).
  Overlap { addr: usize, other: usize },
  /// A realloc lost payload bytes; `byte` is the first mismatching offset.
  CopyMismatch { addr: usize, byte: usize },
  /// The trace named a slot with no live payload in it.
  EmptySlot { index: usize },
}

impl fmt::Display for ValidationError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "trace op {}: ", self.opnum)?;
    match self.fault {
      Fault::InitFailed => write!(f, "allocator init failed"),
      Fault::AllocFailed { size } => write!(f, "malloc({size}) failed"),
      Fault::ReallocFailed { size } => write!(f, "realloc to {size} bytes failed"),
      Fault::Misaligned { addr } => {
        write!(f, "payload {addr:#x} is not {ALIGNMENT}-byte aligned")
      }
      Fault::OutsideHeap { addr, size } => {
        write!(f, "payload {addr:#x}+{size} is not within the heap")
      }
      Fault::Overlap { addr, other } => {
        write!(f, "payload {addr:#x} overlaps the payload at {other:#x}")
      }
      Fault::CopyMismatch { addr, byte } => {
        write!(f, "realloc to {addr:#x} did not copy byte {byte} correctly")
      }
      Fault::EmptySlot { index } => write!(f, "slot {index} holds no payload"),
    }
  }
}

/// Extent of one live payload, inclusive at both ends.
struct Range {
  lo: usize,
  hi: usize,
}

/// Replays `trace` against `alloc`, failing fast on the first fault.
///
/// The heap is reset and initialized before the first record and reset
/// again after the last, so back-to-back replays start from scratch.
pub fn replay<A: Allocator>(
  alloc: &mut A,
  trace: &Trace,
) -> Result<(), ValidationError> {
  alloc.reset_brk();
  alloc.init().map_err(|_| ValidationError {
    opnum: 0,
    fault: Fault::InitFailed,
  })?;

  let mut ranges: Vec<Range> = Vec::new();
  let mut blocks: Vec<*mut u8> = vec![ptr::null_mut(); trace.slots()];
  let mut sizes: Vec<usize> = vec![0; trace.slots()];

  for (opnum, op) in trace.ops().iter().enumerate() {
    match *op {
      TraceOp::Alloc { index, size } => {
        let p = unsafe { alloc.malloc(size) };
        if p.is_null() {
          return Err(ValidationError {
            opnum,
            fault: Fault::AllocFailed { size },
          });
        }

        add_range(alloc, &mut ranges, p, size, opnum)?;
        unsafe { fill(p, size, p as usize) };

        blocks[index] = p;
        sizes[index] = size;
      }

      TraceOp::Realloc { index, size } => {
        let old = blocks[index];
        if old.is_null() {
          return Err(ValidationError {
            opnum,
            fault: Fault::EmptySlot { index },
          });
        }

        let new = unsafe { alloc.realloc(old, size) };
        if new.is_null() {
          return Err(ValidationError {
            opnum,
            fault: Fault::ReallocFailed { size },
          });
        }

        remove_range(&mut ranges, old as usize);
        add_range(alloc, &mut ranges, new, size, opnum)?;

        // The data must have moved with the block: check against the
        // pattern keyed by the old pointer, then stamp the new one.
        let keep = sizes[index].min(size);
        if let Some(byte) = unsafe { verify(new, keep, old as usize) } {
          return Err(ValidationError {
            opnum,
            fault: Fault::CopyMismatch {
              addr: new as usize,
              byte,
            },
          });
        }
        unsafe { fill(new, size, new as usize) };

        blocks[index] = new;
        sizes[index] = size;
      }

      TraceOp::Free { index } => {
        let p = blocks[index];
        if p.is_null() {
          return Err(ValidationError {
            opnum,
            fault: Fault::EmptySlot { index },
          });
        }

        remove_range(&mut ranges, p as usize);
        unsafe { alloc.free(p) };

        blocks[index] = ptr::null_mut();
        sizes[index] = 0;
      }

      TraceOp::Write => {}
    }
  }

  alloc.reset_brk();
  Ok(())
}

/// Admits a fresh payload: checks alignment, heap placement, and
/// disjointness against every live payload, then records its extent.
fn add_range<A: Allocator>(
  alloc: &A,
  ranges: &mut Vec<Range>,
  p: *mut u8,
  size: usize,
  opnum: usize,
) -> Result<(), ValidationError> {
  debug_assert!(size > 0);

  let lo = p as usize;
  let hi = lo + size - 1;

  if lo % ALIGNMENT != 0 {
    return Err(ValidationError {
      opnum,
      fault: Fault::Misaligned { addr: lo },
    });
  }

  let heap_lo = alloc.heap_lo() as usize;
  let heap_hi = alloc.heap_hi() as usize;
  if lo < heap_lo || hi > heap_hi {
    return Err(ValidationError {
      opnum,
      fault: Fault::OutsideHeap { addr: lo, size },
    });
  }

  for range in ranges.iter() {
    if lo <= range.hi && range.lo <= hi {
      return Err(ValidationError {
        opnum,
        fault: Fault::Overlap {
          addr: lo,
          other: range.lo,
        },
      });
    }
  }

  ranges.push(Range { lo, hi });
  Ok(())
}

/// Retires the payload whose extent starts at `lo`.
fn remove_range(
  ranges: &mut Vec<Range>,
  lo: usize,
) {
  if let Some(i) = ranges.iter().position(|range| range.lo == lo) {
    ranges.swap_remove(i);
  }
}

/// Fills `size` bytes at `p` with the pattern keyed by `key`.
unsafe fn fill(
  p: *mut u8,
  size: usize,
  key: usize,
) {
  let pattern = key.to_ne_bytes();
  for j in 0..size {
    unsafe { p.add(j).write(pattern[j % pattern.len()]) };
  }
}

/// Returns the first offset in `p` that deviates from `key`'s pattern.
unsafe fn verify(
  p: *const u8,
  size: usize,
  key: usize,
) -> Option<usize> {
  let pattern = key.to_ne_bytes();
  for j in 0..size {
    if unsafe { p.add(j).read() } != pattern[j % pattern.len()] {
      return Some(j);
    }
  }
  None
}

//! Allocation trace records.
//!
//! A trace drives the replay validator: each line names one heap operation
//! on a numbered slot, where the slot holds the payload pointer between
//! operations.
//!
//! ```text
//! # warm-up, then recycle slot 0
//! ALLOC 0 4096
//! ALLOC 1 96
//! REALLOC 0 8192
//! FREE 1
//! WRITE
//! ```
//!
//! Blank lines and `#` comments are ignored.

use std::{fmt, str::FromStr};

/// One replayed heap operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
  /// Allocate `size` bytes into slot `index`.
  Alloc { index: usize, size: usize },
  /// Resize the payload in slot `index` to `size` bytes.
  Realloc { index: usize, size: usize },
  /// Release the payload in slot `index`.
  Free { index: usize },
  /// Payload writes are covered by the fill patterns the validator
  /// maintains; the record is accepted and skipped.
  Write,
}

/// A parsed trace: the operation list plus the number of slots it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
  ops: Vec<TraceOp>,
  slots: usize,
}

impl Trace {
  pub fn new(ops: Vec<TraceOp>) -> Self {
    let slots = ops
      .iter()
      .map(|op| match *op {
        TraceOp::Alloc { index, .. }
        | TraceOp::Realloc { index, .. }
        | TraceOp::Free { index } => index + 1,
        TraceOp::Write => 0,
      })
      .max()
      .unwrap_or(0);

    Self { ops, slots }
  }

  pub fn ops(&self) -> &[TraceOp] {
    &self.ops
  }

  pub fn slots(&self) -> usize {
    self.slots
  }
}

/// A line the trace parser could not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParseError {
  /// One-based line number of the offending record.
  pub line: usize,
  pub kind: TraceParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceParseErrorKind {
  UnknownRecord(String),
  MissingField,
  BadNumber(String),
}

impl fmt::Display for TraceParseError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match &self.kind {
      TraceParseErrorKind::UnknownRecord(record) => {
        write!(f, "line {}: unknown record `{record}`", self.line)
      }
      TraceParseErrorKind::MissingField => {
        write!(f, "line {}: record is missing a field", self.line)
      }
      TraceParseErrorKind::BadNumber(field) => {
        write!(f, "line {}: `{field}` is not a number", self.line)
      }
    }
  }
}

fn field(
  fields: &mut std::str::SplitWhitespace<'_>,
  line: usize,
) -> Result<usize, TraceParseError> {
  let raw = fields.next().ok_or(TraceParseError {
    line,
    kind: TraceParseErrorKind::MissingField,
  })?;

  raw.parse().map_err(|_| TraceParseError {
    line,
    kind: TraceParseErrorKind::BadNumber(raw.to_string()),
  })
}

impl FromStr for Trace {
  type Err = TraceParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut ops = Vec::new();

    for (i, raw_line) in s.lines().enumerate() {
      let line = i + 1;
      let text = raw_line.split('#').next().unwrap_or("").trim();
      if text.is_empty() {
        continue;
      }

      let mut fields = text.split_whitespace();
      let Some(record) = fields.next() else {
        continue;
      };

      let op = match record {
        "ALLOC" => TraceOp::Alloc {
          index: field(&mut fields, line)?,
          size: field(&mut fields, line)?,
        },
        "REALLOC" => TraceOp::Realloc {
          index: field(&mut fields, line)?,
          size: field(&mut fields, line)?,
        },
        "FREE" => TraceOp::Free {
          index: field(&mut fields, line)?,
        },
        "WRITE" => TraceOp::Write,
        other => {
          return Err(TraceParseError {
            line,
            kind: TraceParseErrorKind::UnknownRecord(other.to_string()),
          });
        }
      };
      ops.push(op);
    }

    Ok(Trace::new(ops))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_records_comments_and_blanks() {
    let trace: Trace = "\
# a comment
ALLOC 0 100

ALLOC 1 32   # trailing comment
REALLOC 0 200
WRITE
FREE 1
FREE 0
"
      .parse()
      .unwrap();

    assert_eq!(trace.slots(), 2);
    assert_eq!(
      trace.ops(),
      &[
        TraceOp::Alloc { index: 0, size: 100 },
        TraceOp::Alloc { index: 1, size: 32 },
        TraceOp::Realloc { index: 0, size: 200 },
        TraceOp::Write,
        TraceOp::Free { index: 1 },
        TraceOp::Free { index: 0 },
      ]
    );
  }

  #[test]
  fn reports_the_offending_line() {
    let err = "ALLOC 0 100\nSHRINK 0 10".parse::<Trace>().unwrap_err();
    assert_eq!(err.line, 2);
    assert_eq!(
      err.kind,
      TraceParseErrorKind::UnknownRecord("SHRINK".to_string())
    );

    let err = "FREE".parse::<Trace>().unwrap_err();
    assert_eq!(err.kind, TraceParseErrorKind::MissingField);

    let err = "ALLOC 0 lots".parse::<Trace>().unwrap_err();
    assert_eq!(
      err.kind,
      TraceParseErrorKind::BadNumber("lots".to_string())
    );
  }

  #[test]
  fn empty_trace_has_no_slots() {
    let trace: Trace = "# nothing here\n".parse().unwrap();
    assert!(trace.ops().is_empty());
    assert_eq!(trace.slots(), 0);
  }
}

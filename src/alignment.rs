//! Tab-delimited alignment lines
//!
//! Only three columns matter to the annotator: the reference id, the 1-based
//! subject start and the reference span descriptor. The defaults match SAM
//! (`RNAME`, `POS` and `CIGAR`). A span descriptor is either a CIGAR string, in
//! which case the reference span is the sum of the `M`, `D`, `N`, `=` and `X`
//! operations, or a plain decimal span length.

use std::ops::Range;

use memchr::memchr;

/// Column layout of an alignment line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFormat {
    /// 0-based column of the reference id
    pub reference_column: usize,
    /// 0-based column of the 1-based subject start
    pub start_column: usize,
    /// 0-based column of the reference span descriptor
    pub span_column: usize,
    /// First byte of header lines
    pub header_marker: u8,
}
impl Default for LineFormat {
    fn default() -> Self {
        Self::sam()
    }
}
impl LineFormat {
    /// SAM layout: `RNAME` (3rd), `POS` (4th) and `CIGAR` (6th), headers start with `@`
    #[must_use]
    pub fn sam() -> Self {
        Self {
            reference_column: 2,
            start_column: 3,
            span_column: 5,
            header_marker: b'@',
        }
    }

    #[must_use]
    pub fn reference_column(mut self, column: usize) -> Self {
        self.reference_column = column;
        self
    }

    #[must_use]
    pub fn start_column(mut self, column: usize) -> Self {
        self.start_column = column;
        self
    }

    #[must_use]
    pub fn span_column(mut self, column: usize) -> Self {
        self.span_column = column;
        self
    }

    #[must_use]
    pub fn header_marker(mut self, marker: u8) -> Self {
        self.header_marker = marker;
        self
    }

    #[must_use]
    pub fn is_header(&self, line: &[u8]) -> bool {
        line.first() == Some(&self.header_marker)
    }

    /// Parses the fields the annotator needs from an alignment line
    ///
    /// Only the reference id, start and span columns have to be ASCII; other
    /// columns and free text are never decoded. Returns `None` if the line has too
    /// few columns, the reference is `*` or not UTF-8, or the start or span cannot
    /// be interpreted. Coordinates beyond the `i32` range the index stores are
    /// rejected as well.
    #[must_use]
    pub fn parse<'a>(&self, line: &'a [u8]) -> Option<AlignmentFields<'a>> {
        let last = self
            .reference_column
            .max(self.start_column)
            .max(self.span_column);
        let mut columns = [None, None, None];
        let mut begin = 0;
        for column in 0..=last {
            let end = memchr(b'\t', &line[begin..]).map_or(line.len(), |i| begin + i);
            let range = begin..end;
            if column == self.reference_column {
                columns[0] = Some(range.clone());
            }
            if column == self.start_column {
                columns[1] = Some(range.clone());
            }
            if column == self.span_column {
                columns[2] = Some(range);
            }
            if end == line.len() {
                break;
            }
            begin = end + 1;
        }
        let [Some(reference_field), Some(start), Some(span)] = columns else {
            return None;
        };

        let field = &line[reference_field.clone()];
        let reference = memchr(b' ', field).map_or(field, |i| &field[..i]);
        let reference = std::str::from_utf8(reference).ok()?;
        if reference.is_empty() || reference == "*" {
            return None;
        }
        let start = parse_decimal(&line[start]).filter(|&s| s > 0)?;
        let span = reference_span(&line[span])?;
        let end = start.checked_add(span - 1)?;
        if end > i64::from(i32::MAX) {
            return None;
        }
        Some(AlignmentFields {
            reference,
            reference_field,
            start,
            end,
        })
    }
}

/// Fields of one alignment line, borrowed from the line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentFields<'a> {
    /// Reference id (the reference field up to its first space)
    pub reference: &'a str,
    /// Byte range of the whole reference field within the line
    pub reference_field: Range<usize>,
    /// 1-based inclusive subject start
    pub start: i64,
    /// 1-based inclusive subject end
    pub end: i64,
}
impl AlignmentFields<'_> {
    /// Writes `line` to `out` with `tag` inserted into the reference field
    ///
    /// The tag goes right after the reference id, before any free text that
    /// follows the first space of the field.
    pub fn write_tagged(&self, line: &[u8], tag: &str, out: &mut Vec<u8>) {
        let insert_at = self.reference_field.start + self.reference.len();
        out.extend_from_slice(&line[..insert_at]);
        out.extend_from_slice(tag.as_bytes());
        out.extend_from_slice(&line[insert_at..]);
    }
}

/// Parses a non-empty run of ASCII digits
fn parse_decimal(digits: &[u8]) -> Option<i64> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0i64, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(i64::from(b - b'0'))
    })
}

/// Returns the number of reference positions a span descriptor covers
///
/// ```
/// use annidx::reference_span;
///
/// assert_eq!(reference_span("10M2I5M3D4M"), Some(22));
/// assert_eq!(reference_span("50"), Some(50));
/// assert_eq!(reference_span("*"), None);
/// ```
#[must_use]
pub fn reference_span(descriptor: impl AsRef<[u8]>) -> Option<i64> {
    let descriptor = descriptor.as_ref();
    if descriptor.is_empty() || descriptor == b"*" {
        return None;
    }
    if descriptor.iter().all(u8::is_ascii_digit) {
        return parse_decimal(descriptor).filter(|&span| span > 0);
    }
    let mut span: i64 = 0;
    let mut len: i64 = 0;
    let mut has_len = false;
    for &b in descriptor {
        match b {
            b'0'..=b'9' => {
                len = len.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
                has_len = true;
            }
            b'M' | b'D' | b'N' | b'=' | b'X' if has_len => {
                span = span.checked_add(len)?;
                len = 0;
                has_len = false;
            }
            b'I' | b'S' | b'H' | b'P' if has_len => {
                len = 0;
                has_len = false;
            }
            _ => return None,
        }
    }
    (!has_len && span > 0).then_some(span)
}

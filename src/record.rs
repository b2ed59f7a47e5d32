//! Annotation records and the payload attached to every stored interval

use crate::classification::{ClassificationResolver, Classifications};

/// Classification assignments and accession attached to an interval
///
/// `class_ids` has exactly one slot per configured classification, in the order
/// recorded in the data file header.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Payload {
    /// Opaque accession bytes used to render the annotation tag
    pub accession: Vec<u8>,
    /// Whether the annotation lies on the reverse strand
    pub reverse: bool,
    /// One optional class id per configured classification
    pub class_ids: Vec<Option<i32>>,
}
impl Payload {
    #[must_use]
    pub fn new(accession: impl Into<Vec<u8>>, reverse: bool, class_ids: Vec<Option<i32>>) -> Self {
        Self {
            accession: accession.into(),
            reverse,
            class_ids,
        }
    }

    /// Builds a payload by asking `resolver` for a class id in every classification
    pub fn resolve<R: ClassificationResolver>(
        accession: &str,
        reverse: bool,
        classifications: &Classifications,
        resolver: &R,
    ) -> Self {
        let class_ids = classifications
            .iter()
            .map(|(ordinal, name)| resolver.resolve(accession, ordinal, name))
            .collect();
        Self::new(accession, reverse, class_ids)
    }

    /// Appends the annotation tag for this payload to `buf`
    ///
    /// The tag is `|<accession>` followed by `|<tag><id>` for every classification
    /// with an assigned class, e.g. `|WP_0123|tax562|cog1234`.
    pub fn write_tag(&self, classifications: &Classifications, buf: &mut String) {
        let mut ibuf = itoa::Buffer::new();
        buf.push('|');
        buf.push_str(&String::from_utf8_lossy(&self.accession));
        for (ordinal, class_id) in self.class_ids.iter().enumerate() {
            let Some(class_id) = class_id else {
                continue;
            };
            buf.push('|');
            buf.push_str(classifications.tag(ordinal).unwrap_or_default());
            buf.push_str(ibuf.format(*class_id));
        }
    }
}

/// One annotation line as produced by an annotation source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    /// Identifier of the reference sequence the annotation lies on
    pub reference_id: String,
    /// 1-based inclusive start
    pub start: i32,
    /// 1-based inclusive end
    pub end: i32,
    pub payload: Payload,
}
impl AnnotationRecord {
    #[must_use]
    pub fn new(reference_id: impl Into<String>, start: i32, end: i32, payload: Payload) -> Self {
        Self {
            reference_id: reference_id.into(),
            start,
            end,
            payload,
        }
    }

    /// Builds a record from a raw `(reference, start, end, accession, strand)` tuple
    /// resolving the classification slots through `resolver`.
    pub fn resolve<R: ClassificationResolver>(
        reference_id: impl Into<String>,
        start: i32,
        end: i32,
        accession: &str,
        reverse: bool,
        classifications: &Classifications,
        resolver: &R,
    ) -> Self {
        Self::new(
            reference_id,
            start,
            end,
            Payload::resolve(accession, reverse, classifications, resolver),
        )
    }

    /// Splits the record into its reference id and a normalized interval
    #[must_use]
    pub fn into_parts(self) -> (String, IntervalAnnotation) {
        (
            self.reference_id,
            IntervalAnnotation::new(self.start, self.end, self.payload),
        )
    }
}

/// A stored interval with its payload
///
/// Intervals are 1-based and inclusive; `start <= end` always holds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalAnnotation {
    pub start: i32,
    pub end: i32,
    pub payload: Payload,
}
impl IntervalAnnotation {
    /// Creates an interval, swapping the bounds if they are reversed
    #[must_use]
    pub fn new(start: i32, end: i32, payload: Payload) -> Self {
        let (start, end) = if start <= end {
            (start, end)
        } else {
            (end, start)
        };
        Self {
            start,
            end,
            payload,
        }
    }

    /// Number of positions covered by the interval
    #[must_use]
    pub fn len(&self) -> i64 {
        i64::from(self.end) - i64::from(self.start) + 1
    }

    /// Always false; an interval covers at least one position
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of positions shared with the inclusive interval `[start, end]`
    #[must_use]
    pub fn intersection(&self, start: i64, end: i64) -> i64 {
        let lo = start.max(i64::from(self.start));
        let hi = end.min(i64::from(self.end));
        (hi - lo + 1).max(0)
    }
}

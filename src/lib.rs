//! # annidx
//!
//! A compact, two-file on-disk index mapping reference sequence ids to gene
//! annotations, and an annotator that uses it to tag streamed alignment records
//! with the gene that best covers each alignment.
//!
//! ## File Structure
//!
//! An index directory holds two files that are only valid as a pair:
//!
//! ```text
//! index.idx                         index.dbx
//! ┌────────────────────────┐        ┌──────────────────────────┐
//! │ magic + builder tag    │        │ magic                    │
//! │ reference count        │        │ classification names     │
//! ├────────────────────────┤        ├──────────────────────────┤
//! │ (reference, offset) ───┼───────>│ count + intervals (ref 1)│
//! │ (reference, offset) ───┼───┐    ├──────────────────────────┤
//! │ ...                    │   └───>│ count + intervals (ref 2)│
//! └────────────────────────┘        └──────────────────────────┘
//! ```
//!
//! Each interval carries a payload: the protein accession, the strand and one
//! optional class id per configured classification.
//!
//! ## Usage Example
//!
//! ```
//! use std::io::Cursor;
//! use annidx::{AnnotationRecord, Annotator, Classifications, IndexBuilder, IndexReader, Payload};
//!
//! let dir = tempfile::tempdir().unwrap();
//!
//! // Build
//! let records = vec![AnnotationRecord::new("chr1", 100, 200, Payload::new("P1", false, vec![]))];
//! IndexBuilder::new(Classifications::empty())
//!     .build(records, dir.path())
//!     .unwrap();
//!
//! // Annotate
//! let annotator = Annotator::new(IndexReader::open(dir.path()).unwrap(), 0.9).unwrap();
//! let input = "r1\t0\tchr1.3\t110\t60\t50M\t*\t0\t0\t*\t*\n";
//! let mut output = Vec::new();
//! let stats = annotator.annotate(Cursor::new(input), &mut output).unwrap();
//! assert_eq!(stats.annotated, 1);
//! assert!(String::from_utf8(output).unwrap().contains("chr1.3|P1"));
//! ```

mod alignment;
mod annotator;
mod classification;
mod codec;
pub mod error;
mod header;
mod policy;
mod reader;
mod record;
mod tree;
mod writer;

pub mod prelude;

pub use alignment::{reference_span, AlignmentFields, LineFormat};
pub use annotator::{
    AnnotationStats, Annotator, AnnotatorBuilder, BATCH_SIZE, DEFAULT_MIN_COVERAGE,
};
pub use classification::{ClassificationResolver, Classifications, NoResolver, TableResolver};
pub use error::{ConfigError, Error, HeaderError, ReadError, Result, WriteError};
pub use header::{DataHeader, IndexHeader, BUILDER_TAG, FORMAT, MAGIC_DBX, MAGIC_IDX, SIZE_MAGIC};
pub use policy::{CachePolicy, RNG_SEED};
pub use reader::{strip_version, IndexReader, IndexReaderBuilder};
pub use record::{AnnotationRecord, IntervalAnnotation, Payload};
pub use tree::IntervalTree;
pub use writer::{index_paths, BuildReport, IndexBuilder, DBX_FILE, IDX_FILE};

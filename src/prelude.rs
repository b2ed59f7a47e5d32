pub use super::{
    AnnotationRecord, AnnotationStats, Annotator, AnnotatorBuilder, CachePolicy,
    ClassificationResolver, Classifications, IndexBuilder, IndexReader, IndexReaderBuilder,
    IntervalTree, LineFormat, Payload,
};

pub use crate::error::{Error, Result};

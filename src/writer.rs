//! Index builder
//!
//! Groups annotation records by reference and writes the two index files:
//!
//! - `index.dbx`: the classification table followed by one block of intervals
//!   per annotated reference, each block written in a seeded random order
//! - `index.idx`: the builder tag and one `(reference, offset)` entry per
//!   reference, where the offset points at the block's interval count
//!
//! Both files are first written to temporary files inside the output directory
//! and only moved into place once both are complete, so a failed build never
//! leaves a readable index behind.

use std::{
    collections::HashMap,
    fmt,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use tempfile::NamedTempFile;

use crate::{
    classification::Classifications,
    codec,
    error::{Result, WriteError},
    header::{DataHeader, IndexHeader, BUILDER_TAG},
    policy::RNG_SEED,
    record::{AnnotationRecord, IntervalAnnotation},
};

/// File name of the table of contents within an index directory
pub const IDX_FILE: &str = "index.idx";

/// File name of the interval data within an index directory
pub const DBX_FILE: &str = "index.dbx";

/// Returns the `(idx, dbx)` paths of an index directory
pub fn index_paths<P: AsRef<Path>>(dir: P) -> (PathBuf, PathBuf) {
    let dir = dir.as_ref();
    (dir.join(IDX_FILE), dir.join(DBX_FILE))
}

/// Summary of a finished build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Number of references written to the table of contents
    pub references: usize,
    /// Number of references with at least one interval
    pub annotated_references: usize,
    /// Total number of intervals written
    pub intervals: usize,
}
impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "References: {}\nAnnotated references: {}\nIntervals: {}",
            self.references, self.annotated_references, self.intervals
        )
    }
}

/// Writer that tracks how many bytes have passed through it
struct PositionWriter<W: Write> {
    inner: W,
    pos: u64,
}
impl<W: Write> PositionWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }
    fn position(&self) -> u64 {
        self.pos
    }
}
impl<W: Write> Write for PositionWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Per-reference interval lists in order of first appearance
#[derive(Debug, Default)]
struct Groups {
    lookup: HashMap<String, usize>,
    entries: Vec<(String, Vec<IntervalAnnotation>)>,
}
impl Groups {
    fn insert(&mut self, record: AnnotationRecord) {
        let (reference, interval) = record.into_parts();
        if let Some(&idx) = self.lookup.get(&reference) {
            self.entries[idx].1.push(interval);
        } else {
            self.lookup.insert(reference.clone(), self.entries.len());
            self.entries.push((reference, vec![interval]));
        }
    }
}

/// Builds an annotation index from annotation records
///
/// # Examples
///
/// ```
/// use annidx::{AnnotationRecord, Classifications, IndexBuilder, Payload};
///
/// let dir = tempfile::tempdir().unwrap();
/// let records = vec![
///     AnnotationRecord::new("chr1", 100, 200, Payload::new("P1", false, vec![])),
///     AnnotationRecord::new("chr1", 500, 600, Payload::new("P2", false, vec![])),
/// ];
/// let report = IndexBuilder::new(Classifications::empty())
///     .build(records, dir.path())
///     .unwrap();
/// assert_eq!(report.references, 1);
/// assert_eq!(report.intervals, 2);
/// ```
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    /// Classifications every payload must provide a slot for
    classifications: Classifications,
    /// Seed of the block permutation
    seed: u64,
    /// Program name recorded in the table of contents
    builder_tag: String,
}
impl IndexBuilder {
    #[must_use]
    pub fn new(classifications: Classifications) -> Self {
        Self {
            classifications,
            seed: RNG_SEED,
            builder_tag: BUILDER_TAG.to_string(),
        }
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn builder_tag(mut self, tag: impl Into<String>) -> Self {
        self.builder_tag = tag.into();
        self
    }

    #[must_use]
    pub fn classifications(&self) -> &Classifications {
        &self.classifications
    }

    /// Groups `records` by reference and writes the index into `out_dir`
    ///
    /// An existing index in `out_dir` is replaced.
    pub fn build<I, P>(&self, records: I, out_dir: P) -> Result<BuildReport>
    where
        I: IntoIterator<Item = AnnotationRecord>,
        P: AsRef<Path>,
    {
        let out_dir = out_dir.as_ref();
        if !out_dir.is_dir() {
            return Err(WriteError::NotADirectory(out_dir.display().to_string()).into());
        }

        let n_classes = self.classifications.len();
        let mut groups = Groups::default();
        for record in records {
            if record.payload.class_ids.len() != n_classes {
                return Err(WriteError::PayloadShape {
                    expected: n_classes,
                    got: record.payload.class_ids.len(),
                }
                .into());
            }
            groups.insert(record);
        }
        info!(
            "Building index for {} references in {}",
            groups.entries.len(),
            out_dir.display()
        );

        let mut dbx_tmp = NamedTempFile::new_in(out_dir)?;
        let mut idx_tmp = NamedTempFile::new_in(out_dir)?;

        let (offsets, report) = self.write_data(&mut groups.entries, dbx_tmp.as_file_mut())?;
        self.write_toc(&groups.entries, &offsets, idx_tmp.as_file_mut())?;
        dbx_tmp.as_file().sync_all()?;
        idx_tmp.as_file().sync_all()?;

        // an old table of contents must never be paired with the new data file
        let (idx_path, dbx_path) = index_paths(out_dir);
        match fs::remove_file(&idx_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        dbx_tmp.persist(&dbx_path)?;
        idx_tmp.persist(&idx_path)?;

        info!(
            "Finished index: {} references, {} annotated, {} intervals",
            report.references, report.annotated_references, report.intervals
        );
        Ok(report)
    }

    /// Writes the data file and returns the block offset of every reference
    fn write_data<W: Write>(
        &self,
        entries: &mut [(String, Vec<IntervalAnnotation>)],
        inner: W,
    ) -> Result<(Vec<u64>, BuildReport)> {
        let n_classes = self.classifications.len();
        let mut writer = PositionWriter::new(BufWriter::new(inner));
        DataHeader::new(self.classifications.clone()).write_bytes(&mut writer)?;

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut report = BuildReport {
            references: entries.len(),
            ..BuildReport::default()
        };
        let mut offsets = Vec::with_capacity(entries.len());
        for (reference, intervals) in entries.iter_mut() {
            if intervals.is_empty() {
                offsets.push(0);
                continue;
            }
            let offset = writer.position();
            if i64::try_from(offset).is_err() {
                return Err(WriteError::OffsetOverflow(offset).into());
            }
            intervals.shuffle(&mut rng);
            codec::encode_block(&mut writer, intervals, n_classes)?;
            debug!("Wrote {} intervals for {reference} at {offset}", intervals.len());

            offsets.push(offset);
            report.annotated_references += 1;
            report.intervals += intervals.len();
        }
        writer.flush()?;
        Ok((offsets, report))
    }

    /// Writes the table of contents
    fn write_toc<W: Write>(
        &self,
        entries: &[(String, Vec<IntervalAnnotation>)],
        offsets: &[u64],
        inner: W,
    ) -> Result<()> {
        let mut writer = BufWriter::new(inner);
        IndexHeader::new(self.builder_tag.as_str(), entries.len()).write_bytes(&mut writer)?;
        for ((reference, _), &offset) in entries.iter().zip(offsets) {
            codec::write_bytes(&mut writer, reference.as_bytes())?;
            writer.write_i64::<LittleEndian>(offset as i64)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{record::Payload, Error};

    fn record(reference: &str, start: i32, end: i32, acc: &str) -> AnnotationRecord {
        AnnotationRecord::new(reference, start, end, Payload::new(acc, false, vec![None]))
    }

    fn records() -> Vec<AnnotationRecord> {
        vec![
            record("chr2", 1, 10, "A"),
            record("chr1", 5, 50, "B"),
            record("chr2", 20, 30, "C"),
            record("chr2", 25, 90, "D"),
        ]
    }

    #[test]
    fn test_report() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let report = IndexBuilder::new(Classifications::new(["Taxonomy"]))
            .build(records(), dir.path())?;
        assert_eq!(
            report,
            BuildReport {
                references: 2,
                annotated_references: 2,
                intervals: 4
            }
        );
        let (idx, dbx) = index_paths(dir.path());
        assert!(idx.is_file());
        assert!(dbx.is_file());
        Ok(())
    }

    #[test]
    fn test_build_is_reproducible() -> anyhow::Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;
        let builder = IndexBuilder::new(Classifications::new(["Taxonomy"]));
        builder.build(records(), first.path())?;
        builder.build(records(), second.path())?;

        let (idx_a, dbx_a) = index_paths(first.path());
        let (idx_b, dbx_b) = index_paths(second.path());
        assert_eq!(fs::read(idx_a)?, fs::read(idx_b)?);
        assert_eq!(fs::read(dbx_a)?, fs::read(dbx_b)?);
        Ok(())
    }

    #[test]
    fn test_no_temporary_files_left() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        IndexBuilder::new(Classifications::new(["Taxonomy"])).build(records(), dir.path())?;
        let mut names: Vec<_> = fs::read_dir(dir.path())?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        names.sort();
        assert_eq!(names, vec![DBX_FILE, IDX_FILE]);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_aborts_build() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = IndexBuilder::new(Classifications::new(["Taxonomy", "COG"]))
            .build(records(), dir.path());
        assert!(matches!(
            result,
            Err(Error::WriteError(WriteError::PayloadShape { expected: 2, got: 1 }))
        ));
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_directory() {
        let result = IndexBuilder::new(Classifications::empty())
            .build(Vec::new(), "/definitely/not/a/dir");
        assert!(matches!(
            result,
            Err(Error::WriteError(WriteError::NotADirectory(_)))
        ));
    }

    #[test]
    fn test_grouping_keeps_first_appearance() {
        let mut groups = Groups::default();
        records().into_iter().for_each(|r| groups.insert(r));
        let order: Vec<_> = groups
            .entries
            .iter()
            .map(|(r, v)| (r.as_str(), v.len()))
            .collect();
        assert_eq!(order, vec![("chr2", 3), ("chr1", 1)]);
    }
}

//! Annotation of alignment streams
//!
//! Every alignment line whose reference is in the index and whose span is covered
//! well enough by a stored interval gets that interval's annotation tag inserted
//! into its reference field. All other lines are written unchanged, so the output
//! always has exactly one line per input line, in input order.

use std::{
    collections::HashSet,
    fmt,
    io::{BufRead, Write},
    ops::AddAssign,
    sync::Arc,
};

use anyhow::anyhow;
use log::info;

use crate::{
    alignment::LineFormat,
    error::{ConfigError, Result},
    reader::{strip_version, IndexReader},
};

/// Default minimum fraction of an alignment's span that must be covered
pub const DEFAULT_MIN_COVERAGE: f64 = 0.9;

/// Number of lines handed to the workers at a time in parallel annotation
pub const BATCH_SIZE: usize = 16 * 1024;

/// Counters collected over one annotation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    /// All lines read, including header lines
    pub lines: usize,
    /// Non-header lines
    pub alignments: usize,
    /// Alignments whose reference field was rewritten
    pub annotated: usize,
    /// Distinct references loaded from disk for the first time during the run
    pub references_loaded: usize,
    /// Distinct reference names not found in the index during the run
    pub references_not_found: usize,
}
impl AnnotationStats {
    /// Alignments that passed through unannotated
    #[must_use]
    pub fn not_annotated(&self) -> usize {
        self.alignments - self.annotated
    }
}
impl AddAssign for AnnotationStats {
    fn add_assign(&mut self, rhs: Self) {
        self.lines += rhs.lines;
        self.alignments += rhs.alignments;
        self.annotated += rhs.annotated;
    }
}
impl fmt::Display for AnnotationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lines: {}", self.lines)?;
        writeln!(f, "Alignments: {}", self.alignments)?;
        writeln!(f, "Annotated: {}", self.annotated)?;
        writeln!(f, "References loaded: {}", self.references_loaded)?;
        write!(f, "References not found: {}", self.references_not_found)
    }
}

/// Builder for configured [`Annotator`] instances
///
/// # Examples
///
/// ```no_run
/// use annidx::{AnnotatorBuilder, IndexReader, LineFormat};
///
/// let index = IndexReader::open("annotations/").unwrap();
/// let annotator = AnnotatorBuilder::default()
///     .min_coverage(0.8)
///     .format(LineFormat::sam())
///     .build(index)
///     .unwrap();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotatorBuilder {
    min_coverage: Option<f64>,
    format: Option<LineFormat>,
}
impl AnnotatorBuilder {
    #[must_use]
    pub fn min_coverage(mut self, min_coverage: f64) -> Self {
        self.min_coverage = Some(min_coverage);
        self
    }

    #[must_use]
    pub fn format(mut self, format: LineFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn build(self, index: impl Into<Arc<IndexReader>>) -> Result<Annotator> {
        let min_coverage = self.min_coverage.unwrap_or(DEFAULT_MIN_COVERAGE);
        if !(0.0..=1.0).contains(&min_coverage) {
            return Err(ConfigError::InvalidCoverage(min_coverage).into());
        }
        Ok(Annotator {
            index: index.into(),
            min_coverage,
            format: self.format.unwrap_or_default(),
        })
    }
}

/// Output, counters and missed references of one batch of lines
type ChunkResult = (Vec<u8>, AnnotationStats, HashSet<String>);

/// Rewrites alignment lines with the best annotation from an index
#[derive(Clone)]
pub struct Annotator {
    index: Arc<IndexReader>,
    min_coverage: f64,
    format: LineFormat,
}
impl Annotator {
    /// Creates an annotator with the default SAM layout
    pub fn new(index: impl Into<Arc<IndexReader>>, min_coverage: f64) -> Result<Self> {
        AnnotatorBuilder::default()
            .min_coverage(min_coverage)
            .build(index)
    }

    #[must_use]
    pub fn index(&self) -> &IndexReader {
        &self.index
    }

    #[must_use]
    pub fn min_coverage(&self) -> f64 {
        self.min_coverage
    }

    /// Annotates a single line (without its line terminator) into `out`
    ///
    /// Lines need not be valid UTF-8; anything that cannot be parsed is copied
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index itself is corrupt.
    pub fn annotate_line(&self, line: &[u8], out: &mut Vec<u8>, stats: &mut AnnotationStats) -> Result<()> {
        self.annotate_record(line, out, stats).map(|_| ())
    }

    /// Annotates one line and returns the reference name if it missed the index
    fn annotate_record<'a>(
        &self,
        line: &'a [u8],
        out: &mut Vec<u8>,
        stats: &mut AnnotationStats,
    ) -> Result<Option<&'a str>> {
        stats.lines += 1;
        if self.format.is_header(line) {
            out.extend_from_slice(line);
            return Ok(None);
        }
        stats.alignments += 1;

        let Some(fields) = self.format.parse(line) else {
            out.extend_from_slice(line);
            return Ok(None);
        };
        let Some(tree) = self.index.lookup(fields.reference)? else {
            out.extend_from_slice(line);
            return Ok(Some(strip_version(fields.reference)));
        };
        let Some(best) = tree.best_interval(fields.start, fields.end, self.min_coverage) else {
            out.extend_from_slice(line);
            return Ok(None);
        };

        let mut tag = String::new();
        best.payload.write_tag(self.index.classifications(), &mut tag);
        fields.write_tagged(line, &tag, out);
        stats.annotated += 1;
        Ok(None)
    }

    /// Annotates every line of `input` into `output`
    ///
    /// Line terminators (`\n` or `\r\n`) are preserved.
    pub fn annotate<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<AnnotationStats> {
        let loaded_before = self.index.loaded();
        let mut stats = AnnotationStats::default();
        let mut not_found = HashSet::new();
        let mut line = Vec::new();
        let mut out = Vec::new();
        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let (body, terminator) = split_terminator(&line);
            out.clear();
            if let Some(name) = self.annotate_record(body, &mut out, &mut stats)? {
                if !not_found.contains(name) {
                    not_found.insert(name.to_string());
                }
            }
            out.extend_from_slice(terminator);
            output.write_all(&out)?;
        }
        output.flush()?;
        Ok(self.finish(stats, loaded_before, &not_found))
    }

    /// Annotates `input` into `output` using `num_threads` worker threads
    ///
    /// Lines are read in batches; each batch is split across the workers and the
    /// results are written back in input order. A thread count of zero uses all
    /// available cores.
    pub fn annotate_parallel<R: BufRead, W: Write>(
        &self,
        mut input: R,
        mut output: W,
        num_threads: usize,
    ) -> Result<AnnotationStats> {
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };
        let loaded_before = self.index.loaded();
        let mut stats = AnnotationStats::default();
        let mut not_found = HashSet::new();
        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(BATCH_SIZE);
        loop {
            batch.clear();
            while batch.len() < BATCH_SIZE {
                let mut line = Vec::new();
                if input.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                batch.push(line);
            }
            if batch.is_empty() {
                break;
            }

            let chunk_size = batch.len().div_ceil(num_threads);
            let results = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .chunks(chunk_size)
                    .map(|chunk| scope.spawn(move || self.annotate_chunk(chunk)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .map_err(|_| anyhow!("annotation worker panicked"))?
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            for (out, chunk_stats, chunk_not_found) in results {
                output.write_all(&out)?;
                stats += chunk_stats;
                not_found.extend(chunk_not_found);
            }
        }
        output.flush()?;
        Ok(self.finish(stats, loaded_before, &not_found))
    }

    fn annotate_chunk(&self, lines: &[Vec<u8>]) -> Result<ChunkResult> {
        let mut stats = AnnotationStats::default();
        let mut not_found = HashSet::new();
        let mut out = Vec::with_capacity(lines.iter().map(Vec::len).sum::<usize>());
        for line in lines {
            let (body, terminator) = split_terminator(line);
            if let Some(name) = self.annotate_record(body, &mut out, &mut stats)? {
                not_found.insert(name.to_string());
            }
            out.extend_from_slice(terminator);
        }
        Ok((out, stats, not_found))
    }

    fn finish(
        &self,
        mut stats: AnnotationStats,
        loaded_before: usize,
        not_found: &HashSet<String>,
    ) -> AnnotationStats {
        stats.references_loaded = self.index.loaded().saturating_sub(loaded_before);
        stats.references_not_found = not_found.len();
        info!(
            "Annotated {} of {} alignments ({} references loaded, {} not found)",
            stats.annotated, stats.alignments, stats.references_loaded, stats.references_not_found
        );
        stats
    }
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    let body = line
        .strip_suffix(b"\n")
        .map_or(line, |l| l.strip_suffix(b"\r").unwrap_or(l));
    line.split_at(body.len())
}

//! Index reader and interval tree cache
//!
//! The table of contents is read completely when the index is opened and kept in
//! memory as a map from reference id to block offset. The data file is memory
//! mapped; a reference's block is decoded into an [`IntervalTree`] the first time
//! the reference is looked up and cached from then on.
//!
//! The reader is `Send + Sync`. Cached trees are shared as `Arc` handles and can
//! be read concurrently; cache misses are serialized so that two threads racing
//! on the same cold reference never build its tree twice.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs::{self, File},
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};

use crate::{
    classification::Classifications,
    codec,
    error::{HeaderError, ReadError, Result},
    header::{DataHeader, IndexHeader},
    policy::CachePolicy,
    tree::IntervalTree,
    writer::index_paths,
};

/// Removes a trailing `.<digits>` version suffix from a reference name
///
/// ```
/// use annidx::strip_version;
///
/// assert_eq!(strip_version("NC_000913.3"), "NC_000913");
/// assert_eq!(strip_version("contig.a"), "contig.a");
/// assert_eq!(strip_version("chr1"), "chr1");
/// ```
#[must_use]
pub fn strip_version(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, version))
            if !stem.is_empty()
                && !version.is_empty()
                && version.bytes().all(|b| b.is_ascii_digit()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Trees currently held by the cache, with their load order for eviction
#[derive(Debug, Default)]
struct TreeCache {
    trees: HashMap<String, Arc<IntervalTree>>,
    order: VecDeque<String>,
    /// Every reference decoded at least once, evicted or not
    seen: HashSet<String>,
}

/// Builder for configured [`IndexReader`] instances
///
/// # Examples
///
/// ```no_run
/// use annidx::{CachePolicy, Classifications, IndexReaderBuilder};
///
/// let reader = IndexReaderBuilder::default()
///     .classifications(Classifications::new(["Taxonomy"]))
///     .policy(CachePolicy::Bounded(10_000))
///     .open("annotations/")
///     .unwrap();
/// ```
#[derive(Debug, Default, Clone)]
pub struct IndexReaderBuilder {
    /// Expected classifications, verified against the data file header
    classifications: Option<Classifications>,
    /// Retention policy of the tree cache
    policy: Option<CachePolicy>,
}
impl IndexReaderBuilder {
    #[must_use]
    pub fn classifications(mut self, classifications: Classifications) -> Self {
        self.classifications = Some(classifications);
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn open<P: AsRef<Path>>(self, dir: P) -> Result<IndexReader> {
        let reader = IndexReader::open_with_policy(dir, self.policy.unwrap_or_default())?;
        if let Some(expected) = self.classifications {
            if expected.names() != reader.classifications.names() {
                return Err(HeaderError::ClassificationMismatch {
                    expected: expected.names().to_vec(),
                    found: reader.classifications.names().to_vec(),
                }
                .into());
            }
            // keep the caller's tags, the data file only records names
            return Ok(IndexReader {
                classifications: expected,
                ..reader
            });
        }
        Ok(reader)
    }
}

/// Reader for an annotation index directory
pub struct IndexReader {
    /// Program that built the index
    builder: String,
    /// Classifications recorded in the data file
    classifications: Classifications,
    /// Reference id -> block offset (0 for references without annotations)
    toc: HashMap<String, u64>,
    /// Memory mapped data file
    data: Mmap,
    policy: CachePolicy,
    cache: RwLock<TreeCache>,
    /// Serializes tree construction on cache misses
    build_lock: Mutex<()>,
    /// Distinct names that resolved to no annotated reference
    not_found: Mutex<HashSet<String>>,
    /// Number of block decodes, reloads after eviction included
    loads: AtomicUsize,
}
impl IndexReader {
    /// Opens the index in `dir` with an unbounded cache
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_policy(dir, CachePolicy::default())
    }

    /// Opens the index in `dir` with the given cache policy
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing, is not a regular file, has the
    /// wrong magic bytes or version, or its table of contents is truncated.
    pub fn open_with_policy<P: AsRef<Path>>(dir: P, policy: CachePolicy) -> Result<Self> {
        let (idx_path, dbx_path) = index_paths(dir);

        let file = File::open(&dbx_path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile(dbx_path.display().to_string()).into());
        }
        // Safety: the index is read-only once built and is replaced by rename, not in place
        let data = unsafe { Mmap::map(&file)? };
        let header = DataHeader::from_cursor(&mut Cursor::new(&data[..]))?;

        let toc_bytes = fs::read(&idx_path)?;
        let mut cursor = Cursor::new(toc_bytes.as_slice());
        let index_header = IndexHeader::from_cursor(&mut cursor)?;
        let mut toc = HashMap::with_capacity(index_header.references.min(1 << 24));
        for _ in 0..index_header.references {
            let reference = codec::read_string(&mut cursor)?;
            let offset = codec::read_i64(&mut cursor)?;
            let Ok(offset) = u64::try_from(offset) else {
                return Err(ReadError::InvalidOffset(offset).into());
            };
            toc.insert(reference, offset);
        }
        info!(
            "Opened index built by '{}' with {} references and {} classifications",
            index_header.builder,
            toc.len(),
            header.classifications.len()
        );

        Ok(Self {
            builder: index_header.builder,
            classifications: header.classifications,
            toc,
            data,
            policy,
            cache: RwLock::new(TreeCache::default()),
            build_lock: Mutex::new(()),
            not_found: Mutex::new(HashSet::new()),
            loads: AtomicUsize::new(0),
        })
    }

    /// Returns a builder for configured readers
    #[must_use]
    pub fn builder() -> IndexReaderBuilder {
        IndexReaderBuilder::default()
    }

    /// Program name recorded by the builder of this index
    #[must_use]
    pub fn builder_tag(&self) -> &str {
        &self.builder
    }

    /// Classifications every payload in this index carries
    #[must_use]
    pub fn classifications(&self) -> &Classifications {
        &self.classifications
    }

    /// Number of references in the table of contents
    #[must_use]
    pub fn num_references(&self) -> usize {
        self.toc.len()
    }

    /// Iterates over `(reference, offset)` entries in arbitrary order
    pub fn references(&self) -> impl Iterator<Item = (&str, u64)> {
        self.toc.iter().map(|(reference, &offset)| (reference.as_str(), offset))
    }

    /// Prints the table of contents sorted by offset
    pub fn pprint(&self) {
        let mut entries: Vec<_> = self.references().collect();
        entries.sort_unstable_by_key(|&(reference, offset)| (offset, reference));
        entries.iter().for_each(|(reference, offset)| {
            println!("{reference}\t{offset}");
        });
    }

    /// Number of distinct references whose tree was loaded from disk so far
    ///
    /// A reference evicted by a bounded cache and loaded again counts once.
    #[must_use]
    pub fn loaded(&self) -> usize {
        self.cache.read().seen.len()
    }

    /// Number of blocks decoded from disk so far, reloads included
    #[must_use]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of distinct reference names that were looked up but not found
    #[must_use]
    pub fn num_not_found(&self) -> usize {
        self.not_found.lock().len()
    }

    /// Snapshot of the distinct reference names that were looked up but not found
    #[must_use]
    pub fn not_found(&self) -> Vec<String> {
        let mut names: Vec<_> = self.not_found.lock().iter().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of trees currently held by the cache
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.read().trees.len()
    }

    /// Resolves a reference name to its table of contents entry
    ///
    /// The name is matched as given first and then without a trailing
    /// `.<version>` suffix.
    fn resolve<'a>(&'a self, name: &'a str) -> Option<(&'a str, u64)> {
        if let Some((key, &offset)) = self.toc.get_key_value(name) {
            return Some((key.as_str(), offset));
        }
        let stem = strip_version(name);
        if stem.len() == name.len() {
            return None;
        }
        self.toc
            .get_key_value(stem)
            .map(|(key, &offset)| (key.as_str(), offset))
    }

    /// Returns the interval tree of a reference, loading it on first use
    ///
    /// Returns `Ok(None)` when the reference is not in the index or has no
    /// annotations; such names are remembered for [`IndexReader::not_found`].
    ///
    /// # Errors
    ///
    /// Returns an error if the reference's block in the data file is corrupt.
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<IntervalTree>>> {
        let Some((key, offset)) = self.resolve(name).filter(|&(_, offset)| offset > 0) else {
            self.mark_not_found(strip_version(name));
            return Ok(None);
        };

        if let Some(tree) = self.cache.read().trees.get(key) {
            return Ok(Some(tree.clone()));
        }

        let _guard = self.build_lock.lock();
        // another thread may have built the tree while we waited
        if let Some(tree) = self.cache.read().trees.get(key) {
            return Ok(Some(tree.clone()));
        }
        let tree = Arc::new(self.load_tree(offset)?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!("Loaded {} intervals for {key} from offset {offset}", tree.len());

        let mut cache = self.cache.write();
        if !cache.seen.contains(key) {
            cache.seen.insert(key.to_string());
        }
        cache.trees.insert(key.to_string(), tree.clone());
        cache.order.push_back(key.to_string());
        while self.policy.is_over(cache.trees.len()) {
            let Some(oldest) = cache.order.pop_front() else {
                break;
            };
            cache.trees.remove(&oldest);
        }
        Ok(Some(tree))
    }

    /// Decodes the block at `offset` into a tree
    fn load_tree(&self, offset: u64) -> Result<IntervalTree> {
        if offset >= self.data.len() as u64 {
            return Err(ReadError::OutOfRange(offset, self.data.len()).into());
        }
        let mut cursor = Cursor::new(&self.data[..]);
        cursor.set_position(offset);
        let intervals = codec::decode_block(&mut cursor, self.classifications.len())?;
        Ok(IntervalTree::new(intervals))
    }

    fn mark_not_found(&self, name: &str) {
        let mut not_found = self.not_found.lock();
        if !not_found.contains(name) {
            if not_found.is_empty() {
                warn!("Reference '{name}' not found in index (further misses are only counted)");
            }
            not_found.insert(name.to_string());
        }
    }
}

#[cfg(test)]
mod testing {
    use std::io::Write;

    use super::*;
    use crate::{
        record::{AnnotationRecord, IntervalAnnotation, Payload},
        writer::{IndexBuilder, DBX_FILE, IDX_FILE},
        Error,
    };

    fn classes() -> Classifications {
        Classifications::new(["Taxonomy", "COG"])
    }

    fn record(reference: &str, start: i32, end: i32, acc: &str, tax: i32) -> AnnotationRecord {
        AnnotationRecord::new(
            reference,
            start,
            end,
            Payload::new(acc, start % 2 == 0, vec![Some(tax), None]),
        )
    }

    fn records() -> Vec<AnnotationRecord> {
        let mut records = Vec::new();
        for i in 0..50 {
            records.push(record("REF123", i * 10 + 1, i * 10 + 25, &format!("A{i}"), i));
        }
        records.push(record("REF9", 1, 100, "B", 9));
        records.push(record("REF9", 1, 100, "B", 9));
        records.push(record("REF123", 400, 300, "R", 1));
        records
    }

    fn build(dir: &Path) -> anyhow::Result<()> {
        IndexBuilder::new(classes()).build(records(), dir)?;
        Ok(())
    }

    fn multiset(mut intervals: Vec<IntervalAnnotation>) -> Vec<IntervalAnnotation> {
        intervals.sort();
        intervals
    }

    #[test]
    fn test_roundtrip_multiset() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let reader = IndexReader::open(dir.path())?;
        assert_eq!(reader.num_references(), 2);

        for reference in ["REF123", "REF9"] {
            let expected = multiset(
                records()
                    .into_iter()
                    .filter(|r| r.reference_id == reference)
                    .map(|r| r.into_parts().1)
                    .collect(),
            );
            let tree = reader.lookup(reference)?.expect("reference is annotated");
            let found = multiset(tree.iter().cloned().collect());
            assert_eq!(found, expected);
        }
        Ok(())
    }

    #[test]
    fn test_unknown_reference() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let reader = IndexReader::open(dir.path())?;
        assert!(reader.lookup("chrUn")?.is_none());
        assert!(reader.lookup("chrUn.2")?.is_none());
        assert!(reader.lookup("other")?.is_none());
        assert_eq!(reader.not_found(), vec!["chrUn".to_string(), "other".to_string()]);
        assert_eq!(reader.loaded(), 0);
        Ok(())
    }

    #[test]
    fn test_version_suffix() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let reader = IndexReader::open(dir.path())?;
        let versioned = reader.lookup("REF123.1")?.expect("stem is indexed");
        let plain = reader.lookup("REF123")?.expect("stem is indexed");
        assert!(Arc::ptr_eq(&versioned, &plain));
        assert_eq!(reader.loaded(), 1);
        assert_eq!(reader.num_not_found(), 0);
        Ok(())
    }

    #[test]
    fn test_bounded_cache_keeps_handles_alive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let reader = IndexReaderBuilder::default()
            .policy(CachePolicy::Bounded(1))
            .open(dir.path())?;
        let first = reader.lookup("REF123")?.expect("annotated");
        let _second = reader.lookup("REF9")?.expect("annotated");
        assert_eq!(reader.cached(), 1);
        assert_eq!(first.len(), 51);

        // evicted trees are reloaded on demand
        let again = reader.lookup("REF123")?.expect("annotated");
        assert!(!Arc::ptr_eq(&first, &again));
        assert_eq!(reader.loaded(), 2);
        assert_eq!(reader.loads(), 3);
        Ok(())
    }

    #[test]
    fn test_concurrent_lookups_build_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let reader = IndexReader::open(dir.path())?;
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        assert!(reader.lookup("REF123").unwrap().is_some());
                        assert!(reader.lookup("REF9.4").unwrap().is_some());
                    }
                });
            }
        });
        assert_eq!(reader.loaded(), 2);
        assert_eq!(reader.loads(), 2);
        Ok(())
    }

    #[test]
    fn test_classification_check() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let reader = IndexReaderBuilder::default()
            .classifications(Classifications::with_tags([("Taxonomy", "t"), ("COG", "c")]))
            .open(dir.path())?;
        assert_eq!(reader.classifications().tag(0), Some("t"));

        let result = IndexReaderBuilder::default()
            .classifications(Classifications::new(["Taxonomy"]))
            .open(dir.path());
        assert!(matches!(
            result,
            Err(Error::HeaderError(HeaderError::ClassificationMismatch { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_bad_magic_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let mut bytes = fs::read(dir.path().join(IDX_FILE))?;
        bytes[0] = b'X';
        fs::File::create(dir.path().join(IDX_FILE))?.write_all(&bytes)?;

        let result = IndexReader::open(dir.path());
        assert!(matches!(
            result,
            Err(Error::HeaderError(HeaderError::InvalidMagicNumber { file: "idx", .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_negative_offset_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bytes = Vec::new();
        IndexHeader::new("test", 1).write_bytes(&mut bytes)?;
        codec::write_bytes(&mut bytes, b"REF1")?;
        bytes.extend_from_slice(&(-8i64).to_le_bytes());
        let mut data = Vec::new();
        DataHeader::new(classes()).write_bytes(&mut data)?;
        fs::write(dir.path().join(IDX_FILE), bytes)?;
        fs::write(dir.path().join(DBX_FILE), data)?;

        let result = IndexReader::open(dir.path());
        assert!(matches!(
            result,
            Err(Error::ReadError(ReadError::InvalidOffset(-8)))
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_data_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        build(dir.path())?;
        let path = dir.path().join(DBX_FILE);
        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 4])?;

        let reader = IndexReader::open(dir.path())?;
        let mut failures = 0;
        for reference in ["REF123", "REF9"] {
            if let Err(e) = reader.lookup(reference) {
                assert!(e.is_format_error());
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
        Ok(())
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("REF123.1"), "REF123");
        assert_eq!(strip_version("REF123.12a"), "REF123.12a");
        assert_eq!(strip_version("REF123."), "REF123.");
        assert_eq!(strip_version(".1"), ".1");
        assert_eq!(strip_version("a.b.2"), "a.b");
    }
}

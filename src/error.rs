/// Custom Result type for index operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the annidx library, encompassing all possible error cases
/// that can occur while building, opening, or querying an annotation index.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to index and data file header processing
    HeaderError(#[from] HeaderError),
    /// Errors that occur while reading the index or its interval blocks
    ReadError(#[from] ReadError),
    /// Errors that occur while writing the index
    WriteError(#[from] WriteError),
    /// Invalid annotator or reader configuration
    ConfigError(#[from] ConfigError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// Errors raised while persisting the temporary build files
    PersistError(#[from] tempfile::PersistError),
    /// Generic errors that can occur in any part of the system
    AnyhowError(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error means the index on disk cannot be trusted
    ///
    /// Format errors are fatal for a whole annotation run.
    #[must_use]
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::HeaderError(_) | Self::ReadError(_))
    }
}

/// Errors specific to validating the headers of the `idx` and `dbx` files
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic bytes of a file do not match the expected value
    ///
    /// # Fields
    /// * `file` - Which of the two index files was rejected
    /// * `found` - The bytes that were found in place of the magic
    #[error("Invalid magic bytes in {file} file: {found:?} (index too old or wrong format)")]
    InvalidMagicNumber { file: &'static str, found: Vec<u8> },

    /// The magic bytes match but the format version is unsupported
    ///
    /// # Fields
    /// * `file` - Which of the two index files was rejected
    /// * `version` - The unsupported version number that was found
    #[error("Unsupported format version {version} in {file} file (index too old or wrong format)")]
    InvalidFormatVersion { file: &'static str, version: u16 },

    /// The classification names recorded in the data file differ from the ones requested
    #[error("Classification mismatch: index has {found:?}, expected {expected:?}")]
    ClassificationMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A count field in the header is negative
    ///
    /// # Fields
    /// * `0` - The invalid count that was found
    #[error("Invalid count in header: {0}")]
    InvalidCount(i32),
}

/// Errors that can occur while reading index data
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file being read is not a regular file (e.g., it might be a directory or special file)
    #[error("File is not regular: {0}")]
    IncompatibleFile(String),

    /// The file appears to be truncated or corrupted
    ///
    /// # Fields
    /// * `0` - The byte position where the truncation was detected
    #[error(
        "Number of bytes in file does not match expectation - possibly truncated at byte pos {0}"
    )]
    FileTruncation(usize),

    /// A table of contents offset points outside of the data file
    ///
    /// # Fields
    /// * `0` - The offset recorded in the table of contents
    /// * `1` - The size of the data file
    #[error("Data offset ({0}) is out of file range ({1})")]
    OutOfRange(u64, usize),

    /// A table of contents offset is negative
    ///
    /// # Fields
    /// * `0` - The signed offset as stored on disk
    #[error("Invalid negative data offset ({0})")]
    InvalidOffset(i64),

    /// A negative interval count was found at the start of a block
    #[error("Invalid interval count ({count}) at byte pos {pos}")]
    InvalidIntervalCount { count: i32, pos: usize },

    /// A stored string was not valid UTF-8
    #[error("Invalid UTF-8 string at byte pos {0}")]
    InvalidString(usize),
}

/// Errors that can occur while writing the index
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// More entries than the signed 32-bit count fields can describe
    ///
    /// # Fields
    /// * `what` - The kind of entry that overflowed
    /// * `got` - The number of entries that were requested
    #[error("Too many {what} to encode ({got})")]
    CountOverflow { what: &'static str, got: usize },

    /// A string is too long to be length prefixed
    #[error("String of {0} bytes is too long to encode")]
    StringTooLong(usize),

    /// The data file grew beyond what a signed 64-bit offset can address
    #[error("Data offset ({0}) exceeds the addressable range")]
    OffsetOverflow(u64),

    /// A payload has a different number of classification slots than the index
    ///
    /// # Fields
    /// * `expected` - The number of configured classifications
    /// * `got` - The number of slots in the payload
    #[error("Payload has {got} classification slots, index expects {expected}")]
    PayloadShape { expected: usize, got: usize },

    /// The output directory is missing or not a directory
    #[error("Output path is not a directory: {0}")]
    NotADirectory(String),
}

/// Errors raised by invalid configuration values
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The minimum coverage must lie within `[0, 1]`
    #[error("Minimum coverage must be within [0, 1], got {0}")]
    InvalidCoverage(f64),
}

use std::error::Error as StdError;

/// Custom Result type for savant operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the savant library, encompassing all possible error cases
/// that can occur while opening and reading track files.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to the track file container (open-time failures)
    #[error("Error processing track format: {0}")]
    FormatError(#[from] FormatError),

    /// Errors related to the on-disk block cache
    #[error("Error processing block cache: {0}")]
    CacheError(#[from] CacheError),

    /// Errors that occur while reading from a stream
    #[error("Error reading stream: {0}")]
    ReadError(#[from] ReadError),

    /// Retrieval was interrupted
    #[error("Retrieval interrupted: {0}")]
    RetrievalError(#[from] RetrievalError),

    /// Errors while loading a dictionary side file
    #[error("Error loading dictionary: {0}")]
    DictionaryError(#[from] DictionaryError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error is a transient I/O failure
    ///
    /// Transient failures are eligible for a single retry against the original
    /// source after the cache entry for that source has been invalidated.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::IoError(_) | Self::CacheError(_) => true,
            Self::ReadError(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Checks if the error is a cancellation rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RetrievalError(RetrievalError::Cancelled(_)))
    }
}

/// Errors in the layout of a track file, fatal at open time
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The magic bytes at the head of the file do not match
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 8]),

    /// The format version is not supported by this reader
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// The file type tag is unknown
    #[error("Unknown file type: {0}")]
    UnknownFileType(u32),

    /// The file holds a different kind of track than the one requested
    #[error("Expected a {expected} track but found {found}")]
    WrongTrackKind {
        expected: &'static str,
        found: &'static str,
    },

    /// The level mode tag is unknown
    #[error("Unknown level mode: {0}")]
    UnknownLevelMode(i32),

    /// The level mode is known but cannot be read
    #[error("Unsupported level mode: {0}")]
    UnsupportedLevelMode(&'static str),

    /// A level's record size disagrees with the file header
    #[error("Level record size ({found}) does not match header record size ({expected})")]
    RecordSizeMismatch { expected: u64, found: u64 },

    /// The header record size cannot hold a sample
    #[error("Invalid record size: {0}")]
    InvalidRecordSize(u32),

    /// A level field is out of range
    #[error("Invalid level on reference {reference}: {reason}")]
    InvalidLevel { reference: String, reason: String },

    /// The reference table is malformed
    #[error("Malformed reference table: {0}")]
    InvalidReferenceTable(String),

    /// The interval tree is malformed
    #[error("Malformed interval tree on reference {reference}: {reason}")]
    InvalidTree { reference: String, reason: String },

    /// An interval record cannot be decoded
    #[error("Malformed interval record: {0}")]
    InvalidRecord(String),
}

/// Errors raised by the block cache
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The cache index references a slot outside the cache body
    #[error("Cache slot {slot} for block {block} lies beyond the cache body")]
    SlotOutOfBounds { block: u64, slot: u32 },

    /// The cache slot space is exhausted
    #[error("No cache slots left ({0} claimed)")]
    SlotsExhausted(u32),

    /// The block size is unusable
    #[error("Invalid cache block size: {0}")]
    InvalidBlockSize(usize),
}

/// Errors that can occur while reading from a seekable stream
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// Seek requested past the end of the stream
    #[error("Seek to {position} is beyond stream length {length}")]
    SeekOutOfRange { position: u64, length: u64 },

    /// The stream ended before the requested bytes were read
    #[error("Unexpected end of stream at byte {0}")]
    UnexpectedEof(u64),

    /// The stream or track has been closed
    #[error("Stream is closed: {0}")]
    Closed(String),

    /// No opener is registered for the URI scheme
    #[error("Unsupported URI scheme in: {0}")]
    UnsupportedScheme(String),

    /// The requested range is not a valid 1-based inclusive range
    #[error("Invalid range specified: from ({from}) must be >= 1 and <= to ({to})")]
    InvalidRange { from: u64, to: u64 },
}
impl ReadError {
    /// A short read mid-record on a cached source is treated as a transient failure
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UnexpectedEof(_))
    }
}

/// Why a retrieval was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A newer request for the same track replaced this one
    Superseded,
    /// The caller cancelled the request
    Explicit,
    /// The memory guard tripped
    LowMemory,
}
impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Superseded => write!(f, "superseded by a newer request"),
            Self::Explicit => write!(f, "cancelled"),
            Self::LowMemory => write!(f, "low memory"),
        }
    }
}

/// Errors ending a retrieval early without an I/O fault
#[derive(thiserror::Error, Debug)]
pub enum RetrievalError {
    /// The retrieval was cancelled
    #[error("Retrieval {0}")]
    Cancelled(CancelReason),
}

/// Errors that can occur while loading a dictionary
#[derive(thiserror::Error, Debug)]
pub enum DictionaryError {
    /// A line could not be parsed
    #[error("Malformed dictionary line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[cfg(test)]
mod testing {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_io_error_is_transient() {
        let error: Error = std::io::Error::other("network down").into();
        assert!(error.is_transient());
        assert!(!error.is_cancelled());
    }

    #[test]
    fn test_cache_error_is_transient() {
        let error: Error = CacheError::SlotOutOfBounds { block: 3, slot: 9 }.into();
        assert!(error.is_transient());
    }

    #[test]
    fn test_format_error_is_not_transient() {
        let error: Error = FormatError::UnsupportedVersion(99).into();
        assert!(!error.is_transient());
    }

    #[test]
    fn test_cancelled_is_not_transient() {
        let error: Error = RetrievalError::Cancelled(CancelReason::Superseded).into();
        assert!(error.is_cancelled());
        assert!(!error.is_transient());
    }

    #[test]
    fn test_unexpected_eof_is_transient() {
        let error: Error = ReadError::UnexpectedEof(100).into();
        assert!(error.is_transient());
        let error: Error = ReadError::Closed("x".into()).into();
        assert!(!error.is_transient());
    }

    // ==================== Display Tests ====================

    #[test]
    fn test_dictionary_parse_error_reports_line() {
        let error = DictionaryError::Parse {
            line: 17,
            message: "bad number".to_string(),
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("17"));
        assert!(error_str.contains("bad number"));
    }

    #[test]
    fn test_record_size_mismatch_display() {
        let error = FormatError::RecordSizeMismatch {
            expected: 4,
            found: 8,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains('4'));
        assert!(error_str.contains('8'));
    }

    #[test]
    fn test_cancel_reason_display() {
        let error = RetrievalError::Cancelled(CancelReason::LowMemory);
        assert!(format!("{error}").contains("low memory"));
    }

    #[test]
    fn test_error_from_format_error() {
        let error: Error = FormatError::UnknownFileType(7).into();
        assert!(matches!(error, Error::FormatError(_)));
    }
}

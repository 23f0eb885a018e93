//! # Savant
//!
//! Random-access retrieval for Savant binary track files.
//!
//! A track file is a single container holding a fixed [`FileHeader`], a table
//! mapping reference names (chromosomes) to data segments, a per-reference index
//! and finally the record data itself. Two index shapes exist:
//!
//! 1. Continuous tracks store a flat list of pre-aggregated resolution [`Level`]s.
//!    [`ContinuousSource`] picks the coarsest level that still resolves the view and
//!    streams fixed-size samples from it.
//! 2. Interval tracks store an augmented [`IntervalSearchTree`] over genomic bins.
//!    [`IntervalSource`] descends the tree and decodes only the bins overlapping a query.
//!
//! Sources are opened through a [`SourceContext`], which resolves local paths to
//! memory-mapped streams and remote URIs (through registered [`RemoteOpener`]s) to
//! streams wrapped in a persistent [`CachedSeekableStream`].
//!
//! ```text
//! ┌───────────────────┐
//! │    File Header    │ 32 bytes
//! ├───────────────────┤
//! │  Reference Table  │ Variable size
//! ├───────────────────┤
//! │   Index Section   │ One entry per reference
//! ├───────────────────┤
//! │                   │
//! │   Record Data     │ One segment per reference
//! │                   │
//! └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use savant::{ContinuousSource, DataSource, GenomicRange, Resolution, SourceContext};
//! use savant::retrieval::CancellationToken;
//!
//! fn main() -> savant::Result<()> {
//!     let ctx = SourceContext::default();
//!     let mut source = ContinuousSource::open("./data/coverage.savant", &ctx)?;
//!     let range = GenomicRange::new(1, 2_000_000)?;
//!     let token = CancellationToken::new();
//!     for record in source.records("chr1", range, Resolution::Auto, &token)? {
//!         println!("{}\t{}\t{}", record.reference, record.position, record.value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod continuous;
pub mod dictionary;
pub mod error;
pub mod format;
pub mod interval;
pub mod reference;
pub mod retrieval;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{RemoteOpener, SourceContext, SourceContextBuilder};
pub use continuous::{ContinuousRecord, ContinuousSource, Level, LevelIndex, LevelMode};
pub use dictionary::{Bookmark, Dictionary};
pub use error::{Error, Result};
pub use format::{FileHeader, FileType, ReferenceMap, TrackFile};
pub use interval::{
    BedFields, IntervalRecord, IntervalSearchTree, IntervalSource, IntervalTreeNode, Payload,
};
pub use reference::GenomicRange;
pub use retrieval::{
    CancellationToken, DataSource, Resolution, RetrievalOutcome, TrackRetriever,
};
pub use stream::{
    CacheConfig, CachedSeekableStream, MmapStream, ReaderStream, SeekableStream,
};

/// The magic bytes at the head of every track file.
pub const FILE_MAGIC: &[u8; 8] = b"SAVANTTF";

/// The current track file version.
pub const FILE_VERSION: u32 = 3;

/// The default block size of the persistent stream cache (64 KiB).
pub const DEFAULT_CACHE_BLOCK_SIZE: usize = 64 * 1024;

/// An assumed screen width in samples, used to decide when a coarser level
/// still gives at least two samples per pixel.
pub const NOTIONAL_SCREEN_SIZE: u64 = 1000;

/// Suffix of the dictionary side file that accompanies a track.
pub const DICTIONARY_SUFFIX: &str = ".dict";

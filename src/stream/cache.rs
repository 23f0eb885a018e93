//! Persistent block cache for slow or remote streams
//!
//! A cache file holds, per source, an index of `num_blocks` little-endian `u32`
//! slots followed by the body of cached blocks in claim order:
//!
//! ```text
//! [slot 0][slot 1]...[slot n-1][block data (slot 1)][block data (slot 2)]...
//! ```
//!
//! A slot value of 0 means the block has never been fetched. Otherwise the low 31
//! bits hold the 1-based body slot and the high bit ([`COMMITTED`]) is set once the
//! block's bytes are fully written. A claimed but uncommitted slot is refetched into
//! the same body slot. Every body slot is padded to `block_size` bytes so that slot
//! offsets are computable; the true length of the final block is derived from the
//! source length, which is part of the cache file name.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use parking_lot::Mutex;
use xxhash_rust::xxh64::xxh64;

use super::{SeekableStream, check_seek};
use crate::DEFAULT_CACHE_BLOCK_SIZE;
use crate::error::{CacheError, ReadError, Result};

/// Marks an index slot whose block data is completely written
pub const COMMITTED: u32 = 1 << 31;

/// Width of one index slot in bytes
const SLOT_WIDTH: u64 = 4;

/// Extension of cache files inside the cache directory
const CACHE_EXTENSION: &str = "cache";

/// A cache file shared by every stream reading the same source
pub type SharedCacheFile = Arc<Mutex<CacheFile>>;

/// The on-disk cache of one source
#[derive(Debug)]
pub struct CacheFile {
    path: PathBuf,
    file: File,
    block_size: u64,
    num_blocks: u64,
    /// In-memory mirror of the on-disk index
    slots: Vec<u32>,
    next_slot: u32,
}
impl CacheFile {
    /// Opens the cache file at `path`, creating and zeroing the index if needed
    pub fn open<P: AsRef<Path>>(path: P, num_blocks: u64, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(CacheError::InvalidBlockSize(block_size).into());
        }
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let header_len = num_blocks * SLOT_WIDTH;
        let file_len = file.metadata()?.len();
        let mut slots = vec![0u32; num_blocks as usize];

        if file_len < header_len {
            // new (or truncated) cache: start from an empty index
            file.set_len(0)?;
            file.set_len(header_len)?;
        } else {
            let mut index_buf = vec![0u8; header_len as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut index_buf)?;
            LittleEndian::read_u32_into(&index_buf, &mut slots);

            // a committed slot whose bytes never reached the disk is not committed
            let body_slots = (file_len - header_len) / block_size as u64;
            for slot in &mut slots {
                let number = *slot & !COMMITTED;
                if *slot & COMMITTED != 0 && u64::from(number) > body_slots {
                    *slot = number;
                }
            }
        }

        let next_slot = slots.iter().map(|s| s & !COMMITTED).max().unwrap_or(0) + 1;

        Ok(Self {
            path,
            file,
            block_size: block_size as u64,
            num_blocks,
            slots,
            next_slot,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Returns the body slot assigned to `block` and whether its data is committed
    #[must_use]
    pub fn slot(&self, block: u64) -> Option<(u32, bool)> {
        match self.slots.get(block as usize) {
            Some(&0) | None => None,
            Some(&entry) => Some((entry & !COMMITTED, entry & COMMITTED != 0)),
        }
    }

    fn header_len(&self) -> u64 {
        self.num_blocks * SLOT_WIDTH
    }

    fn body_offset(&self, slot: u32) -> u64 {
        self.header_len() + u64::from(slot - 1) * self.block_size
    }

    fn write_slot(&mut self, block: u64, entry: u32) -> Result<()> {
        let mut buf = [0u8; SLOT_WIDTH as usize];
        LittleEndian::write_u32(&mut buf, entry);
        self.file.seek(SeekFrom::Start(block * SLOT_WIDTH))?;
        self.file.write_all(&buf)?;
        self.slots[block as usize] = entry;
        Ok(())
    }

    /// Fills `buf` from the cache if `block` is committed, returning whether it was
    pub fn read_block(&mut self, block: u64, buf: &mut [u8]) -> Result<bool> {
        let Some((slot, true)) = self.slot(block) else {
            return Ok(false);
        };
        let offset = self.body_offset(slot);
        if offset + buf.len() as u64 > self.file.metadata()?.len() {
            return Err(CacheError::SlotOutOfBounds { block, slot }.into());
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(true)
    }

    /// Assigns a body slot to `block` and records the claim in the index
    ///
    /// The claim is written before the block data. A block that was claimed
    /// but never committed keeps its slot.
    pub fn claim(&mut self, block: u64) -> Result<u32> {
        if let Some((slot, _)) = self.slot(block) {
            return Ok(slot);
        }
        let slot = self.next_slot;
        if slot >= COMMITTED {
            return Err(CacheError::SlotsExhausted(slot - 1).into());
        }
        self.write_slot(block, slot)?;
        self.next_slot += 1;
        debug!("claimed cache slot {slot} for block {block} in {}", self.path.display());
        Ok(slot)
    }

    /// Writes the data of a claimed block and marks its slot committed
    pub fn commit(&mut self, block: u64, slot: u32, data: &[u8]) -> Result<()> {
        let offset = self.body_offset(slot);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        let padding = self.block_size as usize - data.len().min(self.block_size as usize);
        if padding > 0 {
            self.file.write_all(&vec![0u8; padding])?;
        }
        self.file.flush()?;
        self.write_slot(block, slot | COMMITTED)
    }
}

/// Configuration of the persistent stream cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    dir: PathBuf,
    block_size: usize,
    /// Cache files currently open in this process, keyed by path
    open_files: Arc<Mutex<HashMap<PathBuf, Weak<Mutex<CacheFile>>>>>,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("savant-cache"))
    }
}
impl CacheConfig {
    /// Creates a configuration caching into `dir` with the default block size
    #[must_use]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            block_size: DEFAULT_CACHE_BLOCK_SIZE,
            open_files: Arc::default(),
        }
    }

    /// Builds a configuration from `SAVANT_CACHE_DIR` and `SAVANT_CACHE_BLOCK_SIZE`,
    /// falling back to the defaults for unset or unparsable values
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = match std::env::var_os("SAVANT_CACHE_DIR") {
            Some(dir) => Self::new(dir),
            None => Self::default(),
        };
        if let Ok(size) = std::env::var("SAVANT_CACHE_BLOCK_SIZE") {
            match size.parse::<usize>() {
                Ok(size) if size > 0 => config.block_size = size,
                _ => warn!("ignoring invalid SAVANT_CACHE_BLOCK_SIZE: {size}"),
            }
        }
        config
    }

    /// Set the cache block size in bytes
    #[must_use]
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn get_block_size(&self) -> usize {
        self.block_size
    }

    fn source_key(source: &str) -> String {
        format!("{:016x}", xxh64(source.as_bytes(), 0))
    }

    /// Path of the cache file for `source` of the given length
    ///
    /// The block size and source length are part of the name so that a cache
    /// built for a different geometry is never reused.
    #[must_use]
    pub fn cache_path(&self, source: &str, length: u64) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.{CACHE_EXTENSION}",
            Self::source_key(source),
            self.block_size,
            length
        ))
    }

    /// Opens (or joins) the cache file of `source`
    pub fn open(&self, source: &str, length: u64) -> Result<SharedCacheFile> {
        if self.block_size == 0 {
            return Err(CacheError::InvalidBlockSize(self.block_size).into());
        }
        let path = self.cache_path(source, length);
        let mut open_files = self.open_files.lock();
        if let Some(shared) = open_files.get(&path).and_then(Weak::upgrade) {
            return Ok(shared);
        }
        let num_blocks = length.div_ceil(self.block_size as u64);
        let shared = Arc::new(Mutex::new(CacheFile::open(
            &path,
            num_blocks,
            self.block_size,
        )?));
        open_files.insert(path, Arc::downgrade(&shared));
        Ok(shared)
    }

    /// Wraps `inner` in a caching stream backed by this configuration
    pub fn wrap<S: SeekableStream>(&self, inner: S) -> Result<CachedSeekableStream<S>> {
        let cache = self.open(inner.source(), inner.length())?;
        CachedSeekableStream::new(inner, cache)
    }

    /// Deletes every cache file belonging to `source`
    pub fn invalidate(&self, source: &str) -> Result<()> {
        let prefix = format!("{}-", Self::source_key(source));
        self.remove_matching(|name| name.starts_with(&prefix))
    }

    /// Deletes every cache file in the cache directory
    pub fn clear(&self) -> Result<()> {
        self.remove_matching(|_| true)
    }

    fn remove_matching<F: Fn(&str) -> bool>(&self, matches: F) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut open_files = self.open_files.lock();
        for entry in entries {
            let path = entry?.path();
            let is_cache = path.extension().is_some_and(|ext| ext == CACHE_EXTENSION);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if is_cache && matches(name) {
                debug!("removing cache file {}", path.display());
                fs::remove_file(&path)?;
                open_files.remove(&path);
            }
        }
        Ok(())
    }
}

/// A [`SeekableStream`] that persists fixed-size blocks of `inner` to a local cache file.
///
/// Every block is fetched from the wrapped stream at most once; later seeks into
/// the block are served from the cache file. The block under the cursor is held
/// in memory, so sequential reads within a block touch neither source.
pub struct CachedSeekableStream<S: SeekableStream> {
    inner: S,
    cache: SharedCacheFile,
    block_size: u64,
    length: u64,
    position: u64,
    /// Index of the block held in `buffer`
    block: Option<u64>,
    buffer: Vec<u8>,
}
impl<S: SeekableStream> CachedSeekableStream<S> {
    pub fn new(inner: S, cache: SharedCacheFile) -> Result<Self> {
        let block_size = cache.lock().block_size();
        Ok(Self {
            length: inner.length(),
            inner,
            cache,
            block_size,
            position: 0,
            block: None,
            buffer: Vec::new(),
        })
    }

    #[must_use]
    pub fn cache(&self) -> &SharedCacheFile {
        &self.cache
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn block_len(&self, block: u64) -> usize {
        (self.length - block * self.block_size).min(self.block_size) as usize
    }

    /// Makes `block` the in-memory block, fetching and persisting it on a miss
    fn load_block(&mut self, block: u64) -> Result<()> {
        if self.block == Some(block) {
            return Ok(());
        }
        self.block = None;
        let len = self.block_len(block);
        self.buffer.resize(len, 0);

        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock();
        if cache.read_block(block, &mut self.buffer)? {
            debug!("cache hit for block {block} of {}", self.inner.source());
            self.block = Some(block);
            return Ok(());
        }

        debug!("cache miss for block {block} of {}", self.inner.source());
        let slot = cache.claim(block)?;
        let start = block * self.block_size;
        self.inner.seek(start)?;
        let n = self.inner.read(&mut self.buffer)?;
        if n < len {
            return Err(ReadError::UnexpectedEof(start + n as u64).into());
        }
        cache.commit(block, slot, &self.buffer)?;
        self.block = Some(block);
        Ok(())
    }
}
impl<S: SeekableStream> SeekableStream for CachedSeekableStream<S> {
    fn source(&self) -> &str {
        self.inner.source()
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        check_seek(position, self.length)?;
        self.position = position;
        if position < self.length {
            self.load_block(position / self.block_size)?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && self.position < self.length {
            let block = self.position / self.block_size;
            self.load_block(block)?;
            let offset = (self.position - block * self.block_size) as usize;
            let n = (buf.len() - filled).min(self.buffer.len() - offset);
            buf[filled..filled + n].copy_from_slice(&self.buffer[offset..offset + n]);
            filled += n;
            self.position += n as u64;
        }
        Ok(filled)
    }

    fn close(&mut self) -> Result<()> {
        self.block = None;
        self.buffer = Vec::new();
        self.inner.close()
    }
}

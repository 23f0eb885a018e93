//! Seekable byte streams
//!
//! Every track file is read through a [`SeekableStream`]: a byte-addressable source
//! with an explicit cursor. Local files are served by [`MmapStream`], arbitrary
//! `Read + Seek` sources by [`ReaderStream`], and slow or remote sources are wrapped
//! in a [`CachedSeekableStream`] that persists fixed-size blocks to a local cache file.

mod cache;
mod mmap;

use std::io;

use auto_impl::auto_impl;

use crate::error::{ReadError, Result};

pub use cache::{CacheConfig, CacheFile, CachedSeekableStream, SharedCacheFile};
pub use mmap::MmapStream;

/// A byte stream with random access.
///
/// `read` fills the whole buffer unless the end of the stream is reached first,
/// in which case it returns the number of bytes actually read.
#[auto_impl(&mut, Box)]
pub trait SeekableStream: Send {
    /// Identifier of the underlying source (path or URI)
    fn source(&self) -> &str;

    /// Total length of the stream in bytes
    fn length(&self) -> u64;

    /// Current position of the read cursor
    fn position(&self) -> u64;

    /// Moves the read cursor to `position`, which must not exceed `length()`
    fn seek(&mut self, position: u64) -> Result<()>;

    /// Reads into `buf`, looping internally until it is full or the stream ends
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases the underlying resources; later reads fail
    fn close(&mut self) -> Result<()>;

    /// True iff the cursor is at or beyond the end of the stream
    fn eof(&self) -> bool {
        self.position() >= self.length()
    }

    /// Single-byte read through the buffer path
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }
}

/// Reads exactly `buf.len()` bytes or fails with [`ReadError::UnexpectedEof`]
pub fn read_exact<S: SeekableStream + ?Sized>(stream: &mut S, buf: &mut [u8]) -> Result<()> {
    let n = stream.read(buf)?;
    if n < buf.len() {
        return Err(ReadError::UnexpectedEof(stream.position()).into());
    }
    Ok(())
}

pub(crate) fn check_seek(position: u64, length: u64) -> Result<()> {
    if position > length {
        return Err(ReadError::SeekOutOfRange { position, length }.into());
    }
    Ok(())
}

/// A [`SeekableStream`] over any `Read + Seek` source.
///
/// Useful for in-memory buffers and for remote transports that already expose a
/// blocking seekable reader.
pub struct ReaderStream<R: io::Read + io::Seek + Send> {
    source: String,
    inner: Option<R>,
    length: u64,
    position: u64,
}
impl<R: io::Read + io::Seek + Send> ReaderStream<R> {
    /// Wraps `inner`, measuring its length by seeking to the end
    pub fn new(source: impl Into<String>, mut inner: R) -> Result<Self> {
        let length = inner.seek(io::SeekFrom::End(0))?;
        inner.seek(io::SeekFrom::Start(0))?;
        Ok(Self {
            source: source.into(),
            inner: Some(inner),
            length,
            position: 0,
        })
    }

    fn inner_mut(&mut self) -> Result<&mut R> {
        match self.inner.as_mut() {
            Some(inner) => Ok(inner),
            None => Err(ReadError::Closed(self.source.clone()).into()),
        }
    }
}
impl<R: io::Read + io::Seek + Send> SeekableStream for ReaderStream<R> {
    fn source(&self) -> &str {
        &self.source
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        check_seek(position, self.length)?;
        self.inner_mut()?.seek(io::SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner_mut()?;
        let mut filled = 0;
        while filled < buf.len() {
            match inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    fn close(&mut self) -> Result<()> {
        self.inner = None;
        Ok(())
    }
}

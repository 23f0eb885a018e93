use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use super::{SeekableStream, check_seek};
use crate::error::{ReadError, Result};

/// A memory-mapped stream over a local file
pub struct MmapStream {
    source: String,
    /// `None` for empty files, which cannot be mapped
    inner: Option<Mmap>,
    length: u64,
    position: u64,
    closed: bool,
}
impl MmapStream {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = path.as_ref().display().to_string();
        let file = File::open(path)?;
        let length = file.metadata()?.len();

        // Load the mmap
        let inner = if length == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file) }?)
        };

        Ok(Self {
            source,
            inner,
            length,
            position: 0,
            closed: false,
        })
    }
}
impl SeekableStream for MmapStream {
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
        if self.closed {
            return Err(ReadError::Closed(self.source.clone()).into());
        }
        check_seek(position, self.length)?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(ReadError::Closed(self.source.clone()).into());
        }
        let Some(map) = self.inner.as_ref() else {
            return Ok(0);
        };
        let start = (self.position as usize).min(map.len());
        let end = (start + buf.len()).min(map.len());
        let n = end - start;
        buf[..n].copy_from_slice(&map[start..end]);
        self.position += n as u64;
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.inner = None;
        self.closed = true;
        Ok(())
    }
}

use std::collections::HashMap;
use std::io;

use byteorder::{LittleEndian, ReadBytesExt};
use log::info;

use super::header::{FileHeader, FileType, SIZE_HEADER};
use super::read_string;
use crate::context::SourceContext;
use crate::error::{Error, FormatError, ReadError, Result};
use crate::reference::homogenize;
use crate::stream::{self, SeekableStream};

/// Location of one reference's data segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceEntry {
    /// Offset of the segment relative to the start of the record data
    pub offset: u64,
    /// Length of the segment in bytes
    pub length: u64,
}

/// The reference-name table of a track file
#[derive(Debug, Clone, Default)]
pub struct ReferenceMap {
    /// Names in file order
    names: Vec<String>,
    entries: HashMap<String, ReferenceEntry>,
    /// Homogenized name to stored name
    aliases: HashMap<String, String>,
}
impl ReferenceMap {
    pub fn insert(&mut self, name: String, entry: ReferenceEntry) -> Result<()> {
        if self.entries.contains_key(&name) {
            return Err(
                FormatError::InvalidReferenceTable(format!("duplicate reference {name}")).into(),
            );
        }
        self.aliases.entry(homogenize(&name)).or_insert_with(|| name.clone());
        self.entries.insert(name.clone(), entry);
        self.names.push(name);
        Ok(())
    }

    /// Reads the reference table: a `u32` count followed by `(name, offset, length)` triples
    pub fn read_from<R: io::Read>(reader: &mut R) -> Result<Self> {
        let count = reader.read_u32::<LittleEndian>()?;
        let mut map = Self::default();
        for _ in 0..count {
            let name = read_string(reader)?;
            let offset = reader.read_u64::<LittleEndian>()?;
            let length = reader.read_u64::<LittleEndian>()?;
            map.insert(name, ReferenceEntry { offset, length })?;
        }
        Ok(map)
    }

    /// Resolves `name` to the name stored in the file, retrying once with the
    /// homogenized form (`chr1` and `1` match each other)
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some((stored, _)) = self.entries.get_key_value(name) {
            return Some(stored);
        }
        self.aliases.get(&homogenize(name)).map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ReferenceEntry> {
        self.entries.get(name).copied()
    }

    /// Reference names in file order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// An opened track file.
///
/// After [`TrackFile::from_stream`] the cursor sits at the start of the index
/// section. The owning source parses its index and then calls
/// [`TrackFile::end_header`], after which reference-relative seeks are available.
pub struct TrackFile {
    uri: String,
    stream: Box<dyn SeekableStream>,
    header: FileHeader,
    file_type: FileType,
    references: ReferenceMap,
    /// Absolute offset of the record data (end of the header section)
    data_offset: u64,
    closed: bool,
}
impl TrackFile {
    /// Opens `uri` through the context and reads the header and reference table
    pub fn open(uri: &str, ctx: &SourceContext) -> Result<Self> {
        let stream = ctx.open_stream(uri)?;
        Self::from_stream(uri, stream)
    }

    pub fn from_stream(uri: &str, mut stream: Box<dyn SeekableStream>) -> Result<Self> {
        let mut header_buf = [0u8; SIZE_HEADER];
        stream.seek(0)?;
        stream::read_exact(stream.as_mut(), &mut header_buf)?;
        let header = FileHeader::from_bytes(&header_buf)?;
        let file_type = header.file_type()?;

        let mut file = Self {
            uri: uri.to_string(),
            stream,
            header,
            file_type,
            references: ReferenceMap::default(),
            data_offset: 0,
            closed: false,
        };
        file.references = ReferenceMap::read_from(&mut file)?;
        file.data_offset = file.stream.position();

        info!(
            "opened {} track {} with {} references",
            file.file_type.kind(),
            file.uri,
            file.references.len()
        );
        Ok(file)
    }

    /// Marks the current position as the end of the header section
    pub(crate) fn end_header(&mut self) -> Result<()> {
        self.data_offset = self.stream.position();
        for name in self.references.names() {
            let entry = self.references.entries[name];
            let end = self
                .data_offset
                .checked_add(entry.offset)
                .and_then(|start| start.checked_add(entry.length));
            if !end.is_some_and(|end| end <= self.stream.length()) {
                return Err(FormatError::InvalidReferenceTable(format!(
                    "segment of {name} extends past the end of the file"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Fails unless the file holds the given kind of track
    pub(crate) fn expect_kind(&self, continuous: bool) -> Result<()> {
        if self.file_type.is_continuous() == continuous {
            return Ok(());
        }
        Err(FormatError::WrongTrackKind {
            expected: if continuous { "continuous" } else { "interval" },
            found: self.file_type.kind(),
        }
        .into())
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    #[must_use]
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    #[must_use]
    pub fn references(&self) -> &ReferenceMap {
        &self.references
    }

    #[must_use]
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ReadError::Closed(self.uri.clone()).into());
        }
        Ok(())
    }

    fn entry(&self, reference: &str) -> Result<ReferenceEntry> {
        self.references.get(reference).ok_or_else(|| {
            FormatError::InvalidReferenceTable(format!("unknown reference {reference}")).into()
        })
    }

    /// Seeks to `offset` bytes into the data segment of `reference`
    pub fn seek(&mut self, reference: &str, offset: u64) -> Result<()> {
        self.ensure_open()?;
        let entry = self.entry(reference)?;
        let position = self
            .data_offset
            .saturating_add(entry.offset)
            .saturating_add(offset);
        self.stream.seek(position)
    }

    /// Current cursor position relative to the data segment of `reference`
    pub fn position_in(&self, reference: &str) -> Result<u64> {
        let entry = self.entry(reference)?;
        Ok(self
            .stream
            .position()
            .saturating_sub(self.data_offset.saturating_add(entry.offset)))
    }

    /// Reads exactly `buf.len()` bytes at the cursor
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        stream::read_exact(self.stream.as_mut(), buf)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.close()
    }
}
impl io::Read for TrackFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other(ReadError::Closed(self.uri.clone())));
        }
        self.stream.read(buf).map_err(|e| match e {
            Error::IoError(e) => e,
            e => io::Error::other(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::testing::{TrackBuilder, memory_track};

    #[test]
    fn test_reference_map_resolves_homogenized_names() -> Result<()> {
        let mut map = ReferenceMap::default();
        map.insert("chr1".into(), ReferenceEntry { offset: 0, length: 4 })?;
        map.insert("2".into(), ReferenceEntry { offset: 4, length: 4 })?;
        assert_eq!(map.resolve("chr1"), Some("chr1"));
        assert_eq!(map.resolve("1"), Some("chr1"));
        assert_eq!(map.resolve("chr2"), Some("2"));
        assert_eq!(map.resolve("CHR2"), Some("2"));
        assert_eq!(map.resolve("chr3"), None);
        Ok(())
    }

    #[test]
    fn test_reference_map_rejects_duplicates() {
        let mut map = ReferenceMap::default();
        let entry = ReferenceEntry { offset: 0, length: 0 };
        map.insert("chr1".into(), entry).unwrap();
        assert!(map.insert("chr1".into(), entry).is_err());
    }

    #[test]
    fn test_track_file_reads_reference_table() -> Result<()> {
        let bytes = TrackBuilder::new(FileType::IntervalGeneric, 0)
            .reference("chr1", Vec::new(), b"abcd".to_vec())
            .reference("chr2", Vec::new(), b"efghij".to_vec())
            .build();
        let mut file = memory_track("mem://track", bytes)?;
        file.end_header()?;
        assert_eq!(file.references().names(), &["chr1", "chr2"]);
        assert_eq!(
            file.references().get("chr2"),
            Some(ReferenceEntry { offset: 4, length: 6 })
        );

        file.seek("chr2", 2)?;
        let mut buf = [0u8; 3];
        file.read_exact(&mut buf)?;
        assert_eq!(&buf, b"ghi");
        assert_eq!(file.position_in("chr2")?, 5);
        Ok(())
    }

    #[test]
    fn test_segment_past_end_is_format_error() -> Result<()> {
        let mut bytes = TrackBuilder::new(FileType::IntervalGeneric, 0)
            .reference("chr1", Vec::new(), b"abcd".to_vec())
            .build();
        bytes.truncate(bytes.len() - 2);
        let mut file = memory_track("mem://short", bytes)?;
        assert!(matches!(file.end_header(), Err(Error::FormatError(_))));
        Ok(())
    }

    #[test]
    fn test_segment_offset_overflow_is_format_error() -> Result<()> {
        let mut bytes = TrackBuilder::new(FileType::IntervalGeneric, 0)
            .reference("chr1", Vec::new(), vec![0; 16])
            .build();
        // header, reference count, name length and name precede the offset
        let at = SIZE_HEADER + 4 + 4 + 4;
        bytes[at..at + 8].copy_from_slice(&u64::MAX.to_le_bytes());
        let mut file = memory_track("mem://overflow", bytes)?;
        assert!(matches!(
            file.end_header(),
            Err(Error::FormatError(FormatError::InvalidReferenceTable(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_header_fails() {
        let bytes = TrackBuilder::new(FileType::IntervalGeneric, 0).build();
        assert!(memory_track("mem://trunc", bytes[..10].to_vec()).is_err());
    }

    #[test]
    fn test_closed_track_rejects_reads() -> Result<()> {
        let bytes = TrackBuilder::new(FileType::IntervalGeneric, 0)
            .reference("chr1", Vec::new(), b"abcd".to_vec())
            .build();
        let mut file = memory_track("mem://closed", bytes)?;
        file.end_header()?;
        file.close()?;
        assert!(file.seek("chr1", 0).is_err());
        let mut buf = [0u8; 1];
        assert!(file.read(&mut buf).is_err());
        Ok(())
    }

    #[test]
    fn test_wrong_kind_detected() -> Result<()> {
        let bytes = TrackBuilder::new(FileType::IntervalBed, 0).build();
        let file = memory_track("mem://kind", bytes)?;
        assert!(file.expect_kind(false).is_ok());
        assert!(file.expect_kind(true).is_err());
        Ok(())
    }
}

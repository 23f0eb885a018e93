//! Test doubles and synthetic track files

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::Mutex;

use crate::context::RemoteOpener;
use crate::error::Result;
use crate::format::{FileHeader, FileType, TrackFile};
use crate::interval::{IntervalRecord, Payload, Strand};
use crate::stream::{ReaderStream, SeekableStream};

/// An in-memory stream that counts read calls and can fail on demand
pub(crate) struct CountingStream {
    inner: ReaderStream<Cursor<Vec<u8>>>,
    reads: Arc<Mutex<usize>>,
    /// Reads succeed this many times, then fail
    fail_after: Option<usize>,
    /// Reads touching any byte at or past this position fail
    fail_from: Option<u64>,
    calls: usize,
}
impl CountingStream {
    pub fn new(source: &str, data: Vec<u8>) -> (Self, Arc<Mutex<usize>>) {
        Self::with_counter(source, data, Arc::default())
    }

    pub fn with_counter(
        source: &str,
        data: Vec<u8>,
        reads: Arc<Mutex<usize>>,
    ) -> (Self, Arc<Mutex<usize>>) {
        let stream = Self {
            inner: ReaderStream::new(source, Cursor::new(data)).unwrap(),
            reads: Arc::clone(&reads),
            fail_after: None,
            fail_from: None,
            calls: 0,
        };
        (stream, reads)
    }

    pub fn failing(source: &str, data: Vec<u8>, ok_reads: usize) -> (Self, Arc<Mutex<usize>>) {
        let (mut stream, reads) = Self::new(source, data);
        stream.fail_after = Some(ok_reads);
        (stream, reads)
    }
}
impl SeekableStream for CountingStream {
    fn source(&self) -> &str {
        self.inner.source()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.calls += 1;
        if self.fail_after.is_some_and(|n| self.calls > n)
            || self
                .fail_from
                .is_some_and(|pos| self.position() + buf.len() as u64 > pos)
        {
            return Err(io::Error::other("injected read failure").into());
        }
        *self.reads.lock() += 1;
        self.inner.read(buf)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Serves in-memory files for a test URI scheme
#[derive(Default)]
pub(crate) struct MemoryOpener {
    files: HashMap<String, Vec<u8>>,
    reads: Arc<Mutex<usize>>,
    opens: Arc<Mutex<usize>>,
    /// The first opened stream fails on reads touching this position or later
    fail_first_from: Option<u64>,
}
impl MemoryOpener {
    #[must_use]
    pub fn file(mut self, uri: &str, data: Vec<u8>) -> Self {
        self.files.insert(uri.to_string(), data);
        self
    }

    #[must_use]
    pub fn fail_first_from(mut self, position: u64) -> Self {
        self.fail_first_from = Some(position);
        self
    }

    pub fn reads(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.reads)
    }

    pub fn opens(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.opens)
    }
}
impl RemoteOpener for MemoryOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn SeekableStream>> {
        let Some(data) = self.files.get(uri) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, uri.to_string()).into());
        };
        let mut opens = self.opens.lock();
        *opens += 1;
        let (mut stream, _) =
            CountingStream::with_counter(uri, data.clone(), Arc::clone(&self.reads));
        if *opens == 1 {
            stream.fail_from = self.fail_first_from;
        }
        Ok(Box::new(stream))
    }
}

/// Opens a track from bytes without parsing any index
pub(crate) fn memory_track(uri: &str, bytes: Vec<u8>) -> Result<TrackFile> {
    let stream = ReaderStream::new(uri, Cursor::new(bytes))?;
    TrackFile::from_stream(uri, Box::new(stream))
}

pub(crate) fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

/// Assembles a track file from per-reference index and data sections
pub(crate) struct TrackBuilder {
    header: FileHeader,
    references: Vec<(String, Vec<u8>, Vec<u8>)>,
}
impl TrackBuilder {
    pub fn new(file_type: FileType, record_size: u32) -> Self {
        Self {
            header: FileHeader::new(file_type, record_size),
            references: Vec::new(),
        }
    }

    #[must_use]
    pub fn reference(mut self, name: &str, index: Vec<u8>, data: Vec<u8>) -> Self {
        self.references.push((name.to_string(), index, data));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes().to_vec();
        bytes
            .write_u32::<LittleEndian>(self.references.len() as u32)
            .unwrap();
        let mut offset = 0u64;
        for (name, _, data) in &self.references {
            write_string(&mut bytes, name);
            bytes.write_u64::<LittleEndian>(offset).unwrap();
            bytes.write_u64::<LittleEndian>(data.len() as u64).unwrap();
            offset += data.len() as u64;
        }
        for (_, index, _) in &self.references {
            bytes.extend_from_slice(index);
        }
        for (_, _, data) in &self.references {
            bytes.extend_from_slice(data);
        }
        bytes
    }
}

/// One level header field set, written verbatim
pub(crate) struct RawLevel {
    pub offset: i64,
    pub size: i64,
    pub record_size: i64,
    pub resolution: i64,
    pub mode: i32,
}
impl RawLevel {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.write_i64::<LittleEndian>(self.offset).unwrap();
        buf.write_i64::<LittleEndian>(self.size).unwrap();
        buf.write_i64::<LittleEndian>(self.record_size).unwrap();
        buf.write_i64::<LittleEndian>(self.resolution).unwrap();
        buf.write_i32::<LittleEndian>(self.mode).unwrap();
        if self.mode == 0 {
            buf.write_i32::<LittleEndian>(1).unwrap();
            buf.write_i32::<LittleEndian>(self.resolution as i32).unwrap();
            buf.write_i32::<LittleEndian>(self.resolution as i32).unwrap();
        }
    }
}

/// Builds the index and data of one continuous reference.
///
/// Each level is `(resolution, values)`; levels are laid out back to back.
pub(crate) fn continuous_reference(
    record_size: u32,
    levels: &[(u64, Vec<f32>)],
) -> (Vec<u8>, Vec<u8>) {
    let mut index = Vec::new();
    let mut data = Vec::new();
    index.write_i32::<LittleEndian>(levels.len() as i32).unwrap();
    for (resolution, values) in levels {
        let offset = data.len() as i64;
        for value in values {
            data.write_f32::<LittleEndian>(*value).unwrap();
            data.extend(std::iter::repeat_n(0u8, record_size as usize - 4));
        }
        RawLevel {
            offset,
            size: data.len() as i64 - offset,
            record_size: i64::from(record_size),
            resolution: *resolution as i64,
            mode: 0,
        }
        .write(&mut index);
    }
    (index, data)
}

pub(crate) fn encode_record(buf: &mut Vec<u8>, record: &IntervalRecord) {
    buf.write_u32::<LittleEndian>(record.start as u32).unwrap();
    buf.write_u32::<LittleEndian>(record.end as u32).unwrap();
    match &record.payload {
        Payload::Generic { description } => write_string(buf, description),
        Payload::Bed(bed) => {
            write_string(buf, &bed.name);
            buf.write_f32::<LittleEndian>(bed.score).unwrap();
            buf.push(match bed.strand {
                Strand::Forward => b'+',
                Strand::Reverse => b'-',
                Strand::Unknown => b'.',
            });
            buf.write_u32::<LittleEndian>(bed.thick_start as u32).unwrap();
            buf.write_u32::<LittleEndian>(bed.thick_end as u32).unwrap();
            buf.write_u32::<LittleEndian>(bed.item_rgb).unwrap();
            buf.write_u32::<LittleEndian>(bed.blocks.len() as u32).unwrap();
            for block in &bed.blocks {
                buf.write_u32::<LittleEndian>(block.start).unwrap();
                buf.write_u32::<LittleEndian>(block.size).unwrap();
            }
        }
    }
}

struct FixtureNode {
    start: u64,
    end: u64,
    children: Vec<usize>,
    records: Vec<IntervalRecord>,
}

/// Builds the index and data of one interval reference.
///
/// The tree halves `[1, span]` down to `depth` levels and stores every record at
/// the deepest node whose bin fully contains it.
pub(crate) fn interval_reference(
    span: u64,
    depth: usize,
    records: &[IntervalRecord],
) -> (Vec<u8>, Vec<u8>) {
    let mut nodes: Vec<FixtureNode> = Vec::new();
    build_bins(&mut nodes, 1, span, depth);

    for record in records {
        let mut current = 0;
        'descend: loop {
            for &child in &nodes[current].children {
                if nodes[child].start <= record.start && record.end <= nodes[child].end {
                    current = child;
                    continue 'descend;
                }
            }
            break;
        }
        nodes[current].records.push(record.clone());
    }

    let mut subtree = vec![0u64; nodes.len()];
    for i in (0..nodes.len()).rev() {
        subtree[i] = nodes[i].records.len() as u64
            + nodes[i].children.iter().map(|&c| subtree[c]).sum::<u64>();
    }

    let mut index = Vec::new();
    let mut data = Vec::new();
    index.write_u32::<LittleEndian>(nodes.len() as u32).unwrap();
    for (i, node) in nodes.iter().enumerate() {
        let start_byte = if node.records.is_empty() {
            -1
        } else {
            data.len() as i64
        };
        for record in &node.records {
            encode_record(&mut data, record);
        }
        index.write_i32::<LittleEndian>(i as i32).unwrap();
        index.write_i64::<LittleEndian>(node.start as i64).unwrap();
        index.write_i64::<LittleEndian>(node.end as i64).unwrap();
        index.write_i64::<LittleEndian>(node.records.len() as i64).unwrap();
        index.write_i64::<LittleEndian>(subtree[i] as i64).unwrap();
        index.write_i64::<LittleEndian>(start_byte).unwrap();
        index.write_u32::<LittleEndian>(node.children.len() as u32).unwrap();
        for &child in &node.children {
            index.write_i32::<LittleEndian>(child as i32).unwrap();
        }
    }
    (index, data)
}

/// Appends the pre-order bins of `[start, end]`
fn build_bins(nodes: &mut Vec<FixtureNode>, start: u64, end: u64, depth: usize) -> usize {
    let id = nodes.len();
    nodes.push(FixtureNode {
        start,
        end,
        children: Vec::new(),
        records: Vec::new(),
    });
    if depth > 0 && end > start {
        let mid = start + (end - start) / 2;
        let left = build_bins(nodes, start, mid, depth - 1);
        let right = build_bins(nodes, mid + 1, end, depth - 1);
        nodes[id].children = vec![left, right];
    }
    id
}

pub(crate) fn generic(start: u64, end: u64, description: &str) -> IntervalRecord {
    IntervalRecord {
        start,
        end,
        payload: Payload::Generic {
            description: description.to_string(),
        },
    }
}


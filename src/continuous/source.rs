use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::level::{Level, LevelIndex};
use crate::context::SourceContext;
use crate::error::{FormatError, ReadError, Result};
use crate::format::TrackFile;
use crate::reference::GenomicRange;
use crate::retrieval::{CancellationToken, DataSource, Resolution};

/// One sample of a continuous track
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousRecord {
    pub reference: Arc<str>,
    pub position: u64,
    pub value: f32,
}

/// A continuous track opened for retrieval
pub struct ContinuousSource {
    ctx: SourceContext,
    track: TrackFile,
    record_size: u64,
    /// Level list of every reference, keyed by stored name
    indexes: HashMap<String, LevelIndex>,
}
impl ContinuousSource {
    /// Opens `uri` and reads the level list of every reference
    pub fn open(uri: &str, ctx: &SourceContext) -> Result<Self> {
        let track = TrackFile::open(uri, ctx)?;
        Self::from_track(track, ctx.clone())
    }

    /// Reads the level lists of a track whose cursor sits at its index section
    pub fn from_track(mut track: TrackFile, ctx: SourceContext) -> Result<Self> {
        track.expect_kind(true)?;
        let record_size = track.header().record_size;
        if record_size < 4 {
            return Err(FormatError::InvalidRecordSize(record_size).into());
        }
        let record_size = u64::from(record_size);

        let names = track.references().names().to_vec();
        let mut indexes = HashMap::with_capacity(names.len());
        for name in names {
            let segment_len = track.references().get(&name).map_or(0, |entry| entry.length);
            let index = LevelIndex::read_from(&mut track, &name, record_size, segment_len)?;
            debug!("{name}: {} levels", index.len());
            indexes.insert(name, index);
        }
        track.end_header()?;

        Ok(Self {
            ctx,
            track,
            record_size,
            indexes,
        })
    }

    #[must_use]
    pub fn track(&self) -> &TrackFile {
        &self.track
    }

    #[must_use]
    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    /// Level list of `reference`, matched with the homogenized fallback
    #[must_use]
    pub fn levels(&self, reference: &str) -> Option<&LevelIndex> {
        let name = self.track.references().resolve(reference)?;
        self.indexes.get(name)
    }

    /// Streams the records of `level` covering `range`
    fn read_level(
        &mut self,
        stored: &str,
        reference: Arc<str>,
        level: Level,
        range: GenomicRange,
        token: &CancellationToken,
    ) -> Result<Vec<ContinuousRecord>> {
        let record_size = self.record_size;
        let mut records = Vec::new();
        let Some(mut offset) = level
            .seek_offset(range.from)
            .filter(|offset| offset.saturating_add(record_size) <= level.end())
        else {
            return Ok(records);
        };
        let mut position = level.first_position(range.from);

        self.track.seek(stored, offset)?;
        let mut buf = vec![0u8; record_size as usize];
        while position <= range.to.saturating_add(1) && offset + record_size <= level.end() {
            token.checkpoint(records.len())?;
            self.track.read_exact(&mut buf)?;
            records.push(ContinuousRecord {
                reference: Arc::clone(&reference),
                position,
                value: LittleEndian::read_f32(&buf[..4]),
            });
            position = position.saturating_add(level.resolution);
            offset += record_size;
        }
        Ok(records)
    }
}
impl DataSource for ContinuousSource {
    type Record = ContinuousRecord;

    fn uri(&self) -> &str {
        self.track.uri()
    }

    fn references(&self) -> &[String] {
        self.track.references().names()
    }

    fn fetch(
        &mut self,
        reference: &str,
        range: GenomicRange,
        resolution: Resolution,
        token: &CancellationToken,
    ) -> Result<Vec<ContinuousRecord>> {
        if self.track.is_closed() {
            return Err(ReadError::Closed(self.track.uri().to_string()).into());
        }
        token.check()?;

        let Some(stored) = self.track.references().resolve(reference).map(str::to_string) else {
            debug!("{} has no reference {reference}", self.track.uri());
            return Ok(Vec::new());
        };
        let level = self.indexes.get(&stored).and_then(|index| match resolution {
            Resolution::Auto => index.select(&range),
            Resolution::Finest => index.finest(),
        });
        let Some(level) = level.copied() else {
            return Ok(Vec::new());
        };
        debug!(
            "{stored}:{range} reads level with resolution {}",
            level.resolution
        );
        self.read_level(&stored, Arc::from(reference), level, range, token)
    }

    fn reopen(&mut self) -> Result<()> {
        let uri = self.track.uri().to_string();
        if let Err(e) = self.track.close() {
            debug!("closing {uri} before reopening failed: {e}");
        }
        self.ctx.invalidate(&uri)?;
        let track = TrackFile::open(&uri, &self.ctx)?;
        *self = Self::from_track(track, self.ctx.clone())?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.track.close()
    }
}

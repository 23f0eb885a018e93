use std::collections::HashMap;

use log::debug;

use super::record::IntervalRecord;
use super::tree::IntervalSearchTree;
use crate::context::SourceContext;
use crate::error::{FormatError, ReadError, Result};
use crate::format::TrackFile;
use crate::reference::GenomicRange;
use crate::retrieval::{CancellationToken, DataSource, Resolution};

/// An interval track opened for retrieval
pub struct IntervalSource {
    ctx: SourceContext,
    track: TrackFile,
    /// Search tree of every reference, keyed by stored name
    trees: HashMap<String, IntervalSearchTree>,
}
impl IntervalSource {
    /// Opens `uri` and reads the search tree of every reference
    pub fn open(uri: &str, ctx: &SourceContext) -> Result<Self> {
        let track = TrackFile::open(uri, ctx)?;
        Self::from_track(track, ctx.clone())
    }

    /// Reads the trees of a track whose cursor sits at its index section
    pub fn from_track(mut track: TrackFile, ctx: SourceContext) -> Result<Self> {
        track.expect_kind(false)?;

        let names = track.references().names().to_vec();
        let mut trees = HashMap::with_capacity(names.len());
        for name in names {
            let tree = IntervalSearchTree::read_from(&mut track, &name)?;
            let segment_len = track.references().get(&name).map_or(0, |entry| entry.length);
            if let Some(node) = tree
                .nodes()
                .iter()
                .find(|node| node.start_byte.is_some_and(|start| start >= segment_len))
            {
                return Err(FormatError::InvalidTree {
                    reference: name,
                    reason: format!("node {} starts past the end of the segment", node.index),
                }
                .into());
            }
            debug!(
                "{name}: {} nodes holding {} intervals",
                tree.len(),
                tree.total_intervals()
            );
            trees.insert(name, tree);
        }
        track.end_header()?;

        Ok(Self { ctx, track, trees })
    }

    #[must_use]
    pub fn track(&self) -> &TrackFile {
        &self.track
    }

    /// Search tree of `reference`, matched with the homogenized fallback
    #[must_use]
    pub fn tree(&self, reference: &str) -> Option<&IntervalSearchTree> {
        let name = self.track.references().resolve(reference)?;
        self.trees.get(name)
    }
}
impl DataSource for IntervalSource {
    type Record = IntervalRecord;

    fn uri(&self) -> &str {
        self.track.uri()
    }

    fn references(&self) -> &[String] {
        self.track.references().names()
    }

    /// Interval tracks have a single resolution; the hint is ignored
    fn fetch(
        &mut self,
        reference: &str,
        range: GenomicRange,
        _resolution: Resolution,
        token: &CancellationToken,
    ) -> Result<Vec<IntervalRecord>> {
        if self.track.is_closed() {
            return Err(ReadError::Closed(self.track.uri().to_string()).into());
        }
        token.check()?;

        let Some(stored) = self.track.references().resolve(reference).map(str::to_string) else {
            debug!("{} has no reference {reference}", self.track.uri());
            return Ok(Vec::new());
        };
        let Some(tree) = self.trees.get(&stored) else {
            return Ok(Vec::new());
        };

        let file_type = self.track.file_type();
        let track = &mut self.track;
        let mut records = Vec::new();
        tree.visit(&range, |node| {
            let Some(start_byte) = node.start_byte.filter(|_| node.size > 0) else {
                return Ok(());
            };
            token.checkpoint(records.len())?;
            track.seek(&stored, start_byte)?;
            for _ in 0..node.size {
                token.checkpoint(records.len())?;
                let record = IntervalRecord::read_from(track, file_type)?;
                if !node.bin.contains(&record.range()) {
                    return Err(FormatError::InvalidRecord(format!(
                        "interval {} lies outside bin {} of node {}",
                        record.range(),
                        node.bin,
                        node.index
                    ))
                    .into());
                }
                if record.overlaps(&range) {
                    records.push(record);
                }
            }
            Ok(())
        })?;
        Ok(records)
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

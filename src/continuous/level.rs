use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{FormatError, Result};
use crate::format::read_unsigned_i64;
use crate::reference::GenomicRange;
use crate::NOTIONAL_SCREEN_SIZE;

/// Mode tag of a level record
const MODE_FIXED: i32 = 0;
const MODE_VARIABLE_STEP: i32 = 1;

/// How samples within a level are spaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMode {
    /// One sample every `step` bases starting at `start`, each covering `span` bases
    Fixed { start: i32, step: i32, span: i32 },
}
impl LevelMode {
    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        match reader.read_i32::<LittleEndian>()? {
            MODE_FIXED => Ok(Self::Fixed {
                start: reader.read_i32::<LittleEndian>()?,
                step: reader.read_i32::<LittleEndian>()?,
                span: reader.read_i32::<LittleEndian>()?,
            }),
            MODE_VARIABLE_STEP => Err(FormatError::UnsupportedLevelMode("VARIABLESTEP").into()),
            other => Err(FormatError::UnknownLevelMode(other).into()),
        }
    }
}

/// One pre-aggregated resolution tier of a reference.
///
/// Offsets are relative to the start of the reference's data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    /// Byte offset of the first record
    pub offset: u64,
    /// Byte size of the level's data
    pub size: u64,
    /// Bytes per stored record
    pub record_size: u64,
    /// Bases between consecutive stored samples
    pub resolution: u64,
    pub mode: LevelMode,
}
impl Level {
    /// Creates a fixed-step level with one sample every `resolution` bases
    #[must_use]
    pub fn new(offset: u64, size: u64, record_size: u64, resolution: u64) -> Self {
        let step = i32::try_from(resolution).unwrap_or(i32::MAX);
        Self {
            offset,
            size,
            record_size,
            resolution,
            mode: LevelMode::Fixed {
                start: 1,
                step,
                span: step,
            },
        }
    }

    /// Reads one level record
    ///
    /// # Arguments
    ///
    /// * `reader` - positioned at the start of the level record
    /// * `reference` - name of the owning reference, used in error messages
    pub fn read_from<R: Read>(reader: &mut R, reference: &str) -> Result<Self> {
        let invalid = |field: &str| FormatError::InvalidLevel {
            reference: reference.to_string(),
            reason: format!("negative {field}"),
        };
        let offset = read_unsigned_i64(reader)?.ok_or_else(|| invalid("offset"))?;
        let size = read_unsigned_i64(reader)?.ok_or_else(|| invalid("size"))?;
        let record_size = read_unsigned_i64(reader)?.ok_or_else(|| invalid("record size"))?;
        let resolution = read_unsigned_i64(reader)?.ok_or_else(|| invalid("resolution"))?;
        let mode = LevelMode::read_from(reader)?;
        if resolution == 0 {
            return Err(FormatError::InvalidLevel {
                reference: reference.to_string(),
                reason: "resolution must be at least 1".to_string(),
            }
            .into());
        }
        Ok(Self {
            offset,
            size,
            record_size,
            resolution,
            mode,
        })
    }

    /// Offset one past the level's last byte
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    #[must_use]
    pub fn num_records(&self) -> u64 {
        self.size / self.record_size.max(1)
    }

    /// Offset of the record holding the sample at or before `from` (1-based).
    ///
    /// `None` when the offset does not fit in a `u64`.
    #[must_use]
    pub fn seek_offset(&self, from: u64) -> Option<u64> {
        ((from.max(1) - 1) / self.resolution)
            .checked_mul(self.record_size)?
            .checked_add(self.offset)
    }

    /// Genomic position of the record at [`Level::seek_offset`]
    #[must_use]
    pub fn first_position(&self, from: u64) -> u64 {
        (from.max(1) - 1) / self.resolution * self.resolution + 1
    }
}

/// The resolution levels of one reference, finest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelIndex {
    levels: Vec<Level>,
}
impl LevelIndex {
    /// Builds an index, checking that resolutions never decrease
    pub fn new(reference: &str, levels: Vec<Level>) -> Result<Self> {
        for pair in levels.windows(2) {
            if pair[1].resolution < pair[0].resolution {
                return Err(FormatError::InvalidLevel {
                    reference: reference.to_string(),
                    reason: format!(
                        "resolution {} follows coarser resolution {}",
                        pair[1].resolution, pair[0].resolution
                    ),
                }
                .into());
            }
        }
        Ok(Self { levels })
    }

    /// Reads the level list of one reference
    ///
    /// # Arguments
    ///
    /// * `reader` - positioned at the reference's `numLevels` field
    /// * `reference` - reference name, used in error messages
    /// * `record_size` - record size from the file header; every level must match it
    /// * `segment_len` - byte length of the reference's data segment
    pub fn read_from<R: Read>(
        reader: &mut R,
        reference: &str,
        record_size: u64,
        segment_len: u64,
    ) -> Result<Self> {
        let count = reader.read_i32::<LittleEndian>()?;
        let count = usize::try_from(count).map_err(|_| FormatError::InvalidLevel {
            reference: reference.to_string(),
            reason: format!("negative level count {count}"),
        })?;

        let mut levels = Vec::with_capacity(count);
        for _ in 0..count {
            let level = Level::read_from(reader, reference)?;
            if level.record_size != record_size {
                return Err(FormatError::RecordSizeMismatch {
                    expected: record_size,
                    found: level.record_size,
                }
                .into());
            }
            if level.end() > segment_len {
                return Err(FormatError::InvalidLevel {
                    reference: reference.to_string(),
                    reason: format!(
                        "level data ends at {} but the segment holds {segment_len} bytes",
                        level.end()
                    ),
                }
                .into());
            }
            levels.push(level);
        }
        Self::new(reference, levels)
    }

    /// Picks the coarsest level that still yields about two samples per pixel.
    ///
    /// Levels are tried from coarsest down to the second-finest; the first whose
    /// `resolution * NOTIONAL_SCREEN_SIZE / 2` is below the range length wins. The
    /// finest level is the fallback.
    #[must_use]
    pub fn select(&self, range: &GenomicRange) -> Option<&Level> {
        self.levels
            .iter()
            .skip(1)
            .rev()
            .find(|level| level.resolution.saturating_mul(NOTIONAL_SCREEN_SIZE) / 2 < range.len())
            .or_else(|| self.finest())
    }

    #[must_use]
    pub fn finest(&self) -> Option<&Level> {
        self.levels.first()
    }

    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{FormatError, Result};
use crate::format::{read_string, FileType};
use crate::reference::GenomicRange;

/// Strand of a BED feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strand {
    Forward,
    Reverse,
    #[default]
    Unknown,
}
impl Strand {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'+' => Ok(Self::Forward),
            b'-' => Ok(Self::Reverse),
            b'.' => Ok(Self::Unknown),
            other => {
                Err(FormatError::InvalidRecord(format!("invalid strand byte {other:#04x}")).into())
            }
        }
    }
}

/// One sub-block (exon) of a BED feature, relative to the feature start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BedFields {
    pub name: String,
    pub score: f32,
    pub strand: Strand,
    pub thick_start: u64,
    pub thick_end: u64,
    pub item_rgb: u32,
    pub blocks: Vec<Block>,
}

/// Type-specific payload of an interval record
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Generic { description: String },
    Bed(BedFields),
}

/// One interval feature, `[start, end]` inclusive
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRecord {
    pub start: u64,
    pub end: u64,
    pub payload: Payload,
}
impl IntervalRecord {
    /// Decodes one record whose payload shape is given by `file_type`
    pub fn read_from<R: Read>(reader: &mut R, file_type: FileType) -> Result<Self> {
        let start = u64::from(reader.read_u32::<LittleEndian>()?);
        let end = u64::from(reader.read_u32::<LittleEndian>()?);
        if end < start {
            return Err(FormatError::InvalidRecord(format!(
                "interval ends at {end} before {start}"
            ))
            .into());
        }
        let payload = match file_type {
            FileType::IntervalBed => Payload::Bed(read_bed(reader)?),
            FileType::IntervalGeneric => Payload::Generic {
                description: read_string(reader)?,
            },
            FileType::ContinuousGeneric => {
                return Err(FormatError::WrongTrackKind {
                    expected: "interval",
                    found: file_type.kind(),
                }
                .into())
            }
        };
        Ok(Self {
            start,
            end,
            payload,
        })
    }

    #[must_use]
    pub fn range(&self) -> GenomicRange {
        GenomicRange {
            from: self.start,
            to: self.end,
        }
    }

    /// Whether the record shares at least one base with `range`
    #[must_use]
    pub fn overlaps(&self, range: &GenomicRange) -> bool {
        self.start <= range.to && range.from <= self.end
    }

    /// The BED name or the generic description
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.payload {
            Payload::Generic { description } => description,
            Payload::Bed(bed) => &bed.name,
        }
    }
}

fn read_bed<R: Read>(reader: &mut R) -> Result<BedFields> {
    let name = read_string(reader)?;
    let score = reader.read_f32::<LittleEndian>()?;
    let strand = Strand::from_byte(reader.read_u8()?)?;
    let thick_start = u64::from(reader.read_u32::<LittleEndian>()?);
    let thick_end = u64::from(reader.read_u32::<LittleEndian>()?);
    let item_rgb = reader.read_u32::<LittleEndian>()?;
    let block_count = reader.read_u32::<LittleEndian>()? as usize;
    let mut blocks = Vec::with_capacity(block_count.min(1 << 10));
    for _ in 0..block_count {
        blocks.push(Block {
            start: reader.read_u32::<LittleEndian>()?,
            size: reader.read_u32::<LittleEndian>()?,
        });
    }
    Ok(BedFields {
        name,
        score,
        strand,
        thick_start,
        thick_end,
        item_rgb,
        blocks,
    })
}

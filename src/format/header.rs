use bytemuck::{Pod, Zeroable};

use crate::error::{FormatError, Result};
use crate::{FILE_MAGIC, FILE_VERSION};

/// Size of the fixed file header in bytes
pub const SIZE_HEADER: usize = size_of::<FileHeader>();

/// The kind of data a track file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Multi-resolution float samples
    ContinuousGeneric,
    /// Intervals with a free-text description
    IntervalGeneric,
    /// Intervals with BED fields
    IntervalBed,
}
impl FileType {
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::ContinuousGeneric => 0,
            Self::IntervalGeneric => 1,
            Self::IntervalBed => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::ContinuousGeneric),
            1 => Ok(Self::IntervalGeneric),
            2 => Ok(Self::IntervalBed),
            _ => Err(FormatError::UnknownFileType(code).into()),
        }
    }

    #[must_use]
    pub fn is_continuous(self) -> bool {
        matches!(self, Self::ContinuousGeneric)
    }

    #[must_use]
    pub fn is_interval(self) -> bool {
        !self.is_continuous()
    }

    /// Short name of the track kind, used in messages
    #[must_use]
    pub fn kind(self) -> &'static str {
        if self.is_continuous() {
            "continuous"
        } else {
            "interval"
        }
    }
}

/// The fixed-size header at the start of every track file.
///
/// All multi-byte fields are little-endian on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct FileHeader {
    /// File magic number
    magic: [u8; 8],
    /// File version number
    pub version: u32,
    /// File type code, see [`FileType`]
    pub file_type: u32,
    /// Bytes per continuous sample (0 for interval tracks)
    pub record_size: u32,
    /// Reserved flag bits
    pub flags: u32,
    /// Reserved for future use
    reserved: [u8; 8],
}
impl FileHeader {
    #[must_use]
    pub fn new(file_type: FileType, record_size: u32) -> Self {
        Self {
            magic: *FILE_MAGIC,
            version: FILE_VERSION,
            file_type: file_type.code(),
            record_size,
            flags: 0,
            reserved: [0; 8],
        }
    }

    /// Parses and validates a header from its on-disk bytes
    pub fn from_bytes(bytes: &[u8; SIZE_HEADER]) -> Result<Self> {
        let raw: Self = bytemuck::pod_read_unaligned(bytes);
        if raw.magic != *FILE_MAGIC {
            return Err(FormatError::InvalidMagic(raw.magic).into());
        }
        let header = Self {
            version: u32::from_le(raw.version),
            file_type: u32::from_le(raw.file_type),
            record_size: u32::from_le(raw.record_size),
            flags: u32::from_le(raw.flags),
            ..raw
        };
        if header.version != FILE_VERSION {
            return Err(FormatError::UnsupportedVersion(header.version).into());
        }
        FileType::from_code(header.file_type)?;
        Ok(header)
    }

    /// Returns the on-disk (little-endian) representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIZE_HEADER] {
        let le = Self {
            version: self.version.to_le(),
            file_type: self.file_type.to_le(),
            record_size: self.record_size.to_le(),
            flags: self.flags.to_le(),
            ..*self
        };
        let mut bytes = [0u8; SIZE_HEADER];
        bytes.copy_from_slice(bytemuck::bytes_of(&le));
        bytes
    }

    pub fn file_type(&self) -> Result<FileType> {
        FileType::from_code(self.file_type)
    }
}

//! The Savant track file container
//!
//! ```text
//! [FileHeader][Reference Table][Index Section][Record Data]
//! ```
//!
//! The reference table maps each reference name to the offset and length of its data
//! segment, relative to the start of the record data. The index section holds one
//! entry per reference in table order; its shape depends on the [`FileType`].

mod header;
mod track;

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

pub use header::{FileHeader, FileType, SIZE_HEADER};
pub use track::{ReferenceEntry, ReferenceMap, TrackFile};

use crate::error::Result;

/// Reads a length-prefixed UTF-8 string
pub(crate) fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Reads a signed 64-bit field that must not be negative
pub(crate) fn read_unsigned_i64<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let value = reader.read_i64::<LittleEndian>()?;
    Ok(u64::try_from(value).ok())
}

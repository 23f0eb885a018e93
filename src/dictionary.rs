//! Name lookup side files
//!
//! A track may be accompanied by `<track-uri>.dict`: tab-separated lines pairing a
//! searchable name with a location such as `chr17:43044295-43125483`. Keys are
//! stored lower-cased. Two bookmarks of one key on the same reference never
//! overlap; intersecting ranges are merged into their union as they are loaded.
//!
//! The file may be plain text, gzip (including BGZF) or zstd compressed; the
//! format is recognised from its leading bytes.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::ops::Bound;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use log::{debug, info};

use crate::context::SourceContext;
use crate::error::{DictionaryError, Error, Result};
use crate::reference::GenomicRange;
use crate::stream;
use crate::DICTIONARY_SUFFIX;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// A named location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub reference: String,
    pub range: GenomicRange,
    /// Optional display label from the third column
    pub label: Option<String>,
}
impl Bookmark {
    #[must_use]
    pub fn new(reference: &str, range: GenomicRange) -> Self {
        Self {
            reference: reference.to_string(),
            range,
            label: None,
        }
    }
}

/// Case-insensitive map from names to bookmarks
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: BTreeMap<String, Vec<Bookmark>>,
}
impl Dictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bookmark` under `key`, merging it with every bookmark of the key on
    /// the same reference whose range it intersects.
    ///
    /// The merged bookmark takes the place of the first one absorbed and keeps
    /// its label.
    pub fn insert(&mut self, key: &str, bookmark: Bookmark) {
        let bookmarks = self.entries.entry(key.to_lowercase()).or_default();
        let mut merged: Option<usize> = None;
        let mut i = 0;
        while i < bookmarks.len() {
            let existing = &bookmarks[i];
            if existing.reference != bookmark.reference
                || !existing.range.intersects(&bookmark.range)
            {
                i += 1;
                continue;
            }
            match merged {
                None => {
                    let target = &mut bookmarks[i];
                    target.range = target.range.union(&bookmark.range);
                    if target.label.is_none() {
                        target.label.clone_from(&bookmark.label);
                    }
                    merged = Some(i);
                    i += 1;
                }
                Some(target) => {
                    let absorbed = bookmarks.remove(i);
                    bookmarks[target].range = bookmarks[target].range.union(&absorbed.range);
                }
            }
        }
        if merged.is_none() {
            bookmarks.push(bookmark);
        }
    }

    /// Returns the bookmarks of `key`.
    ///
    /// A trailing `*` matches every key starting with the rest of `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Vec<&Bookmark> {
        let key = key.to_lowercase();
        match key.strip_suffix('*') {
            Some(prefix) => {
                let upper = format!("{prefix}{}", char::MAX);
                self.entries
                    .range::<str, _>((Bound::Included(prefix), Bound::Excluded(upper.as_str())))
                    .flat_map(|(_, bookmarks)| bookmarks)
                    .collect()
            }
            None => self
                .entries
                .get(&key)
                .map(|bookmarks| bookmarks.iter().collect())
                .unwrap_or_default(),
        }
    }

    /// Number of distinct keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Parses dictionary text.
    ///
    /// Each line holds a name and a location in either order, optionally followed
    /// by a label. Blank lines and lines starting with `#` are skipped. The first
    /// malformed line aborts the parse.
    pub fn parse(text: &str) -> Result<Self> {
        let mut dictionary = Self::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, bookmark) = parse_line(line).map_err(|message| DictionaryError::Parse {
                line: i + 1,
                message,
            })?;
            dictionary.insert(&key, bookmark);
        }
        Ok(dictionary)
    }

    /// Parses a possibly compressed dictionary file image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = if bytes.starts_with(&GZIP_MAGIC) {
            debug!("dictionary is gzip compressed");
            let mut decoded = Vec::new();
            MultiGzDecoder::new(bytes).read_to_end(&mut decoded)?;
            decoded
        } else if bytes.starts_with(&ZSTD_MAGIC) {
            debug!("dictionary is zstd compressed");
            zstd::stream::decode_all(bytes)?
        } else {
            bytes.to_vec()
        };
        Self::parse(&String::from_utf8(text)?)
    }

    /// Loads a dictionary from a local file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Loads the side file of the track at `track_uri`, if there is one
    pub fn load_for_track(track_uri: &str, ctx: &SourceContext) -> Result<Option<Self>> {
        let uri = format!("{track_uri}{DICTIONARY_SUFFIX}");
        let mut stream = match ctx.open_stream(&uri) {
            Ok(stream) => stream,
            Err(Error::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no dictionary at {uri}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let mut bytes = vec![0u8; stream.length() as usize];
        stream::read_exact(stream.as_mut(), &mut bytes)?;
        stream.close()?;

        let dictionary = Self::from_bytes(&bytes)?;
        info!("loaded dictionary {uri} with {} keys", dictionary.len());
        Ok(Some(dictionary))
    }
}

/// Splits one line into its key and bookmark
fn parse_line(line: &str) -> std::result::Result<(String, Bookmark), String> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < 2 {
        return Err("expected a name and a location separated by a tab".to_string());
    }
    let (name, (reference, range)) = match parse_location(fields[0])? {
        Some(location) => (fields[1], location),
        None => match parse_location(fields[1])? {
            Some(location) => (fields[0], location),
            None => return Err(format!("no location in '{line}'")),
        },
    };
    if name.is_empty() {
        return Err("empty name".to_string());
    }
    let label = fields
        .get(2)
        .filter(|label| !label.is_empty())
        .map(|label| (*label).to_string());
    Ok((
        name.to_string(),
        Bookmark {
            reference,
            range,
            label,
        },
    ))
}

/// Parses `ref:from-to` or `ref:pos`.
///
/// Returns `Ok(None)` when `field` does not look like a location at all and an
/// error when it does but its numbers are malformed.
fn parse_location(field: &str) -> std::result::Result<Option<(String, GenomicRange)>, String> {
    let Some((reference, coords)) = field.rsplit_once(':') else {
        return Ok(None);
    };
    if reference.is_empty() || !coords.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(None);
    }
    let (from, to) = match coords.split_once('-') {
        Some((from, to)) => (parse_number(from)?, parse_number(to)?),
        None => {
            let position = parse_number(coords)?;
            (position, position)
        }
    };
    let range = GenomicRange::new(from, to).map_err(|e| e.to_string())?;
    Ok(Some((reference.to_string(), range)))
}

fn parse_number(text: &str) -> std::result::Result<u64, String> {
    text.trim()
        .replace(',', "")
        .parse()
        .map_err(|_| format!("invalid number '{text}'"))
}

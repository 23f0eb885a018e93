//! Genomic ranges and reference-name normalization

use std::fmt;

use crate::error::{ReadError, Result};

/// A 1-based inclusive genomic range `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenomicRange {
    pub from: u64,
    pub to: u64,
}
impl GenomicRange {
    /// Creates a range, rejecting `from == 0` and `from > to`
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if from == 0 || from > to {
            return Err(ReadError::InvalidRange { from, to }.into());
        }
        Ok(Self { from, to })
    }

    /// Number of bases covered by the range
    #[must_use]
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// A valid range is never empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the two inclusive ranges share at least one base
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }

    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.from <= other.from && other.to <= self.to
    }
}
impl fmt::Display for GenomicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Reduces a reference name to the form used for name-insensitive matching.
///
/// A leading `chr` is dropped regardless of case and the remainder lower-cased,
/// so `chr1`, `Chr1` and `1` all map to `1`. The mitochondrial aliases `MT` and
/// `M` map to `m`.
#[must_use]
pub fn homogenize(name: &str) -> String {
    let stripped = match name.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") && name.len() > 3 => &name[3..],
        _ => name,
    };
    let lowered = stripped.to_ascii_lowercase();
    if lowered == "mt" {
        "m".to_string()
    } else {
        lowered
    }
}

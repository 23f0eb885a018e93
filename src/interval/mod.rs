//! Interval tracks
//!
//! Each reference of an interval track is indexed by an [`IntervalSearchTree`] over
//! nested genomic bins. A query descends only into bins intersecting the range,
//! decodes the records stored at each visited node and keeps those that actually
//! overlap. Results are not ordered across nodes.

mod record;
mod source;
mod tree;

pub use record::{BedFields, Block, IntervalRecord, Payload, Strand};
pub use source::IntervalSource;
pub use tree::{IntervalSearchTree, IntervalTreeNode};

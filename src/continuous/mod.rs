//! Multi-resolution continuous tracks
//!
//! Each reference of a continuous track stores a list of [`Level`]s, finest first.
//! A level is a run of fixed-size records, one per `resolution` bases. Retrieval
//! picks a level with [`LevelIndex::select`], seeks to the record holding the start
//! of the range and streams records until the range or the level is exhausted.

mod level;
mod source;

pub use level::{Level, LevelIndex, LevelMode};
pub use source::{ContinuousRecord, ContinuousSource};

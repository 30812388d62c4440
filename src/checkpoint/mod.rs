//! Checkpoint module for resumable pipeline execution.
//!
//! Provides:
//! - `Checkpoint`: Progress cursor plus recorded results
//! - `CheckpointStore`: Atomic persistence, recording, reset/archive
//! - `next_batch`: Planning the next slice of input
//! - legacy checkpoint migration

mod migrate;
mod planner;
mod state;

pub use migrate::LEGACY_PENDING_SENTINEL;
pub use planner::*;
pub use state::*;

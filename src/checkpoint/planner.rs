//! Batch planning over an ordered input source.
//!
//! K_i: The planner never emits a unit at or below the checkpoint cursor.

use super::state::Checkpoint;

/// Index-addressable, order-stable source of units of work.
pub trait UnitSource {
    type Unit;

    /// Number of units in the source.
    fn len(&self) -> usize;

    /// Unit at `index`, if in range.
    fn get(&self, index: usize) -> Option<&Self::Unit>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A unit selected for processing.
#[derive(Debug, Clone, Copy)]
pub struct PlannedUnit<'a, U> {
    pub index: usize,
    pub unit: &'a U,
}

/// Next slice of units to process.
///
/// Covers indices `[cursor + 1, cursor + batch_size]`, truncated to the
/// source length and to `max_total - total_processed` when `max_total` is
/// given. An empty result means no work remains.
pub fn next_batch<'a, S: UnitSource>(
    checkpoint: &Checkpoint,
    source: &'a S,
    batch_size: usize,
    max_total: Option<usize>,
) -> Vec<PlannedUnit<'a, S::Unit>> {
    let mut size = batch_size;
    if let Some(max_total) = max_total {
        size = size.min(max_total.saturating_sub(checkpoint.total_processed));
    }

    let start = checkpoint.resume_index();
    let end = start.saturating_add(size).min(source.len());

    (start..end)
        .filter_map(|index| source.get(index).map(|unit| PlannedUnit { index, unit }))
        .collect()
}

/// Units not yet covered by the cursor.
pub fn remaining<S: UnitSource>(checkpoint: &Checkpoint, source: &S) -> usize {
    source.len().saturating_sub(checkpoint.resume_index())
}

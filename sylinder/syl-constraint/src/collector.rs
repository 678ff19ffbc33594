//! Per-thread constraint queues.
//!
//! The generators run under rayon; each worker folds blocks into its own
//! queue and the queues are concatenated by ownership transfer at the end
//! of the pass. Nothing downstream may depend on block order.

use crate::ConstraintBlock;

/// Accumulates the constraint set of one timestep.
#[derive(Debug, Default)]
pub struct ConstraintCollector {
    blocks: Vec<ConstraintBlock>,
}

impl ConstraintCollector {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all blocks; called at the start of every step.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Concatenate one pass's queue (ownership transfer).
    pub fn append(&mut self, mut queue: Vec<ConstraintBlock>) {
        self.blocks.append(&mut queue);
    }

    /// Number of collected blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Collected blocks.
    #[must_use]
    pub fn blocks(&self) -> &[ConstraintBlock] {
        &self.blocks
    }

    /// Take the blocks, leaving the collector empty.
    #[must_use]
    pub fn take_blocks(&mut self) -> Vec<ConstraintBlock> {
        std::mem::take(&mut self.blocks)
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::target::{Target, TargetList};

/// Round-robin target selection, shared by every request task.
///
/// The selector owns the target list for its whole lifetime; the only
/// mutable state is the cursor.
pub struct RoundRobin {
    targets: TargetList,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(targets: TargetList) -> Self {
        Self {
            targets,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Picks the target for one dispatch and advances the cursor.
    ///
    /// The read-and-advance is a single atomic update: no two calls observe
    /// the same pre-advance cursor, and the stored value never leaves
    /// `[0, len)`. Sequential callers see exact round-robin order;
    /// concurrent callers each get a valid slot with assignments staying
    /// balanced across the list.
    pub fn next_target(&self) -> (usize, &Target) {
        let len = self.targets.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                Some((cursor + 1) % len)
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        (index, &self.targets[index])
    }

    pub fn targets(&self) -> &TargetList {
        &self.targets
    }
}

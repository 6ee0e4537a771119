use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Counters for one reconciliation pass, nested passes included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStats {
    pub created: usize,
    pub reused: usize,
    pub moved: usize,
    pub removed: usize,
    /// Nodes that ended up as error leaves.
    pub failed: usize,
}

impl RenderStats {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.moved == 0 && self.removed == 0
    }

    pub fn touched(&self) -> usize {
        self.created + self.reused
    }
}

impl AddAssign for RenderStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.reused += other.reused;
        self.moved += other.moved;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

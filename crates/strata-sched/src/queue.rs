use std::collections::VecDeque;

use strata_core::{Priority, TaskId};

/// Priority queue of task ids: highest tier first, FIFO within a tier.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tiers: [VecDeque<TaskId>; 4],
}

fn tier(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: TaskId, priority: Priority) {
        self.tiers[tier(priority)].push_back(id);
    }

    /// Re-insert ahead of its tier (retries keep their place).
    pub fn push_front(&mut self, id: TaskId, priority: Priority) {
        self.tiers[tier(priority)].push_front(id);
    }

    pub fn pop(&mut self) -> Option<TaskId> {
        self.tiers.iter_mut().find_map(|t| t.pop_front())
    }

    pub fn remove(&mut self, id: &TaskId) -> bool {
        for t in self.tiers.iter_mut() {
            if let Some(pos) = t.iter().position(|x| x == id) {
                t.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }
}

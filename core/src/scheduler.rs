//! Deadline-driven scheduler
//!
//! Voting periods, support periods, execution delays and consensus timeouts
//! all register a deadline here. The owner polls [`Scheduler::pop_due`] and
//! dispatches each fired task exactly once; cancelled tasks never fire.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Handle returned by [`Scheduler::schedule_at`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

/// Min-heap of (deadline, insertion order) with cancellable payloads
#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    tasks: HashMap<u64, T>,
    next_seq: u64,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register a task to fire once `now >= deadline`
    pub fn schedule_at(&mut self, deadline: u64, task: T) -> TaskId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((deadline, seq)));
        self.tasks.insert(seq, task);
        TaskId(seq)
    }

    /// Cancel a pending task. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id.0).is_some()
    }

    /// Remove and return every task whose deadline has passed, in deadline
    /// order with ties broken by insertion order.
    pub fn pop_due(&mut self, now: u64) -> Vec<(TaskId, T)> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, seq))) = self.queue.peek().copied() {
            if deadline > now {
                break;
            }
            self.queue.pop();
            if let Some(task) = self.tasks.remove(&seq) {
                due.push((TaskId(seq), task));
            }
        }
        due
    }

    /// Earliest deadline still pending
    pub fn next_deadline(&mut self) -> Option<u64> {
        // Drop cancelled heads so the answer reflects live tasks only
        while let Some(Reverse((deadline, seq))) = self.queue.peek().copied() {
            if self.tasks.contains_key(&seq) {
                return Some(deadline);
            }
            self.queue.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(300, "close-voting");
        scheduler.schedule_at(100, "close-support");
        scheduler.schedule_at(100, "consensus-timeout");

        assert!(scheduler.pop_due(50).is_empty());

        let fired: Vec<_> = scheduler.pop_due(100).into_iter().map(|(_, t)| t).collect();
        assert_eq!(fired, vec!["close-support", "consensus-timeout"]);

        let fired: Vec<_> = scheduler.pop_due(1_000).into_iter().map(|(_, t)| t).collect();
        assert_eq!(fired, vec!["close-voting"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_cancelled_task_never_fires() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.schedule_at(10, 1u32);
        scheduler.schedule_at(20, 2u32);

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.next_deadline(), Some(20));

        let fired: Vec<_> = scheduler.pop_due(100).into_iter().map(|(_, t)| t).collect();
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn test_task_fires_once() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(5, ());
        assert_eq!(scheduler.pop_due(5).len(), 1);
        assert!(scheduler.pop_due(5).is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }
}

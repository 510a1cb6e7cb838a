//! Per-worker call stacks.
//!
//! Worker-local state is never inherited across spawns: every hand-off
//! between workers re-installs the parent context by value. The current
//! agent of a worker is always the top of its stack.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use swarm_core::AgentKey;

/// Opaque identity of one worker of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

#[derive(Default)]
pub struct CallStacks {
    next: AtomicU64,
    stacks: DashMap<u64, Vec<AgentKey>>,
}

impl CallStacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh worker with an empty stack.
    pub fn new_worker(&self) -> WorkerId {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.stacks.insert(id, Vec::new());
        WorkerId(id)
    }

    /// Forget a worker and its stack.
    pub fn drop_worker(&self, worker: WorkerId) {
        self.stacks.remove(&worker.0);
    }

    /// Push `key`, making it the worker's current agent.
    pub fn push(&self, worker: WorkerId, key: AgentKey) {
        self.stacks.entry(worker.0).or_default().push(key);
    }

    /// Pop the top frame; the previous frame (if any) becomes current.
    pub fn pop(&self, worker: WorkerId) -> Option<AgentKey> {
        self.stacks.get_mut(&worker.0).and_then(|mut s| s.pop())
    }

    /// The worker's current agent: top of its stack, or none.
    pub fn current(&self, worker: WorkerId) -> Option<AgentKey> {
        self.stacks
            .get(&worker.0)
            .and_then(|s| s.last().cloned())
    }

    /// Bottom→top snapshot of one worker's stack.
    pub fn frames(&self, worker: WorkerId) -> Vec<AgentKey> {
        self.stacks
            .get(&worker.0)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// True when `key` appears on any live worker's stack.
    pub fn contains(&self, key: &AgentKey) -> bool {
        self.stacks.iter().any(|entry| entry.value().contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> AgentKey {
        AgentKey::new("role", id, "repo")
    }

    #[test]
    fn current_tracks_top_of_stack() {
        let stacks = CallStacks::new();
        let w = stacks.new_worker();
        assert_eq!(stacks.current(w), None);

        stacks.push(w, key("a"));
        stacks.push(w, key("b"));
        assert_eq!(stacks.current(w).unwrap().agent_id, "b");

        stacks.pop(w);
        assert_eq!(stacks.current(w).unwrap().agent_id, "a");
        stacks.pop(w);
        assert_eq!(stacks.current(w), None);
    }

    #[test]
    fn workers_do_not_share_stacks() {
        let stacks = CallStacks::new();
        let w1 = stacks.new_worker();
        let w2 = stacks.new_worker();
        stacks.push(w1, key("a"));
        assert_eq!(stacks.current(w2), None);
        assert!(stacks.contains(&key("a")));

        stacks.drop_worker(w1);
        assert!(!stacks.contains(&key("a")));
    }
}

//! Process-wide spawn graph: which agent asked for which.
//!
//! An append-only vector of deduplicated `(parent, child)` pairs behind
//! a short-held lock. No cycles are possible by construction, since
//! every child is freshly spawned.

use std::sync::Mutex;

/// `(agent_role, agent_id)`; repo scoping does not apply to the graph.
pub type AgentPair = (String, String);

#[derive(Default)]
pub struct SpawnGraph {
    edges: Mutex<Vec<(AgentPair, AgentPair)>>,
}

impl SpawnGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent` spawned `child`. Each distinct edge is
    /// stored once; self-edges are the caller's job to filter.
    pub fn record_spawn(&self, parent: AgentPair, child: AgentPair) {
        let mut edges = self.edges.lock().unwrap();
        if !edges.iter().any(|e| e.0 == parent && e.1 == child) {
            edges.push((parent, child));
        }
    }

    /// Snapshot of all recorded edges, in insertion order.
    pub fn edges(&self) -> Vec<(AgentPair, AgentPair)> {
        self.edges.lock().unwrap().clone()
    }

    /// Mermaid sequenceDiagram view of the spawn graph.
    pub fn format_mermaid_sequence(&self) -> String {
        let edges = self.edges();
        let mut participants: Vec<AgentPair> = Vec::new();
        for (parent, child) in &edges {
            for pair in [parent, child] {
                if !participants.contains(pair) {
                    participants.push(pair.clone());
                }
            }
        }

        let mut lines = vec!["sequenceDiagram".to_string()];
        for (role, id) in &participants {
            let short: String = id.chars().take(8).collect();
            lines.push(format!(
                "    participant {role}_{short} as \"{role}:{short}\""
            ));
        }
        for (parent, child) in &edges {
            lines.push(format!(
                "    {} ->> {}: spawn",
                alias(parent),
                alias(child)
            ));
        }
        lines.join("\n")
    }

    /// Graphviz DOT view of the spawn graph.
    pub fn format_dot(&self) -> String {
        let mut lines = vec!["digraph spawns {".to_string()];
        for (parent, child) in self.edges() {
            lines.push(format!("    \"{}\" -> \"{}\";", alias(&parent), alias(&child)));
        }
        lines.push("}".to_string());
        lines.join("\n")
    }
}

fn alias((role, id): &AgentPair) -> String {
    let short: String = id.chars().take(8).collect();
    format!("{role}_{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(role: &str, id: &str) -> AgentPair {
        (role.to_string(), id.to_string())
    }

    #[test]
    fn edges_are_deduplicated_in_insertion_order() {
        let graph = SpawnGraph::new();
        graph.record_spawn(pair("root", "001"), pair("worker", "bbb"));
        graph.record_spawn(pair("worker", "bbb"), pair("worker", "ccc"));
        graph.record_spawn(pair("root", "001"), pair("worker", "bbb"));

        let edges = graph.edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].1, pair("worker", "bbb"));
        assert_eq!(edges[1].0, pair("worker", "bbb"));
    }

    #[test]
    fn mermaid_aliases_truncate_ids() {
        let graph = SpawnGraph::new();
        graph.record_spawn(pair("root", "0123456789"), pair("worker", "bbb"));
        let mermaid = graph.format_mermaid_sequence();
        assert!(mermaid.starts_with("sequenceDiagram"));
        assert!(mermaid.contains("root_01234567 ->> worker_bbb: spawn"));
    }

    #[test]
    fn dot_lists_every_edge() {
        let graph = SpawnGraph::new();
        graph.record_spawn(pair("a", "1"), pair("b", "2"));
        let dot = graph.format_dot();
        assert!(dot.starts_with("digraph spawns {"));
        assert!(dot.contains("\"a_1\" -> \"b_2\";"));
    }
}

//! Structural analysis of a declared graph.
//!
//! Global verification needs the link structure to be acyclic: the backend
//! executes each direct connection without an intervening queue, so a cycle
//! of direct links could never become ready.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::collections::VecDeque;

/// Statistics about a verified topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyStats {
    /// Total number of nodes
    pub total_nodes: usize,

    /// Number of direct pad-to-pad links
    pub links: usize,

    /// Nodes with no incoming link (fed only through boundary pads)
    pub entry_nodes: usize,

    /// Nodes with no outgoing link
    pub exit_nodes: usize,

    /// Verification time in microseconds
    pub verify_time_us: u64,
}

/// Node-level view of the graph's direct links.
pub struct Topology {
    fwd_adj: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
    links: usize,
}

impl Topology {
    /// Build adjacency from `(from_node, to_node)` link pairs.
    pub fn new(node_count: usize, links: &[(usize, usize)]) -> Self {
        let mut fwd_adj = vec![Vec::new(); node_count];
        let mut in_degree = vec![0; node_count];

        for &(from, to) in links {
            // Skip links involving unknown nodes
            if from >= node_count || to >= node_count {
                continue;
            }
            fwd_adj[from].push(to);
            in_degree[to] += 1;
        }

        Self {
            fwd_adj,
            in_degree,
            links: links.len(),
        }
    }

    /// Topological order using Kahn's algorithm; fails on a cycle.
    pub fn order(&self) -> PipelineResult<Vec<usize>> {
        let n = self.fwd_adj.len();
        let mut in_degree = self.in_degree.clone();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            result.push(node);

            for &neighbor in &self.fwd_adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() != n {
            return Err(PipelineError::CycleDetected {
                scheduled: result.len(),
                total: n,
            });
        }
        Ok(result)
    }

    pub fn stats(&self) -> TopologyStats {
        TopologyStats {
            total_nodes: self.fwd_adj.len(),
            links: self.links,
            entry_nodes: self.in_degree.iter().filter(|&&d| d == 0).count(),
            exit_nodes: self.fwd_adj.iter().filter(|adj| adj.is_empty()).count(),
            verify_time_us: 0,
        }
    }
}

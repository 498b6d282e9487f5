//! Directed multigraph over workflow instances.

use std::collections::{HashMap, HashSet};

use super::types::WorkflowGraphDescription;

/// One connection between two existing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge<'a> {
    pub source: &'a str,
    pub target: &'a str,
    pub output_port: &'a str,
    pub input_port: &'a str,
}

/// Vertices are distinct instance names in declaration order; parallel
/// edges between the same pair are kept, each with its own port pair.
#[derive(Debug)]
pub struct WorkflowGraph<'a> {
    vertices: Vec<&'a str>,
    edges: Vec<Edge<'a>>,
    outgoing: HashMap<&'a str, Vec<usize>>,
    in_degree: HashMap<&'a str, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl<'a> WorkflowGraph<'a> {
    /// Build the graph. Connections whose source or target is not a declared
    /// instance are left out.
    pub fn build(description: &'a WorkflowGraphDescription) -> Self {
        let mut seen = HashSet::new();
        let vertices: Vec<&str> = description
            .instances
            .iter()
            .map(|i| i.instance_name.as_str())
            .filter(|name| seen.insert(*name))
            .collect();

        let mut graph = Self {
            outgoing: vertices.iter().map(|v| (*v, Vec::new())).collect(),
            in_degree: vertices.iter().map(|v| (*v, 0)).collect(),
            vertices,
            edges: Vec::new(),
        };

        for (source, connections) in &description.connections {
            if !seen.contains(source.as_str()) {
                continue;
            }
            for connection in connections {
                let target = connection.target_instance_name.as_str();
                if !seen.contains(target) {
                    continue;
                }
                let index = graph.edges.len();
                graph.edges.push(Edge {
                    source,
                    target,
                    output_port: &connection.output_port,
                    input_port: &connection.input_port,
                });
                graph.outgoing.entry(source).or_default().push(index);
                *graph.in_degree.entry(target).or_default() += 1;
            }
        }

        graph
    }

    pub fn edges(&self) -> &[Edge<'a>] {
        &self.edges
    }

    pub fn in_degree(&self, vertex: &str) -> usize {
        self.in_degree.get(vertex).copied().unwrap_or(0)
    }

    pub fn out_degree(&self, vertex: &str) -> usize {
        self.outgoing.get(vertex).map_or(0, Vec::len)
    }

    /// Vertices with no incoming edge, in declaration order.
    pub fn roots(&self) -> Vec<&'a str> {
        self.vertices
            .iter()
            .copied()
            .filter(|v| self.in_degree(v) == 0)
            .collect()
    }

    /// Cycles found by a three-color DFS.
    ///
    /// Each back edge to a gray vertex yields the slice of the DFS path
    /// from that vertex onward. A cycle reached through several back edges
    /// with the same member set is reported once. The traversal keeps its
    /// own frame stack, so chain length is bounded by memory only.
    pub fn cycles(&self) -> Vec<Vec<&'a str>> {
        let mut color: HashMap<&str, Color> =
            self.vertices.iter().map(|v| (*v, Color::White)).collect();
        let mut path: Vec<&'a str> = Vec::new();
        // (vertex, index of the next outgoing edge to follow)
        let mut frames: Vec<(&'a str, usize)> = Vec::new();
        let mut cycles = Vec::new();
        let mut seen_sets = HashSet::new();

        for &root in &self.vertices {
            if color[root] != Color::White {
                continue;
            }
            color.insert(root, Color::Gray);
            path.push(root);
            frames.push((root, 0));

            while let Some(frame) = frames.last_mut() {
                let (vertex, next) = *frame;
                let Some(&edge) = self.outgoing.get(vertex).and_then(|out| out.get(next)) else {
                    frames.pop();
                    path.pop();
                    color.insert(vertex, Color::Black);
                    continue;
                };
                frame.1 += 1;

                let target = self.edges[edge].target;
                match color.get(target).copied().unwrap_or(Color::Black) {
                    Color::White => {
                        color.insert(target, Color::Gray);
                        path.push(target);
                        frames.push((target, 0));
                    }
                    Color::Gray => {
                        if let Some(start) = path.iter().rposition(|v| *v == target) {
                            let members = path[start..].to_vec();
                            let mut key = members.clone();
                            key.sort_unstable();
                            if seen_sets.insert(key) {
                                cycles.push(members);
                            }
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connection, NodeInstance};

    fn graph(names: &[&str], edges: &[(&str, &str)]) -> WorkflowGraphDescription {
        let mut description = WorkflowGraphDescription {
            instances: names.iter().map(|n| NodeInstance::new(*n, "t")).collect(),
            ..Default::default()
        };
        for (from, to) in edges {
            description
                .connections
                .entry(from.to_string())
                .or_default()
                .push(Connection::main(*to));
        }
        description
    }

    #[test]
    fn test_degrees_and_roots() {
        let description = graph(&["A", "B", "C"], &[("A", "B"), ("A", "C"), ("B", "C")]);
        let g = WorkflowGraph::build(&description);

        assert_eq!(g.roots(), vec!["A"]);
        assert_eq!(g.in_degree("C"), 2);
        assert_eq!(g.out_degree("C"), 0);
        assert_eq!(g.edges().len(), 3);
        assert!(g.cycles().is_empty());
    }

    #[test]
    fn test_dangling_connections_are_skipped() {
        let description = graph(&["A"], &[("A", "Ghost"), ("Nobody", "A")]);
        let g = WorkflowGraph::build(&description);

        assert!(g.edges().is_empty());
        assert_eq!(g.roots(), vec!["A"]);
    }

    #[test]
    fn test_parallel_edges_are_kept() {
        let mut description = graph(&["If", "Next"], &[]);
        description.connections.insert(
            "If".into(),
            vec![
                Connection {
                    target_instance_name: "Next".into(),
                    output_port: "true".into(),
                    input_port: "main".into(),
                },
                Connection {
                    target_instance_name: "Next".into(),
                    output_port: "false".into(),
                    input_port: "main".into(),
                },
            ],
        );
        let g = WorkflowGraph::build(&description);
        assert_eq!(g.in_degree("Next"), 2);
    }

    #[test]
    fn test_three_cycle() {
        let description = graph(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]);
        let g = WorkflowGraph::build(&description);
        assert_eq!(g.cycles(), vec![vec!["A", "B", "C"]]);
        assert!(g.roots().is_empty());
    }

    #[test]
    fn test_self_loop_and_separate_cycles() {
        let description = graph(
            &["A", "B", "C", "D"],
            &[("A", "A"), ("B", "C"), ("C", "B"), ("C", "D")],
        );
        let g = WorkflowGraph::build(&description);
        assert_eq!(g.cycles(), vec![vec!["A"], vec!["B", "C"]]);
    }

    #[test]
    fn test_long_chain_does_not_exhaust_the_stack() {
        let names: Vec<String> = (0..100_000).map(|i| format!("n{i}")).collect();
        let mut description = WorkflowGraphDescription {
            instances: names.iter().map(|n| NodeInstance::new(n.as_str(), "t")).collect(),
            ..Default::default()
        };
        for pair in names.windows(2) {
            description
                .connections
                .insert(pair[0].clone(), vec![Connection::main(pair[1].as_str())]);
        }

        let g = WorkflowGraph::build(&description);
        assert!(g.cycles().is_empty());
        assert_eq!(g.roots(), vec!["n0"]);

        // Closing the chain yields one cycle naming every instance.
        description
            .connections
            .insert("n99999".into(), vec![Connection::main("n0")]);
        let g = WorkflowGraph::build(&description);
        let cycles = g.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 100_000);
        assert_eq!(cycles[0][0], "n0");
    }
}

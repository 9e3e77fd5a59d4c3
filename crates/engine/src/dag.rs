//! DAG validation — run this before executing a pipeline.
//!
//! Rules enforced:
//! 1. Every edge must reference nodes present in the DAG (both `from` and
//!    `to`).
//! 2. The directed graph must be acyclic.
//!
//! The topological sort doubles as the cycle detector: a depth-first
//! traversal colours nodes white/grey/black, and meeting a grey node again
//! means a back-edge. Independent subtrees are ordered by node insertion
//! order, which keeps the result stable across runs.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::Dag;

#[derive(Clone, Copy, PartialEq)]
enum Colour {
    White,
    Grey,
    Black,
}

impl Dag {
    /// Validate the DAG structure: edge endpoints and acyclicity.
    ///
    /// # Errors
    /// - [`EngineError::UnknownNode`] if an edge references a missing node.
    /// - [`EngineError::CycleDetected`] if the graph is not acyclic.
    pub fn validate(&self) -> Result<(), EngineError> {
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(EngineError::UnknownNode {
                    node_id: edge.from.clone(),
                    side: "from",
                });
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(EngineError::UnknownNode {
                    node_id: edge.to.clone(),
                    side: "to",
                });
            }
        }

        self.topological_sort().map(|_| ())
    }

    /// Return node IDs in topological execution order (dependencies first).
    ///
    /// # Errors
    /// [`EngineError::CycleDetected`] carrying the first node at which a
    /// back-edge was found.
    pub fn topological_sort(&self) -> Result<Vec<String>, EngineError> {
        let mut colours: HashMap<&str, Colour> =
            self.nodes.keys().map(|id| (id.as_str(), Colour::White)).collect();
        // Reverse-postorder accumulator: a node lands here only after all
        // its dependents have.
        let mut finished: Vec<&str> = Vec::with_capacity(self.nodes.len());

        // Successor lists in edge insertion order.
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            successors
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        for id in self.nodes.keys() {
            if colours[id.as_str()] == Colour::White {
                self.visit(id.as_str(), &successors, &mut colours, &mut finished)?;
            }
        }

        finished.reverse();
        Ok(finished.into_iter().map(String::from).collect())
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        successors: &HashMap<&'a str, Vec<&'a str>>,
        colours: &mut HashMap<&'a str, Colour>,
        finished: &mut Vec<&'a str>,
    ) -> Result<(), EngineError> {
        colours.insert(id, Colour::Grey);

        if let Some(next) = successors.get(id) {
            for &succ in next {
                match colours.get(succ).copied() {
                    Some(Colour::Grey) => {
                        return Err(EngineError::CycleDetected(succ.to_string()));
                    }
                    Some(Colour::White) => {
                        self.visit(succ, successors, colours, finished)?;
                    }
                    // Black nodes are already fully explored; edges into
                    // nodes missing from the map are caught by validate().
                    _ => {}
                }
            }
        }

        colours.insert(id, Colour::Black);
        finished.push(id);
        Ok(())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::models::{Dag, NodeSpec};

    fn make_dag(ids: &[&str], edges: &[(&str, &str)]) -> Dag {
        let mut dag = Dag::new();
        for id in ids {
            dag.add_node(NodeSpec::new(*id, *id, "transform")).unwrap();
        }
        for (from, to) in edges {
            dag.add_edge(from, to);
        }
        dag
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // a → b → c
        let dag = make_dag(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let sorted = dag.topological_sort().expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let dag = make_dag(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        let sorted = dag.topological_sort().expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn every_edge_respects_the_order() {
        let edges = [
            ("a", "b"),
            ("a", "c"),
            ("b", "d"),
            ("c", "d"),
            ("d", "e"),
            ("a", "e"),
        ];
        let dag = make_dag(&["a", "b", "c", "d", "e"], &edges);
        let sorted = dag.topological_sort().unwrap();

        // Every node appears exactly once.
        assert_eq!(sorted.len(), 5);
        let pos = |id: &str| sorted.iter().position(|s| s == id).unwrap();
        for (from, to) in edges {
            assert!(pos(from) < pos(to), "{from} must precede {to}");
        }
    }

    #[test]
    fn independent_subtrees_keep_insertion_order() {
        // Two disconnected chains; the tie-break is node insertion order.
        let dag = make_dag(&["x1", "y1", "x2", "y2"], &[("x1", "x2"), ("y1", "y2")]);
        let sorted = dag.topological_sort().unwrap();
        let pos = |id: &str| sorted.iter().position(|s| s == id).unwrap();

        assert!(pos("x1") < pos("y1"));
        assert!(pos("x1") < pos("x2"));
        assert!(pos("y1") < pos("y2"));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let mut dag = make_dag(&["a"], &[]);
        dag.add_edge("a", "ghost"); // ghost doesn't exist
        assert!(matches!(
            dag.validate(),
            Err(EngineError::UnknownNode { node_id, .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected_by_both_entry_points() {
        // a → b → c → a  (cycle!)
        let dag = make_dag(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);

        assert!(matches!(dag.validate(), Err(EngineError::CycleDetected(_))));
        assert!(matches!(
            dag.topological_sort(),
            Err(EngineError::CycleDetected(_))
        ));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let dag = make_dag(&["a"], &[("a", "a")]);
        assert!(matches!(
            dag.topological_sort(),
            Err(EngineError::CycleDetected(id)) if id == "a"
        ));
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let dag = make_dag(&["solo"], &[]);
        assert_eq!(dag.topological_sort().unwrap(), vec!["solo"]);
    }

    #[test]
    fn finalize_stores_the_order() {
        let mut dag = make_dag(&["a", "b"], &[("a", "b")]);
        assert!(dag.topo_order.is_empty());
        dag.finalize().unwrap();
        assert_eq!(dag.topo_order, vec!["a", "b"]);
    }
}

//! Stack Constraints Module
//!
//! Builds the "must stack above" graph from transiency and applies it to
//! stack positions. The graph is rebuilt from scratch on every pass.
//!
//! Nodes live in a flat arena and refer to each other by index. Every node
//! carries an `applied` flag, so a traversal touches each edge at most once
//! and cyclic transiency from misbehaving clients terminates.

use std::collections::HashMap;

use tracing::debug;

use crate::wm::client::{WindowArena, WindowId};
use crate::wm::transients;

/// One "above must stack above below" edge
#[derive(Debug, Clone)]
struct Constraint {
    above: WindowId,
    below: WindowId,
    /// Constraints whose `below` is our `above`; applied after us
    next_nodes: Vec<usize>,
    applied: bool,
    has_prev: bool,
}

/// Constraint graph for one canonicalization pass
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    nodes: Vec<Constraint>,
    /// Node indices keyed by their `below` window
    by_below: HashMap<WindowId, Vec<usize>>,
}

impl ConstraintGraph {
    /// Create constraints for every stacked window in `windows` and link
    /// them into chains.
    pub fn build(arena: &WindowArena, windows: &[WindowId]) -> Self {
        let mut graph = Self::default();
        let in_stack = |id: WindowId| arena.get(id).is_some_and(|c| c.stack_position.is_some());

        for &id in windows {
            let Some(window) = arena.get(id) else {
                continue;
            };
            if window.stack_position.is_none() {
                debug!("Window {} not in the stack, not constraining it", id);
                continue;
            }

            if transients::is_transient_for_whole_group(window) {
                let group = window.group.unwrap_or_default();
                for member in arena.group_members(group) {
                    if member == id || !in_stack(member) {
                        continue;
                    }
                    let Some(member_client) = arena.get(member) else {
                        continue;
                    };
                    if member_client.is_override_redirect() {
                        continue;
                    }
                    // Group transients only go above the non-transient members
                    if !transients::has_transient_type(member_client) {
                        debug!("Constraining {} above {} as it's transient for its group", id, member);
                        graph.add(id, member);
                    }
                }
            } else if let Some(parent) = window.transient_for {
                if in_stack(parent) {
                    debug!("Constraining {} above {} due to transiency", id, parent);
                    graph.add(id, parent);
                }
            }
        }

        graph.link();
        graph
    }

    fn add(&mut self, above: WindowId, below: WindowId) {
        let existing = self.by_below.entry(below).or_default();
        if existing.iter().any(|&i| self.nodes[i].above == above) {
            return;
        }

        existing.push(self.nodes.len());
        self.nodes.push(Constraint {
            above,
            below,
            next_nodes: Vec::new(),
            applied: false,
            has_prev: false,
        });
    }

    /// If we have "A below B" and "B below C" then AB -> BC
    fn link(&mut self) {
        for index in 0..self.nodes.len() {
            let above = self.nodes[index].above;
            let next: Vec<usize> = self.by_below.get(&above).cloned().unwrap_or_default();
            for &n in &next {
                self.nodes[n].has_prev = true;
            }
            self.nodes[index].next_nodes = next;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk every chain from its head, calling `ensure_above(above, below)`
    /// once per constraint. Returns the number of constraints applied.
    ///
    /// Constraints that only appear inside a cycle have no head and are
    /// left alone.
    pub fn apply<F>(&mut self, mut ensure_above: F) -> usize
    where
        F: FnMut(WindowId, WindowId),
    {
        let heads: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].has_prev)
            .collect();

        let mut applied = 0;
        let mut pending: Vec<usize> = Vec::new();

        for head in heads {
            pending.push(head);
            while let Some(index) = pending.pop() {
                let node = &mut self.nodes[index];
                if node.applied {
                    continue;
                }
                node.applied = true;
                applied += 1;
                ensure_above(node.above, node.below);
                pending.extend(node.next_nodes.iter().rev());
            }
        }

        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Geometry;
    use crate::wm::client::Client;
    use crate::wm::client_flags::WindowType;

    fn stacked_arena(specs: &[(u32, WindowType)]) -> WindowArena {
        let mut arena = WindowArena::new();
        for (position, &(id, window_type)) in specs.iter().enumerate() {
            let mut client = Client::new(WindowId(id), window_type, Geometry::default());
            client.stack_position = Some(position);
            arena.insert(client);
        }
        arena
    }

    #[test]
    fn test_chain_is_applied_from_its_head() {
        let mut arena = stacked_arena(&[(1, WindowType::Normal), (2, WindowType::Dialog), (3, WindowType::Dialog)]);
        arena.get_mut(WindowId(2)).unwrap().transient_for = Some(WindowId(1));
        arena.get_mut(WindowId(3)).unwrap().transient_for = Some(WindowId(2));

        let mut graph = ConstraintGraph::build(&arena, &[WindowId(3), WindowId(2), WindowId(1)]);
        assert_eq!(graph.len(), 2);

        let mut order = Vec::new();
        let applied = graph.apply(|above, below| order.push((above, below)));
        assert_eq!(applied, 2);
        assert_eq!(order, vec![(WindowId(2), WindowId(1)), (WindowId(3), WindowId(2))]);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut arena = stacked_arena(&[(1, WindowType::Normal), (2, WindowType::Normal), (3, WindowType::Normal)]);
        arena.get_mut(WindowId(1)).unwrap().transient_for = Some(WindowId(2));
        arena.get_mut(WindowId(2)).unwrap().transient_for = Some(WindowId(3));
        arena.get_mut(WindowId(3)).unwrap().transient_for = Some(WindowId(1));

        let mut graph = ConstraintGraph::build(&arena, &arena.ids());
        assert_eq!(graph.len(), 3);
        let mut calls = 0;
        graph.apply(|_, _| calls += 1);
        assert!(calls <= 3);
    }

    #[test]
    fn test_group_transient_constrained_above_non_transient_members() {
        let mut arena = stacked_arena(&[
            (1, WindowType::Normal),
            (2, WindowType::Normal),
            (3, WindowType::Utility),
            (4, WindowType::Dialog),
        ]);
        for id in 1..=4 {
            arena.get_mut(WindowId(id)).unwrap().group = Some(9);
        }

        let mut graph = ConstraintGraph::build(&arena, &[WindowId(4)]);
        // Above 1 and 2, never above the utility window
        assert_eq!(graph.len(), 2);

        let mut order = Vec::new();
        graph.apply(|above, below| order.push((above, below)));
        assert_eq!(order, vec![(WindowId(4), WindowId(1)), (WindowId(4), WindowId(2))]);
    }

    #[test]
    fn test_duplicates_and_unstacked_parents_are_skipped() {
        let mut arena = stacked_arena(&[(1, WindowType::Normal), (2, WindowType::Dialog)]);
        arena.get_mut(WindowId(2)).unwrap().transient_for = Some(WindowId(1));
        let graph = ConstraintGraph::build(&arena, &[WindowId(2), WindowId(2)]);
        assert_eq!(graph.len(), 1);

        arena.get_mut(WindowId(1)).unwrap().stack_position = None;
        let graph = ConstraintGraph::build(&arena, &[WindowId(2)]);
        assert!(graph.is_empty());
    }
}

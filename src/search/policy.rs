//! Tree descent policy: a cost-minimizing analogue of [UCT].
//!
//! [UCT]: https://en.wikipedia.org/wiki/Monte_Carlo_tree_search#Exploration_and_exploitation

use super::tree::{Node, NodeIndex, Tree};
use super::Space;

/// Balances exploitation of cheap transformation chains against exploration of
/// rarely visited ones.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Selection {
    exploration_factor: f64,
}

impl Selection {
    /// Policy with the given exploration weight.
    #[must_use]
    pub const fn new(exploration_factor: f64) -> Self {
        Self { exploration_factor }
    }

    /// Weight of the exploration term.
    #[must_use]
    pub const fn exploration_factor(&self) -> f64 {
        self.exploration_factor
    }

    /// Score of `child` as seen from `parent`, lower is more promising:
    ///
    /// `avg(c) - C * sqrt(ln(visits(p)) / max(1, visits(c)))`
    ///
    /// Costs are minimized, so the exploration bonus is subtracted.
    #[must_use]
    pub fn score<S: Space>(&self, parent: &Node<S>, child: &Node<S>) -> f64 {
        let exploitation = child.average_value();
        let uncertainty =
            (f64::from(parent.visits()).ln() / f64::from(child.visits().max(1))).sqrt();
        let exploration = self.exploration_factor * uncertainty;
        exploitation - exploration
    }

    /// Descends from `from` through the best scored children while the
    /// current node is fully expanded and has children. Returns the first
    /// node that can still be expanded or a childless terminal.
    #[must_use]
    pub fn select<S: Space>(&self, tree: &Tree<S>, from: NodeIndex) -> NodeIndex {
        let mut current = from;
        loop {
            let node = &tree[current];
            if !node.is_fully_expanded() || node.children().is_empty() {
                return current;
            }
            // Scoring children of an unvisited node takes ln(0).
            debug_assert!(node.visited(), "selecting below unvisited node {current}");
            current = self.best_scored(tree, current);
        }
    }

    /// Child with the minimum score. The first one in insertion order wins
    /// ties.
    fn best_scored<S: Space>(&self, tree: &Tree<S>, index: NodeIndex) -> NodeIndex {
        let parent = &tree[index];
        let mut best = parent.children()[0];
        let mut best_score = self.score(parent, &tree[best]);
        for &child in &parent.children()[1..] {
            let score = self.score(parent, &tree[child]);
            if score < best_score {
                best = child;
                best_score = score;
            }
        }
        best
    }
}

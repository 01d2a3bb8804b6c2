//! Staged heuristic tree search over program transformation chains.
//!
//! The tree is rooted at the untransformed program. Every level of the tree
//! applies one [`TransformationKind`] of the [`Pipeline`], so a path from the
//! root is a transformation chain such as tile, parallelize, interchange and
//! vectorize. The search is a cost-minimizing variant of [Monte Carlo Tree
//! Search] that uses measured execution cost instead of random rollouts:
//!
//! 1. Selection: descend from the root to a node worth expanding.
//! 2. Expansion: materialize (a sample of) its children.
//! 3. Evaluation: measure the cost of the *selected* node's program.
//! 4. Backpropagation: fold the cost into every node on the path to the root.
//!
//! [Monte Carlo Tree Search]: https://en.wikipedia.org/wiki/Monte_Carlo_tree_search

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use anyhow::Context;
use tracing::{debug, info};

use crate::error::SearchError;
use crate::evaluation::{Evaluator, Measurement};

pub mod expansion;
pub mod policy;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;

pub use expansion::{
    Candidate,
    CandidateGenerator,
    Classification,
    Classified,
    Expansion,
    Pipeline,
    TransformationKind,
    MAX_BRANCHING,
};
pub use policy::Selection;
pub use tree::{Node, NodeIndex, Tree};

/// Position of a node in the transformation pipeline: the children of a node
/// at stage `s` apply the `s`-th transformation kind.
pub type Stage = usize;

/// Types a concrete search space plugs into the search.
pub trait Space {
    /// Intermediate representation of a program. Cloning produces an
    /// independent deep copy.
    type Program: Clone;
    /// Handle of an operation inside a program.
    type Operation;
    /// A single transformation step.
    type Transformation: Clone + fmt::Display;
}

/// How the search spends its budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Select, expand, evaluate and backpropagate for a fixed number of
    /// iterations.
    #[default]
    TreeSearch,
    /// Level-by-level best-first sweep: every round pops the cheapest measured
    /// node and measures all of its children. Stops early once there is
    /// nothing left to pop.
    BestFirst,
}

/// Parameters of the search.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Weight of the exploration term in [`Selection::score`].
    pub exploration_factor: f64,
    /// Maximum number of children kept per expansion in
    /// [`Strategy::TreeSearch`].
    pub max_branching: usize,
    /// Seed of the sampling stream. Every run restarts the stream.
    pub seed: u64,
    /// Driver used by [`Search::grow`].
    pub strategy: Strategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exploration_factor: std::f64::consts::SQRT_2,
            max_branching: MAX_BRANCHING,
            seed: 0,
            strategy: Strategy::default(),
        }
    }
}

impl Config {
    /// Rejects parameters the search can't work with.
    pub fn validate(&self) -> Result<(), SearchError> {
        if !self.exploration_factor.is_finite() || self.exploration_factor < 0.0 {
            return Err(SearchError::InvalidExplorationFactor(
                self.exploration_factor,
            ));
        }
        if self.max_branching == 0 {
            return Err(SearchError::ZeroBranching);
        }
        Ok(())
    }
}

/// Counters of the last run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Completed iterations (tree search) or levels (best-first).
    pub rounds: usize,
    /// Nodes whose candidates were generated.
    pub expansions: usize,
    /// Size of the tree, root included.
    pub nodes: usize,
    /// Calls into the evaluator.
    pub measurements: usize,
    /// Measurements recorded as infinite cost.
    pub failed_measurements: usize,
}

/// Adds `value` to the statistics of `index` and every one of its ancestors.
pub fn backup<S: Space>(tree: &mut Tree<S>, index: NodeIndex, value: f64) {
    let mut current = Some(index);
    while let Some(index) = current {
        let node = &mut tree[index];
        node.record(value);
        current = node.parent();
    }
}

/// Search driver: owns the policy, the expansion engine and the evaluator.
pub struct Search<S: Space, E> {
    config: Config,
    selection: Selection,
    expansion: Expansion<S>,
    measurement: Measurement<E>,
    statistics: Statistics,
}

impl<S, E> Search<S, E>
where
    S: Space,
    E: Evaluator<S>,
{
    /// Fails if `config` is invalid or `pipeline` is empty.
    pub fn new(config: Config, pipeline: Pipeline<S>, evaluator: E) -> anyhow::Result<Self> {
        config.validate()?;
        let expansion = Expansion::new(pipeline, config.max_branching, config.seed)?;
        Ok(Self {
            selection: Selection::new(config.exploration_factor),
            expansion,
            measurement: Measurement::new(evaluator),
            statistics: Statistics::default(),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Counters of the last [`Search::run`] or [`Search::grow`].
    #[must_use]
    pub const fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    #[must_use]
    pub const fn evaluator(&self) -> &E {
        self.measurement.evaluator()
    }

    /// Searches for `rounds` rounds starting at `root` and returns the best
    /// node found, detached from the discarded search tree.
    ///
    /// Errors come from candidate generation, e.g. a classification that does
    /// not match the program. Programs that can't be measured never abort the
    /// search.
    pub fn run(
        &mut self,
        root: Node<S>,
        classification: &Classification<S::Operation>,
        rounds: usize,
    ) -> anyhow::Result<Node<S>> {
        let mut tree = Tree::new(root);
        let best = self.grow(&mut tree, classification, rounds)?;
        let node = tree.detach(best);
        info!(
            cost = node.evaluation(),
            stage = node.stage(),
            transformations = node.history().len(),
            rounds = self.statistics.rounds,
            nodes = self.statistics.nodes,
            "search finished"
        );
        Ok(node)
    }

    /// Grows `tree` for `rounds` rounds and returns the index of the best node
    /// without detaching it.
    pub fn grow(
        &mut self,
        tree: &mut Tree<S>,
        classification: &Classification<S::Operation>,
        rounds: usize,
    ) -> anyhow::Result<NodeIndex> {
        self.statistics = Statistics::default();
        self.measurement.reset_counters();
        self.expansion.reseed(self.config.seed);

        let best = match self.config.strategy {
            Strategy::TreeSearch => self.tree_search(tree, classification, rounds),
            Strategy::BestFirst => self.best_first(tree, classification, rounds),
        };

        self.statistics.nodes = tree.len();
        self.statistics.measurements = self.measurement.measured();
        self.statistics.failed_measurements = self.measurement.failed();
        best
    }

    fn tree_search(
        &mut self,
        tree: &mut Tree<S>,
        classification: &Classification<S::Operation>,
        rounds: usize,
    ) -> anyhow::Result<NodeIndex> {
        for round in 0..rounds {
            let index = self.selection.select(tree, Tree::<S>::ROOT);
            let stage = tree[index].stage();
            let mut expanded = 0;
            if stage <= self.expansion.max_stage() {
                if !tree[index].is_fully_expanded() {
                    self.statistics.expansions += 1;
                }
                expanded = self
                    .expansion
                    .expand(tree, index, classification)
                    .with_context(|| format!("search round {round}"))?
                    .len();
            }
            let cost = self.measurement.evaluate(&mut tree[index]);
            backup(tree, index, cost);
            self.statistics.rounds += 1;
            debug!(round, node = index, stage, expanded, cost, "iteration finished");
        }
        Ok(self.extract_best(tree))
    }

    /// Follows the best average values from the root down to a leaf and picks
    /// the node with the lowest measured cost on that path. Nodes on the path
    /// that were never measured are measured now. The shallower node wins
    /// ties.
    fn extract_best(&mut self, tree: &mut Tree<S>) -> NodeIndex {
        let mut best = Tree::<S>::ROOT;
        let mut best_cost = self.measurement.evaluate(&mut tree[best]);
        let mut current = best;
        while let Some(child) = tree.best_child(current) {
            let cost = self.measurement.evaluate(&mut tree[child]);
            if cost < best_cost {
                best = child;
                best_cost = cost;
            }
            current = child;
        }
        best
    }

    /// Expands the cheapest measured node once per round. Every candidate is
    /// kept and measured, children are attached cheapest first, and the best
    /// node is the cheapest one measured at any level.
    fn best_first(
        &mut self,
        tree: &mut Tree<S>,
        classification: &Classification<S::Operation>,
        rounds: usize,
    ) -> anyhow::Result<NodeIndex> {
        let mut queue = BinaryHeap::new();
        let mut pushed = 0;
        let root_cost = self.measurement.evaluate(&mut tree[Tree::<S>::ROOT]);
        queue.push(Queued {
            cost: root_cost,
            order: pushed,
            index: Tree::<S>::ROOT,
        });
        let (mut best, mut best_cost) = (Tree::<S>::ROOT, root_cost);

        for round in 0..rounds {
            let Some(Queued { index, .. }) = queue.pop() else {
                break;
            };
            if !tree[index].is_fully_expanded() {
                self.statistics.expansions += 1;
            }
            let mut children = self
                .expansion
                .generate(&tree[index], index, classification, None)
                .with_context(|| format!("best-first level {round}"))?;
            tree[index].mark_fully_expanded();

            let mut costs = Vec::with_capacity(children.len());
            for child in &mut children {
                costs.push(self.measurement.evaluate(child));
            }
            let mut measured: Vec<_> = costs.into_iter().zip(children).collect();
            measured.sort_by(|(lhs, _), (rhs, _)| lhs.total_cmp(rhs));

            for (cost, child) in measured {
                let child = tree.add_child(index, child);
                if cost < best_cost {
                    best = child;
                    best_cost = cost;
                }
                pushed += 1;
                queue.push(Queued {
                    cost,
                    order: pushed,
                    index: child,
                });
            }
            self.statistics.rounds += 1;
            debug!(round, node = index, best_cost, queued = queue.len(), "level finished");
        }
        Ok(best)
    }
}

/// Entry of the best-first queue. [`BinaryHeap`] is a max-heap, so the order
/// is reversed: lower cost first, earlier insertion first among equal costs.
struct Queued {
    cost: f64,
    order: usize,
    index: NodeIndex,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

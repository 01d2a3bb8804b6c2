//! Arena-backed search tree.
//!
//! Every [`Node`] is owned by the [`Tree`] it was added to and is addressed by
//! its [`NodeIndex`]. Parent links are plain indices, so the upward walk of
//! backpropagation never conflicts with the owning parent-to-children edges.

use std::fmt;
use std::ops::{Index, IndexMut};

use super::{Space, Stage};

/// Position of a node inside its [`Tree`].
pub type NodeIndex = usize;

/// A point in the transformation-chain space: the program obtained by applying
/// [`Node::history`] to the root program.
pub struct Node<S: Space> {
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
    /// Transformation kind the children of this node will apply.
    stage: Stage,
    sibling_index: usize,
    /// Number of backpropagation paths that went through this node.
    visits: u32,
    accumulated_value: f64,
    fully_expanded: bool,
    /// Measured cost of this exact program, lower is better.
    evaluation: Option<f64>,
    program: S::Program,
    transformation: Option<S::Transformation>,
    history: Vec<S::Transformation>,
}

impl<S: Space> Node<S> {
    /// Creates a node with fresh statistics. `parent` has to be the index the
    /// node will be attached under via [`Tree::add_child`].
    #[must_use]
    pub const fn new(
        parent: Option<NodeIndex>,
        stage: Stage,
        sibling_index: usize,
        program: S::Program,
    ) -> Self {
        Self {
            parent,
            children: Vec::new(),
            stage,
            sibling_index,
            visits: 0,
            accumulated_value: 0.0,
            fully_expanded: false,
            evaluation: None,
            program,
            transformation: None,
            history: Vec::new(),
        }
    }

    /// Creates a parentless node holding the untransformed program.
    #[must_use]
    pub const fn root(program: S::Program, stage: Stage) -> Self {
        Self::new(None, stage, 0, program)
    }

    /// Stores the edge from the parent and the full chain from the root.
    #[must_use]
    pub fn with_transformation(
        mut self,
        transformation: S::Transformation,
        history: Vec<S::Transformation>,
    ) -> Self {
        self.transformation = Some(transformation);
        self.history = history;
        self
    }

    /// Index of the parent, `None` for the root and detached nodes.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    /// Children in insertion order.
    #[must_use]
    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    /// Pipeline stage, the depth below the search root.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Position among the children of the parent.
    #[must_use]
    pub const fn sibling_index(&self) -> usize {
        self.sibling_index
    }

    /// Number of backpropagations through this node.
    #[must_use]
    pub const fn visits(&self) -> u32 {
        self.visits
    }

    /// Whether the node was backpropagated through at least once.
    #[must_use]
    pub const fn visited(&self) -> bool {
        self.visits > 0
    }

    /// Sum of all backpropagated costs.
    #[must_use]
    pub const fn accumulated_value(&self) -> f64 {
        self.accumulated_value
    }

    /// `accumulated_value / max(1, visits)`. This guides the tree descent and
    /// is not the same signal as [`Node::evaluation`].
    #[must_use]
    pub fn average_value(&self) -> f64 {
        self.accumulated_value / f64::from(self.visits.max(1))
    }

    /// Whether the children were already generated.
    #[must_use]
    pub const fn is_fully_expanded(&self) -> bool {
        self.fully_expanded
    }

    /// Measured cost of this node's own program.
    #[must_use]
    pub const fn evaluation(&self) -> Option<f64> {
        self.evaluation
    }

    /// Program after every transformation in [`Node::history`].
    #[must_use]
    pub const fn program(&self) -> &S::Program {
        &self.program
    }

    /// Consumes the node and returns the program it owns.
    #[must_use]
    pub fn into_program(self) -> S::Program {
        self.program
    }

    /// The transformation applied to the parent's program. `None` for roots.
    #[must_use]
    pub const fn transformation(&self) -> Option<&S::Transformation> {
        self.transformation.as_ref()
    }

    /// Transformations applied from the search root, in order.
    #[must_use]
    pub fn history(&self) -> &[S::Transformation] {
        &self.history
    }

    /// Folds one backpropagated value into the statistics.
    pub fn record(&mut self, value: f64) {
        self.visits += 1;
        self.accumulated_value += value;
    }

    /// Records that the children were generated.
    pub fn mark_fully_expanded(&mut self) {
        self.fully_expanded = true;
    }

    /// Stores the measured cost. The first measurement is final.
    pub fn set_evaluation(&mut self, cost: f64) {
        debug_assert!(
            self.evaluation.is_none(),
            "evaluation is already set to {:?}",
            self.evaluation
        );
        if self.evaluation.is_none() {
            self.evaluation = Some(cost);
        }
    }
}

impl<S: Space> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("stage", &self.stage)
            .field("sibling_index", &self.sibling_index)
            .field("visits", &self.visits)
            .field("accumulated_value", &self.accumulated_value)
            .field("fully_expanded", &self.fully_expanded)
            .field("evaluation", &self.evaluation)
            .field(
                "transformation",
                &self.transformation.as_ref().map(ToString::to_string),
            )
            .finish_non_exhaustive()
    }
}

/// Owns every node created during one search run.
pub struct Tree<S: Space> {
    nodes: Vec<Node<S>>,
}

impl<S: Space> Tree<S> {
    /// The root is always the first node.
    pub const ROOT: NodeIndex = 0;

    /// A tree containing only `root`.
    #[must_use]
    pub fn new(root: Node<S>) -> Self {
        debug_assert!(root.parent.is_none());
        debug_assert!(root.children.is_empty());
        Self { nodes: vec![root] }
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at [`Tree::ROOT`].
    #[must_use]
    pub fn root(&self) -> &Node<S> {
        &self[Self::ROOT]
    }

    /// Appends `node` to the children of `parent` and returns its index.
    pub fn add_child(&mut self, parent: NodeIndex, node: Node<S>) -> NodeIndex {
        debug_assert_eq!(node.parent, Some(parent));
        debug_assert_eq!(node.stage, self[parent].stage + 1);
        let index = self.nodes.len();
        self.nodes.push(node);
        self[parent].children.push(index);
        index
    }

    /// Returns the child with the lowest average value. The first child in
    /// insertion order wins ties.
    #[must_use]
    pub fn best_child(&self, index: NodeIndex) -> Option<NodeIndex> {
        self[index].children.iter().copied().min_by(|&lhs, &rhs| {
            self[lhs]
                .average_value()
                .total_cmp(&self[rhs].average_value())
        })
    }

    /// Iterates from `index` up to the root, both included.
    pub fn path_to_root(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(Some(index), |&current| self[current].parent)
    }

    /// Nodes with their indices, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Node<S>)> {
        self.nodes.iter().enumerate()
    }

    /// Releases the tree and returns a single node that owns nothing but its
    /// program and metadata.
    #[must_use]
    pub fn detach(mut self, index: NodeIndex) -> Node<S> {
        let mut node = self.nodes.swap_remove(index);
        node.parent = None;
        node.children.clear();
        node
    }
}

impl<S: Space> Index<NodeIndex> for Tree<S> {
    type Output = Node<S>;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.nodes[index]
    }
}

impl<S: Space> IndexMut<NodeIndex> for Tree<S> {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.nodes[index]
    }
}

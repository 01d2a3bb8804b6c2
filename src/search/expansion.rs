//! Staged expansion: every stage of the [`Pipeline`] applies one
//! [`TransformationKind`], and the candidate generator registered for a node's
//! stage proposes its children.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::tree::{Node, NodeIndex, Tree};
use super::{Space, Stage};
use crate::error::SearchError;

/// Upper bound on the number of children created by a single expansion.
pub const MAX_BRANCHING: usize = 25;

/// The family of program transformations a stage applies.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransformationKind {
    Tiling,
    Parallelization,
    Interchange,
    Vectorization,
}

impl TransformationKind {
    /// Tiling, then parallelization of the tile loops, then interchange of
    /// the remaining loops and vectorization of the inner-most one.
    pub const DEFAULT_PIPELINE: [Self; 4] = [
        Self::Tiling,
        Self::Parallelization,
        Self::Interchange,
        Self::Vectorization,
    ];
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tiling => "tiling",
            Self::Parallelization => "parallelization",
            Self::Interchange => "interchange",
            Self::Vectorization => "vectorization",
        })
    }
}

impl FromStr for TransformationKind {
    type Err = SearchError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind.trim() {
            "tiling" => Ok(Self::Tiling),
            "parallelization" => Ok(Self::Parallelization),
            "interchange" => Ok(Self::Interchange),
            "vectorization" => Ok(Self::Vectorization),
            _ => Err(SearchError::UnknownTransformation(kind.to_owned())),
        }
    }
}

/// Operation handle and its label, as seen by candidate generators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classified<O> {
    /// Handle of the operation inside the program.
    pub operation: O,
    /// Stage label, e.g. the operation class.
    pub label: String,
}

/// Maps operation identifiers (unique within one program) to their
/// classification. Supplied once per run and passed to generators unmodified.
pub type Classification<O> = BTreeMap<String, Classified<O>>;

/// A transformed program proposed by a [`CandidateGenerator`].
pub struct Candidate<S: Space> {
    /// Independent copy of the transformed program.
    pub program: S::Program,
    /// The step that produced `program`.
    pub transformation: S::Transformation,
    /// Full chain from the root, `transformation` included.
    pub history: Vec<S::Transformation>,
}

impl<S: Space> Candidate<S> {
    /// Builds a candidate whose history is the history of `node` followed by
    /// `transformation`.
    #[must_use]
    pub fn extending(
        node: &Node<S>,
        program: S::Program,
        transformation: S::Transformation,
    ) -> Self {
        let mut history = node.history().to_vec();
        history.push(transformation.clone());
        Self {
            program,
            transformation,
            history,
        }
    }
}

/// Proposes the children of a node for one [`TransformationKind`].
///
/// Returning no candidates is legal and turns the node into a leaf. Errors are
/// reserved for inputs that are inconsistent with the program, e.g. a missing
/// classification entry.
pub trait CandidateGenerator<S: Space> {
    /// Lists the programs reachable from `node` by one transformation.
    fn candidates(
        &mut self,
        node: &Node<S>,
        stage: Stage,
        classification: &Classification<S::Operation>,
    ) -> anyhow::Result<Vec<Candidate<S>>>;
}

impl<S, F> CandidateGenerator<S> for F
where
    S: Space,
    F: FnMut(&Node<S>, Stage, &Classification<S::Operation>) -> anyhow::Result<Vec<Candidate<S>>>,
{
    fn candidates(
        &mut self,
        node: &Node<S>,
        stage: Stage,
        classification: &Classification<S::Operation>,
    ) -> anyhow::Result<Vec<Candidate<S>>> {
        self(node, stage, classification)
    }
}

/// Ordered list of stages. Stage `i` is handled by the `i`-th generator.
pub struct Pipeline<S: Space> {
    stages: Vec<(TransformationKind, Box<dyn CandidateGenerator<S>>)>,
}

impl<S: Space> Pipeline<S> {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(
        mut self,
        kind: TransformationKind,
        generator: impl CandidateGenerator<S> + 'static,
    ) -> Self {
        self.push(kind, Box::new(generator));
        self
    }

    /// Appends a boxed stage.
    pub fn push(&mut self, kind: TransformationKind, generator: Box<dyn CandidateGenerator<S>>) {
        self.stages.push((kind, generator));
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Transformation kinds in stage order.
    pub fn kinds(&self) -> impl Iterator<Item = TransformationKind> + '_ {
        self.stages.iter().map(|(kind, _)| *kind)
    }

    /// Last stage that still has a generator. `None` for an empty pipeline.
    #[must_use]
    pub fn max_stage(&self) -> Option<Stage> {
        self.stages.len().checked_sub(1)
    }
}

impl<S: Space> Default for Pipeline<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Grows the tree one node at a time and caps the branching factor.
///
/// Sampling draws from a single [`StdRng`] stream, so a search is reproducible
/// for a given seed.
pub struct Expansion<S: Space> {
    pipeline: Pipeline<S>,
    max_branching: usize,
    rng: StdRng,
}

impl<S: Space> Expansion<S> {
    /// Fails for empty pipelines and zero branching factors.
    pub fn new(pipeline: Pipeline<S>, max_branching: usize, seed: u64) -> Result<Self, SearchError> {
        if pipeline.is_empty() {
            return Err(SearchError::EmptyPipeline);
        }
        if max_branching == 0 {
            return Err(SearchError::ZeroBranching);
        }
        Ok(Self {
            pipeline,
            max_branching,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Last stage that expands nodes.
    #[must_use]
    pub fn max_stage(&self) -> Stage {
        self.pipeline.max_stage().unwrap_or_default()
    }

    /// The stages this engine expands with.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    /// Restarts the sampling stream.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Attaches at most `max_branching` children to `index` and marks it as
    /// fully expanded.
    ///
    /// A node that is already fully expanded, or whose stage is past the end
    /// of the pipeline, is only marked and yields no children.
    pub fn expand(
        &mut self,
        tree: &mut Tree<S>,
        index: NodeIndex,
        classification: &Classification<S::Operation>,
    ) -> anyhow::Result<Vec<NodeIndex>> {
        let cap = self.max_branching;
        let children = self.generate(&tree[index], index, classification, Some(cap))?;
        tree[index].mark_fully_expanded();
        Ok(children
            .into_iter()
            .map(|child| tree.add_child(index, child))
            .collect())
    }

    /// Builds the detached children of `node` (stored at `index`), sampled
    /// down to `cap` when given.
    pub(crate) fn generate(
        &mut self,
        node: &Node<S>,
        index: NodeIndex,
        classification: &Classification<S::Operation>,
        cap: Option<usize>,
    ) -> anyhow::Result<Vec<Node<S>>> {
        let stage = node.stage();
        let Some((kind, generator)) = self.pipeline.stages.get_mut(stage) else {
            return Ok(Vec::new());
        };
        if node.is_fully_expanded() {
            return Ok(Vec::new());
        }
        let mut candidates = generator
            .candidates(node, stage, classification)
            .with_context(|| format!("{kind} candidates for node {index} at stage {stage}"))?;
        let generated = candidates.len();
        if let Some(cap) = cap {
            if generated > cap {
                candidates = sample(&mut self.rng, candidates, cap);
            }
        }
        debug!(node = index, stage, %kind, generated, kept = candidates.len(), "expanded");

        let first_sibling = node.children().len();
        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(offset, candidate)| {
                Node::new(Some(index), stage + 1, first_sibling + offset, candidate.program)
                    .with_transformation(candidate.transformation, candidate.history)
            })
            .collect())
    }
}

/// Uniformly picks `amount` items without replacement. The picked items keep
/// their relative order.
fn sample<T>(rng: &mut StdRng, items: Vec<T>, amount: usize) -> Vec<T> {
    let mut keep = vec![false; items.len()];
    for picked in rand::seq::index::sample(rng, items.len(), amount) {
        keep[picked] = true;
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

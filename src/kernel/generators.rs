//! Candidate generators for the four transformation kinds.
//!
//! Every generator walks the operations in classification order and proposes
//! one candidate per legal transformation of a single operation. Legality is
//! decided here, from the operation label and the current state of its loops.

use anyhow::Context;
use itertools::Itertools;

use super::{Kernel, KernelSpace, LoopNest, OpClass, Transform};
use crate::error::SearchError;
use crate::search::{
    Candidate,
    CandidateGenerator,
    Classification,
    Node,
    Pipeline,
    Stage,
    TransformationKind,
};

/// Builds a pipeline with the default generator for every kind, in order.
#[must_use]
pub fn pipeline(kinds: &[TransformationKind]) -> Pipeline<KernelSpace> {
    let mut pipeline = Pipeline::new();
    for &kind in kinds {
        pipeline.push(kind, generator(kind));
    }
    pipeline
}

/// The default generator of `kind`.
#[must_use]
pub fn generator(kind: TransformationKind) -> Box<dyn CandidateGenerator<KernelSpace>> {
    match kind {
        TransformationKind::Tiling => Box::<Tiling>::default(),
        TransformationKind::Parallelization => Box::new(Parallelization),
        TransformationKind::Interchange => Box::new(Interchange),
        TransformationKind::Vectorization => Box::<Vectorization>::default(),
    }
}

/// Checks that the classification and the kernel describe the same set of
/// operations and returns `(position, class)` for each of them.
pub fn resolve(
    kernel: &Kernel,
    classification: &Classification<usize>,
) -> anyhow::Result<Vec<(usize, OpClass)>> {
    if let Some(op) = kernel
        .operations()
        .iter()
        .find(|op| !classification.contains_key(op.id()))
    {
        return Err(SearchError::MissingClassification(op.id().to_owned()).into());
    }
    classification
        .iter()
        .map(|(id, entry)| -> anyhow::Result<_> {
            match kernel.operations().get(entry.operation) {
                Some(op) if op.id() == id => {},
                _ => return Err(SearchError::UnknownOperation(id.clone()).into()),
            }
            let class = OpClass::try_from(entry.label.as_str())?;
            Ok((entry.operation, class))
        })
        .collect()
}

/// Applies every proposed transformation of every operation to the node's
/// kernel.
fn candidates(
    node: &Node<KernelSpace>,
    classification: &Classification<usize>,
    mut propose: impl FnMut(usize, OpClass, &LoopNest) -> Vec<Transform>,
) -> anyhow::Result<Vec<Candidate<KernelSpace>>> {
    let kernel = node.program();
    let mut result = Vec::new();
    for (op, class) in resolve(kernel, classification)? {
        for transform in propose(op, class, &kernel.operations()[op]) {
            let program = transform
                .apply(kernel)
                .with_context(|| format!("generated illegal {transform}"))?;
            result.push(Candidate::extending(node, program, transform));
        }
    }
    Ok(result)
}

/// Proposes every combination of tile sizes that divide the loop extents.
#[derive(Clone, Debug)]
pub struct Tiling {
    sizes: Vec<u64>,
}

impl Tiling {
    /// Tiles with the given candidate sizes.
    #[must_use]
    pub const fn new(sizes: Vec<u64>) -> Self {
        Self { sizes }
    }

    fn options(&self, nest: &LoopNest) -> Vec<Vec<Option<u64>>> {
        nest.loops()
            .iter()
            .map(|l| {
                let mut options = vec![None];
                // Tiling a loop twice is not supported.
                if l.tile().is_none() && !l.is_parallel() {
                    options.extend(
                        self.sizes
                            .iter()
                            .filter(|&&size| size > 0 && size < l.extent() && l.extent() % size == 0)
                            .map(|&size| Some(size)),
                    );
                }
                options
            })
            .collect()
    }
}

impl Default for Tiling {
    fn default() -> Self {
        Self::new(vec![8, 16, 32, 64])
    }
}

impl CandidateGenerator<KernelSpace> for Tiling {
    fn candidates(
        &mut self,
        node: &Node<KernelSpace>,
        _stage: Stage,
        classification: &Classification<usize>,
    ) -> anyhow::Result<Vec<Candidate<KernelSpace>>> {
        candidates(node, classification, |op, _, nest| {
            if nest.is_vectorized() {
                return Vec::new();
            }
            self.options(nest)
                .into_iter()
                .multi_cartesian_product()
                .filter(|sizes| sizes.iter().any(Option::is_some))
                .map(|sizes| Transform::Tile { op, sizes })
                .collect()
        })
    }
}

/// Proposes running 1, 2, ... outer loops in parallel, up to the first
/// reduction loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct Parallelization;

impl CandidateGenerator<KernelSpace> for Parallelization {
    fn candidates(
        &mut self,
        node: &Node<KernelSpace>,
        _stage: Stage,
        classification: &Classification<usize>,
    ) -> anyhow::Result<Vec<Candidate<KernelSpace>>> {
        candidates(node, classification, |op, _, nest| {
            if nest.loops().iter().any(|l| l.is_parallel()) {
                return Vec::new();
            }
            let parallel = nest
                .loops()
                .iter()
                .take_while(|l| !l.is_reduction())
                .count();
            (1..=parallel)
                .map(|loops| Transform::Parallelize { op, loops })
                .collect()
        })
    }
}

/// Proposes every reordering of the sequential loops. Parallel loops stay in
/// front and `reduction` operations keep their reduction loop inner-most.
#[derive(Clone, Copy, Debug, Default)]
pub struct Interchange;

impl CandidateGenerator<KernelSpace> for Interchange {
    fn candidates(
        &mut self,
        node: &Node<KernelSpace>,
        _stage: Stage,
        classification: &Classification<usize>,
    ) -> anyhow::Result<Vec<Candidate<KernelSpace>>> {
        candidates(node, classification, |op, class, nest| {
            let loops = nest.loops();
            let fixed = loops.iter().take_while(|l| l.is_parallel()).count();
            let movable = loops.len() - fixed;
            (fixed..loops.len())
                .permutations(movable)
                .filter(|order| order.iter().copied().ne(fixed..loops.len()))
                .filter(|order| {
                    class != OpClass::Reduction
                        || order.last().is_some_and(|&last| loops[last].is_reduction())
                })
                .map(|order| Transform::Interchange {
                    op,
                    permutation: (0..fixed).chain(order).collect(),
                })
                .collect()
        })
    }
}

/// Proposes vector widths dividing the trip count of the inner-most loop,
/// unless that loop carries a reduction.
#[derive(Clone, Debug)]
pub struct Vectorization {
    widths: Vec<u64>,
}

impl Vectorization {
    /// Vectorizes with the given candidate widths.
    #[must_use]
    pub const fn new(widths: Vec<u64>) -> Self {
        Self { widths }
    }
}

impl Default for Vectorization {
    fn default() -> Self {
        Self::new(vec![4, 8, 16])
    }
}

impl CandidateGenerator<KernelSpace> for Vectorization {
    fn candidates(
        &mut self,
        node: &Node<KernelSpace>,
        _stage: Stage,
        classification: &Classification<usize>,
    ) -> anyhow::Result<Vec<Candidate<KernelSpace>>> {
        candidates(node, classification, |op, _, nest| {
            let Some(innermost) = nest.innermost() else {
                return Vec::new();
            };
            if nest.is_vectorized() || innermost.source.is_reduction() {
                return Vec::new();
            }
            let trip_count = innermost.trip_count();
            self.widths
                .iter()
                .filter(|&&width| width > 0 && width <= trip_count && trip_count % width == 0)
                .map(|&width| Transform::Vectorize { op, width })
                .collect()
        })
    }
}

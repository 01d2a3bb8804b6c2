//! Loop transformations on a single operation of a [`Kernel`].

use std::fmt;

use anyhow::ensure;
use itertools::Itertools;

use super::Kernel;

/// One transformation step. `op` is the position of the transformed operation
/// in the kernel.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transform {
    /// Strip-mines loops: `sizes[i]` is the tile size of loop `i`, `None`
    /// leaves it untiled.
    Tile { op: usize, sizes: Vec<Option<u64>> },
    /// Runs the `loops` outer-most loops in parallel.
    Parallelize { op: usize, loops: usize },
    /// Reorders loops: position `i` receives the loop at `permutation[i]`.
    Interchange { op: usize, permutation: Vec<usize> },
    /// Vectorizes the inner-most loop.
    Vectorize { op: usize, width: u64 },
}

impl Transform {
    /// Position of the transformed operation.
    #[must_use]
    pub const fn op(&self) -> usize {
        match self {
            Self::Tile { op, .. }
            | Self::Parallelize { op, .. }
            | Self::Interchange { op, .. }
            | Self::Vectorize { op, .. } => *op,
        }
    }

    /// Returns a transformed copy of `kernel`.
    pub fn apply(&self, kernel: &Kernel) -> anyhow::Result<Kernel> {
        let mut kernel = kernel.clone();
        let nest = kernel.operation_mut(self.op())?;
        let loops = nest.loops_mut();
        match self {
            Self::Tile { sizes, .. } => {
                ensure!(
                    sizes.len() == loops.len(),
                    "{self} does not match a nest of {} loops",
                    loops.len()
                );
                for (l, &size) in loops.iter_mut().zip(sizes) {
                    if let Some(size) = size {
                        ensure!(
                            size > 0 && l.extent() % size == 0,
                            "tile size {size} does not divide loop `{}` of extent {}",
                            l.name(),
                            l.extent()
                        );
                        l.set_tile(Some(size));
                    }
                }
            },
            Self::Parallelize { loops: count, .. } => {
                ensure!(*count <= loops.len(), "{self} exceeds the nest depth");
                for l in loops.iter_mut().take(*count) {
                    l.set_parallel();
                }
            },
            Self::Interchange { permutation, .. } => {
                ensure!(
                    permutation.len() == loops.len()
                        && permutation.iter().sorted().copied().eq(0..loops.len()),
                    "{self} is not a permutation of {} loops",
                    loops.len()
                );
                let original = loops.clone();
                for (slot, &source) in loops.iter_mut().zip(permutation) {
                    slot.clone_from(&original[source]);
                }
            },
            Self::Vectorize { width, .. } => {
                ensure!(*width > 0, "vector width has to be positive");
                let innermost = match loops.iter().rposition(|l| l.tile().is_some()) {
                    // The point loop of the last tiled loop runs inner-most.
                    Some(tiled) => tiled,
                    None => loops.len() - 1,
                };
                loops[innermost].set_vector_width(*width);
            },
        }
        Ok(kernel)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tile { op, sizes } => write!(
                f,
                "tile(op{op}, [{}])",
                sizes
                    .iter()
                    .map(|size| size.map_or_else(|| "-".to_owned(), |size| size.to_string()))
                    .join(", ")
            ),
            Self::Parallelize { op, loops } => write!(f, "parallelize(op{op}, {loops})"),
            Self::Interchange { op, permutation } => {
                write!(f, "interchange(op{op}, [{}])", permutation.iter().join(", "))
            },
            Self::Vectorize { op, width } => write!(f, "vectorize(op{op}, {width})"),
        }
    }
}

//! Loop-nest kernels: a small, self-contained program representation the
//! search can transform and an external harness can compile and time.
//!
//! A kernel is described one operation per line:
//!
//! ```text
//! # id      label        loops
//! gemm      contraction  i=256 j=256 k=256
//! relu      elementwise  i=256 j=256
//! ```
//!
//! The label classifies the operation and decides which loops carry a
//! reduction: for `contraction` and `reduction` operations it is the last
//! declared loop.

use std::collections::HashSet;
use std::fmt;

use anyhow::{bail, ensure, Context};

use crate::error::SearchError;
use crate::search::{Classification, Classified, Space};

pub mod generators;
pub mod transform;

pub use generators::pipeline;
pub use transform::Transform;

/// Search space over [`Kernel`]s. Operations are addressed by their position
/// in [`Kernel::operations`].
#[derive(Clone, Copy, Debug)]
pub struct KernelSpace;

impl Space for KernelSpace {
    type Operation = usize;
    type Program = Kernel;
    type Transformation = Transform;
}

/// Coarse kind of an operation, which bounds the legal transformations.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Every loop is parallel.
    Elementwise,
    /// Matrix-multiplication-like: the reduction loop can move freely.
    Contraction,
    /// The reduction loop has to stay inner-most.
    Reduction,
}

impl OpClass {
    const fn has_reduction(self) -> bool {
        !matches!(self, Self::Elementwise)
    }
}

impl TryFrom<&str> for OpClass {
    type Error = SearchError;

    fn try_from(label: &str) -> Result<Self, Self::Error> {
        match label {
            "elementwise" => Ok(Self::Elementwise),
            "contraction" => Ok(Self::Contraction),
            "reduction" => Ok(Self::Reduction),
            _ => Err(SearchError::UnknownLabel(label.to_owned())),
        }
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elementwise => "elementwise",
            Self::Contraction => "contraction",
            Self::Reduction => "reduction",
        })
    }
}

/// A single loop of a nest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loop {
    name: String,
    extent: u64,
    reduction: bool,
    tile: Option<u64>,
    parallel: bool,
    vector_width: Option<u64>,
}

impl Loop {
    /// An untransformed loop over `0..extent`.
    #[must_use]
    pub fn new(name: impl Into<String>, extent: u64, reduction: bool) -> Self {
        Self {
            name: name.into(),
            extent,
            reduction,
            tile: None,
            parallel: false,
            vector_width: None,
        }
    }

    /// Induction variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of iterations before tiling.
    #[must_use]
    pub const fn extent(&self) -> u64 {
        self.extent
    }

    /// Whether iterations accumulate into the same output.
    #[must_use]
    pub const fn is_reduction(&self) -> bool {
        self.reduction
    }

    /// Tile size, if the loop was strip-mined.
    #[must_use]
    pub const fn tile(&self) -> Option<u64> {
        self.tile
    }

    /// Whether the tile (or whole) loop runs in parallel.
    #[must_use]
    pub const fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Vector width, if this loop was vectorized.
    #[must_use]
    pub const fn vector_width(&self) -> Option<u64> {
        self.vector_width
    }

    pub(crate) fn set_tile(&mut self, tile: Option<u64>) {
        self.tile = tile;
    }

    pub(crate) fn set_parallel(&mut self) {
        self.parallel = true;
    }

    pub(crate) fn set_vector_width(&mut self, width: u64) {
        self.vector_width = Some(width);
    }
}

/// One operation: a perfectly nested loop around a computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopNest {
    id: String,
    class: OpClass,
    loops: Vec<Loop>,
}

impl LoopNest {
    /// Unique name of the operation within its kernel.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared label.
    #[must_use]
    pub const fn class(&self) -> OpClass {
        self.class
    }

    /// Loops from outer-most to inner-most, before tiling.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub(crate) fn loops_mut(&mut self) -> &mut Vec<Loop> {
        &mut self.loops
    }

    /// Loops in execution order: the original loops stepping by their tile
    /// sizes, followed by the intra-tile loops of the tiled ones.
    #[must_use]
    pub fn schedule(&self) -> Vec<ScheduledLoop<'_>> {
        let outer = self.loops.iter().map(|l| ScheduledLoop {
            source: l,
            point: false,
        });
        let points = self
            .loops
            .iter()
            .filter(|l| l.tile.is_some())
            .map(|l| ScheduledLoop {
                source: l,
                point: true,
            });
        outer.chain(points).collect()
    }

    /// The loop executed inner-most after tiling.
    #[must_use]
    pub fn innermost(&self) -> Option<ScheduledLoop<'_>> {
        self.schedule().pop()
    }

    /// Whether a vectorization was already applied.
    #[must_use]
    pub fn is_vectorized(&self) -> bool {
        self.loops.iter().any(|l| l.vector_width.is_some())
    }

    fn parse(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.split_whitespace();
        let (Some(id), Some(label)) = (parts.next(), parts.next()) else {
            bail!("expected `<id> <label> <loop>=<extent>...`, got `{line}`");
        };
        let class = OpClass::try_from(label)?;

        let mut names = HashSet::new();
        let mut loops = Vec::new();
        for part in parts {
            let Some((name, extent)) = part.split_once('=') else {
                bail!("expected `<loop>=<extent>`, got `{part}`");
            };
            ensure!(!name.is_empty(), "loop name is missing in `{part}`");
            let extent: u64 = extent
                .parse()
                .with_context(|| format!("invalid extent of loop `{name}`"))?;
            ensure!(extent > 0, "loop `{name}` has zero extent");
            ensure!(names.insert(name), "loop `{name}` is declared twice in `{id}`");
            loops.push(Loop::new(name, extent, false));
        }
        ensure!(!loops.is_empty(), "operation `{id}` has no loops");
        if class.has_reduction() {
            if let Some(last) = loops.last_mut() {
                last.reduction = true;
            }
        }

        Ok(Self {
            id: id.to_owned(),
            class,
            loops,
        })
    }
}

/// A loop of [`LoopNest::schedule`]. Tiled loops appear twice: once stepping
/// over the tiles and once as a `point` loop inside a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledLoop<'a> {
    /// Loop this entry was derived from.
    pub source: &'a Loop,
    /// Whether this is the intra-tile loop.
    pub point: bool,
}

impl ScheduledLoop<'_> {
    /// Number of iterations of this loop.
    #[must_use]
    pub fn trip_count(&self) -> u64 {
        match (self.source.tile, self.point) {
            (Some(tile), true) => tile,
            (Some(tile), false) => self.source.extent / tile,
            (None, _) => self.source.extent,
        }
    }
}

/// Ordered list of operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kernel {
    operations: Vec<LoopNest>,
}

impl Kernel {
    /// Operations in declaration order.
    #[must_use]
    pub fn operations(&self) -> &[LoopNest] {
        &self.operations
    }

    pub(crate) fn operation_mut(&mut self, operation: usize) -> anyhow::Result<&mut LoopNest> {
        let count = self.operations.len();
        self.operations
            .get_mut(operation)
            .with_context(|| format!("operation {operation} is out of range, kernel has {count}"))
    }

    /// Classifies every operation by its declared label.
    #[must_use]
    pub fn classify(&self) -> Classification<usize> {
        self.operations
            .iter()
            .enumerate()
            .map(|(index, op)| {
                (
                    op.id.clone(),
                    Classified {
                        operation: index,
                        label: op.class.to_string(),
                    },
                )
            })
            .collect()
    }
}

impl TryFrom<&str> for Kernel {
    type Error = anyhow::Error;

    /// Parses the textual kernel description. Blank lines and `#` comments are
    /// ignored.
    fn try_from(input: &str) -> anyhow::Result<Self> {
        let mut ids = HashSet::new();
        let mut operations = Vec::new();
        for (number, line) in input.lines().enumerate() {
            let line = line.split_once('#').map_or(line, |(code, _)| code).trim();
            if line.is_empty() {
                continue;
            }
            let op = LoopNest::parse(line).with_context(|| format!("line {}", number + 1))?;
            ensure!(
                ids.insert(op.id.clone()),
                "line {}: operation `{}` is declared twice",
                number + 1,
                op.id
            );
            operations.push(op);
        }
        ensure!(!operations.is_empty(), "kernel has no operations");
        Ok(Self { operations })
    }
}

impl fmt::Display for LoopNest {
    /// Prints the loop nest as pseudo-code, one loop per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {{", self.id, self.class)?;
        let schedule = self.schedule();
        for (depth, scheduled) in schedule.iter().enumerate() {
            let source = scheduled.source;
            write!(f, "{:indent$}", "", indent = 2 * (depth + 1))?;
            // Outer loops carry the parallel annotation, inner-most the vector one.
            if source.parallel && !scheduled.point {
                write!(f, "parallel ")?;
            }
            if depth + 1 == schedule.len() {
                if let Some(width) = source.vector_width {
                    write!(f, "vector<{width}> ")?;
                }
            }
            match (source.tile, scheduled.point) {
                (Some(tile), false) => {
                    write!(f, "for {} in 0..{} step {}", source.name, source.extent, tile)?;
                },
                (Some(tile), true) => write!(f, "for {}.p in 0..{}", source.name, tile)?,
                (None, _) => write!(f, "for {} in 0..{}", source.name, source.extent)?,
            }
            if source.reduction {
                write!(f, " reduce")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.operations {
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

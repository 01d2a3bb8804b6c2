//! Cost measurement of transformed programs.
//!
//! An [`Evaluator`] compiles and runs a program and reports its cost, lower is
//! better. [`Measurement`] wraps it for the search: every program is measured
//! at most once and failures (including NaN and negative infinity) become [`f64::INFINITY`] instead of aborting the
//! search.

use tracing::warn;

use crate::search::tree::Node;
use crate::search::Space;

pub mod command;

/// Measures the cost (typically wall-clock seconds) of a node's program.
///
/// Implementations own their retry and timeout policy: the search calls
/// [`Evaluator::measure`] synchronously and expects it to return.
pub trait Evaluator<S: Space> {
    /// Returns the cost of `node`'s program or the reason it could not be
    /// measured.
    fn measure(&mut self, node: &Node<S>) -> anyhow::Result<f64>;
}

impl<S, F> Evaluator<S> for F
where
    S: Space,
    F: FnMut(&Node<S>) -> anyhow::Result<f64>,
{
    fn measure(&mut self, node: &Node<S>) -> anyhow::Result<f64> {
        self(node)
    }
}

/// Caches measurements on the nodes and turns failures into infinite cost.
#[derive(Debug)]
pub struct Measurement<E> {
    evaluator: E,
    measured: usize,
    failed: usize,
}

impl<E> Measurement<E> {
    /// Wraps `evaluator` with zeroed counters.
    #[must_use]
    pub const fn new(evaluator: E) -> Self {
        Self {
            evaluator,
            measured: 0,
            failed: 0,
        }
    }

    /// Returns the cached evaluation of `node`, measuring it first if needed.
    pub fn evaluate<S>(&mut self, node: &mut Node<S>) -> f64
    where
        S: Space,
        E: Evaluator<S>,
    {
        if let Some(cost) = node.evaluation() {
            return cost;
        }
        self.measured += 1;
        let cost = match self.evaluator.measure(node) {
            // Infinity is the only non-finite cost that survives backpropagation.
            Ok(cost) if cost.is_finite() || (cost.is_infinite() && cost.is_sign_positive()) => cost,
            Ok(cost) => {
                self.failed += 1;
                warn!(stage = node.stage(), "evaluator returned {cost}");
                f64::INFINITY
            },
            Err(e) => {
                self.failed += 1;
                warn!(stage = node.stage(), "candidate could not be measured: {e:#}");
                f64::INFINITY
            },
        };
        node.set_evaluation(cost);
        cost
    }

    /// Number of calls into the evaluator.
    #[must_use]
    pub const fn measured(&self) -> usize {
        self.measured
    }

    /// Number of measurements recorded as infinite cost.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.failed
    }

    /// Zeroes [`Measurement::measured`] and [`Measurement::failed`].
    pub fn reset_counters(&mut self) {
        self.measured = 0;
        self.failed = 0;
    }

    /// The wrapped evaluator.
    #[must_use]
    pub const fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Unwraps the evaluator.
    #[must_use]
    pub fn into_inner(self) -> E {
        self.evaluator
    }
}

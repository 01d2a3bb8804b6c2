#![allow(clippy::float_cmp)]

use mlsched::kernel::{self, Kernel, KernelSpace, Transform};
use mlsched::search::{Node, TransformationKind};
use mlsched::{Config, Search, SearchError, Strategy};
use pretty_assertions::assert_eq;

const KERNEL: &str = "
# fused matmul and activation
gemm contraction i=64 j=64 k=32
relu elementwise i=64 j=64
";

/// Iteration count divided by the parallel and vector speedups.
#[allow(clippy::cast_precision_loss)]
fn model(node: &Node<KernelSpace>) -> anyhow::Result<f64> {
    let mut cost = 0.0;
    for op in node.program().operations() {
        let iterations: u64 = op.loops().iter().map(|l| l.extent()).product();
        let parallel = op.loops().iter().filter(|l| l.is_parallel()).count();
        let width = op
            .loops()
            .iter()
            .find_map(|l| l.vector_width())
            .unwrap_or(1);
        cost += iterations as f64 / ((parallel + 1) as f64 * width as f64);
    }
    Ok(cost)
}

fn search(strategy: Strategy, rounds: usize) -> (Kernel, Node<KernelSpace>) {
    let kernel = Kernel::try_from(KERNEL).unwrap();
    let classification = kernel.classify();
    let config = Config {
        strategy,
        seed: 3,
        ..Config::default()
    };
    let pipeline = kernel::pipeline(&TransformationKind::DEFAULT_PIPELINE);
    let mut search = Search::new(config, pipeline, model).unwrap();
    let best = search
        .run(Node::root(kernel.clone(), 0), &classification, rounds)
        .unwrap();
    (kernel, best)
}

#[test]
fn tree_search_improves_kernel() {
    let (kernel, best) = search(Strategy::TreeSearch, 200);
    let baseline = model(&Node::root(kernel.clone(), 0)).unwrap();
    assert!(best.evaluation().unwrap() < baseline);
    assert_eq!(best.history().len(), best.stage());

    // Replaying the history reproduces the program.
    let replayed = best
        .history()
        .iter()
        .try_fold(kernel, |kernel, transform| transform.apply(&kernel))
        .unwrap();
    assert_eq!(&replayed, best.program());
}

#[test]
fn best_first_improves_kernel() {
    let (kernel, best) = search(Strategy::BestFirst, 4);
    let baseline = model(&Node::root(kernel, 0)).unwrap();
    assert!(best.evaluation().unwrap() < baseline);
    assert!(!best.history().is_empty());
}

#[test]
fn searches_are_reproducible() {
    let (_, first) = search(Strategy::TreeSearch, 100);
    let (_, second) = search(Strategy::TreeSearch, 100);
    assert_eq!(first.history(), second.history());
    assert_eq!(first.evaluation(), second.evaluation());
}

#[test]
fn stage_order_follows_pipeline() {
    let kernel = Kernel::try_from("relu elementwise i=64 j=64").unwrap();
    let classification = kernel.classify();
    let pipeline = kernel::pipeline(&[
        TransformationKind::Vectorization,
        TransformationKind::Parallelization,
    ]);
    // Deeper programs are always cheaper, so the search goes all the way down.
    let depth = |node: &Node<KernelSpace>| -> anyhow::Result<f64> {
        Ok(10.0 - f64::from(u32::try_from(node.history().len())?))
    };
    let mut search = Search::new(Config::default(), pipeline, depth).unwrap();
    let best = search
        .run(Node::root(kernel, 0), &classification, 50)
        .unwrap();
    assert_eq!(best.stage(), 2);
    assert!(matches!(best.history()[0], Transform::Vectorize { .. }));
    assert!(matches!(best.history()[1], Transform::Parallelize { .. }));
}

#[test]
fn mismatched_classification_is_reported() {
    let kernel = Kernel::try_from(KERNEL).unwrap();
    let other = Kernel::try_from("gemm contraction i=64 j=64 k=32").unwrap();
    let pipeline = kernel::pipeline(&TransformationKind::DEFAULT_PIPELINE);
    let mut search = Search::new(Config::default(), pipeline, model).unwrap();
    let error = search
        .run(Node::root(kernel, 0), &other.classify(), 10)
        .unwrap_err();
    assert_eq!(
        error.root_cause().downcast_ref::<SearchError>(),
        Some(&SearchError::MissingClassification("relu".to_owned()))
    );
}

#[test]
fn transformed_program_display() {
    let kernel = Kernel::try_from("relu elementwise i=64 j=32").unwrap();
    let kernel = Transform::Tile {
        op: 0,
        sizes: vec![Some(16), None],
    }
    .apply(&kernel)
    .unwrap();
    let kernel = Transform::Parallelize { op: 0, loops: 1 }
        .apply(&kernel)
        .unwrap();
    let kernel = Transform::Vectorize { op: 0, width: 8 }
        .apply(&kernel)
        .unwrap();
    assert_eq!(
        kernel.to_string(),
        "relu elementwise {\n  parallel for i in 0..64 step 16\n    for j in 0..32\n      vector<8> for i.p in 0..16\n}\n"
    );
}

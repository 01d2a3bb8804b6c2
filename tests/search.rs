#![allow(clippy::float_cmp)]

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use mlsched::evaluation::Measurement;
use mlsched::search::{
    backup,
    Candidate,
    Classification,
    Expansion,
    Node,
    Pipeline,
    Space,
    Stage,
    TransformationKind,
    Tree,
    MAX_BRANCHING,
};
use mlsched::{Config, Search, Strategy};
use pretty_assertions::assert_eq;

/// A program is the list of choices made so far.
struct Toy;

impl Space for Toy {
    type Operation = ();
    type Program = Vec<u32>;
    type Transformation = u32;
}

fn choices(
    count: u32,
) -> impl FnMut(&Node<Toy>, Stage, &Classification<()>) -> anyhow::Result<Vec<Candidate<Toy>>> {
    move |node: &Node<Toy>, _: Stage, _: &Classification<()>| {
        Ok((0..count)
            .map(|choice| {
                let mut program = node.program().clone();
                program.push(choice);
                Candidate::extending(node, program, choice)
            })
            .collect())
    }
}

fn nothing(
    _: &Node<Toy>,
    _: Stage,
    _: &Classification<()>,
) -> anyhow::Result<Vec<Candidate<Toy>>> {
    Ok(Vec::new())
}

/// Root costs 20, choice `0` costs 10 and every other choice costs 3.
fn fixed(node: &Node<Toy>) -> anyhow::Result<f64> {
    Ok(match node.program().last() {
        None => 20.0,
        Some(0) => 10.0,
        Some(_) => 3.0,
    })
}

fn full_pipeline(count: u32) -> Pipeline<Toy> {
    TransformationKind::DEFAULT_PIPELINE
        .into_iter()
        .fold(Pipeline::new(), |pipeline, kind| {
            pipeline.stage(kind, choices(count))
        })
}

#[test]
fn single_iteration_returns_measured_detached_node() {
    let pipeline = Pipeline::<Toy>::new().stage(TransformationKind::Tiling, choices(2));
    let mut search = Search::new(Config::default(), pipeline, fixed).unwrap();
    let best = search
        .run(Node::root(vec![], 0), &Classification::new(), 1)
        .unwrap();
    assert!(best.evaluation().unwrap() <= 10.0);
    assert_eq!(best.parent(), None);
    assert!(best.children().is_empty());
}

#[test]
fn more_iterations_find_cheaper_node() {
    let pipeline = Pipeline::<Toy>::new().stage(TransformationKind::Tiling, choices(2));
    let mut search = Search::new(Config::default(), pipeline, fixed).unwrap();
    let best = search
        .run(Node::root(vec![], 0), &Classification::new(), 3)
        .unwrap();
    assert_eq!(best.evaluation(), Some(3.0));
    assert_eq!(best.program(), &vec![1]);
    assert_eq!(best.history(), &[1]);
    assert_eq!(best.stage(), 1);
}

#[test]
fn exhausted_space_returns_root() {
    let pipeline = TransformationKind::DEFAULT_PIPELINE
        .into_iter()
        .fold(Pipeline::<Toy>::new(), |pipeline, kind| {
            pipeline.stage(kind, nothing)
        });
    let mut search = Search::new(Config::default(), pipeline, fixed).unwrap();
    let mut tree = Tree::new(Node::root(vec![], 0));
    let best = search.grow(&mut tree, &Classification::new(), 5).unwrap();
    assert_eq!(best, Tree::<Toy>::ROOT);
    assert_eq!(tree.len(), 1);
    assert!(tree.root().is_fully_expanded());
    assert_eq!(tree.root().visits(), 5);
    assert_eq!(search.statistics().rounds, 5);
    assert_eq!(search.statistics().expansions, 1);
    assert_eq!(search.statistics().measurements, 1);

    let mut search = Search::new(
        Config::default(),
        Pipeline::<Toy>::new().stage(TransformationKind::Tiling, nothing),
        fixed,
    )
    .unwrap();
    let best = search
        .run(Node::root(vec![7], 0), &Classification::new(), 5)
        .unwrap();
    assert_eq!(best.program(), &vec![7]);
    assert_eq!(best.evaluation(), Some(3.0));
    assert!(best.history().is_empty());
}

#[test]
fn children_are_one_stage_deeper() {
    for strategy in [Strategy::TreeSearch, Strategy::BestFirst] {
        let config = Config {
            strategy,
            ..Config::default()
        };
        let mut search = Search::new(config, full_pipeline(3), fixed).unwrap();
        let mut tree = Tree::new(Node::root(vec![], 0));
        let _best = search.grow(&mut tree, &Classification::new(), 60).unwrap();
        assert!(tree.len() > 1);
        for (index, node) in tree.iter() {
            match node.parent() {
                Some(parent) => {
                    assert_eq!(node.stage(), tree[parent].stage() + 1);
                    assert!(tree[parent].children().contains(&index));
                    assert_eq!(node.history().len(), node.stage());
                },
                None => assert_eq!(index, Tree::<Toy>::ROOT),
            }
            assert!(node.stage() <= TransformationKind::DEFAULT_PIPELINE.len());
        }
    }
}

#[test]
fn expansion_is_capped_and_idempotent() {
    let pipeline = Pipeline::<Toy>::new().stage(TransformationKind::Tiling, choices(100));
    let mut expansion = Expansion::new(pipeline, MAX_BRANCHING, 42).unwrap();
    let mut tree = Tree::new(Node::root(vec![], 0));
    let classification = Classification::new();

    let children = expansion
        .expand(&mut tree, Tree::<Toy>::ROOT, &classification)
        .unwrap();
    assert_eq!(children.len(), MAX_BRANCHING);
    let picked: HashSet<u32> = children
        .iter()
        .map(|&child| *tree[child].transformation().unwrap())
        .collect();
    assert_eq!(picked.len(), MAX_BRANCHING);
    assert!(picked.iter().all(|&choice| choice < 100));

    let again = expansion
        .expand(&mut tree, Tree::<Toy>::ROOT, &classification)
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(tree.root().children(), children.as_slice());
}

#[test]
fn backup_updates_ancestors_only() {
    let pipeline = Pipeline::<Toy>::new()
        .stage(TransformationKind::Tiling, choices(2))
        .stage(TransformationKind::Parallelization, choices(2));
    let mut expansion = Expansion::new(pipeline, MAX_BRANCHING, 0).unwrap();
    let mut tree = Tree::new(Node::root(vec![], 0));
    let classification = Classification::new();
    let level = expansion
        .expand(&mut tree, Tree::<Toy>::ROOT, &classification)
        .unwrap();
    let deep = expansion
        .expand(&mut tree, level[0], &classification)
        .unwrap();

    backup(&mut tree, deep[1], 4.0);
    backup(&mut tree, deep[1], 1.5);
    for index in [Tree::<Toy>::ROOT, level[0], deep[1]] {
        assert_eq!(tree[index].visits(), 2);
        assert_eq!(tree[index].accumulated_value(), 5.5);
    }
    for index in [level[1], deep[0]] {
        assert_eq!(tree[index].visits(), 0);
        assert_eq!(tree[index].accumulated_value(), 0.0);
    }
}

#[test]
fn best_child_has_lowest_average() {
    let mut tree = Tree::new(Node::<Toy>::root(vec![], 0));
    let first = tree.add_child(0, Node::new(Some(0), 1, 0, vec![0]));
    let second = tree.add_child(0, Node::new(Some(0), 1, 1, vec![1]));
    backup(&mut tree, first, 2.0);
    backup(&mut tree, second, 5.0);
    assert_eq!(tree.best_child(Tree::<Toy>::ROOT), Some(first));
}

#[test]
fn evaluation_is_cached() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let mut measurement = Measurement::new(move |_: &Node<Toy>| -> anyhow::Result<f64> {
        counter.set(counter.get() + 1);
        Ok(1.25)
    });
    let mut node = Node::<Toy>::root(vec![], 0);
    assert_eq!(measurement.evaluate(&mut node), 1.25);
    assert_eq!(measurement.evaluate(&mut node), 1.25);
    assert_eq!(calls.get(), 1);
    assert_eq!(node.evaluation(), Some(1.25));
}

#[test]
fn failed_measurements_are_deprioritized() {
    let pipeline = Pipeline::<Toy>::new().stage(TransformationKind::Tiling, choices(3));
    let evaluator = |node: &Node<Toy>| -> anyhow::Result<f64> {
        match node.program().last() {
            Some(1) => Ok(2.0),
            Some(2) => Ok(f64::NAN),
            _ => anyhow::bail!("does not compile"),
        }
    };
    let mut search = Search::new(Config::default(), pipeline, evaluator).unwrap();
    let best = search
        .run(Node::root(vec![], 0), &Classification::new(), 10)
        .unwrap();
    assert_eq!(best.evaluation(), Some(2.0));
    assert_eq!(search.statistics().measurements, 4);
    assert_eq!(search.statistics().failed_measurements, 3);
}

#[test]
fn generator_errors_reach_the_caller() {
    let failing =
        |_: &Node<Toy>, _: Stage, _: &Classification<()>| -> anyhow::Result<Vec<Candidate<Toy>>> {
            anyhow::bail!("operation `conv` has no classification entry")
        };
    let pipeline = Pipeline::<Toy>::new().stage(TransformationKind::Tiling, failing);
    let mut search = Search::new(Config::default(), pipeline, fixed).unwrap();
    let error = search
        .run(Node::root(vec![], 0), &Classification::new(), 3)
        .unwrap_err();
    assert_eq!(
        error.root_cause().to_string(),
        "operation `conv` has no classification entry"
    );
}

#[test]
fn best_first_measures_every_candidate() {
    let config = Config {
        strategy: Strategy::BestFirst,
        ..Config::default()
    };
    let mut search = Search::new(config, full_pipeline(2), fixed).unwrap();
    let best = search
        .run(Node::root(vec![], 0), &Classification::new(), 3)
        .unwrap();
    assert_eq!(best.evaluation(), Some(3.0));
    assert_eq!(best.history(), &[1]);
    assert_eq!(search.statistics().rounds, 3);
    assert_eq!(search.statistics().nodes, 7);
    assert_eq!(search.statistics().measurements, 7);
}

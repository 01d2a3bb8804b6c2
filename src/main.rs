//! Tunes the schedule of a loop-nest kernel by measuring candidate programs
//! with an external command.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use mlsched::evaluation::command::CommandEvaluator;
use mlsched::kernel::{self, Kernel};
use mlsched::search::{Node, TransformationKind, MAX_BRANCHING};
use mlsched::{Config, Search, Strategy};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    /// Monte Carlo tree search.
    Tree,
    /// Level-by-level best-first sweep.
    BestFirst,
}

impl From<StrategyArg> for Strategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::Tree => Self::TreeSearch,
            StrategyArg::BestFirst => Self::BestFirst,
        }
    }
}

/// Searches for the fastest schedule of a kernel.
///
/// Every candidate program is written to the standard input of the evaluator
/// command, which has to print the measured time as the last line of its
/// output.
#[derive(Parser, Debug)]
#[command(name = "mlsched", version, about)]
struct Cli {
    /// Kernel description, one `<id> <label> <loop>=<extent>...` per line.
    kernel: PathBuf,
    /// Shell command that compiles and times a program.
    #[arg(long)]
    evaluator: String,
    /// Search rounds.
    #[arg(long, default_value_t = 100)]
    iterations: usize,
    #[arg(long, value_enum, default_value = "tree")]
    strategy: StrategyArg,
    /// Weight of the exploration term.
    #[arg(long, default_value_t = std::f64::consts::SQRT_2)]
    exploration: f64,
    /// Maximum number of children per expansion.
    #[arg(long, default_value_t = MAX_BRANCHING)]
    max_branching: usize,
    /// Seed of candidate sampling.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Transformation kinds in application order.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "tiling,parallelization,interchange,vectorization"
    )]
    stages: Vec<TransformationKind>,
    /// Upper bound on a single measurement, in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    debug!(version = %mlsched::version(), release = !shadow_rs::is_debug(), "starting");
    let input = fs::read_to_string(&cli.kernel)
        .with_context(|| format!("reading kernel from {}", cli.kernel.display()))?;
    let kernel = Kernel::try_from(input.as_str())
        .with_context(|| format!("parsing {}", cli.kernel.display()))?;
    let classification = kernel.classify();

    let config = Config {
        exploration_factor: cli.exploration,
        max_branching: cli.max_branching,
        seed: cli.seed,
        strategy: cli.strategy.into(),
    };
    let evaluator =
        CommandEvaluator::new(cli.evaluator).with_timeout(Duration::from_secs(cli.timeout));
    let mut search = Search::new(config, kernel::pipeline(&cli.stages), evaluator)?;
    let best = search.run(Node::root(kernel, 0), &classification, cli.iterations)?;

    match best.evaluation() {
        Some(cost) => println!("best cost {cost}"),
        None => println!("best cost unknown"),
    }
    if best.history().is_empty() {
        println!("no transformation improved the kernel");
    }
    for (step, transformation) in best.history().iter().enumerate() {
        println!("{}. {transformation}", step + 1);
    }
    print!("{}", best.program());
    let statistics = search.statistics();
    println!(
        "{} rounds, {} nodes, {} measurements ({} failed)",
        statistics.rounds,
        statistics.nodes,
        statistics.measurements,
        statistics.failed_measurements
    );
    Ok(())
}

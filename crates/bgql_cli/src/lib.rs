//! Command-line interface for Better GraphQL execution.
//!
//! # Usage
//!
//! ```bash
//! # Run the droid query with the prioritized parallel strategy
//! bgql run droid --id 3
//!
//! # Flush every deferred batch at once, with at most 4 nodes in flight
//! bgql run droid --strategy parallel --max-parallelism 4
//!
//! # Compare all strategies on the same operation
//! bgql run droid --compare --latency-ms 5
//!
//! # Load executor settings from a file
//! bgql run hero --config executor.json --metrics
//! ```

use bgql_execution::{Context, ExecutionStrategy, ExecutorConfig, Operation, Response};
use bgql_starwars::{queries, star_wars_executor, CallCounts, StarWarsData};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bgql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum QueryKind {
    /// Droid with owner, friends and the owner's friends
    Droid,
    /// The hero with friends
    Hero,
    /// A human with friends
    Human,
    /// A droid lookup next to the hero
    DroidAndHero,
    /// Create a human (mutation)
    CreateHuman,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a Star Wars operation and print the response
    Run {
        /// Operation to run
        #[arg(value_enum, default_value = "droid")]
        query: QueryKind,

        /// Character id (or name, for create-human)
        #[arg(long, default_value = "3")]
        id: String,

        /// Query execution strategy
        #[arg(short, long)]
        strategy: Option<ExecutionStrategy>,

        /// Maximum nodes in flight at once
        #[arg(long)]
        max_parallelism: Option<usize>,

        /// Include timing records in the response
        #[arg(long)]
        metrics: bool,

        /// Simulated latency of every data access in milliseconds
        #[arg(long, default_value = "0")]
        latency_ms: u64,

        /// Number of times to run the operation
        #[arg(long, default_value = "1")]
        repeat: usize,

        /// JSON file with executor settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run with every strategy and print a comparison
        #[arg(long)]
        compare: bool,
    },

    /// Print version information
    Version,
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            query,
            id,
            strategy,
            max_parallelism,
            metrics,
            latency_ms,
            repeat,
            config,
            compare,
        } => {
            let mut executor_config = load_config(config.as_deref())?;
            if let Some(strategy) = strategy {
                executor_config = executor_config.with_query_strategy(strategy);
            }
            if let Some(max) = max_parallelism {
                executor_config = executor_config.with_max_parallelism(max);
            }
            if metrics {
                executor_config = executor_config.with_metrics(true);
            }
            let operation = operation(query, &id);
            let latency = Duration::from_millis(latency_ms);

            if compare {
                compare_strategies(&executor_config, &operation, latency, repeat).await
            } else {
                run_operation(executor_config, &operation, latency, repeat, cli.verbose, cli.quiet)
                    .await
            }
        }
        Commands::Version => {
            println!("bgql {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn operation(query: QueryKind, id: &str) -> Operation {
    match query {
        QueryKind::Droid => queries::droid_query(id),
        QueryKind::Hero => queries::hero_query(),
        QueryKind::Human => queries::human_query(id),
        QueryKind::DroidAndHero => queries::droid_and_hero_query(id),
        QueryKind::CreateHuman => queries::create_human_mutation(id, "Tatooine"),
    }
}

fn load_config(path: Option<&Path>) -> Result<ExecutorConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&source)?)
        }
        None => Ok(ExecutorConfig::default()),
    }
}

fn data(latency: Duration) -> Arc<StarWarsData> {
    let data = StarWarsData::new();
    Arc::new(if latency.is_zero() {
        data
    } else {
        data.with_latency(latency)
    })
}

async fn run_operation(
    config: ExecutorConfig,
    operation: &Operation,
    latency: Duration,
    repeat: usize,
    verbose: bool,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    info!(
        operation = operation.name.as_deref().unwrap_or("anonymous"),
        strategy = %config.query_strategy,
        repeat,
        "running operation"
    );
    let data = data(latency);
    let executor = star_wars_executor(Arc::clone(&data), config);
    let ctx = Context::new();

    let started = Instant::now();
    let mut response = Response::data(serde_json::Value::Null);
    for _ in 0..repeat.max(1) {
        response = executor.execute(operation, &ctx).await;
    }
    let elapsed = started.elapsed();

    if !quiet {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    if verbose {
        print_calls(&data.calls());
        println!("  {} {:?} for {} run(s)", "Elapsed:".blue(), elapsed, repeat.max(1));
    }

    if response.has_errors() {
        for error in response.errors.iter().flatten() {
            eprintln!("{} {}", "Error:".red().bold(), error.message);
        }
        Ok(1)
    } else {
        Ok(0)
    }
}

async fn compare_strategies(
    config: &ExecutorConfig,
    operation: &Operation,
    latency: Duration,
    repeat: usize,
) -> Result<i32, Box<dyn std::error::Error>> {
    println!("{}", "Strategy comparison".green().bold());
    println!();

    let mut outputs = Vec::new();
    for strategy in [
        ExecutionStrategy::PrioritizedParallel,
        ExecutionStrategy::Parallel,
        ExecutionStrategy::Serial,
    ] {
        let data = data(latency);
        let executor =
            star_wars_executor(Arc::clone(&data), config.clone().with_query_strategy(strategy));
        let ctx = Context::new();

        let started = Instant::now();
        let mut response = Response::data(serde_json::Value::Null);
        for _ in 0..repeat.max(1) {
            response = executor.execute(operation, &ctx).await;
        }
        let elapsed = started.elapsed();

        let calls = data.calls();
        println!(
            "  {:<22} {:>4} fetch(es) {:>12?}",
            strategy.to_string().bold(),
            calls.total() / repeat.max(1),
            elapsed
        );
        outputs.push(response.data);
    }

    println!();
    if outputs.windows(2).all(|pair| pair[0] == pair[1]) {
        println!("{} all strategies produced the same data", "Success:".green().bold());
        Ok(0)
    } else {
        eprintln!("{} strategies produced different data", "Error:".red().bold());
        Ok(1)
    }
}

fn print_calls(calls: &CallCounts) {
    println!("{}", "Data access".green().bold());
    println!("  droidById:         {}", calls.droid_by_id);
    println!("  droidsByIds:       {}", calls.droids_by_ids);
    println!("  droidOwnersByIds:  {}", calls.droid_owners_by_ids);
    println!("  friendsForIds:     {}", calls.friends_for_ids);
    println!("  humanById:         {}", calls.human_by_id);
    println!("  addHuman:          {}", calls.add_human);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from([
            "bgql",
            "run",
            "droid",
            "--strategy",
            "parallel",
            "--max-parallelism",
            "2",
        ]);

        let Commands::Run {
            query,
            strategy,
            max_parallelism,
            ..
        } = cli.command
        else {
            panic!("expected the run command");
        };
        assert_eq!(query, QueryKind::Droid);
        assert_eq!(strategy, Some(ExecutionStrategy::Parallel));
        assert_eq!(max_parallelism, Some(2));
    }

    #[tokio::test]
    async fn test_compare_strategies_agree() {
        let code = compare_strategies(
            &ExecutorConfig::default(),
            &queries::droid_query("3"),
            Duration::ZERO,
            1,
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
    }
}

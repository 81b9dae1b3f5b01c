//! Hyperforge command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hf_data::{
    CsvStore, DatasetCache, DatasetMaterializer, JournalStore, LedgerStore, LineageGraph,
    RunLedger,
};
use hf_engine::{
    CommandMaterializer, CommandTrainer, DescriptorMaterializer, ExperimentConfig, FitnessEvaluator,
    LedgerFormat, Orchestrator,
};
use hf_types::{DataError, RankField};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hyperforge")]
#[command(about = "Evolutionary hyperparameter search driven by an external trainer")]
struct Cli {
    /// Logging level, used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an evolution experiment
    Run {
        /// Experiment configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the number of generations
        #[arg(long)]
        generations: Option<u32>,

        /// Override the generation-0 population size
        #[arg(long)]
        population: Option<usize>,

        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the experiment name
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the best ledger row
    Best {
        #[arg(short, long)]
        config: PathBuf,

        /// precision, recall, metric or fitness
        #[arg(long, default_value = "metric")]
        by: RankField,
    },

    /// Export the lineage graph as JSON
    Lineage {
        #[arg(short, long)]
        config: PathBuf,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run {
            config,
            generations,
            population,
            seed,
            name,
        } => {
            let mut config = ExperimentConfig::from_file(&config)?;
            if let Some(n) = generations {
                config.evolution.generations = n;
            }
            if let Some(n) = population {
                config.evolution.population_size = n;
            }
            if let Some(seed) = seed {
                config.evolution.seed = Some(seed);
            }
            if let Some(name) = name {
                config.name = name;
            }
            config.validate()?;
            run(config).await
        }
        Command::Best { config, by } => {
            let config = ExperimentConfig::from_file(&config)?;
            let ledger = open_existing_ledger(&config)?;
            match ledger.best(by) {
                Some(row) => println!("{}", serde_json::to_string_pretty(row)?),
                None => bail!("ledger {} has no rows", config.ledger_path().display()),
            }
            Ok(())
        }
        Command::Lineage { config, out } => {
            let config = ExperimentConfig::from_file(&config)?;
            let ledger = open_existing_ledger(&config)?;
            let graph = LineageGraph::from_rows(ledger.all());
            let json = serde_json::to_string_pretty(&graph)?;
            match out {
                Some(path) => {
                    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                    info!(
                        "Wrote lineage of {} nodes and {} links to {}",
                        graph.nodes.len(),
                        graph.links.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
            Ok(())
        }
        Command::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ExperimentConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn run(config: ExperimentConfig) -> Result<()> {
    let experiment_dir = config.experiment_dir();
    fs::create_dir_all(&experiment_dir)
        .with_context(|| format!("creating {}", experiment_dir.display()))?;
    config.save(&experiment_dir.join("experiment.json"))?;
    info!("Experiment directory: {}", experiment_dir.display());

    let materializer: Box<dyn DatasetMaterializer> = match &config.dataset {
        Some(settings) => Box::new(CommandMaterializer::new(settings.clone())),
        None => Box::new(DescriptorMaterializer),
    };
    let datasets = Arc::new(DatasetCache::new(materializer));
    let evaluator = FitnessEvaluator::new(
        Box::new(CommandTrainer::new(config.trainer.clone())),
        datasets.clone(),
        config.fixed.clone(),
        &experiment_dir,
    );

    let ledger = open_ledger(&config)?;
    let mut orchestrator = Orchestrator::new(config.evolution.clone(), evaluator, ledger)?;
    let summary = orchestrator.run().await?;

    let stats = datasets.get_stats();
    info!(
        "Dataset cache: {} hits, {} misses ({:.0}% hit rate)",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );

    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(experiment_dir.join("run_summary.json"), &json)?;
    println!("{json}");
    Ok(())
}

fn open_ledger(config: &ExperimentConfig) -> Result<RunLedger<Box<dyn LedgerStore>>> {
    let path = config.ledger_path();
    let store: Box<dyn LedgerStore> = match config.ledger {
        LedgerFormat::Csv => Box::new(CsvStore::new(
            path,
            config.evolution.parameters.clone(),
            config.evolution.selection_metric.clone(),
        )),
        LedgerFormat::Journal => Box::new(JournalStore::new(path)),
    };
    Ok(RunLedger::open(store)?)
}

fn open_existing_ledger(config: &ExperimentConfig) -> Result<RunLedger<Box<dyn LedgerStore>>> {
    let path = config.ledger_path();
    ensure_exists(&path)?;
    open_ledger(config)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(DataError::LedgerNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(())
}

//! Generation loop of the evolutionary search.

use std::fmt;

use chrono::{DateTime, Utc};
use hf_data::{LedgerStore, RunLedger};
use hf_optimizer::{random_name, EvolutionConfig, ReproductionEngine};
use hf_types::{
    HfResult, Individual, LedgerRow, Population, RankField, RunId, SearchError, Trial,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::evaluator::FitnessEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The configured number of generations was evaluated.
    GenerationBudgetExhausted,
    /// No individual of this generation survived evaluation.
    EmptyGeneration { generation: u32 },
    /// The survivors of this generation produced no children.
    EmptyReproduction { generation: u32 },
}

impl TerminationReason {
    /// The search condition behind an early stop.
    pub fn as_error(&self) -> Option<SearchError> {
        match *self {
            TerminationReason::GenerationBudgetExhausted => None,
            TerminationReason::EmptyGeneration { generation } => {
                Some(SearchError::EmptyGeneration { generation })
            }
            TerminationReason::EmptyReproduction { generation } => {
                Some(SearchError::EmptyReproduction { generation })
            }
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_error() {
            Some(e) => write!(f, "{e}"),
            None => write!(f, "generation budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Initializing,
    EvaluatingGeneration { generation: u32 },
    Reproducing { generation: u32 },
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub generation: u32,
    pub attempted: usize,
    pub succeeded: usize,
    /// Size of the next generation; `None` when no reproduction happened.
    pub children: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub experiment_id: Uuid,
    pub seed: u64,
    pub termination: TerminationReason,
    pub generations_completed: u32,
    pub trials_attempted: usize,
    pub trials_succeeded: usize,
    pub trials_failed: usize,
    /// Best row of the whole ledger by selection metric.
    pub best: Option<LedgerRow>,
    pub generations: Vec<GenerationReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Owns the ledger and drives
/// `Initializing -> EvaluatingGeneration -> Reproducing -> ... -> Terminated`.
pub struct Orchestrator<S> {
    config: EvolutionConfig,
    engine: ReproductionEngine,
    evaluator: FitnessEvaluator,
    ledger: RunLedger<S>,
    rng: ChaCha8Rng,
    seed: u64,
    state: OrchestratorState,
    next_run_id: RunId,
    experiment_id: Uuid,
}

impl<S: LedgerStore> Orchestrator<S> {
    /// Run ids continue after the largest one already in the ledger.
    pub fn new(
        config: EvolutionConfig,
        evaluator: FitnessEvaluator,
        ledger: RunLedger<S>,
    ) -> HfResult<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let next_run_id = ledger.max_run_id().map_or(0, |id| id + 1);
        let experiment_id = Uuid::new_v4();
        info!(
            "Experiment {} initialized: seed={} next run id={} generations={} population={} \
             capacity={}",
            experiment_id,
            seed,
            next_run_id,
            config.generations,
            config.population_size,
            config.carrying_capacity
        );

        Ok(Self {
            engine: config.reproduction_engine(),
            config,
            evaluator,
            ledger,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            state: OrchestratorState::Initializing,
            next_run_id,
            experiment_id,
        })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn ledger(&self) -> &RunLedger<S> {
        &self.ledger
    }

    pub fn into_ledger(self) -> RunLedger<S> {
        self.ledger
    }

    pub fn next_run_id(&self) -> RunId {
        self.next_run_id
    }

    pub fn experiment_id(&self) -> Uuid {
        self.experiment_id
    }

    /// Generation 0: `population_size` random draws, never mutated.
    pub fn initial_population(&mut self) -> Population {
        self.state = OrchestratorState::Initializing;
        (0..self.config.population_size)
            .map(|_| {
                let params = self.config.parameters.random(&mut self.rng);
                let founder = Individual::founder(random_name(&mut self.rng), params);
                debug_assert!(founder.check(&self.config.parameters).is_ok());
                founder
            })
            .collect()
    }

    /// Evaluates every individual in order, persisting each success before
    /// the next trial starts. Failed individuals still consume a run id.
    pub async fn evaluate_generation(
        &mut self,
        generation: u32,
        population: Population,
    ) -> HfResult<Vec<LedgerRow>> {
        self.state = OrchestratorState::EvaluatingGeneration { generation };
        let total = population.len();
        let mut survivors = Vec::with_capacity(total);

        for (i, individual) in population.into_iter().enumerate() {
            let trial = Trial::new(self.next_run_id, individual);
            self.next_run_id += 1;
            info!(
                "[gen {}] trial {}/{}: run {} ({})",
                generation,
                i + 1,
                total,
                trial.run_id,
                trial.individual.name()
            );
            if let Some(row) = self.evaluator.evaluate(&trial).await {
                self.ledger.upsert(row.clone())?;
                survivors.push(row);
            }
        }

        info!(
            "Generation {} complete: {}/{} survivors",
            generation,
            survivors.len(),
            total
        );
        Ok(survivors)
    }

    /// Runs the search to termination.
    pub async fn run(&mut self) -> HfResult<RunSummary> {
        let started_at = Utc::now();
        let mut population = self.initial_population();
        let mut generation = 0u32;
        let mut reports = Vec::new();

        let termination = loop {
            let attempted = population.len();
            let mut survivors = self.evaluate_generation(generation, population).await?;
            let mut report = GenerationReport {
                generation,
                attempted,
                succeeded: survivors.len(),
                children: None,
            };

            if survivors.is_empty() {
                reports.push(report);
                break TerminationReason::EmptyGeneration { generation };
            }
            if generation + 1 >= self.config.generations {
                reports.push(report);
                break TerminationReason::GenerationBudgetExhausted;
            }

            self.state = OrchestratorState::Reproducing { generation };
            rank_survivors(&mut survivors);
            debug!(
                "Ranked survivors: {:?}",
                survivors
                    .iter()
                    .map(|r| (r.run_id, r.selection_metric()))
                    .collect::<Vec<_>>()
            );
            let children =
                self.engine
                    .reproduce(&self.config.parameters, &survivors, generation + 1, &mut self.rng)?;
            report.children = Some(children.len());
            reports.push(report);

            if children.is_empty() {
                break TerminationReason::EmptyReproduction { generation };
            }
            population = children;
            generation += 1;
        };

        self.state = OrchestratorState::Terminated(termination);
        match termination.as_error() {
            Some(e) => warn!("Search stopped early: {}", e),
            None => info!("Search finished: {}", termination),
        }

        let best = self.ledger.best(RankField::SelectionMetric).cloned();
        match &best {
            Some(row) => info!(
                "Best run {} ({}) of generation {}: {}={:.4} fitness={:.4} params={:?}",
                row.run_id,
                row.name,
                row.generation,
                self.config.selection_metric,
                row.selection_metric(),
                row.result.fitness_score,
                row.params
            ),
            None => warn!("Ledger is empty, no best run to report"),
        }

        let trials_attempted: usize = reports.iter().map(|r| r.attempted).sum();
        let trials_succeeded: usize = reports.iter().map(|r| r.succeeded).sum();
        Ok(RunSummary {
            experiment_id: self.experiment_id,
            seed: self.seed,
            termination,
            generations_completed: reports.len() as u32,
            trials_attempted,
            trials_succeeded,
            trials_failed: trials_attempted - trials_succeeded,
            best,
            generations: reports,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Selection metric descending, run id ascending on ties.
pub fn rank_survivors(rows: &mut [LedgerRow]) {
    rows.sort_by(|a, b| {
        b.selection_metric()
            .total_cmp(&a.selection_metric())
            .then(a.run_id.cmp(&b.run_id))
    });
}

//! Hyperforge evolution engine.
//!
//! Wires the genetic operators, the external trainer and the run ledger
//! into a sequential generation loop.

pub mod config;
pub mod evaluator;
pub mod orchestrator;
pub mod trainer;

pub use config::{ExperimentConfig, LedgerFormat};
pub use evaluator::{FitnessEvaluator, SharedDatasetCache};
pub use orchestrator::{
    rank_survivors, GenerationReport, Orchestrator, OrchestratorState, RunSummary,
    TerminationReason,
};
pub use trainer::{
    read_results, CommandMaterializer, CommandSpec, CommandTrainer, DatasetSettings,
    DescriptorMaterializer, ResultColumns, Trainer, TrainerSettings, TrainingMetrics,
    TrainingRequest,
};

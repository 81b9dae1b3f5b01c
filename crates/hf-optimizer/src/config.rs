//! Evolution knobs.

use hf_types::{HfResult, ParameterSpace, ParameterSpec, validation_error};
use serde::{Deserialize, Serialize};

use crate::operators::MutationSettings;
use crate::reproduction::ReproductionEngine;

/// Top-level configuration of a genetic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Maximum number of generations evaluated.
    pub generations: u32,

    /// Number of random individuals in generation 0.
    pub population_size: usize,

    /// Soft target for offspring per generation.
    pub carrying_capacity: usize,

    pub mutation: MutationSettings,

    /// Label of the trainer's selection metric (e.g. "mAP_50:95"): the CSV
    /// ledger column name and the name used in log lines. Ranking and mate
    /// weighting always use the metric the trainer reports as its selection
    /// metric; changing this label does not change what is optimized.
    pub selection_metric: String,

    /// Seed for every stochastic operator. `None` draws one at startup.
    pub seed: Option<u64>,

    /// Evolved dimensions.
    pub parameters: ParameterSpace,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            generations: 15,
            population_size: 12,
            carrying_capacity: 20,
            mutation: MutationSettings::default(),
            selection_metric: "mAP_50:95".to_string(),
            seed: None,
            parameters: ParameterSpace::new()
                .add_float("lr0", 0.001, 0.1)
                .add_int("batch", 2, 4)
                .add_float("positive_ratio", 0.1, 0.9)
                .add_int("dataset_size", 200, 6000)
                .add(ParameterSpec::int("imgsz", 320, 960).with_step(32)),
        }
    }
}

impl EvolutionConfig {
    pub fn with_generations(mut self, n: u32) -> Self {
        self.generations = n;
        self
    }

    pub fn with_population_size(mut self, n: usize) -> Self {
        self.population_size = n;
        self
    }

    pub fn with_carrying_capacity(mut self, n: usize) -> Self {
        self.carrying_capacity = n;
        self
    }

    pub fn with_mutation(mut self, probability: f64, strength: f64) -> Self {
        self.mutation = MutationSettings {
            probability,
            strength,
        };
        self
    }

    pub fn with_selection_metric(mut self, metric: &str) -> Self {
        self.selection_metric = metric.to_string();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSpace) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn validate(&self) -> HfResult<()> {
        if self.generations == 0 {
            return Err(validation_error!("generations must be at least 1"));
        }
        if self.population_size == 0 {
            return Err(validation_error!("population_size must be at least 1"));
        }
        if self.selection_metric.trim().is_empty() {
            return Err(validation_error!("selection_metric must be named"));
        }
        self.mutation.validate()?;
        self.parameters.validate()
    }

    pub fn reproduction_engine(&self) -> ReproductionEngine {
        ReproductionEngine::new(self.carrying_capacity, self.mutation)
    }
}

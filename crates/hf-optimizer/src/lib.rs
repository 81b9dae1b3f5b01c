//! # hf-optimizer
//!
//! Generational genetic search over a hyperparameter space.
//!
//! Provides the crossover and mutation operators, the composite fitness
//! score, fitness-proportionate reproduction with a soft carrying capacity,
//! and the evolution configuration knobs.

mod config;
mod fitness;
mod naming;
mod operators;
mod reproduction;

pub use config::EvolutionConfig;
pub use fitness::{fitness, EPSILON};
pub use naming::random_name;
pub use operators::{crossover, mutate, MutationSettings};
pub use reproduction::ReproductionEngine;

//! Fitness-proportionate reproduction with a soft carrying capacity.

use hf_types::{Individual, LedgerRow, Lineage, ParameterSpace, Population, SearchError};
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::fitness::EPSILON;
use crate::naming::random_name;
use crate::operators::{crossover, mutate, MutationSettings};

/// Non-finite and negative metrics never attract offspring or mates.
fn reproductive_weight(row: &LedgerRow) -> f64 {
    let metric = row.selection_metric();
    if metric.is_finite() && metric > 0.0 {
        metric
    } else {
        0.0
    }
}

/// Builds the next generation from the survivors of the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct ReproductionEngine {
    /// Soft target for the size of the next generation. Rounding may over-
    /// or undershoot it; the total is never clamped.
    pub carrying_capacity: usize,
    pub mutation: MutationSettings,
}

impl ReproductionEngine {
    pub fn new(carrying_capacity: usize, mutation: MutationSettings) -> Self {
        Self {
            carrying_capacity,
            mutation,
        }
    }

    /// `capacity * metric(p) / total` per survivor, in survivor order.
    pub fn expected_offspring(&self, survivors: &[LedgerRow]) -> Vec<f64> {
        let total = survivors
            .iter()
            .map(reproductive_weight)
            .sum::<f64>()
            .max(EPSILON);
        survivors
            .iter()
            .map(|p| self.carrying_capacity as f64 * reproductive_weight(p) / total)
            .collect()
    }

    /// Expected offspring rounded half away from zero.
    pub fn offspring_budget(&self, survivors: &[LedgerRow]) -> Vec<usize> {
        self.expected_offspring(survivors)
            .into_iter()
            .map(|expected| expected.round() as usize)
            .collect()
    }

    /// Produces generation `generation` from the survivors of the previous one.
    ///
    /// Each survivor gets its budgeted number of children. A child's mate is
    /// drawn among the other survivors with probability proportional to
    /// their selection metric; a slot with no eligible mate yields nothing.
    pub fn reproduce<R>(
        &self,
        space: &ParameterSpace,
        survivors: &[LedgerRow],
        generation: u32,
        rng: &mut R,
    ) -> Result<Population, SearchError>
    where
        R: Rng + ?Sized,
    {
        if survivors.is_empty() {
            debug!("No survivors, skipping reproduction");
            return Ok(Population::new());
        }

        let budget = self.offspring_budget(survivors);
        let mut children = Population::with_capacity(budget.iter().sum());

        for (i, (parent, &num_kids)) in survivors.iter().zip(&budget).enumerate() {
            if num_kids == 0 {
                continue;
            }
            let mates: Vec<&LedgerRow> = survivors
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, row)| row)
                .collect();

            for _ in 0..num_kids {
                let Ok(mate) = mates.choose_weighted(rng, |m| reproductive_weight(m)) else {
                    debug!("No eligible mate for run {}", parent.run_id);
                    continue;
                };

                let mut params = crossover(space, &parent.params, &mate.params, rng)?;
                let mutation_details = mutate(space, &mut params, &self.mutation, rng)?;
                let lineage = Lineage {
                    parent1_id: parent.run_id,
                    parent2_id: mate.run_id,
                };
                let child = Individual::offspring(
                    generation,
                    random_name(rng),
                    params,
                    lineage,
                    mutation_details,
                );
                debug_assert!(child.check(space).is_ok(), "child outside space: {child:?}");
                children.push(child);
            }
        }

        info!(
            "{} children generated for generation {} (target = {})",
            children.len(),
            generation,
            self.carrying_capacity
        );
        Ok(children)
    }
}

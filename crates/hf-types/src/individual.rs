//! Individuals, trials and ledger rows.
//!
//! An [`Individual`] is a hyperparameter configuration plus lineage. It gets a
//! run id only when it is scheduled for evaluation, which turns it into a
//! [`Trial`]. A successful trial becomes a [`LedgerRow`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::SearchError;
use crate::parameter::{ParameterSet, ParameterSpace, ParameterValue};

/// Experiment-wide, strictly increasing trial identifier.
pub type RunId = u64;

/// Before/after values of one mutated dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub before: ParameterValue,
    pub after: ParameterValue,
}

/// Changed dimensions only, keyed by parameter name.
pub type MutationDetails = BTreeMap<String, MutationRecord>;

/// Run ids of the two generation-(g-1) parents of an offspring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub parent1_id: RunId,
    pub parent2_id: RunId,
}

/// A configuration awaiting evaluation.
///
/// Fields are read-only once built; crossover and mutation happen before
/// [`Individual::offspring`] is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    generation: u32,
    name: String,
    params: ParameterSet,
    lineage: Option<Lineage>,
    mutation_details: MutationDetails,
}

impl Individual {
    /// A generation-0 individual drawn at random; never mutated.
    pub fn founder(name: impl Into<String>, params: ParameterSet) -> Self {
        Self {
            generation: 0,
            name: name.into(),
            params,
            lineage: None,
            mutation_details: MutationDetails::new(),
        }
    }

    pub fn offspring(
        generation: u32,
        name: impl Into<String>,
        params: ParameterSet,
        lineage: Lineage,
        mutation_details: MutationDetails,
    ) -> Self {
        Self {
            generation,
            name: name.into(),
            params,
            lineage: Some(lineage),
            mutation_details,
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn lineage(&self) -> Option<Lineage> {
        self.lineage
    }

    pub fn parent1_id(&self) -> Option<RunId> {
        self.lineage.map(|l| l.parent1_id)
    }

    pub fn parent2_id(&self) -> Option<RunId> {
        self.lineage.map(|l| l.parent2_id)
    }

    pub fn mutated(&self) -> bool {
        !self.mutation_details.is_empty()
    }

    pub fn mutation_details(&self) -> &MutationDetails {
        &self.mutation_details
    }

    /// Verifies every value against the search space.
    pub fn check(&self, space: &ParameterSpace) -> Result<(), SearchError> {
        space.check(&self.params)
    }
}

/// Ordered individuals of one generation, not yet evaluated.
pub type Population = Vec<Individual>;

/// An individual with its run id, about to be handed to the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub run_id: RunId,
    pub individual: Individual,
}

impl Trial {
    pub fn new(run_id: RunId, individual: Individual) -> Self {
        Self { run_id, individual }
    }

    /// Directory name used for the trial's artifacts.
    pub fn run_dir_name(&self) -> String {
        format!("run_{:04}_{}", self.run_id, self.individual.name())
    }
}

/// Scores attached to an individual after a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub precision: f64,
    pub recall: f64,
    pub selection_metric: f64,
    pub fitness_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Fixed, non-evolved training parameters recorded alongside each row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedParams {
    pub model: String,
    pub epochs: u32,
}

impl Default for FixedParams {
    fn default() -> Self {
        Self {
            model: "yolov8n.pt".to_string(),
            epochs: 40,
        }
    }
}

/// One evaluated individual, keyed by `(run_id, generation)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub run_id: RunId,
    pub generation: u32,
    pub name: String,
    pub params: ParameterSet,
    pub model: String,
    pub epochs: u32,
    #[serde(flatten)]
    pub result: EvaluationResult,
    pub parent1_id: Option<RunId>,
    pub parent2_id: Option<RunId>,
    pub mutated: bool,
    pub mutation_details: MutationDetails,
}

impl LedgerRow {
    pub fn new(trial: &Trial, fixed: &FixedParams, result: EvaluationResult) -> Self {
        let individual = &trial.individual;
        Self {
            run_id: trial.run_id,
            generation: individual.generation(),
            name: individual.name().to_string(),
            params: individual.params().clone(),
            model: fixed.model.clone(),
            epochs: fixed.epochs,
            result,
            parent1_id: individual.parent1_id(),
            parent2_id: individual.parent2_id(),
            mutated: individual.mutated(),
            mutation_details: individual.mutation_details().clone(),
        }
    }

    pub fn key(&self) -> (RunId, u32) {
        (self.run_id, self.generation)
    }

    pub fn selection_metric(&self) -> f64 {
        self.result.selection_metric
    }

    pub fn field(&self, field: RankField) -> f64 {
        match field {
            RankField::Precision => self.result.precision,
            RankField::Recall => self.result.recall,
            RankField::SelectionMetric => self.result.selection_metric,
            RankField::FitnessScore => self.result.fitness_score,
        }
    }
}

/// Numeric ledger field used to rank rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankField {
    Precision,
    Recall,
    SelectionMetric,
    FitnessScore,
}

impl std::str::FromStr for RankField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "precision" => Ok(Self::Precision),
            "recall" => Ok(Self::Recall),
            "selection_metric" | "metric" => Ok(Self::SelectionMetric),
            "fitness_score" | "fitness" => Ok(Self::FitnessScore),
            other => Err(format!("unknown ledger field: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("lr0".into(), ParameterValue::Float(0.01));
        params.insert("imgsz".into(), ParameterValue::Int(640));
        params
    }

    fn result() -> EvaluationResult {
        EvaluationResult {
            precision: 0.7,
            recall: 0.6,
            selection_metric: 0.4,
            fitness_score: 0.1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn founder_has_no_lineage() {
        let founder = Individual::founder("red-brave-fox", params());
        assert_eq!(founder.generation(), 0);
        assert_eq!(founder.parent1_id(), None);
        assert!(!founder.mutated());
    }

    #[test]
    fn offspring_row_carries_lineage_and_mutations() {
        let mut details = MutationDetails::new();
        details.insert(
            "imgsz".into(),
            MutationRecord {
                before: ParameterValue::Int(608),
                after: ParameterValue::Int(640),
            },
        );
        let child = Individual::offspring(
            3,
            "blue-tiny-owl",
            params(),
            Lineage {
                parent1_id: 20,
                parent2_id: 17,
            },
            details,
        );
        let trial = Trial::new(31, child);
        assert_eq!(trial.run_dir_name(), "run_0031_blue-tiny-owl");

        let row = LedgerRow::new(&trial, &FixedParams::default(), result());
        assert_eq!(row.key(), (31, 3));
        assert_eq!(row.parent1_id, Some(20));
        assert_eq!(row.parent2_id, Some(17));
        assert!(row.mutated);
        assert_eq!(row.model, "yolov8n.pt");
        assert_eq!(row.epochs, 40);
        assert_eq!(row.field(RankField::Recall), 0.6);
    }

    #[test]
    fn ledger_row_json_keeps_mutation_details_structured() {
        let mut details = MutationDetails::new();
        details.insert(
            "lr0".into(),
            MutationRecord {
                before: ParameterValue::Float(0.02),
                after: ParameterValue::Float(0.01),
            },
        );
        let child = Individual::offspring(
            1,
            "green-lucky-bear",
            params(),
            Lineage {
                parent1_id: 0,
                parent2_id: 1,
            },
            details,
        );
        let row = LedgerRow::new(&Trial::new(12, child), &FixedParams::default(), result());

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["mutation_details"]["lr0"]["before"], 0.02);
        assert_eq!(json["precision"], 0.7);

        let back: LedgerRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn rank_field_parses_aliases() {
        assert_eq!("fitness".parse::<RankField>().unwrap(), RankField::FitnessScore);
        assert_eq!(
            "selection_metric".parse::<RankField>().unwrap(),
            RankField::SelectionMetric
        );
        assert!("map".parse::<RankField>().is_err());
    }
}

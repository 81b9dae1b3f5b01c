use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use hf_data::{DatasetCache, DatasetKey, DatasetMaterializer};
use hf_optimizer::fitness;
use hf_types::{EvaluationResult, FixedParams, LedgerRow, ParameterSet, TrainerError, Trial};
use tracing::{info, warn};

use crate::trainer::{Trainer, TrainingRequest};

/// Dimension holding the dataset size.
pub const DATASET_SIZE_PARAM: &str = "dataset_size";
/// Dimension holding the positive sample ratio.
pub const POSITIVE_RATIO_PARAM: &str = "positive_ratio";

pub type SharedDatasetCache = Arc<DatasetCache<Box<dyn DatasetMaterializer>>>;

/// Scores one trial: materialize its dataset, train, reduce the metrics.
pub struct FitnessEvaluator {
    trainer: Box<dyn Trainer>,
    datasets: SharedDatasetCache,
    fixed: FixedParams,
    runs_dir: PathBuf,
}

impl FitnessEvaluator {
    pub fn new(
        trainer: Box<dyn Trainer>,
        datasets: SharedDatasetCache,
        fixed: FixedParams,
        runs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            trainer,
            datasets,
            fixed,
            runs_dir: runs_dir.into(),
        }
    }

    pub fn fixed(&self) -> &FixedParams {
        &self.fixed
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn datasets(&self) -> &SharedDatasetCache {
        &self.datasets
    }

    /// Runs the trial. Every failure is per-individual.
    pub async fn try_evaluate(&self, trial: &Trial) -> Result<EvaluationResult, TrainerError> {
        let run_dir = self.runs_dir.join(trial.run_dir_name());
        let key = dataset_key(trial.individual.params())?;
        let dataset = self
            .datasets
            .get_or_materialize(key, &run_dir.join("dataset"))
            .await
            .map_err(|e| TrainerError::DatasetUnavailable {
                message: e.to_string(),
            })?;

        let request = TrainingRequest {
            run_id: trial.run_id,
            name: trial.individual.name().to_string(),
            model: self.fixed.model.clone(),
            epochs: self.fixed.epochs,
            params: trial.individual.params().clone(),
            dataset,
            run_dir,
        };
        let metrics = self.trainer.train(&request).await?;

        Ok(EvaluationResult {
            precision: metrics.precision,
            recall: metrics.recall,
            selection_metric: metrics.selection_metric,
            fitness_score: fitness(metrics.precision, metrics.recall, metrics.selection_metric),
            timestamp: Utc::now(),
        })
    }

    /// Ledger row for a successful trial, `None` when the individual has to
    /// be dropped.
    pub async fn evaluate(&self, trial: &Trial) -> Option<LedgerRow> {
        match self.try_evaluate(trial).await {
            Ok(result) => {
                info!(
                    "Run {} ({}) scored precision={:.4} recall={:.4} metric={:.4} fitness={:.4}",
                    trial.run_id,
                    trial.individual.name(),
                    result.precision,
                    result.recall,
                    result.selection_metric,
                    result.fitness_score
                );
                Some(LedgerRow::new(trial, &self.fixed, result))
            }
            Err(e) => {
                warn!(
                    "Dropping run {} ({}) of generation {}: {}",
                    trial.run_id,
                    trial.individual.name(),
                    trial.individual.generation(),
                    e
                );
                None
            }
        }
    }
}

fn dataset_key(params: &ParameterSet) -> Result<DatasetKey, TrainerError> {
    let missing = |name: &str| TrainerError::DatasetUnavailable {
        message: format!("parameter {name} is not set"),
    };
    let size = params
        .get(DATASET_SIZE_PARAM)
        .ok_or_else(|| missing(DATASET_SIZE_PARAM))?
        .as_f64();
    let ratio = params
        .get(POSITIVE_RATIO_PARAM)
        .ok_or_else(|| missing(POSITIVE_RATIO_PARAM))?
        .as_f64();
    if size < 1.0 {
        return Err(TrainerError::DatasetUnavailable {
            message: format!("dataset size {size} is not positive"),
        });
    }
    Ok(DatasetKey::new(size.round() as u64, ratio))
}

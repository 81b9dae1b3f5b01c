//! Experiment configuration, loaded from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use hf_data::is_reserved_column;
use hf_optimizer::EvolutionConfig;
use hf_types::{config_error, FixedParams, HfResult};
use serde::{Deserialize, Serialize};

use crate::evaluator::{DATASET_SIZE_PARAM, POSITIVE_RATIO_PARAM};
use crate::trainer::{CommandSpec, DatasetSettings, TrainerSettings};

/// On-disk representation of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerFormat {
    /// `summary.csv`, rewritten atomically on every upsert.
    #[default]
    Csv,
    /// `ledger.jsonl`, append-only.
    Journal,
}

impl LedgerFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            LedgerFormat::Csv => "summary.csv",
            LedgerFormat::Journal => "ledger.jsonl",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default)]
    pub fixed: FixedParams,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    pub trainer: TrainerSettings,
    /// Without a dataset command only a key descriptor is written for the
    /// trainer.
    #[serde(default)]
    pub dataset: Option<DatasetSettings>,
    #[serde(default)]
    pub ledger: LedgerFormat,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("experiments")
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "evolution".to_string(),
            output_root: default_output_root(),
            fixed: FixedParams::default(),
            evolution: EvolutionConfig::default(),
            trainer: TrainerSettings::new(
                CommandSpec::new("python3").with_args(["train.py"]),
            ),
            dataset: None,
            ledger: LedgerFormat::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_file(path: &Path) -> HfResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| config_error!("invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> HfResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> HfResult<()> {
        if self.name.trim().is_empty() || self.name.contains(['/', '\\']) {
            return Err(config_error!(
                "experiment name {:?} is not a directory name",
                self.name
            ));
        }
        if self.fixed.epochs == 0 {
            return Err(config_error!("epochs must be at least 1"));
        }
        if self.trainer.command.program.trim().is_empty() {
            return Err(config_error!("trainer program is empty"));
        }
        let metric = &self.evolution.selection_metric;
        if let Some(clash) = self
            .evolution
            .parameters
            .names()
            .find(|name| is_reserved_column(name, metric))
        {
            return Err(config_error!(
                "parameter {:?} collides with a ledger column",
                clash
            ));
        }
        for required in [DATASET_SIZE_PARAM, POSITIVE_RATIO_PARAM] {
            if self.evolution.parameters.get(required).is_none() {
                return Err(config_error!("search space must define {}", required));
            }
        }
        self.evolution.validate()
    }

    /// `<output_root>/<name>`
    pub fn experiment_dir(&self) -> PathBuf {
        self.output_root.join(&self.name)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.experiment_dir().join(self.ledger.file_name())
    }
}

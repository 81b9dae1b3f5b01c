//! External collaborators: the training harness and dataset builder.
//!
//! Both run as child processes. The trainer receives a JSON request file and
//! leaves a results CSV behind; the materializer receives the dataset key
//! on its command line and leaves a descriptor file behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use hf_data::{DatasetKey, DatasetMaterializer};
use hf_types::{DataError, HfResult, ParameterSet, RunId, TrainerError};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

/// Everything the trainer needs for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub run_id: RunId,
    pub name: String,
    pub model: String,
    pub epochs: u32,
    /// Evolved hyperparameters (imgsz, batch, lr0, ...).
    pub params: ParameterSet,
    /// Dataset descriptor produced by the materializer.
    pub dataset: PathBuf,
    /// Working directory for the trial's artifacts.
    pub run_dir: PathBuf,
}

/// Raw metrics reported by a finished training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingMetrics {
    pub precision: f64,
    pub recall: f64,
    pub selection_metric: f64,
}

#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, request: &TrainingRequest) -> Result<TrainingMetrics, TrainerError>;
}

#[async_trait]
impl<T: Trainer + ?Sized> Trainer for Box<T> {
    async fn train(&self, request: &TrainingRequest) -> Result<TrainingMetrics, TrainerError> {
        (**self).train(request).await
    }
}

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env).kill_on_drop(true);
        command
    }
}

/// Result CSV columns holding the three metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultColumns {
    pub precision: String,
    pub recall: String,
    pub selection_metric: String,
}

impl Default for ResultColumns {
    fn default() -> Self {
        Self {
            precision: "metrics/precision(B)".to_string(),
            recall: "metrics/recall(B)".to_string(),
            selection_metric: "metrics/mAP50-95(B)".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerSettings {
    pub command: CommandSpec,
    /// Result CSV, relative to the run directory.
    #[serde(default = "default_results_file")]
    pub results_file: PathBuf,
    #[serde(default)]
    pub columns: ResultColumns,
}

fn default_results_file() -> PathBuf {
    PathBuf::from("yolo").join("results.csv")
}

impl TrainerSettings {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            results_file: default_results_file(),
            columns: ResultColumns::default(),
        }
    }
}

/// Runs `<program> <args...> <run_dir>/request.json` in the run directory
/// and reads the last row of the results CSV.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    settings: TrainerSettings,
}

impl CommandTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    async fn train(&self, request: &TrainingRequest) -> Result<TrainingMetrics, TrainerError> {
        let program = self.settings.command.program.clone();
        let failed = |message: String| TrainerError::Failed { message };

        tokio::fs::create_dir_all(&request.run_dir)
            .await
            .map_err(|e| failed(format!("cannot create {}: {}", request.run_dir.display(), e)))?;
        let request_path = request.run_dir.join("request.json");
        let payload = serde_json::to_vec_pretty(request).map_err(|e| failed(e.to_string()))?;
        tokio::fs::write(&request_path, payload)
            .await
            .map_err(|e| failed(format!("cannot write {}: {}", request_path.display(), e)))?;

        info!("Launching trainer {} for run {}", program, request.run_id);
        let output = self
            .settings
            .command
            .command()
            .arg(&request_path)
            .current_dir(&request.run_dir)
            .output()
            .await
            .map_err(|e| TrainerError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;
        save_logs(&request.run_dir, &output).await;

        if !output.status.success() {
            return Err(failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr_tail(&output)
            )));
        }

        let results = request.run_dir.join(&self.settings.results_file);
        read_results(&results, &self.settings.columns)
    }
}

async fn save_logs(run_dir: &Path, output: &Output) {
    let mut log = output.stdout.clone();
    log.extend_from_slice(&output.stderr);
    if let Err(e) = tokio::fs::write(run_dir.join("train.log"), log).await {
        debug!("Could not save trainer log in {}: {}", run_dir.display(), e);
    }
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(5)..].join(" | ")
}

/// Metrics from the last data row of a results CSV. Header whitespace is
/// ignored.
pub fn read_results(path: &Path, columns: &ResultColumns) -> Result<TrainingMetrics, TrainerError> {
    if !path.exists() {
        return Err(TrainerError::MissingResultArtifact {
            path: path.display().to_string(),
        });
    }
    let unreadable = |message: String| TrainerError::UnreadableResult {
        path: path.display().to_string(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| unreadable(e.to_string()))?;
    let headers = reader.headers().map_err(|e| unreadable(e.to_string()))?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| unreadable(format!("no column {name:?}")))
    };
    let precision_at = position(&columns.precision)?;
    let recall_at = position(&columns.recall)?;
    let metric_at = position(&columns.selection_metric)?;

    let mut last = None;
    for record in reader.records() {
        last = Some(record.map_err(|e| unreadable(e.to_string()))?);
    }
    let last = last.ok_or_else(|| unreadable("no data rows".to_string()))?;

    let value = |at: usize, name: &str| -> Result<f64, TrainerError> {
        let raw = last.get(at).unwrap_or("");
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(unreadable(format!("{name} = {raw:?} is not a finite number"))),
        }
    };

    Ok(TrainingMetrics {
        precision: value(precision_at, &columns.precision)?,
        recall: value(recall_at, &columns.recall)?,
        selection_metric: value(metric_at, &columns.selection_metric)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSettings {
    pub command: CommandSpec,
    /// Descriptor file the command leaves in its output directory.
    #[serde(default = "default_descriptor")]
    pub descriptor: String,
}

fn default_descriptor() -> String {
    "data.yaml".to_string()
}

/// Runs `<program> <args...> --size N --positive-ratio R --out DIR`.
#[derive(Debug, Clone)]
pub struct CommandMaterializer {
    settings: DatasetSettings,
}

impl CommandMaterializer {
    pub fn new(settings: DatasetSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DatasetMaterializer for CommandMaterializer {
    async fn materialize(&self, key: DatasetKey, out_dir: &Path) -> HfResult<PathBuf> {
        let failed = |message: String| DataError::DatasetFailed {
            size: key.size,
            positive_ratio: key.positive_ratio,
            message,
        };

        tokio::fs::create_dir_all(out_dir).await?;
        let output = self
            .settings
            .command
            .command()
            .arg("--size")
            .arg(key.size.to_string())
            .arg("--positive-ratio")
            .arg(key.positive_ratio.to_string())
            .arg("--out")
            .arg(out_dir)
            .output()
            .await
            .map_err(|e| {
                failed(format!("cannot launch {}: {}", self.settings.command.program, e))
            })?;

        if !output.status.success() {
            let message = format!("exited with {}: {}", output.status, stderr_tail(&output));
            return Err(failed(message).into());
        }

        let descriptor = out_dir.join(&self.settings.descriptor);
        if !descriptor.exists() {
            return Err(failed(format!("{} was not written", descriptor.display())).into());
        }
        Ok(descriptor)
    }
}

/// Writes only a `dataset.json` descriptor with the key, for trainers that
/// build their own data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorMaterializer;

#[async_trait]
impl DatasetMaterializer for DescriptorMaterializer {
    async fn materialize(&self, key: DatasetKey, out_dir: &Path) -> HfResult<PathBuf> {
        tokio::fs::create_dir_all(out_dir).await?;
        let descriptor = out_dir.join("dataset.json");
        let body = serde_json::json!({
            "size": key.size,
            "positive_ratio": key.positive_ratio,
        });
        tokio::fs::write(&descriptor, serde_json::to_vec_pretty(&body)?).await?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hf_types::ParameterValue;
    use std::fs;
    use tempfile::TempDir;

    const RESULTS: &str = concat!(
        "   epoch,  train/box_loss,  metrics/precision(B),  metrics/recall(B),",
        "  metrics/mAP50(B),  metrics/mAP50-95(B)\n",
        "       1,   1.2,   0.41,   0.33,   0.30,   0.18\n",
        "       2,   1.1,   0.62,   0.58,   0.51,   0.37\n",
    );

    fn request(dir: &TempDir) -> TrainingRequest {
        let mut params = ParameterSet::new();
        params.insert("imgsz".into(), ParameterValue::Int(640));
        params.insert("lr0".into(), ParameterValue::Float(0.01));
        TrainingRequest {
            run_id: 3,
            name: "red-brave-fox".into(),
            model: "yolov8n.pt".into(),
            epochs: 40,
            params,
            dataset: dir.path().join("dataset").join("data.yaml"),
            run_dir: dir.path().join("run_0003_red-brave-fox"),
        }
    }

    #[test]
    fn last_row_wins_and_headers_are_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, RESULTS).unwrap();

        let metrics = read_results(&path, &ResultColumns::default()).unwrap();
        assert_eq!(
            metrics,
            TrainingMetrics {
                precision: 0.62,
                recall: 0.58,
                selection_metric: 0.37
            }
        );
    }

    #[test]
    fn absent_results_are_a_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err =
            read_results(&dir.path().join("nope.csv"), &ResultColumns::default()).unwrap_err();
        assert!(matches!(err, TrainerError::MissingResultArtifact { .. }));
    }

    #[test]
    fn header_only_or_missing_columns_are_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.csv");

        fs::write(&path, "metrics/precision(B),metrics/recall(B),metrics/mAP50-95(B)\n").unwrap();
        let err = read_results(&path, &ResultColumns::default()).unwrap_err();
        assert!(err.is_missing_artifact());

        fs::write(&path, "epoch,metrics/precision(B)\n1,0.5\n").unwrap();
        let err = read_results(&path, &ResultColumns::default()).unwrap_err();
        assert!(matches!(err, TrainerError::UnreadableResult { .. }));

        fs::write(
            &path,
            "metrics/precision(B),metrics/recall(B),metrics/mAP50-95(B)\n0.5,nan,0.2\n",
        )
        .unwrap();
        assert!(read_results(&path, &ResultColumns::default()).is_err());
    }

    #[test]
    fn settings_fill_defaults_from_json() {
        let json = r#"{"command": {"program": "python3", "args": ["train.py"]}}"#;
        let settings: TrainerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.results_file, PathBuf::from("yolo").join("results.csv"));
        assert_eq!(settings.columns, ResultColumns::default());
        assert_eq!(settings.command.args, vec!["train.py".to_string()]);
    }

    #[tokio::test]
    async fn unknown_program_is_a_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let trainer = CommandTrainer::new(TrainerSettings::new(CommandSpec::new(
            "hyperforge-test-no-such-trainer",
        )));
        let err = trainer.train(&request(&dir)).await.unwrap_err();
        assert!(matches!(err, TrainerError::Spawn { .. }));
        assert!(request(&dir).run_dir.join("request.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_trainer_round_trip() {
        let dir = TempDir::new().unwrap();
        let script = format!(
            "mkdir -p yolo && printf '%s' '{}' > yolo/results.csv",
            RESULTS.replace('\'', "")
        );
        let trainer = CommandTrainer::new(TrainerSettings::new(
            CommandSpec::new("sh").with_args(["-c", script.as_str(), "trainer"]),
        ));
        let metrics = trainer.train(&request(&dir)).await.unwrap();
        assert_eq!(metrics.selection_metric, 0.37);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_trainer_is_a_training_failure() {
        let dir = TempDir::new().unwrap();
        let trainer = CommandTrainer::new(TrainerSettings::new(
            CommandSpec::new("sh").with_args(["-c", "echo boom >&2; exit 3", "trainer"]),
        ));
        let err = trainer.train(&request(&dir)).await.unwrap_err();
        match err {
            TrainerError::Failed { message } => assert!(message.contains("boom"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn trainer_exiting_cleanly_without_results_is_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let trainer = CommandTrainer::new(TrainerSettings::new(
            CommandSpec::new("sh").with_args(["-c", "true", "trainer"]),
        ));
        let err = trainer.train(&request(&dir)).await.unwrap_err();
        assert!(matches!(err, TrainerError::MissingResultArtifact { .. }));
    }

    #[tokio::test]
    async fn descriptor_materializer_writes_key() {
        let dir = TempDir::new().unwrap();
        let path = DescriptorMaterializer
            .materialize(DatasetKey::new(800, 0.25), &dir.path().join("dataset"))
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(body["size"], 800);
        assert_eq!(body["positive_ratio"], 0.25);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_materializer_requires_descriptor() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dataset");
        let ok = CommandMaterializer::new(DatasetSettings {
            command: CommandSpec::new("sh").with_args([
                "-c",
                "while [ $# -gt 0 ]; do [ \"$1\" = --out ] && touch \"$2/data.yaml\"; shift; done",
                "materializer",
            ]),
            descriptor: default_descriptor(),
        });
        let path = ok.materialize(DatasetKey::new(300, 0.5), &out).await.unwrap();
        assert_eq!(path, out.join("data.yaml"));

        let silent = CommandMaterializer::new(DatasetSettings {
            command: CommandSpec::new("sh").with_args(["-c", "true", "materializer"]),
            descriptor: "other.yaml".into(),
        });
        assert!(silent.materialize(DatasetKey::new(300, 0.5), &out).await.is_err());
    }
}

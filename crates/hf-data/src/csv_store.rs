//! Tabular ledger: one CSV file rewritten atomically after every upsert.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use hf_types::{
    DataError, EvaluationResult, HfResult, LedgerRow, MutationDetails, ParameterSet,
    ParameterSpace, ParameterSpec, ParameterType, ParameterValue, RunId,
};
use tracing::{debug, warn};

use crate::ledger::LedgerStore;

const FIXED_LEADING: [&str; 7] = [
    "name",
    "model",
    "epochs",
    "run_id",
    "generation",
    "precision",
    "recall",
];
const FIXED_TRAILING: [&str; 6] = [
    "fitness_score",
    "timestamp",
    "parent1_id",
    "parent2_id",
    "mutated",
    "mutation_details",
];

/// True when `name` collides with a column the store writes itself.
pub fn is_reserved_column(name: &str, metric_column: &str) -> bool {
    name == metric_column || FIXED_LEADING.contains(&name) || FIXED_TRAILING.contains(&name)
}

/// Column layout: parameters in space order, the fixed columns, the
/// selection metric under its configured name, then scoring and lineage.
///
/// Records that fail to decode on load are carried along verbatim and
/// written back after the decoded rows on every rewrite.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
    space: ParameterSpace,
    metric_column: String,
    unreadable: Vec<Vec<String>>,
}

impl CsvStore {
    pub fn new(
        path: impl Into<PathBuf>,
        space: ParameterSpace,
        metric_column: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            space,
            metric_column: metric_column.into(),
            unreadable: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records kept from the last load that could not be decoded.
    pub fn unreadable(&self) -> &[Vec<String>] {
        &self.unreadable
    }

    /// Header row written by this store.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.space.names().map(str::to_string).collect();
        columns.extend(FIXED_LEADING.iter().map(|c| c.to_string()));
        columns.push(self.metric_column.clone());
        columns.extend(FIXED_TRAILING.iter().map(|c| c.to_string()));
        columns
    }

    fn encode(&self, row: &LedgerRow) -> HfResult<Vec<String>> {
        let mut record = Vec::with_capacity(self.space.len() + 14);
        for spec in self.space.iter() {
            record.push(
                row.params
                    .get(&spec.name)
                    .map(ParameterValue::to_string)
                    .unwrap_or_default(),
            );
        }
        record.push(row.name.clone());
        record.push(row.model.clone());
        record.push(row.epochs.to_string());
        record.push(row.run_id.to_string());
        record.push(row.generation.to_string());
        record.push(row.result.precision.to_string());
        record.push(row.result.recall.to_string());
        record.push(row.result.selection_metric.to_string());
        record.push(row.result.fitness_score.to_string());
        record.push(row.result.timestamp.to_rfc3339());
        record.push(row.parent1_id.map(|id| id.to_string()).unwrap_or_default());
        record.push(row.parent2_id.map(|id| id.to_string()).unwrap_or_default());
        record.push(row.mutated.to_string());
        record.push(serde_json::to_string(&row.mutation_details)?);
        Ok(record)
    }

    fn decode(
        &self,
        record: &StringRecord,
        index: &HashMap<String, usize>,
    ) -> HfResult<LedgerRow> {
        let mut params = ParameterSet::new();
        for spec in self.space.iter() {
            params.insert(spec.name.clone(), parse_param(spec, cell(record, index, &spec.name))?);
        }

        let mutated = match cell(record, index, "mutated").to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" | "" => false,
            other => {
                return Err(parse_error("mutated", format!("not a boolean: {other}")));
            }
        };
        let details_raw = cell(record, index, "mutation_details");
        let mutation_details: MutationDetails = if details_raw.is_empty() {
            MutationDetails::new()
        } else {
            serde_json::from_str(details_raw)
                .map_err(|e| parse_error("mutation_details", e.to_string()))?
        };

        Ok(LedgerRow {
            run_id: parse_num("run_id", cell(record, index, "run_id"))?,
            generation: parse_num("generation", cell(record, index, "generation"))?,
            name: cell(record, index, "name").to_string(),
            params,
            model: cell(record, index, "model").to_string(),
            epochs: parse_num("epochs", cell(record, index, "epochs"))?,
            result: EvaluationResult {
                precision: parse_num("precision", cell(record, index, "precision"))?,
                recall: parse_num("recall", cell(record, index, "recall"))?,
                selection_metric: parse_num(
                    &self.metric_column,
                    cell(record, index, &self.metric_column),
                )?,
                fitness_score: parse_num("fitness_score", cell(record, index, "fitness_score"))?,
                timestamp: parse_timestamp(cell(record, index, "timestamp"))?,
            },
            parent1_id: parse_optional_id("parent1_id", cell(record, index, "parent1_id"))?,
            parent2_id: parse_optional_id("parent2_id", cell(record, index, "parent2_id"))?,
            mutated,
            mutation_details,
        })
    }

    fn write_all(&self, rows: &[LedgerRow]) -> HfResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = WriterBuilder::new().from_writer(file);
            writer.write_record(self.columns())?;
            for row in rows {
                writer.write_record(self.encode(row)?)?;
            }
            for raw in &self.unreadable {
                writer.write_record(raw)?;
            }
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LedgerStore for CsvStore {
    fn load(&mut self) -> HfResult<Vec<LedgerRow>> {
        if !self.path.exists() {
            debug!("No ledger at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();

        for column in self.columns() {
            if !index.contains_key(&column) {
                return Err(DataError::MissingColumn { column }.into());
            }
        }

        let columns = self.columns();
        let mut rows = Vec::new();
        let mut unreadable: Vec<Vec<String>> = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            match self.decode(&record, &index) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!("Skipping invalid ledger record at line {}: {}", line + 2, e);
                    unreadable.push(
                        columns
                            .iter()
                            .map(|c| cell(&record, &index, c).to_string())
                            .collect(),
                    );
                }
            }
        }
        self.unreadable = unreadable;
        Ok(rows)
    }

    fn persist(&mut self, _row: &LedgerRow, rows: &[LedgerRow]) -> HfResult<()> {
        self.write_all(rows)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn cell<'a>(record: &'a StringRecord, index: &HashMap<String, usize>, column: &str) -> &'a str {
    index
        .get(column)
        .and_then(|&i| record.get(i))
        .map(str::trim)
        .unwrap_or("")
}

fn parse_error(column: &str, message: impl Into<String>) -> hf_types::HfError {
    DataError::ParseError {
        column: column.to_string(),
        message: message.into(),
    }
    .into()
}

fn parse_num<T>(column: &str, raw: &str) -> HfResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| parse_error(column, format!("{raw:?}: {e}")))
}

fn parse_optional_id(column: &str, raw: &str) -> HfResult<Option<RunId>> {
    if raw.is_empty() {
        Ok(None)
    } else {
        parse_num(column, raw).map(Some)
    }
}

fn parse_timestamp(raw: &str) -> HfResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| parse_error("timestamp", format!("{raw:?}: {e}")))
}

fn parse_param(spec: &ParameterSpec, raw: &str) -> HfResult<ParameterValue> {
    match spec.kind {
        ParameterType::Float => parse_num(&spec.name, raw).map(ParameterValue::Float),
        ParameterType::Int => match raw.parse::<i64>() {
            Ok(v) => Ok(ParameterValue::Int(v)),
            // Spreadsheet tools like to write integers as "640.0".
            Err(_) => {
                parse_num::<f64>(&spec.name, raw).map(|v| ParameterValue::Int(v.round() as i64))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::row;
    use crate::ledger::RunLedger;
    use hf_types::RankField;
    use tempfile::TempDir;

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .add_float("lr0", 0.001, 0.1)
            .add_quantized_int("imgsz", 320, 960, 32)
    }

    fn store(dir: &TempDir) -> CsvStore {
        CsvStore::new(dir.path().join("exp").join("summary.csv"), space(), "mAP_50:95")
    }

    #[test]
    fn header_layout() {
        let dir = TempDir::new().unwrap();
        let columns = store(&dir).columns();
        assert_eq!(&columns[..3], &["lr0", "imgsz", "name"]);
        assert_eq!(columns[9], "mAP_50:95");
        assert_eq!(columns.last().map(String::as_str), Some("mutation_details"));
    }

    #[test]
    fn missing_file_is_an_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = RunLedger::open(store(&dir)).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn reopened_ledger_sees_every_upsert() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row(0, 0, 0.31), row(1, 0, 0.42), row(2, 1, 0.55)];
        {
            let mut ledger = RunLedger::open(store(&dir)).unwrap();
            for r in &rows {
                ledger.upsert(r.clone()).unwrap();
            }
        }

        let reopened = RunLedger::open(store(&dir)).unwrap();
        assert_eq!(reopened.all(), rows.as_slice());
        assert_eq!(reopened.best(RankField::SelectionMetric).unwrap().run_id, 2);
        assert!(!dir.path().join("exp").join("summary.csv.tmp").exists());
    }

    #[test]
    fn upsert_rewrites_instead_of_appending() {
        let dir = TempDir::new().unwrap();
        let mut ledger = RunLedger::open(store(&dir)).unwrap();
        let first = row(0, 0, 0.1);
        let mut replacement = first.clone();
        replacement.result.selection_metric = 0.2;
        ledger.upsert(first).unwrap();
        ledger.upsert(replacement.clone()).unwrap();

        let text = fs::read_to_string(store(&dir).path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        let reopened = RunLedger::open(store(&dir)).unwrap();
        assert_eq!(reopened.all(), &[replacement]);
    }

    #[test]
    fn missing_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        fs::create_dir_all(s.path().parent().unwrap()).unwrap();
        fs::write(s.path(), "lr0,imgsz,name\n0.01,640,x\n").unwrap();
        let err = RunLedger::open(s).unwrap_err();
        assert!(err.to_string().contains("Missing ledger column"));
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.persist(&row(0, 0, 0.5), &[row(0, 0, 0.5)]).unwrap();
        let mut text = fs::read_to_string(s.path()).unwrap();
        let bad: Vec<String> = s
            .columns()
            .iter()
            .map(|c| if c == "run_id" { "abc".to_string() } else { "0".to_string() })
            .collect();
        text.push_str(&bad.join(","));
        text.push('\n');
        fs::write(s.path(), text).unwrap();

        let rows = s.load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].run_id, 0);
    }

    #[test]
    fn undecodable_records_survive_a_rewrite() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row(0, 0, 0.31), row(1, 0, 0.42)];
        let mut s = store(&dir);
        s.persist(&rows[1], &rows).unwrap();
        let text = fs::read_to_string(s.path()).unwrap();
        fs::write(s.path(), text.replace(",0.42,", ",,")).unwrap();

        let mut ledger = RunLedger::open(store(&dir)).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.store().unreadable().len(), 1);
        ledger.upsert(row(2, 0, 0.55)).unwrap();

        let text = fs::read_to_string(store(&dir).path()).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("run-1"));

        let reopened = RunLedger::open(store(&dir)).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.store().unreadable().len(), 1);
    }

    #[test]
    fn reserved_columns() {
        assert!(is_reserved_column("epochs", "mAP_50:95"));
        assert!(is_reserved_column("mAP_50:95", "mAP_50:95"));
        assert!(is_reserved_column("mutation_details", "mAP_50:95"));
        assert!(!is_reserved_column("lr0", "mAP_50:95"));
    }

    #[test]
    fn float_formatted_integers_are_accepted() {
        let spec = ParameterSpec::int("imgsz", 320, 960);
        assert_eq!(parse_param(&spec, "640.0").unwrap(), ParameterValue::Int(640));
        let spec = ParameterSpec::float("lr0", 0.0, 1.0);
        assert_eq!(parse_param(&spec, "1").unwrap(), ParameterValue::Float(1.0));
    }
}

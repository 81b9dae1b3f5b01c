//! Durable, upsert-keyed record of every evaluated individual.

use std::collections::HashMap;

use hf_types::{HfResult, LedgerRow, RankField, RunId};
use tracing::{debug, info};

/// Backing storage for a [`RunLedger`].
pub trait LedgerStore: Send {
    /// Every row persisted so far. A key may appear more than once.
    fn load(&mut self) -> HfResult<Vec<LedgerRow>>;

    /// Durably records `row` before returning. `rows` is the complete,
    /// deduplicated ledger including `row`.
    fn persist(&mut self, row: &LedgerRow, rows: &[LedgerRow]) -> HfResult<()>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

impl<T: LedgerStore + ?Sized> LedgerStore for Box<T> {
    fn load(&mut self) -> HfResult<Vec<LedgerRow>> {
        (**self).load()
    }

    fn persist(&mut self, row: &LedgerRow, rows: &[LedgerRow]) -> HfResult<()> {
        (**self).persist(row, rows)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Keeps one row per `(run_id, generation)`: the one with the latest
/// timestamp, the later entry winning ties. Key order follows first
/// appearance.
pub fn dedup_latest<I>(rows: I) -> Vec<LedgerRow>
where
    I: IntoIterator<Item = LedgerRow>,
{
    let mut index: HashMap<(RunId, u32), usize> = HashMap::new();
    let mut kept: Vec<LedgerRow> = Vec::new();
    for row in rows {
        match index.get(&row.key()) {
            Some(&i) => {
                if row.result.timestamp >= kept[i].result.timestamp {
                    kept[i] = row;
                }
            }
            None => {
                index.insert(row.key(), kept.len());
                kept.push(row);
            }
        }
    }
    kept
}

/// In-memory view of the ledger with write-through persistence.
#[derive(Debug)]
pub struct RunLedger<S> {
    store: S,
    rows: Vec<LedgerRow>,
}

impl<S: LedgerStore> RunLedger<S> {
    /// Loads whatever the store already holds.
    pub fn open(mut store: S) -> HfResult<Self> {
        let raw = store.load()?;
        let raw_len = raw.len();
        let rows = dedup_latest(raw);
        info!(
            "Opened ledger {} with {} rows ({} raw entries)",
            store.describe(),
            rows.len(),
            raw_len
        );
        Ok(Self { store, rows })
    }

    /// Replaces the row with the same `(run_id, generation)` or appends it,
    /// then persists immediately. A row older than the stored one for its key
    /// is ignored, the same rule `open` applies to raw entries.
    pub fn upsert(&mut self, row: LedgerRow) -> HfResult<()> {
        let position = self.rows.iter().position(|r| r.key() == row.key());
        let index = match position {
            Some(i) if row.result.timestamp < self.rows[i].result.timestamp => {
                debug!("Ignoring stale ledger row {:?}", row.key());
                return Ok(());
            }
            Some(i) => {
                debug!("Replacing ledger row {:?}", row.key());
                self.rows[i] = row;
                i
            }
            None => {
                self.rows.push(row);
                self.rows.len() - 1
            }
        };
        self.store.persist(&self.rows[index], &self.rows)
    }

    /// Row with the highest `field` across all generations; ties go to the
    /// lowest run id. NaN values never win.
    pub fn best(&self, field: RankField) -> Option<&LedgerRow> {
        self.rows
            .iter()
            .filter(|r| !r.field(field).is_nan())
            .min_by(|a, b| {
                b.field(field)
                    .total_cmp(&a.field(field))
                    .then(a.run_id.cmp(&b.run_id))
            })
    }

    /// Full deduplicated row set.
    pub fn all(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn get(&self, run_id: RunId, generation: u32) -> Option<&LedgerRow> {
        self.rows.iter().find(|r| r.key() == (run_id, generation))
    }

    pub fn max_run_id(&self) -> Option<RunId> {
        self.rows.iter().map(|r| r.run_id).max()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Volatile store; keeps every raw write for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    writes: Vec<LedgerRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<LedgerRow>) -> Self {
        Self { writes: rows }
    }

    pub fn writes(&self) -> &[LedgerRow] {
        &self.writes
    }
}

impl LedgerStore for MemoryStore {
    fn load(&mut self) -> HfResult<Vec<LedgerRow>> {
        Ok(self.writes.clone())
    }

    fn persist(&mut self, row: &LedgerRow, _rows: &[LedgerRow]) -> HfResult<()> {
        self.writes.push(row.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use hf_types::{
        EvaluationResult, FixedParams, Individual, Lineage, MutationDetails, MutationRecord,
        ParameterSet, ParameterValue, Trial,
    };

    pub(crate) fn row(run_id: RunId, generation: u32, metric: f64) -> LedgerRow {
        let mut params = ParameterSet::new();
        params.insert("lr0".into(), ParameterValue::Float(0.01 + run_id as f64 / 1000.0));
        params.insert("imgsz".into(), ParameterValue::Int(640));
        let individual = if generation == 0 {
            Individual::founder(format!("run-{run_id}"), params)
        } else {
            let mut details = MutationDetails::new();
            details.insert(
                "imgsz".into(),
                MutationRecord {
                    before: ParameterValue::Int(608),
                    after: ParameterValue::Int(640),
                },
            );
            Individual::offspring(
                generation,
                format!("run-{run_id}"),
                params,
                Lineage {
                    parent1_id: 0,
                    parent2_id: 1,
                },
                details,
            )
        };
        LedgerRow::new(
            &Trial::new(run_id, individual),
            &FixedParams::default(),
            EvaluationResult {
                precision: 0.6,
                recall: 0.5,
                selection_metric: metric,
                fitness_score: metric / 2.0,
                timestamp: Utc::now(),
            },
        )
    }

    #[test]
    fn upsert_appends_and_persists_each_write() {
        let mut ledger = RunLedger::open(MemoryStore::new()).unwrap();
        ledger.upsert(row(0, 0, 0.3)).unwrap();
        ledger.upsert(row(1, 0, 0.4)).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.store().writes().len(), 2);
        assert_eq!(ledger.max_run_id(), Some(1));
    }

    #[test]
    fn upsert_is_idempotent_per_key() {
        let mut ledger = RunLedger::open(MemoryStore::new()).unwrap();
        let first = row(3, 1, 0.3);
        let mut second = first.clone();
        second.result.selection_metric = 0.9;
        second.result.timestamp = first.result.timestamp + Duration::seconds(5);

        ledger.upsert(first).unwrap();
        ledger.upsert(second.clone()).unwrap();
        ledger.upsert(second.clone()).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(3, 1), Some(&second));
        assert_eq!(ledger.store().writes().len(), 3);
    }

    #[test]
    fn stale_upsert_keeps_the_newer_row() {
        let newer = row(8, 1, 0.9);
        let mut older = newer.clone();
        older.result.selection_metric = 0.1;
        older.result.timestamp = newer.result.timestamp - Duration::seconds(30);

        let mut ledger = RunLedger::open(MemoryStore::new()).unwrap();
        ledger.upsert(newer.clone()).unwrap();
        ledger.upsert(older).unwrap();

        assert_eq!(ledger.get(8, 1), Some(&newer));
        assert_eq!(ledger.store().writes().len(), 1);
        let reopened = RunLedger::open(ledger.store().clone()).unwrap();
        assert_eq!(reopened.all(), ledger.all());
    }

    #[test]
    fn open_keeps_latest_timestamp_per_key() {
        let older = row(5, 2, 0.1);
        let mut newer = older.clone();
        newer.result.selection_metric = 0.7;
        newer.result.timestamp = older.result.timestamp + Duration::minutes(1);
        let other = row(6, 2, 0.2);

        // Newest entry written first, stale one after it.
        let store = MemoryStore::with_rows(vec![newer.clone(), other.clone(), older]);
        let ledger = RunLedger::open(store).unwrap();

        assert_eq!(ledger.all(), &[newer, other]);
    }

    #[test]
    fn same_run_id_in_different_generations_are_distinct_keys() {
        let mut ledger = RunLedger::open(MemoryStore::new()).unwrap();
        ledger.upsert(row(4, 0, 0.1)).unwrap();
        ledger.upsert(row(4, 1, 0.2)).unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn best_breaks_ties_by_lowest_run_id() {
        let mut ledger = RunLedger::open(MemoryStore::new()).unwrap();
        ledger.upsert(row(7, 1, 0.8)).unwrap();
        ledger.upsert(row(2, 0, 0.8)).unwrap();
        ledger.upsert(row(9, 2, 0.5)).unwrap();
        ledger.upsert(row(1, 0, f64::NAN)).unwrap();

        let best = ledger.best(RankField::SelectionMetric).unwrap();
        assert_eq!(best.run_id, 2);

        let best_fitness = ledger.best(RankField::FitnessScore).unwrap();
        assert_eq!(best_fitness.run_id, 2);
    }

    #[test]
    fn best_of_empty_ledger_is_none() {
        let ledger = RunLedger::open(MemoryStore::new()).unwrap();
        assert!(ledger.best(RankField::SelectionMetric).is_none());
        assert!(ledger.is_empty());
    }
}

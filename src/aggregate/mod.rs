pub mod tables;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub use tables::{write_metric_table, write_tidy_table, TableRow, TidyRow};

use crate::datasets::DatasetFamily;
use crate::error::{IoContext, StageResult};
use crate::evaluation::{MetricKind, MetricResult, ResultKey};
use crate::preprocess::VariantKind;

/// `(variant - baseline) / baseline`; `None` unless the baseline is positive and finite.
pub fn relative_change(variant_rmse: f64, baseline_rmse: f64) -> Option<f64> {
    if !(baseline_rmse.is_finite() && baseline_rmse > 0.0) || !variant_rmse.is_finite() {
        return None;
    }
    Some((variant_rmse - baseline_rmse) / baseline_rmse)
}

/// Results keyed by (family, sequence, variant, metric).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateTable {
    entries: BTreeMap<ResultKey, MetricResult>,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing any earlier result with the same key.
    pub fn insert(&mut self, result: MetricResult) {
        self.entries.insert(result.key(), result);
    }

    pub fn merge(&mut self, results: impl IntoIterator<Item = MetricResult>) {
        for result in results {
            self.insert(result);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ResultKey) -> Option<&MetricResult> {
        self.entries.get(key)
    }

    pub fn results(&self) -> impl Iterator<Item = &MetricResult> {
        self.entries.values()
    }

    pub fn sequences(&self) -> BTreeSet<(DatasetFamily, String)> {
        self.entries.keys().map(|k| (k.family, k.sequence.clone())).collect()
    }

    /// Rows of one sequence and metric.
    pub fn rows_for(&self, family: DatasetFamily, sequence: &str, metric: MetricKind) -> Vec<&MetricResult> {
        self.entries
            .values()
            .filter(|r| r.family == family && r.sequence == sequence && r.metric == metric)
            .collect()
    }

    /// Relative rmse change of `key` against the baseline of the same sequence
    /// and metric. `None` for the baseline itself or when no usable baseline exists.
    pub fn relative_change(&self, key: &ResultKey) -> Option<f64> {
        if key.variant == VariantKind::Baseline {
            return None;
        }
        let result = self.entries.get(key)?;
        let baseline = self.entries.get(&ResultKey {
            family: key.family,
            sequence: key.sequence.clone(),
            variant: VariantKind::Baseline,
            metric: key.metric,
        })?;
        relative_change(result.stats.rmse, baseline.stats.rmse)
    }

    /// Split into one table per sequence.
    pub fn per_sequence(&self) -> BTreeMap<(DatasetFamily, String), AggregateTable> {
        let mut out: BTreeMap<(DatasetFamily, String), AggregateTable> = BTreeMap::new();
        for result in self.entries.values() {
            out.entry((result.family, result.sequence.clone())).or_default().insert(result.clone());
        }
        out
    }

    /// One global table per metric kind, rows ordered by (sequence, variant).
    pub fn by_metric(&self) -> BTreeMap<MetricKind, Vec<TableRow>> {
        let mut out: BTreeMap<MetricKind, Vec<TableRow>> = BTreeMap::new();
        for (key, result) in &self.entries {
            out.entry(key.metric)
                .or_default()
                .push(TableRow::new(result, self.relative_change(key)));
        }
        out
    }

    /// Long-format rows, one per (sequence, variant, metric).
    pub fn tidy(&self) -> Vec<TidyRow> {
        self.entries.values().map(TidyRow::from).collect()
    }
}

/// Every `.json` file below `dir`, at any depth.
fn collect_json(dir: &Path, files: &mut Vec<PathBuf>) -> StageResult<()> {
    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();
        if path.is_dir() {
            collect_json(&path, files)?;
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(())
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Merge `results` in order; later results win on equal keys.
    pub fn aggregate(results: impl IntoIterator<Item = MetricResult>) -> AggregateTable {
        let mut table = AggregateTable::new();
        table.merge(results);
        table
    }

    /// Flatten per-sequence tables into one global table.
    pub fn combine(tables: impl IntoIterator<Item = AggregateTable>) -> AggregateTable {
        let mut global = AggregateTable::new();
        for table in tables {
            global.merge(table.entries.into_values());
        }
        global
    }

    /// Read every stored result below `metrics_dir`. Unreadable files are skipped.
    pub fn load_results(metrics_dir: &Path) -> StageResult<Vec<MetricResult>> {
        let mut results = Vec::new();
        if !metrics_dir.is_dir() {
            return Ok(results);
        }

        let mut files = Vec::new();
        collect_json(metrics_dir, &mut files)?;
        files.sort();

        for path in files {
            let text = fs::read_to_string(&path).at_path(&path)?;
            match serde_json::from_str::<MetricResult>(&text) {
                Ok(result) => results.push(result),
                Err(e) => log::warn!("[Aggregator] Ignoring unreadable result {}: {}", path.display(), e),
            }
        }
        Ok(results)
    }

    /// Write `<metric>_table.csv` for every metric and `tidy.csv` into `tables_dir`.
    pub fn write_tables(table: &AggregateTable, tables_dir: &Path) -> StageResult<Vec<PathBuf>> {
        fs::create_dir_all(tables_dir).at_path(tables_dir)?;
        let mut written = Vec::new();

        let mut by_metric = table.by_metric();
        for metric in MetricKind::ALL {
            let rows = by_metric.remove(&metric).unwrap_or_default();
            let path = tables_dir.join(format!("{}_table.csv", metric));
            write_metric_table(&path, &rows)?;
            written.push(path);
        }

        let tidy = tables_dir.join("tidy.csv");
        write_tidy_table(&tidy, &table.tidy())?;
        written.push(tidy);

        log::info!(
            "[Aggregator] Wrote {} tables ({} results, {} sequences) to {}",
            written.len(),
            table.len(),
            table.sequences().len(),
            tables_dir.display()
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;
    use trajectory_eval::ErrorStatistics;

    fn result(sequence: &str, variant: VariantKind, metric: MetricKind, rmse: f64) -> MetricResult {
        family_result(DatasetFamily::Tum, sequence, variant, metric, rmse)
    }

    fn family_result(
        family: DatasetFamily,
        sequence: &str,
        variant: VariantKind,
        metric: MetricKind,
        rmse: f64,
    ) -> MetricResult {
        MetricResult {
            family,
            sequence: sequence.to_string(),
            variant,
            metric,
            stats: ErrorStatistics { rmse, mean: rmse, count: 10, ..Default::default() },
            association_fraction: 1.0,
            source_id: "native".to_string(),
        }
    }

    fn sample() -> Vec<MetricResult> {
        vec![
            result("seqA", VariantKind::Baseline, MetricKind::Drift, 1.0),
            result("seqA", VariantKind::Clahe, MetricKind::Drift, 0.9),
            result("seqA", VariantKind::Clahe, MetricKind::LocalConsistency, 0.2),
            result("seqB", VariantKind::Mertens, MetricKind::Drift, 0.5),
        ]
    }

    #[test]
    fn test_relative_change() {
        assert_abs_diff_eq!(relative_change(0.9, 1.0).unwrap(), -0.1, epsilon = 1e-12);
        assert_eq!(relative_change(0.9, 0.0), None);
        assert_eq!(relative_change(f64::NAN, 1.0), None);
    }

    #[test]
    fn test_aggregate_is_commutative_and_idempotent() {
        let forward = ResultAggregator::aggregate(sample());
        let reversed = ResultAggregator::aggregate(sample().into_iter().rev());
        assert_eq!(forward, reversed);

        let mut twice = forward.clone();
        twice.merge(sample());
        assert_eq!(twice, forward);
        assert_eq!(forward.len(), 4);
    }

    #[test]
    fn test_last_write_wins() {
        let mut results = sample();
        results.push(result("seqA", VariantKind::Clahe, MetricKind::Drift, 0.7));
        let table = ResultAggregator::aggregate(results);
        let key = ResultKey {
            family: DatasetFamily::Tum,
            sequence: "seqA".into(),
            variant: VariantKind::Clahe,
            metric: MetricKind::Drift,
        };
        assert_eq!(table.get(&key).unwrap().stats.rmse, 0.7);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_relative_change_against_baseline() {
        let table = ResultAggregator::aggregate(sample());
        let clahe = ResultKey {
            family: DatasetFamily::Tum,
            sequence: "seqA".into(),
            variant: VariantKind::Clahe,
            metric: MetricKind::Drift,
        };
        assert_abs_diff_eq!(table.relative_change(&clahe).unwrap(), -0.1, epsilon = 1e-12);

        let baseline = ResultKey { variant: VariantKind::Baseline, ..clahe.clone() };
        assert_eq!(table.relative_change(&baseline), None);

        // No baseline for this metric or sequence.
        let rpe = ResultKey { metric: MetricKind::LocalConsistency, ..clahe };
        assert_eq!(table.relative_change(&rpe), None);
        let mertens = ResultKey {
            family: DatasetFamily::Tum,
            sequence: "seqB".into(),
            variant: VariantKind::Mertens,
            metric: MetricKind::Drift,
        };
        assert_eq!(table.relative_change(&mertens), None);
    }

    #[test]
    fn test_same_sequence_name_in_two_families_stays_apart() {
        let table = ResultAggregator::aggregate(vec![
            family_result(DatasetFamily::Tum, "seq01", VariantKind::Baseline, MetricKind::Drift, 1.0),
            family_result(DatasetFamily::Euroc, "seq01", VariantKind::Baseline, MetricKind::Drift, 4.0),
            family_result(DatasetFamily::Euroc, "seq01", VariantKind::Clahe, MetricKind::Drift, 2.0),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.sequences().len(), 2);
        assert_eq!(table.rows_for(DatasetFamily::Tum, "seq01", MetricKind::Drift).len(), 1);

        let clahe = ResultKey {
            family: DatasetFamily::Euroc,
            sequence: "seq01".into(),
            variant: VariantKind::Clahe,
            metric: MetricKind::Drift,
        };
        assert_abs_diff_eq!(table.relative_change(&clahe).unwrap(), -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_per_sequence_tables_recombine() {
        let table = ResultAggregator::aggregate(sample());
        let parts = table.per_sequence();
        assert_eq!(parts.len(), 2);
        assert_eq!(ResultAggregator::combine(parts.into_values()), table);

        let by_metric = table.by_metric();
        assert_eq!(by_metric[&MetricKind::Drift].len(), 3);
        assert_eq!(by_metric[&MetricKind::LocalConsistency].len(), 1);
    }

    #[test]
    fn test_load_results_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let seq = dir.path().join("tum/seqA");
        fs::create_dir_all(&seq).unwrap();
        let r = result("seqA", VariantKind::Clahe, MetricKind::Drift, 0.9);
        fs::write(seq.join("clahe.drift.json"), serde_json::to_string(&r).unwrap()).unwrap();
        fs::write(seq.join("broken.drift.json"), "{").unwrap();
        fs::write(seq.join("clahe.drift.zip"), "zip").unwrap();

        let loaded = ResultAggregator::load_results(dir.path()).unwrap();
        assert_eq!(loaded, vec![r]);
        assert!(ResultAggregator::load_results(&dir.path().join("none")).unwrap().is_empty());
    }
}

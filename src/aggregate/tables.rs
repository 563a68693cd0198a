//! CSV rendering of the aggregate tables.

use std::path::Path;

use crate::datasets::DatasetFamily;
use crate::error::{IoContext, StageResult};
use crate::evaluation::{MetricKind, MetricResult};
use crate::preprocess::VariantKind;

const METRIC_HEADER: [&str; 13] = [
    "family", "sequence", "variant", "metric", "rmse", "mean", "median", "std", "min", "max", "sse", "name",
    "rel_change",
];
const TIDY_HEADER: [&str; 12] = [
    "family", "sequence", "variant", "metric", "rmse", "mean", "median", "std", "min", "max", "sse", "source_id",
];

/// Row of a per-metric table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub result: MetricResult,
    pub relative_change: Option<f64>,
}

impl TableRow {
    pub fn new(result: &MetricResult, relative_change: Option<f64>) -> Self {
        TableRow { result: result.clone(), relative_change }
    }

    /// Display name, `<sequence>/<variant>`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.result.sequence, self.result.variant)
    }
}

/// Row of the long-format table.
#[derive(Debug, Clone, PartialEq)]
pub struct TidyRow {
    pub family: DatasetFamily,
    pub sequence: String,
    pub variant: VariantKind,
    pub metric: MetricKind,
    pub rmse: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub sse: f64,
    pub source_id: String,
}

impl From<&MetricResult> for TidyRow {
    fn from(r: &MetricResult) -> Self {
        TidyRow {
            family: r.family,
            sequence: r.sequence.clone(),
            variant: r.variant,
            metric: r.metric,
            rmse: r.stats.rmse,
            mean: r.stats.mean,
            median: r.stats.median,
            std: r.stats.std,
            min: r.stats.min,
            max: r.stats.max,
            sse: r.stats.sse,
            source_id: r.source_id.clone(),
        }
    }
}

fn number(v: f64) -> String {
    format!("{:.6}", v)
}

pub fn write_metric_table(path: &Path, rows: &[TableRow]) -> StageResult<()> {
    let mut writer = csv::Writer::from_path(path).at_path(path)?;
    writer.write_record(METRIC_HEADER).at_path(path)?;
    for row in rows {
        let r = &row.result;
        let s = &r.stats;
        writer
            .write_record([
                r.family.to_string(),
                r.sequence.clone(),
                r.variant.to_string(),
                r.metric.to_string(),
                number(s.rmse),
                number(s.mean),
                number(s.median),
                number(s.std),
                number(s.min),
                number(s.max),
                number(s.sse),
                row.name(),
                row.relative_change.map(number).unwrap_or_default(),
            ])
            .at_path(path)?;
    }
    writer.flush().at_path(path)?;
    Ok(())
}

pub fn write_tidy_table(path: &Path, rows: &[TidyRow]) -> StageResult<()> {
    let mut writer = csv::Writer::from_path(path).at_path(path)?;
    writer.write_record(TIDY_HEADER).at_path(path)?;
    for row in rows {
        writer
            .write_record([
                row.family.to_string(),
                row.sequence.clone(),
                row.variant.to_string(),
                row.metric.to_string(),
                number(row.rmse),
                number(row.mean),
                number(row.median),
                number(row.std),
                number(row.min),
                number(row.max),
                number(row.sse),
                row.source_id.clone(),
            ])
            .at_path(path)?;
    }
    writer.flush().at_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use trajectory_eval::ErrorStatistics;

    fn result(variant: VariantKind, rmse: f64) -> MetricResult {
        MetricResult {
            family: DatasetFamily::Tum,
            sequence: "seqA".to_string(),
            variant,
            metric: MetricKind::Drift,
            stats: ErrorStatistics { rmse, ..Default::default() },
            association_fraction: 0.98,
            source_id: "/results/metrics/tum/seqA/x,y.zip".to_string(),
        }
    }

    #[test]
    fn test_metric_table_leaves_undefined_change_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drift_table.csv");
        let rows = vec![
            TableRow::new(&result(VariantKind::Baseline, 1.0), None),
            TableRow::new(&result(VariantKind::Clahe, 0.9), Some(-0.1)),
        ];
        write_metric_table(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], METRIC_HEADER.join(","));
        assert!(lines[1].starts_with("tum,seqA,baseline,drift,1.000000,"));
        assert!(lines[1].ends_with(",seqA/baseline,"));
        assert!(lines[2].ends_with(",seqA/clahe,-0.100000"));
    }

    #[test]
    fn test_tidy_table_reads_back_with_quoted_source_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tidy.csv");
        write_tidy_table(&path, &[TidyRow::from(&result(VariantKind::Reinhard, 0.5))]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with(",\"/results/metrics/tum/seqA/x,y.zip\""));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), TIDY_HEADER.to_vec());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][2], "reinhard");
        assert_eq!(&rows[0][4], "0.500000");
        assert_eq!(&rows[0][11], "/results/metrics/tum/seqA/x,y.zip");
    }
}

pub mod backend;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use trajectory_eval::io::read_canonical;
use trajectory_eval::{associate, ErrorStatistics};

pub use backend::{BackendOutput, CommandBackend, EvaluationParams, MetricBackend, MetricRequest, NativeBackend};

use crate::datasets::DatasetFamily;
use crate::error::{IoContext, StageError, StageResult};
use crate::preprocess::VariantKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Absolute pose error after alignment (APE).
    Drift,
    /// Relative pose error over a fixed pose-count step (RPE).
    LocalConsistency,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Drift, MetricKind::LocalConsistency];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Drift => "drift",
            MetricKind::LocalConsistency => "local_consistency",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drift" | "ape" => Ok(MetricKind::Drift),
            "local_consistency" | "rpe" => Ok(MetricKind::LocalConsistency),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

/// Key of a result in the aggregate tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey {
    pub family: DatasetFamily,
    pub sequence: String,
    pub variant: VariantKind,
    pub metric: MetricKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub family: DatasetFamily,
    pub sequence: String,
    pub variant: VariantKind,
    pub metric: MetricKind,
    pub stats: ErrorStatistics,
    /// Fraction of estimate poses associated with a ground-truth pose.
    pub association_fraction: f64,
    pub source_id: String,
}

impl MetricResult {
    pub fn key(&self) -> ResultKey {
        ResultKey { family: self.family, sequence: self.sequence.clone(), variant: self.variant, metric: self.metric }
    }
}

/// `<metrics>/<family>/<sequence>/<variant>.<metric>.json`
pub fn result_path(
    metrics_dir: &Path,
    family: DatasetFamily,
    sequence: &str,
    variant: VariantKind,
    metric: MetricKind,
) -> PathBuf {
    metrics_dir
        .join(family.name())
        .join(sequence)
        .join(format!("{}.{}.json", variant, metric))
}

pub struct MetricEvaluator<'a> {
    backend: &'a dyn MetricBackend,
    params: EvaluationParams,
    metrics_dir: PathBuf,
}

impl<'a> MetricEvaluator<'a> {
    pub fn new(backend: &'a dyn MetricBackend, params: EvaluationParams, metrics_dir: impl Into<PathBuf>) -> Self {
        MetricEvaluator { backend, params, metrics_dir: metrics_dir.into() }
    }

    pub fn params(&self) -> &EvaluationParams {
        &self.params
    }

    pub fn metrics_dir(&self) -> &Path {
        &self.metrics_dir
    }

    /// Compute `kind` for an estimate against its ground truth.
    ///
    /// `Ok(None)` means not enough data: a missing input file, an empty
    /// trajectory, no time-associated pair, or too few pairs for the metric.
    pub fn evaluate(
        &self,
        family: DatasetFamily,
        sequence: &str,
        variant: VariantKind,
        ground_truth: &Path,
        estimate: &Path,
        kind: MetricKind,
    ) -> StageResult<Option<MetricResult>> {
        if !ground_truth.is_file() || !estimate.is_file() {
            return Ok(None);
        }
        let gt = read_canonical(ground_truth).map_err(|e| StageError::skip(format!("{:#}", e)))?;
        let est = read_canonical(estimate).map_err(|e| StageError::skip(format!("{:#}", e)))?;
        if gt.is_empty() || est.is_empty() {
            return Ok(None);
        }

        let association = associate(&est, &gt, self.params.t_max_diff);
        if association.is_empty() {
            log::warn!(
                "[Evaluator] {}/{}: no pose pair within {} s",
                sequence,
                variant,
                self.params.t_max_diff
            );
            return Ok(None);
        }

        let request = MetricRequest {
            kind,
            ground_truth_path: ground_truth,
            estimate_path: estimate,
            ground_truth: &gt,
            estimate: &est,
            association: &association,
            params: &self.params,
            archive_path: result_path(&self.metrics_dir, family, sequence, variant, kind).with_extension("zip"),
        };

        let Some(output) = self.backend.compute(&request)? else {
            return Ok(None);
        };

        log::info!(
            "[Evaluator] {}/{} {}: {} ({} pairs, {:.1}% associated)",
            sequence,
            variant,
            kind,
            output.stats.summary(),
            association.len(),
            association.fraction() * 100.0
        );

        Ok(Some(MetricResult {
            family,
            sequence: sequence.to_string(),
            variant,
            metric: kind,
            stats: output.stats,
            association_fraction: association.fraction(),
            source_id: output.source_id,
        }))
    }

    /// Persist `result` as JSON next to the other results of its sequence.
    ///
    /// Written to a `.partial` sibling first, so an interrupted batch never
    /// leaves a truncated result behind.
    pub fn store(&self, result: &MetricResult) -> StageResult<PathBuf> {
        let path = result_path(&self.metrics_dir, result.family, &result.sequence, result.variant, result.metric);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| StageError::skip(format!("cannot serialize result: {}", e)))?;
        let partial = path.with_extension("json.partial");
        fs::write(&partial, json).at_path(&partial)?;
        fs::rename(&partial, &path).at_path(&path)?;
        Ok(path)
    }
}

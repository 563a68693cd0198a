use std::path::{Path, PathBuf};
use std::process::Command;

use trajectory_eval::{drift_errors, local_consistency_errors, Association, ErrorStatistics, Trajectory};

use crate::error::{IoContext, StageError, StageResult};
use crate::evaluation::MetricKind;

/// Parameters handed to every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationParams {
    /// Maximum timestamp difference for time association, seconds.
    pub t_max_diff: f64,
    /// Pose-count step of the local-consistency metric.
    pub delta: usize,
    /// Similarity (Sim(3)) alignment before computing errors.
    pub align: bool,
}

impl Default for EvaluationParams {
    fn default() -> Self {
        EvaluationParams { t_max_diff: 0.01, delta: 5, align: true }
    }
}

pub struct MetricRequest<'a> {
    pub kind: MetricKind,
    pub ground_truth_path: &'a Path,
    pub estimate_path: &'a Path,
    pub ground_truth: &'a Trajectory,
    pub estimate: &'a Trajectory,
    pub association: &'a Association,
    pub params: &'a EvaluationParams,
    /// Where a backend may store its own result archive.
    pub archive_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendOutput {
    pub stats: ErrorStatistics,
    /// Provenance of the numbers: `native` or the evaluator's archive.
    pub source_id: String,
}

/// Computes error statistics for one metric of one unit.
pub trait MetricBackend {
    fn name(&self) -> &str;

    fn preflight(&self) -> StageResult<()> {
        Ok(())
    }

    /// `Ok(None)` when there is not enough data for the metric.
    fn compute(&self, request: &MetricRequest<'_>) -> StageResult<Option<BackendOutput>>;
}

/// In-process Umeyama alignment and translation errors.
pub struct NativeBackend;

impl MetricBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn compute(&self, request: &MetricRequest<'_>) -> StageResult<Option<BackendOutput>> {
        let errors = match request.kind {
            MetricKind::Drift => {
                drift_errors(request.ground_truth, request.estimate, request.association, request.params.align)
            }
            MetricKind::LocalConsistency => local_consistency_errors(
                request.ground_truth,
                request.estimate,
                request.association,
                request.params.delta,
                request.params.align,
            ),
        };
        Ok(errors
            .and_then(|e| ErrorStatistics::from_errors(&e))
            .map(|stats| BackendOutput { stats, source_id: "native".to_string() }))
    }
}

/// Runs the evo command line tools and reads the statistics they print.
pub struct CommandBackend {
    ape_program: String,
    rpe_program: String,
}

impl CommandBackend {
    pub fn new(ape_program: impl Into<String>, rpe_program: impl Into<String>) -> Self {
        CommandBackend { ape_program: ape_program.into(), rpe_program: rpe_program.into() }
    }

    fn program(&self, kind: MetricKind) -> &str {
        match kind {
            MetricKind::Drift => &self.ape_program,
            MetricKind::LocalConsistency => &self.rpe_program,
        }
    }

    pub fn command_args(&self, request: &MetricRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "tum".to_string(),
            request.ground_truth_path.display().to_string(),
            request.estimate_path.display().to_string(),
            "--pose_relation".to_string(),
            "trans_part".to_string(),
            "--t_max_diff".to_string(),
            request.params.t_max_diff.to_string(),
        ];
        if request.params.align {
            args.push("-as".to_string());
        }
        if request.kind == MetricKind::LocalConsistency {
            args.extend([
                "--delta".to_string(),
                request.params.delta.to_string(),
                "--delta_unit".to_string(),
                "f".to_string(),
                "--all_pairs".to_string(),
            ]);
        }
        args.extend([
            "--save_results".to_string(),
            request.archive_path.display().to_string(),
            "--no_warnings".to_string(),
        ]);
        args
    }
}

impl MetricBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn preflight(&self) -> StageResult<()> {
        for program in [&self.ape_program, &self.rpe_program] {
            if let Err(e) = Command::new(program).arg("--help").output() {
                return Err(StageError::fatal(format!("evaluator '{}' cannot be started: {}", program, e)));
            }
        }
        Ok(())
    }

    fn compute(&self, request: &MetricRequest<'_>) -> StageResult<Option<BackendOutput>> {
        if let Some(parent) = request.archive_path.parent() {
            std::fs::create_dir_all(parent).at_path(parent)?;
        }
        // evo refuses to replace an existing archive without prompting.
        if request.archive_path.exists() {
            std::fs::remove_file(&request.archive_path).at_path(&request.archive_path)?;
        }

        let program = self.program(request.kind);
        let args = self.command_args(request);
        log::debug!("[Evaluator] {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|e| StageError::skip(format!("cannot start {}: {}", program, e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
            return Err(StageError::skip(format!("{} exited with {}: {}", program, output.status, last.trim())));
        }

        let Some(stats) = parse_statistics(&stdout) else {
            return Err(StageError::skip(format!("{} printed no statistics", program)));
        };
        Ok(Some(BackendOutput { stats, source_id: request.archive_path.display().to_string() }))
    }
}

/// Read the `name<TAB>value` statistics block evo prints.
pub fn parse_statistics(text: &str) -> Option<ErrorStatistics> {
    let mut stats = ErrorStatistics::default();
    let mut seen = 0u8;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        let slot = match key {
            "max" => &mut stats.max,
            "mean" => &mut stats.mean,
            "median" => &mut stats.median,
            "min" => &mut stats.min,
            "rmse" => &mut stats.rmse,
            "sse" => &mut stats.sse,
            "std" => &mut stats.std,
            _ => continue,
        };
        *slot = value;
        seen += 1;
    }
    if seen < 7 {
        return None;
    }
    if stats.rmse > 0.0 {
        stats.count = (stats.sse / (stats.rmse * stats.rmse)).round() as usize;
    }
    Some(stats)
}

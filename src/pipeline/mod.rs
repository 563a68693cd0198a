pub mod audit;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use trajectory_eval::parse::SourceLayout;

pub use audit::{AuditEntry, AuditLog, AuditTag};

use crate::aggregate::{AggregateTable, ResultAggregator};
use crate::config::{BackendKind, Config, ResultsLayout};
use crate::datasets::{GroundTruthExtractor, Sequence, SequenceCatalog};
use crate::error::{StageError, StageResult};
use crate::evaluation::{
    result_path, CommandBackend, EvaluationParams, MetricBackend, MetricEvaluator, MetricKind, NativeBackend,
};
use crate::normalizer::TrajectoryNormalizer;
use crate::preprocess::{FrameTransform, ScriptTransform, Variant, VariantKind, VariantPreprocessor};
use crate::runner::{retry, ProcessEngine, RetryPolicy, VoEngine, VoRunner};

/// The external tools a batch drives.
pub struct Collaborators {
    pub engine: Box<dyn VoEngine>,
    pub transform: Box<dyn FrameTransform>,
    pub backend: Box<dyn MetricBackend>,
    pub retry: Box<dyn RetryPolicy>,
}

impl Collaborators {
    /// Process-based collaborators described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let results = config.results();
        let backend: Box<dyn MetricBackend> = match config.evaluation.backend {
            BackendKind::Native => Box::new(NativeBackend),
            BackendKind::Command => Box::new(CommandBackend::new(
                config.evaluation.ape_command.clone(),
                config.evaluation.rpe_command.clone(),
            )),
        };
        Collaborators {
            engine: Box::new(ProcessEngine::new(&config.engine, results.engine_logs())),
            transform: Box::new(ScriptTransform::new(
                config.preprocess.interpreter.clone(),
                config.preprocess.scripts_dir.clone(),
            )),
            backend,
            retry: retry::policy_for(config.engine.retry_on_missing_artifact),
        }
    }
}

/// Counters and final table of a finished batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub sequences: usize,
    pub units: usize,
    pub captured: usize,
    pub tolerated_failures: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub missing: usize,
    pub disabled_variants: Vec<VariantKind>,
    pub table: AggregateTable,
    pub tables: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// What one unit wrote into the results tree during this batch.
#[derive(Debug, Default)]
struct UnitOutcome {
    captured: bool,
    normalized: bool,
    metrics: Vec<MetricKind>,
}

/// Stage objects shared by every unit of a batch.
struct Stages<'a> {
    results: ResultsLayout,
    preprocessor: VariantPreprocessor<'a>,
    runner: VoRunner<'a>,
    evaluator: MetricEvaluator<'a>,
}

pub struct BatchRunner {
    config: Config,
    collaborators: Collaborators,
}

impl BatchRunner {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        BatchRunner { config, collaborators }
    }

    /// Run every (sequence, variant) unit, then aggregate.
    ///
    /// Only a fatal configuration error stops the batch; it is returned before
    /// any unit runs. Everything else is recorded in the audit log.
    pub fn run(&self) -> StageResult<BatchReport> {
        let start = Instant::now();
        self.config.validate()?;

        let results = self.config.results();
        fs::create_dir_all(results.root()).map_err(|e| {
            StageError::fatal(format!("cannot create results root {}: {}", results.root().display(), e))
        })?;
        let mut audit = AuditLog::create(&results.audit_log())
            .map_err(|e| StageError::fatal(format!("cannot open audit log: {}", e)))?;

        let variants = self.config.preprocess.variants();
        if let Err(e) = self.preflight(&variants) {
            audit.record(AuditTag::Err, "Batch", "batch", e.to_string());
            return Err(e);
        }

        let sequences = match self.catalog(&results, &mut audit) {
            Ok(sequences) => sequences,
            Err(e) => {
                audit.record(AuditTag::Err, "Catalog", "batch", e.to_string());
                return Err(e);
            }
        };

        let stages = Stages {
            results: results.clone(),
            preprocessor: VariantPreprocessor::new(
                self.collaborators.transform.as_ref(),
                results.shadow_root(),
                self.config.preprocess.overwrite,
            ),
            runner: VoRunner::new(self.collaborators.engine.as_ref(), self.collaborators.retry.as_ref(), results.clone()),
            evaluator: MetricEvaluator::new(
                self.collaborators.backend.as_ref(),
                EvaluationParams {
                    t_max_diff: self.config.evaluation.t_max_diff,
                    delta: self.config.evaluation.rpe_delta,
                    align: true,
                },
                results.metrics_dir(),
            ),
        };
        let extractor = GroundTruthExtractor::new(results.clone());

        let mut report = BatchReport { sequences: sequences.len(), ..Default::default() };
        let mut disabled: BTreeSet<VariantKind> = BTreeSet::new();

        for sequence in &sequences {
            let ground_truth = match extractor.extract(sequence) {
                Ok(Some(path)) => {
                    audit.record(AuditTag::Ok, "Catalog", &sequence.name, format!("ground truth {}", path.display()));
                    Some(path)
                }
                Ok(None) => {
                    audit.record(AuditTag::Miss, "Catalog", &sequence.name, "no ground truth, metrics disabled");
                    None
                }
                Err(e) => {
                    audit.record(AuditTag::Skip, "Catalog", &sequence.name, format!("ground truth unusable: {}", e));
                    None
                }
            };

            for variant in &variants {
                let unit = format!("{}/{}", sequence.name, variant.name());
                let mut outcome = UnitOutcome::default();
                if disabled.contains(&variant.kind()) {
                    audit.record(AuditTag::Skip, "Preprocess", &unit, "variant disabled earlier in this batch");
                    report.skipped += 1;
                    retire_stale_outputs(&stages, sequence, variant.kind(), &outcome);
                    continue;
                }

                report.units += 1;
                let gt = ground_truth.as_deref();
                match self.run_unit(&stages, sequence, variant, gt, &mut outcome, &mut audit, &mut report) {
                    Ok(()) => {}
                    Err(e @ StageError::VariantFailed { .. }) => {
                        audit.record(AuditTag::Err, "Preprocess", &unit, format!("{}; variant disabled", e));
                        disabled.insert(variant.kind());
                    }
                    Err(e) if e.is_fatal() => {
                        audit.record(AuditTag::Err, "Batch", &unit, e.to_string());
                        return Err(e);
                    }
                    Err(e @ StageError::Io { .. }) => {
                        audit.record(AuditTag::Err, "Batch", &unit, e.to_string());
                        report.skipped += 1;
                    }
                    Err(e) => {
                        audit.record(AuditTag::Skip, "Batch", &unit, e.to_string());
                        report.skipped += 1;
                    }
                }
                retire_stale_outputs(&stages, sequence, variant.kind(), &outcome);
            }
        }

        report.disabled_variants = disabled.into_iter().collect();
        self.aggregate(&results, &mut audit, &mut report);

        report.elapsed = start.elapsed();
        print_summary(&report);
        save_summary(&report, &results.summary());
        audit.record(
            AuditTag::Done,
            "Batch",
            "batch",
            format!(
                "{} units, {} evaluated, {} result rows in {:.1}s",
                report.units,
                report.evaluated,
                report.table.len(),
                report.elapsed.as_secs_f64()
            ),
        );
        Ok(report)
    }

    fn preflight(&self, variants: &[Variant]) -> StageResult<()> {
        self.collaborators.engine.preflight()?;
        self.collaborators.transform.preflight(variants)?;
        self.collaborators.backend.preflight()?;
        log::info!(
            "[Batch] Preflight passed: {} variants, {} evaluator",
            variants.len(),
            self.collaborators.backend.name()
        );
        Ok(())
    }

    fn catalog(&self, results: &ResultsLayout, audit: &mut AuditLog) -> StageResult<Vec<Sequence>> {
        let catalog = SequenceCatalog::new(results.catalog_cache());
        let mut sequences = Vec::new();
        for (family, root, names) in self.config.datasets.families() {
            let listing = catalog.list_sequences(family, root, names)?;
            for skipped in listing.skipped {
                audit.record(AuditTag::Skip, "Catalog", skipped.name, skipped.reason);
            }
            sequences.extend(listing.sequences);
        }
        Ok(sequences)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_unit(
        &self,
        stages: &Stages<'_>,
        sequence: &Sequence,
        variant: &Variant,
        ground_truth: Option<&Path>,
        outcome: &mut UnitOutcome,
        audit: &mut AuditLog,
        report: &mut BatchReport,
    ) -> StageResult<()> {
        let unit = format!("{}/{}", sequence.name, variant.name());

        let run_root = stages.preprocessor.prepare(sequence, variant)?;
        if run_root.generated {
            audit.record(AuditTag::Ok, "Preprocess", &unit, format!("run root {}", run_root.root.display()));
        }

        let Some(captured) = stages.runner.run(sequence, &run_root)? else {
            audit.record(AuditTag::Miss, "VoRunner", &unit, "engine left no trajectory artifact");
            report.missing += 1;
            return Ok(());
        };
        report.captured += 1;
        outcome.captured = true;
        if captured.tolerated_failure() {
            audit.record(
                AuditTag::Warn,
                "VoRunner",
                &unit,
                format!("engine {}, trajectory captured", captured.exit.describe()),
            );
            report.tolerated_failures += 1;
        }

        let estimate_path = stages.results.trajectory(sequence.family, &sequence.name, variant.kind());
        let normalized = TrajectoryNormalizer::normalize_file(
            &captured.raw_path,
            &SourceLayout::Tum,
            sequence.layout().estimate_unit,
            &estimate_path,
        )?;
        let Some(normalized) = normalized else {
            audit.record(AuditTag::Miss, "Normalizer", &unit, "captured trajectory holds no valid pose");
            report.missing += 1;
            return Ok(());
        };
        outcome.normalized = true;
        audit.record(
            AuditTag::Ok,
            "Normalizer",
            &unit,
            format!("{} poses ({} rows dropped)", normalized.poses, normalized.dropped),
        );

        let Some(ground_truth) = ground_truth else {
            audit.record(AuditTag::Skip, "Evaluator", &unit, "no ground truth");
            report.skipped += 1;
            return Ok(());
        };

        for kind in MetricKind::ALL {
            let evaluated = stages
                .evaluator
                .evaluate(sequence.family, &sequence.name, variant.kind(), ground_truth, &normalized.path, kind)
                .and_then(|result| match result {
                    Some(result) => stages.evaluator.store(&result).map(|stored| Some((result, stored))),
                    None => Ok(None),
                });
            match evaluated {
                Ok(Some((result, stored))) => {
                    audit.record(
                        AuditTag::Ok,
                        "Evaluator",
                        &unit,
                        format!("{} rmse {:.4} -> {}", kind, result.stats.rmse, stored.display()),
                    );
                    outcome.metrics.push(kind);
                    report.evaluated += 1;
                }
                Ok(None) => {
                    audit.record(AuditTag::Miss, "Evaluator", &unit, format!("{}: not enough associated poses", kind));
                    report.missing += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    audit.record(AuditTag::Skip, "Evaluator", &unit, format!("{}: {}", kind, e));
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn aggregate(&self, results: &ResultsLayout, audit: &mut AuditLog, report: &mut BatchReport) {
        let stored = match ResultAggregator::load_results(&results.metrics_dir()) {
            Ok(stored) => stored,
            Err(e) => {
                audit.record(AuditTag::Err, "Aggregator", "batch", e.to_string());
                return;
            }
        };
        report.table = ResultAggregator::aggregate(stored);

        match ResultAggregator::write_tables(&report.table, &results.tables_dir()) {
            Ok(tables) => {
                audit.record(
                    AuditTag::Ok,
                    "Aggregator",
                    "batch",
                    format!("{} rows in {}", report.table.len(), results.tables_dir().display()),
                );
                report.tables = tables;
            }
            Err(e) => audit.record(AuditTag::Err, "Aggregator", "batch", e.to_string()),
        }
    }
}

/// Remove what an earlier batch wrote for this unit and this batch did not
/// reproduce, so aggregation only sees current results.
fn retire_stale_outputs(stages: &Stages<'_>, sequence: &Sequence, variant: VariantKind, outcome: &UnitOutcome) {
    let (family, name) = (sequence.family, sequence.name.as_str());
    let mut stale = Vec::new();
    if !outcome.captured {
        stale.push(stages.results.raw_trajectory(family, name, variant));
    }
    if !outcome.normalized {
        stale.push(stages.results.trajectory(family, name, variant));
    }
    for kind in MetricKind::ALL.into_iter().filter(|k| !outcome.metrics.contains(k)) {
        let stored = result_path(stages.evaluator.metrics_dir(), family, name, variant, kind);
        stale.push(stored.with_extension("zip"));
        stale.push(stored);
    }

    for path in stale.into_iter().filter(|p| p.is_file()) {
        match fs::remove_file(&path) {
            Ok(()) => log::info!("[Batch] {}/{}: removed stale {}", name, variant, path.display()),
            Err(e) => log::warn!("[Batch] {}/{}: cannot remove stale {}: {}", name, variant, path.display(), e),
        }
    }
}

fn summary_lines(report: &BatchReport) -> Vec<String> {
    let rule = "════════════════════════════════════════════════════════════════════".to_string();
    let disabled = if report.disabled_variants.is_empty() {
        "none".to_string()
    } else {
        report.disabled_variants.iter().map(|v| v.name()).collect::<Vec<_>>().join(", ")
    };
    vec![
        rule.clone(),
        "                          BATCH SUMMARY                             ".to_string(),
        rule.clone(),
        format!(" Sequences: {}", report.sequences),
        format!(" Units Attempted: {}", report.units),
        format!(" Trajectories Captured: {}", report.captured),
        format!(" Tolerated Engine Failures: {}", report.tolerated_failures),
        format!(" Metrics Evaluated: {}", report.evaluated),
        format!(" Missing: {}", report.missing),
        format!(" Skipped: {}", report.skipped),
        format!(" Disabled Variants: {}", disabled),
        format!(" Result Rows: {}", report.table.len()),
        format!(" Elapsed: {:.1}s", report.elapsed.as_secs_f64()),
        rule,
    ]
}

fn print_summary(report: &BatchReport) {
    for line in summary_lines(report) {
        log::info!("{}", line);
    }
}

fn save_summary(report: &BatchReport, path: &Path) {
    let text = summary_lines(report).join("\n") + "\n";
    match fs::write(path, text) {
        Ok(()) => log::info!("[Batch] Saved summary to: {}", path.display()),
        Err(e) => log::warn!("[Batch] Cannot write summary {}: {}", path.display(), e),
    }
}

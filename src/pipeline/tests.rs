//! End-to-end batches against in-process doubles of the external tools.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use super::*;
use crate::aggregate::ResultAggregator;
use crate::datasets::DatasetFamily;
use crate::evaluation::{BackendOutput, MetricRequest, ResultKey};
use crate::preprocess::{list_frame_names, RunRoot, TransformJob};
use crate::runner::{EngineExit, NoRetry};

const T0: f64 = 1305031100.0;
const FRAMES: usize = 40;

fn position(t: f64) -> (f64, f64, f64) {
    let a = (t - T0) * 0.8;
    (3.0 * a.cos(), 2.0 * a.sin(), 0.2 * a)
}

fn write_sequence(data: &Path, name: &str, with_ground_truth: bool) {
    let seq = data.join(name);
    fs::create_dir_all(seq.join("rgb")).unwrap();
    let mut index = String::from("# color images\n# timestamp filename\n");
    let mut gt = String::from("# ground truth trajectory\n# timestamp tx ty tz qx qy qz qw\n");
    for i in 0..FRAMES {
        let t = T0 + i as f64 * 0.1;
        fs::write(seq.join(format!("rgb/{:.6}.png", t)), "png").unwrap();
        index.push_str(&format!("{:.6} rgb/{:.6}.png\n", t, t));
        let (x, y, z) = position(t);
        gt.push_str(&format!("{:.6} {} {} {} 0 0 0 1\n", t, x, y, z));
    }
    fs::write(seq.join("rgb.txt"), index).unwrap();
    if with_ground_truth {
        fs::write(seq.join("groundtruth.txt"), gt).unwrap();
    }
}

#[derive(Clone, Copy)]
struct Outcome {
    code: i32,
    writes_artifact: bool,
}

/// Writes a half-scale, noisy copy of the ground-truth path for every frame of the run root.
struct FakeEngine {
    artifact: PathBuf,
    outcomes: HashMap<(String, VariantKind), Outcome>,
    invocations: Rc<RefCell<Vec<String>>>,
}

impl VoEngine for FakeEngine {
    fn preflight(&self) -> StageResult<()> {
        Ok(())
    }

    fn artifact_path(&self) -> PathBuf {
        self.artifact.clone()
    }

    fn invoke(&self, _sequence: &Sequence, run_root: &RunRoot) -> StageResult<EngineExit> {
        self.invocations.borrow_mut().push(format!("{}/{}", run_root.sequence, run_root.variant));
        let outcome = self
            .outcomes
            .get(&(run_root.sequence.clone(), run_root.variant))
            .copied()
            .unwrap_or(Outcome { code: 0, writes_artifact: true });

        if outcome.writes_artifact {
            let noise = 0.01 * (1 + VariantKind::ALL.iter().position(|v| *v == run_root.variant).unwrap()) as f64;
            let mut rng = StdRng::seed_from_u64(42);
            let mut text = String::new();
            for name in list_frame_names(&run_root.frames_dir).unwrap() {
                let stem = name.trim_end_matches(".png");
                let t: f64 = stem.parse().unwrap();
                let (x, y, z) = position(t);
                text.push_str(&format!(
                    "{} {} {} {} 0 0 0 1\n",
                    stem,
                    0.5 * x + rng.gen_range(-noise..noise),
                    0.5 * y + rng.gen_range(-noise..noise),
                    0.5 * z + rng.gen_range(-noise..noise)
                ));
            }
            fs::write(&self.artifact, text).unwrap();
        }
        Ok(EngineExit { code: Some(outcome.code), timed_out: false })
    }
}

/// Copies frames unchanged; fails for the variants listed in `broken`.
struct FakeTransform {
    broken: Vec<VariantKind>,
}

impl FrameTransform for FakeTransform {
    fn preflight(&self, _variants: &[Variant]) -> StageResult<()> {
        Ok(())
    }

    fn apply(&self, variant: &Variant, job: &TransformJob<'_>, _overwrite: bool) -> StageResult<()> {
        if self.broken.contains(&variant.kind()) {
            return Err(StageError::VariantFailed {
                variant: variant.name().to_string(),
                reason: "script exited with exit status: 1".to_string(),
            });
        }
        for name in list_frame_names(job.input_frames)? {
            fs::copy(job.input_frames.join(&name), job.output_frames.join(&name)).unwrap();
        }
        Ok(())
    }
}

/// Native metrics, recording which units were evaluated. `failing` metrics
/// error out the way a crashing external evaluator does.
struct CountingBackend {
    calls: Rc<RefCell<Vec<(String, VariantKind, MetricKind)>>>,
    failing: Option<MetricKind>,
}

impl MetricBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn compute(&self, request: &MetricRequest<'_>) -> StageResult<Option<BackendOutput>> {
        let sequence = request
            .estimate_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let variant: VariantKind = request
            .estimate_path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
            .unwrap();
        self.calls.borrow_mut().push((sequence, variant, request.kind));
        if self.failing == Some(request.kind) {
            return Err(StageError::skip("evaluator exited with exit status: 1"));
        }
        NativeBackend.compute(request)
    }
}

struct Harness {
    _data: TempDir,
    results: PathBuf,
    config: Config,
    outcomes: HashMap<(String, VariantKind), Outcome>,
    broken: Vec<VariantKind>,
    failing_metric: Option<MetricKind>,
    engine_calls: Rc<RefCell<Vec<String>>>,
    metric_calls: Rc<RefCell<Vec<(String, VariantKind, MetricKind)>>>,
}

impl Harness {
    fn new(sequences: &[(&str, bool)]) -> Self {
        let data = TempDir::new().unwrap();
        let tum = data.path().join("tum");
        for (name, gt) in sequences {
            write_sequence(&tum, name, *gt);
        }
        let results = data.path().join("results");

        let mut config = Config::default();
        config.datasets.tum_root = Some(tum);
        config.output.results_root = results.clone();

        Harness {
            _data: data,
            results,
            config,
            outcomes: HashMap::new(),
            broken: Vec::new(),
            failing_metric: None,
            engine_calls: Rc::new(RefCell::new(Vec::new())),
            metric_calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn outcome(mut self, sequence: &str, variant: VariantKind, code: i32, writes_artifact: bool) -> Self {
        self.outcomes.insert((sequence.to_string(), variant), Outcome { code, writes_artifact });
        self
    }

    fn run(&self) -> StageResult<BatchReport> {
        let collaborators = Collaborators {
            engine: Box::new(FakeEngine {
                artifact: self.results.parent().unwrap().join("engine/KeyFrameTrajectory.txt"),
                outcomes: self.outcomes.clone(),
                invocations: self.engine_calls.clone(),
            }),
            transform: Box::new(FakeTransform { broken: self.broken.clone() }),
            backend: Box::new(CountingBackend { calls: self.metric_calls.clone(), failing: self.failing_metric }),
            retry: Box::new(NoRetry),
        };
        fs::create_dir_all(self.results.parent().unwrap().join("engine")).unwrap();
        BatchRunner::new(self.config.clone(), collaborators).run()
    }

    fn audit(&self) -> String {
        fs::read_to_string(self.results.join("audit.log")).unwrap()
    }
}

fn key(sequence: &str, variant: VariantKind, metric: MetricKind) -> ResultKey {
    ResultKey { family: DatasetFamily::Tum, sequence: sequence.to_string(), variant, metric }
}

#[test]
fn test_scenario_a_all_variants_evaluated() {
    let harness = Harness::new(&[("seqA", true)]);
    let report = harness.run().unwrap();

    for metric in MetricKind::ALL {
        assert_eq!(report.table.rows_for(DatasetFamily::Tum, "seqA", metric).len(), 5, "{}", metric);
        assert_eq!(report.table.relative_change(&key("seqA", VariantKind::Baseline, metric)), None);
        for variant in &VariantKind::ALL[1..] {
            assert!(report.table.relative_change(&key("seqA", *variant, metric)).is_some());
        }
    }
    assert_eq!(report.evaluated, 10);

    // Estimates are noisy half-scale copies of the ground truth.
    let drift = report.table.get(&key("seqA", VariantKind::Baseline, MetricKind::Drift)).unwrap();
    assert!(drift.stats.rmse > 0.0 && drift.stats.rmse < 0.05, "rmse {}", drift.stats.rmse);
    assert_eq!(drift.association_fraction, 1.0);

    let tables = harness.results.join("tables");
    let drift_csv = fs::read_to_string(tables.join("drift_table.csv")).unwrap();
    assert_eq!(drift_csv.lines().count(), 6);
    let tidy = fs::read_to_string(tables.join("tidy.csv")).unwrap();
    assert_eq!(tidy.lines().count(), 11);
    assert!(harness.audit().trim_end().lines().last().unwrap().starts_with("[DONE]"));
}

#[test]
fn test_scenario_b_no_ground_truth_is_never_evaluated() {
    let harness = Harness::new(&[("seqA", true), ("seqB", false)]);
    let report = harness.run().unwrap();

    assert!(harness.metric_calls.borrow().iter().all(|(seq, _, _)| seq != "seqB"));
    assert!(harness.metric_calls.borrow().iter().any(|(seq, _, _)| seq == "seqA"));
    assert!(!report.table.sequences().contains(&(DatasetFamily::Tum, "seqB".to_string())));
    // seqB still ran through the engine.
    assert_eq!(harness.engine_calls.borrow().iter().filter(|u| u.starts_with("seqB/")).count(), 5);

    let audit = harness.audit();
    assert!(audit.contains("[MISS] [Catalog] seqB: no ground truth"));
    assert!(audit.contains("[SKIP] [Evaluator] seqB/clahe: no ground truth"));
    assert!(audit.trim_end().lines().last().unwrap().starts_with("[DONE]"));
}

#[test]
fn test_scenario_c_failed_exit_with_artifact_is_captured() {
    let harness = Harness::new(&[("seqC", true)]).outcome("seqC", VariantKind::Clahe, 1, true);
    let report = harness.run().unwrap();

    assert_eq!(report.tolerated_failures, 1);
    assert!(report.table.get(&key("seqC", VariantKind::Clahe, MetricKind::Drift)).is_some());
    assert!(harness.results.join("trajectories/tum/seqC/clahe.tum").is_file());

    let audit = harness.audit();
    assert!(audit.contains("[WARN] [VoRunner] seqC/clahe: engine exit code 1, trajectory captured"));
    assert!(!audit.contains("[SKIP] [Batch] seqC/clahe"));
}

#[test]
fn test_scenario_d_missing_artifact_only_drops_that_unit() {
    let harness = Harness::new(&[("seqD", true)]).outcome("seqD", VariantKind::Mertens, 139, false);
    let report = harness.run().unwrap();

    for metric in MetricKind::ALL {
        assert!(report.table.get(&key("seqD", VariantKind::Mertens, metric)).is_none());
        assert_eq!(report.table.rows_for(DatasetFamily::Tum, "seqD", metric).len(), 4);
    }
    assert!(harness.metric_calls.borrow().iter().all(|(_, v, _)| *v != VariantKind::Mertens));
    assert!(!harness.results.join("trajectories/tum/seqD/mertens.tum").exists());
    assert_eq!(report.missing, 1);
    assert!(harness.audit().contains("[MISS] [VoRunner] seqD/mertens"));
}

#[test]
fn test_failed_transform_disables_variant_for_the_batch() {
    let mut harness = Harness::new(&[("seqA", true), ("seqB", true)]);
    harness.broken = vec![VariantKind::Reinhard];
    let report = harness.run().unwrap();

    assert_eq!(report.disabled_variants, vec![VariantKind::Reinhard]);
    assert!(harness.engine_calls.borrow().iter().all(|u| !u.ends_with("/reinhard")));
    assert_eq!(report.table.rows_for(DatasetFamily::Tum, "seqB", MetricKind::Drift).len(), 4);

    let audit = harness.audit();
    assert!(audit.contains("[ERR] [Preprocess] seqA/reinhard"));
    assert!(audit.contains("[SKIP] [Preprocess] seqB/reinhard: variant disabled"));
}

#[test]
fn test_fatal_config_aborts_before_any_run() {
    let mut harness = Harness::new(&[("seqA", true)]);
    harness.config.datasets.tum_root = Some(PathBuf::from("/nonexistent/tum"));
    let err = harness.run().unwrap_err();

    assert!(err.is_fatal());
    assert!(harness.engine_calls.borrow().is_empty());
    assert!(harness.audit().contains("[ERR] [Catalog]"));
}

#[test]
fn test_rerun_replaces_results_and_keeps_shadow_tree() {
    let harness = Harness::new(&[("seqA", true)]);
    let first = harness.run().unwrap();
    let index = harness.results.join("sequences/tum/seqA_clahe/rgb.txt");
    let before = fs::read(&index).unwrap();

    let second = harness.run().unwrap();
    assert_eq!(first.table, second.table);
    assert_eq!(fs::read(&index).unwrap(), before);

    let stored = ResultAggregator::load_results(&harness.results.join("metrics")).unwrap();
    assert_eq!(stored.len(), 10);
    assert_eq!(first.sequences, 1);
}

#[test]
fn test_failing_rerun_retires_earlier_results_of_the_unit() {
    let mut harness = Harness::new(&[("seqD", true)]);
    let first = harness.run().unwrap();
    assert!(first.table.get(&key("seqD", VariantKind::Mertens, MetricKind::Drift)).is_some());
    let stored = harness.results.join("metrics/tum/seqD/mertens.drift.json");
    assert!(stored.is_file());

    harness.outcomes.insert(("seqD".to_string(), VariantKind::Mertens), Outcome { code: 139, writes_artifact: false });
    let second = harness.run().unwrap();

    for metric in MetricKind::ALL {
        assert!(second.table.get(&key("seqD", VariantKind::Mertens, metric)).is_none());
        assert_eq!(second.table.rows_for(DatasetFamily::Tum, "seqD", metric).len(), 4);
    }
    assert!(!stored.exists());
    assert!(!harness.results.join("trajectories/tum/seqD/mertens.tum").exists());
    assert!(!harness.results.join("trajectories/tum/seqD/mertens.raw.txt").exists());
    let tidy = fs::read_to_string(harness.results.join("tables/tidy.csv")).unwrap();
    assert!(!tidy.contains(",mertens,"));
}

#[test]
fn test_one_failing_metric_keeps_the_other() {
    let mut harness = Harness::new(&[("seqA", true)]);
    harness.failing_metric = Some(MetricKind::Drift);
    let report = harness.run().unwrap();

    for variant in VariantKind::ALL {
        assert!(report.table.get(&key("seqA", variant, MetricKind::LocalConsistency)).is_some());
        assert!(report.table.get(&key("seqA", variant, MetricKind::Drift)).is_none());
    }
    assert_eq!(report.evaluated, 5);
    assert_eq!(report.skipped, 5);
    assert!(harness.audit().contains("[SKIP] [Evaluator] seqA/clahe: drift: "));
}

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::datasets::DatasetFamily;
use crate::error::{StageError, StageResult};
use crate::preprocess::variant::{ClaheParams, MertensParams, ProposedParams, ReinhardParams, Variant, VariantKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub datasets: DatasetsConfig,
    pub engine: EngineConfig,
    pub preprocess: PreprocessConfig,
    pub evaluation: EvaluationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetsConfig {
    pub tum_root: Option<PathBuf>,
    /// Empty: every subdirectory of `tum_root`.
    pub tum_sequences: Vec<String>,
    pub euroc_root: Option<PathBuf>,
    pub euroc_sequences: Vec<String>,
}

impl DatasetsConfig {
    /// Configured families with their root and explicit sequence names.
    pub fn families(&self) -> Vec<(DatasetFamily, &Path, &[String])> {
        let mut out = Vec::new();
        if let Some(root) = &self.tum_root {
            out.push((DatasetFamily::Tum, root.as_path(), self.tum_sequences.as_slice()));
        }
        if let Some(root) = &self.euroc_root {
            out.push((DatasetFamily::Euroc, root.as_path(), self.euroc_sequences.as_slice()));
        }
        out
    }
}

/// Executable and settings file used for one dataset family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineProfile {
    pub executable: PathBuf,
    pub settings: PathBuf,
    /// Pass the frame index file as the last argument.
    #[serde(default)]
    pub pass_frame_index: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub install_root: PathBuf,
    pub vocabulary: PathBuf,
    /// File the engine writes its keyframe trajectory to, relative to `install_root`.
    pub artifact_name: String,
    pub tum: EngineProfile,
    pub euroc: EngineProfile,
    pub timeout_secs: Option<u64>,
    /// Extra attempts when a run leaves no artifact. 0 disables retries.
    pub retry_on_missing_artifact: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            install_root: PathBuf::from("ORB_SLAM3"),
            vocabulary: PathBuf::from("Vocabulary/ORBvoc.txt"),
            artifact_name: "KeyFrameTrajectory.txt".to_string(),
            tum: EngineProfile {
                executable: PathBuf::from("Examples/Monocular/mono_tum"),
                settings: PathBuf::from("Examples/Monocular/TUM1.yaml"),
                pass_frame_index: false,
            },
            euroc: EngineProfile {
                executable: PathBuf::from("Examples/Monocular/mono_euroc"),
                settings: PathBuf::from("Examples/Monocular/EuRoC.yaml"),
                pass_frame_index: true,
            },
            timeout_secs: None,
            retry_on_missing_artifact: 0,
        }
    }
}

impl EngineConfig {
    pub fn profile(&self, family: DatasetFamily) -> &EngineProfile {
        match family {
            DatasetFamily::Tum => &self.tum,
            DatasetFamily::Euroc => &self.euroc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub interpreter: String,
    pub scripts_dir: PathBuf,
    /// Re-run transforms over an already populated shadow directory.
    pub overwrite: bool,
    pub variants: Vec<VariantKind>,
    pub clahe: ClaheParams,
    pub reinhard: ReinhardParams,
    pub mertens: MertensParams,
    pub proposed: ProposedParams,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            interpreter: "python3".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            overwrite: false,
            variants: VariantKind::ALL.to_vec(),
            clahe: ClaheParams::default(),
            reinhard: ReinhardParams::default(),
            mertens: MertensParams::default(),
            proposed: ProposedParams::default(),
        }
    }
}

impl PreprocessConfig {
    pub fn variant(&self, kind: VariantKind) -> Variant {
        match kind {
            VariantKind::Baseline => Variant::Baseline,
            VariantKind::Clahe => Variant::Clahe(self.clahe.clone()),
            VariantKind::Reinhard => Variant::Reinhard(self.reinhard.clone()),
            VariantKind::Mertens => Variant::Mertens(self.mertens.clone()),
            VariantKind::Proposed => Variant::Proposed(self.proposed.clone()),
        }
    }

    /// Enabled variants in configuration order, duplicates removed.
    pub fn variants(&self) -> Vec<Variant> {
        let mut kinds: Vec<VariantKind> = Vec::new();
        for kind in &self.variants {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds.into_iter().map(|k| self.variant(k)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Native,
    Command,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(BackendKind::Native),
            "command" | "evo" => Ok(BackendKind::Command),
            other => Err(format!("unknown evaluator backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub backend: BackendKind,
    /// Maximum timestamp difference for time association, seconds.
    pub t_max_diff: f64,
    /// Pose-count step of the local-consistency metric.
    pub rpe_delta: usize,
    pub ape_command: String,
    pub rpe_command: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            backend: BackendKind::Native,
            t_max_diff: 0.01,
            rpe_delta: 5,
            ape_command: "evo_ape".to_string(),
            rpe_command: "evo_rpe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { results_root: PathBuf::from("results") }
    }
}

/// Where every stage writes under the results root.
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    root: PathBuf,
}

impl ResultsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ResultsLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audit_log(&self) -> PathBuf {
        self.root.join("audit.log")
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("summary.txt")
    }

    pub fn catalog_cache(&self) -> PathBuf {
        self.root.join("catalog")
    }

    pub fn shadow_root(&self) -> PathBuf {
        self.root.join("sequences")
    }

    pub fn engine_logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ground_truth(&self, family: DatasetFamily, sequence: &str) -> PathBuf {
        self.root
            .join("ground_truth")
            .join(family.name())
            .join(format!("{}.tum", sequence))
    }

    fn trajectories(&self, family: DatasetFamily, sequence: &str) -> PathBuf {
        self.root.join("trajectories").join(family.name()).join(sequence)
    }

    pub fn raw_trajectory(&self, family: DatasetFamily, sequence: &str, variant: VariantKind) -> PathBuf {
        self.trajectories(family, sequence).join(format!("{}.raw.txt", variant))
    }

    pub fn trajectory(&self, family: DatasetFamily, sequence: &str, variant: VariantKind) -> PathBuf {
        self.trajectories(family, sequence).join(format!("{}.tum", variant))
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.root.join("metrics")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.root.join("tables")
    }
}

/// Values taken from the command line or `VOBENCH_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub tum_root: Option<PathBuf>,
    pub tum_sequences: Vec<String>,
    pub euroc_root: Option<PathBuf>,
    pub euroc_sequences: Vec<String>,
    pub engine_root: Option<PathBuf>,
    pub results_root: Option<PathBuf>,
    pub variants: Vec<VariantKind>,
    pub overwrite: bool,
    pub t_max_diff: Option<f64>,
    pub rpe_delta: Option<usize>,
    pub engine_timeout_secs: Option<u64>,
    pub backend: Option<BackendKind>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // Strip YAML directive if present (e.g., %YAML:1.0)
        let content = if content.trim_start().starts_with("%YAML") {
            content
                .lines()
                .skip_while(|line| line.trim_start().starts_with('%'))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            content.to_string()
        };
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn apply(&mut self, o: Overrides) {
        if o.tum_root.is_some() {
            self.datasets.tum_root = o.tum_root;
        }
        if !o.tum_sequences.is_empty() {
            self.datasets.tum_sequences = o.tum_sequences;
        }
        if o.euroc_root.is_some() {
            self.datasets.euroc_root = o.euroc_root;
        }
        if !o.euroc_sequences.is_empty() {
            self.datasets.euroc_sequences = o.euroc_sequences;
        }
        if let Some(root) = o.engine_root {
            self.engine.install_root = root;
        }
        if let Some(root) = o.results_root {
            self.output.results_root = root;
        }
        if !o.variants.is_empty() {
            self.preprocess.variants = o.variants;
        }
        if o.overwrite {
            self.preprocess.overwrite = true;
        }
        if let Some(v) = o.t_max_diff {
            self.evaluation.t_max_diff = v;
        }
        if let Some(v) = o.rpe_delta {
            self.evaluation.rpe_delta = v;
        }
        if o.engine_timeout_secs.is_some() {
            self.engine.timeout_secs = o.engine_timeout_secs;
        }
        if let Some(b) = o.backend {
            self.evaluation.backend = b;
        }
    }

    /// Checks that need no file system access.
    pub fn validate(&self) -> StageResult<()> {
        if self.datasets.tum_root.is_none() && self.datasets.euroc_root.is_none() {
            return Err(StageError::fatal("no dataset root configured (tum_root or euroc_root)"));
        }
        if self.preprocess.variants.is_empty() {
            return Err(StageError::fatal("no variants enabled"));
        }
        for variant in self.preprocess.variants() {
            variant.validate()?;
        }
        if !(self.evaluation.t_max_diff.is_finite() && self.evaluation.t_max_diff > 0.0) {
            return Err(StageError::fatal(format!(
                "t_max_diff must be a positive number of seconds, got {}",
                self.evaluation.t_max_diff
            )));
        }
        if self.evaluation.rpe_delta == 0 {
            return Err(StageError::fatal("rpe_delta must be at least 1"));
        }
        if self.engine.artifact_name.trim().is_empty() {
            return Err(StageError::fatal("engine artifact_name is empty"));
        }
        if self.engine.timeout_secs == Some(0) {
            return Err(StageError::fatal("engine timeout_secs must be positive when set"));
        }
        Ok(())
    }

    pub fn results(&self) -> ResultsLayout {
        ResultsLayout::new(&self.output.results_root)
    }
}

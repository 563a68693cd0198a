pub mod engine;
pub mod retry;

use std::fs;
use std::path::{Path, PathBuf};

pub use engine::{EngineExit, ProcessEngine, VoEngine};
pub use retry::{NoRetry, RetryOnMissingArtifact, RetryPolicy};

use crate::config::ResultsLayout;
use crate::datasets::Sequence;
use crate::error::{IoContext, StageResult};
use crate::preprocess::RunRoot;

/// A trajectory artifact copied out of the engine's fixed output location.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedTrajectory {
    pub raw_path: PathBuf,
    pub exit: EngineExit,
    pub attempts: u32,
}

impl CapturedTrajectory {
    /// Captured although the engine reported a failure.
    pub fn tolerated_failure(&self) -> bool {
        !self.exit.is_success()
    }
}

/// Copy the artifact at `fixed_path` to `destination`. `Ok(false)` when there is none.
pub fn capture_artifact(fixed_path: &Path, destination: &Path) -> StageResult<bool> {
    if !fixed_path.is_file() {
        return Ok(false);
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    let partial = destination.with_extension("partial");
    fs::copy(fixed_path, &partial).at_path(fixed_path)?;
    fs::rename(&partial, destination).at_path(destination)?;
    Ok(true)
}

pub struct VoRunner<'a> {
    engine: &'a dyn VoEngine,
    retry: &'a dyn RetryPolicy,
    results: ResultsLayout,
}

impl<'a> VoRunner<'a> {
    pub fn new(engine: &'a dyn VoEngine, retry: &'a dyn RetryPolicy, results: ResultsLayout) -> Self {
        VoRunner { engine, retry, results }
    }

    /// Run the engine on `run_root` and capture its trajectory.
    ///
    /// A non-zero exit is tolerated: the artifact is captured whenever it
    /// exists. `Ok(None)` when the engine left no artifact.
    pub fn run(&self, sequence: &Sequence, run_root: &RunRoot) -> StageResult<Option<CapturedTrajectory>> {
        let artifact = self.engine.artifact_path();
        let destination = self.results.raw_trajectory(run_root.family, &run_root.sequence, run_root.variant);
        let unit = format!("{}/{}", run_root.sequence, run_root.variant);

        let mut attempt = 0;
        loop {
            attempt += 1;

            if artifact.exists() {
                log::warn!("[VoRunner] [WARN] {}: removing stale artifact {}", unit, artifact.display());
                fs::remove_file(&artifact).at_path(&artifact)?;
            }

            let exit = self.engine.invoke(sequence, run_root)?;
            if !exit.is_success() {
                log::warn!("[VoRunner] [WARN] {}: engine {}, capturing anyway", unit, exit.describe());
            }

            if capture_artifact(&artifact, &destination)? {
                log::info!("[VoRunner] {}: captured {}", unit, destination.display());
                return Ok(Some(CapturedTrajectory { raw_path: destination, exit, attempts: attempt }));
            }

            if !self.retry.should_retry(attempt, &exit) {
                log::warn!("[VoRunner] {}: no trajectory artifact after {} attempt(s)", unit, attempt);
                return Ok(None);
            }
            log::info!("[VoRunner] {}: no artifact, retrying (attempt {})", unit, attempt + 1);
        }
    }
}

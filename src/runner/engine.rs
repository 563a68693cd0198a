use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::datasets::Sequence;
use crate::error::{IoContext, StageError, StageResult};
use crate::preprocess::RunRoot;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How an engine invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineExit {
    /// Exit code, `None` when killed by a signal or by the timeout.
    pub code: Option<i32>,
    pub timed_out: bool,
}

impl EngineExit {
    pub fn success() -> Self {
        EngineExit { code: Some(0), timed_out: false }
    }

    pub fn failed(code: i32) -> Self {
        EngineExit { code: Some(code), timed_out: false }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }

    fn from_status(status: ExitStatus) -> Self {
        EngineExit { code: status.code(), timed_out: false }
    }

    pub fn describe(&self) -> String {
        match (self.timed_out, self.code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exit code {}", code),
            (false, None) => "terminated by signal".to_string(),
        }
    }
}

/// The black-box visual odometry engine.
pub trait VoEngine {
    fn preflight(&self) -> StageResult<()>;

    /// Fixed location the engine writes its trajectory to on every run.
    fn artifact_path(&self) -> PathBuf;

    /// Run once, synchronously, against `run_root`.
    fn invoke(&self, sequence: &Sequence, run_root: &RunRoot) -> StageResult<EngineExit>;
}

/// Launches the engine binary as a child process.
pub struct ProcessEngine {
    config: EngineConfig,
    log_dir: PathBuf,
}

impl ProcessEngine {
    pub fn new(config: &EngineConfig, log_dir: impl Into<PathBuf>) -> Self {
        ProcessEngine { config: config.clone(), log_dir: log_dir.into() }
    }

    /// Arguments after the executable. Paths handed to the engine are absolute
    /// because it runs from its install root.
    pub fn command_args(&self, sequence: &Sequence, run_root: &RunRoot) -> StageResult<Vec<String>> {
        let profile = self.config.profile(sequence.family);
        let root = fs::canonicalize(&run_root.root).at_path(&run_root.root)?;
        let mut args = vec![
            self.config.vocabulary.display().to_string(),
            profile.settings.display().to_string(),
            root.display().to_string(),
        ];
        if profile.pass_frame_index {
            let index = fs::canonicalize(&run_root.frame_index).at_path(&run_root.frame_index)?;
            args.push(index.display().to_string());
        }
        Ok(args)
    }

    fn wait(&self, child: &mut std::process::Child) -> std::io::Result<EngineExit> {
        let Some(timeout) = self.config.timeout_secs.map(Duration::from_secs) else {
            return child.wait().map(EngineExit::from_status);
        };

        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(EngineExit::from_status(status));
            }
            if start.elapsed() >= timeout {
                child.kill()?;
                child.wait()?;
                return Ok(EngineExit { code: None, timed_out: true });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn require_file(path: &Path, what: &str) -> StageResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StageError::fatal(format!("{} not found: {}", what, path.display())))
    }
}

impl VoEngine for ProcessEngine {
    fn preflight(&self) -> StageResult<()> {
        let install_root = &self.config.install_root;
        if !install_root.is_dir() {
            return Err(StageError::fatal(format!(
                "engine install root not found: {}",
                install_root.display()
            )));
        }
        require_file(&install_root.join(&self.config.vocabulary), "engine vocabulary")?;
        for profile in [&self.config.tum, &self.config.euroc] {
            require_file(&install_root.join(&profile.executable), "engine executable")?;
            require_file(&install_root.join(&profile.settings), "engine settings")?;
        }
        Ok(())
    }

    fn artifact_path(&self) -> PathBuf {
        self.config.install_root.join(&self.config.artifact_name)
    }

    fn invoke(&self, sequence: &Sequence, run_root: &RunRoot) -> StageResult<EngineExit> {
        let install_root = &self.config.install_root;
        let executable = install_root.join(&self.config.profile(sequence.family).executable);
        let args = self.command_args(sequence, run_root)?;

        let log_dir = self.log_dir.join(run_root.family.name());
        fs::create_dir_all(&log_dir).at_path(&log_dir)?;
        let log_path = log_dir.join(format!("{}_{}.log", run_root.sequence, run_root.variant));
        let stdout = File::create(&log_path).at_path(&log_path)?;
        let stderr = stdout.try_clone().at_path(&log_path)?;

        log::info!(
            "[VoRunner] {} {} (log: {})",
            executable.display(),
            args.join(" "),
            log_path.display()
        );

        let mut child = Command::new(&executable)
            .args(&args)
            .current_dir(install_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| StageError::skip(format!("cannot start {}: {}", executable.display(), e)))?;

        self.wait(&mut child).at_path(&executable)
    }
}

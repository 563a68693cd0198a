use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{IoContext, StageError, StageResult};
use crate::preprocess::list_frame_names;
use crate::preprocess::variant::{TransformScope, Variant};

/// Where one transform run reads and writes.
#[derive(Debug, Clone, Copy)]
pub struct TransformJob<'a> {
    /// Dataset sequence root.
    pub input_root: &'a Path,
    /// Frame directory below `input_root`.
    pub input_frames: &'a Path,
    /// Shadow root of the variant.
    pub output_root: &'a Path,
    /// Frame directory to fill, at the same place below `output_root`.
    pub output_frames: &'a Path,
}

impl TransformJob<'_> {
    fn frames_relative(&self) -> &Path {
        self.input_frames.strip_prefix(self.input_root).unwrap_or(Path::new("rgb"))
    }
}

/// Frame transform of one variant. Output frames keep the input file names.
pub trait FrameTransform {
    /// Check that every tool needed by `variants` is available.
    fn preflight(&self, variants: &[Variant]) -> StageResult<()>;

    /// Fill `job.output_frames`. Nothing else under `job.output_root` may be replaced.
    fn apply(&self, variant: &Variant, job: &TransformJob<'_>, overwrite: bool) -> StageResult<()>;
}

/// Runs the per-variant Python scripts of the dispatch table.
pub struct ScriptTransform {
    interpreter: String,
    scripts_dir: PathBuf,
}

impl ScriptTransform {
    pub fn new(interpreter: impl Into<String>, scripts_dir: impl Into<PathBuf>) -> Self {
        ScriptTransform { interpreter: interpreter.into(), scripts_dir: scripts_dir.into() }
    }

    fn script_path(&self, variant: &Variant) -> Option<PathBuf> {
        variant.strategy().map(|s| self.scripts_dir.join(s.script))
    }

    /// Full argument list, without the interpreter.
    pub fn command_args(&self, variant: &Variant, input: &Path, output: &Path, overwrite: bool) -> Vec<String> {
        let Some(strategy) = variant.strategy() else {
            return Vec::new();
        };
        let mut args = vec![
            self.scripts_dir.join(strategy.script).display().to_string(),
            strategy.input_flag.to_string(),
            input.display().to_string(),
            strategy.output_flag.to_string(),
            output.display().to_string(),
        ];
        args.extend(variant.arguments());
        if overwrite {
            if let Some(flag) = strategy.overwrite_flag {
                args.push(flag.to_string());
            }
        }
        args
    }

    /// Scratch output of a sequence-level script, inside the shadow root.
    pub fn staging_dir(variant: &Variant, output_root: &Path) -> PathBuf {
        output_root.join(format!(".staging_{}", variant.name()))
    }

    fn run_script(&self, variant: &Variant, input: &Path, output: &Path, overwrite: bool) -> StageResult<()> {
        let args = self.command_args(variant, input, output, overwrite);
        log::debug!("[Preprocess] {} {}", self.interpreter, args.join(" "));

        let output = Command::new(&self.interpreter).args(&args).output().map_err(|e| StageError::VariantFailed {
            variant: variant.name().to_string(),
            reason: format!("cannot start '{}': {}", self.interpreter, e),
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("[Preprocess] {}: {}", variant.name(), line);
        }

        if !output.status.success() {
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
            return Err(StageError::VariantFailed {
                variant: variant.name().to_string(),
                reason: format!("script exited with {}: {}", output.status, last.trim()),
            });
        }
        Ok(())
    }

    /// Run a sequence-level script into a staging folder and keep only its frames.
    ///
    /// The script writes its own frame index next to the frames; the shadow
    /// root's companions are left as they are.
    fn run_sequence_script(&self, variant: &Variant, job: &TransformJob<'_>, overwrite: bool) -> StageResult<()> {
        let staging = Self::staging_dir(variant, job.output_root);
        if staging.exists() {
            fs::remove_dir_all(&staging).at_path(&staging)?;
        }

        let outcome = self
            .run_script(variant, job.input_root, &staging, overwrite)
            .and_then(|()| move_frames(&staging.join(job.frames_relative()), job.output_frames));
        if staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                log::warn!("[Preprocess] Cannot remove {}: {}", staging.display(), e);
            }
        }

        let moved = outcome?;
        log::debug!("[Preprocess] {}: {} frames moved into {}", variant.name(), moved, job.output_frames.display());
        Ok(())
    }
}

/// Move every frame file of `from` into `to`, replacing same-named files.
fn move_frames(from: &Path, to: &Path) -> StageResult<usize> {
    fs::create_dir_all(to).at_path(to)?;
    let names = list_frame_names(from)?;
    for name in &names {
        fs::rename(from.join(name), to.join(name)).at_path(from.join(name))?;
    }
    Ok(names.len())
}

impl FrameTransform for ScriptTransform {
    fn preflight(&self, variants: &[Variant]) -> StageResult<()> {
        let needs_scripts = variants.iter().any(|v| !v.is_baseline());
        if !needs_scripts {
            return Ok(());
        }

        if let Err(e) = Command::new(&self.interpreter).arg("--version").output() {
            return Err(StageError::fatal(format!(
                "interpreter '{}' cannot be started: {}",
                self.interpreter, e
            )));
        }

        for variant in variants {
            if let Some(script) = self.script_path(variant) {
                if !script.is_file() {
                    return Err(StageError::fatal(format!(
                        "pre-processing script for '{}' not found: {}",
                        variant.name(),
                        script.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(&self, variant: &Variant, job: &TransformJob<'_>, overwrite: bool) -> StageResult<()> {
        let Some(strategy) = variant.strategy() else {
            return Ok(());
        };
        match strategy.scope {
            TransformScope::FrameDir => self.run_script(variant, job.input_frames, job.output_frames, overwrite),
            TransformScope::Sequence => self.run_sequence_script(variant, job, overwrite),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::variant::{ClaheParams, MertensParams, ProposedParams, ReinhardParams, DISPATCH};
    use tempfile::TempDir;

    #[test]
    fn test_command_args_follow_dispatch_table() {
        let transform = ScriptTransform::new("python3", "/opt/scripts");
        let args = transform.command_args(
            &Variant::Clahe(ClaheParams::default()),
            Path::new("/data/fr1_desk"),
            Path::new("/out/.staging_clahe"),
            true,
        );
        assert_eq!(
            args,
            vec![
                "/opt/scripts/preprocess_clahe.py", "--in_seq", "/data/fr1_desk", "--out_seq", "/out/.staging_clahe",
                "--clipLimit", "3", "--tileGridSize", "8",
            ]
        );

        let args = transform.command_args(
            &Variant::Proposed(ProposedParams::default()),
            Path::new("/in"),
            Path::new("/out"),
            true,
        );
        assert_eq!(args[1], "--input-dir");
        assert_eq!(args.last().map(String::as_str), Some("--overwrite"));
    }

    #[test]
    fn test_preflight_finds_every_dispatched_script() {
        let scripts = TempDir::new().unwrap();
        let transform = ScriptTransform::new("sh", scripts.path());
        let variants = vec![
            Variant::Baseline,
            Variant::Clahe(ClaheParams::default()),
            Variant::Reinhard(ReinhardParams::default()),
            Variant::Mertens(MertensParams::default()),
            Variant::Proposed(ProposedParams::default()),
        ];

        let err = transform.preflight(&variants).unwrap_err();
        assert!(err.is_fatal());

        for (_, strategy) in DISPATCH {
            fs::write(scripts.path().join(strategy.script), "").unwrap();
        }
        assert!(transform.preflight(&variants).is_ok());
    }

    #[test]
    fn test_baseline_only_needs_nothing() {
        let transform = ScriptTransform::new("no-such-interpreter", "/nonexistent");
        assert!(transform.preflight(&[Variant::Baseline]).is_ok());
    }

    /// A TUM-style sequence with two frames, and an empty shadow holding a companion index.
    #[cfg(unix)]
    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let seq = dir.join("data/fr1_desk");
        fs::create_dir_all(seq.join("rgb")).unwrap();
        fs::write(seq.join("rgb/1.000000.png"), "a").unwrap();
        fs::write(seq.join("rgb/2.000000.png"), "b").unwrap();
        fs::write(seq.join("rgb.txt"), "1.000000 rgb/1.000000.png\n2.000000 rgb/2.000000.png\n").unwrap();

        let shadow = dir.join("shadow/fr1_desk_clahe");
        fs::create_dir_all(shadow.join("rgb")).unwrap();
        fs::write(shadow.join("rgb.txt"), "companion\n").unwrap();
        (seq, shadow)
    }

    #[cfg(unix)]
    #[test]
    fn test_sequence_script_fills_frames_without_clobbering_companions() {
        let dir = TempDir::new().unwrap();
        let (seq, shadow) = fixture(dir.path());
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(
            scripts.join("preprocess_clahe.py"),
            "mkdir -p \"$4/rgb\"\ncp \"$2\"/rgb/* \"$4/rgb/\"\necho rewritten > \"$4/rgb.txt\"\n",
        )
        .unwrap();

        let transform = ScriptTransform::new("sh", &scripts);
        let variant = Variant::Clahe(ClaheParams::default());
        let job = TransformJob {
            input_root: &seq,
            input_frames: &seq.join("rgb"),
            output_root: &shadow,
            output_frames: &shadow.join("rgb"),
        };
        transform.apply(&variant, &job, false).unwrap();

        assert_eq!(list_frame_names(&shadow.join("rgb")).unwrap(), list_frame_names(&seq.join("rgb")).unwrap());
        assert_eq!(fs::read_to_string(shadow.join("rgb.txt")).unwrap(), "companion\n");
        assert!(!ScriptTransform::staging_dir(&variant, &shadow).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_frame_dir_script_writes_into_frames() {
        let dir = TempDir::new().unwrap();
        let (seq, shadow) = fixture(dir.path());
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("preprocess_reinhard_dir.py"), "mkdir -p \"$4\"\ncp \"$2\"/* \"$4/\"\n").unwrap();

        let transform = ScriptTransform::new("sh", &scripts);
        let job = TransformJob {
            input_root: &seq,
            input_frames: &seq.join("rgb"),
            output_root: &shadow,
            output_frames: &shadow.join("rgb"),
        };
        transform.apply(&Variant::Reinhard(ReinhardParams::default()), &job, false).unwrap();
        assert_eq!(list_frame_names(&shadow.join("rgb")).unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_is_variant_failure_and_leaves_no_staging() {
        let dir = TempDir::new().unwrap();
        let (seq, shadow) = fixture(dir.path());
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(
            scripts.join("preprocess_mertens.py"),
            "mkdir -p \"$4/rgb\"\necho 'cv2 missing' >&2\nexit 1\n",
        )
        .unwrap();

        let transform = ScriptTransform::new("sh", &scripts);
        let variant = Variant::Mertens(MertensParams::default());
        let job = TransformJob {
            input_root: &seq,
            input_frames: &seq.join("rgb"),
            output_root: &shadow,
            output_frames: &shadow.join("rgb"),
        };
        let err = transform.apply(&variant, &job, false).unwrap_err();
        assert!(matches!(err, StageError::VariantFailed { ref reason, .. } if reason.contains("cv2 missing")));
        assert!(!ScriptTransform::staging_dir(&variant, &shadow).exists());
        assert!(list_frame_names(&shadow.join("rgb")).unwrap().is_empty());
    }
}

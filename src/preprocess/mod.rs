pub mod transform;
pub mod variant;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub use transform::{FrameTransform, ScriptTransform, TransformJob};
pub use variant::{Variant, VariantKind};

use crate::datasets::{DatasetFamily, Sequence};
use crate::error::{IoContext, StageError, StageResult};

/// Effective input of the engine for one (sequence, variant) unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRoot {
    pub family: DatasetFamily,
    pub sequence: String,
    pub variant: VariantKind,
    pub root: PathBuf,
    pub frames_dir: PathBuf,
    pub frame_index: PathBuf,
    /// `false` when the run root is the dataset sequence itself.
    pub generated: bool,
}

pub struct VariantPreprocessor<'a> {
    transform: &'a dyn FrameTransform,
    shadow_root: PathBuf,
    overwrite: bool,
}

impl<'a> VariantPreprocessor<'a> {
    pub fn new(transform: &'a dyn FrameTransform, shadow_root: impl Into<PathBuf>, overwrite: bool) -> Self {
        VariantPreprocessor { transform, shadow_root: shadow_root.into(), overwrite }
    }

    /// Directory holding the shadow copy of `sequence` for `variant`.
    pub fn shadow_dir(&self, sequence: &Sequence, variant: VariantKind) -> PathBuf {
        self.shadow_root
            .join(sequence.family.name())
            .join(format!("{}_{}", sequence.name, variant))
    }

    /// Build the run root of `sequence` for `variant`.
    ///
    /// The baseline is the sequence itself, unless its frame index was
    /// synthesized outside the sequence tree. Other variants get a shadow tree
    /// with the same sensor-data layout: companion files are copied only when
    /// absent, then the external transform fills the frame directory. An
    /// already complete frame directory is left alone unless `overwrite` is set.
    pub fn prepare(&self, sequence: &Sequence, variant: &Variant) -> StageResult<RunRoot> {
        if variant.is_baseline() {
            return self.baseline(sequence);
        }

        let layout = sequence.layout();
        let shadow = self.shadow_dir(sequence, variant.kind());
        let frames_dir = shadow.join(layout.frames_dir);
        fs::create_dir_all(&frames_dir).at_path(&frames_dir)?;
        let frame_index = self.copy_companions(sequence, &shadow)?;

        let expected = list_frame_names(&sequence.frames_dir)?;
        let present = list_frame_names(&frames_dir)?;

        if !self.overwrite && present == expected {
            log::info!(
                "[Preprocess] {} / {}: {} frames already present, transform skipped",
                sequence.name,
                variant.name(),
                present.len()
            );
        } else {
            log::info!(
                "[Preprocess] {} / {}: transforming {} frames",
                sequence.name,
                variant.name(),
                expected.len()
            );
            let job = TransformJob {
                input_root: &sequence.root,
                input_frames: &sequence.frames_dir,
                output_root: &shadow,
                output_frames: &frames_dir,
            };
            self.transform.apply(variant, &job, self.overwrite)?;

            let produced = list_frame_names(&frames_dir)?;
            if produced != expected {
                let missing = expected.difference(&produced).count();
                let unexpected = produced.difference(&expected).count();
                return Err(StageError::VariantFailed {
                    variant: variant.name().to_string(),
                    reason: format!(
                        "output frame set differs from input for {}: {} missing, {} unexpected",
                        sequence.name, missing, unexpected
                    ),
                });
            }
        }

        Ok(RunRoot {
            family: sequence.family,
            sequence: sequence.name.clone(),
            variant: variant.kind(),
            root: shadow,
            frames_dir,
            frame_index,
            generated: true,
        })
    }

    /// The sequence itself, or a thin shadow when the engine would not find
    /// the frame index below the sequence root.
    fn baseline(&self, sequence: &Sequence) -> StageResult<RunRoot> {
        if sequence.frame_index.starts_with(&sequence.root) {
            return Ok(RunRoot {
                family: sequence.family,
                sequence: sequence.name.clone(),
                variant: VariantKind::Baseline,
                root: sequence.root.clone(),
                frames_dir: sequence.frames_dir.clone(),
                frame_index: sequence.frame_index.clone(),
                generated: false,
            });
        }

        let shadow = self.shadow_dir(sequence, VariantKind::Baseline);
        let frames_dir = shadow.join(sequence.layout().frames_dir);
        link_frames(&sequence.frames_dir, &frames_dir)?;
        let frame_index = self.copy_companions(sequence, &shadow)?;
        log::info!(
            "[Preprocess] {} / baseline: frame index lives outside the sequence, running from {}",
            sequence.name,
            shadow.display()
        );

        Ok(RunRoot {
            family: sequence.family,
            sequence: sequence.name.clone(),
            variant: VariantKind::Baseline,
            root: shadow,
            frames_dir,
            frame_index,
            generated: true,
        })
    }

    /// Copy companions and the frame index into `shadow`, keeping existing
    /// files. Returns the shadow's frame index.
    fn copy_companions(&self, sequence: &Sequence, shadow: &Path) -> StageResult<PathBuf> {
        let layout = sequence.layout();
        for companion in layout.companion_files {
            let src = sequence.root.join(companion);
            if src.is_file() {
                copy_if_absent(&src, &shadow.join(companion))?;
            }
        }

        let frame_index = match sequence.frame_index.strip_prefix(&sequence.root) {
            Ok(relative) => shadow.join(relative),
            Err(_) => shadow.join(layout.frame_index),
        };
        copy_if_absent(&sequence.frame_index, &frame_index)?;
        Ok(frame_index)
    }
}

/// Expose the dataset frames at `dst` without copying them where the
/// platform allows.
fn link_frames(src: &Path, dst: &Path) -> StageResult<()> {
    if fs::symlink_metadata(dst).is_ok() {
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }

    #[cfg(unix)]
    {
        let target = fs::canonicalize(src).at_path(src)?;
        std::os::unix::fs::symlink(&target, dst).at_path(dst)?;
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dst).at_path(dst)?;
        for name in list_frame_names(src)? {
            copy_if_absent(&src.join(&name), &dst.join(&name))?;
        }
    }
    Ok(())
}

/// Copy `src` to `dst` unless `dst` exists. Returns whether a copy happened.
pub fn copy_if_absent(src: &Path, dst: &Path) -> StageResult<bool> {
    if dst.exists() {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    fs::copy(src, dst).at_path(src)?;
    Ok(true)
}

/// Names of the regular, non-hidden files directly inside `dir`.
pub fn list_frame_names(dir: &Path) -> StageResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).at_path(dir)? {
        let entry = entry.at_path(dir)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.path().is_file() {
            continue;
        }
        names.insert(name);
    }
    Ok(names)
}

//! Pre-processing variants and their dispatch table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};

/// Plain tag of a variant, as written in configuration files and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Baseline,
    Clahe,
    Reinhard,
    Mertens,
    Proposed,
}

impl VariantKind {
    pub const ALL: [VariantKind; 5] = [
        VariantKind::Baseline,
        VariantKind::Clahe,
        VariantKind::Reinhard,
        VariantKind::Mertens,
        VariantKind::Proposed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VariantKind::Baseline => "baseline",
            VariantKind::Clahe => "clahe",
            VariantKind::Reinhard => "reinhard",
            VariantKind::Mertens => "mertens",
            VariantKind::Proposed => "proposed",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        VariantKind::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| format!("unknown variant '{}'", s))
    }
}

/// Contrast-limited adaptive histogram equalization on the luminance channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheParams {
    pub clip_limit: f64,
    pub tile_grid_size: u32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        ClaheParams { clip_limit: 3.0, tile_grid_size: 8 }
    }
}

/// Reinhard global tone mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinhardParams {
    pub gamma: f64,
    pub intensity: f64,
    pub light_adapt: f64,
    pub color_adapt: f64,
}

impl Default for ReinhardParams {
    fn default() -> Self {
        ReinhardParams { gamma: 1.2, intensity: 0.0, light_adapt: 0.8, color_adapt: 0.2 }
    }
}

/// Mertens exposure fusion over exposures synthesized from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MertensParams {
    pub contrast_weight: f64,
    pub saturation_weight: f64,
    pub exposure_weight: f64,
    /// One gain per synthesized exposure.
    pub gains: Vec<f64>,
    /// One gamma per synthesized exposure.
    pub gammas: Vec<f64>,
}

impl Default for MertensParams {
    fn default() -> Self {
        MertensParams {
            contrast_weight: 1.0,
            saturation_weight: 1.0,
            exposure_weight: 0.75,
            gains: vec![0.5, 1.0, 2.0],
            gammas: vec![1.1, 1.0, 0.9],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingCurve {
    PiecewiseLinear,
    Gamma,
}

impl fmt::Display for MappingCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingCurve::PiecewiseLinear => f.write_str("PiecewiseLinear"),
            MappingCurve::Gamma => f.write_str("Gamma"),
        }
    }
}

/// SDR -> HDR (inverse tone mapping) -> SDR (tone mapping) transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposedParams {
    pub bit_depth: u32,
    /// Brightness weight of the inverse tone mapping.
    pub w_brightness: f64,
    /// Contrast weight of the inverse tone mapping.
    pub w_contrast: f64,
    pub mapping_curve: MappingCurve,
}

impl Default for ProposedParams {
    fn default() -> Self {
        ProposedParams {
            bit_depth: 8,
            w_brightness: 0.5,
            w_contrast: 0.5,
            mapping_curve: MappingCurve::PiecewiseLinear,
        }
    }
}

/// A variant together with its parameter record.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Baseline,
    Clahe(ClaheParams),
    Reinhard(ReinhardParams),
    Mertens(MertensParams),
    Proposed(ProposedParams),
}

/// What an external script reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformScope {
    /// A frame directory in, a frame directory out.
    FrameDir,
    /// A TUM-style sequence folder (`rgb/` and `rgb.txt`) in, a new sequence folder out.
    Sequence,
}

/// How an external per-variant script is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformStrategy {
    pub script: &'static str,
    pub scope: TransformScope,
    pub input_flag: &'static str,
    pub output_flag: &'static str,
    /// Flag asking the script to replace existing outputs, if it has one.
    pub overwrite_flag: Option<&'static str>,
}

/// Single dispatch table from variant to pre-processing script.
pub const DISPATCH: &[(VariantKind, TransformStrategy)] = &[
    (
        VariantKind::Clahe,
        TransformStrategy {
            script: "preprocess_clahe.py",
            scope: TransformScope::Sequence,
            input_flag: "--in_seq",
            output_flag: "--out_seq",
            overwrite_flag: None,
        },
    ),
    (
        VariantKind::Reinhard,
        TransformStrategy {
            script: "preprocess_reinhard_dir.py",
            scope: TransformScope::FrameDir,
            input_flag: "--in_dir",
            output_flag: "--out_dir",
            overwrite_flag: None,
        },
    ),
    (
        VariantKind::Mertens,
        TransformStrategy {
            script: "preprocess_mertens.py",
            scope: TransformScope::Sequence,
            input_flag: "--in_seq",
            output_flag: "--out_seq",
            overwrite_flag: None,
        },
    ),
    (
        VariantKind::Proposed,
        TransformStrategy {
            script: "sdr_hdr_sdr_pipeline.py",
            scope: TransformScope::FrameDir,
            input_flag: "--input-dir",
            output_flag: "--output-dir",
            overwrite_flag: Some("--overwrite"),
        },
    ),
];

pub fn strategy_for(kind: VariantKind) -> Option<&'static TransformStrategy> {
    DISPATCH.iter().find(|(k, _)| *k == kind).map(|(_, s)| s)
}

fn join_list(values: &[f64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Baseline => VariantKind::Baseline,
            Variant::Clahe(_) => VariantKind::Clahe,
            Variant::Reinhard(_) => VariantKind::Reinhard,
            Variant::Mertens(_) => VariantKind::Mertens,
            Variant::Proposed(_) => VariantKind::Proposed,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn is_baseline(&self) -> bool {
        matches!(self, Variant::Baseline)
    }

    /// External script used by this variant; `None` for the baseline.
    pub fn strategy(&self) -> Option<&'static TransformStrategy> {
        strategy_for(self.kind())
    }

    /// Parameter arguments passed to the external script.
    pub fn arguments(&self) -> Vec<String> {
        let pairs: Vec<(&str, String)> = match self {
            Variant::Baseline => Vec::new(),
            Variant::Clahe(p) => vec![
                ("--clipLimit", p.clip_limit.to_string()),
                ("--tileGridSize", p.tile_grid_size.to_string()),
            ],
            Variant::Reinhard(p) => vec![
                ("--gamma", p.gamma.to_string()),
                ("--intensity", p.intensity.to_string()),
                ("--light_adapt", p.light_adapt.to_string()),
                ("--color_adapt", p.color_adapt.to_string()),
            ],
            Variant::Mertens(p) => vec![
                ("--contrast_weight", p.contrast_weight.to_string()),
                ("--sat_weight", p.saturation_weight.to_string()),
                ("--exp_weight", p.exposure_weight.to_string()),
                ("--gains", join_list(&p.gains)),
                ("--gammas", join_list(&p.gammas)),
            ],
            Variant::Proposed(p) => vec![
                ("--bit-depth", p.bit_depth.to_string()),
                ("--wB", p.w_brightness.to_string()),
                ("--wC", p.w_contrast.to_string()),
                ("--mapping-curve", p.mapping_curve.to_string()),
            ],
        };
        pairs
            .into_iter()
            .flat_map(|(flag, value)| [flag.to_string(), value])
            .collect()
    }

    /// Reject parameter records the external scripts would refuse.
    pub fn validate(&self) -> StageResult<()> {
        match self {
            Variant::Baseline => Ok(()),
            Variant::Clahe(p) => {
                if p.clip_limit <= 0.0 || p.tile_grid_size == 0 {
                    return Err(StageError::fatal("clahe: clip_limit and tile_grid_size must be positive"));
                }
                Ok(())
            }
            Variant::Reinhard(p) => {
                if p.gamma <= 0.0 {
                    return Err(StageError::fatal("reinhard: gamma must be positive"));
                }
                Ok(())
            }
            Variant::Mertens(p) => {
                if p.gains.len() != 3 || p.gammas.len() != 3 {
                    return Err(StageError::fatal(format!(
                        "mertens: expected exactly three gains and three gammas, got {} and {}",
                        p.gains.len(),
                        p.gammas.len()
                    )));
                }
                Ok(())
            }
            Variant::Proposed(p) => {
                if p.bit_depth != 8 && p.bit_depth != 10 {
                    return Err(StageError::fatal(format!("proposed: bit_depth must be 8 or 10, got {}", p.bit_depth)));
                }
                Ok(())
            }
        }
    }
}

//! Per-family file layouts. Adding a dataset family means adding a table here.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use trajectory_eval::parse::SourceLayout;
use trajectory_eval::schema::EUROC_GROUND_TRUTH;
use trajectory_eval::{CsvSchema, PoseField, TimestampUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFamily {
    Tum,
    Euroc,
}

impl DatasetFamily {
    pub fn name(self) -> &'static str {
        match self {
            DatasetFamily::Tum => "tum",
            DatasetFamily::Euroc => "euroc",
        }
    }

    pub fn layout(self) -> &'static FamilyLayout {
        match self {
            DatasetFamily::Tum => &TUM_LAYOUT,
            DatasetFamily::Euroc => &EUROC_LAYOUT,
        }
    }
}

impl fmt::Display for DatasetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tum" => Ok(DatasetFamily::Tum),
            "euroc" => Ok(DatasetFamily::Euroc),
            other => Err(format!("unknown dataset family '{}'", other)),
        }
    }
}

/// How the frame index file the engine reads is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// `timestamp relative/path.png` per line, timestamps in seconds.
    TimestampAndFile,
    /// One nanosecond timestamp per line.
    TimestampOnly,
}

#[derive(Debug)]
pub struct FamilyLayout {
    pub family: DatasetFamily,
    /// Frame directory relative to the sequence root.
    pub frames_dir: &'static str,
    /// Frame index relative to the sequence root.
    pub frame_index: &'static str,
    pub index_format: IndexFormat,
    /// CSV the index is derived from; `None` derives it from frame file names.
    pub index_source: Option<&'static str>,
    /// Files copied verbatim into shadow sequences when present.
    pub companion_files: &'static [&'static str],
    /// Ground-truth candidates in search order.
    pub ground_truth_candidates: &'static [&'static str],
    /// Column candidates for CSV ground truth.
    pub ground_truth_columns: &'static [(PoseField, &'static [&'static str])],
    pub ground_truth_unit: TimestampUnit,
    pub estimate_unit: TimestampUnit,
}

pub static TUM_LAYOUT: FamilyLayout = FamilyLayout {
    family: DatasetFamily::Tum,
    frames_dir: "rgb",
    frame_index: "rgb.txt",
    index_format: IndexFormat::TimestampAndFile,
    index_source: None,
    companion_files: &["rgb.txt", "depth.txt", "accelerometer.txt"],
    ground_truth_candidates: &["groundtruth.txt", "groundtruth.csv"],
    ground_truth_columns: EUROC_GROUND_TRUTH,
    ground_truth_unit: TimestampUnit::Seconds,
    estimate_unit: TimestampUnit::Seconds,
};

pub static EUROC_LAYOUT: FamilyLayout = FamilyLayout {
    family: DatasetFamily::Euroc,
    frames_dir: "mav0/cam0/data",
    frame_index: "times.txt",
    index_format: IndexFormat::TimestampOnly,
    index_source: Some("mav0/cam0/data.csv"),
    companion_files: &["mav0/cam0/data.csv", "mav0/cam0/sensor.yaml", "mav0/body.yaml"],
    ground_truth_candidates: &[
        "mav0/state_groundtruth_estimate0/data.csv",
        "state_groundtruth_estimate0/data.csv",
    ],
    ground_truth_columns: EUROC_GROUND_TRUTH,
    ground_truth_unit: TimestampUnit::Nanoseconds,
    estimate_unit: TimestampUnit::Auto,
};

impl FamilyLayout {
    /// Parser for a ground-truth file: CSV files go through the header schema,
    /// everything else is read as positional TUM columns.
    pub fn ground_truth_layout(&self, path: &Path) -> SourceLayout {
        let is_csv = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv {
            SourceLayout::Csv(CsvSchema::from_table(
                &format!("{} ground truth", self.family),
                self.ground_truth_columns,
            ))
        } else {
            SourceLayout::Tum
        }
    }
}

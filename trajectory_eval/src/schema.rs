//! Declarative column schemas for CSV pose logs.
//!
//! Each logical pose field has an ordered list of candidate substrings. A
//! header cell matches a candidate when its normalized text (lowercase, no
//! whitespace, no bracketed unit) contains it. Supporting a new log layout is
//! a new candidate table, not new parsing code.

use anyhow::{bail, Result};

/// Logical pose fields, in the order they are stored in a [`ColumnMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseField {
    Tx,
    Ty,
    Tz,
    Qx,
    Qy,
    Qz,
    Qw,
}

impl PoseField {
    pub const ALL: [PoseField; 7] = [
        PoseField::Tx,
        PoseField::Ty,
        PoseField::Tz,
        PoseField::Qx,
        PoseField::Qy,
        PoseField::Qz,
        PoseField::Qw,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Candidate table for the EuRoC / ASL `state_groundtruth_estimate0/data.csv` log.
pub const EUROC_GROUND_TRUTH: &[(PoseField, &[&str])] = &[
    (PoseField::Tx, &["p_rs_r_x", "position_x", "pos_x", "p_x", "tx"]),
    (PoseField::Ty, &["p_rs_r_y", "position_y", "pos_y", "p_y", "ty"]),
    (PoseField::Tz, &["p_rs_r_z", "position_z", "pos_z", "p_z", "tz"]),
    (PoseField::Qx, &["q_rs_x", "orientation_x", "quat_x", "q_x", "qx"]),
    (PoseField::Qy, &["q_rs_y", "orientation_y", "quat_y", "q_y", "qy"]),
    (PoseField::Qz, &["q_rs_z", "orientation_z", "quat_z", "q_z", "qz"]),
    (PoseField::Qw, &["q_rs_w", "orientation_w", "quat_w", "q_w", "qw"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field: PoseField,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvSchema {
    pub name: String,
    /// Column holding the timestamp (the first column for every known log).
    pub timestamp_column: usize,
    pub rules: Vec<FieldRule>,
}

/// Resolved column indices for one header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub timestamp: usize,
    /// Column of tx, ty, tz, qx, qy, qz, qw.
    pub fields: [usize; 7],
}

impl CsvSchema {
    pub fn from_table(name: &str, table: &[(PoseField, &[&str])]) -> Self {
        CsvSchema {
            name: name.to_string(),
            timestamp_column: 0,
            rules: table
                .iter()
                .map(|(field, candidates)| FieldRule {
                    field: *field,
                    candidates: candidates.iter().map(|c| normalize_header(c)).collect(),
                })
                .collect(),
        }
    }

    pub fn euroc_ground_truth() -> Self {
        Self::from_table("euroc", EUROC_GROUND_TRUTH)
    }

    /// Locate every pose field in an already normalized header row.
    pub fn resolve(&self, columns: &[String]) -> Result<ColumnMap> {
        if self.timestamp_column >= columns.len() {
            bail!(
                "[{}] header has {} columns, timestamp expected in column {}",
                self.name,
                columns.len(),
                self.timestamp_column
            );
        }

        let mut fields: [Option<usize>; 7] = [None; 7];
        let mut taken = vec![false; columns.len()];
        taken[self.timestamp_column] = true;

        for rule in &self.rules {
            let found = rule.candidates.iter().find_map(|candidate| {
                columns
                    .iter()
                    .enumerate()
                    .find(|(idx, col)| !taken[*idx] && col.contains(candidate.as_str()))
                    .map(|(idx, _)| idx)
            });
            if let Some(idx) = found {
                taken[idx] = true;
                fields[rule.field.slot()] = Some(idx);
            }
        }

        let mut resolved = [0usize; 7];
        for field in PoseField::ALL {
            match fields[field.slot()] {
                Some(idx) => resolved[field.slot()] = idx,
                None => bail!("[{}] no column found for {:?} in header {:?}", self.name, field, columns),
            }
        }

        Ok(ColumnMap { timestamp: self.timestamp_column, fields: resolved })
    }
}

/// Lowercase, strip bracketed units and all whitespace.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && !c.is_whitespace() && c != '#' => out.extend(c.to_lowercase()),
            _ => {}
        }
    }
    out
}

//! Timestamp unit handling.
//!
//! Trajectory sources disagree on the unit of their first column: the VO
//! engine may write seconds or nanoseconds depending on the dataset player,
//! EuRoC logs are in nanoseconds and TUM logs in seconds. Everything is
//! converted to seconds before association.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::Float;

/// Values above this are read as nanoseconds by [`TimestampUnit::Auto`].
pub const NANOSECONDS_THRESHOLD: Float = 1e12;

/// Values above this (and not above [`NANOSECONDS_THRESHOLD`]) are read as microseconds.
pub const MICROSECONDS_THRESHOLD: Float = 1e6;

/// Unit hint attached to a trajectory source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    /// Infer the unit from the magnitude of each value.
    #[default]
    Auto,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimestampUnit {
    /// Unit implied by the magnitude of `value`.
    ///
    /// Never returns `Auto` or `Milliseconds`: the magnitude alone cannot
    /// tell milliseconds apart from the other units.
    pub fn infer(value: Float) -> Self {
        if value > NANOSECONDS_THRESHOLD {
            TimestampUnit::Nanoseconds
        } else if value > MICROSECONDS_THRESHOLD {
            TimestampUnit::Microseconds
        } else {
            TimestampUnit::Seconds
        }
    }

    /// Divisor that turns a value in this unit into seconds.
    pub fn divisor(self) -> Float {
        match self {
            TimestampUnit::Auto | TimestampUnit::Seconds => 1.0,
            TimestampUnit::Milliseconds => 1e3,
            TimestampUnit::Microseconds => 1e6,
            TimestampUnit::Nanoseconds => 1e9,
        }
    }

    /// Convert `value` to seconds.
    pub fn to_seconds(self, value: Float) -> Float {
        match self {
            TimestampUnit::Auto => normalize_unit(value),
            unit => value / unit.divisor(),
        }
    }
}

/// Convert a timestamp of unknown unit to seconds using the magnitude rule.
pub fn normalize_unit(value: Float) -> Float {
    value / TimestampUnit::infer(value).divisor()
}

impl FromStr for TimestampUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TimestampUnit::Auto),
            "s" | "sec" | "seconds" => Ok(TimestampUnit::Seconds),
            "ms" | "milliseconds" => Ok(TimestampUnit::Milliseconds),
            "us" | "microseconds" => Ok(TimestampUnit::Microseconds),
            "ns" | "nanoseconds" => Ok(TimestampUnit::Nanoseconds),
            other => Err(format!("unknown timestamp unit '{}'", other)),
        }
    }
}

impl fmt::Display for TimestampUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimestampUnit::Auto => "auto",
            TimestampUnit::Seconds => "seconds",
            TimestampUnit::Milliseconds => "milliseconds",
            TimestampUnit::Microseconds => "microseconds",
            TimestampUnit::Nanoseconds => "nanoseconds",
        };
        write!(f, "{}", name)
    }
}

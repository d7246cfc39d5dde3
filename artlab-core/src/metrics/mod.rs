//! Derived metrics: frame-difference curves, spline shape descriptors and
//! session-level statistics.

pub mod aggregate;
pub mod dsp;
pub mod mse;
pub mod pd;
pub mod shape;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Frame-difference norms accepted by the difference metrics.
///
/// `l1` through `l10` and `l_inf`; `l2` is the primary norm.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Norm {
    P(u32),
    Inf,
}

impl Norm {
    pub const L1: Norm = Norm::P(1);
    pub const L2: Norm = Norm::P(2);

    /// Largest accepted finite order.
    const MAX_P: u32 = 10;
}

impl fmt::Display for Norm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Norm::P(p) => write!(f, "l{p}"),
            Norm::Inf => write!(f, "l_inf"),
        }
    }
}

impl FromStr for Norm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ValidationError::UnknownNorm {
            norm: s.to_string(),
        };

        match s {
            "inf" | "l_inf" => Ok(Norm::Inf),
            _ => {
                let digits = s.strip_prefix('l').ok_or_else(unknown)?;
                let p: u32 = digits.parse().map_err(|_| unknown())?;
                if (1..=Norm::MAX_P).contains(&p) {
                    Ok(Norm::P(p))
                } else {
                    Err(unknown())
                }
            }
        }
    }
}

impl From<Norm> for String {
    fn from(norm: Norm) -> Self {
        norm.to_string()
    }
}

impl TryFrom<String> for Norm {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Row mask limiting a difference metric to one half of each image frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMask {
    /// First half of the rows of each frame
    Top,
    /// Second half of the rows of each frame
    Bottom,
}

impl fmt::Display for ImageMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageMask::Top => write!(f, "top"),
            ImageMask::Bottom => write!(f, "bottom"),
        }
    }
}

/// Shared name format of the derived metrics.
///
/// `"{PREFIX} {metric}[ ts{timestep}][ {mask}] on {parent}[ downsampled by
/// {ratio}]"`, with an `Interpolated` prefix when the metric was requested on
/// interpolated images. This one function defines the names; anything that
/// needs to guess a derived modality's name goes through the parameter
/// structs calling it.
pub(crate) fn format_metric_name(
    prefix: &str,
    metric: &str,
    timestep: usize,
    mask: Option<ImageMask>,
    interpolated: bool,
    parent_name: &str,
    downsampling_ratio: Option<u32>,
) -> String {
    let mut name = format!("{prefix} {metric}");

    if timestep != 1 {
        name.push_str(&format!(" ts{timestep}"));
    }
    if let Some(mask) = mask {
        name.push_str(&format!(" {mask}"));
    }

    name = if interpolated {
        format!("Interpolated {name} on {parent_name}")
    } else {
        format!("{name} on {parent_name}")
    };

    if let Some(ratio) = downsampling_ratio {
        name.push_str(&format!(" downsampled by {ratio}"));
    }

    name
}

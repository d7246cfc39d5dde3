//! Sessions: ordered recordings from one data-collection run plus
//! session-level statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::data::Recording;
use crate::error::{Result, ValidationError};

/// Source a session's recordings were produced by.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Articulate Assistant Advanced directory export
    Aaa,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Aaa => write!(f, "aaa"),
        }
    }
}

/// Identity of a time-independent statistic.
///
/// Statistic names share the naming scheme of derived modalities and must be
/// unique within their owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum StatisticKind {
    /// Per-recording reduction of a modality's frames into one image
    AggregateImage {
        parent_name: String,
        operation: String,
    },
    /// Session-level pairwise distances between recordings
    DistanceMatrix {
        parent_name: String,
        metric: String,
    },
}

impl StatisticKind {
    /// Generate the statistic name; pure in the parameters.
    pub fn name(&self) -> String {
        match self {
            StatisticKind::AggregateImage {
                parent_name,
                operation,
            } => format!("AggregateImage {operation} on {parent_name}"),
            StatisticKind::DistanceMatrix {
                parent_name,
                metric,
            } => format!("DistanceMatrix {metric} on {parent_name}"),
        }
    }
}

/// Time-independent data computed over a container's members.
///
/// Statistics are computed eagerly; unlike modalities they have no lazy
/// loading path.
#[derive(Clone, Debug)]
pub struct Statistic {
    kind: StatisticKind,
    data: ArrayD<f64>,
}

impl Statistic {
    pub fn new(kind: StatisticKind, data: ArrayD<f64>) -> Self {
        Self { kind, data }
    }

    pub fn name(&self) -> String {
        self.kind.name()
    }

    pub fn kind(&self) -> &StatisticKind {
        &self.kind
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }
}

/// Shared statistic-map insert for recordings and sessions.
pub(crate) fn add_statistic(
    statistics: &mut BTreeMap<String, Statistic>,
    statistic: Statistic,
    replace: bool,
) -> Result<()> {
    let name = statistic.name();
    if statistics.contains_key(&name) && !replace {
        return Err(ValidationError::DuplicateStatistic { name }.into());
    }
    if statistics.insert(name.clone(), statistic).is_some() {
        tracing::debug!(statistic = %name, "replaced statistic");
    } else {
        tracing::debug!(statistic = %name, "added statistic");
    }
    Ok(())
}

/// An ordered collection of recordings sharing a data source and directory.
#[derive(Clone, Debug)]
pub struct Session {
    name: String,
    path: PathBuf,
    data_source: DataSource,
    recordings: Vec<Recording>,
    statistics: BTreeMap<String, Statistic>,
}

impl Session {
    /// Build a session; recordings are ordered by recording time.
    pub fn new(
        name: String,
        path: PathBuf,
        data_source: DataSource,
        mut recordings: Vec<Recording>,
    ) -> Self {
        recordings.sort_by_key(|r| r.meta_data().time_of_recording);
        Self {
            name,
            path,
            data_source,
            recordings,
            statistics: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_source(&self) -> DataSource {
        self.data_source
    }

    /// All recordings, excluded ones included.
    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn recordings_mut(&mut self) -> &mut [Recording] {
        &mut self.recordings
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    /// Add a session-level statistic under its generated name.
    ///
    /// # Errors
    ///
    /// Rejects duplicates unless `replace` is set.
    pub fn add_statistic(&mut self, statistic: Statistic, replace: bool) -> Result<()> {
        add_statistic(&mut self.statistics, statistic, replace)
    }

    pub fn statistic(&self, name: &str) -> Option<&Statistic> {
        self.statistics.get(name)
    }

    pub fn statistics(&self) -> impl Iterator<Item = &Statistic> {
        self.statistics.values()
    }
}

impl<'a> IntoIterator for &'a Session {
    type Item = &'a Recording;
    type IntoIter = std::slice::Iter<'a, Recording>;

    fn into_iter(self) -> Self::IntoIter {
        self.recordings.iter()
    }
}

//! On-disk record shapes and naming for the persistence layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};

use crate::data::{DataSource, ModalityKind, RecordingMetaData, StatisticKind};
use crate::error::{Result, StoreError};

/// Format version embedded in every persisted record.
pub const FILE_VERSION: &str = "1.0";

/// Suffix of binary sample-data files.
pub const DATA_SUFFIX: &str = ".artlab_data";

/// Suffix of JSON metadata sidecar files.
pub const META_SUFFIX: &str = ".artlab_meta";

pub const OBJECT_MODALITY: &str = "Modality";
pub const OBJECT_STATISTIC: &str = "Statistic";
pub const OBJECT_RECORDING: &str = "Recording";
pub const OBJECT_SESSION: &str = "Session";

/// Filenames derive deterministically from generated names: spaces become
/// underscores, and a fixed suffix marks the artifact kind.
pub fn underscored(name: &str) -> String {
    name.replace(' ', "_")
}

/// Reject records whose format version this reader does not recognize.
pub fn check_version(version: &str, path: &Path) -> Result<()> {
    const KNOWN_VERSIONS: &[&str] = &[FILE_VERSION];
    if KNOWN_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(StoreError::UnsupportedVersion {
            version: version.to_string(),
            path: path.to_path_buf(),
        }
        .into())
    }
}

pub fn check_object_type(object_type: &str, expected: &str, path: &Path) -> Result<()> {
    if object_type == expected {
        Ok(())
    } else {
        Err(StoreError::UnexpectedObjectType {
            object_type: object_type.to_string(),
            path: path.to_path_buf(),
        }
        .into())
    }
}

/// Reference from a container's metadata to one child's files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingEntry {
    pub data_name: String,
    pub meta_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModalityParameters {
    pub kind: ModalityKind,
    pub time_offset: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModalitySchema {
    pub object_type: String,
    pub name: String,
    pub format_version: String,
    pub parameters: ModalityParameters,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatisticSchema {
    pub object_type: String,
    pub name: String,
    pub format_version: String,
    pub parameters: StatisticKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingParameters {
    pub meta_data: RecordingMetaData,
    pub excluded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingSchema {
    pub object_type: String,
    pub name: String,
    pub format_version: String,
    pub parameters: RecordingParameters,
    pub modalities: BTreeMap<String, ListingEntry>,
    pub statistics: BTreeMap<String, ListingEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionParameters {
    pub path: PathBuf,
    pub data_source: DataSource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSchema {
    pub object_type: String,
    pub name: String,
    pub format_version: String,
    pub parameters: SessionParameters,
    pub recordings: Vec<String>,
    pub statistics: BTreeMap<String, ListingEntry>,
}

/// Binary payload of one modality's sample data.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModalityDataFile {
    pub samples: ArrayD<f32>,
    pub sampling_rate: f64,
    pub timevector: Array1<f64>,
}

/// Binary payload of one statistic.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatisticDataFile {
    pub data: ArrayD<f64>,
}

//! Recordings: one trial's modalities plus metadata.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::data::modality::{Modality, ModalityKind};
use crate::data::session::{Statistic, add_statistic};
use crate::data::ModalityData;
use crate::error::{Error, Result, UnsupportedOperation, ValidationError};
use crate::{import, metrics, store};

/// Date-time rendering used in vendor exports and recording identifiers.
pub const EXPORT_DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Stable key matching externally produced per-recording files (such as a
/// batch spline export) to the right recording.
pub fn identifier_for(prompt: &str, time: &NaiveDateTime) -> String {
    format!("{} {}", prompt, time.format(EXPORT_DATETIME_FORMAT))
}

/// Metadata of one recorded trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetaData {
    pub participant_id: String,
    pub prompt: String,
    pub time_of_recording: NaiveDateTime,
    /// File stem shared by the recording's companion files
    pub basename: String,
    /// Directory holding the recorded files
    pub path: PathBuf,
}

/// One trial's full set of modalities plus metadata.
///
/// Modalities are keyed by their generated names; keys are unique and a
/// repeated attach replaces the previous holder of the name.
#[derive(Clone, Debug)]
pub struct Recording {
    meta: RecordingMetaData,
    excluded: bool,
    modalities: BTreeMap<String, Modality>,
    statistics: BTreeMap<String, Statistic>,
}

impl Recording {
    pub fn new(meta: RecordingMetaData) -> Self {
        Self {
            meta,
            excluded: false,
            modalities: BTreeMap::new(),
            statistics: BTreeMap::new(),
        }
    }

    pub fn meta_data(&self) -> &RecordingMetaData {
        &self.meta
    }

    pub fn identifier(&self) -> String {
        identifier_for(&self.meta.prompt, &self.meta.time_of_recording)
    }

    /// Excluded recordings stay in the session for transparency but are
    /// skipped by metric computation and aggregation.
    pub fn excluded(&self) -> bool {
        self.excluded
    }

    pub fn set_excluded(&mut self, excluded: bool) {
        self.excluded = excluded;
    }

    /// Mark excluded and log why.
    pub fn exclude(&mut self, reason: &str) {
        tracing::warn!(recording = %self.meta.basename, reason, "recording excluded");
        self.excluded = true;
    }

    /// Attach a modality under its generated name. Last write wins.
    pub fn add_modality(&mut self, modality: Modality) {
        let name = modality.name();
        if self.modalities.insert(name.clone(), modality).is_some() {
            tracing::debug!(recording = %self.meta.basename, modality = %name, "replaced modality");
        } else {
            tracing::debug!(recording = %self.meta.basename, modality = %name, "added modality");
        }
    }

    pub fn modality(&self, name: &str) -> Option<&Modality> {
        self.modalities.get(name)
    }

    pub fn modality_mut(&mut self, name: &str) -> Option<&mut Modality> {
        self.modalities.get_mut(name)
    }

    pub fn modalities(&self) -> impl Iterator<Item = &Modality> {
        self.modalities.values()
    }

    pub fn modality_names(&self) -> impl Iterator<Item = &str> {
        self.modalities.keys().map(String::as_str)
    }

    /// Populate the named modality's data if it is not currently loaded.
    ///
    /// A persisted data file is preferred; otherwise raw modalities re-read
    /// their source file and derived modalities recompute from their
    /// parent's data (loading the parent first when needed).
    ///
    /// # Errors
    ///
    /// Fails for unknown names, for eager-only metrics with no persisted
    /// file, and for batch-imported splines that have never been saved.
    pub fn ensure_loaded(&mut self, name: &str) -> Result<()> {
        let (loaded, load_path, kind) = {
            let modality =
                self.modalities
                    .get(name)
                    .ok_or_else(|| ValidationError::UnknownModality {
                        name: name.to_string(),
                    })?;
            (
                modality.is_loaded(),
                modality.load_path().map(PathBuf::from),
                modality.kind().clone(),
            )
        };
        if loaded {
            return Ok(());
        }

        if let Some(path) = load_path {
            let data = store::read_modality_data(&path)?;
            self.set_modality_data(name, data);
            tracing::debug!(recording = %self.meta.basename, modality = name, "loaded persisted data");
            return Ok(());
        }

        match kind {
            ModalityKind::RawUltrasound { meta } => {
                let (path, offset) = self.recorded_source(name)?;
                let data = import::ultrasound::read_ult(&path, &meta, offset)?;
                self.set_modality_data(name, data);
            }
            ModalityKind::Audio => {
                let (path, offset) = self.recorded_source(name)?;
                let data = import::audio::read_wav(&path, offset)?;
                self.set_modality_data(name, data);
            }
            ModalityKind::Splines { .. } => {
                return Err(UnsupportedOperation::NotReloadable {
                    name: name.to_string(),
                }
                .into());
            }
            ModalityKind::Mse { .. } => {
                return Err(UnsupportedOperation::EagerOnly {
                    name: name.to_string(),
                }
                .into());
            }
            ModalityKind::PixelDifference { params } => {
                self.ensure_loaded(&params.parent_name)?;
                let data = {
                    let parent = self.loaded(&params.parent_name)?;
                    metrics::pd::derive(parent, &params)?
                };
                self.set_modality_data(name, data);
                tracing::debug!(recording = %self.meta.basename, modality = name, "re-derived");
            }
            ModalityKind::SplineMetric { params } => {
                let spline_meta = match self
                    .modality(&params.parent_name)
                    .ok_or_else(|| ValidationError::UnknownModality {
                        name: params.parent_name.clone(),
                    })?
                    .kind()
                {
                    ModalityKind::Splines { meta } => meta.clone(),
                    _ => {
                        return Err(ValidationError::NotSplines {
                            name: params.parent_name.clone(),
                        }
                        .into());
                    }
                };
                self.ensure_loaded(&params.parent_name)?;
                let data = {
                    let parent = self.loaded(&params.parent_name)?;
                    metrics::shape::derive(parent, &spline_meta, &params)?
                };
                self.set_modality_data(name, data);
                tracing::debug!(recording = %self.meta.basename, modality = name, "re-derived");
            }
        }

        Ok(())
    }

    /// Ensure the named modality is loaded and borrow its data.
    pub fn loaded_data(&mut self, name: &str) -> Result<&ModalityData> {
        self.ensure_loaded(name)?;
        self.loaded(name)
    }

    /// Release the named modality's sample data to free memory.
    ///
    /// Callers are responsible for scoping this after every dependent of the
    /// modality has consumed it; re-access re-reads or re-derives.
    pub fn release(&mut self, name: &str) -> Result<()> {
        let modality =
            self.modalities
                .get_mut(name)
                .ok_or_else(|| ValidationError::UnknownModality {
                    name: name.to_string(),
                })?;
        modality.release();
        Ok(())
    }

    /// Add a per-recording statistic under its generated name.
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

    fn loaded(&self, name: &str) -> Result<&ModalityData> {
        self.modalities
            .get(name)
            .and_then(Modality::data)
            .ok_or_else(|| {
                ValidationError::UnknownModality {
                    name: name.to_string(),
                }
                .into()
            })
    }

    fn set_modality_data(&mut self, name: &str, data: ModalityData) {
        if let Some(modality) = self.modalities.get_mut(name) {
            modality.set_data(data);
        }
    }

    fn recorded_source(&self, name: &str) -> Result<(PathBuf, f64)> {
        let modality = self
            .modalities
            .get(name)
            .ok_or_else(|| ValidationError::UnknownModality {
                name: name.to_string(),
            })?;
        let path = modality
            .data_path()
            .map(PathBuf::from)
            .ok_or_else(|| Error::MissingFile {
                path: self.meta.path.join(&self.meta.basename),
            })?;
        Ok((path, modality.time_offset()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    use crate::data::ModalityData;
    use crate::error::Error;

    fn test_meta() -> RecordingMetaData {
        RecordingMetaData {
            participant_id: "P1".to_string(),
            prompt: "call mother".to_string(),
            time_of_recording: NaiveDate::from_ymd_opt(2024, 3, 14)
                .unwrap()
                .and_hms_opt(10, 30, 15)
                .unwrap(),
            basename: "File001".to_string(),
            path: PathBuf::from("/data/session1"),
        }
    }

    fn audio_modality() -> Modality {
        let samples = array![0.0_f32, 0.5, 1.0].into_dyn();
        let data = ModalityData::with_time_offset(samples, 100.0, 0.0).unwrap();
        Modality::with_data(ModalityKind::Audio, data)
    }

    #[test]
    fn identifier_joins_prompt_and_export_time() {
        let recording = Recording::new(test_meta());
        assert_eq!(recording.identifier(), "call mother 14/03/2024 10:30:15");
    }

    #[test]
    fn add_modality_is_last_write_wins() {
        let mut recording = Recording::new(test_meta());
        recording.add_modality(audio_modality());

        let replacement_samples = array![9.0_f32, 9.0].into_dyn();
        let replacement =
            ModalityData::with_time_offset(replacement_samples, 50.0, 0.0).unwrap();
        recording.add_modality(Modality::with_data(ModalityKind::Audio, replacement));

        assert_eq!(recording.modalities().count(), 1);
        let data = recording.modality("Audio").unwrap().data().unwrap();
        assert_eq!(data.frames(), 2);
    }

    #[test]
    fn ensure_loaded_on_unknown_name_fails() {
        let mut recording = Recording::new(test_meta());
        assert!(matches!(
            recording.ensure_loaded("PD l2 on RawUltrasound"),
            Err(Error::Validation(ValidationError::UnknownModality { .. }))
        ));
    }

    #[test]
    fn released_splines_are_not_reloadable_without_a_save() {
        use crate::data::{Coordinates, SplineMetadata};
        use ndarray::Array3;

        let mut recording = Recording::new(test_meta());
        let meta = SplineMetadata {
            coordinates: Coordinates::Cartesian,
            sample_points: 3,
            confidence_exists: false,
        };
        let samples = Array3::<f32>::zeros((2, 2, 3)).into_dyn();
        let data = ModalityData::with_time_offset(samples, 10.0, 0.0).unwrap();
        recording.add_modality(Modality::with_data(ModalityKind::Splines { meta }, data));

        recording.release("Splines").unwrap();

        assert!(matches!(
            recording.ensure_loaded("Splines"),
            Err(Error::Unsupported(UnsupportedOperation::NotReloadable { .. }))
        ));
    }
}

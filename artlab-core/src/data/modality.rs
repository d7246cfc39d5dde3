//! Modalities: raw or derived time-aligned data streams of a recording.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::data::{Coordinates, ModalityData};
use crate::error::{Result, UnsupportedOperation};
use crate::metrics::mse::MseParameters;
use crate::metrics::pd::PdParameters;
use crate::metrics::shape::SplineMetricParameters;

/// Vendor metadata required to decode a raw ultrasound file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UltrasoundMetadata {
    /// Number of scanlines per frame
    pub scanlines: usize,
    /// Number of pixels along one scanline
    pub pixels_per_scanline: usize,
    /// Frame rate of the recording
    pub frames_per_sec: f64,
    /// Offset of the first frame against the recording baseline, in seconds
    pub time_of_first_frame: f64,
}

/// Shape of the contour data held by a Splines modality.
///
/// Spline samples have shape `(frames, channels, points)` where the first
/// two channels are `r, phi` (polar) or `x, y` (cartesian) and an optional
/// third channel holds per-point confidence values normalized to `[0, 1]`.
/// The point count is fixed per file; variable point counts are rejected at
/// import.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplineMetadata {
    pub coordinates: Coordinates,
    pub sample_points: usize,
    pub confidence_exists: bool,
}

impl SplineMetadata {
    /// Contour coordinates in the cartesian system.
    ///
    /// Polar contours are converted with `x = r·sin(φ)`, `y = r·cos(φ)`; a
    /// confidence channel is carried through unchanged.
    pub fn in_cartesian(&self, samples: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self.coordinates {
            Coordinates::Cartesian => Ok(samples.clone()),
            Coordinates::Polar => {
                let mut converted = samples.clone();
                for mut frame in converted.outer_iter_mut() {
                    for point in 0..self.sample_points {
                        let r = frame[[0, point]];
                        let phi = frame[[1, point]];
                        frame[[0, point]] = r * phi.sin();
                        frame[[1, point]] = r * phi.cos();
                    }
                }
                Ok(converted)
            }
        }
    }

    /// Contour coordinates in the polar system.
    pub fn in_polar(&self, samples: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self.coordinates {
            Coordinates::Polar => Ok(samples.clone()),
            Coordinates::Cartesian => Err(UnsupportedOperation::CoordinateConversion {
                from: Coordinates::Cartesian.to_string(),
                to: Coordinates::Polar.to_string(),
            }
            .into()),
        }
    }
}

/// Closed set of modality variants.
///
/// Raw variants read their data from a recording-specific file; derived
/// variants compute it from a named parent modality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ModalityKind {
    RawUltrasound { meta: UltrasoundMetadata },
    Audio,
    Splines { meta: SplineMetadata },
    PixelDifference { params: PdParameters },
    Mse { params: MseParameters },
    SplineMetric { params: SplineMetricParameters },
}

impl ModalityKind {
    /// Unique name of a modality of this kind.
    ///
    /// For derived kinds the name is a pure function of the derivation
    /// parameters, so callers can predict it before constructing anything.
    pub fn name(&self) -> String {
        match self {
            ModalityKind::RawUltrasound { .. } => "RawUltrasound".to_string(),
            ModalityKind::Audio => "Audio".to_string(),
            ModalityKind::Splines { .. } => "Splines".to_string(),
            ModalityKind::PixelDifference { params } => params.name(),
            ModalityKind::Mse { params } => params.name(),
            ModalityKind::SplineMetric { params } => params.name(),
        }
    }

    /// Name of the modality this kind derives from, if any.
    pub fn parent_name(&self) -> Option<&str> {
        match self {
            ModalityKind::RawUltrasound { .. } | ModalityKind::Audio | ModalityKind::Splines { .. } => {
                None
            }
            ModalityKind::PixelDifference { params } => Some(&params.parent_name),
            ModalityKind::Mse { params } => Some(&params.parent_name),
            ModalityKind::SplineMetric { params } => Some(&params.parent_name),
        }
    }

    pub fn is_derived(&self) -> bool {
        self.parent_name().is_some()
    }

    /// Derived kinds that must be computed when attached and refuse lazy
    /// re-derivation (a persisted data file can still be reloaded).
    pub fn eager_only(&self) -> bool {
        matches!(self, ModalityKind::Mse { .. })
    }
}

/// Data lifecycle of a modality.
///
/// Transitions only go through [`Modality::set_data`], [`Modality::release`]
/// and `Recording::ensure_loaded`; re-access after release re-reads or
/// re-derives, never returns stale data.
#[derive(Clone, Debug, Default)]
pub enum DataState {
    #[default]
    Unloaded,
    Loaded(ModalityData),
    Released,
}

/// One time-aligned data stream belonging to a recording.
#[derive(Clone, Debug)]
pub struct Modality {
    kind: ModalityKind,
    data_path: Option<PathBuf>,
    load_path: Option<PathBuf>,
    time_offset: f64,
    state: DataState,
}

impl Modality {
    /// Construct with metadata only; sample data is populated on first
    /// access.
    pub fn new(kind: ModalityKind, data_path: Option<PathBuf>, time_offset: f64) -> Self {
        Self {
            kind,
            data_path,
            load_path: None,
            time_offset,
            state: DataState::Unloaded,
        }
    }

    /// Construct preloaded, as import adapters and eager derivations do.
    pub fn with_data(kind: ModalityKind, data: ModalityData) -> Self {
        let time_offset = data.timevector().first().copied().unwrap_or(0.0);
        Self {
            kind,
            data_path: None,
            load_path: None,
            time_offset,
            state: DataState::Loaded(data),
        }
    }

    pub fn name(&self) -> String {
        self.kind.name()
    }

    pub fn kind(&self) -> &ModalityKind {
        &self.kind
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    pub fn load_path(&self) -> Option<&Path> {
        self.load_path.as_deref()
    }

    /// Record where this modality's persisted data file lives.
    pub fn set_load_path(&mut self, path: PathBuf) {
        self.load_path = Some(path);
    }

    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Currently cached data, if loaded.
    pub fn data(&self) -> Option<&ModalityData> {
        match &self.state {
            DataState::Loaded(data) => Some(data),
            DataState::Unloaded | DataState::Released => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, DataState::Loaded(_))
    }

    pub fn is_released(&self) -> bool {
        matches!(self.state, DataState::Released)
    }

    /// Overwrite the cached data.
    pub fn set_data(&mut self, data: ModalityData) {
        self.state = DataState::Loaded(data);
    }

    /// Drop the cached sample array to free memory.
    ///
    /// A no-op on an unloaded modality. Re-access after release goes back
    /// through reading or derivation.
    pub fn release(&mut self) {
        if self.is_loaded() {
            tracing::debug!(modality = %self.name(), "releasing sample data");
            self.state = DataState::Released;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    use crate::error::Error;

    fn spline_meta(coordinates: Coordinates) -> SplineMetadata {
        SplineMetadata {
            coordinates,
            sample_points: 2,
            confidence_exists: false,
        }
    }

    #[test]
    fn release_is_one_way_until_reload() {
        let samples = array![[1.0_f32, 2.0], [3.0, 4.0]].into_dyn();
        let data = ModalityData::with_time_offset(samples, 10.0, 0.0).unwrap();
        let mut modality = Modality::with_data(ModalityKind::Audio, data);

        assert!(modality.is_loaded());
        modality.release();
        assert!(modality.is_released());
        assert!(modality.data().is_none());
    }

    #[test]
    fn release_on_unloaded_is_noop() {
        let mut modality = Modality::new(ModalityKind::Audio, None, 0.0);
        modality.release();
        assert!(!modality.is_released());
    }

    #[test]
    fn polar_contours_convert_to_cartesian() {
        let meta = spline_meta(Coordinates::Polar);
        // r = 2 at phi = 0 and phi = pi/2
        let samples = Array3::from_shape_vec(
            (1, 2, 2),
            vec![2.0_f32, 2.0, 0.0, std::f32::consts::FRAC_PI_2],
        )
        .unwrap()
        .into_dyn();

        let cartesian = meta.in_cartesian(&samples).unwrap();

        // phi = 0 points straight up: x = 0, y = r
        assert!((cartesian[[0, 0, 0]] - 0.0).abs() < 1e-6);
        assert!((cartesian[[0, 1, 0]] - 2.0).abs() < 1e-6);
        // phi = pi/2 points sideways: x = r, y = 0
        assert!((cartesian[[0, 0, 1]] - 2.0).abs() < 1e-6);
        assert!((cartesian[[0, 1, 1]].abs()) < 1e-6);
    }

    #[test]
    fn cartesian_to_polar_is_unsupported() {
        let meta = spline_meta(Coordinates::Cartesian);
        let samples = Array3::<f32>::zeros((1, 2, 2)).into_dyn();

        let result = meta.in_polar(&samples);

        assert!(matches!(
            result,
            Err(Error::Unsupported(
                UnsupportedOperation::CoordinateConversion { .. }
            ))
        ));
    }
}

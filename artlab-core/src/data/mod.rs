//! Core data structures: sample arrays, modalities, recordings and sessions.

pub mod modality;
pub mod recording;
pub mod session;

pub use modality::{DataState, Modality, ModalityKind, SplineMetadata, UltrasoundMetadata};
pub use recording::{Recording, RecordingMetaData};
pub use session::{DataSource, Session, Statistic, StatisticKind};

use std::fmt;

use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Coordinate system of spline contour data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coordinates {
    Polar,
    Cartesian,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinates::Polar => write!(f, "polar"),
            Coordinates::Cartesian => write!(f, "cartesian"),
        }
    }
}

/// Time-aligned sample data of one modality.
///
/// Axis 0 of `samples` is always the frame axis; `timevector` holds one
/// timestamp per frame. A `sampling_rate` of 0 marks an irregular series
/// whose frame rate must not be trusted downstream.
#[derive(Clone, Debug)]
pub struct ModalityData {
    samples: ArrayD<f32>,
    sampling_rate: f64,
    timevector: Array1<f64>,
}

impl ModalityData {
    /// Build from an explicit timevector.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the timevector length does not match
    /// the frame count, the timevector decreases anywhere, or the sampling
    /// rate is negative.
    pub fn new(samples: ArrayD<f32>, sampling_rate: f64, timevector: Array1<f64>) -> Result<Self> {
        if sampling_rate < 0.0 {
            return Err(ValidationError::NegativeSamplingRate {
                rate: sampling_rate,
            }
            .into());
        }

        let frames = samples.shape().first().copied().unwrap_or(0);
        if timevector.len() != frames {
            return Err(ValidationError::TimevectorLength {
                frames,
                timestamps: timevector.len(),
            }
            .into());
        }

        if let Some(index) = (1..timevector.len()).find(|&i| timevector[i] < timevector[i - 1]) {
            return Err(ValidationError::DecreasingTimevector { index }.into());
        }

        Ok(Self {
            samples,
            sampling_rate,
            timevector,
        })
    }

    /// Build from a scalar time offset, deriving a regular timevector
    /// `i / sampling_rate + time_offset`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the sampling rate is not positive;
    /// an irregular series cannot be given a regular timevector.
    pub fn with_time_offset(
        samples: ArrayD<f32>,
        sampling_rate: f64,
        time_offset: f64,
    ) -> Result<Self> {
        if sampling_rate <= 0.0 {
            return Err(ValidationError::NonPositiveSamplingRate {
                rate: sampling_rate,
            }
            .into());
        }

        let frames = samples.shape().first().copied().unwrap_or(0);
        let timevector =
            Array1::from_iter((0..frames).map(|i| i as f64 / sampling_rate + time_offset));

        Self::new(samples, sampling_rate, timevector)
    }

    pub fn samples(&self) -> &ArrayD<f32> {
        &self.samples
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn timevector(&self) -> &Array1<f64> {
        &self.timevector
    }

    /// Number of frames (length of axis 0).
    pub fn frames(&self) -> usize {
        self.samples.shape().first().copied().unwrap_or(0)
    }

    /// Decompose into raw parts for persistence.
    pub fn into_parts(self) -> (ArrayD<f32>, f64, Array1<f64>) {
        (self.samples, self.sampling_rate, self.timevector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    use crate::error::Error;

    #[test]
    fn accepts_matching_timevector() {
        let samples = Array2::<f32>::zeros((3, 4)).into_dyn();
        let data = ModalityData::new(samples, 10.0, array![0.0, 0.1, 0.2]).unwrap();

        assert_eq!(data.frames(), 3);
        assert!((data.sampling_rate() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_wrong_timevector_length() {
        let samples = Array2::<f32>::zeros((3, 4)).into_dyn();
        let result = ModalityData::new(samples, 10.0, array![0.0, 0.1]);

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::TimevectorLength { .. }))
        ));
    }

    #[test]
    fn rejects_decreasing_timevector() {
        let samples = Array2::<f32>::zeros((3, 4)).into_dyn();
        let result = ModalityData::new(samples, 10.0, array![0.0, 0.2, 0.1]);

        assert!(matches!(
            result,
            Err(Error::Validation(
                ValidationError::DecreasingTimevector { index: 2 }
            ))
        ));
    }

    #[test]
    fn allows_repeated_timestamps() {
        // Non-decreasing, not strictly increasing.
        let samples = Array2::<f32>::zeros((3, 4)).into_dyn();
        assert!(ModalityData::new(samples, 0.0, array![0.0, 0.1, 0.1]).is_ok());
    }

    #[test]
    fn derives_regular_timevector_from_offset() {
        let samples = Array2::<f32>::zeros((4, 2)).into_dyn();
        let data = ModalityData::with_time_offset(samples, 100.0, 1.5).unwrap();

        let expected = [1.5, 1.51, 1.52, 1.53];
        for (got, want) in data.timevector().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn offset_requires_positive_rate() {
        let samples = Array2::<f32>::zeros((4, 2)).into_dyn();
        let result = ModalityData::with_time_offset(samples, 0.0, 0.0);

        assert!(matches!(
            result,
            Err(Error::Validation(
                ValidationError::NonPositiveSamplingRate { .. }
            ))
        ));
    }
}

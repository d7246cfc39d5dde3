//! Mean squared error between successive frames.

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::data::{Modality, ModalityData, ModalityKind, Recording};
use crate::error::{Result, UnsupportedOperation, ValidationError};
use crate::metrics::{ImageMask, Norm, format_metric_name};

/// Metrics MSE accepts; only the squared euclidean distance is defined.
const ACCEPTED_METRICS: &[Norm] = &[Norm::L2];

/// Parameters identifying one MSE modality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MseParameters {
    /// Name of the modality MSE is computed on
    pub parent_name: String,
    pub metric: Norm,
    pub timestep: usize,
    #[serde(default)]
    pub mask: Option<ImageMask>,
    #[serde(default)]
    pub interpolated: bool,
    #[serde(default)]
    pub downsampling_ratio: Option<u32>,
}

impl MseParameters {
    /// Generate the modality name for these parameters.
    ///
    /// Pure in the parameters, so callers can predict an MSE name before
    /// any instance exists.
    pub fn name(&self) -> String {
        format_metric_name(
            "MSE",
            &self.metric.to_string(),
            self.timestep,
            self.mask,
            self.interpolated,
            &self.parent_name,
            self.downsampling_ratio,
        )
    }
}

/// Expand requested metrics and interpolation flags into the cartesian
/// product of parameter sets, keyed by generated name.
///
/// # Errors
///
/// Rejects metrics outside the accepted set and non-positive timesteps.
pub fn names_and_meta(
    parent_name: &str,
    metrics: &[Norm],
    timesteps: &[usize],
    interpolated_flags: &[bool],
) -> Result<BTreeMap<String, MseParameters>> {
    let metrics: &[Norm] = if metrics.is_empty() {
        ACCEPTED_METRICS
    } else {
        metrics
    };
    for metric in metrics {
        if !ACCEPTED_METRICS.contains(metric) {
            return Err(ValidationError::UnknownMetric {
                metric: metric.to_string(),
            }
            .into());
        }
    }
    for &timestep in timesteps {
        if timestep == 0 {
            return Err(ValidationError::InvalidTimestep { timestep: 0 }.into());
        }
    }

    let mut named = BTreeMap::new();
    for &metric in metrics {
        for &timestep in timesteps {
            for &interpolated in interpolated_flags {
                let params = MseParameters {
                    parent_name: parent_name.to_string(),
                    metric,
                    timestep,
                    mask: None,
                    interpolated,
                    downsampling_ratio: None,
                };
                named.insert(params.name(), params);
            }
        }
    }

    Ok(named)
}

/// Compute the MSE curve from parent data.
///
/// `mse[i] = mean((frame[i+t] - frame[i])^2)` with the same half-step
/// timevector shift as pixel difference.
fn compute(parent: &ModalityData, params: &MseParameters) -> Result<ModalityData> {
    if params.interpolated {
        return Err(UnsupportedOperation::InterpolatedDerivation {
            name: params.name(),
        }
        .into());
    }
    if params.timestep == 0 {
        return Err(ValidationError::InvalidTimestep { timestep: 0 }.into());
    }

    let rate = parent.sampling_rate();
    if rate <= 0.0 {
        return Err(ValidationError::IrregularParentRate {
            parent: params.parent_name.clone(),
        }
        .into());
    }

    let frames = parent.frames();
    let timestep = params.timestep;
    if frames <= timestep {
        return Err(ValidationError::TooFewFrames { frames, timestep }.into());
    }
    let n_out = frames - timestep;
    let frame_len = parent.samples().len() / frames;

    let flat: ArrayView2<f32> = parent
        .samples()
        .view()
        .into_shape_with_order((frames, frame_len))?;

    let mut curve = Vec::with_capacity(n_out);
    for i in 0..n_out {
        let late = flat.row(i + timestep);
        let early = flat.row(i);
        let sum_sq: f64 = late
            .iter()
            .zip(early.iter())
            .map(|(&a, &b)| {
                let d = (a - b) as f64;
                d * d
            })
            .sum();
        curve.push((sum_sq / frame_len as f64) as f32);
    }

    let shift = 0.5 * timestep as f64 / rate;
    let timevector = parent
        .timevector()
        .slice(ndarray::s![..n_out])
        .mapv(|t| t + shift);

    ModalityData::new(Array1::from_vec(curve).into_dyn(), rate, timevector)
}

impl Recording {
    /// Compute and attach the requested MSE modalities.
    ///
    /// MSE is computed here, at attach time; the resulting modalities refuse
    /// lazy re-derivation and reload through their persisted data files
    /// instead. Returns the attached names.
    pub fn derive_mse(&mut self, named: &BTreeMap<String, MseParameters>) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(named.len());
        for params in named.values() {
            let parent = self.loaded_data(&params.parent_name)?;
            let data = compute(parent, params)?;
            results.push((params.clone(), data));
        }

        let mut names = Vec::with_capacity(results.len());
        for (params, data) in results {
            names.push(params.name());
            self.add_modality(Modality::with_data(ModalityKind::Mse { params }, data));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    use crate::error::Error;

    fn test_parent() -> ModalityData {
        let samples = Array3::from_shape_vec(
            (3, 2, 2),
            vec![
                0.0_f32, 0.0, 0.0, 0.0, //
                1.0, 2.0, 3.0, 4.0, //
                2.0, 2.0, 2.0, 2.0,
            ],
        )
        .unwrap()
        .into_dyn();
        ModalityData::with_time_offset(samples, 10.0, 0.0).unwrap()
    }

    fn params() -> MseParameters {
        MseParameters {
            parent_name: "RawUltrasound".to_string(),
            metric: Norm::L2,
            timestep: 1,
            mask: None,
            interpolated: false,
            downsampling_ratio: None,
        }
    }

    #[test]
    fn matches_hand_computed_values() {
        let mse = compute(&test_parent(), &params()).unwrap();

        // pair 0: (1 + 4 + 9 + 16) / 4 = 7.5; pair 1: (1 + 0 + 1 + 4) / 4 = 1.5
        assert_eq!(mse.frames(), 2);
        assert!((mse.samples()[[0]] - 7.5).abs() < 1e-6);
        assert!((mse.samples()[[1]] - 1.5).abs() < 1e-6);
        assert!((mse.timevector()[0] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn name_is_predictable_without_an_instance() {
        assert_eq!(params().name(), "MSE l2 on RawUltrasound");

        let mut with_ts = params();
        with_ts.timestep = 2;
        assert_eq!(with_ts.name(), "MSE l2 ts2 on RawUltrasound");
    }

    #[test]
    fn names_and_meta_covers_the_product() {
        let named =
            names_and_meta("RawUltrasound", &[Norm::L2], &[1, 2], &[false, true]).unwrap();

        assert_eq!(named.len(), 4);
        assert!(named.contains_key("MSE l2 on RawUltrasound"));
        assert!(named.contains_key("Interpolated MSE l2 ts2 on RawUltrasound"));
    }

    #[test]
    fn rejects_unaccepted_metric() {
        let result = names_and_meta("RawUltrasound", &[Norm::L1], &[1], &[false]);

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::UnknownMetric { .. }))
        ));
    }
}

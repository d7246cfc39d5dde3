//! Pixel difference: frame-to-frame norm curves over ultrasound video.

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD, ArrayView2, ArrayView3, Axis, Slice};
use serde::{Deserialize, Serialize};

use crate::data::{Modality, ModalityData, ModalityKind, Recording};
use crate::error::{Result, UnsupportedOperation, ValidationError};
use crate::metrics::{ImageMask, Norm, format_metric_name};

/// Parameters identifying one pixel difference modality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PdParameters {
    /// Name of the modality the difference is computed on
    pub parent_name: String,
    pub norm: Norm,
    pub timestep: usize,
    #[serde(default)]
    pub mask: Option<ImageMask>,
    #[serde(default)]
    pub interpolated: bool,
    #[serde(default)]
    pub downsampling_ratio: Option<u32>,
    /// Per-row l2 breakout instead of a whole-frame curve
    #[serde(default)]
    pub sub_band: bool,
}

impl PdParameters {
    /// Generate the modality name for these parameters.
    ///
    /// This function defines what pixel difference names look like; callers
    /// that need to find a PD modality in a recording call this instead of
    /// guessing.
    pub fn name(&self) -> String {
        let metric = if self.sub_band {
            "sbpd".to_string()
        } else {
            self.norm.to_string()
        };
        format_metric_name(
            "PD",
            &metric,
            self.timestep,
            self.mask,
            self.interpolated,
            &self.parent_name,
            self.downsampling_ratio,
        )
    }
}

/// Requested pixel difference derivations for one parent modality.
#[derive(Clone, Debug)]
pub struct PdOptions {
    pub norms: Vec<Norm>,
    pub timesteps: Vec<usize>,
    pub mask: Option<ImageMask>,
    pub interpolated: bool,
    pub downsampling_ratio: Option<u32>,
    /// Also compute the per-row l2 breakout for each timestep
    pub sub_band: bool,
    /// Release the parent's sample data once all requested curves exist
    pub release_parent: bool,
}

impl Default for PdOptions {
    fn default() -> Self {
        Self {
            norms: vec![Norm::L2],
            timesteps: vec![1],
            mask: None,
            interpolated: false,
            downsampling_ratio: None,
            sub_band: false,
            release_parent: false,
        }
    }
}

/// Expand options into the full cartesian product of parameter sets, keyed
/// by generated modality name.
///
/// # Errors
///
/// Rejects a zero timestep and a zero downsampling ratio.
pub fn names_and_meta(
    parent_name: &str,
    opts: &PdOptions,
) -> Result<BTreeMap<String, PdParameters>> {
    for &timestep in &opts.timesteps {
        validate_timestep(timestep)?;
    }
    if opts.downsampling_ratio == Some(0) {
        return Err(ValidationError::InvalidDownsamplingRatio { ratio: 0 }.into());
    }

    let norms: &[Norm] = if opts.norms.is_empty() {
        &[Norm::L2]
    } else {
        &opts.norms
    };

    let mut named = BTreeMap::new();
    for &timestep in &opts.timesteps {
        for &norm in norms {
            let params = PdParameters {
                parent_name: parent_name.to_string(),
                norm,
                timestep,
                mask: opts.mask,
                interpolated: opts.interpolated,
                downsampling_ratio: opts.downsampling_ratio,
                sub_band: false,
            };
            named.insert(params.name(), params);
        }
        if opts.sub_band {
            let params = PdParameters {
                parent_name: parent_name.to_string(),
                norm: Norm::L2,
                timestep,
                mask: opts.mask,
                interpolated: opts.interpolated,
                downsampling_ratio: opts.downsampling_ratio,
                sub_band: true,
            };
            named.insert(params.name(), params);
        }
    }

    Ok(named)
}

/// Derive a single pixel difference modality from its parent's data.
///
/// Used for lazy re-derivation; batch computation goes through
/// [`Recording::derive_pixel_differences`].
pub fn derive(parent: &ModalityData, params: &PdParameters) -> Result<ModalityData> {
    if params.interpolated {
        return Err(UnsupportedOperation::InterpolatedDerivation {
            name: params.name(),
        }
        .into());
    }

    let (samples, timevector, rate) =
        prepare_parent(parent, params.mask, params.downsampling_ratio)?;

    if params.sub_band {
        let (curve, shifted) = sub_band_curve(
            &samples,
            &timevector,
            rate,
            params.timestep,
            &params.parent_name,
        )?;
        ModalityData::new(curve.into_dyn(), rate, shifted)
    } else {
        let (curves, shifted) = norm_curves(
            &samples,
            &timevector,
            rate,
            params.timestep,
            &[params.norm],
            &params.parent_name,
        )?;
        let curve = curves.into_values().next().unwrap_or_default();
        ModalityData::new(Array1::from_vec(curve).into_dyn(), rate, shifted)
    }
}

impl Recording {
    /// Compute the requested pixel difference modalities from one parent.
    ///
    /// All norms sharing a timestep are computed in a single pass over the
    /// parent's frames. Attached modalities replace previous ones of the
    /// same name. Returns the attached names.
    pub fn derive_pixel_differences(
        &mut self,
        parent_name: &str,
        opts: &PdOptions,
    ) -> Result<Vec<String>> {
        if opts.interpolated {
            return Err(UnsupportedOperation::InterpolatedDerivation {
                name: format!("PD on {parent_name}"),
            }
            .into());
        }
        let named = names_and_meta(parent_name, opts)?;

        let mut results = Vec::with_capacity(named.len());
        {
            let parent = self.loaded_data(parent_name)?;
            let (samples, timevector, rate) =
                prepare_parent(parent, opts.mask, opts.downsampling_ratio)?;

            let norms: Vec<Norm> = named
                .values()
                .filter(|p| !p.sub_band)
                .map(|p| p.norm)
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();

            for &timestep in &opts.timesteps {
                let (curves, shifted) = norm_curves(
                    &samples,
                    &timevector,
                    rate,
                    timestep,
                    &norms,
                    parent_name,
                )?;
                for (norm, curve) in curves {
                    let params = PdParameters {
                        parent_name: parent_name.to_string(),
                        norm,
                        timestep,
                        mask: opts.mask,
                        interpolated: false,
                        downsampling_ratio: opts.downsampling_ratio,
                        sub_band: false,
                    };
                    let data = ModalityData::new(
                        Array1::from_vec(curve).into_dyn(),
                        rate,
                        shifted.clone(),
                    )?;
                    results.push((params, data));
                }

                if opts.sub_band {
                    let (curve, shifted) =
                        sub_band_curve(&samples, &timevector, rate, timestep, parent_name)?;
                    let params = PdParameters {
                        parent_name: parent_name.to_string(),
                        norm: Norm::L2,
                        timestep,
                        mask: opts.mask,
                        interpolated: false,
                        downsampling_ratio: opts.downsampling_ratio,
                        sub_band: true,
                    };
                    results.push((params, ModalityData::new(curve.into_dyn(), rate, shifted)?));
                }
            }
        }

        tracing::debug!(
            recording = %self.meta_data().basename,
            parent = parent_name,
            curves = results.len(),
            "pixel difference computed"
        );

        let mut names = Vec::with_capacity(results.len());
        for (params, data) in results {
            names.push(params.name());
            self.add_modality(Modality::with_data(
                ModalityKind::PixelDifference { params },
                data,
            ));
        }

        if opts.release_parent {
            self.release(parent_name)?;
        }

        Ok(names)
    }
}

fn validate_timestep(timestep: usize) -> Result<()> {
    if timestep == 0 {
        return Err(ValidationError::InvalidTimestep { timestep: 0 }.into());
    }
    Ok(())
}

/// Apply mask and downsampling, yielding the frames the curves are computed
/// on together with their timevector and effective sampling rate.
fn prepare_parent(
    parent: &ModalityData,
    mask: Option<ImageMask>,
    downsampling_ratio: Option<u32>,
) -> Result<(ArrayD<f32>, Array1<f64>, f64)> {
    let mut samples = parent.samples().clone();
    let mut timevector = parent.timevector().clone();
    let mut rate = parent.sampling_rate();

    if let Some(mask) = mask {
        if samples.ndim() < 3 {
            return Err(ValidationError::RequiresImageFrames {
                context: "image mask".to_string(),
                ndim: samples.ndim(),
            }
            .into());
        }
        let rows = samples.shape()[1];
        let half = rows / 2;
        let slice = match mask {
            ImageMask::Top => Slice::from(0..half),
            ImageMask::Bottom => Slice::from(half..rows),
        };
        samples = samples.slice_axis(Axis(1), slice).to_owned();
    }

    if let Some(ratio) = downsampling_ratio.filter(|&r| r > 1) {
        let indices: Vec<usize> = (0..samples.shape()[0]).step_by(ratio as usize).collect();
        samples = samples.select(Axis(0), &indices);
        timevector = timevector.select(Axis(0), &indices);
        rate /= ratio as f64;
    }

    Ok((samples, timevector, rate))
}

/// Shift the timevector by half a step period: each difference sample
/// represents the interval between two frames, not an instant.
fn shifted_timevector(
    timevector: &Array1<f64>,
    rate: f64,
    timestep: usize,
    n_out: usize,
    parent_name: &str,
) -> Result<Array1<f64>> {
    if rate <= 0.0 {
        return Err(ValidationError::IrregularParentRate {
            parent: parent_name.to_string(),
        }
        .into());
    }
    let shift = 0.5 * timestep as f64 / rate;
    Ok(timevector.slice(ndarray::s![..n_out]).mapv(|t| t + shift))
}

fn checked_output_len(frames: usize, timestep: usize) -> Result<usize> {
    validate_timestep(timestep)?;
    if frames <= timestep {
        return Err(ValidationError::TooFewFrames { frames, timestep }.into());
    }
    Ok(frames - timestep)
}

/// Compute every requested norm curve in one pass over the frame pairs.
fn norm_curves(
    samples: &ArrayD<f32>,
    timevector: &Array1<f64>,
    rate: f64,
    timestep: usize,
    norms: &[Norm],
    parent_name: &str,
) -> Result<(BTreeMap<Norm, Vec<f32>>, Array1<f64>)> {
    let frames = samples.shape().first().copied().unwrap_or(0);
    let n_out = checked_output_len(frames, timestep)?;
    let frame_len = samples.len() / frames;

    let flat: ArrayView2<f32> = samples.view().into_shape_with_order((frames, frame_len))?;

    let mut curves: BTreeMap<Norm, Vec<f32>> = norms
        .iter()
        .map(|&norm| (norm, Vec::with_capacity(n_out)))
        .collect();

    let mut abs_diff = vec![0.0_f32; frame_len];
    for i in 0..n_out {
        let late = flat.row(i + timestep);
        let early = flat.row(i);
        for ((d, &a), &b) in abs_diff.iter_mut().zip(late.iter()).zip(early.iter()) {
            *d = (a - b).abs();
        }

        for (&norm, curve) in curves.iter_mut() {
            let value = match norm {
                Norm::P(1) => abs_diff.iter().sum::<f32>(),
                Norm::P(2) => abs_diff.iter().map(|d| d * d).sum::<f32>().sqrt(),
                Norm::P(p) => abs_diff
                    .iter()
                    .map(|d| d.powi(p as i32))
                    .sum::<f32>()
                    .powf(1.0 / p as f32),
                Norm::Inf => abs_diff.iter().fold(0.0_f32, |acc, &d| acc.max(d)),
            };
            curve.push(value);
        }
    }

    let shifted = shifted_timevector(timevector, rate, timestep, n_out, parent_name)?;
    Ok((curves, shifted))
}

/// Per-row l2 curve: the l2 norm of each row's difference, before the final
/// whole-frame reduction.
fn sub_band_curve(
    samples: &ArrayD<f32>,
    timevector: &Array1<f64>,
    rate: f64,
    timestep: usize,
    parent_name: &str,
) -> Result<(ndarray::Array2<f32>, Array1<f64>)> {
    if samples.ndim() < 3 {
        return Err(ValidationError::RequiresImageFrames {
            context: "sub-band pixel difference".to_string(),
            ndim: samples.ndim(),
        }
        .into());
    }

    let frames = samples.shape()[0];
    let rows = samples.shape()[1];
    let n_out = checked_output_len(frames, timestep)?;
    let row_len = samples.len() / (frames * rows);

    let shaped: ArrayView3<f32> = samples
        .view()
        .into_shape_with_order((frames, rows, row_len))?;

    let mut curve = ndarray::Array2::<f32>::zeros((n_out, rows));
    for i in 0..n_out {
        for row in 0..rows {
            let late = shaped.slice(ndarray::s![i + timestep, row, ..]);
            let early = shaped.slice(ndarray::s![i, row, ..]);
            let sum_sq: f32 = late
                .iter()
                .zip(early.iter())
                .map(|(&a, &b)| (a - b) * (a - b))
                .sum();
            curve[[i, row]] = sum_sq.sqrt();
        }
    }

    let shifted = shifted_timevector(timevector, rate, timestep, n_out, parent_name)?;
    Ok((curve, shifted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    use crate::error::Error;

    /// Three 2x2 frames with hand-computable differences.
    fn test_parent() -> ModalityData {
        let samples = Array3::from_shape_vec(
            (3, 2, 2),
            vec![
                0.0_f32, 0.0, 0.0, 0.0, // frame 0
                1.0, 2.0, 3.0, 4.0, // frame 1
                2.0, 2.0, 2.0, 2.0, // frame 2
            ],
        )
        .unwrap()
        .into_dyn();
        ModalityData::with_time_offset(samples, 10.0, 0.0).unwrap()
    }

    fn params(norm: Norm) -> PdParameters {
        PdParameters {
            parent_name: "RawUltrasound".to_string(),
            norm,
            timestep: 1,
            mask: None,
            interpolated: false,
            downsampling_ratio: None,
            sub_band: false,
        }
    }

    #[test]
    fn matches_hand_computed_norms() {
        let parent = test_parent();

        // diff 0: [1, 2, 3, 4]; diff 1: [1, 0, -1, -2]
        let l1 = derive(&parent, &params(Norm::L1)).unwrap();
        assert!((l1.samples()[[0]] - 10.0).abs() < 1e-6);
        assert!((l1.samples()[[1]] - 4.0).abs() < 1e-6);

        let l2 = derive(&parent, &params(Norm::L2)).unwrap();
        assert!((l2.samples()[[0]] - 30.0_f32.sqrt()).abs() < 1e-6);
        assert!((l2.samples()[[1]] - 6.0_f32.sqrt()).abs() < 1e-6);

        let linf = derive(&parent, &params(Norm::Inf)).unwrap();
        assert!((linf.samples()[[0]] - 4.0).abs() < 1e-6);
        assert!((linf.samples()[[1]] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn output_is_one_shorter_with_half_frame_shift() {
        let parent = test_parent();
        let pd = derive(&parent, &params(Norm::L2)).unwrap();

        assert_eq!(pd.frames(), parent.frames() - 1);
        // 0.5 / 10 Hz shift on top of [0.0, 0.1]
        assert!((pd.timevector()[0] - 0.05).abs() < 1e-12);
        assert!((pd.timevector()[1] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn timestep_two_leaves_single_pair() {
        let parent = test_parent();
        let mut p = params(Norm::L1);
        p.timestep = 2;

        let pd = derive(&parent, &p).unwrap();

        // frame 2 - frame 0 = [2, 2, 2, 2]
        assert_eq!(pd.frames(), 1);
        assert!((pd.samples()[[0]] - 8.0).abs() < 1e-6);
        assert!((pd.timevector()[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn sub_band_breaks_out_rows() {
        let parent = test_parent();
        let mut p = params(Norm::L2);
        p.sub_band = true;

        let sbpd = derive(&parent, &p).unwrap();

        assert_eq!(sbpd.samples().shape(), &[2, 2]);
        // first pair, row 0: sqrt(1 + 4); row 1: sqrt(9 + 16)
        assert!((sbpd.samples()[[0, 0]] - 5.0_f32.sqrt()).abs() < 1e-6);
        assert!((sbpd.samples()[[0, 1]] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_zero_timestep() {
        let opts = PdOptions {
            timesteps: vec![0],
            ..PdOptions::default()
        };
        let result = names_and_meta("RawUltrasound", &opts);

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::InvalidTimestep {
                timestep: 0
            }))
        ));
    }

    #[test]
    fn rejects_timestep_consuming_all_frames() {
        let parent = test_parent();
        let mut p = params(Norm::L2);
        p.timestep = 3;

        assert!(matches!(
            derive(&parent, &p),
            Err(Error::Validation(ValidationError::TooFewFrames { .. }))
        ));
    }

    #[test]
    fn rejects_irregular_parent() {
        let samples = array![[0.0_f32, 0.0], [1.0, 1.0]].into_dyn();
        let parent = ModalityData::new(samples, 0.0, array![0.0, 0.7]).unwrap();

        assert!(matches!(
            derive(&parent, &params(Norm::L2)),
            Err(Error::Validation(
                ValidationError::IrregularParentRate { .. }
            ))
        ));
    }

    #[test]
    fn interpolated_derivation_is_unsupported() {
        let parent = test_parent();
        let mut p = params(Norm::L2);
        p.interpolated = true;

        assert!(matches!(
            derive(&parent, &p),
            Err(Error::Unsupported(
                UnsupportedOperation::InterpolatedDerivation { .. }
            ))
        ));
    }

    #[test]
    fn names_expand_cartesian_product() {
        let opts = PdOptions {
            norms: vec![Norm::L1, Norm::L2],
            timesteps: vec![1, 2],
            sub_band: true,
            ..PdOptions::default()
        };
        let named = names_and_meta("RawUltrasound", &opts).unwrap();

        assert_eq!(named.len(), 6);
        assert!(named.contains_key("PD l1 on RawUltrasound"));
        assert!(named.contains_key("PD l2 ts2 on RawUltrasound"));
        assert!(named.contains_key("PD sbpd on RawUltrasound"));
        assert!(named.contains_key("PD sbpd ts2 on RawUltrasound"));
    }

    #[test]
    fn downsampling_halves_the_rate() {
        let samples = Array3::from_shape_vec(
            (4, 1, 2),
            vec![0.0_f32, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0],
        )
        .unwrap()
        .into_dyn();
        let parent = ModalityData::with_time_offset(samples, 10.0, 0.0).unwrap();

        let mut p = params(Norm::L1);
        p.downsampling_ratio = Some(2);

        let pd = derive(&parent, &p).unwrap();

        // frames 0 and 2 remain; diff = [2, 2]
        assert_eq!(pd.frames(), 1);
        assert!((pd.samples()[[0]] - 4.0).abs() < 1e-6);
        // effective rate 5 Hz, shift 0.1
        assert!((pd.sampling_rate() - 5.0).abs() < 1e-12);
        assert!((pd.timevector()[0] - 0.1).abs() < 1e-12);
    }
}

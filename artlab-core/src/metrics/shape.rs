//! Tongue-shape descriptors computed from spline contours.
//!
//! Implements the shape measures of Dawson, Tiede & Whalen (2016), "Methods
//! for quantifying tongue shape and complexity using ultrasound imaging",
//! Clinical Linguistics & Phonetics 30.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::data::{Modality, ModalityData, ModalityKind, Recording, SplineMetadata};
use crate::error::{Result, ValidationError};
use crate::metrics::dsp;

/// Spline shape metric selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeMetric {
    Mci,
    Procrustes,
    Fourier,
}

/// Parameters identifying one derived spline-metric modality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplineMetricParameters {
    /// Name of the spline modality the metric is computed on
    pub parent_name: String,
    pub metric: ShapeMetric,
    /// Low-pass the curvature before integrating (MCI only)
    #[serde(default = "default_filtered")]
    pub filtered: bool,
}

fn default_filtered() -> bool {
    true
}

impl SplineMetricParameters {
    /// Generate the modality name for these parameters.
    pub fn name(&self) -> String {
        match self.metric {
            ShapeMetric::Mci if self.filtered => format!("MCI on {}", self.parent_name),
            ShapeMetric::Mci => format!("MCI unfiltered on {}", self.parent_name),
            ShapeMetric::Procrustes => format!("Procrustes on {}", self.parent_name),
            ShapeMetric::Fourier => format!("FourierShape on {}", self.parent_name),
        }
    }
}

/// One parameter set per requested metric, keyed by generated name.
pub fn names_and_meta(
    parent_name: &str,
    metrics: &[ShapeMetric],
) -> BTreeMap<String, SplineMetricParameters> {
    let mut named = BTreeMap::new();
    for &metric in metrics {
        let params = SplineMetricParameters {
            parent_name: parent_name.to_string(),
            metric,
            filtered: true,
        };
        named.insert(params.name(), params);
    }
    named
}

fn check_contour(contour: &ArrayView2<f64>, min_points: usize) -> Result<usize> {
    if contour.nrows() != 2 {
        return Err(ValidationError::MismatchedShapes {
            left: contour.shape().to_vec(),
            right: vec![2, contour.ncols()],
        }
        .into());
    }
    let points = contour.ncols();
    if points < min_points {
        return Err(ValidationError::TooFewPoints { points }.into());
    }
    Ok(points)
}

/// Procrustes distance between a reference shape and a compared shape.
///
/// Both shapes are centred at their centroid and scaled to unit mean-squared
/// radius; the compared shape is then rotated onto the reference with the
/// closed-form least-squares angle and the root-sum-squared residual is
/// returned. Both contours must have the same point count and ordering; no
/// resampling is performed.
pub fn procrustes(reference: ArrayView2<f64>, compared: ArrayView2<f64>) -> Result<f64> {
    let ref_points = check_contour(&reference, 2)?;
    let cmp_points = check_contour(&compared, 2)?;
    if ref_points != cmp_points {
        return Err(ValidationError::PointCountMismatch {
            expected: ref_points,
            got: cmp_points,
        }
        .into());
    }

    let normalize = |shape: ArrayView2<f64>| -> Array2<f64> {
        // points-major, centred at the centroid
        let mut points = shape.t().to_owned();
        let centroid = points.mean_axis(Axis(0)).unwrap_or_default();
        for mut point in points.outer_iter_mut() {
            point[0] -= centroid[0];
            point[1] -= centroid[1];
        }
        let scale = (points.iter().map(|v| v * v).sum::<f64>() / points.nrows() as f64).sqrt();
        if scale > 0.0 {
            points.mapv_inplace(|v| v / scale);
        }
        points
    };

    let reference = normalize(reference);
    let compared = normalize(compared);

    // optimum rotation of the compared shape onto the reference
    let mut num = 0.0;
    let mut denom = 0.0;
    for (c, r) in compared.outer_iter().zip(reference.outer_iter()) {
        num += c[0] * r[1] - c[1] * r[0];
        denom += c[0] * r[0] + c[1] * r[1];
    }
    let theta = num.atan2(denom);
    let (sin, cos) = theta.sin_cos();

    let mut residual = 0.0;
    for (c, r) in compared.outer_iter().zip(reference.outer_iter()) {
        let x = cos * c[0] - sin * c[1];
        let y = sin * c[0] + cos * c[1];
        residual += (r[0] - x) * (r[0] - x) + (r[1] - y) * (r[1] - y);
    }
    Ok(residual.sqrt())
}

/// Modified curvature index of one contour.
///
/// Signed curvature from first and second numerical gradients, optionally
/// smoothed with a fifth order Butterworth low-pass (critical frequency 1/4)
/// run forwards and backwards over mirror-padded data, then `|curvature|`
/// integrated against cumulative arc length with composite Simpson
/// quadrature.
pub fn modified_curvature_index(contour: ArrayView2<f64>, run_filter: bool) -> Result<f64> {
    let points = check_contour(&contour, 3)?;

    let x: Vec<f64> = contour.row(0).to_vec();
    let y: Vec<f64> = contour.row(1).to_vec();

    let dx = dsp::gradient(&x);
    let dy = dsp::gradient(&y);
    let ddx = dsp::gradient(&dx);
    let ddy = dsp::gradient(&dy);

    let curvature: Vec<f64> = (0..points)
        .map(|i| {
            (dx[i] * ddy[i] - dy[i] * ddx[i]) / (dx[i] * dx[i] + dy[i] * dy[i]).powf(1.5)
        })
        .collect();

    let mut arc_length = Vec::with_capacity(points);
    arc_length.push(0.0);
    for i in 1..points {
        let step = ((x[i] - x[i - 1]).powi(2) + (y[i] - y[i - 1]).powi(2)).sqrt();
        arc_length.push(arc_length[i - 1] + step);
    }

    let integrand: Vec<f64> = if run_filter {
        let (b, a) = dsp::butter_lowpass(5, 0.25);

        // Mirror a full copy on each side to suppress edge transients, then
        // keep the middle section.
        let mut padded = Vec::with_capacity(3 * points);
        padded.extend(curvature.iter().rev());
        padded.extend(curvature.iter());
        padded.extend(curvature.iter().rev());

        let filtered = dsp::filtfilt(&b, &a, &padded);
        filtered[points..2 * points]
            .iter()
            .map(|v| v.abs())
            .collect()
    } else {
        curvature.iter().map(|v| v.abs()).collect()
    };

    Ok(dsp::simpson(&integrand, &arc_length))
}

/// Fourier tangent-angle descriptors of one contour.
///
/// Coefficients above the third reflect contour-fitting noise rather than
/// shape and are discarded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FourierDescriptors {
    pub real: [f64; 3],
    pub imag: [f64; 3],
    pub magnitude: [f64; 3],
}

/// Discrete Fourier transform of the tangent-angle signal along a contour,
/// reporting the first three non-DC coefficients.
pub fn fourier_shape(contour: ArrayView2<f64>) -> Result<FourierDescriptors> {
    let points = check_contour(&contour, 7)?;

    let x: Vec<f64> = contour.row(0).to_vec();
    let y: Vec<f64> = contour.row(1).to_vec();
    let dx = dsp::gradient(&x);
    let dy = dsp::gradient(&y);

    let mut buffer: Vec<Complex<f64>> = (0..points)
        .map(|i| Complex::new(dy[i].atan2(dx[i]), 0.0))
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(points);
    fft.process(&mut buffer);

    let mut descriptors = FourierDescriptors {
        real: [0.0; 3],
        imag: [0.0; 3],
        magnitude: [0.0; 3],
    };
    for k in 0..3 {
        let coefficient = buffer[k + 1];
        descriptors.real[k] = coefficient.re;
        descriptors.imag[k] = coefficient.im;
        descriptors.magnitude[k] = coefficient.norm();
    }
    Ok(descriptors)
}

/// Derive one spline-metric modality from its parent's contour data.
pub fn derive(
    parent: &ModalityData,
    meta: &SplineMetadata,
    params: &SplineMetricParameters,
) -> Result<ModalityData> {
    let cartesian = meta.in_cartesian(parent.samples())?;
    let frames = parent.frames();
    let points = meta.sample_points;

    let contour_of = |frame: usize| -> Array2<f64> {
        let mut contour = Array2::<f64>::zeros((2, points));
        for channel in 0..2 {
            for point in 0..points {
                contour[[channel, point]] = cartesian[[frame, channel, point]] as f64;
            }
        }
        contour
    };
    let is_finite = |contour: &Array2<f64>| contour.iter().all(|v| v.is_finite());

    let samples = match params.metric {
        ShapeMetric::Mci => {
            let mut curve = Array1::<f32>::zeros(frames);
            for frame in 0..frames {
                let contour = contour_of(frame);
                curve[frame] = if is_finite(&contour) {
                    modified_curvature_index(contour.view(), params.filtered)? as f32
                } else {
                    tracing::debug!(frame, "non-finite contour, emitting NaN");
                    f32::NAN
                };
            }
            curve.into_dyn()
        }
        ShapeMetric::Procrustes => {
            let reference = (0..frames)
                .map(contour_of)
                .find(is_finite)
                .ok_or_else(|| ValidationError::NoReferenceContour {
                    parent: params.parent_name.clone(),
                })?;

            let mut curve = Array1::<f32>::zeros(frames);
            for frame in 0..frames {
                let contour = contour_of(frame);
                curve[frame] = if is_finite(&contour) {
                    procrustes(reference.view(), contour.view())? as f32
                } else {
                    tracing::debug!(frame, "non-finite contour, emitting NaN");
                    f32::NAN
                };
            }
            curve.into_dyn()
        }
        ShapeMetric::Fourier => {
            // columns: re1, im1, mod1, re2, im2, mod2, re3, im3, mod3
            let mut rows = Array2::<f32>::zeros((frames, 9));
            for frame in 0..frames {
                let contour = contour_of(frame);
                if is_finite(&contour) {
                    let d = fourier_shape(contour.view())?;
                    for k in 0..3 {
                        rows[[frame, 3 * k]] = d.real[k] as f32;
                        rows[[frame, 3 * k + 1]] = d.imag[k] as f32;
                        rows[[frame, 3 * k + 2]] = d.magnitude[k] as f32;
                    }
                } else {
                    tracing::debug!(frame, "non-finite contour, emitting NaN");
                    rows.row_mut(frame).fill(f32::NAN);
                }
            }
            rows.into_dyn()
        }
    };

    ModalityData::new(samples, parent.sampling_rate(), parent.timevector().clone())
}

impl Recording {
    /// Compute and attach the requested spline metrics.
    ///
    /// The parent must be a Splines modality. Returns the attached names.
    pub fn derive_spline_metrics(
        &mut self,
        named: &BTreeMap<String, SplineMetricParameters>,
    ) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(named.len());
        for params in named.values() {
            let meta = match self
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

            let parent = self.loaded_data(&params.parent_name)?;
            let data = derive(parent, &meta, params)?;
            results.push((params.clone(), data));
        }

        let mut names = Vec::with_capacity(results.len());
        for (params, data) in results {
            names.push(params.name());
            self.add_modality(Modality::with_data(
                ModalityKind::SplineMetric { params },
                data,
            ));
        }
        Ok(names)
    }
}

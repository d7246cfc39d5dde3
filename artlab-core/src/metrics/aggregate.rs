//! Session-level statistics: aggregate images and distance matrices.

use ndarray::{ArrayD, Axis};

use crate::data::{Recording, Session, Statistic, StatisticKind};
use crate::error::{Result, ValidationError};

/// Mean over the frame axis, as f64.
fn mean_image(samples: &ndarray::ArrayD<f32>) -> Result<ArrayD<f64>> {
    let frames = samples.shape().first().copied().unwrap_or(0);
    if frames == 0 {
        return Err(ValidationError::TooFewFrames {
            frames: 0,
            timestep: 0,
        }
        .into());
    }
    Ok(samples
        .mapv(f64::from)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| ArrayD::zeros(samples.shape()[1..].to_vec())))
}

fn mean_squared_difference(a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<f64> {
    if a.shape() != b.shape() {
        return Err(ValidationError::MismatchedShapes {
            left: a.shape().to_vec(),
            right: b.shape().to_vec(),
        }
        .into());
    }
    let n = a.len().max(1);
    Ok(a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f64>()
        / n as f64)
}

impl Recording {
    /// Reduce a modality's frames into a mean image and store it as a
    /// statistic of this recording. Returns the statistic name.
    ///
    /// Recomputation replaces the previous statistic of the same name.
    pub fn compute_aggregate_image(&mut self, parent_name: &str) -> Result<String> {
        let image = {
            let parent = self.loaded_data(parent_name)?;
            mean_image(parent.samples())?
        };

        let kind = StatisticKind::AggregateImage {
            parent_name: parent_name.to_string(),
            operation: "mean".to_string(),
        };
        let name = kind.name();
        self.add_statistic(Statistic::new(kind, image), true)?;
        Ok(name)
    }
}

impl Session {
    /// Pairwise mean squared differences between the non-excluded
    /// recordings' aggregate images. Returns the statistic name.
    ///
    /// Excluded recordings and recordings without the named aggregate are
    /// skipped with a log line; the matrix rows follow session order over
    /// the remaining recordings.
    pub fn compute_distance_matrix(&mut self, aggregate_name: &str) -> Result<String> {
        let mut images: Vec<ArrayD<f64>> = Vec::new();
        for recording in self.recordings() {
            if recording.excluded() {
                tracing::info!(
                    recording = %recording.meta_data().basename,
                    "excluded recording skipped in distance matrix"
                );
                continue;
            }
            match recording.statistic(aggregate_name) {
                Some(statistic) => images.push(statistic.data().clone()),
                None => tracing::warn!(
                    recording = %recording.meta_data().basename,
                    statistic = aggregate_name,
                    "aggregate missing, recording skipped in distance matrix"
                ),
            }
        }

        let n = images.len();
        let mut matrix = ndarray::Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let distance = mean_squared_difference(&images[i], &images[j])?;
                matrix[[i, j]] = distance;
                matrix[[j, i]] = distance;
            }
        }

        let kind = StatisticKind::DistanceMatrix {
            parent_name: aggregate_name.to_string(),
            metric: "mean_squared_error".to_string(),
        };
        let name = kind.name();
        self.add_statistic(Statistic::new(kind, matrix.into_dyn()), true)?;
        Ok(name)
    }
}

//! Process subcommand - import or load, derive metrics, save.

use std::path::{Path, PathBuf};

use artlab_core::data::{Recording, Session};
use artlab_core::import::{self, SplineImportConfig};
use artlab_core::metrics::pd::PdOptions;
use artlab_core::metrics::shape::ShapeMetric;
use artlab_core::metrics::{Norm, mse, shape};
use artlab_core::store;
use eyre::{Result, WrapErr, bail};

const ULTRASOUND: &str = "RawUltrasound";
const SPLINES: &str = "Splines";

/// CLI arguments for metric derivation.
#[derive(clap::Args, Debug)]
pub struct MetricArgs {
    /// Pixel difference norm; repeat for several
    #[arg(long = "norm", value_name = "NORM", default_values_t = [Norm::L2])]
    pub norms: Vec<Norm>,

    /// Pixel difference timestep in frames; repeat for several
    #[arg(long = "timestep", value_name = "FRAMES", default_values_t = [1_usize])]
    pub timesteps: Vec<usize>,

    /// Also compute the per-row l2 breakout (sub-band pixel difference)
    #[arg(long)]
    pub sub_band: bool,

    /// Compute frame-pair mean squared error
    #[arg(long)]
    pub mse: bool,

    /// Compute the modified curvature index of each spline
    #[arg(long)]
    pub mci: bool,

    /// Compute Procrustes distances against each recording's first contour
    #[arg(long)]
    pub procrustes: bool,

    /// Compute Fourier tangent-angle shape descriptors
    #[arg(long)]
    pub fourier: bool,

    /// Release raw ultrasound sample data once the curves are computed
    #[arg(long)]
    pub release_memory: bool,
}

/// CLI arguments for the process subcommand.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Session directory: a vendor export or a previously saved session
    pub directory: PathBuf,

    #[command(flatten)]
    pub metrics: MetricArgs,

    /// Batch spline export to attach before deriving
    #[arg(long, value_name = "FILE", requires = "spline_config")]
    pub spline_file: Option<PathBuf>,

    /// Spline import layout description (JSON)
    #[arg(long, value_name = "FILE", requires = "spline_file")]
    pub spline_config: Option<PathBuf>,

    /// Recording exclusion list applied on import
    #[arg(long, value_name = "FILE")]
    pub exclusion_list: Option<PathBuf>,

    /// Derive everything but do not save
    #[arg(long)]
    pub dry_run: bool,
}

/// Resolved configuration for the process subcommand.
#[derive(Debug)]
pub struct Config {
    pub directory: PathBuf,
    pub spline: Option<(PathBuf, SplineImportConfig)>,
    pub exclusion_list: Option<PathBuf>,
    pub pd: PdOptions,
    pub mse: bool,
    pub mse_timesteps: Vec<usize>,
    pub shape_metrics: Vec<ShapeMetric>,
    pub release_memory: bool,
    pub dry_run: bool,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let spline = match (args.spline_file, args.spline_config) {
            (Some(file), Some(config_path)) => {
                let config = SplineImportConfig::from_file(&config_path)
                    .wrap_err_with(|| format!("bad spline config {:?}", config_path.display()))?;
                Some((file, config))
            }
            (None, None) => None,
            _ => bail!("--spline-file and --spline-config must be given together"),
        };

        let mut shape_metrics = Vec::new();
        if args.metrics.mci {
            shape_metrics.push(ShapeMetric::Mci);
        }
        if args.metrics.procrustes {
            shape_metrics.push(ShapeMetric::Procrustes);
        }
        if args.metrics.fourier {
            shape_metrics.push(ShapeMetric::Fourier);
        }

        Ok(Self {
            directory: args.directory,
            spline,
            exclusion_list: args.exclusion_list,
            pd: PdOptions {
                norms: args.metrics.norms,
                timesteps: args.metrics.timesteps.clone(),
                sub_band: args.metrics.sub_band,
                // released once per recording, after every dependent has
                // consumed the parent
                release_parent: false,
                ..PdOptions::default()
            },
            mse: args.metrics.mse,
            mse_timesteps: args.metrics.timesteps,
            shape_metrics,
            release_memory: args.metrics.release_memory,
            dry_run: args.dry_run,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let mut session = open_session(&config.directory, config.exclusion_list.as_deref())
        .wrap_err_with(|| format!("failed to open session {:?}", config.directory.display()))?;

    if let Some((spline_file, spline_config)) = &config.spline {
        import::add_splines_from_batch_export(&mut session, spline_file, spline_config)
            .wrap_err_with(|| format!("failed to import splines {:?}", spline_file.display()))?;
    }

    let mut aggregated = false;
    for recording in session.recordings_mut() {
        if recording.excluded() {
            tracing::info!(
                recording = %recording.meta_data().basename,
                "excluded, skipping derivation"
            );
            continue;
        }
        // one bad recording does not abort the run
        match process_recording(recording, &config) {
            Ok(had_ultrasound) => aggregated |= had_ultrasound,
            Err(error) => {
                tracing::error!(
                    recording = %recording.meta_data().basename,
                    %error,
                    "derivation failed"
                );
            }
        }
    }

    if aggregated {
        let aggregate_name = format!("AggregateImage mean on {ULTRASOUND}");
        session
            .compute_distance_matrix(&aggregate_name)
            .wrap_err("failed to compute the distance matrix")?;
    }

    if config.dry_run {
        tracing::info!("dry run, nothing saved");
    } else {
        let meta_path = store::save_session(&mut session).wrap_err("failed to save session")?;
        tracing::info!(path = %meta_path.display(), "session saved");
    }

    Ok(())
}

/// Derive the configured metrics for one recording. Returns whether the
/// recording contributed an aggregate image.
fn process_recording(recording: &mut Recording, config: &Config) -> artlab_core::Result<bool> {
    let has_ultrasound = recording.modality(ULTRASOUND).is_some();

    if has_ultrasound {
        recording.derive_pixel_differences(ULTRASOUND, &config.pd)?;

        if config.mse {
            let named = mse::names_and_meta(ULTRASOUND, &[], &config.mse_timesteps, &[false])?;
            recording.derive_mse(&named)?;
        }

        recording.compute_aggregate_image(ULTRASOUND)?;
    } else {
        tracing::debug!(
            recording = %recording.meta_data().basename,
            "no ultrasound, difference metrics skipped"
        );
    }

    if !config.shape_metrics.is_empty() {
        if recording.modality(SPLINES).is_some() {
            let named = shape::names_and_meta(SPLINES, &config.shape_metrics);
            recording.derive_spline_metrics(&named)?;
        } else {
            tracing::debug!(
                recording = %recording.meta_data().basename,
                "no splines, shape metrics skipped"
            );
        }
    }

    if config.release_memory && has_ultrasound {
        recording.release(ULTRASOUND)?;
    }

    Ok(has_ultrasound)
}

fn open_session(directory: &Path, exclusion_list: Option<&Path>) -> artlab_core::Result<Session> {
    match exclusion_list {
        // an explicit exclusion list forces a fresh import
        Some(list) => import::read_session_dir(directory, Some(list)),
        None => store::load_or_import(directory),
    }
}

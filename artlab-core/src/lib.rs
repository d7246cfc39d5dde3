//! artlab-core: data model and derivation pipeline for speech articulation
//! recordings.
//!
//! The crate imports multi-modal recordings (ultrasound video, audio,
//! tongue-spline contours), derives quantitative metrics from them and
//! round-trips the resulting object graph to disk.
//!
//! # Architecture
//!
//! Three layers, leaves first:
//!
//! - [`data`]: [`data::ModalityData`] sample arrays with time alignment,
//!   wrapped by [`data::Modality`] variants, owned by [`data::Recording`]s,
//!   collected into a [`data::Session`].
//! - [`metrics`]: derivations computing new modalities and statistics from
//!   existing ones — pixel difference, MSE, spline shape descriptors,
//!   aggregate images and distance matrices.
//! - [`import`] and [`store`]: vendor-format adapters in, versioned
//!   persistence out and back.
//!
//! # Quick start
//!
//! ```ignore
//! use artlab_core::metrics::pd::PdOptions;
//!
//! let mut session = artlab_core::store::load_or_import("data/session1".as_ref())?;
//! for recording in session.recordings_mut() {
//!     if recording.excluded() {
//!         continue;
//!     }
//!     recording.derive_pixel_differences("RawUltrasound", &PdOptions::default())?;
//! }
//! artlab_core::store::save_session(&mut session)?;
//! ```

pub mod data;
pub mod error;
pub mod import;
pub mod metrics;
pub mod store;

pub use error::{Error, Result};

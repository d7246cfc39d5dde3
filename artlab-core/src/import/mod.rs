//! Import adapters: vendor file formats into the common data model.

pub mod audio;
pub mod session;
pub mod splines;
pub mod ultrasound;

pub use session::read_session_dir;
pub use splines::{SplineImportConfig, add_splines_from_batch_export, add_splines_from_file};

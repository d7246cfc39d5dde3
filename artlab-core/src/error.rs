//! Error types for artlab organized by processing stage.

use std::path::PathBuf;
use thiserror::Error;

/// Toolkit error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Expected companion file is absent. Recordings hitting this during
    /// import are marked excluded instead of aborting the session.
    #[error("missing companion file: {}", path.display())]
    MissingFile { path: PathBuf },

    /// Required metadata keys are absent for a modality.
    #[error("missing metadata in {context}: {}", keys.join(", "))]
    MissingMetadata { context: String, keys: Vec<String> },

    /// Out-of-range or inconsistent parameter
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Operation the current data or configuration does not support
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperation),

    /// File reading and decoding stage error
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Persistence stage error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Parameter and data-consistency validation errors.
///
/// These are raised at the call that detected them and never coerced to a
/// default.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown norm: {norm}")]
    UnknownNorm { norm: String },

    #[error("unknown metric: {metric}")]
    UnknownMetric { metric: String },

    #[error("invalid timestep {timestep}: must be a positive integer")]
    InvalidTimestep { timestep: i64 },

    #[error("invalid downsampling ratio {ratio}: must be a positive integer")]
    InvalidDownsamplingRatio { ratio: u32 },

    #[error("timestep {timestep} leaves no frame pairs in {frames} frames")]
    TooFewFrames { frames: usize, timestep: usize },

    #[error("contour point count mismatch: expected {expected}, got {got}")]
    PointCountMismatch { expected: usize, got: usize },

    #[error("contour with {points} points is too short for this metric")]
    TooFewPoints { points: usize },

    #[error("array shapes differ: {left:?} vs {right:?}")]
    MismatchedShapes { left: Vec<usize>, right: Vec<usize> },

    #[error(
        "ambiguous spline file {}: found {} distinct recordings", path.display(), keys.len()
    )]
    AmbiguousSplineFile { path: PathBuf, keys: Vec<String> },

    #[error("timevector has {timestamps} timestamps for {frames} frames")]
    TimevectorLength { frames: usize, timestamps: usize },

    #[error("timevector decreases at index {index}")]
    DecreasingTimevector { index: usize },

    #[error("sampling rate {rate} is negative")]
    NegativeSamplingRate { rate: f64 },

    #[error("sampling rate must be positive to generate a timevector, got {rate}")]
    NonPositiveSamplingRate { rate: f64 },

    #[error("cannot time-align against parent '{parent}' with an irregular sampling rate")]
    IrregularParentRate { parent: String },

    #[error("no modality named '{name}' in this recording")]
    UnknownModality { name: String },

    #[error("a statistic named '{name}' already exists")]
    DuplicateStatistic { name: String },

    #[error("{context} requires image frames, got {ndim}-dimensional samples")]
    RequiresImageFrames { context: String, ndim: usize },

    #[error("no finite reference contour found in '{parent}'")]
    NoReferenceContour { parent: String },

    #[error("modality '{name}' does not hold spline contours")]
    NotSplines { name: String },

    #[error("invalid spline import config: {message}")]
    InvalidSplineConfig { message: String },
}

/// Operations that are requested but deliberately not implemented.
#[derive(Debug, Error)]
pub enum UnsupportedOperation {
    #[error("interleaved spline coordinates are not supported")]
    InterleavedCoordinates,

    #[error("coordinate conversion from {from} to {to} is not implemented")]
    CoordinateConversion { from: String, to: String },

    #[error("'{name}' is computed when it is attached and cannot be derived lazily")]
    EagerOnly { name: String },

    #[error("'{name}' has no persisted data file to reload from")]
    NotReloadable { name: String },

    #[error("deriving '{name}' on interpolated images is not implemented")]
    InterpolatedDerivation { name: String },
}

/// File reading and decoding errors.
#[derive(Debug, Error)]
pub enum ImportError {
    /// IO error while reading source files
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CSV decoding error in a spline export
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// WAV file format error
    #[error(transparent)]
    Wav(#[from] hound::Error),

    /// Channel count validation failed
    #[error("invalid channel count: expected mono or stereo, got {0} channels")]
    InvalidChannels(u16),

    /// Malformed content in a source file
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Ultrasound file does not divide into whole frames
    #[error("ultrasound file holds {bytes} bytes, not a whole number of {scanlines}x{pixels} frames")]
    RaggedUltrasound {
        bytes: usize,
        scanlines: usize,
        pixels: usize,
    },
}

/// Persistence errors (saving and loading the object graph).
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error while reading or writing artlab files
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Metadata sidecar (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Sample data file (de)serialization error
    #[error(transparent)]
    Binary(#[from] bincode::Error),

    /// Persisted record carries a format version this reader does not know
    #[error("unrecognized format version '{version}' in {}", path.display())]
    UnsupportedVersion { version: String, path: PathBuf },

    /// Persisted record has an unexpected object-kind tag
    #[error("unexpected object type '{object_type}' in {}", path.display())]
    UnexpectedObjectType { object_type: String, path: PathBuf },

    /// Listed artifact file is not one the loader knows how to reconstruct
    #[error("cannot reconstruct a modality from artifact {}", path.display())]
    UnknownArtifact { path: PathBuf },
}

/// Result type alias for artlab operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// std::io::Error → ImportError → Error
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Import(ImportError::Io(e))
    }
}

// csv::Error → ImportError → Error
impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Import(ImportError::Csv(e))
    }
}

// hound::Error → ImportError → Error
impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Import(ImportError::Wav(e))
    }
}

// serde_json::Error → StoreError → Error
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(StoreError::Json(e))
    }
}

// bincode::Error → StoreError → Error
impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Store(StoreError::Binary(e))
    }
}

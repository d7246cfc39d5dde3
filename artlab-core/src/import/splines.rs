//! Spline export parsing: tabular contour data into the common data model.
//!
//! A spline export holds many contours identified by `(prompt, recording
//! time)` pairs. Each row carries its metadata columns followed by
//! fixed-width data blocks, one per configured data column kind, each as
//! wide as the row's point count.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};

use crate::data::recording::identifier_for;
use crate::data::{
    Coordinates, Modality, ModalityData, ModalityKind, Recording, Session, SplineMetadata,
};
use crate::error::{Error, ImportError, Result, UnsupportedOperation, ValidationError};

/// How close the largest and smallest row-to-row time deltas must be for a
/// spline series to count as regularly sampled.
///
/// Sparse or irregular spline availability must not masquerade as a regular
/// sampling rate, so outside this tolerance the rate is reported as 0.
pub const REGULAR_RATE_TOLERANCE: f64 = 0.1;

/// Filename convention matching a per-recording spline export to its
/// recording.
pub const SPLINE_FILE_SUFFIX: &str = "_splines.csv";

/// Metadata columns a spline export may carry, in declared order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaColumn {
    Id,
    DateAndTime,
    TimeInRecording,
    Prompt,
    NumberOfSplinePoints,
}

/// Data column kinds: polar or cartesian coordinates plus optional
/// per-point confidence values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataColumn {
    R,
    Phi,
    X,
    Y,
    Confidence,
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> char {
    '\t'
}

fn default_datetime_format() -> String {
    "%m/%d/%Y %I:%M:%S %p".to_string()
}

/// Layout description of one spline export file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplineImportConfig {
    pub coordinates: Coordinates,
    /// Interleaved coordinate layouts are not supported and rejected up
    /// front.
    #[serde(default)]
    pub interleaved: bool,
    #[serde(default = "default_true")]
    pub headers: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    pub meta_columns: Vec<MetaColumn>,
    pub data_columns: Vec<DataColumn>,
    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,
}

impl SplineImportConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        let config: SplineImportConfig =
            serde_json::from_str(&text).map_err(|e| ImportError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency before any row is read.
    pub fn validate(&self) -> Result<()> {
        if self.interleaved {
            return Err(UnsupportedOperation::InterleavedCoordinates.into());
        }

        let required = [
            (MetaColumn::DateAndTime, "date_and_time"),
            (MetaColumn::TimeInRecording, "time_in_recording"),
            (MetaColumn::Prompt, "prompt"),
            (MetaColumn::NumberOfSplinePoints, "number_of_spline_points"),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(column, _)| !self.meta_columns.contains(column))
            .map(|(_, name)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingMetadata {
                context: "spline import config meta_columns".to_string(),
                keys: missing,
            });
        }

        let has = |c: DataColumn| self.data_columns.contains(&c);
        let consistent = match self.coordinates {
            Coordinates::Polar => {
                has(DataColumn::R) && has(DataColumn::Phi) && !has(DataColumn::X)
                    && !has(DataColumn::Y)
            }
            Coordinates::Cartesian => {
                has(DataColumn::X) && has(DataColumn::Y) && !has(DataColumn::R)
                    && !has(DataColumn::Phi)
            }
        };
        if !consistent {
            return Err(ValidationError::InvalidSplineConfig {
                message: format!(
                    "data columns {:?} do not match {} coordinates",
                    self.data_columns, self.coordinates
                ),
            }
            .into());
        }

        Ok(())
    }

    fn meta_index(&self, column: MetaColumn) -> usize {
        // validate() has established presence
        self.meta_columns
            .iter()
            .position(|&c| c == column)
            .unwrap_or(0)
    }

    fn confidence_exists(&self) -> bool {
        self.data_columns.contains(&DataColumn::Confidence)
    }
}

struct SplineRow {
    time: f64,
    points: usize,
    /// channel-major values: coordinate 0, coordinate 1, optional confidence
    channels: Vec<Vec<f32>>,
}

/// Infer a sampling rate from row timestamps.
///
/// Only when the largest delta is within `tolerance` of the smallest is the
/// series treated as regular and `1 / mean(delta)` reported; otherwise the
/// rate is 0.
pub fn infer_sampling_rate(timestamps: &[f64], tolerance: f64) -> f64 {
    if timestamps.len() < 2 {
        return 0.0;
    }
    let deltas: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    if deltas.iter().any(|&d| d <= 0.0) {
        return 0.0;
    }

    let min = deltas.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = deltas.iter().cloned().fold(0.0_f64, f64::max);
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;

    // the 1e-9 term keeps rounding noise from flipping the boundary case
    if max / min <= 1.0 + tolerance + 1e-9 {
        1.0 / mean
    } else {
        0.0
    }
}

/// Read all splines from a file, grouped by recording identifier.
pub fn retrieve_splines(
    path: &Path,
    config: &SplineImportConfig,
) -> Result<BTreeMap<String, (ModalityData, SplineMetadata)>> {
    config.validate()?;
    if !path.is_file() {
        return Err(Error::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(config.delimiter as u8)
        .has_headers(config.headers)
        .flexible(true)
        .from_path(path)?;

    let prompt_idx = config.meta_index(MetaColumn::Prompt);
    let date_idx = config.meta_index(MetaColumn::DateAndTime);
    let time_idx = config.meta_index(MetaColumn::TimeInRecording);
    let points_idx = config.meta_index(MetaColumn::NumberOfSplinePoints);
    let meta_len = config.meta_columns.len();

    let mut rows_by_recording: BTreeMap<String, Vec<SplineRow>> = BTreeMap::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record?;
        let parse_error = |message: String| -> Error {
            ImportError::Parse {
                path: path.to_path_buf(),
                message: format!("row {row_no}: {message}"),
            }
            .into()
        };
        let field = |idx: usize| {
            record
                .get(idx)
                .ok_or_else(|| parse_error(format!("missing column {idx}")))
        };

        let prompt = field(prompt_idx)?.to_string();
        let date_str = field(date_idx)?;
        let date = NaiveDateTime::parse_from_str(date_str, &config.datetime_format)
            .map_err(|e| parse_error(format!("bad date '{date_str}': {e}")))?;
        let time_str = field(time_idx)?;
        let time: f64 = time_str
            .parse()
            .map_err(|_| parse_error(format!("bad timestamp '{time_str}'")))?;
        let points_str = field(points_idx)?;
        let points: usize = points_str
            .parse()
            .map_err(|_| parse_error(format!("bad point count '{points_str}'")))?;
        if points == 0 {
            return Err(parse_error("zero spline points".to_string()));
        }

        // AAA output sometimes carries extra trailing tabs; short rows are
        // the real problem.
        let expected = meta_len + points * config.data_columns.len();
        if record.len() < expected {
            return Err(parse_error(format!(
                "expected {expected} columns for {points} points, found {}",
                record.len()
            )));
        }

        let block_of = |column: DataColumn| -> Result<Option<Vec<f32>>> {
            let Some(position) = config.data_columns.iter().position(|&c| c == column) else {
                return Ok(None);
            };
            let offset = meta_len + position * points;
            let mut values = Vec::with_capacity(points);
            for i in offset..offset + points {
                let cell = field(i)?;
                let value: f32 = cell
                    .parse()
                    .map_err(|_| parse_error(format!("bad value '{cell}' in column {i}")))?;
                values.push(value);
            }
            Ok(Some(values))
        };

        let mut channels = Vec::with_capacity(3);
        match config.coordinates {
            Coordinates::Polar => {
                channels.extend(block_of(DataColumn::R)?);
                channels.extend(block_of(DataColumn::Phi)?);
            }
            Coordinates::Cartesian => {
                channels.extend(block_of(DataColumn::X)?);
                channels.extend(block_of(DataColumn::Y)?);
            }
        }
        if let Some(confidence) = block_of(DataColumn::Confidence)? {
            // confidence is exported as percentages
            channels.push(confidence.into_iter().map(|v| v / 100.0).collect());
        }

        let key = identifier_for(&prompt, &date);
        rows_by_recording.entry(key).or_default().push(SplineRow {
            time,
            points,
            channels,
        });
    }

    let mut table = BTreeMap::new();
    for (key, rows) in rows_by_recording {
        let parsed = rows_to_data(&rows, config)?;
        table.insert(key, parsed);
    }

    tracing::info!(path = %path.display(), recordings = table.len(), "read spline file");
    Ok(table)
}

fn rows_to_data(
    rows: &[SplineRow],
    config: &SplineImportConfig,
) -> Result<(ModalityData, SplineMetadata)> {
    let points = rows[0].points;
    for row in rows {
        if row.points != points {
            return Err(ValidationError::PointCountMismatch {
                expected: points,
                got: row.points,
            }
            .into());
        }
    }

    let channels = rows[0].channels.len();
    let mut samples = Array3::<f32>::zeros((rows.len(), channels, points));
    for (frame, row) in rows.iter().enumerate() {
        for (channel, values) in row.channels.iter().enumerate() {
            for (point, &value) in values.iter().enumerate() {
                samples[[frame, channel, point]] = value;
            }
        }
    }

    let timestamps: Vec<f64> = rows.iter().map(|row| row.time).collect();
    let sampling_rate = infer_sampling_rate(&timestamps, REGULAR_RATE_TOLERANCE);

    let meta = SplineMetadata {
        coordinates: config.coordinates,
        sample_points: points,
        confidence_exists: config.confidence_exists(),
    };
    let data = ModalityData::new(
        samples.into_dyn(),
        sampling_rate,
        Array1::from_vec(timestamps),
    )?;
    Ok((data, meta))
}

/// Add a Splines modality to each recording of a session from one batch
/// export file.
///
/// Rows are matched to recordings by identifier; recordings without spline
/// rows are logged and left untouched.
pub fn add_splines_from_batch_export(
    session: &mut Session,
    spline_file: &Path,
    config: &SplineImportConfig,
) -> Result<()> {
    let mut table = retrieve_splines(spline_file, config)?;

    for recording in session.recordings_mut() {
        let key = recording.identifier();
        match table.remove(&key) {
            Some((data, meta)) => {
                tracing::debug!(
                    recording = %recording.meta_data().basename,
                    frames = data.frames(),
                    "splines attached"
                );
                recording.add_modality(Modality::with_data(ModalityKind::Splines { meta }, data));
            }
            None => {
                tracing::debug!(
                    recording = %recording.meta_data().basename,
                    "no splines in batch export"
                );
            }
        }
    }

    for key in table.keys() {
        tracing::warn!(key = %key, file = %spline_file.display(), "splines matched no recording");
    }
    Ok(())
}

/// Add a Splines modality to one recording from its per-recording export
/// file, matched by the filename convention.
///
/// # Errors
///
/// A file that yields more than one distinct recording key is ambiguous and
/// a hard error.
pub fn add_splines_from_file(
    recording: &mut Recording,
    spline_file: &Path,
    config: &SplineImportConfig,
) -> Result<()> {
    let mut table = retrieve_splines(spline_file, config)?;

    if table.len() > 1 {
        return Err(ValidationError::AmbiguousSplineFile {
            path: spline_file.to_path_buf(),
            keys: table.keys().cloned().collect(),
        }
        .into());
    }

    match table.pop_first() {
        Some((key, (data, meta))) => {
            if key != recording.identifier() {
                tracing::debug!(
                    key = %key,
                    recording = %recording.identifier(),
                    "spline key differs from identifier, matched by filename"
                );
            }
            recording.add_modality(Modality::with_data(ModalityKind::Splines { meta }, data));
        }
        None => {
            tracing::warn!(file = %spline_file.display(), "spline file holds no rows");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::NaiveDate;
    use tempfile::TempDir;

    use crate::data::RecordingMetaData;

    fn polar_config() -> SplineImportConfig {
        SplineImportConfig {
            coordinates: Coordinates::Polar,
            interleaved: false,
            headers: true,
            delimiter: '\t',
            meta_columns: vec![
                MetaColumn::Id,
                MetaColumn::DateAndTime,
                MetaColumn::TimeInRecording,
                MetaColumn::Prompt,
                MetaColumn::NumberOfSplinePoints,
            ],
            data_columns: vec![DataColumn::R, DataColumn::Phi, DataColumn::Confidence],
            datetime_format: "%m/%d/%Y %I:%M:%S %p".to_string(),
        }
    }

    fn write_spline_file(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut content = String::from("header line\n");
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    // id, date, time, prompt, points, r1 r2, phi1 phi2, conf1 conf2
    fn row(time: &str, prompt: &str, date: &str) -> String {
        format!("rec1\t{date}\t{time}\t{prompt}\t2\t2.0\t2.0\t0.0\t1.5707964\t80\t100")
    }

    #[test]
    fn groups_rows_and_decodes_blocks() {
        let dir = TempDir::new().unwrap();
        let date_a = "03/14/2024 10:30:15 AM";
        let date_b = "03/14/2024 10:45:00 AM";
        let rows = [
            row("0.000", "call mother", date_a),
            row("0.010", "call mother", date_a),
            row("0.000", "call father", date_b),
        ];
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_spline_file(dir.path(), "batch.csv", &refs);

        let table = retrieve_splines(&path, &polar_config()).unwrap();

        assert_eq!(table.len(), 2);
        let (data, meta) = &table["call mother 14/03/2024 10:30:15"];
        assert_eq!(data.frames(), 2);
        assert_eq!(meta.sample_points, 2);
        assert!(meta.confidence_exists);

        // channel 0 = r, channel 1 = phi, channel 2 = confidence / 100
        assert!((data.samples()[[0, 0, 0]] - 2.0).abs() < 1e-6);
        assert!((data.samples()[[0, 1, 1]] - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((data.samples()[[0, 2, 0]] - 0.8).abs() < 1e-6);
        assert!((data.samples()[[0, 2, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn regular_deltas_within_tolerance_give_a_rate() {
        // deltas 0.010 and 0.011: ratio 1.1, inside the 10% tolerance
        let rate = infer_sampling_rate(&[0.000, 0.010, 0.021], REGULAR_RATE_TOLERANCE);
        assert!((rate - 95.238).abs() < 0.01);
    }

    #[test]
    fn irregular_deltas_report_rate_zero() {
        // deltas 0.010 and 0.100: ratio 10
        let rate = infer_sampling_rate(&[0.000, 0.010, 0.110], REGULAR_RATE_TOLERANCE);
        assert!(rate.abs() < 1e-12);
    }

    #[test]
    fn too_few_rows_report_rate_zero() {
        assert!(infer_sampling_rate(&[0.3], REGULAR_RATE_TOLERANCE).abs() < 1e-12);
    }

    #[test]
    fn interleaved_layout_fails_before_reading() {
        let mut config = polar_config();
        config.interleaved = true;

        assert!(matches!(
            config.validate(),
            Err(Error::Unsupported(
                UnsupportedOperation::InterleavedCoordinates
            ))
        ));
    }

    #[test]
    fn coordinate_column_mismatch_is_rejected() {
        let mut config = polar_config();
        config.data_columns = vec![DataColumn::X, DataColumn::Y];

        assert!(matches!(
            config.validate(),
            Err(Error::Validation(ValidationError::InvalidSplineConfig { .. }))
        ));
    }

    #[test]
    fn variable_point_counts_are_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let date = "03/14/2024 10:30:15 AM";
        let short_row = format!("rec1\t{date}\t0.010\tcall mother\t1\t2.0\t0.0\t80");
        let rows = [row("0.000", "call mother", date), short_row];
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_spline_file(dir.path(), "batch.csv", &refs);

        assert!(matches!(
            retrieve_splines(&path, &polar_config()),
            Err(Error::Validation(
                ValidationError::PointCountMismatch { .. }
            ))
        ));
    }

    #[test]
    fn short_rows_name_the_row() {
        let dir = TempDir::new().unwrap();
        let date = "03/14/2024 10:30:15 AM";
        let truncated = format!("rec1\t{date}\t0.000\tcall mother\t2\t2.0\t2.0\t0.0");
        let path = write_spline_file(dir.path(), "batch.csv", &[truncated.as_str()]);

        match retrieve_splines(&path, &polar_config()) {
            Err(Error::Import(ImportError::Parse { message, .. })) => {
                assert!(message.contains("row 0"), "message was: {message}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn single_recording_file_with_two_keys_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let date_a = "03/14/2024 10:30:15 AM";
        let date_b = "03/14/2024 10:45:00 AM";
        let rows = [
            row("0.000", "call mother", date_a),
            row("0.000", "call father", date_b),
        ];
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_spline_file(dir.path(), "File001_splines.csv", &refs);

        let mut recording = Recording::new(RecordingMetaData {
            participant_id: "P1".to_string(),
            prompt: "call mother".to_string(),
            time_of_recording: NaiveDate::from_ymd_opt(2024, 3, 14)
                .unwrap()
                .and_hms_opt(10, 30, 15)
                .unwrap(),
            basename: "File001".to_string(),
            path: dir.path().to_path_buf(),
        });

        assert!(matches!(
            add_splines_from_file(&mut recording, &path, &polar_config()),
            Err(Error::Validation(
                ValidationError::AmbiguousSplineFile { .. }
            ))
        ));
    }

    #[test]
    fn batch_export_attaches_by_identifier() {
        use crate::data::{DataSource, Session};

        let dir = TempDir::new().unwrap();
        let date = "03/14/2024 10:30:15 AM";
        let rows = [
            row("0.000", "call mother", date),
            row("0.010", "call mother", date),
        ];
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_spline_file(dir.path(), "batch.csv", &refs);

        let matching = Recording::new(RecordingMetaData {
            participant_id: "P1".to_string(),
            prompt: "call mother".to_string(),
            time_of_recording: NaiveDate::from_ymd_opt(2024, 3, 14)
                .unwrap()
                .and_hms_opt(10, 30, 15)
                .unwrap(),
            basename: "File001".to_string(),
            path: dir.path().to_path_buf(),
        });
        let other = Recording::new(RecordingMetaData {
            participant_id: "P1".to_string(),
            prompt: "call father".to_string(),
            time_of_recording: NaiveDate::from_ymd_opt(2024, 3, 14)
                .unwrap()
                .and_hms_opt(11, 0, 0)
                .unwrap(),
            basename: "File002".to_string(),
            path: dir.path().to_path_buf(),
        });
        let mut session = Session::new(
            "session1".to_string(),
            dir.path().to_path_buf(),
            DataSource::Aaa,
            vec![matching, other],
        );

        add_splines_from_batch_export(&mut session, &path, &polar_config()).unwrap();

        assert!(session.recordings()[0].modality("Splines").is_some());
        assert!(session.recordings()[1].modality("Splines").is_none());
    }
}

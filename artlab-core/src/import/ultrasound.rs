//! Raw ultrasound decoding: vendor `.ult` frame files and their `US.txt`
//! metadata sidecars.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::Array3;

use crate::data::{ModalityData, UltrasoundMetadata};
use crate::error::{Error, ImportError, Result};

/// Suffix of the vendor metadata sidecar shared by a recording's files.
pub const META_SUFFIX: &str = "US.txt";
/// Extension of raw ultrasound frame files.
pub const ULTRASOUND_EXTENSION: &str = "ult";

const KEY_SCANLINES: &str = "NumVectors";
const KEY_PIXELS: &str = "PixPerVector";
const KEY_FRAME_RATE: &str = "FramesPerSec";
const KEY_FIRST_FRAME_TIME: &str = "TimeInSecsOfFirstFrame";

/// Read a raw ultrasound file into frame-major sample data.
///
/// The file holds unsigned bytes; frame count comes from the file size and
/// the scanline geometry, and the timevector is regular at the recorded
/// frame rate starting at `time_offset`.
///
/// # Errors
///
/// Fails when the file is absent, or when its size is not a whole number of
/// frames.
pub fn read_ult(
    path: &Path,
    meta: &UltrasoundMetadata,
    time_offset: f64,
) -> Result<ModalityData> {
    if !path.is_file() {
        return Err(Error::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let bytes = fs::read(path)?;
    let frame_len = meta.scanlines * meta.pixels_per_scanline;
    if frame_len == 0 || bytes.len() % frame_len != 0 {
        return Err(ImportError::RaggedUltrasound {
            bytes: bytes.len(),
            scanlines: meta.scanlines,
            pixels: meta.pixels_per_scanline,
        }
        .into());
    }
    let frames = bytes.len() / frame_len;

    let samples = Array3::from_shape_vec(
        (frames, meta.scanlines, meta.pixels_per_scanline),
        bytes.into_iter().map(f32::from).collect(),
    )?;

    tracing::debug!(path = %path.display(), frames, "read ultrasound file");
    ModalityData::with_time_offset(samples.into_dyn(), meta.frames_per_sec, time_offset)
}

/// Parse a vendor `US.txt` metadata sidecar.
///
/// The file holds `key=value` lines. The exact missing keys are reported
/// when any required key is absent.
pub fn parse_ultrasound_meta(path: &Path) -> Result<UltrasoundMetadata> {
    if !path.is_file() {
        return Err(Error::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let text = fs::read_to_string(path)?;
    let mut values: BTreeMap<&str, &str> = BTreeMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim(), value.trim());
        }
    }

    let required = [
        KEY_SCANLINES,
        KEY_PIXELS,
        KEY_FRAME_RATE,
        KEY_FIRST_FRAME_TIME,
    ];
    let missing: Vec<String> = required
        .iter()
        .filter(|key| !values.contains_key(*key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingMetadata {
            context: path.display().to_string(),
            keys: missing,
        });
    }

    let parse_usize = |key: &str| -> Result<usize> {
        values[key].parse().map_err(|_| {
            ImportError::Parse {
                path: path.to_path_buf(),
                message: format!("{key} is not an integer: {}", values[key]),
            }
            .into()
        })
    };
    let parse_f64 = |key: &str| -> Result<f64> {
        values[key].parse().map_err(|_| {
            ImportError::Parse {
                path: path.to_path_buf(),
                message: format!("{key} is not a number: {}", values[key]),
            }
            .into()
        })
    };

    Ok(UltrasoundMetadata {
        scanlines: parse_usize(KEY_SCANLINES)?,
        pixels_per_scanline: parse_usize(KEY_PIXELS)?,
        frames_per_sec: parse_f64(KEY_FRAME_RATE)?,
        time_of_first_frame: parse_f64(KEY_FIRST_FRAME_TIME)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tempfile::TempDir;

    use crate::error::Error;

    fn test_meta() -> UltrasoundMetadata {
        UltrasoundMetadata {
            scanlines: 2,
            pixels_per_scanline: 3,
            frames_per_sec: 100.0,
            time_of_first_frame: 0.5,
        }
    }

    #[test]
    fn decodes_frames_and_timevector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001.ult");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0u8, 1, 2, 3, 4, 5, 10, 11, 12, 13, 14, 15])
            .unwrap();

        let data = read_ult(&path, &test_meta(), 0.5).unwrap();

        assert_eq!(data.samples().shape(), &[2, 2, 3]);
        assert!((data.samples()[[0, 0, 1]] - 1.0).abs() < 1e-6);
        assert!((data.samples()[[1, 1, 2]] - 15.0).abs() < 1e-6);
        assert!((data.timevector()[0] - 0.5).abs() < 1e-12);
        assert!((data.timevector()[1] - 0.51).abs() < 1e-12);
    }

    #[test]
    fn rejects_partial_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001.ult");
        std::fs::write(&path, [0u8; 7]).unwrap();

        assert!(matches!(
            read_ult(&path, &test_meta(), 0.0),
            Err(Error::Import(ImportError::RaggedUltrasound { .. }))
        ));
    }

    #[test]
    fn missing_file_is_reported_as_such() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File404.ult");

        assert!(matches!(
            read_ult(&path, &test_meta(), 0.0),
            Err(Error::MissingFile { .. })
        ));
    }

    #[test]
    fn parses_vendor_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001US.txt");
        std::fs::write(
            &path,
            "NumVectors=64\nPixPerVector=842\nFramesPerSec=81.5\nTimeInSecsOfFirstFrame=0.04\n",
        )
        .unwrap();

        let meta = parse_ultrasound_meta(&path).unwrap();

        assert_eq!(meta.scanlines, 64);
        assert_eq!(meta.pixels_per_scanline, 842);
        assert!((meta.frames_per_sec - 81.5).abs() < 1e-12);
        assert!((meta.time_of_first_frame - 0.04).abs() < 1e-12);
    }

    #[test]
    fn lists_exactly_the_missing_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001US.txt");
        std::fs::write(&path, "NumVectors=64\nFramesPerSec=81.5\n").unwrap();

        match parse_ultrasound_meta(&path) {
            Err(Error::MissingMetadata { keys, .. }) => {
                assert_eq!(keys, ["PixPerVector", "TimeInSecsOfFirstFrame"]);
            }
            other => panic!("expected MissingMetadata, got {other:?}"),
        }
    }
}

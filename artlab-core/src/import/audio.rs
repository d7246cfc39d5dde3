//! Audio loading for recording WAV files.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use ndarray::Array1;

use crate::data::ModalityData;
use crate::error::{Error, ImportError, Result};

/// Extension of recorded audio files.
pub const AUDIO_EXTENSION: &str = "wav";

/// Load a WAV file as mono f32 sample data.
///
/// Stereo files are folded to mono by averaging the channels; the
/// timevector is regular at the file's sample rate starting at
/// `time_offset`.
///
/// # Errors
///
/// Fails when the file is absent, cannot be decoded, or has an unsupported
/// channel count.
pub fn read_wav(path: &Path, time_offset: f64) -> Result<ModalityData> {
    if !path.is_file() {
        return Err(Error::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let mut samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / i16::MAX as f32))
            .collect::<hound::Result<_>>()?,
    };

    if spec.channels == 0 || spec.channels > 2 {
        return Err(ImportError::InvalidChannels(spec.channels).into());
    }
    if spec.channels == 2 {
        samples = samples
            .chunks(2)
            .map(|chunk| chunk.iter().sum::<f32>() / 2.0)
            .collect();
    }

    tracing::debug!(path = %path.display(), frames = samples.len(), "read audio file");
    ModalityData::with_time_offset(
        Array1::from_vec(samples).into_dyn(),
        spec.sample_rate as f64,
        time_offset,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use hound::{WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample((sample * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reads_mono_with_regular_timevector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001.wav");
        write_wav(&path, 1000, 1, &[0.1, 0.2, 0.3]);

        let data = read_wav(&path, 0.0).unwrap();

        assert_eq!(data.frames(), 3);
        assert!((data.sampling_rate() - 1000.0).abs() < 1e-12);
        assert!((data.samples()[[1]] - 0.2).abs() < 0.01);
        assert!((data.timevector()[2] - 0.002).abs() < 1e-12);
    }

    #[test]
    fn folds_stereo_to_mono() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001.wav");
        write_wav(&path, 1000, 2, &[0.2, 0.4, 0.6, 0.8]);

        let data = read_wav(&path, 0.0).unwrap();

        assert_eq!(data.frames(), 2);
        assert!((data.samples()[[0]] - 0.3).abs() < 0.01);
        assert!((data.samples()[[1]] - 0.7).abs() < 0.01);
    }

    #[test]
    fn rejects_surround_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("File001.wav");
        write_wav(&path, 1000, 6, &[0.0; 12]);

        assert!(matches!(
            read_wav(&path, 0.0),
            Err(Error::Import(ImportError::InvalidChannels(6)))
        ));
    }
}

//! Session import from a directory of vendor-exported recording files.
//!
//! Each recording is a family of files sharing a base name: a prompt file
//! (`<base>.txt`), the ultrasound metadata sidecar (`<base>US.txt`), raw
//! frames (`<base>.ult`) and audio (`<base>.wav`). Missing companions mark
//! the recording excluded; they never abort the session.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::data::recording::EXPORT_DATETIME_FORMAT;
use crate::data::{DataSource, Modality, ModalityKind, Recording, RecordingMetaData, Session};
use crate::error::{Error, ImportError, Result};
use crate::import::{audio, ultrasound};

/// Parse a prompt file: prompt text, recording date-time, participant.
///
/// Line 1 is the prompt, line 2 the date-time, line 3 the participant name
/// before the first comma.
fn read_prompt_file(path: &Path) -> Result<(String, NaiveDateTime, String)> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();

    let parse_error = |message: &str| -> Error {
        ImportError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
        .into()
    };

    let prompt = lines
        .next()
        .ok_or_else(|| parse_error("empty prompt file"))?
        .trim()
        .to_string();
    let date_line = lines
        .next()
        .ok_or_else(|| parse_error("missing date line"))?
        .trim();
    let time_of_recording = NaiveDateTime::parse_from_str(date_line, EXPORT_DATETIME_FORMAT)
        .map_err(|e| parse_error(&format!("bad date '{date_line}': {e}")))?;
    let participant = lines
        .next()
        .ok_or_else(|| parse_error("missing participant line"))?
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok((prompt, time_of_recording, participant))
}

/// Read a recording exclusion list: one base name per line, tab-separated
/// from an optional comment for human readers.
pub fn read_exclusion_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let names: Vec<String> = text
        .lines()
        .filter_map(|line| line.split('\t').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    tracing::info!(path = %path.display(), names = names.len(), "read exclusion list");
    Ok(names)
}

fn import_recording(dir: &Path, basename: &str, excluded_names: &[String]) -> Result<Recording> {
    let prompt_path = dir.join(format!("{basename}.txt"));
    let (prompt, time_of_recording, participant_id) = read_prompt_file(&prompt_path)?;

    let mut recording = Recording::new(RecordingMetaData {
        participant_id,
        prompt,
        time_of_recording,
        basename: basename.to_string(),
        path: dir.to_path_buf(),
    });

    if excluded_names.iter().any(|name| name == basename) {
        recording.exclude("listed in the exclusion list");
    }

    let meta_path = dir.join(format!("{basename}{}", ultrasound::META_SUFFIX));
    let ult_path = dir
        .join(basename)
        .with_extension(ultrasound::ULTRASOUND_EXTENSION);
    let wav_path = dir.join(basename).with_extension(audio::AUDIO_EXTENSION);

    match (meta_path.is_file(), ult_path.is_file()) {
        (true, true) => match ultrasound::parse_ultrasound_meta(&meta_path) {
            Ok(meta) => {
                let time_offset = meta.time_of_first_frame;
                recording.add_modality(Modality::new(
                    ModalityKind::RawUltrasound { meta },
                    Some(ult_path),
                    time_offset,
                ));
            }
            Err(error) => {
                recording.exclude(&format!("unusable ultrasound metadata: {error}"));
            }
        },
        (false, _) => {
            recording.exclude(&format!("{} does not exist", meta_path.display()));
        }
        (_, false) => {
            recording.exclude(&format!("{} does not exist", ult_path.display()));
        }
    }

    if wav_path.is_file() {
        recording.add_modality(Modality::new(ModalityKind::Audio, Some(wav_path), 0.0));
    } else {
        recording.exclude(&format!("{} does not exist", wav_path.display()));
    }

    Ok(recording)
}

/// Import a session from a vendor directory export.
///
/// Recordings are discovered from prompt files; companion checks mark
/// incomplete recordings excluded. A failure to import one recording is
/// logged and isolated; it does not abort the session.
pub fn read_session_dir(path: &Path, exclusion_list: Option<&Path>) -> Result<Session> {
    if !path.is_dir() {
        return Err(Error::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let excluded_names = match exclusion_list {
        Some(list_path) => read_exclusion_list(list_path)?,
        None => Vec::new(),
    };

    let mut prompt_files: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("txt")
                && !p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(ultrasound::META_SUFFIX))
        })
        .collect();
    prompt_files.sort();

    let mut recordings = Vec::new();
    for prompt_file in prompt_files {
        let Some(basename) = prompt_file.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match import_recording(path, basename, &excluded_names) {
            Ok(recording) => recordings.push(recording),
            Err(error) => {
                tracing::error!(
                    recording = basename,
                    %error,
                    "recording skipped on import failure"
                );
            }
        }
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session")
        .to_string();
    tracing::info!(session = %name, recordings = recordings.len(), "imported session");

    Ok(Session::new(
        name,
        path.to_path_buf(),
        DataSource::Aaa,
        recordings,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_recording_files(dir: &Path, basename: &str, with_ult: bool) {
        fs::write(
            dir.join(format!("{basename}.txt")),
            "call mother\n14/03/2024 10:30:15\nSpeaker A, session 1\n",
        )
        .unwrap();
        fs::write(
            dir.join(format!("{basename}US.txt")),
            "NumVectors=2\nPixPerVector=3\nFramesPerSec=100\nTimeInSecsOfFirstFrame=0.0\n",
        )
        .unwrap();
        if with_ult {
            fs::write(dir.join(format!("{basename}.ult")), [1u8; 12]).unwrap();
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate: 1000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(dir.join(format!("{basename}.wav")), spec).unwrap();
        writer.write_sample(0_i16).unwrap();
        writer.write_sample(1000_i16).unwrap();
        writer.finalize().unwrap();
    }

    #[test]
    fn imports_complete_recordings_lazily() {
        let dir = TempDir::new().unwrap();
        write_recording_files(dir.path(), "File001", true);

        let mut session = read_session_dir(dir.path(), None).unwrap();

        assert_eq!(session.len(), 1);
        let recording = &mut session.recordings_mut()[0];
        assert!(!recording.excluded());
        assert_eq!(recording.meta_data().participant_id, "Speaker A");
        assert_eq!(recording.identifier(), "call mother 14/03/2024 10:30:15");

        // attached unloaded, readable on demand
        assert!(recording.modality("RawUltrasound").unwrap().data().is_none());
        let data = recording.loaded_data("RawUltrasound").unwrap();
        assert_eq!(data.samples().shape(), &[2, 2, 3]);
        let audio = recording.loaded_data("Audio").unwrap();
        assert_eq!(audio.frames(), 2);
    }

    #[test]
    fn missing_ultrasound_marks_excluded_but_keeps_recording() {
        let dir = TempDir::new().unwrap();
        write_recording_files(dir.path(), "File001", false);
        write_recording_files(dir.path(), "File002", true);

        let session = read_session_dir(dir.path(), None).unwrap();

        assert_eq!(session.len(), 2);
        let by_name = |name: &str| {
            session
                .recordings()
                .iter()
                .find(|r| r.meta_data().basename == name)
                .unwrap()
        };
        assert!(by_name("File001").excluded());
        assert!(!by_name("File002").excluded());
    }

    #[test]
    fn exclusion_list_applies() {
        let dir = TempDir::new().unwrap();
        write_recording_files(dir.path(), "File001", true);
        let list = dir.path().join("exclude.csv");
        fs::write(&list, "File001\tnoisy recording\n").unwrap();

        let session = read_session_dir(dir.path(), Some(&list)).unwrap();

        assert!(session.recordings()[0].excluded());
    }

    #[test]
    fn malformed_prompt_file_skips_only_that_recording() {
        let dir = TempDir::new().unwrap();
        write_recording_files(dir.path(), "File001", true);
        fs::write(dir.path().join("File000.txt"), "prompt only\n").unwrap();

        let session = read_session_dir(dir.path(), None).unwrap();

        assert_eq!(session.len(), 1);
        assert_eq!(session.recordings()[0].meta_data().basename, "File001");
    }
}

//! Loading the session object graph back from its directory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::data::{Modality, ModalityData, ModalityKind, Recording, Session, Statistic};
use crate::error::{Error, Result, StoreError};
use crate::import;
use crate::store::schemas::{
    self, META_SUFFIX, ListingEntry, ModalityDataFile, ModalitySchema, RecordingSchema,
    SessionSchema, StatisticDataFile, StatisticSchema,
};

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    serde_json::from_reader(open(path)?).map_err(|e| StoreError::Json(e).into())
}

/// Read one modality's persisted sample data.
///
/// The payload is validated on the way back in, so a corrupted file cannot
/// produce an inconsistent timevector.
pub fn read_modality_data(path: &Path) -> Result<ModalityData> {
    let payload: ModalityDataFile =
        bincode::deserialize_from(open(path)?).map_err(StoreError::Binary)?;
    ModalityData::new(payload.samples, payload.sampling_rate, payload.timevector)
}

fn read_statistic(dir: &Path, entry: &ListingEntry) -> Result<Statistic> {
    let meta_name = entry
        .meta_name
        .as_deref()
        .ok_or_else(|| StoreError::UnknownArtifact {
            path: dir.join(&entry.data_name),
        })?;
    let meta_path = dir.join(meta_name);
    let schema: StatisticSchema = read_json(&meta_path)?;
    schemas::check_version(&schema.format_version, &meta_path)?;
    schemas::check_object_type(&schema.object_type, schemas::OBJECT_STATISTIC, &meta_path)?;

    let payload: StatisticDataFile =
        bincode::deserialize_from(open(&dir.join(&entry.data_name))?).map_err(StoreError::Binary)?;
    Ok(Statistic::new(schema.parameters, payload.data))
}

/// Reconstruct one modality from its listing entry.
///
/// artlab sidecars come back unloaded with a load path; raw modalities
/// re-read their vendor metadata and point at the recorded files.
fn load_modality(dir: &Path, listed_name: &str, entry: &ListingEntry) -> Result<Modality> {
    if let Some(meta_name) = entry
        .meta_name
        .as_deref()
        .filter(|n| n.ends_with(META_SUFFIX))
    {
        let meta_path = dir.join(meta_name);
        let schema: ModalitySchema = read_json(&meta_path)?;
        schemas::check_version(&schema.format_version, &meta_path)?;
        schemas::check_object_type(&schema.object_type, schemas::OBJECT_MODALITY, &meta_path)?;
        if schema.name != listed_name {
            tracing::warn!(
                listed = listed_name,
                stored = %schema.name,
                "modality listing and sidecar disagree on the name"
            );
        }

        let mut modality = Modality::new(
            schema.parameters.kind,
            None,
            schema.parameters.time_offset,
        );
        modality.set_load_path(dir.join(&entry.data_name));
        return Ok(modality);
    }

    let data_path = dir.join(&entry.data_name);
    match data_path.extension().and_then(|e| e.to_str()) {
        Some(import::ultrasound::ULTRASOUND_EXTENSION) => {
            let meta_name = entry
                .meta_name
                .as_deref()
                .ok_or_else(|| StoreError::UnknownArtifact {
                    path: data_path.clone(),
                })?;
            let meta = import::ultrasound::parse_ultrasound_meta(&dir.join(meta_name))?;
            let time_offset = meta.time_of_first_frame;
            Ok(Modality::new(
                ModalityKind::RawUltrasound { meta },
                Some(data_path),
                time_offset,
            ))
        }
        Some(import::audio::AUDIO_EXTENSION) => {
            Ok(Modality::new(ModalityKind::Audio, Some(data_path), 0.0))
        }
        _ => Err(StoreError::UnknownArtifact { path: data_path }.into()),
    }
}

fn load_recording(dir: &Path, meta_file: &str) -> Result<Recording> {
    let meta_path = dir.join(meta_file);
    let schema: RecordingSchema = read_json(&meta_path)?;
    schemas::check_version(&schema.format_version, &meta_path)?;
    schemas::check_object_type(&schema.object_type, schemas::OBJECT_RECORDING, &meta_path)?;

    let mut recording = Recording::new(schema.parameters.meta_data);
    recording.set_excluded(schema.parameters.excluded);

    for (name, entry) in &schema.modalities {
        match load_modality(dir, name, entry) {
            Ok(modality) => recording.add_modality(modality),
            Err(Error::MissingFile { path }) => {
                recording.exclude(&format!("{} went missing since saving", path.display()));
            }
            Err(error) => return Err(error),
        }
    }

    for entry in schema.statistics.values() {
        let statistic = read_statistic(dir, entry)?;
        recording.add_statistic(statistic, true)?;
    }

    Ok(recording)
}

/// Load a previously saved session from its directory.
///
/// A failure to load one recording is logged and isolated; it does not
/// abort the session.
pub fn load_session(dir: &Path) -> Result<Session> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session")
        .to_string();
    let meta_path = dir.join(format!("{name}.Session{META_SUFFIX}"));
    let schema: SessionSchema = read_json(&meta_path)?;
    schemas::check_version(&schema.format_version, &meta_path)?;
    schemas::check_object_type(&schema.object_type, schemas::OBJECT_SESSION, &meta_path)?;

    let mut recordings = Vec::with_capacity(schema.recordings.len());
    for meta_file in &schema.recordings {
        match load_recording(dir, meta_file) {
            Ok(recording) => recordings.push(recording),
            Err(error) => {
                tracing::error!(file = meta_file, %error, "recording skipped on load failure");
            }
        }
    }

    let mut session = Session::new(
        schema.name,
        dir.to_path_buf(),
        schema.parameters.data_source,
        recordings,
    );
    for entry in schema.statistics.values() {
        let statistic = read_statistic(dir, entry)?;
        session.add_statistic(statistic, true)?;
    }

    tracing::info!(session = %session.name(), recordings = session.len(), "loaded session");
    Ok(session)
}

/// Load a saved session if the directory holds artlab metadata, otherwise
/// import it as a vendor directory.
pub fn load_or_import(path: &Path) -> Result<Session> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let session_meta = path.join(format!("{name}.Session{META_SUFFIX}"));
    if session_meta.is_file() {
        load_session(path)
    } else {
        import::read_session_dir(path, None)
    }
}

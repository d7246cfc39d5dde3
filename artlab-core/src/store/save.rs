//! Saving the session object graph to its directory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::data::{Modality, ModalityKind, Recording, Session, Statistic};
use crate::error::{Result, StoreError};
use crate::store::schemas::{
    self, DATA_SUFFIX, FILE_VERSION, META_SUFFIX, ListingEntry, ModalityDataFile,
    ModalityParameters, ModalitySchema, RecordingParameters, RecordingSchema, SessionParameters,
    SessionSchema, StatisticDataFile, StatisticSchema,
};

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(create(path)?, value).map_err(StoreError::Json)?;
    tracing::debug!(path = %path.display(), "wrote metadata");
    Ok(())
}

fn write_binary<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    bincode::serialize_into(create(path)?, value).map_err(StoreError::Binary)?;
    tracing::debug!(path = %path.display(), "wrote data");
    Ok(())
}

/// Save one modality, returning its listing entry.
///
/// Raw modalities are referenced by their recorded files; derived and
/// imported modalities write a binary data file plus a metadata sidecar.
fn save_modality(
    dir: &Path,
    basename: &str,
    modality: &mut Modality,
) -> Result<Option<ListingEntry>> {
    let name = modality.name();

    match modality.kind() {
        ModalityKind::RawUltrasound { .. } | ModalityKind::Audio => {
            let Some(data_path) = modality.data_path() else {
                tracing::warn!(modality = %name, "raw modality without a source file, not listed");
                return Ok(None);
            };
            let data_name = data_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let meta_name = matches!(modality.kind(), ModalityKind::RawUltrasound { .. })
                .then(|| format!("{basename}US.txt"));
            Ok(Some(ListingEntry {
                data_name,
                meta_name,
            }))
        }
        _ => {
            let stem = format!("{basename}.{}", schemas::underscored(&name));
            let data_name = format!("{stem}{DATA_SUFFIX}");
            let meta_name = format!("{stem}{META_SUFFIX}");
            let data_path = dir.join(&data_name);

            if let Some(data) = modality.data() {
                let payload = ModalityDataFile {
                    samples: data.samples().clone(),
                    sampling_rate: data.sampling_rate(),
                    timevector: data.timevector().clone(),
                };
                write_binary(&data_path, &payload)?;
            } else if modality.load_path().is_none() {
                tracing::warn!(modality = %name, "no data in memory or on disk, meta only");
            }

            let schema = ModalitySchema {
                object_type: schemas::OBJECT_MODALITY.to_string(),
                name: name.clone(),
                format_version: FILE_VERSION.to_string(),
                parameters: ModalityParameters {
                    kind: modality.kind().clone(),
                    time_offset: modality.time_offset(),
                },
            };
            write_json(&dir.join(&meta_name), &schema)?;

            modality.set_load_path(data_path);
            Ok(Some(ListingEntry {
                data_name,
                meta_name: Some(meta_name),
            }))
        }
    }
}

fn save_statistic(dir: &Path, owner_name: &str, statistic: &Statistic) -> Result<ListingEntry> {
    let name = statistic.name();
    let stem = format!("{owner_name}.{}", schemas::underscored(&name));
    let data_name = format!("{stem}{DATA_SUFFIX}");
    let meta_name = format!("{stem}{META_SUFFIX}");

    write_binary(
        &dir.join(&data_name),
        &StatisticDataFile {
            data: statistic.data().clone(),
        },
    )?;
    write_json(
        &dir.join(&meta_name),
        &StatisticSchema {
            object_type: schemas::OBJECT_STATISTIC.to_string(),
            name,
            format_version: FILE_VERSION.to_string(),
            parameters: statistic.kind().clone(),
        },
    )?;

    Ok(ListingEntry {
        data_name,
        meta_name: Some(meta_name),
    })
}

/// Save one recording's modalities and statistics plus its own metadata,
/// returning the recording meta filename.
fn save_recording(dir: &Path, recording: &mut Recording) -> Result<String> {
    let basename = recording.meta_data().basename.clone();
    tracing::debug!(recording = %basename, "saving recording");

    // Repopulate anything releasable that was released and never persisted,
    // so the save is complete.
    let names: Vec<String> = recording.modality_names().map(str::to_string).collect();
    for name in &names {
        let needs_data = recording.modality(name).is_some_and(|m| {
            m.kind().is_derived()
                && !m.kind().eager_only()
                && !m.is_loaded()
                && m.load_path().is_none()
        });
        if needs_data {
            recording.ensure_loaded(name)?;
        }
    }

    let mut modalities = BTreeMap::new();
    for name in &names {
        if let Some(modality) = recording.modality_mut(name) {
            if let Some(entry) = save_modality(dir, &basename, modality)? {
                modalities.insert(name.clone(), entry);
            }
        }
    }

    let mut statistics = BTreeMap::new();
    for statistic in recording.statistics() {
        statistics.insert(statistic.name(), save_statistic(dir, &basename, statistic)?);
    }

    let meta_name = format!("{basename}.Recording{META_SUFFIX}");
    let schema = RecordingSchema {
        object_type: schemas::OBJECT_RECORDING.to_string(),
        name: basename.clone(),
        format_version: FILE_VERSION.to_string(),
        parameters: RecordingParameters {
            meta_data: recording.meta_data().clone(),
            excluded: recording.excluded(),
        },
        modalities,
        statistics,
    };
    write_json(&dir.join(&meta_name), &schema)?;

    Ok(meta_name)
}

/// Save a session into its directory.
///
/// Excluded recordings are saved too, for transparency. Returns the path of
/// the session metadata file.
pub fn save_session(session: &mut Session) -> Result<PathBuf> {
    let dir = session.path().to_path_buf();
    tracing::info!(session = %session.name(), path = %dir.display(), "saving session");

    let mut recording_metas = Vec::with_capacity(session.len());
    for recording in session.recordings_mut() {
        recording_metas.push(save_recording(&dir, recording)?);
    }

    let mut statistics = BTreeMap::new();
    let session_name = session.name().to_string();
    for statistic in session.statistics() {
        statistics.insert(
            statistic.name(),
            save_statistic(&dir, &session_name, statistic)?,
        );
    }

    let meta_path = dir.join(format!("{session_name}.Session{META_SUFFIX}"));
    let schema = SessionSchema {
        object_type: schemas::OBJECT_SESSION.to_string(),
        name: session_name,
        format_version: FILE_VERSION.to_string(),
        parameters: SessionParameters {
            path: dir.clone(),
            data_source: session.data_source(),
        },
        recordings: recording_metas,
        statistics,
    };
    write_json(&meta_path, &schema)?;

    Ok(meta_path)
}

//! End-to-end tests for the artlab CLI over a synthetic session directory.

use std::fs;
use std::path::Path;

use artlab_cli::cli::{Cli, run};
use clap::Parser;
use tempfile::TempDir;

fn write_recording(dir: &Path, basename: &str, prompt: &str, time: &str) {
    fs::write(
        dir.join(format!("{basename}.txt")),
        format!("{prompt}\n{time}\nSpeaker A, session 1\n"),
    )
    .unwrap();
    fs::write(
        dir.join(format!("{basename}US.txt")),
        "NumVectors=2\nPixPerVector=2\nFramesPerSec=100\nTimeInSecsOfFirstFrame=0.0\n",
    )
    .unwrap();

    // 4 frames of 2x2 bytes with visible frame-to-frame motion
    let frames: Vec<u8> = (0..4_u8)
        .flat_map(|f| [f * 10, f * 10 + 1, f * 10 + 2, f * 10 + 3])
        .collect();
    fs::write(dir.join(format!("{basename}.ult")), frames).unwrap();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 1000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(dir.join(format!("{basename}.wav")), spec).unwrap();
    for i in 0..10_i16 {
        writer.write_sample(i * 100).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn process_derives_and_saves_a_session() {
    let dir = TempDir::new().unwrap();
    write_recording(dir.path(), "File001", "call mother", "14/03/2024 10:30:15");
    write_recording(dir.path(), "File002", "call father", "14/03/2024 10:45:00");

    let cli = Cli::parse_from([
        "artlab",
        "process",
        dir.path().to_str().unwrap(),
        "--norm",
        "l1",
        "--norm",
        "l2",
        "--mse",
    ]);
    run(cli).expect("process failed");

    // derived curves and their sidecars
    assert!(dir
        .path()
        .join("File001.PD_l2_on_RawUltrasound.artlab_data")
        .is_file());
    assert!(dir
        .path()
        .join("File001.PD_l1_on_RawUltrasound.artlab_meta")
        .is_file());
    assert!(dir
        .path()
        .join("File002.MSE_l2_on_RawUltrasound.artlab_data")
        .is_file());

    // container metadata
    assert!(dir.path().join("File001.Recording.artlab_meta").is_file());
    let session_name = dir.path().file_name().unwrap().to_str().unwrap();
    assert!(dir
        .path()
        .join(format!("{session_name}.Session.artlab_meta"))
        .is_file());

    // the distance matrix spans both recordings
    assert!(dir
        .path()
        .join(format!(
            "{session_name}.DistanceMatrix_mean_squared_error_on_AggregateImage_mean_on_RawUltrasound.artlab_data"
        ))
        .is_file());
}

#[test]
fn process_runs_again_on_the_saved_session() {
    let dir = TempDir::new().unwrap();
    write_recording(dir.path(), "File001", "call mother", "14/03/2024 10:30:15");

    let args = [
        "artlab",
        "process",
        dir.path().to_str().unwrap(),
    ];
    run(Cli::parse_from(args)).expect("first run failed");
    // second run loads the saved graph instead of importing
    run(Cli::parse_from(args)).expect("second run failed");
}

#[test]
fn info_lists_without_deriving() {
    let dir = TempDir::new().unwrap();
    write_recording(dir.path(), "File001", "call mother", "14/03/2024 10:30:15");

    let cli = Cli::parse_from(["artlab", "info", dir.path().to_str().unwrap()]);
    run(cli).expect("info failed");

    // nothing was derived or saved
    assert!(!dir.path().join("File001.Recording.artlab_meta").exists());
}

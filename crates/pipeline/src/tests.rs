//! Integration tests for the pipeline: simulated ADC, producer, ring,
//! writer thread and recording file together.

use std::fs;
use std::sync::Arc;

use adc_sensor::{AdcConfig, SimHandle, SimulatedAdc, Waveform};
use node_types::{DeviceVariant, OverrunPolicy, NUM_BUFFERS, REC_ADC_CHUNK};

use crate::error::PipelineError;
use crate::producer::{ProducerConfig, SampleProducer};
use crate::recorder::Recorder;
use crate::ring::ChunkRing;
use crate::storage::RecordingConfig;

fn recording_values(contents: &str) -> Vec<i32> {
    contents
        .lines()
        .filter(|l| !l.is_empty() && *l != ".")
        .map(|l| l.parse().unwrap())
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn setup(dir: &std::path::Path) -> (SampleProducer, Recorder, SimHandle) {
    setup_with(dir, OverrunPolicy::Refuse)
}

fn setup_with(
    dir: &std::path::Path,
    policy: OverrunPolicy,
) -> (SampleProducer, Recorder, SimHandle) {
    init_tracing();
    let sim = SimulatedAdc::new(DeviceVariant::M02);
    let handle = sim.handle();
    let mut driver = sim.into_driver(AdcConfig::default()).unwrap();
    driver.initialize().unwrap();
    handle.set_waveform(Waveform::Ramp { step: 1 });

    let ring = Arc::new(ChunkRing::new(policy));
    let (producer, control) =
        SampleProducer::new(driver, ring.clone(), &ProducerConfig::default()).unwrap();
    let config = RecordingConfig {
        directory: dir.to_path_buf(),
        marker_interval_ms: 60_000,
        stop_timeout_ms: 500,
        ..RecordingConfig::default()
    };
    let recorder = Recorder::new(&config, ring, control);
    (producer, recorder, handle)
}

#[tokio::test]
async fn recording_holds_every_sample_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (mut producer, mut recorder, sim) = setup(dir.path());

    recorder.start().unwrap();
    assert_eq!(sim.sync_pulses(), 1);
    let first = sim.sample_index() as i32;

    let count = 2 * REC_ADC_CHUNK + 37;
    for _ in 0..count {
        producer.on_data_ready();
    }
    let summary = recorder.stop().await.unwrap();

    assert_eq!(summary.samples, count as u64);
    assert!(!summary.lost_data());
    let contents = fs::read_to_string(&summary.path).unwrap();
    assert!(contents.ends_with(".\n"));
    let expected: Vec<i32> = (first..first + count as i32).collect();
    assert_eq!(recording_values(&contents), expected);
}

#[tokio::test]
async fn edges_after_stop_are_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (mut producer, mut recorder, _sim) = setup(dir.path());

    recorder.start().unwrap();
    for _ in 0..10 {
        producer.on_data_ready();
    }
    let summary = recorder.stop().await.unwrap();
    for _ in 0..10 {
        producer.on_data_ready();
    }
    assert_eq!(summary.samples, 10);
    let contents = fs::read_to_string(&summary.path).unwrap();
    assert_eq!(recording_values(&contents).len(), 10);
}

#[tokio::test]
async fn second_recording_starts_clean() {
    let dir = tempfile::tempdir().unwrap();
    let (mut producer, mut recorder, _sim) = setup(dir.path());

    recorder.start().unwrap();
    for _ in 0..300 {
        producer.on_data_ready();
    }
    recorder.stop().await.unwrap();

    recorder.start().unwrap();
    for _ in 0..5 {
        producer.on_data_ready();
    }
    let summary = recorder.stop().await.unwrap();
    assert_eq!(summary.samples, 5);
    let contents = fs::read_to_string(&summary.path).unwrap();
    assert_eq!(recording_values(&contents).len(), 5);
}

#[tokio::test]
async fn start_and_stop_are_checked_against_state() {
    let dir = tempfile::tempdir().unwrap();
    let (_producer, mut recorder, _sim) = setup(dir.path());

    assert!(matches!(
        recorder.stop().await,
        Err(PipelineError::NotRecording)
    ));
    recorder.start().unwrap();
    assert!(matches!(
        recorder.start(),
        Err(PipelineError::AlreadyRecording)
    ));
    assert!(recorder.is_recording());
    recorder.stop().await.unwrap();
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn read_errors_show_up_in_summary() {
    let dir = tempfile::tempdir().unwrap();
    let (mut producer, mut recorder, sim) = setup(dir.path());

    recorder.start().unwrap();
    sim.fail_next_transfers(4);
    for _ in 0..20 {
        producer.on_data_ready();
    }
    let summary = recorder.stop().await.unwrap();
    assert_eq!(summary.read_errors, 4);
    assert_eq!(summary.samples, 16);
    assert!(summary.lost_data());
}

#[tokio::test]
async fn unwritable_directory_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, b"x").unwrap();
    let (_producer, mut recorder, sim) = setup(&blocker);

    assert!(matches!(recorder.start(), Err(PipelineError::Storage(_))));
    assert!(!recorder.is_recording());
    // The converter is resynced before the file is opened.
    assert_eq!(sim.sync_pulses(), 1);
}

#[tokio::test]
async fn failed_publish_still_ends_the_recording() {
    let dir = tempfile::tempdir().unwrap();
    let recordings = dir.path().join("recordings");
    let (mut producer, mut recorder, _sim) = setup(&recordings);

    recorder.start().unwrap();
    {
        // Leave sealed chunks for stop to write itself.
        let _stall = recorder.sink().lock();
        for _ in 0..2 * REC_ADC_CHUNK + 10 {
            producer.on_data_ready();
        }
    }
    fs::remove_dir_all(&recordings).unwrap();

    assert!(matches!(
        recorder.stop().await,
        Err(PipelineError::Storage(_))
    ));
    assert!(!recorder.is_recording());
    assert!(recorder.sink().lock().is_none());
    assert!(matches!(
        recorder.stop().await,
        Err(PipelineError::NotRecording)
    ));

    // The directory is recreated and nothing from the lost recording leaks in.
    recorder.start().unwrap();
    for _ in 0..5 {
        producer.on_data_ready();
    }
    let summary = recorder.stop().await.unwrap();
    assert_eq!(summary.samples, 5);
    assert!(!summary.lost_data());
    let contents = fs::read_to_string(&summary.path).unwrap();
    assert_eq!(recording_values(&contents).len(), 5);
}

#[tokio::test]
async fn stalled_writer_overwrite_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let (mut producer, mut recorder, _sim) = setup_with(dir.path(), OverrunPolicy::Overwrite);

    recorder.start().unwrap();
    {
        // Holding the file stalls the writer for more than a full rotation.
        let _stall = recorder.sink().lock();
        for _ in 0..(NUM_BUFFERS + 2) * REC_ADC_CHUNK {
            producer.on_data_ready();
        }
    }
    let summary = recorder.stop().await.unwrap();

    assert!(summary.overwritten_chunks >= 2, "{}", summary);
    assert_eq!(summary.dropped_samples, 0);
    assert!(summary.lost_data());
}

#[tokio::test]
async fn stalled_writer_under_refuse_drops_new_samples() {
    let dir = tempfile::tempdir().unwrap();
    let (mut producer, mut recorder, sim) = setup(dir.path());

    recorder.start().unwrap();
    let first = sim.sample_index() as i32;
    let total = (NUM_BUFFERS + 1) * REC_ADC_CHUNK;
    {
        let _stall = recorder.sink().lock();
        for _ in 0..total {
            producer.on_data_ready();
        }
    }
    let summary = recorder.stop().await.unwrap();

    assert_eq!(summary.dropped_samples, REC_ADC_CHUNK as u64);
    assert_eq!(summary.overwritten_chunks, 0);
    assert!(summary.lost_data());
    // What was kept is the oldest data, intact and in order.
    let contents = fs::read_to_string(&summary.path).unwrap();
    let expected: Vec<i32> = (first..first + (NUM_BUFFERS * REC_ADC_CHUNK) as i32).collect();
    assert_eq!(recording_values(&contents), expected);
}

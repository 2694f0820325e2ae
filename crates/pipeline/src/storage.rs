//! Recording files on local storage.
//!
//! A recording is written to `<name>.part` and renamed to `<name>` when it
//! is finished, so the completed file is never observed half-written and a
//! failed recording leaves the previous one in place.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Line written after the last sample of a recording.
pub const END_MARKER: &str = ".";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory the recording file lives in
    pub directory: PathBuf,
    pub file_name: String,
    /// A blank line is written whenever this much time passed since the last one
    pub marker_interval_ms: u64,
    /// Upper bound on how long a stop waits for the writer to catch up
    pub stop_timeout_ms: u64,
    pub overrun_policy: node_types::OverrunPolicy,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./recordings"),
            file_name: "TEST.txt".to_string(),
            marker_interval_ms: 1000,
            stop_timeout_ms: 50,
            overrun_policy: node_types::OverrunPolicy::Refuse,
        }
    }
}

/// Where recordings go.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    directory: PathBuf,
    file_name: String,
    marker_interval: Duration,
}

impl RecordingStore {
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            file_name: config.file_name.clone(),
            marker_interval: Duration::from_millis(config.marker_interval_ms),
        }
    }

    /// Path of the last completed recording.
    pub fn completed_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Path of the recording in progress.
    pub fn part_path(&self) -> PathBuf {
        self.directory.join(format!("{}.part", self.file_name))
    }

    /// Creates (truncating) the in-progress file.
    pub fn create(&self) -> Result<RecordingFile, StorageError> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| StorageError::io(&self.directory, e))?;
        let part = self.part_path();
        let file = File::create(&part).map_err(|e| StorageError::io(&part, e))?;
        tracing::debug!("Opened recording file {}", part.display());
        Ok(RecordingFile {
            writer: BufWriter::new(file),
            part,
            completed: self.completed_path(),
            marker_interval: self.marker_interval,
            last_marker: Instant::now(),
            samples: 0,
            markers: 0,
            started_at: Local::now(),
            started: Instant::now(),
        })
    }

    /// Opens the last completed recording for reading.
    pub fn open_completed(&self) -> Result<File, StorageError> {
        let path = self.completed_path();
        File::open(&path).map_err(|_| StorageError::NotFound { path })
    }
}

/// An open recording.
#[derive(Debug)]
pub struct RecordingFile {
    writer: BufWriter<File>,
    part: PathBuf,
    completed: PathBuf,
    marker_interval: Duration,
    last_marker: Instant,
    samples: u64,
    markers: u64,
    started_at: DateTime<Local>,
    started: Instant,
}

/// What a finished recording contains.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedRecording {
    pub path: PathBuf,
    pub samples: u64,
    pub markers: u64,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
}

impl RecordingFile {
    /// Writes one sample as a decimal line. Emits a blank marker line and
    /// flushes whenever the marker interval has elapsed.
    pub fn write_sample(&mut self, value: i32) -> Result<(), StorageError> {
        writeln!(self.writer, "{}", value).map_err(|e| StorageError::io(&self.part, e))?;
        self.samples += 1;
        if self.last_marker.elapsed() >= self.marker_interval {
            writeln!(self.writer).map_err(|e| StorageError::io(&self.part, e))?;
            self.flush()?;
            self.last_marker = Instant::now();
            self.markers += 1;
        }
        Ok(())
    }

    pub fn write_samples(&mut self, values: &[i32]) -> Result<(), StorageError> {
        values.iter().try_for_each(|&v| self.write_sample(v))
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush().map_err(|e| StorageError::io(&self.part, e))
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn path(&self) -> &Path {
        &self.part
    }

    /// Writes the end marker, syncs and publishes the file under its final
    /// name.
    pub fn finish(mut self) -> Result<FinishedRecording, StorageError> {
        writeln!(self.writer, "{}", END_MARKER).map_err(|e| StorageError::io(&self.part, e))?;
        self.flush()?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| StorageError::io(&self.part, e))?;
        fs::rename(&self.part, &self.completed)
            .map_err(|e| StorageError::io(&self.completed, e))?;
        Ok(FinishedRecording {
            path: self.completed,
            samples: self.samples,
            markers: self.markers,
            started_at: self.started_at,
            duration: self.started.elapsed(),
        })
    }
}

/// The recording file as shared between the session and the writer thread.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    inner: Arc<Mutex<Option<RecordingFile>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<RecordingFile>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path, marker_interval_ms: u64) -> RecordingStore {
        RecordingStore::new(&RecordingConfig {
            directory: dir.to_path_buf(),
            marker_interval_ms,
            ..RecordingConfig::default()
        })
    }

    #[test]
    fn completed_file_appears_only_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 60_000);

        let mut file = store.create().unwrap();
        file.write_samples(&[1, -2, 3]).unwrap();
        assert!(store.open_completed().is_err());
        assert!(store.part_path().exists());

        let finished = file.finish().unwrap();
        assert_eq!(finished.samples, 3);
        assert!(!store.part_path().exists());
        assert_eq!(
            fs::read_to_string(store.completed_path()).unwrap(),
            "1\n-2\n3\n.\n"
        );
    }

    #[test]
    fn marker_line_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 20);

        let mut file = store.create().unwrap();
        file.write_sample(1).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        file.write_sample(2).unwrap();
        file.write_sample(3).unwrap();
        let finished = file.finish().unwrap();

        assert_eq!(finished.markers, 1);
        assert_eq!(
            fs::read_to_string(finished.path).unwrap(),
            "1\n2\n\n3\n.\n"
        );
    }

    #[test]
    fn new_recording_replaces_previous_only_when_finished() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 60_000);

        let mut first = store.create().unwrap();
        first.write_sample(10).unwrap();
        first.finish().unwrap();

        let mut second = store.create().unwrap();
        second.write_sample(20).unwrap();
        second.flush().unwrap();
        assert_eq!(fs::read_to_string(store.completed_path()).unwrap(), "10\n.\n");

        second.finish().unwrap();
        assert_eq!(fs::read_to_string(store.completed_path()).unwrap(), "20\n.\n");
    }

    #[test]
    fn missing_recording_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1000);
        let err = store.open_completed().unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "File not found or cannot be opened: {}",
                store.completed_path().display()
            )
        );
    }

    #[test]
    fn directory_is_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = store(&nested, 1000);
        store.create().unwrap().finish().unwrap();
        assert!(nested.join("TEST.txt").exists());
    }
}

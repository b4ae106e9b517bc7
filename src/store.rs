//! Result Store - the per-run output directory
//!
//! One directory per run, never reused. Every write goes through a single
//! mutex so concurrent workers can append to the same file.

use crate::pipeline::stage::StageResult;
use crate::target::TargetDescriptor;
use crate::Result;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// JSON-lines log with one entry per stage
pub const RUN_LOG_FILE: &str = "run.log";

/// Whole-run summary written at the end
pub const SUMMARY_FILE: &str = "summary.json";

/// Upper bound on `-N` suffixes tried before giving up
const MAX_COLLISION_SUFFIX: u32 = 1000;

#[derive(Debug)]
pub struct ResultStore {
    run_dir: PathBuf,
    lock: Mutex<()>,
}

impl ResultStore {
    /// Create `<root>/<slug>-<YYYYmmdd-HHMMSS>`, suffixing `-1`, `-2`, ... if
    /// a directory with that name already exists.
    pub fn create(root: &Path, target: &TargetDescriptor, started_at: DateTime<Utc>) -> Result<Self> {
        fs::create_dir_all(root)?;

        let base = format!("{}-{}", target.sanitized(), started_at.format("%Y%m%d-%H%M%S"));
        let mut candidate = root.join(&base);
        let mut suffix = 0;

        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < MAX_COLLISION_SUFFIX => {
                    suffix += 1;
                    candidate = root.join(format!("{}-{}", base, suffix));
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Created run directory {}", candidate.display());
        Ok(Self {
            run_dir: candidate,
            lock: Mutex::new(()),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Absolute path of `file` inside the run directory
    pub fn path_for(&self, file: &str) -> PathBuf {
        self.run_dir.join(file)
    }

    /// Append bytes to `file`, creating it on first use
    pub fn append(&self, file: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(file);
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut handle = OpenOptions::new().create(true).append(true).open(&path)?;
        handle.write_all(bytes)?;
        Ok(path)
    }

    /// Write a file that must not exist yet
    pub fn write_new(&self, file: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(file);
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut handle = OpenOptions::new().write(true).create_new(true).open(&path)?;
        handle.write_all(bytes)?;
        Ok(path)
    }

    /// Whether `file` has been written during this run
    pub fn exists(&self, file: &str) -> bool {
        self.path_for(file).is_file()
    }

    /// Append one stage entry to the run log
    pub fn record_stage(&self, result: &StageResult) -> Result<()> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');
        self.append(RUN_LOG_FILE, &line)?;
        Ok(())
    }

    /// Write `summary.json`
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(summary)?;
        self.write_new(SUMMARY_FILE, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::resolve;
    use tempfile::TempDir;

    #[test]
    fn test_same_second_runs_get_distinct_directories() {
        let root = TempDir::new().unwrap();
        let target = resolve("example.com").unwrap();
        let now = Utc::now();

        let first = ResultStore::create(root.path(), &target, now).unwrap();
        let second = ResultStore::create(root.path(), &target, now).unwrap();
        let third = ResultStore::create(root.path(), &target, now).unwrap();

        assert_ne!(first.run_dir(), second.run_dir());
        assert!(second.run_dir().to_string_lossy().ends_with("-1"));
        assert!(third.run_dir().to_string_lossy().ends_with("-2"));
    }

    #[test]
    fn test_append_accumulates() {
        let root = TempDir::new().unwrap();
        let target = resolve("10.0.0.1").unwrap();
        let store = ResultStore::create(root.path(), &target, Utc::now()).unwrap();

        store.append("01_x.txt", b"one\n").unwrap();
        store.append("01_x.txt", b"two\n").unwrap();
        let content = fs::read_to_string(store.path_for("01_x.txt")).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let root = TempDir::new().unwrap();
        let target = resolve("example.org").unwrap();
        let store = ResultStore::create(root.path(), &target, Utc::now()).unwrap();

        store.write_new("manual_hydra.txt", b"a").unwrap();
        assert!(store.write_new("manual_hydra.txt", b"b").is_err());
        assert_eq!(fs::read(store.path_for("manual_hydra.txt")).unwrap(), b"a");
    }
}

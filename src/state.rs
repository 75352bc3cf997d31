//! JSON state file

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use declarative::{State, StateStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

const FORMAT_VERSION: u32 = 1;

/// On-disk layout of the state file
#[derive(Debug, Serialize, Deserialize)]
struct StateFile<S> {
    version: u32,
    /// Incremented on every write
    serial: u64,
    /// Last time the state was written
    last_updated: DateTime<Utc>,
    state: S,
}

/// [`StateStore`] backed by a JSON file.
///
/// A missing file is an empty state. Writes go to a sibling temporary file
/// that is renamed over the previous one.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    serial: AtomicU64,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            serial: AtomicU64::new(0),
        }
    }

    /// Serial of the last state read or written
    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::SeqCst)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<State> {
        if !self.path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(State::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let file: StateFile<State> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        if file.version != FORMAT_VERSION {
            bail!(
                "state file {} has format version {}, expected {FORMAT_VERSION}",
                self.path.display(),
                file.version
            );
        }

        self.serial.fetch_max(file.serial, Ordering::SeqCst);
        log::debug!(
            "Loaded state serial {} ({} resources) from {}",
            file.serial,
            file.state.resources.len(),
            self.path.display()
        );
        Ok(file.state)
    }

    fn persist(&self, state: &State) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let file = StateFile {
            version: FORMAT_VERSION,
            serial,
            last_updated: Utc::now(),
            state,
        };
        let content = serde_json::to_string_pretty(&file).context("Failed to serialize state")?;

        let temp = self.temp_path();
        fs::write(&temp, content)
            .with_context(|| format!("Failed to write state file: {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;

        log::debug!("Saved state serial {serial} to {}", self.path.display());
        Ok(())
    }
}

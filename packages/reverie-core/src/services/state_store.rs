//! Generation-state persistence.
//!
//! Persists the opaque state snapshot the GPU sends over the producer socket
//! so generation can resume after a pod restart. The blob is written
//! atomically (temp file + rename); a JSON sidecar records when and how much
//! was saved. All file I/O runs on the blocking pool so the socket
//! dispatchers never stall on disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

const STATE_FILE: &str = "last_state.bin";
const STATE_META_FILE: &str = "state_meta.json";

/// Metadata describing the saved state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateInfo {
    /// Save time, seconds since the Unix epoch.
    pub saved_at: f64,
    /// Save time as an ISO-8601 UTC string.
    pub saved_at_iso: String,
    /// Size of the blob in bytes.
    pub size_bytes: u64,
    /// Seconds elapsed since the save. Computed on read, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<f64>,
}

/// Atomic persistence of one opaque state blob plus its metadata sidecar.
pub struct StateStore {
    dir: PathBuf,
    /// Serializes writers so concurrent saves cannot interleave.
    write_gate: tokio::sync::Mutex<()>,
}

impl StateStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(STATE_META_FILE)
    }

    /// Saves a state snapshot to disk.
    ///
    /// The blob is written to a temp file and renamed into place, so a crash
    /// mid-write can never leave a partially written blob loadable as the
    /// current state.
    pub async fn save(&self, blob: Bytes) -> io::Result<()> {
        let _guard = self.write_gate.lock().await;

        let dir = self.dir.clone();
        let state_path = self.state_path();
        let meta_path = self.meta_path();

        run_blocking(move || {
            std::fs::create_dir_all(&dir)?;

            let tmp_path = state_path.with_extension("tmp");
            std::fs::write(&tmp_path, &blob)?;
            std::fs::rename(&tmp_path, &state_path)?;

            let meta = StateInfo {
                saved_at: epoch_secs(),
                saved_at_iso: chrono::Utc::now()
                    .format("%Y-%m-%dT%H:%M:%SZ")
                    .to_string(),
                size_bytes: blob.len() as u64,
                age_seconds: None,
            };
            let meta_json = serde_json::to_string_pretty(&meta)
                .map_err(io::Error::other)?;
            std::fs::write(&meta_path, meta_json)?;

            log::debug!("[State] saved snapshot: {} bytes", blob.len());
            Ok(())
        })
        .await
    }

    /// Loads the last saved state blob, or `None` if nothing was saved.
    pub async fn load(&self) -> io::Result<Option<Bytes>> {
        let state_path = self.state_path();

        run_blocking(move || match std::fs::read(&state_path) {
            Ok(bytes) => {
                log::info!("[State] loaded snapshot: {} bytes", bytes.len());
                Ok(Some(Bytes::from(bytes)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("[State] no saved snapshot found");
                Ok(None)
            }
            Err(e) => Err(e),
        })
        .await
    }

    /// Returns metadata about the saved state without loading the blob.
    pub async fn info(&self) -> Option<StateInfo> {
        let meta_path = self.meta_path();

        tokio::task::spawn_blocking(move || {
            let contents = std::fs::read_to_string(&meta_path).ok()?;
            let mut meta: StateInfo = serde_json::from_str(&contents).ok()?;
            meta.age_seconds = Some(((epoch_secs() - meta.saved_at) * 10.0).round() / 10.0);
            Some(meta)
        })
        .await
        .ok()
        .flatten()
    }

    /// Removes the saved blob and its sidecar.
    pub async fn clear(&self) -> io::Result<()> {
        let _guard = self.write_gate.lock().await;

        let state_path = self.state_path();
        let meta_path = self.meta_path();

        run_blocking(move || {
            remove_if_exists(&state_path)?;
            remove_if_exists(&meta_path)?;
            log::info!("[State] cleared");
            Ok(())
        })
        .await
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Runs a fallible closure on the blocking pool, mapping join failures to
/// I/O errors.
async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

//! Intake drop-directory watcher.
//!
//! Watches a directory for new claim documents and emits events once a
//! file is stable (the writer finished). The claim id derives from the
//! document content, so re-dropping the same document never opens a
//! second claim.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::ClaimStore;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory to watch for claim documents
    pub watch_path: PathBuf,

    /// How long a file must be stable before processing (seconds)
    #[serde(default = "default_stability_delay")]
    pub stability_delay_secs: u64,

    /// File extensions treated as claim documents
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Documents larger than this are skipped
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
}

fn default_stability_delay() -> u64 {
    2
}

fn default_extensions() -> Vec<String> {
    vec!["txt".to_string(), "md".to_string()]
}

fn default_max_document_bytes() -> u64 {
    1_048_576
}

impl WatcherConfig {
    pub fn new(watch_path: impl Into<PathBuf>) -> Self {
        Self {
            watch_path: watch_path.into(),
            stability_delay_secs: default_stability_delay(),
            extensions: default_extensions(),
            max_document_bytes: default_max_document_bytes(),
        }
    }

    /// Check if the watch path exists
    pub fn validate(&self) -> Result<(), WatcherError> {
        if !self.watch_path.exists() {
            return Err(WatcherError::DirectoryNotFound(self.watch_path.clone()));
        }
        Ok(())
    }
}

/// Event emitted when a claim document is detected and stable
#[derive(Debug, Clone)]
pub struct ClaimDocumentEvent {
    /// Content-derived claim id
    pub claim_id: String,

    /// Path to the document
    pub path: PathBuf,

    /// The full document text
    pub document_text: String,

    /// When the document was detected
    pub detected_at: DateTime<Utc>,
}

/// Derive a claim id from document content (first 12 hex chars of SHA-256)
pub fn derive_claim_id(document_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_text.as_bytes());
    let result = hasher.finalize();
    format!("CLAIM-{}", hex::encode(&result[..6])) // 12 hex chars = 6 bytes
}

/// Claim document watcher with stability checking
pub struct IntakeWatcher {
    config: WatcherConfig,
    store: Arc<ClaimStore>,
}

impl IntakeWatcher {
    pub fn new(config: WatcherConfig, store: Arc<ClaimStore>) -> Self {
        Self { config, store }
    }

    /// Get the current configuration
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Scan the directory once and collect events for documents the store
    /// does not already know
    pub async fn scan_once(&self) -> Result<ScanResult> {
        self.config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

        let mut result = ScanResult::default();

        let mut entries = tokio::fs::read_dir(&self.config.watch_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !has_watched_extension(&path, &self.config.extensions) {
                continue;
            }

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };

            if !metadata.is_file() {
                continue;
            }

            if metadata.len() > self.config.max_document_bytes {
                tracing::warn!(
                    "Skipping oversized document {} ({} bytes)",
                    path.display(),
                    metadata.len()
                );
                result.skipped += 1;
                continue;
            }

            match self.build_event(&path).await {
                Ok(Some(event)) => result.events.push(event),
                Ok(None) => result.already_known += 1,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    result.errors += 1;
                }
            }
        }

        Ok(result)
    }

    /// Watch the directory and emit events for new stable documents
    /// This runs until cancelled via the returned handle
    pub async fn watch(&self) -> Result<(mpsc::Receiver<ClaimDocumentEvent>, WatchHandle)> {
        self.config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

        let (event_tx, event_rx) = mpsc::channel::<ClaimDocumentEvent>(100);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let config = self.config.clone();
        let store = Arc::clone(&self.store);

        // Spawn watcher task
        let handle = tokio::spawn(async move {
            if let Err(e) = run_watcher(config, store, event_tx, &mut stop_rx).await {
                tracing::error!("Watcher error: {}", e);
            }
        });

        Ok((
            event_rx,
            WatchHandle {
                stop_tx,
                task: handle,
            },
        ))
    }

    /// Read a document and build its event, unless the store already has
    /// the derived claim
    async fn build_event(&self, path: &Path) -> Result<Option<ClaimDocumentEvent>> {
        let document_text = tokio::fs::read_to_string(path).await?;
        let claim_id = derive_claim_id(&document_text);

        let history = self.store.get_history(&claim_id).await?;
        if !history.is_empty() {
            tracing::debug!(
                "Document {} maps to known claim {}",
                path.display(),
                claim_id
            );
            return Ok(None);
        }

        Ok(Some(ClaimDocumentEvent {
            claim_id,
            path: path.to_path_buf(),
            document_text,
            detected_at: Utc::now(),
        }))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Result of a directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Events for documents the store has not seen
    pub events: Vec<ClaimDocumentEvent>,
    pub already_known: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ScanResult {
    pub fn total_scanned(&self) -> usize {
        self.events.len() + self.already_known + self.skipped + self.errors
    }
}

fn has_watched_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Internal watcher loop
async fn run_watcher(
    config: WatcherConfig,
    store: Arc<ClaimStore>,
    event_tx: mpsc::Sender<ClaimDocumentEvent>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    // Track files being stabilized (path -> (size, last_seen))
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    // Create debounced watcher
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(
        Duration::from_secs(2), // Initial debounce
        tx,
    )?;

    debouncer
        .watcher()
        .watch(&config.watch_path, RecursiveMode::NonRecursive)?;

    let stability_delay = Duration::from_secs(config.stability_delay_secs);

    tracing::info!(
        "Watching {} for claim documents",
        config.watch_path.display()
    );

    loop {
        // Check for stop signal
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Watcher stopping...");
            break;
        }

        // Check for file events (non-blocking with timeout)
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                for event in events {
                    let path = event.path;

                    if !has_watched_extension(&path, &config.extensions) {
                        continue;
                    }

                    // Get current file size
                    if let Ok(metadata) = std::fs::metadata(&path) {
                        if metadata.is_file() {
                            let size = metadata.len();
                            pending.insert(path, (size, Instant::now()));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected - continue to stability check
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }

        // Check for stable files
        let now = Instant::now();
        let mut stable_files = Vec::new();
        let mut still_growing = Vec::new();

        for (path, (last_size, last_seen)) in pending.iter() {
            if now.duration_since(*last_seen) < stability_delay {
                continue;
            }

            if let Ok(metadata) = std::fs::metadata(path) {
                let current_size = metadata.len();
                if current_size == *last_size && current_size > 0 {
                    stable_files.push((path.clone(), current_size));
                } else {
                    still_growing.push((path.clone(), current_size));
                }
            }
        }

        // Restart the stability clock for files whose size changed
        for (path, size) in still_growing {
            pending.insert(path, (size, now));
        }

        // Process stable files
        for (path, size) in stable_files {
            pending.remove(&path);

            if size > config.max_document_bytes {
                tracing::warn!(
                    "Skipping oversized document {} ({} bytes)",
                    path.display(),
                    size
                );
                continue;
            }

            let document_text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };

            let claim_id = derive_claim_id(&document_text);

            match store.get_history(&claim_id).await {
                Ok(history) if !history.is_empty() => {
                    tracing::debug!(
                        "Document {} maps to known claim {}",
                        path.display(),
                        claim_id
                    );
                }
                Ok(_) => {
                    tracing::info!("New claim document: {} ({})", path.display(), claim_id);
                    let event = ClaimDocumentEvent {
                        claim_id,
                        path: path.clone(),
                        document_text,
                        detected_at: Utc::now(),
                    };
                    let _ = event_tx.send(event).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to check store for {}: {}", claim_id, e);
                }
            }
        }

        // Small sleep to prevent busy loop
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

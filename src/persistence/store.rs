//! Debounced JSON Document Store
//!
//! Each stateful module persists one logical JSON document (reputation,
//! settlements, reports, autopilot). Components mark themselves dirty on
//! mutation; a background flusher coalesces writes over a fixed window and
//! a final synchronous flush runs on graceful shutdown. A crash between
//! flushes loses at most one debounce window of mutations.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::{QuarryError, Result};

/// Trait for components whose state is persisted as one named document.
///
/// `restore` takes `&self`: components keep their state behind interior
/// mutability so a shared reference can be rehydrated at startup.
#[async_trait]
pub trait Persist: Send + Sync {
    /// Document name, e.g. "reputation" → `<data_dir>/reputation.json`
    fn document(&self) -> &'static str;

    /// Serialize current state
    async fn to_document(&self) -> Value;

    /// Restore state from a previously written document
    async fn restore(&self, doc: &Value) -> std::result::Result<(), String>;

    /// Unflushed mutations exist
    fn is_dirty(&self) -> bool;

    fn clear_dirty(&self);
}

/// File-backed store for the per-module documents
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, document: &str) -> PathBuf {
        self.dir.join(format!("{document}.json"))
    }

    /// Read a document if it exists. A missing file is a clean first run,
    /// not an error.
    pub async fn read_document(&self, document: &str) -> Result<Option<Value>> {
        let path = self.path_for(document);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    QuarryError::Persistence {
                        document: document.to_string(),
                        reason: format!("corrupt document at {}: {e}", path.display()),
                    }
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QuarryError::Persistence {
                document: document.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Write a document atomically (temp file + rename).
    pub async fn write_document(&self, document: &str, value: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| QuarryError::Persistence {
                document: document.to_string(),
                reason: format!("creating {}: {e}", self.dir.display()),
            })?;

        let path = self.path_for(document);
        let tmp = self.dir.join(format!(".{document}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| QuarryError::Persistence {
                document: document.to_string(),
                reason: format!("writing {}: {e}", tmp.display()),
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| QuarryError::Persistence {
                document: document.to_string(),
                reason: format!("renaming into {}: {e}", path.display()),
            })?;

        debug!(document, path = %path.display(), "document flushed");
        Ok(())
    }

    /// Rehydrate a component from its document at startup.
    pub async fn load(&self, component: &dyn Persist) -> Result<bool> {
        let name = component.document();
        match self.read_document(name).await {
            Ok(Some(doc)) => match component.restore(&doc).await {
                Ok(()) => {
                    info!(document = name, "restored persisted state");
                    Ok(true)
                }
                Err(reason) => Err(QuarryError::Persistence {
                    document: name.to_string(),
                    reason,
                }),
            },
            Ok(None) => {
                debug!(document = name, "no persisted state, starting fresh");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Flush one component if dirty. Failures are logged, never fatal; the
    /// dirty flag stays set so the next cycle retries.
    pub async fn flush(&self, component: &dyn Persist) -> bool {
        if !component.is_dirty() {
            return false;
        }
        let doc = component.to_document().await;
        match self.write_document(component.document(), &doc).await {
            Ok(()) => {
                component.clear_dirty();
                true
            }
            Err(e) => {
                error!(document = component.document(), "flush failed: {e}");
                false
            }
        }
    }

    /// Flush every dirty component; used for the final shutdown flush.
    pub async fn flush_all(&self, components: &[Arc<dyn Persist>]) -> usize {
        let mut flushed = 0;
        for component in components {
            if self.flush(component.as_ref()).await {
                flushed += 1;
            }
        }
        flushed
    }

    /// Spawn the debounced background flusher. Runs until shutdown fires;
    /// the caller still owns the final flush.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        components: Vec<Arc<dyn Persist>>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        info!(
            interval_secs = interval.as_secs(),
            documents = components.len(),
            "persistence flusher started"
        );
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = timer.tick() => {
                        let flushed = store.flush_all(&components).await;
                        if flushed > 0 {
                            debug!(flushed, "debounced flush cycle");
                        }
                    }
                }
            }
            info!("persistence flusher stopped");
        })
    }
}

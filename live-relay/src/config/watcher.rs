//! Hot reload of the subscriber configuration file.
//!
//! The filesystem watcher only reports that the file changed. Coalescing of
//! change bursts is done by [`ReloadDebouncer`]: every notification cancels the
//! pending reload and schedules a new one after the quiet period, so only the
//! last change of a burst triggers a reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::SubscriberSource;
use crate::{Error, Result};

use super::store::ConfigStore;

/// Something that can be reloaded.
#[async_trait]
pub trait Reload: Send + Sync + 'static {
    async fn reload(&self);
}

/// Reloads a source and reconciles the store against the fresh snapshot.
pub struct SourceReloader {
    source: Arc<dyn SubscriberSource>,
    store: Arc<ConfigStore>,
}

impl SourceReloader {
    pub fn new(source: Arc<dyn SubscriberSource>, store: Arc<ConfigStore>) -> Self {
        Self { source, store }
    }
}

#[async_trait]
impl Reload for SourceReloader {
    async fn reload(&self) {
        info!(source = self.source.name(), "Configuration changed, reloading");
        let snapshot = match self.source.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(source = self.source.name(), error = %e, "Failed to reload configuration");
                return;
            }
        };
        if let Err(e) = self.store.reconcile(snapshot).await {
            error!(source = self.source.name(), error = %e, "Failed to apply reloaded configuration");
        }
    }
}

/// Coalesces change notifications into a single delayed reload.
pub struct ReloadDebouncer {
    quiet: Duration,
    target: Arc<dyn Reload>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ReloadDebouncer {
    pub fn new(quiet: Duration, target: Arc<dyn Reload>) -> Self {
        Self {
            quiet,
            target,
            pending: Mutex::new(None),
        }
    }

    /// Record a change. Cancels any scheduled reload and schedules a new one.
    ///
    /// A reload that has already started is not interrupted.
    pub fn notify(&self) {
        let target = self.target.clone();
        let quiet = self.quiet;
        let task = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            tokio::spawn(async move { target.reload().await });
        });

        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancel the scheduled reload, if any.
    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
    }
}

impl Drop for ReloadDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Watches one file and feeds its modifications into a [`ReloadDebouncer`].
///
/// Dropping the watcher stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl ConfigWatcher {
    pub fn start(path: &Path, debouncer: Arc<ReloadDebouncer>) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| Error::config(format!("Not a file path: {}", path.display())))?;
        let parent: PathBuf = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let touched = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if touched {
                        debug!(kind = ?event.kind, "config watcher event");
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!(error = %e, "config watcher error"),
            },
        )
        .map_err(|e| Error::config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| Error::config(format!("Failed to watch {}: {e}", parent.display())))?;
        info!(path = %path.display(), "Watching configuration file");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(()) => debouncer.notify(),
                        None => break,
                    },
                }
            }
            debouncer.cancel();
        });

        Ok(Self {
            _watcher: watcher,
            cancel,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

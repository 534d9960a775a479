//! Boot-time convergence of extensions and their dependencies.
//!
//! ```text
//! Scan ─┬─ nothing missing ──────────────────────► Ready
//!       ├─ missing, download disabled or skipped ─► ReadyDegraded
//!       └─ missing, download enabled ─► Download ─► Restart ─► (new process) Scan
//! ```
//!
//! The restarted process receives `--skip-download-dependency` when some
//! downloads failed, so a permanently unavailable artifact is tried once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::RelaunchPlan;
use tracing::{info, warn};

use super::manifest::Dependency;
use super::registry::{ExtensionRegistry, HandlerRegistry};
use super::resolver::DependencyResolver;
use crate::{Error, Result};

/// Flag passed to a restarted process to disable dependency download.
pub const SKIP_DOWNLOAD_FLAG: &str = "--skip-download-dependency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Scan,
    Ready,
    ReadyDegraded,
    Download,
    Restart,
}

impl BootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Ready => "ready",
            Self::ReadyDegraded => "ready_degraded",
            Self::Download => "download",
            Self::Restart => "restart",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::ReadyDegraded)
    }
}

impl std::fmt::Display for BootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInputs {
    pub missing: usize,
    pub auto_download: bool,
    pub skip_download: bool,
}

/// Next state after `state`.
pub fn next_state(state: BootState, inputs: BootInputs) -> BootState {
    match state {
        BootState::Scan if inputs.missing == 0 => BootState::Ready,
        BootState::Scan if !inputs.auto_download || inputs.skip_download => BootState::ReadyDegraded,
        BootState::Scan => BootState::Download,
        BootState::Download => BootState::Restart,
        // After a restart the new process starts over.
        BootState::Restart => BootState::Scan,
        terminal => terminal,
    }
}

/// Replaces the running process.
#[async_trait]
pub trait Restarter: Send + Sync {
    /// Restart after a download round. `failed` lists the dependencies that
    /// could not be downloaded.
    ///
    /// Implementations that actually restart do not return on success.
    async fn restart(&self, failed: &[Dependency]) -> Result<()>;
}

/// Restarts by re-executing the current binary with its original arguments.
pub struct ProcessRestarter {
    delay: Duration,
}

impl ProcessRestarter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Restarter for ProcessRestarter {
    async fn restart(&self, failed: &[Dependency]) -> Result<()> {
        info!(delay_ms = self.delay.as_millis() as u64, "Restarting to load downloaded dependencies");
        tokio::time::sleep(self.delay).await;

        let plan = relaunch_plan(RelaunchPlan::current()?, failed);
        info!(program = %plan.program.display(), args = ?plan.args, "Relaunching");

        Err(Error::Io(plan.exec()))
    }
}

/// Arguments of the next process: the skip flag is added only when some
/// downloads failed, so a dependency that cannot be fetched is not retried.
pub fn relaunch_plan(base: RelaunchPlan, failed: &[Dependency]) -> RelaunchPlan {
    if failed.is_empty() {
        base
    } else {
        base.with_flag(SKIP_DOWNLOAD_FLAG)
    }
}

/// Boot options.
#[derive(Debug, Clone)]
pub struct BootOptions {
    pub plugin_dir: PathBuf,
    pub lib_dirs: Vec<PathBuf>,
    pub auto_download: bool,
    pub skip_download: bool,
}

/// Result of the boot sequence in this process.
pub struct BootOutcome {
    /// Final state reached: `Ready`, `ReadyDegraded`, or `Restart` when the
    /// restarter returned without replacing the process.
    pub state: BootState,
    pub handlers: Arc<HandlerRegistry>,
    /// Dependencies still missing, for degraded boots.
    pub missing: Vec<Dependency>,
}

/// Runs the convergence loop for the current process.
pub struct BootSequence {
    options: BootOptions,
    resolver: DependencyResolver,
    restarter: Arc<dyn Restarter>,
}

impl BootSequence {
    pub fn new(
        options: BootOptions,
        resolver: DependencyResolver,
        restarter: Arc<dyn Restarter>,
    ) -> Self {
        Self {
            options,
            resolver,
            restarter,
        }
    }

    pub async fn run(self, registry: ExtensionRegistry) -> Result<BootOutcome> {
        let options = self.options.clone();
        let (registry, missing_by_extension) = tokio::task::spawn_blocking(move || {
            let mut registry = registry;
            let missing = registry.scan(&options.plugin_dir, &options.lib_dirs);
            (registry, missing)
        })
        .await
        .map_err(|e| Error::Other(format!("Extension scan task failed: {e}")))?;

        let missing = DependencyResolver::flatten(&missing_by_extension);
        let inputs = BootInputs {
            missing: missing.len(),
            auto_download: self.options.auto_download,
            skip_download: self.options.skip_download,
        };

        let mut state = next_state(BootState::Scan, inputs);
        if state == BootState::Ready {
            info!("All extension dependencies present");
            return Ok(BootOutcome {
                state,
                handlers: Arc::new(registry.freeze()),
                missing,
            });
        }

        let listing = missing
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        info!(count = missing.len(), "Missing extension dependencies: {}", listing);

        if state == BootState::ReadyDegraded {
            if self.options.skip_download {
                warn!(
                    "Extension dependencies incomplete, download skipped ({}); some extensions will be limited",
                    SKIP_DOWNLOAD_FLAG
                );
            } else {
                warn!(
                    "Extension dependencies incomplete and automatic download is disabled; some extensions will be limited"
                );
            }
            return Ok(BootOutcome {
                state,
                handlers: Arc::new(registry.freeze()),
                missing,
            });
        }

        info!("Downloading extension dependencies");
        let failed = self.resolver.resolve_missing(&missing_by_extension).await;
        if failed.is_empty() {
            info!("Dependencies downloaded");
        } else {
            let listing = failed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            warn!("Dependencies downloaded, some failed: {}", listing);
        }

        state = next_state(state, inputs);
        self.restarter.restart(&failed).await?;

        Ok(BootOutcome {
            state,
            handlers: Arc::new(registry.freeze()),
            missing: failed,
        })
    }
}

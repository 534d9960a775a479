//! Service container.
//!
//! Builds every service from the [`Settings`], runs the extension boot
//! sequence and owns the background tasks of the running process.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    CompleterRegistry, ConfigEventBroadcaster, ConfigStore, ConfigUpdateEvent, ConfigWatcher,
    ReloadDebouncer, SourceReloader,
};
use crate::database::{self, SqlxSubscriberRepository};
use crate::delivery::{DeliveryScheduler, HttpSender, OutboundSender};
use crate::domain::LiveEvent;
use crate::extension::{
    BootOptions, BootSequence, BootState, DependencyResolver, ExtensionCatalog,
    ExtensionRegistry, HandlerRegistry, HttpFetcher, ProcessRestarter, Restarter,
};
use crate::handler::TextHandler;
use crate::router::EventRouter;
use crate::settings::{DatasourceKind, Settings};
use crate::source::{EmptySource, JsonSource, SqliteSource, SubscriberSource};
use crate::{Error, Result};

/// Collaborators that are not described by the settings file.
pub struct ContainerOptions {
    /// Disable dependency download for this run.
    pub skip_download: bool,
    /// Factories of the components extensions may declare.
    pub catalog: ExtensionCatalog,
    pub completers: CompleterRegistry,
    /// Defaults to re-executing the current process.
    pub restarter: Option<Arc<dyn Restarter>>,
    /// Defaults to [`HttpSender`].
    pub sender: Option<Arc<dyn OutboundSender>>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            skip_download: false,
            catalog: ExtensionCatalog::new(),
            completers: CompleterRegistry::with_pass_through(),
            restarter: None,
            sender: None,
        }
    }
}

/// Snapshot of the running services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    pub subscriber_count: usize,
    pub handler_count: usize,
    pub extension_count: usize,
    pub boot_state: BootState,
    pub delivery_platforms: Vec<String>,
    pub event_subscriber_count: usize,
}

pub struct ServiceContainer {
    pub settings: Settings,
    pub store: Arc<ConfigStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub scheduler: Arc<DeliveryScheduler>,
    pub router: Arc<EventRouter>,
    pub event_broadcaster: ConfigEventBroadcaster,
    boot_state: BootState,
    pool: Option<SqlitePool>,
    watcher: Mutex<Option<ConfigWatcher>>,
    events_tx: mpsc::UnboundedSender<LiveEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LiveEvent>>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    pub async fn new(settings: Settings, options: ContainerOptions) -> Result<Self> {
        info!("Initializing service container");

        let (handlers, boot_state) = Self::boot_extensions(&settings, &options).await?;
        info!(
            state = %boot_state,
            handlers = handlers.len(),
            extensions = handlers.extensions().len(),
            "Extensions ready"
        );

        let (source, pool) = Self::open_source(&settings).await?;

        let event_broadcaster = ConfigEventBroadcaster::new();
        let store = Arc::new(ConfigStore::with_broadcaster(
            options.completers,
            event_broadcaster.clone(),
        ));
        store.load(source.as_ref()).await?;

        let sender = options.sender.unwrap_or_else(|| {
            Arc::new(HttpSender::new(Duration::from_secs(
                settings.router.send_timeout_secs,
            )))
        });
        let scheduler = Arc::new(DeliveryScheduler::new(settings.sender.clone(), sender));
        let router = Arc::new(EventRouter::new(
            store.clone(),
            handlers.clone(),
            scheduler.clone(),
            settings.router.max_workers,
        ));

        let watcher = Self::start_watcher(&settings, source, store.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!("Service container initialized");
        Ok(Self {
            settings,
            store,
            handlers,
            scheduler,
            router,
            event_broadcaster,
            boot_state,
            pool,
            watcher: Mutex::new(watcher),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            cancellation_token: CancellationToken::new(),
        })
    }

    async fn boot_extensions(
        settings: &Settings,
        options: &ContainerOptions,
    ) -> Result<(Arc<HandlerRegistry>, BootState)> {
        let plugin = &settings.plugin;

        let mut registry = ExtensionRegistry::new(options.catalog.clone());
        registry.register_handler(Arc::new(TextHandler), None);

        let resolver = DependencyResolver::new(
            Arc::new(HttpFetcher::new(plugin.download_timeout())),
            plugin.mirror_urls.clone(),
            plugin.download_dir.clone(),
        );
        let restarter = options
            .restarter
            .clone()
            .unwrap_or_else(|| Arc::new(ProcessRestarter::new(plugin.restart_delay())));

        let outcome = BootSequence::new(
            BootOptions {
                plugin_dir: plugin.dir.clone(),
                lib_dirs: plugin.lib_dirs.clone(),
                auto_download: plugin.auto_download_dependency,
                skip_download: options.skip_download,
            },
            resolver,
            restarter,
        )
        .run(registry)
        .await?;

        if !outcome.state.is_terminal() {
            return Err(Error::Other(format!(
                "Extension boot stopped in state {}",
                outcome.state
            )));
        }
        Ok((outcome.handlers, outcome.state))
    }

    async fn open_source(
        settings: &Settings,
    ) -> Result<(Arc<dyn SubscriberSource>, Option<SqlitePool>)> {
        let datasource = &settings.datasource;
        info!(kind = datasource.kind.as_str(), "Opening subscriber source");

        let mut pool = None;
        let source: Arc<dyn SubscriberSource> = match datasource.kind {
            DatasourceKind::Json => Arc::new(JsonSource::new(&datasource.json_path)),
            DatasourceKind::Sqlite => {
                let db = database::init_pool(&datasource.database_url).await?;
                database::run_migrations(&db).await?;
                let repository = Arc::new(SqlxSubscriberRepository::new(db.clone()));
                pool = Some(db);
                Arc::new(SqliteSource::new(repository))
            }
            DatasourceKind::Empty => Arc::new(EmptySource),
        };
        Ok((source, pool))
    }

    fn start_watcher(
        settings: &Settings,
        source: Arc<dyn SubscriberSource>,
        store: Arc<ConfigStore>,
    ) -> Option<ConfigWatcher> {
        let datasource = &settings.datasource;
        if datasource.kind != DatasourceKind::Json || !datasource.json_auto_reload {
            return None;
        }

        let debouncer = Arc::new(ReloadDebouncer::new(
            datasource.reload_debounce(),
            Arc::new(SourceReloader::new(source, store)),
        ));
        match ConfigWatcher::start(&datasource.json_path, debouncer) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Hot reload of the subscriber configuration is disabled");
                None
            }
        }
    }

    /// Start the background tasks. Calling it twice has no effect.
    pub fn start(&self) {
        let Some(mut events_rx) = self.events_rx.lock().take() else {
            debug!("Service container already started");
            return;
        };

        let router = self.router.clone();
        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Event intake shutting down");
                        break;
                    }
                    event = events_rx.recv() => match event {
                        Some(event) => {
                            router.dispatch(event).await;
                        }
                        None => break,
                    },
                }
            }
        });

        self.setup_config_event_subscriptions();
        info!("Services started");
    }

    fn setup_config_event_subscriptions(&self) {
        let mut receiver = self.event_broadcaster.subscribe();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Config event handler shutting down");
                        break;
                    }
                    result = receiver.recv() => match result {
                        Ok(event @ ConfigUpdateEvent::LoadComplete { .. }) => {
                            info!("{}", event.description());
                        }
                        Ok(event) => debug!("{}", event.description()),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Config event handler lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// Hand an inbound event to the router.
    pub fn ingest(&self, event: LiveEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .map_err(|_| Error::Other("Event intake is closed".to_string()))
    }

    pub fn boot_state(&self) -> BootState {
        self.boot_state
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            subscriber_count: self.store.count().await,
            handler_count: self.handlers.len(),
            extension_count: self.handlers.extensions().len(),
            boot_state: self.boot_state,
            delivery_platforms: self.scheduler.active_platforms(),
            event_subscriber_count: self.event_broadcaster.subscriber_count(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Stop all background work. Messages still queued for delivery are dropped.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();

        if self.watcher.lock().take().is_some() {
            debug!("Configuration watcher stopped");
        }
        self.scheduler.shutdown();

        if let Some(pool) = &self.pool {
            info!("Closing database pool...");
            pool.close().await;
        }
        info!("Services shut down");
    }
}

impl Drop for ServiceContainer {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

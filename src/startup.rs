use crate::shutdown;
use ontime::components::calendar::title::status_line;
use ontime::components::calendar::Calendar;
use ontime::components::{AppContext, ComponentManager, RefreshHandle};
use ontime::config::{Config, ConfigStore};
use ontime::error::Error;
use ontime::utils::time::{Clock, SystemClock};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line flag with which the user allows reminder notifications
pub const ALLOW_NOTIFICATIONS_FLAG: &str = "--allow-notifications";

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load and initialize the application config
pub async fn load_config() -> miette::Result<Arc<Config>> {
    match Config::load() {
        Ok(config) => Ok(Arc::new(config)),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Wire up the components and run until shutdown
pub async fn run(config: Arc<Config>, allow_notifications: bool) -> miette::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let preferences = ConfigStore::new(
        config.preferences.clone(),
        config.preferences_path.clone(),
    );

    let ctx = AppContext {
        config: Arc::clone(&config),
        preferences: preferences.clone(),
        clock: Arc::clone(&clock),
    };

    // Initialize component manager
    let mut component_manager = ComponentManager::new(ctx);

    // Register Calendar component
    component_manager.register(Calendar::new());

    let component_manager = Arc::new(component_manager);
    component_manager.init_all().await?;

    let handle = match component_manager.get::<Calendar>("calendar") {
        Some(calendar) => calendar.get_handle().await,
        None => None,
    };
    match handle {
        Some(handle) => {
            if allow_notifications {
                match handle.request_authorization().await {
                    Ok(granted) => info!("Reminder notifications allowed: {}", granted),
                    Err(e) => error!("Failed to allow reminder notifications: {}", e),
                }
            }
            tokio::spawn(watch_menu_bar_title(handle, preferences, clock));
        }
        None => warn!("Calendar component did not start, menu bar title disabled"),
    }

    // Create shutdown channel
    let (shutdown_send, shutdown_recv) = oneshot::channel();

    // Clone component manager for shutdown handler
    let shutdown_components = Arc::clone(&component_manager);

    // Spawn signal handler task
    tokio::spawn(async move {
        shutdown::handle_signals(shutdown_send, shutdown_components).await;
    });

    let _ = shutdown_recv.await;
    info!("Shutdown complete");
    Ok(())
}

/// Log the menu bar title whenever the snapshot, error state or display preferences change
async fn watch_menu_bar_title(handle: RefreshHandle, preferences: ConfigStore, clock: Arc<dyn Clock>) {
    let mut snapshots = handle.subscribe_snapshot();
    let mut errors = handle.subscribe_errors();
    let mut display = preferences.subscribe();
    let mut last_line = String::new();

    loop {
        tokio::select! {
            changed = snapshots.changed() => if changed.is_err() { break },
            changed = errors.changed() => if changed.is_err() { break },
            changed = display.changed() => if changed.is_err() { break },
        }

        let snapshot = snapshots.borrow_and_update().clone();
        let last_error = errors.borrow_and_update().clone();
        let current = display.borrow_and_update().clone();
        let now = clock.now();
        let events = snapshot
            .as_ref()
            .map(|snapshot| snapshot.events.as_slice())
            .unwrap_or(&[]);

        let line = status_line(
            last_error.as_ref().map(|e| e.message.as_str()),
            events,
            &current,
            &now,
        );
        if line != last_line {
            info!("Menu bar: {}", line);
            last_line = line;
        }
    }
}

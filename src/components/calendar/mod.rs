mod actor;
pub mod google;
mod handle;
pub mod models;
pub mod notifications;
pub mod sink;
pub mod source;
mod time;
pub mod title;
pub mod token;
pub mod wake;

pub use actor::SchedulerStatus;
pub use google::{EventFilter, GoogleCalendarSource};
pub use handle::RefreshHandle;
pub use models::{Event, EventSnapshot, LastError, LeadTime, ScheduledNotification};
pub use notifications::{Evaluation, NotificationEngine, NotificationState};
pub use sink::{
    DesktopDisplay, DesktopSink, NotificationSink, PermissionProvider, PreferencePermissions,
    ReminderDisplay,
};
pub use source::EventSource;
pub use token::TokenManager;
pub use wake::{WakeMonitor, WakeSignal};

use super::AppContext;
use crate::error::BotResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Calendar component: keeps the event snapshot fresh and the reminder armed
#[derive(Default)]
pub struct Calendar {
    handle: RwLock<Option<RefreshHandle>>,
    wake_cancel: RwLock<Option<CancellationToken>>,
}

impl Calendar {
    /// Create a new Calendar component
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle if it exists
    pub async fn get_handle(&self) -> Option<RefreshHandle> {
        let handle_lock = self.handle.read().await;
        handle_lock.clone()
    }
}

#[async_trait]
impl super::Component for Calendar {
    fn name(&self) -> &'static str {
        "calendar"
    }

    async fn init(&self, ctx: &AppContext) -> BotResult<()> {
        let mut handle_lock = self.handle.write().await;
        if handle_lock.is_some() {
            return Ok(());
        }

        let clock = Arc::clone(&ctx.clock);
        let tokens = TokenManager::new(&ctx.config, Arc::clone(&clock));
        let source = GoogleCalendarSource::new(
            &ctx.config,
            tokens,
            ctx.preferences.clone(),
            Arc::clone(&clock),
        );
        let sink = DesktopSink::new(Arc::clone(&clock));
        let permissions = PreferencePermissions::new(ctx.preferences.clone());
        let engine = NotificationEngine::new(Arc::new(sink), Arc::new(permissions));

        let handle = RefreshHandle::new(Arc::new(source), engine, Arc::clone(&clock), &ctx.preferences);

        if ctx.preferences.preferences().notifications_authorized != Some(true) {
            info!("Reminders are off until allowed with --allow-notifications");
        }

        handle.start().await?;

        let monitor = WakeMonitor::new(
            clock,
            ctx.config.wake_poll_interval(),
            ctx.config.wake_gap_threshold(),
        );
        *self.wake_cancel.write().await = Some(monitor.cancellation_token());
        monitor.spawn(handle.clone());

        *handle_lock = Some(handle);
        Ok(())
    }

    async fn shutdown(&self) -> BotResult<()> {
        if let Some(cancel) = self.wake_cancel.write().await.take() {
            cancel.cancel();
        }

        let handle_lock = self.handle.read().await;
        if let Some(handle) = &*handle_lock {
            handle.shutdown().await?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

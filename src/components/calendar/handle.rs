use super::actor::{RefreshActor, RefreshActorHandle, SchedulerStatus};
use super::models::{EventSnapshot, LastError};
use super::notifications::NotificationEngine;
use super::source::EventSource;
use crate::config::ConfigStore;
use crate::error::BotResult;
use crate::utils::time::Clock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle for interacting with the refresh scheduler
#[derive(Clone)]
pub struct RefreshHandle {
    actor_handle: RefreshActorHandle,
    _actor_task: Arc<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Create a new RefreshHandle and spawn the actor
    pub fn new(
        source: Arc<dyn EventSource>,
        engine: NotificationEngine,
        clock: Arc<dyn Clock>,
        preferences: &ConfigStore,
    ) -> Self {
        let (mut actor, handle) = RefreshActor::new(source, engine, clock, preferences.subscribe());

        let actor_task = tokio::spawn(async move {
            actor.run().await;
        });

        Self {
            actor_handle: handle,
            _actor_task: Arc::new(actor_task),
        }
    }

    /// Begin minute-aligned refreshing, fetching right away
    pub async fn start(&self) -> BotResult<()> {
        self.actor_handle.start().await
    }

    /// Stop refreshing and clear the snapshot
    pub async fn stop(&self) -> BotResult<()> {
        self.actor_handle.stop().await
    }

    /// Fetch now and wait for the new snapshot
    pub async fn refresh(&self) -> BotResult<Arc<EventSnapshot>> {
        self.actor_handle.refresh().await
    }

    /// Tell the scheduler the machine just woke from sleep
    pub async fn wake(&self) -> BotResult<()> {
        self.actor_handle.wake().await
    }

    /// Ask the user to allow reminders
    pub async fn request_authorization(&self) -> BotResult<bool> {
        self.actor_handle.request_authorization().await
    }

    pub async fn status(&self) -> BotResult<SchedulerStatus> {
        self.actor_handle.status().await
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<EventSnapshot>>> {
        self.actor_handle.subscribe_snapshot()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<LastError>> {
        self.actor_handle.subscribe_errors()
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> BotResult<()> {
        self.actor_handle.shutdown().await
    }
}

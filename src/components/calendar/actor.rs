//! Minute-aligned refresh loop.
//!
//! A single actor task owns the scheduler bookkeeping, the published snapshot
//! and the reminder engine. Fetches run in their own tasks and report back on
//! a result channel, tagged so that late results from a stopped or restarted
//! scheduler are dropped.

use super::google::EventFilter;
use super::models::{Event, EventSnapshot, LastError, LeadTime};
use super::notifications::{NotificationEngine, NotificationState};
use super::source::EventSource;
use crate::config::Preferences;
use crate::error::{component_error, BotResult, Error};
use crate::utils::time::{delay_until, minute_index, next_refresh_boundary, Clock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

type RefreshResponder = oneshot::Sender<BotResult<Arc<EventSnapshot>>>;

/// Commands that can be sent to the refresh actor
pub enum RefreshCommand {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Refresh(RefreshResponder),
    Wake,
    RequestAuthorization(oneshot::Sender<BotResult<bool>>),
    Status(oneshot::Sender<SchedulerStatus>),
    Shutdown,
}

/// Read-only view of the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub active: bool,
    pub last_handled_minute: Option<i64>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub notification: NotificationState,
}

#[derive(Debug, Default)]
struct SchedulerState {
    active: bool,
    last_handled_minute: Option<i64>,
    /// Bumped on every start so results from earlier runs can be told apart
    epoch: u64,
    next_seq: u64,
    last_applied_seq: u64,
}

struct FetchOutcome {
    epoch: u64,
    seq: u64,
    requested_at: DateTime<Utc>,
    result: BotResult<Vec<Event>>,
}

/// Handle for communicating with the refresh actor
#[derive(Clone)]
pub struct RefreshActorHandle {
    command_tx: mpsc::Sender<RefreshCommand>,
    snapshot_rx: watch::Receiver<Option<Arc<EventSnapshot>>>,
    error_rx: watch::Receiver<Option<LastError>>,
}

impl RefreshActorHandle {
    async fn send(&self, command: RefreshCommand) -> BotResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| component_error(&format!("Actor mailbox error: {}", e)))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RefreshCommand,
    ) -> BotResult<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(build(response_tx)).await?;
        response_rx
            .await
            .map_err(|_| component_error("Response channel closed"))
    }

    pub async fn start(&self) -> BotResult<()> {
        self.request(RefreshCommand::Start).await
    }

    pub async fn stop(&self) -> BotResult<()> {
        self.request(RefreshCommand::Stop).await
    }

    pub async fn refresh(&self) -> BotResult<Arc<EventSnapshot>> {
        self.request(RefreshCommand::Refresh).await?
    }

    pub async fn wake(&self) -> BotResult<()> {
        self.send(RefreshCommand::Wake).await
    }

    pub async fn request_authorization(&self) -> BotResult<bool> {
        self.request(RefreshCommand::RequestAuthorization).await?
    }

    pub async fn status(&self) -> BotResult<SchedulerStatus> {
        self.request(RefreshCommand::Status).await
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<EventSnapshot>>> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<LastError>> {
        self.error_rx.clone()
    }

    pub async fn shutdown(&self) -> BotResult<()> {
        let _ = self.command_tx.send(RefreshCommand::Shutdown).await;
        Ok(())
    }
}

/// The refresh actor that processes messages
pub struct RefreshActor {
    source: Arc<dyn EventSource>,
    engine: NotificationEngine,
    clock: Arc<dyn Clock>,
    command_rx: mpsc::Receiver<RefreshCommand>,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    preferences: watch::Receiver<Preferences>,
    preferences_open: bool,
    lead_time: LeadTime,
    filter: EventFilter,
    snapshot_tx: watch::Sender<Option<Arc<EventSnapshot>>>,
    error_tx: watch::Sender<Option<LastError>>,
    state: SchedulerState,
    timer: Option<Pin<Box<Sleep>>>,
    next_refresh_at: Option<DateTime<Utc>>,
    waiting: HashMap<u64, RefreshResponder>,
}

impl RefreshActor {
    /// Create a new actor and return its handle
    pub fn new(
        source: Arc<dyn EventSource>,
        engine: NotificationEngine,
        clock: Arc<dyn Clock>,
        mut preferences: watch::Receiver<Preferences>,
    ) -> (Self, RefreshActorHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (error_tx, error_rx) = watch::channel(None);

        let (lead_time, filter) = {
            let current = preferences.borrow_and_update();
            (current.lead_time(), EventFilter::from_preferences(&current))
        };

        let actor = Self {
            source,
            engine,
            clock,
            command_rx,
            fetch_tx,
            fetch_rx,
            preferences,
            preferences_open: true,
            lead_time,
            filter,
            snapshot_tx,
            error_tx,
            state: SchedulerState::default(),
            timer: None,
            next_refresh_at: None,
            waiting: HashMap::new(),
        };

        let handle = RefreshActorHandle {
            command_tx,
            snapshot_rx,
            error_rx,
        };

        (actor, handle)
    }

    /// Start the actor's processing loop
    pub async fn run(&mut self) {
        info!("Refresh actor started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(RefreshCommand::Shutdown) | None => {
                        info!("Refresh actor shutting down");
                        self.stop();
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(outcome) = self.fetch_rx.recv() => self.apply_fetch(outcome).await,
                _ = wait_for(&mut self.timer) => {
                    self.timer = None;
                    self.on_tick();
                }
                changed = self.preferences.changed(), if self.preferences_open => match changed {
                    Ok(()) => self.on_preferences_changed().await,
                    Err(_) => {
                        warn!("Preference store closed, keeping last known preferences");
                        self.preferences_open = false;
                    }
                },
            }
        }

        info!("Refresh actor shut down");
    }

    async fn handle_command(&mut self, command: RefreshCommand) {
        match command {
            RefreshCommand::Start(response_tx) => {
                self.start();
                let _ = response_tx.send(());
            }
            RefreshCommand::Stop(response_tx) => {
                self.stop();
                let _ = response_tx.send(());
            }
            RefreshCommand::Refresh(response_tx) => {
                if !self.state.active {
                    let _ = response_tx.send(Err(Error::Inactive));
                    return;
                }
                self.dispatch_fetch(Some(response_tx));
            }
            RefreshCommand::Wake => self.wake(),
            RefreshCommand::RequestAuthorization(response_tx) => {
                let result = self.engine.request_authorization().await;
                if matches!(result, Ok(true)) && self.state.active {
                    self.evaluate_current().await;
                }
                let _ = response_tx.send(result);
            }
            RefreshCommand::Status(response_tx) => {
                let _ = response_tx.send(self.status());
            }
            RefreshCommand::Shutdown => {}
        }
    }

    fn start(&mut self) {
        if self.state.active {
            debug!("Refresh scheduler already running");
            return;
        }

        info!("Starting refresh scheduler");
        self.state.active = true;
        self.state.epoch += 1;
        self.refresh_current_minute();
        self.arm_timer();
    }

    fn stop(&mut self) {
        if self.state.active {
            info!("Stopping refresh scheduler");
        }
        self.state.active = false;
        self.state.last_handled_minute = None;
        self.timer = None;
        self.next_refresh_at = None;
        self.snapshot_tx.send_replace(None);
    }

    fn wake(&mut self) {
        if !self.state.active {
            debug!("Ignoring wake signal while stopped");
            return;
        }

        info!("System woke up, refreshing calendar");
        self.state.last_handled_minute = None;
        self.refresh_current_minute();
        self.arm_timer();
    }

    fn on_tick(&mut self) {
        self.next_refresh_at = None;
        if !self.state.active {
            return;
        }

        let minute = minute_index(&self.clock.now());
        if self.state.last_handled_minute == Some(minute) {
            debug!("Minute {} already refreshed, skipping", minute);
        } else {
            self.state.last_handled_minute = Some(minute);
            self.dispatch_fetch(None);
        }
        self.arm_timer();
    }

    fn refresh_current_minute(&mut self) {
        self.state.last_handled_minute = Some(minute_index(&self.clock.now()));
        self.dispatch_fetch(None);
    }

    fn arm_timer(&mut self) {
        let now = self.clock.now();
        let Some(target) = next_refresh_boundary(&now, self.state.last_handled_minute) else {
            error!("Failed to calculate next refresh time after {}", now);
            self.timer = None;
            self.next_refresh_at = None;
            return;
        };

        let delay = delay_until(&now, &target);
        debug!("Next refresh at {} (in {:?})", target, delay);
        self.next_refresh_at = Some(target);
        self.timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn dispatch_fetch(&mut self, responder: Option<RefreshResponder>) {
        self.state.next_seq += 1;
        let seq = self.state.next_seq;
        let epoch = self.state.epoch;
        let requested_at = self.clock.now();

        if let Some(responder) = responder {
            self.waiting.insert(seq, responder);
        }

        let source = Arc::clone(&self.source);
        let fetch_tx = self.fetch_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch().await;
            let _ = fetch_tx.send(FetchOutcome {
                epoch,
                seq,
                requested_at,
                result,
            });
        });
    }

    async fn apply_fetch(&mut self, outcome: FetchOutcome) {
        let responder = self.waiting.remove(&outcome.seq);
        let requested_at = outcome.requested_at;

        if !self.state.active || outcome.epoch != self.state.epoch {
            debug!("Discarding fetch {} from a stopped scheduler", outcome.seq);
            respond(responder, Err(Error::Inactive));
            return;
        }

        if outcome.seq < self.state.last_applied_seq {
            debug!("Discarding fetch {}, a newer one was already applied", outcome.seq);
            let stale = outcome
                .result
                .map(|events| Arc::new(EventSnapshot::new(events, requested_at)));
            respond(responder, stale);
            return;
        }
        self.state.last_applied_seq = outcome.seq;

        match outcome.result {
            Ok(events) => {
                let snapshot = Arc::new(EventSnapshot::new(events, requested_at));
                info!("Calendar refreshed with {} events", snapshot.events.len());
                if let Some(next) = snapshot.next_event(&self.clock.now()) {
                    debug!("Next event: {} at {:?}", next.display_title(), next.start);
                }

                self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));
                self.error_tx.send_replace(None);
                self.evaluate(&snapshot).await;
                respond(responder, Ok(snapshot));
            }
            Err(e) => {
                error!("Failed to refresh calendar: {}", e);
                self.snapshot_tx.send_replace(None);
                self.error_tx
                    .send_replace(Some(LastError::from_error(&e, self.clock.now())));
                respond(responder, Err(e));
            }
        }
    }

    async fn evaluate(&mut self, snapshot: &EventSnapshot) {
        let now = self.clock.now();
        match self.engine.evaluate(&snapshot.events, self.lead_time, now).await {
            Ok(evaluation) => debug!("Reminder evaluation: {:?}", evaluation),
            Err(e) => error!("Failed to update reminder: {}", e),
        }
    }

    async fn evaluate_current(&mut self) {
        let current = self.snapshot_tx.borrow().clone();
        if let Some(snapshot) = current {
            self.evaluate(&snapshot).await;
        }
    }

    async fn on_preferences_changed(&mut self) {
        let (lead_time, filter) = {
            let current = self.preferences.borrow_and_update();
            (current.lead_time(), EventFilter::from_preferences(&current))
        };
        let filter_changed = filter != self.filter;
        self.filter = filter;

        if lead_time != self.lead_time {
            info!("Reminder lead time changed to {:?}", lead_time);
            self.lead_time = lead_time;
            if lead_time == LeadTime::Disabled {
                if let Err(e) = self.engine.reset().await {
                    error!("Failed to cancel pending reminder: {}", e);
                }
            }
        }

        if !self.state.active {
            return;
        }

        if filter_changed {
            info!("Event filters changed, refreshing calendar");
            self.dispatch_fetch(None);
        } else {
            self.evaluate_current().await;
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active: self.state.active,
            last_handled_minute: self.state.last_handled_minute,
            next_refresh_at: self.next_refresh_at,
            fetched_at: self
                .snapshot_tx
                .borrow()
                .as_ref()
                .map(|snapshot| snapshot.fetched_at),
            notification: self.engine.state().clone(),
        }
    }
}

fn respond(responder: Option<RefreshResponder>, result: BotResult<Arc<EventSnapshot>>) {
    if let Some(responder) = responder {
        let _ = responder.send(result);
    }
}

/// Resolves when the armed timer fires, never when none is armed
async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

//! Reminder decisions for the next calendar event.
//!
//! The engine keeps at most one pending reminder. Every refresh tick hands it
//! the latest events and it works out whether the sink needs to change.

use super::models::{Event, LeadTime, ScheduledNotification};
use super::sink::{NotificationSink, PermissionProvider};
use crate::error::{BotResult, Error};
use crate::utils::time::minutes_until_ceil;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Two reminder times closer than this are treated as the same reminder
pub const RESCHEDULE_TOLERANCE_SECS: i64 = 60;
/// Delay used for reminders whose lead time already elapsed
pub const IMMEDIATE_DELAY_SECS: i64 = 1;

/// Dedup state owned by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NotificationState {
    NoActiveNotification,
    Scheduled(ScheduledNotification),
}

/// What a single evaluation decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Reminders are turned off
    Disabled,
    /// The user has not allowed reminders
    Unauthorized,
    /// Nothing to remind about and nothing pending
    Idle,
    /// The pending reminder was cancelled because no event qualifies
    Cleared,
    /// The pending reminder already matches
    Unchanged,
    /// A new reminder was scheduled for the given instant
    Scheduled(DateTime<Utc>),
    /// The lead time had already elapsed, so a reminder was sent right away
    Immediate,
    /// The pending reminder has fired and was retired
    Delivered,
}

/// Identity of a reminder that has already gone out
#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivered {
    event_id: String,
    etag: String,
}

/// Decides when the single reminder fires and drives the sink
pub struct NotificationEngine {
    sink: Arc<dyn NotificationSink>,
    permissions: Arc<dyn PermissionProvider>,
    state: NotificationState,
    delivered: Option<Delivered>,
}

impl NotificationEngine {
    pub fn new(sink: Arc<dyn NotificationSink>, permissions: Arc<dyn PermissionProvider>) -> Self {
        Self {
            sink,
            permissions,
            state: NotificationState::NoActiveNotification,
            delivered: None,
        }
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    /// Ask the user for permission to show reminders
    pub async fn request_authorization(&self) -> BotResult<bool> {
        self.permissions.request_authorization().await
    }

    /// Reconcile the pending reminder with the latest events
    pub async fn evaluate(
        &mut self,
        events: &[Event],
        lead_time: LeadTime,
        now: DateTime<Utc>,
    ) -> BotResult<Evaluation> {
        let Some(lead) = lead_time.duration() else {
            return Ok(Evaluation::Disabled);
        };

        if !self.permissions.is_authorized().await {
            debug!("Reminders not authorized, skipping evaluation");
            return Ok(Evaluation::Unauthorized);
        }

        let candidate = match select_candidate(events, &now) {
            Some((event, start)) if start > now => (event, start),
            _ => return self.clear().await,
        };
        let (event, start) = candidate;
        let notify_at = start - lead;

        if notify_at <= now {
            self.remind_now(event, start, now).await
        } else {
            self.schedule_for(event, notify_at, lead).await
        }
    }

    /// Cancel any pending reminder and forget delivered ones
    pub async fn reset(&mut self) -> BotResult<()> {
        self.delivered = None;
        if let NotificationState::Scheduled(_) = self.state {
            self.sink.cancel_all().await?;
            info!("Pending reminder cancelled");
            self.state = NotificationState::NoActiveNotification;
        }
        Ok(())
    }

    async fn clear(&mut self) -> BotResult<Evaluation> {
        if let NotificationState::Scheduled(existing) = &self.state {
            debug!("No upcoming event, clearing reminder for {}", existing.event_id);
            self.sink.cancel_all().await.map_err(|e| {
                error!("Failed to clear pending reminders: {}", e);
                e
            })?;
            self.state = NotificationState::NoActiveNotification;
            return Ok(Evaluation::Cleared);
        }
        Ok(Evaluation::Idle)
    }

    async fn remind_now(
        &mut self,
        event: &Event,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BotResult<Evaluation> {
        if let NotificationState::Scheduled(existing) = &self.state {
            if targets(existing, event) {
                // Well past its time and still queued: the machine slept through it
                let overdue =
                    now - existing.notify_at > Duration::seconds(RESCHEDULE_TOLERANCE_SECS);
                if !overdue || !self.sink.is_pending(&existing.event_id).await {
                    debug!("Reminder for {} has fired", event.id);
                    self.delivered = Some(Delivered {
                        event_id: event.id.clone(),
                        etag: event.etag.clone(),
                    });
                    self.state = NotificationState::NoActiveNotification;
                    return Ok(Evaluation::Delivered);
                }
                warn!(
                    "Reminder for {} due at {} was never shown, sending it now",
                    event.id, existing.notify_at
                );
            }
        }

        if let Some(delivered) = &self.delivered {
            if delivered.event_id == event.id && delivered.etag == event.etag {
                return Ok(Evaluation::Unchanged);
            }
        }

        let mut failure = self.cancel_existing().await.err();

        let body = starting_in(minutes_until_ceil(&now, &start));
        let fire_at = now + Duration::seconds(IMMEDIATE_DELAY_SECS);
        match self
            .sink
            .schedule(&event.id, event.display_title(), &body, fire_at)
            .await
        {
            Ok(()) => {
                info!("Lead time elapsed, reminding now: {}", event.display_title());
                self.delivered = Some(Delivered {
                    event_id: event.id.clone(),
                    etag: event.etag.clone(),
                });
                self.state = NotificationState::NoActiveNotification;
            }
            Err(e) => {
                error!("Failed to send reminder for {}: {}", event.id, e);
                failure = Some(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Evaluation::Immediate),
        }
    }

    async fn schedule_for(
        &mut self,
        event: &Event,
        notify_at: DateTime<Utc>,
        lead: Duration,
    ) -> BotResult<Evaluation> {
        if let NotificationState::Scheduled(existing) = &self.state {
            if targets(existing, event) && close(existing.notify_at, notify_at) {
                return Ok(Evaluation::Unchanged);
            }
        }

        let mut failure = self.cancel_existing().await.err();

        let body = starting_in(lead.num_minutes());
        match self
            .sink
            .schedule(&event.id, event.display_title(), &body, notify_at)
            .await
        {
            Ok(()) => {
                info!(
                    "Scheduled reminder for {} at {}",
                    event.display_title(),
                    notify_at
                );
                self.state = NotificationState::Scheduled(ScheduledNotification {
                    event_id: event.id.clone(),
                    etag: event.etag.clone(),
                    notify_at,
                });
            }
            Err(e) => {
                error!("Failed to schedule reminder for {}: {}", event.id, e);
                failure = Some(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Evaluation::Scheduled(notify_at)),
        }
    }

    /// Cancel the pending reminder, keeping the state if the sink refuses
    async fn cancel_existing(&mut self) -> Result<(), Error> {
        let NotificationState::Scheduled(existing) = &self.state else {
            return Ok(());
        };

        match self.sink.cancel(&existing.event_id).await {
            Ok(()) => {
                debug!("Cancelled reminder for {}", existing.event_id);
                self.state = NotificationState::NoActiveNotification;
                Ok(())
            }
            Err(e) => {
                error!("Failed to cancel reminder for {}: {}", existing.event_id, e);
                Err(e)
            }
        }
    }
}

/// Earliest event that starts after `now`; untimed events never qualify
pub fn select_candidate<'a>(
    events: &'a [Event],
    now: &DateTime<Utc>,
) -> Option<(&'a Event, DateTime<Utc>)> {
    events
        .iter()
        .filter_map(|event| event.start.map(|start| (event, start)))
        .filter(|(_, start)| start > now)
        .min_by_key(|(_, start)| *start)
}

fn targets(existing: &ScheduledNotification, event: &Event) -> bool {
    existing.event_id == event.id && existing.etag == event.etag
}

fn close(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_seconds().abs() < RESCHEDULE_TOLERANCE_SECS
}

fn starting_in(minutes: i64) -> String {
    match minutes {
        m if m <= 0 => "Starting now".to_string(),
        1 => "Starting in 1 minute".to_string(),
        m => format!("Starting in {} minutes", m),
    }
}

use super::notifications::RESCHEDULE_TOLERANCE_SECS;
use crate::config::ConfigStore;
use crate::error::{scheduling_error, BotResult};
use crate::utils::time::{delay_until, Clock};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest single sleep while waiting for a reminder. Tokio timers stop
/// during suspend, so the wall clock is re-read at least this often.
const WALL_CLOCK_STEP: std::time::Duration = std::time::Duration::from_secs(1);

/// Reminders found later than this after their fire time are not shown
const LATE_GRACE_SECS: i64 = RESCHEDULE_TOLERANCE_SECS;

/// OS-level facility that delivers reminders
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    /// Arrange for a reminder to be shown at `fire_at`, replacing any pending one with `id`
    async fn schedule(
        &self,
        id: &str,
        title: &str,
        body: &str,
        fire_at: DateTime<Utc>,
    ) -> BotResult<()>;

    /// Drop the pending reminder with `id`
    async fn cancel(&self, id: &str) -> BotResult<()>;

    /// Drop every pending reminder
    async fn cancel_all(&self) -> BotResult<()>;

    /// Whether the reminder with `id` has not been shown yet.
    ///
    /// Sinks that cannot tell report `false` and are trusted to have shown it.
    async fn is_pending(&self, _id: &str) -> bool {
        false
    }
}

/// Whether the user allows reminders to be shown
#[async_trait]
pub trait PermissionProvider: Send + Sync + 'static {
    async fn is_authorized(&self) -> bool;

    /// Ask the user for permission. Only called on explicit user action.
    async fn request_authorization(&self) -> BotResult<bool>;
}

/// Puts a due reminder in front of the user
#[async_trait]
pub trait ReminderDisplay: Send + Sync + 'static {
    async fn show(&self, title: &str, body: &str);
}

/// Desktop notification popup
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopDisplay;

#[async_trait]
impl ReminderDisplay for DesktopDisplay {
    async fn show(&self, title: &str, body: &str) {
        show_reminder(title.to_string(), body.to_string()).await;
    }
}

struct PendingReminder {
    generation: u64,
    task: JoinHandle<()>,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingReminder>>>;

struct Reminder {
    id: String,
    generation: u64,
    title: String,
    body: String,
    fire_at: DateTime<Utc>,
}

/// Sink that keeps one timer task per pending reminder.
///
/// A reminder stays in the pending table until it is shown or cancelled. One
/// that comes due more than a minute late (the machine was asleep) is held
/// back rather than shown stale, and stays pending so the engine can see
/// that it never went out.
pub struct DesktopSink {
    clock: Arc<dyn Clock>,
    display: Arc<dyn ReminderDisplay>,
    pending: PendingTable,
    generation: AtomicU64,
}

impl DesktopSink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_display(clock, Arc::new(DesktopDisplay))
    }

    pub fn with_display(clock: Arc<dyn Clock>, display: Arc<dyn ReminderDisplay>) -> Self {
        Self {
            clock,
            display,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of reminders that have not been shown yet
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    fn table(&self) -> BotResult<MutexGuard<'_, HashMap<String, PendingReminder>>> {
        self.pending
            .lock()
            .map_err(|_| scheduling_error("Pending reminder table poisoned"))
    }
}

#[async_trait]
impl NotificationSink for DesktopSink {
    async fn schedule(
        &self,
        id: &str,
        title: &str,
        body: &str,
        fire_at: DateTime<Utc>,
    ) -> BotResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let reminder = Reminder {
            id: id.to_string(),
            generation,
            title: title.to_string(),
            body: body.to_string(),
            fire_at,
        };

        // Held while spawning so the task cannot claim its entry before it exists
        let mut pending = self.table()?;
        let task = tokio::spawn(deliver(
            reminder,
            Arc::clone(&self.clock),
            Arc::clone(&self.display),
            Arc::clone(&self.pending),
        ));
        if let Some(previous) = pending.insert(id.to_string(), PendingReminder { generation, task }) {
            previous.task.abort();
        }

        debug!("Desktop reminder {} armed for {}", id, fire_at);
        Ok(())
    }

    async fn cancel(&self, id: &str) -> BotResult<()> {
        let mut pending = self.table()?;
        if let Some(entry) = pending.remove(id) {
            entry.task.abort();
            debug!("Desktop reminder {} cancelled", id);
        }
        Ok(())
    }

    async fn cancel_all(&self) -> BotResult<()> {
        let mut pending = self.table()?;
        for (_, entry) in pending.drain() {
            entry.task.abort();
        }
        debug!("All desktop reminders cancelled");
        Ok(())
    }

    async fn is_pending(&self, id: &str) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains_key(id))
            .unwrap_or(false)
    }
}

impl Drop for DesktopSink {
    fn drop(&mut self) {
        if let Ok(pending) = self.pending.lock() {
            for entry in pending.values() {
                entry.task.abort();
            }
        }
    }
}

async fn deliver(
    reminder: Reminder,
    clock: Arc<dyn Clock>,
    display: Arc<dyn ReminderDisplay>,
    pending: PendingTable,
) {
    loop {
        let now = clock.now();
        if now >= reminder.fire_at {
            break;
        }
        tokio::time::sleep(delay_until(&now, &reminder.fire_at).min(WALL_CLOCK_STEP)).await;
    }

    let late = clock.now() - reminder.fire_at;
    if late > Duration::seconds(LATE_GRACE_SECS) {
        warn!(
            "Reminder {} came due {} s late, not showing it",
            reminder.id,
            late.num_seconds()
        );
        return;
    }

    if claim(&pending, &reminder.id, reminder.generation) {
        display.show(&reminder.title, &reminder.body).await;
    }
}

/// Remove the entry if it still belongs to this task
fn claim(pending: &PendingTable, id: &str, generation: u64) -> bool {
    let Ok(mut pending) = pending.lock() else {
        return false;
    };
    match pending.get(id) {
        Some(entry) if entry.generation == generation => {
            pending.remove(id);
            true
        }
        _ => false,
    }
}

#[cfg(feature = "desktop-notifications")]
async fn show_reminder(title: String, body: String) {
    use tracing::error;

    let shown = tokio::task::spawn_blocking(move || {
        notify_rust::Notification::new()
            .appname("ontime")
            .summary(&title)
            .body(&body)
            .show()
            .map(|_| title)
    })
    .await;

    match shown {
        Ok(Ok(title)) => info!("Reminder shown: {}", title),
        Ok(Err(e)) => error!("Failed to show reminder: {}", e),
        Err(e) => error!("Reminder task failed: {}", e),
    }
}

#[cfg(not(feature = "desktop-notifications"))]
async fn show_reminder(title: String, body: String) {
    info!("Reminder: {} ({})", title, body);
}

/// Permission stored in the user's preference file
#[derive(Clone)]
pub struct PreferencePermissions {
    store: ConfigStore,
}

impl PreferencePermissions {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionProvider for PreferencePermissions {
    async fn is_authorized(&self) -> bool {
        self.store.preferences().notifications_authorized == Some(true)
    }

    /// Record the user's consent. Reached only from an explicit user request.
    async fn request_authorization(&self) -> BotResult<bool> {
        self.store
            .update(|p| p.notifications_authorized = Some(true))?;
        info!("Reminder notifications authorized");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preferences;
    use crate::utils::time::SystemClock;
    use chrono::TimeZone;
    use tokio::time::Instant;

    struct ShiftedClock {
        origin: DateTime<Utc>,
        started: Instant,
        shift: Mutex<Duration>,
    }

    impl ShiftedClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                origin: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                started: Instant::now(),
                shift: Mutex::new(Duration::zero()),
            })
        }

        fn suspend(&self, by: Duration) {
            *self.shift.lock().unwrap() += by;
        }
    }

    impl Clock for ShiftedClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Duration::from_std(self.started.elapsed()).unwrap();
            self.origin + elapsed + *self.shift.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        shown: Mutex<Vec<(String, String)>>,
    }

    impl RecordingDisplay {
        fn shown(&self) -> Vec<(String, String)> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReminderDisplay for RecordingDisplay {
        async fn show(&self, title: &str, body: &str) {
            self.shown
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
        }
    }

    #[tokio::test]
    async fn test_desktop_sink_replaces_and_cancels() {
        let display = Arc::new(RecordingDisplay::default());
        let sink = DesktopSink::with_display(Arc::new(SystemClock), display.clone());
        let later = Utc::now() + Duration::hours(1);

        sink.schedule("a", "Standup", "Starting in 5 minutes", later)
            .await
            .unwrap();
        sink.schedule("a", "Standup", "Starting in 5 minutes", later)
            .await
            .unwrap();
        sink.schedule("b", "Review", "Starting in 5 minutes", later)
            .await
            .unwrap();
        assert_eq!(sink.pending_count(), 2);
        assert!(sink.is_pending("a").await);

        sink.cancel("a").await.unwrap();
        assert_eq!(sink.pending_count(), 1);
        assert!(!sink.is_pending("a").await);

        sink.cancel_all().await.unwrap();
        assert_eq!(sink.pending_count(), 0);
        assert!(display.shown().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reminder_fires_on_wall_clock_after_suspend() {
        let clock = ShiftedClock::new();
        let display = Arc::new(RecordingDisplay::default());
        let sink = DesktopSink::with_display(clock.clone(), display.clone());

        let fire_at = clock.now() + Duration::minutes(10);
        sink.schedule("a", "Standup", "Starting in 5 minutes", fire_at)
            .await
            .unwrap();

        // Nine minutes asleep: only a minute of timer time remains
        clock.suspend(Duration::minutes(9));
        tokio::time::sleep(std::time::Duration::from_secs(58)).await;
        assert!(display.shown().is_empty());
        assert!(sink.is_pending("a").await);

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert_eq!(
            display.shown(),
            vec![("Standup".to_string(), "Starting in 5 minutes".to_string())]
        );
        assert!(!sink.is_pending("a").await);
        assert_eq!(sink.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_reminder_is_held_back() {
        let clock = ShiftedClock::new();
        let display = Arc::new(RecordingDisplay::default());
        let sink = DesktopSink::with_display(clock.clone(), display.clone());

        let fire_at = clock.now() + Duration::minutes(5);
        sink.schedule("a", "Standup", "Starting in 5 minutes", fire_at)
            .await
            .unwrap();

        // Asleep through the fire time
        clock.suspend(Duration::minutes(7));
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(display.shown().is_empty());
        assert!(sink.is_pending("a").await);

        sink.cancel("a").await.unwrap();
        assert!(!sink.is_pending("a").await);
    }

    #[tokio::test]
    async fn test_preference_permissions() {
        let store = ConfigStore::in_memory(Preferences::default());
        let permissions = PreferencePermissions::new(store.clone());

        assert!(!permissions.is_authorized().await);
        assert!(permissions.request_authorization().await.unwrap());
        assert!(permissions.is_authorized().await);
        assert_eq!(store.preferences().notifications_authorized, Some(true));
    }
}

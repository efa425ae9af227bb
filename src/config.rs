use crate::components::calendar::models::LeadTime;
use crate::error::{config_error, env_error, BotResult};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Calendar queried when none is configured
pub const DEFAULT_CALENDAR_ID: &str = "primary";
/// Base URL of the Google Calendar v3 API
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
/// Default location of the OAuth token file
pub const DEFAULT_TOKEN_PATH: &str = "config/token.json";
/// Default location of the user preference file
pub const DEFAULT_PREFERENCES_PATH: &str = "config/preferences.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Google Calendar API client ID
    pub google_client_id: String,
    /// Google Calendar API client secret
    pub google_client_secret: String,
    /// Google Calendar ID to monitor
    pub google_calendar_id: String,
    /// Base URL for the Calendar API
    pub google_api_base: String,
    /// Where the OAuth token is persisted
    pub token_path: PathBuf,
    /// Where user preferences are persisted
    pub preferences_path: PathBuf,
    /// How often the wake monitor samples the clocks
    pub wake_poll_interval_secs: u64,
    /// Wall-clock gap that counts as a sleep/wake cycle
    pub wake_gap_threshold_secs: u64,
    /// User preferences loaded from `preferences_path`
    pub preferences: Preferences,
}

impl Config {
    /// Load configuration from environment and preference file
    pub fn load() -> BotResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let google_client_id =
            env::var("GOOGLE_CLIENT_ID").map_err(|_| env_error("GOOGLE_CLIENT_ID"))?;
        let google_client_secret =
            env::var("GOOGLE_CLIENT_SECRET").map_err(|_| env_error("GOOGLE_CLIENT_SECRET"))?;
        let google_calendar_id =
            env::var("GOOGLE_CALENDAR_ID").unwrap_or_else(|_| DEFAULT_CALENDAR_ID.to_string());
        let google_api_base =
            env::var("GOOGLE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let token_path = env::var("TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_PATH));
        let preferences_path = env::var("PREFERENCES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PREFERENCES_PATH));

        let wake_poll_interval_secs = parse_secs("WAKE_POLL_INTERVAL_SECS", 5)?;
        let wake_gap_threshold_secs = parse_secs("WAKE_GAP_THRESHOLD_SECS", 30)?;

        let preferences = Preferences::load_or_default(&preferences_path);

        Ok(Config {
            google_client_id,
            google_client_secret,
            google_calendar_id,
            google_api_base,
            token_path,
            preferences_path,
            wake_poll_interval_secs,
            wake_gap_threshold_secs,
            preferences,
        })
    }

    /// Wake monitor sampling interval
    pub fn wake_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wake_poll_interval_secs.max(1))
    }

    /// Wake monitor gap threshold
    pub fn wake_gap_threshold(&self) -> Duration {
        Duration::from_secs(self.wake_gap_threshold_secs)
    }
}

fn parse_secs(var: &str, default: u64) -> BotResult<u64> {
    match env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|_| config_error(&format!("Invalid {} format", var))),
        Err(_) => Ok(default),
    }
}

/// User-facing settings, persisted as TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Minutes before an event to remind; `None` or 0 disables reminders
    pub meeting_notification_minutes: Option<u32>,
    /// Whether the user allowed reminders; `None` until asked
    pub notifications_authorized: Option<bool>,
    pub show_event_title_in_menu_bar: bool,
    pub truncated_event_title_length: usize,
    pub simplify_event_titles: bool,
    pub ignore_full_day_events: bool,
    pub ignore_events_without_attendees: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            meeting_notification_minutes: Some(5),
            notifications_authorized: None,
            show_event_title_in_menu_bar: true,
            truncated_event_title_length: 30,
            simplify_event_titles: true,
            ignore_full_day_events: true,
            ignore_events_without_attendees: true,
        }
    }
}

impl Preferences {
    /// Configured reminder lead time
    pub fn lead_time(&self) -> LeadTime {
        LeadTime::from_minutes(self.meeting_notification_minutes)
    }

    /// Read preferences from a TOML file, merged over the defaults
    pub fn load_or_default(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Preferences>(&content) {
                Ok(preferences) => preferences,
                Err(e) => {
                    warn!("Ignoring malformed preferences at {}: {}", path.display(), e);
                    Preferences::default()
                }
            },
            Err(_) => {
                debug!("No preferences at {}, using defaults", path.display());
                Preferences::default()
            }
        }
    }

    /// Save preferences to a TOML file
    pub fn save(&self, path: &Path) -> BotResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_str = toml::to_string(self)?;
        fs::write(path, toml_str)?;

        Ok(())
    }
}

/// Observable preference store shared by the scheduler and the UI
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    tx: Arc<watch::Sender<Preferences>>,
}

impl ConfigStore {
    /// Create a store that persists every update to `path`
    pub fn new(preferences: Preferences, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            tx: Arc::new(watch::Sender::new(preferences)),
        }
    }

    /// Create a store that never touches the filesystem
    pub fn in_memory(preferences: Preferences) -> Self {
        Self {
            path: None,
            tx: Arc::new(watch::Sender::new(preferences)),
        }
    }

    /// Current preferences
    pub fn preferences(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    /// Current reminder lead time
    pub fn lead_time(&self) -> LeadTime {
        self.tx.borrow().lead_time()
    }

    /// Observe preference changes
    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }

    /// Apply a change, notify observers and persist it
    pub fn update<F>(&self, change: F) -> BotResult<()>
    where
        F: FnOnce(&mut Preferences),
    {
        let modified = self.tx.send_if_modified(|preferences| {
            let before = preferences.clone();
            change(preferences);
            *preferences != before
        });

        if modified {
            if let Some(path) = &self.path {
                self.preferences().save(path)?;
            }
        }

        Ok(())
    }
}

use chrono::{Duration, Utc};
use ontime::components::calendar::title::{generate_title, ALL_CLEAR_TITLE};
use ontime::components::calendar::{Calendar, Event, LeadTime};
use ontime::components::{AppContext, ComponentManager};
use ontime::config::{Config, ConfigStore, Preferences};
use ontime::utils::time::SystemClock;
use std::sync::Arc;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        google_client_id: "client-id".to_string(),
        google_client_secret: "client-secret".to_string(),
        google_calendar_id: "primary".to_string(),
        google_api_base: "http://127.0.0.1:9".to_string(),
        token_path: dir.path().join("token.json"),
        preferences_path: dir.path().join("preferences.toml"),
        wake_poll_interval_secs: 5,
        wake_gap_threshold_secs: 30,
        preferences: Preferences::default(),
    }
}

/// Smoke test to verify the defaults a fresh install starts with
#[tokio::test]
async fn test_default_preferences() {
    let preferences = Preferences::default();
    assert_eq!(preferences.lead_time(), LeadTime::Minutes(5));
    assert_eq!(preferences.notifications_authorized, None);
    assert!(preferences.ignore_full_day_events);
}

/// Preference updates reach subscribers and survive a reload
#[tokio::test]
async fn test_preference_store_persists_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.toml");
    let store = ConfigStore::new(Preferences::default(), &path);
    let mut changes = store.subscribe();

    store
        .update(|p| p.meeting_notification_minutes = Some(10))
        .unwrap();

    assert!(changes.has_changed().unwrap());
    assert_eq!(changes.borrow_and_update().lead_time(), LeadTime::Minutes(10));
    assert_eq!(
        Preferences::load_or_default(&path).meeting_notification_minutes,
        Some(10)
    );
}

/// The calendar component registers and can be looked up by type
#[tokio::test]
async fn test_component_registration() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(&dir));
    let ctx = AppContext {
        preferences: ConfigStore::in_memory(config.preferences.clone()),
        config,
        clock: Arc::new(SystemClock),
    };

    let mut manager = ComponentManager::new(ctx);
    manager.register(Calendar::new());

    let calendar = manager.get::<Calendar>("calendar").unwrap();
    assert!(calendar.get_handle().await.is_none());
    assert!(manager.get_component_by_name("missing").is_none());
    assert!(manager.shutdown_all().await.is_ok());
}

/// Starting the calendar never grants reminders on the user's behalf
#[tokio::test]
async fn test_init_leaves_reminder_authorization_to_the_user() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(&dir));
    let store = ConfigStore::in_memory(Preferences {
        notifications_authorized: Some(false),
        ..Default::default()
    });
    let ctx = AppContext {
        preferences: store.clone(),
        config,
        clock: Arc::new(SystemClock),
    };

    let mut manager = ComponentManager::new(ctx);
    manager.register(Calendar::new());
    manager.init_all().await.unwrap();
    assert_eq!(store.preferences().notifications_authorized, Some(false));

    // An explicit request re-grants a previous refusal
    let handle = manager
        .get::<Calendar>("calendar")
        .unwrap()
        .get_handle()
        .await
        .unwrap();
    assert!(handle.request_authorization().await.unwrap());
    assert_eq!(store.preferences().notifications_authorized, Some(true));

    manager.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_init_on_first_launch_does_not_authorize() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(&dir));
    let store = ConfigStore::in_memory(config.preferences.clone());
    let ctx = AppContext {
        preferences: store.clone(),
        config,
        clock: Arc::new(SystemClock),
    };

    let mut manager = ComponentManager::new(ctx);
    manager.register(Calendar::new());
    manager.init_all().await.unwrap();

    assert_eq!(store.preferences().notifications_authorized, None);
    manager.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_menu_bar_title_for_snapshot() {
    let now = Utc::now();
    let events = vec![Event {
        id: "review".to_string(),
        title: Some("Design review (optional)".to_string()),
        start: Some(now + Duration::minutes(42)),
        end: Some(now + Duration::minutes(72)),
        etag: "1".to_string(),
        attendee_count: 3,
        ..Default::default()
    }];

    let preferences = Preferences::default();
    assert_eq!(
        generate_title(None, &events, &preferences, &now),
        "42m until Design review"
    );
    assert_eq!(generate_title(None, &[], &preferences, &now), ALL_CLEAR_TITLE);
}

use crate::error::{Error, ErrorKind};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Title shown for events without a summary
pub const UNTITLED_EVENT: &str = "Untitled Event";

/// Calendar event as produced by an [`EventSource`](super::source::EventSource)
///
/// `start` is only present for timed events. All-day events carry their
/// date in `all_day` instead and never become reminder candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Event {
    pub id: String,
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Source version token, changes whenever the record changes
    pub etag: String,
    pub all_day: Option<NaiveDate>,
    pub html_link: Option<String>,
    pub conference_uri: Option<String>,
    pub attendee_count: usize,
}

impl Event {
    /// Title with the untitled fallback applied
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED_EVENT)
    }

    /// Link for joining the meeting, falling back to the calendar page
    pub fn join_link(&self) -> Option<&str> {
        self.conference_uri.as_deref().or(self.html_link.as_deref())
    }

    /// Whether the event has started and not yet ended
    pub fn is_in_progress(&self, now: &DateTime<Utc>) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => start <= *now && *now <= end,
            _ => false,
        }
    }
}

/// Events from one successful fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSnapshot {
    pub events: Vec<Event>,
    pub fetched_at: DateTime<Utc>,
}

impl EventSnapshot {
    pub fn new(events: Vec<Event>, fetched_at: DateTime<Utc>) -> Self {
        Self { events, fetched_at }
    }

    /// Earliest event starting after `now`
    pub fn next_event(&self, now: &DateTime<Utc>) -> Option<&Event> {
        self.events
            .iter()
            .filter(|event| event.start.is_some_and(|start| start > *now))
            .min_by_key(|event| event.start)
    }

    /// Events currently running
    pub fn in_progress<'a>(&'a self, now: &'a DateTime<Utc>) -> impl Iterator<Item = &'a Event> {
        self.events.iter().filter(move |event| event.is_in_progress(now))
    }
}

/// The single pending reminder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledNotification {
    pub event_id: String,
    pub etag: String,
    pub notify_at: DateTime<Utc>,
}

/// How long before an event the reminder fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadTime {
    Disabled,
    Minutes(u32),
}

impl LeadTime {
    /// Map a stored minute count, treating zero as disabled
    pub fn from_minutes(minutes: Option<u32>) -> Self {
        match minutes {
            Some(m) if m > 0 => LeadTime::Minutes(m),
            _ => LeadTime::Disabled,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            LeadTime::Disabled => None,
            LeadTime::Minutes(m) => Some(Duration::minutes(i64::from(*m))),
        }
    }
}

/// Most recent failure, published for banners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl LastError {
    pub fn from_error(error: &Error, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, start: Option<DateTime<Utc>>) -> Event {
        Event {
            id: id.to_string(),
            etag: format!("etag-{}", id),
            start,
            end: start.map(|s| s + Duration::minutes(30)),
            ..Default::default()
        }
    }

    #[test]
    fn test_next_event_skips_started_and_untimed() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let snapshot = EventSnapshot::new(
            vec![
                event("running", Some(now - Duration::minutes(10))),
                event("all-day", None),
                event("later", Some(now + Duration::minutes(90))),
                event("soon", Some(now + Duration::minutes(20))),
            ],
            now,
        );

        assert_eq!(snapshot.next_event(&now).map(|e| e.id.as_str()), Some("soon"));
        let running: Vec<_> = snapshot.in_progress(&now).map(|e| e.id.as_str()).collect();
        assert_eq!(running, vec!["running"]);
    }

    #[test]
    fn test_event_serializes_with_timestamps() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap();
        let standup = event("standup", Some(start));

        let json = serde_json::to_value(EventSnapshot::new(vec![standup.clone()], start)).unwrap();
        assert_eq!(json["fetched_at"], "2025-03-10T10:30:00Z");
        assert_eq!(json["events"][0]["start"], "2025-03-10T10:30:00Z");

        let decoded: Event = serde_json::from_value(json["events"][0].clone()).unwrap();
        assert_eq!(decoded, standup);
    }

    #[test]
    fn test_join_link_prefers_conference() {
        let mut standup = event("standup", None);
        assert_eq!(standup.join_link(), None);

        standup.html_link = Some("https://calendar.google.com/event?eid=1".to_string());
        assert_eq!(
            standup.join_link(),
            Some("https://calendar.google.com/event?eid=1")
        );

        standup.conference_uri = Some("https://meet.google.com/abc-defg-hij".to_string());
        assert_eq!(standup.join_link(), Some("https://meet.google.com/abc-defg-hij"));
    }

    #[test]
    fn test_display_title_fallback() {
        let untitled = event("x", None);
        assert_eq!(untitled.display_title(), UNTITLED_EVENT);
    }

    #[test]
    fn test_lead_time() {
        assert_eq!(LeadTime::from_minutes(None), LeadTime::Disabled);
        assert_eq!(LeadTime::from_minutes(Some(0)), LeadTime::Disabled);
        assert_eq!(
            LeadTime::from_minutes(Some(5)).duration(),
            Some(Duration::minutes(5))
        );
    }
}

use super::models::Event;
use super::source::EventSource;
use super::time::{parse_date, parse_date_time};
use super::token::TokenManager;
use crate::config::{Config, ConfigStore, Preferences};
use crate::error::{auth_error, config_error, decode_error, network_error, BotResult};
use crate::utils::time::{end_of_local_day, Clock};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Google Calendar v3 events listing
#[derive(Debug, Deserialize)]
struct EventsResponse {
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    etag: String,
    #[serde(default)]
    status: Option<String>,
    summary: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    html_link: Option<String>,
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Attendee {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    entry_point_type: String,
    uri: String,
}

impl GoogleEvent {
    fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    fn into_event(self) -> Event {
        let (start, all_day) = match &self.start {
            Some(start) => decode_time(&self.id, start),
            None => (None, None),
        };
        let end = self.end.as_ref().and_then(|end| decode_time(&self.id, end).0);

        let conference_uri = self.conference_data.and_then(|data| {
            data.entry_points
                .into_iter()
                .find(|entry| entry.entry_point_type == "video")
                .map(|entry| entry.uri)
        });

        Event {
            id: self.id,
            title: self.summary,
            start,
            end,
            etag: self.etag,
            all_day,
            html_link: self.html_link,
            conference_uri,
            attendee_count: self.attendees.len(),
        }
    }
}

/// Timed events get a start instant; all-day events only a date
fn decode_time(
    id: &str,
    value: &EventDateTime,
) -> (Option<chrono::DateTime<chrono::Utc>>, Option<chrono::NaiveDate>) {
    if let Some(date_time) = &value.date_time {
        match parse_date_time(date_time) {
            Ok(dt) => return (Some(dt), None),
            Err(e) => {
                warn!("Event {} has an unreadable time: {}", id, e);
                return (None, None);
            }
        }
    }

    match value.date.as_deref().map(parse_date) {
        Some(Ok(date)) => (None, Some(date)),
        Some(Err(e)) => {
            warn!("Event {} has an unreadable date: {}", id, e);
            (None, None)
        }
        None => (None, None),
    }
}

/// Preference-driven event filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub ignore_full_day_events: bool,
    pub ignore_events_without_attendees: bool,
}

impl EventFilter {
    pub fn from_preferences(preferences: &Preferences) -> Self {
        Self {
            ignore_full_day_events: preferences.ignore_full_day_events,
            ignore_events_without_attendees: preferences.ignore_events_without_attendees,
        }
    }

    pub fn apply(&self, events: Vec<Event>) -> Vec<Event> {
        events
            .into_iter()
            .filter(|event| !(self.ignore_full_day_events && event.start.is_none()))
            .filter(|event| !(self.ignore_events_without_attendees && event.attendee_count == 0))
            .collect()
    }
}

/// Decode an events listing into filtered domain events
fn decode_events(body: &str, filter: EventFilter) -> BotResult<Vec<Event>> {
    let response: EventsResponse = serde_json::from_str(body)
        .map_err(|e| decode_error(&format!("Failed to parse events response: {}", e)))?;

    let total = response.items.len();
    let events: Vec<Event> = response
        .items
        .into_iter()
        .filter(|event| !event.is_cancelled())
        .map(GoogleEvent::into_event)
        .collect();
    let events = filter.apply(events);

    debug!("Fetched {} events, filtered to {}", total, events.len());
    Ok(events)
}

/// Event source backed by the Google Calendar API
pub struct GoogleCalendarSource {
    client: Client,
    api_base: String,
    calendar_id: String,
    tokens: TokenManager,
    preferences: ConfigStore,
    clock: Arc<dyn Clock>,
}

impl GoogleCalendarSource {
    pub fn new(
        config: &Config,
        tokens: TokenManager,
        preferences: ConfigStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: config.google_api_base.clone(),
            calendar_id: config.google_calendar_id.clone(),
            tokens,
            preferences,
            clock,
        }
    }

    fn events_url(&self) -> BotResult<Url> {
        let now = self.clock.now();
        let time_min = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = end_of_local_day(&now).to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut url = Url::parse(&self.api_base)
            .map_err(|e| config_error(&format!("Failed to parse URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| config_error("Calendar API base cannot hold a path"))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);

        url.query_pairs_mut()
            .append_pair("timeMin", &time_min)
            .append_pair("timeMax", &time_max)
            .append_pair("singleEvents", "true")
            .append_pair("orderBy", "startTime")
            .append_pair("eventTypes", "default")
            .append_pair("conferenceDataVersion", "1");

        Ok(url)
    }
}

#[async_trait]
impl EventSource for GoogleCalendarSource {
    async fn fetch(&self) -> BotResult<Vec<Event>> {
        let access_token = self.tokens.access_token().await?;
        let url = self.events_url()?;

        debug!("Fetching events from {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| network_error(&format!("Failed to fetch events: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(auth_error(&format!("Calendar rejected credentials: HTTP {}", status)));
        }
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(network_error(&format!(
                "Failed to fetch events: HTTP {} - {}",
                status, error_body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| network_error(&format!("Failed to read events response: {}", e)))?;

        decode_events(&body, EventFilter::from_preferences(&self.preferences.preferences()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    const BODY: &str = r#"{
        "items": [
            {
                "id": "standup",
                "etag": "\"3181\"",
                "status": "confirmed",
                "summary": "Team Standup",
                "start": { "dateTime": "2025-03-10T10:00:00+02:00" },
                "end": { "dateTime": "2025-03-10T10:15:00+02:00" },
                "attendees": [{ "email": "a@example.com" }, { "email": "b@example.com" }],
                "htmlLink": "https://calendar.google.com/event?eid=1",
                "conferenceData": {
                    "entryPoints": [
                        { "entryPointType": "phone", "uri": "tel:+1-555" },
                        { "entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij" }
                    ]
                }
            },
            {
                "id": "holiday",
                "etag": "\"3182\"",
                "summary": "Holiday",
                "start": { "date": "2025-03-10" },
                "end": { "date": "2025-03-11" },
                "attendees": [{ "email": "a@example.com" }]
            },
            {
                "id": "focus",
                "etag": "\"3183\"",
                "start": { "dateTime": "2025-03-10T13:00:00Z" },
                "end": { "dateTime": "2025-03-10T14:00:00Z" }
            },
            {
                "id": "dropped",
                "etag": "\"3184\"",
                "status": "cancelled",
                "start": { "dateTime": "2025-03-10T15:00:00Z" },
                "attendees": [{ "email": "a@example.com" }]
            }
        ]
    }"#;

    const KEEP_ALL: EventFilter = EventFilter {
        ignore_full_day_events: false,
        ignore_events_without_attendees: false,
    };

    #[test]
    fn test_decode_events() {
        let events = decode_events(BODY, KEEP_ALL).unwrap();
        assert_eq!(events.len(), 3);

        let standup = &events[0];
        assert_eq!(standup.id, "standup");
        assert_eq!(standup.etag, "\"3181\"");
        assert_eq!(standup.display_title(), "Team Standup");
        assert_eq!(
            standup.start,
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap())
        );
        assert_eq!(standup.attendee_count, 2);
        assert_eq!(
            standup.conference_uri.as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );

        let holiday = &events[1];
        assert_eq!(holiday.start, None);
        assert_eq!(holiday.all_day, NaiveDate::from_ymd_opt(2025, 3, 10));

        assert_eq!(events[2].display_title(), "Untitled Event");
    }

    #[test]
    fn test_default_filter_drops_all_day_and_solo_events() {
        let events = decode_events(BODY, EventFilter::from_preferences(&Preferences::default()))
            .unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["standup"]);
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        let err = decode_events(r#"{"kind": "calendar#events"}"#, KEEP_ALL).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn test_unreadable_time_has_no_start() {
        let body = r#"{"items": [{"id": "x", "etag": "1", "start": {"dateTime": "soon"}}]}"#;
        let events = decode_events(body, KEEP_ALL).unwrap();
        assert_eq!(events[0].start, None);
        assert_eq!(events[0].all_day, None);
    }
}

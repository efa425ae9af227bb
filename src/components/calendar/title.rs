//! Menu-bar title for the current calendar state.

use super::models::Event;
use crate::config::Preferences;
use crate::utils::time::minutes_until_ceil;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

pub const ERROR_TITLE: &str = "\u{26a0}\u{fe0f} Calendar error";
pub const ALL_CLEAR_TITLE: &str = "All clear";
const NEXT_MEETING: &str = "next meeting";
const NOW: &str = "Now";

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"\[.*?\]|\(.*?\)").expect("valid bracket pattern");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace pattern");
}

/// Title for the menu bar given the last error and the current events
pub fn generate_title(
    error: Option<&str>,
    events: &[Event],
    preferences: &Preferences,
    now: &DateTime<Utc>,
) -> String {
    if error.is_some() {
        return ERROR_TITLE.to_string();
    }

    let Some(event) = current_event(events, now) else {
        return ALL_CLEAR_TITLE.to_string();
    };

    let show_title = preferences.show_event_title_in_menu_bar;
    let title = if show_title {
        simplify_title(event.display_title(), preferences)
    } else {
        NEXT_MEETING.to_string()
    };

    if event.is_in_progress(now) {
        return if show_title {
            format!("{}: {}", NOW, title)
        } else {
            NOW.to_string()
        };
    }

    let Some(start) = event.start else {
        return ALL_CLEAR_TITLE.to_string();
    };
    let total_minutes = minutes_until_ceil(now, &start);
    let hours = total_minutes / 60;
    if hours > 0 {
        format!("{}h until {}", hours, title)
    } else {
        format!("{}m until {}", total_minutes % 60, title)
    }
}

/// Title followed by the join link of the event it is about, if any
pub fn status_line(
    error: Option<&str>,
    events: &[Event],
    preferences: &Preferences,
    now: &DateTime<Utc>,
) -> String {
    let title = generate_title(error, events, preferences, now);
    if error.is_some() {
        return title;
    }
    match current_event(events, now).and_then(Event::join_link) {
        Some(link) => format!("{} (join: {})", title, link),
        None => title,
    }
}

/// Event the title is about: the one in progress, else the next to start
pub fn current_event<'a>(events: &'a [Event], now: &DateTime<Utc>) -> Option<&'a Event> {
    events
        .iter()
        .filter(|event| event.start.is_some())
        .find(|event| event.is_in_progress(now) || event.start.is_some_and(|s| s > *now))
}

/// Drop bracketed noise and truncate to the configured length
pub fn simplify_title(title: &str, preferences: &Preferences) -> String {
    let mut result = title.to_string();

    if preferences.simplify_event_titles {
        let stripped = BRACKETED.replace_all(&result, "");
        result = WHITESPACE.replace_all(&stripped, " ").trim().to_string();
    }

    let max_length = preferences.truncated_event_title_length;
    if result.chars().count() > max_length {
        let kept: String = result.chars().take(max_length.saturating_sub(1)).collect();
        result = format!("{}…", kept);
    }

    result
}

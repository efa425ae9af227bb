use crate::error::{decode_error, BotResult};
use chrono::{DateTime, NaiveDate, Utc};

/// Parse a Google `dateTime` value (RFC 3339 with offset)
pub fn parse_date_time(value: &str) -> BotResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(&format!("Failed to parse datetime '{}': {}", value, e)))
}

/// Parse a Google all-day `date` value
pub fn parse_date(value: &str) -> BotResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| decode_error(&format!("Failed to parse date '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_time() {
        assert_eq!(
            parse_date_time("2025-03-10T10:00:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date_time("2025-03-10T10:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()
        );
        assert!(parse_date_time("2025-03-10 10:00").is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2025-03-10").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );
        assert!(parse_date("10.3.2025").is_err());
    }
}

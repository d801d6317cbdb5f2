use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

pub const NAME_MAX_LEN: usize = 300;
pub const IMAGE_URL_MAX_LEN: usize = 500;
pub const SHORT_DESCRIPTION_MAX_LEN: usize = 300;
pub const SLUG_MAX_LEN: usize = 150;
pub const TIMEZONE_MAX_LEN: usize = 10;
pub const LOCATION_MAX_LEN: usize = 300;

const IMAGE_URL_SCHEMES: [&str; 4] = ["http", "https", "ftp", "ftps"];

/// A science event as stored in the `events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub slug: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub timezone: Option<String>,
    pub location: Option<String>,
    pub schedule: Option<String>,
    pub additional_notes: Option<String>,
}

impl Event {
    /// The event ended on a day before `today`. Time of day is ignored.
    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.ends_at.date_naive() < today
    }

    /// The event ends today or later.
    pub fn is_future(&self, today: NaiveDate) -> bool {
        !self.is_past(today)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Fields accepted when creating an event. `name`, `starts_at` and `ends_at`
/// are mandatory; deserialization fails without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub slug: Option<String>,
    pub timezone: Option<String>,
    pub location: Option<String>,
    pub schedule: Option<String>,
    pub additional_notes: Option<String>,
}

impl NewEvent {
    pub fn new(name: impl Into<String>, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            starts_at,
            ends_at,
            image_url: None,
            description: None,
            short_description: None,
            slug: None,
            timezone: None,
            location: None,
            schedule: None,
            additional_notes: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_short_description(mut self, short_description: impl Into<String>) -> Self {
        self.short_description = Some(short_description.into());
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        FieldSet {
            name: &self.name,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            image_url: self.image_url.as_deref(),
            short_description: self.short_description.as_deref(),
            slug: self.slug.as_deref(),
            timezone: self.timezone.as_deref(),
            location: self.location.as_deref(),
        }
        .validate()
    }
}

/// A partial update. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventChanges {
    pub name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub image_url: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub short_description: Option<Option<String>>,
    pub slug: Option<Option<String>>,
    pub timezone: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub schedule: Option<Option<String>>,
    pub additional_notes: Option<Option<String>>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the changes on top of `event`, leaving timestamps alone.
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(name) = &self.name {
            event.name = name.clone();
        }
        if let Some(starts_at) = self.starts_at {
            event.starts_at = starts_at;
        }
        if let Some(ends_at) = self.ends_at {
            event.ends_at = ends_at;
        }
        assign(&mut event.image_url, &self.image_url);
        assign(&mut event.description, &self.description);
        assign(&mut event.short_description, &self.short_description);
        assign(&mut event.slug, &self.slug);
        assign(&mut event.timezone, &self.timezone);
        assign(&mut event.location, &self.location);
        assign(&mut event.schedule, &self.schedule);
        assign(&mut event.additional_notes, &self.additional_notes);
    }

    /// Validates the event that results from applying these changes to
    /// `current`.
    pub fn validate_against(&self, current: &Event) -> AppResult<Event> {
        let mut merged = current.clone();
        self.apply_to(&mut merged);

        FieldSet {
            name: &merged.name,
            starts_at: merged.starts_at,
            ends_at: merged.ends_at,
            image_url: merged.image_url.as_deref(),
            short_description: merged.short_description.as_deref(),
            slug: merged.slug.as_deref(),
            timezone: merged.timezone.as_deref(),
            location: merged.location.as_deref(),
        }
        .validate()?;

        Ok(merged)
    }
}

/// The constrained columns of an event, borrowed for validation.
struct FieldSet<'a> {
    name: &'a str,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    image_url: Option<&'a str>,
    short_description: Option<&'a str>,
    slug: Option<&'a str>,
    timezone: Option<&'a str>,
    location: Option<&'a str>,
}

impl FieldSet<'_> {
    fn validate(&self) -> AppResult<()> {
        validate_name(self.name)?;
        validate_time_range(self.starts_at, self.ends_at)?;
        validate_image_url(self.image_url)?;
        validate_max_len(
            "short_description",
            self.short_description,
            SHORT_DESCRIPTION_MAX_LEN,
        )?;
        validate_slug(self.slug)?;
        validate_max_len("timezone", self.timezone, TIMEZONE_MAX_LEN)?;
        validate_max_len("location", self.location, LOCATION_MAX_LEN)?;
        Ok(())
    }
}

fn assign(target: &mut Option<String>, change: &Option<Option<String>>) {
    if let Some(value) = change {
        *target = value.clone();
    }
}

fn validate_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::ValidationError("name is required".to_string()));
    }
    validate_max_len("name", Some(name), NAME_MAX_LEN)
}

fn validate_time_range(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> AppResult<()> {
    if ends_at < starts_at {
        return Err(AppError::ValidationError(format!(
            "ends_at ({}) is before starts_at ({})",
            ends_at, starts_at
        )));
    }
    Ok(())
}

fn validate_max_len(field: &str, value: Option<&str>, max: usize) -> AppResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(AppError::ValidationError(format!(
            "{} must be at most {} characters",
            field, max
        ))),
        _ => Ok(()),
    }
}

fn validate_image_url(image_url: Option<&str>) -> AppResult<()> {
    let Some(raw) = image_url else {
        return Ok(());
    };
    validate_max_len("image_url", Some(raw), IMAGE_URL_MAX_LEN)?;

    let parsed = Url::parse(raw).map_err(|e| {
        AppError::ValidationError(format!("image_url '{}' is not a valid URL: {}", raw, e))
    })?;
    if !IMAGE_URL_SCHEMES.contains(&parsed.scheme()) || !parsed.has_host() {
        return Err(AppError::ValidationError(format!(
            "image_url '{}' is not a valid URL",
            raw
        )));
    }
    Ok(())
}

/// Slugs hold ASCII letters, digits, hyphens and underscores only. A blank
/// slug is allowed.
pub fn is_valid_slug(slug: &str) -> bool {
    slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_slug(slug: Option<&str>) -> AppResult<()> {
    let Some(slug) = slug.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    validate_max_len("slug", Some(slug), SLUG_MAX_LEN)?;
    if !is_valid_slug(slug) {
        return Err(AppError::ValidationError(format!(
            "slug '{}' may only contain letters, numbers, underscores or hyphens",
            slug
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_event(ends_at: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: "Hacky Hour".to_string(),
            image_url: None,
            description: None,
            short_description: None,
            slug: Some("hacky-hour".to_string()),
            date_created: at(2024, 1, 1, 9),
            date_updated: at(2024, 1, 1, 9),
            starts_at: at(2024, 1, 1, 10),
            ends_at,
            timezone: Some("UTC".to_string()),
            location: None,
            schedule: None,
            additional_notes: None,
        }
    }

    #[test]
    fn test_event_ending_yesterday_is_past() {
        let event = sample_event(at(2024, 3, 9, 23));
        assert!(event.is_past(date(2024, 3, 10)));
        assert!(!event.is_future(date(2024, 3, 10)));
    }

    #[test]
    fn test_event_ending_earlier_today_is_future() {
        // Only the date of ends_at counts.
        let event = sample_event(at(2024, 3, 10, 0));
        assert!(!event.is_past(date(2024, 3, 10)));
        assert!(event.is_future(date(2024, 3, 10)));
    }

    #[test]
    fn test_event_ending_later_is_future() {
        let event = sample_event(at(2025, 1, 1, 12));
        assert!(event.is_future(date(2024, 3, 10)));
    }

    #[test]
    fn test_display_is_name() {
        let event = sample_event(at(2024, 3, 9, 23));
        assert_eq!(event.to_string(), "Hacky Hour");
    }

    #[test]
    fn test_new_event_valid() {
        let event = NewEvent::new("Study Group", at(2024, 5, 1, 10), at(2024, 5, 1, 12))
            .with_slug("study-group_2024")
            .with_image_url("https://example.org/img.png")
            .with_timezone("EST")
            .with_location("Toronto");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let event = NewEvent::new("   ", at(2024, 5, 1, 10), at(2024, 5, 1, 12));
        let err = event.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_name_too_long_rejected() {
        let event = NewEvent::new(
            "x".repeat(NAME_MAX_LEN + 1),
            at(2024, 5, 1, 10),
            at(2024, 5, 1, 12),
        );
        assert!(event.validate().is_err());

        let event = NewEvent::new("x".repeat(NAME_MAX_LEN), at(2024, 5, 1, 10), at(2024, 5, 1, 12));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_ends_before_start_rejected() {
        let event = NewEvent::new("Backwards", at(2024, 5, 2, 10), at(2024, 5, 1, 10));
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_zero_length_event_allowed() {
        let event = NewEvent::new("Instant", at(2024, 5, 1, 10), at(2024, 5, 1, 10));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_invalid_slug_rejected() {
        for slug in ["has space", "slash/slug", "ünïcode"] {
            let event = NewEvent::new("Slugged", at(2024, 5, 1, 10), at(2024, 5, 1, 12))
                .with_slug(slug);
            assert!(event.validate().is_err(), "slug {:?} should be rejected", slug);
        }

        let event = NewEvent::new("Slugged", at(2024, 5, 1, 10), at(2024, 5, 1, 12))
            .with_slug("a".repeat(SLUG_MAX_LEN + 1));
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_blank_slug_allowed() {
        let event = NewEvent::new("Unslugged", at(2024, 5, 1, 10), at(2024, 5, 1, 12))
            .with_slug("");
        assert!(event.validate().is_ok());
        assert!(is_valid_slug(""));
    }

    #[test]
    fn test_invalid_image_url_rejected() {
        for url in ["not a url", "mailto:someone@example.org", "javascript:alert(1)"] {
            let event = NewEvent::new("Pictured", at(2024, 5, 1, 10), at(2024, 5, 1, 12))
                .with_image_url(url);
            assert!(event.validate().is_err(), "url {:?} should be rejected", url);
        }
    }

    #[test]
    fn test_timezone_length_limited() {
        let event = NewEvent::new("Zoned", at(2024, 5, 1, 10), at(2024, 5, 1, 12))
            .with_timezone("America/Toronto");
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_new_event_requires_name_and_times() {
        let missing_name = r#"{"starts_at":"2024-05-01T10:00:00Z","ends_at":"2024-05-01T12:00:00Z"}"#;
        let missing_start = r#"{"name":"Meetup","ends_at":"2024-05-01T12:00:00Z"}"#;
        let missing_end = r#"{"name":"Meetup","starts_at":"2024-05-01T10:00:00Z"}"#;

        assert!(serde_json::from_str::<NewEvent>(missing_name).is_err());
        assert!(serde_json::from_str::<NewEvent>(missing_start).is_err());
        assert!(serde_json::from_str::<NewEvent>(missing_end).is_err());

        let complete = r#"{"name":"Meetup","starts_at":"2024-05-01T10:00:00Z","ends_at":"2024-05-01T12:00:00Z"}"#;
        let event: NewEvent = serde_json::from_str(complete).unwrap();
        assert_eq!(event.name, "Meetup");
        assert!(event.slug.is_none());
    }

    #[test]
    fn test_changes_merge_and_clear() {
        let current = sample_event(at(2024, 1, 1, 12));
        let changes = EventChanges {
            name: Some("Renamed".to_string()),
            slug: Some(None),
            location: Some(Some("Berlin".to_string())),
            ..Default::default()
        };

        let merged = changes.validate_against(&current).unwrap();
        assert_eq!(merged.name, "Renamed");
        assert_eq!(merged.slug, None);
        assert_eq!(merged.location.as_deref(), Some("Berlin"));
        assert_eq!(merged.timezone, current.timezone);
        assert_eq!(merged.date_created, current.date_created);
    }

    #[test]
    fn test_changes_validate_merged_range() {
        let current = sample_event(at(2024, 1, 1, 12));
        let changes = EventChanges {
            ends_at: Some(at(2023, 12, 31, 12)),
            ..Default::default()
        };
        assert!(changes.validate_against(&current).is_err());
        assert!(EventChanges::default().is_empty());
        assert!(!changes.is_empty());
    }
}

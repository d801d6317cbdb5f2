use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use crate::models::Event;
use crate::utils::error::AppResult;

pub(crate) const EVENT_COLUMNS: &str = "id, name, image_url, description, short_description, \
     slug, date_created, date_updated, starts_at, ends_at, timezone, location, schedule, \
     additional_notes";

/// `EVENT_COLUMNS` qualified with the `e` alias, for joins.
pub(crate) const PREFIXED_EVENT_COLUMNS: &str = "e.id, e.name, e.image_url, e.description, \
     e.short_description, e.slug, e.date_created, e.date_updated, e.starts_at, e.ends_at, \
     e.timezone, e.location, e.schedule, e.additional_notes";

/// The current date used for past/future classification.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// A single predicate over events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// `ends_at` falls on a day strictly before the given date.
    EndedBefore(NaiveDate),
    /// `ends_at` falls on the given date or later.
    EndsOnOrAfter(NaiveDate),
    /// Exact, case-sensitive slug match.
    Slug(String),
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::EndedBefore(day) => event.is_past(*day),
            EventFilter::EndsOnOrAfter(day) => event.is_future(*day),
            EventFilter::Slug(slug) => event.slug.as_deref() == Some(slug.as_str()),
        }
    }

    fn push_sql(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        match self {
            EventFilter::EndedBefore(day) => {
                qb.push("(ends_at AT TIME ZONE 'UTC')::date < ").push_bind(*day);
            }
            EventFilter::EndsOnOrAfter(day) => {
                qb.push("(ends_at AT TIME ZONE 'UTC')::date >= ").push_bind(*day);
            }
            EventFilter::Slug(slug) => {
                qb.push("slug = ").push_bind(slug.clone());
            }
        }
    }
}

/// Composable filter over the `events` table. Filters are combined with AND.
///
/// ```ignore
/// let upcoming = EventQuery::new().future().slug("hacky-hour").fetch_all(&pool).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    filters: Vec<EventFilter>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Events that ended before today. `today` is read when this is called.
    pub fn past(self) -> Self {
        self.past_as_of(today())
    }

    /// Events ending today or later. `today` is read when this is called.
    pub fn future(self) -> Self {
        self.future_as_of(today())
    }

    pub fn past_as_of(self, day: NaiveDate) -> Self {
        self.filter(EventFilter::EndedBefore(day))
    }

    pub fn future_as_of(self, day: NaiveDate) -> Self {
        self.filter(EventFilter::EndsOnOrAfter(day))
    }

    pub fn slug(self, slug: impl Into<String>) -> Self {
        self.filter(EventFilter::Slug(slug.into()))
    }

    pub fn filters(&self) -> &[EventFilter] {
        &self.filters
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().all(|f| f.matches(event))
    }

    fn builder(&self, select: &str) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(select);
        qb.push(" FROM events");
        for (i, filter) in self.filters.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            filter.push_sql(&mut qb);
        }
        qb
    }

    pub(crate) fn select_builder(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = self.builder(&format!("SELECT {}", EVENT_COLUMNS));
        qb.push(" ORDER BY starts_at ASC, id ASC");
        qb
    }

    pub(crate) fn latest_builder(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = self.builder(&format!("SELECT {}", EVENT_COLUMNS));
        qb.push(" ORDER BY date_created DESC, id DESC LIMIT 1");
        qb
    }

    pub(crate) fn count_builder(&self) -> QueryBuilder<'static, Postgres> {
        self.builder("SELECT COUNT(*)")
    }

    #[instrument(skip(pool))]
    pub async fn fetch_all(&self, pool: &PgPool) -> AppResult<Vec<Event>> {
        let mut qb = self.select_builder();
        debug!(sql = qb.sql(), "Fetching events");
        let events = qb.build_query_as::<Event>().fetch_all(pool).await?;
        Ok(events)
    }

    /// First matching event in the default ordering, if any.
    #[instrument(skip(pool))]
    pub async fn fetch_optional(&self, pool: &PgPool) -> AppResult<Option<Event>> {
        let mut qb = self.select_builder();
        let event = qb.build_query_as::<Event>().fetch_optional(pool).await?;
        Ok(event)
    }

    /// The matching event with the most recent `date_created`.
    #[instrument(skip(pool))]
    pub async fn latest(&self, pool: &PgPool) -> AppResult<Option<Event>> {
        let mut qb = self.latest_builder();
        let event = qb.build_query_as::<Event>().fetch_optional(pool).await?;
        Ok(event)
    }

    #[instrument(skip(pool))]
    pub async fn count(&self, pool: &PgPool) -> AppResult<i64> {
        let mut qb = self.count_builder();
        let count = qb.build_query_scalar::<i64>().fetch_one(pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use uuid::Uuid;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(slug: Option<&str>, ends_at: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: "Mozilla Science Meetup".to_string(),
            image_url: None,
            description: None,
            short_description: None,
            slug: slug.map(str::to_string),
            date_created: at(2024, 1, 1, 0),
            date_updated: at(2024, 1, 1, 0),
            starts_at: at(2024, 1, 1, 0),
            ends_at,
            timezone: None,
            location: None,
            schedule: None,
            additional_notes: None,
        }
    }

    #[test]
    fn test_past_and_future_are_disjoint() {
        let day = date(2024, 6, 15);
        let events = [
            event(None, at(2024, 6, 14, 23)),
            event(None, at(2024, 6, 15, 0)),
            event(None, at(2024, 6, 15, 23)),
            event(None, at(2024, 6, 16, 1)),
        ];

        let past = EventQuery::new().past_as_of(day);
        let future = EventQuery::new().future_as_of(day);

        let past_hits: Vec<bool> = events.iter().map(|e| past.matches(e)).collect();
        let future_hits: Vec<bool> = events.iter().map(|e| future.matches(e)).collect();

        assert_eq!(past_hits, vec![true, false, false, false]);
        assert_eq!(future_hits, vec![false, true, true, true]);
    }

    #[test]
    fn test_slug_is_exact_and_case_sensitive() {
        let query = EventQuery::new().slug("open-science");
        assert!(query.matches(&event(Some("open-science"), at(2024, 1, 2, 0))));
        assert!(!query.matches(&event(Some("Open-Science"), at(2024, 1, 2, 0))));
        assert!(!query.matches(&event(Some("open-science-2"), at(2024, 1, 2, 0))));
        assert!(!query.matches(&event(None, at(2024, 1, 2, 0))));
    }

    #[test]
    fn test_filters_compose_with_and() {
        let day = date(2024, 6, 15);
        let query = EventQuery::new().future_as_of(day).slug("sprint");
        assert_eq!(query.filters().len(), 2);
        assert!(query.matches(&event(Some("sprint"), at(2024, 7, 1, 0))));
        assert!(!query.matches(&event(Some("sprint"), at(2024, 6, 1, 0))));
        assert!(!query.matches(&event(Some("other"), at(2024, 7, 1, 0))));
    }

    #[test]
    fn test_unfiltered_query_matches_everything() {
        assert!(EventQuery::new().matches(&event(None, at(2020, 1, 1, 0))));
    }

    #[test]
    fn test_select_sql_shape() {
        let query = EventQuery::new().past_as_of(date(2024, 6, 15)).slug("sprint");
        let qb = query.select_builder();
        assert_eq!(
            qb.sql(),
            format!(
                "SELECT {} FROM events WHERE (ends_at AT TIME ZONE 'UTC')::date < $1 \
                 AND slug = $2 ORDER BY starts_at ASC, id ASC",
                EVENT_COLUMNS
            )
        );
    }

    #[test]
    fn test_future_and_count_sql_shape() {
        let query = EventQuery::new().future_as_of(date(2024, 6, 15));
        assert_eq!(
            query.count_builder().sql(),
            "SELECT COUNT(*) FROM events WHERE (ends_at AT TIME ZONE 'UTC')::date >= $1"
        );
        assert!(query
            .latest_builder()
            .sql()
            .ends_with("ORDER BY date_created DESC, id DESC LIMIT 1"));
        assert_eq!(EventQuery::new().count_builder().sql(), "SELECT COUNT(*) FROM events");
    }

    #[test]
    fn test_prefixed_columns_match_event_columns() {
        let plain: Vec<&str> = EVENT_COLUMNS.split(", ").collect();
        let prefixed: Vec<String> = PREFIXED_EVENT_COLUMNS
            .split(", ")
            .map(|c| c.trim_start_matches("e.").to_string())
            .collect();
        assert_eq!(plain, prefixed);
    }

    #[test]
    fn test_past_uses_current_date() {
        let query = EventQuery::new().past();
        assert_eq!(query.filters(), &[EventFilter::EndedBefore(today())]);
    }
}

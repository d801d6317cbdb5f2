use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{Event, EventChanges, NewEvent, Project, User};
use crate::repository::query::{EventQuery, EVENT_COLUMNS, PREFIXED_EVENT_COLUMNS};
use crate::utils::error::{AppError, AppResult};

/// The three many-to-many relations an event owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRelation {
    Attendees,
    Facilitators,
    Projects,
}

impl EventRelation {
    fn table(self) -> &'static str {
        match self {
            EventRelation::Attendees => "event_attendees",
            EventRelation::Facilitators => "event_facilitators",
            EventRelation::Projects => "event_projects",
        }
    }

    fn member_column(self) -> &'static str {
        match self {
            EventRelation::Attendees | EventRelation::Facilitators => "user_id",
            EventRelation::Projects => "project_id",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new event. `date_created` and `date_updated` are both stamped
    /// with the insertion time.
    #[instrument(skip(self, new_event), fields(name = %new_event.name))]
    pub async fn create(&self, new_event: NewEvent) -> AppResult<Event> {
        new_event.validate()?;
        let now = Utc::now();

        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (
                name, image_url, description, short_description, slug,
                date_created, date_updated, starts_at, ends_at,
                timezone, location, schedule, additional_notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(&new_event.name)
        .bind(&new_event.image_url)
        .bind(&new_event.description)
        .bind(&new_event.short_description)
        .bind(&new_event.slug)
        .bind(now)
        .bind(new_event.starts_at)
        .bind(new_event.ends_at)
        .bind(&new_event.timezone)
        .bind(&new_event.location)
        .bind(&new_event.schedule)
        .bind(&new_event.additional_notes)
        .fetch_one(&self.pool)
        .await?;

        info!(event_id = %event.id, "Event created");
        Ok(event)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> AppResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    pub async fn find(&self, id: Uuid) -> AppResult<Event> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", id)))
    }

    /// Apply `changes` to the event. `date_updated` is refreshed even when
    /// the change set is empty; `date_created` is never written.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: Uuid, changes: EventChanges) -> AppResult<Event> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE id = $1 FOR UPDATE",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", id)))?;

        let merged = changes.validate_against(&current)?;
        let now = next_update_stamp(current.date_updated);

        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET
                name = $2,
                image_url = $3,
                description = $4,
                short_description = $5,
                slug = $6,
                starts_at = $7,
                ends_at = $8,
                timezone = $9,
                location = $10,
                schedule = $11,
                additional_notes = $12,
                date_updated = $13
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(&merged.name)
        .bind(&merged.image_url)
        .bind(&merged.description)
        .bind(&merged.short_description)
        .bind(&merged.slug)
        .bind(merged.starts_at)
        .bind(merged.ends_at)
        .bind(&merged.timezone)
        .bind(&merged.location)
        .bind(&merged.schedule)
        .bind(&merged.additional_notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(event)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Event with id '{}' was not found",
                id
            )));
        }

        info!(event_id = %id, "Event deleted");
        Ok(())
    }

    pub async fn query(&self, query: &EventQuery) -> AppResult<Vec<Event>> {
        query.fetch_all(&self.pool).await
    }

    pub async fn all(&self) -> AppResult<Vec<Event>> {
        EventQuery::new().fetch_all(&self.pool).await
    }

    pub async fn past(&self) -> AppResult<Vec<Event>> {
        EventQuery::new().past().fetch_all(&self.pool).await
    }

    pub async fn future(&self) -> AppResult<Vec<Event>> {
        EventQuery::new().future().fetch_all(&self.pool).await
    }

    pub async fn slug(&self, slug: &str) -> AppResult<Vec<Event>> {
        EventQuery::new().slug(slug).fetch_all(&self.pool).await
    }

    /// Most recently created event.
    pub async fn latest(&self) -> AppResult<Option<Event>> {
        EventQuery::new().latest(&self.pool).await
    }

    pub async fn add_attendee(&self, event_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.link(EventRelation::Attendees, event_id, user_id).await
    }

    pub async fn remove_attendee(&self, event_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.unlink(EventRelation::Attendees, event_id, user_id).await
    }

    pub async fn attendees(&self, event_id: Uuid) -> AppResult<Vec<User>> {
        self.related_users(EventRelation::Attendees, event_id).await
    }

    pub async fn add_facilitator(&self, event_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.link(EventRelation::Facilitators, event_id, user_id).await
    }

    pub async fn remove_facilitator(&self, event_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.unlink(EventRelation::Facilitators, event_id, user_id).await
    }

    pub async fn facilitators(&self, event_id: Uuid) -> AppResult<Vec<User>> {
        self.related_users(EventRelation::Facilitators, event_id).await
    }

    pub async fn add_project(&self, event_id: Uuid, project_id: Uuid) -> AppResult<()> {
        self.link(EventRelation::Projects, event_id, project_id).await
    }

    pub async fn remove_project(&self, event_id: Uuid, project_id: Uuid) -> AppResult<()> {
        self.unlink(EventRelation::Projects, event_id, project_id).await
    }

    #[instrument(skip(self))]
    pub async fn projects(&self, event_id: Uuid) -> AppResult<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT p.id, p.name, p.slug, p.created_at, p.updated_at
            FROM projects p
            JOIN event_projects ep ON ep.project_id = p.id
            WHERE ep.event_id = $1
            ORDER BY p.name ASC, p.id ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    /// Events the user attends.
    pub async fn events_attended(&self, user_id: Uuid) -> AppResult<Vec<Event>> {
        self.events_for_member(EventRelation::Attendees, user_id).await
    }

    /// Events the user facilitates.
    pub async fn events_facilitated(&self, user_id: Uuid) -> AppResult<Vec<Event>> {
        self.events_for_member(EventRelation::Facilitators, user_id).await
    }

    /// Events associated with the project.
    pub async fn project_events(&self, project_id: Uuid) -> AppResult<Vec<Event>> {
        self.events_for_member(EventRelation::Projects, project_id).await
    }

    /// Adds a member to a relation. Re-adding an existing member is a no-op,
    /// but the event's `date_updated` is still refreshed.
    #[instrument(skip(self))]
    async fn link(
        &self,
        relation: EventRelation,
        event_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        touch(&mut tx, event_id).await?;

        sqlx::query(&format!(
            "INSERT INTO {} (event_id, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            relation.table(),
            relation.member_column()
        ))
        .bind(event_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unlink(
        &self,
        relation: EventRelation,
        event_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        touch(&mut tx, event_id).await?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE event_id = $1 AND {} = $2",
            relation.table(),
            relation.member_column()
        ))
        .bind(event_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn related_users(
        &self,
        relation: EventRelation,
        event_id: Uuid,
    ) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT u.id, u.username, u.name, u.created_at, u.updated_at
            FROM users u
            JOIN {} r ON r.user_id = u.id
            WHERE r.event_id = $1
            ORDER BY u.username ASC
            "#,
            relation.table()
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    #[instrument(skip(self))]
    async fn events_for_member(
        &self,
        relation: EventRelation,
        member_id: Uuid,
    ) -> AppResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {}
            FROM events e
            JOIN {} r ON r.event_id = e.id
            WHERE r.{} = $1
            ORDER BY e.starts_at ASC, e.id ASC
            "#,
            PREFIXED_EVENT_COLUMNS,
            relation.table(),
            relation.member_column()
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

/// Refresh `date_updated`, failing with NotFound when the event is gone.
async fn touch(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event_id: Uuid) -> AppResult<()> {
    let current: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT date_updated FROM events WHERE id = $1 FOR UPDATE")
            .bind(event_id)
            .fetch_optional(&mut **tx)
            .await?;

    let Some(current) = current else {
        return Err(AppError::NotFound(format!(
            "Event with id '{}' was not found",
            event_id
        )));
    };

    sqlx::query("UPDATE events SET date_updated = $2 WHERE id = $1")
        .bind(event_id)
        .bind(next_update_stamp(current))
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// `date_updated` for a new write. Postgres stores microseconds, so a write
/// landing in the same microsecond as the previous one is bumped forward to
/// keep each update observable.
fn next_update_stamp(previous: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    let now = Utc::now();
    let floor = previous + chrono::Duration::microseconds(1);
    if now < floor {
        floor
    } else {
        now
    }
}

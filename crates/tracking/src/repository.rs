//! Tracking persistence
//!
//! [`PostgresTrackingRepository`] is the production store;
//! [`InMemoryTrackingRepository`] backs tests and database-less runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::models::{Fix, LastPoint, Session, SessionStatus, TotalsDelta, TrackPoint};

/// Storage operations used by the aggregator
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<Session>;

    /// Most recently recorded point of a session
    async fn last_point(&self, session_id: &str) -> Result<Option<LastPoint>>;

    /// Insert a point and add `delta` to the session totals atomically
    ///
    /// Returns `None` without writing anything when the session does not
    /// exist or is no longer active.
    async fn record_point(
        &self,
        session_id: &str,
        fix: &Fix,
        delta: TotalsDelta,
    ) -> Result<Option<TrackPoint>>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Mark an active session ended; `None` if missing or already ended
    async fn end_session(&self, session_id: &str, ended_at: DateTime<Utc>)
        -> Result<Option<Session>>;

    async fn count_points(&self, session_id: &str) -> Result<i64>;

    /// All points, ascending by recorded time
    async fn list_points(&self, session_id: &str) -> Result<Vec<TrackPoint>>;
}

const SESSION_COLUMNS: &str = "id, trip_id, user_id, started_at, ended_at, \
     total_distance_m, total_elevation_gain_m, status";

const POINT_COLUMNS: &str = "id, session_id, latitude, longitude, elevation_m, \
     recorded_at, speed_mps, created_at";

/// PostgreSQL implementation of TrackingRepository
pub struct PostgresTrackingRepository {
    pool: PgPool,
}

impl PostgresTrackingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("Failed to run tracking migrations")?;
        Ok(())
    }

    fn session_from_row(row: &PgRow) -> Result<Session> {
        let status: String = row.try_get("status")?;
        let status = SessionStatus::parse(&status)
            .with_context(|| format!("Unknown session status: {}", status))?;

        Ok(Session {
            id: row.try_get("id")?,
            trip_id: row.try_get("trip_id")?,
            user_id: row.try_get("user_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            total_distance_m: row.try_get("total_distance_m")?,
            total_elevation_gain_m: row.try_get("total_elevation_gain_m")?,
            status,
        })
    }

    fn point_from_row(row: &PgRow) -> Result<TrackPoint> {
        Ok(TrackPoint {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            lat: row.try_get("latitude")?,
            lng: row.try_get("longitude")?,
            elevation_m: row.try_get("elevation_m")?,
            recorded_at: row.try_get("recorded_at")?,
            speed_mps: row.try_get("speed_mps")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TrackingRepository for PostgresTrackingRepository {
    async fn create_session(&self, session: &Session) -> Result<Session> {
        let query = format!(
            r#"
            INSERT INTO track_sessions (id, trip_id, user_id, started_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(&session.id)
            .bind(&session.trip_id)
            .bind(&session.user_id)
            .bind(session.started_at)
            .bind(session.status.as_str())
            .fetch_one(&self.pool)
            .await
            .context("Failed to create tracking session")?;

        Self::session_from_row(&row)
    }

    async fn last_point(&self, session_id: &str) -> Result<Option<LastPoint>> {
        let row = sqlx::query(
            r#"
            SELECT latitude, longitude, elevation_m
            FROM track_points
            WHERE session_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load last track point")?;

        row.map(|row| -> Result<LastPoint> {
            Ok(LastPoint {
                lat: row.try_get("latitude")?,
                lng: row.try_get("longitude")?,
                elevation_m: row.try_get("elevation_m")?,
            })
        })
        .transpose()
    }

    async fn record_point(
        &self,
        session_id: &str,
        fix: &Fix,
        delta: TotalsDelta,
    ) -> Result<Option<TrackPoint>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        // Locks the session row until commit, so an end_session racing with
        // this insert is applied strictly before or after it.
        let updated = sqlx::query(
            r#"
            UPDATE track_sessions
            SET total_distance_m = total_distance_m + $2,
                total_elevation_gain_m = total_elevation_gain_m + $3
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(session_id)
        .bind(delta.distance_m)
        .bind(delta.elevation_gain_m)
        .execute(&mut *tx)
        .await
        .context("Failed to update session totals")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.context("Failed to roll back transaction")?;
            return Ok(None);
        }

        let query = format!(
            r#"
            INSERT INTO track_points (session_id, latitude, longitude, elevation_m, recorded_at, speed_mps)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            POINT_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(session_id)
            .bind(fix.lat)
            .bind(fix.lng)
            .bind(fix.elevation_m)
            .bind(fix.recorded_at.unwrap_or_else(Utc::now))
            .bind(fix.speed_mps)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to insert track point")?;

        let point = Self::point_from_row(&row)?;

        tx.commit().await.context("Failed to commit track point")?;

        Ok(Some(point))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {} FROM track_sessions WHERE id = $1", SESSION_COLUMNS);

        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load tracking session")?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn end_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let query = format!(
            r#"
            UPDATE track_sessions
            SET status = 'ended', ended_at = $2
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(session_id)
            .bind(ended_at)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to end tracking session")?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn count_points(&self, session_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM track_points WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count track points")?;

        Ok(count)
    }

    async fn list_points(&self, session_id: &str) -> Result<Vec<TrackPoint>> {
        let query = format!(
            "SELECT {} FROM track_points WHERE session_id = $1 ORDER BY recorded_at ASC, id ASC",
            POINT_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list track points")?;

        rows.iter().map(Self::point_from_row).collect()
    }
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, Session>,
    points: HashMap<String, Vec<TrackPoint>>,
    next_point_id: i64,
}

/// In-memory implementation of TrackingRepository
///
/// Every operation runs under one lock, which gives `record_point` the same
/// all-or-nothing behavior as the database transaction.
#[derive(Default)]
pub struct InMemoryTrackingRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryTrackingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingRepository for InMemoryTrackingRepository {
    async fn create_session(&self, session: &Session) -> Result<Session> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(&session.id) {
            anyhow::bail!("Session {} already exists", session.id);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn last_point(&self, session_id: &str) -> Result<Option<LastPoint>> {
        let state = self.state.lock();
        let last = state.points.get(session_id).and_then(|points| {
            points
                .iter()
                .max_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)))
        });

        Ok(last.map(|p| LastPoint {
            lat: p.lat,
            lng: p.lng,
            elevation_m: p.elevation_m,
        }))
    }

    async fn record_point(
        &self,
        session_id: &str,
        fix: &Fix,
        delta: TotalsDelta,
    ) -> Result<Option<TrackPoint>> {
        let mut state = self.state.lock();

        match state.sessions.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::Active => {
                session.total_distance_m += delta.distance_m;
                session.total_elevation_gain_m += delta.elevation_gain_m;
            }
            _ => return Ok(None),
        }

        state.next_point_id += 1;
        let now = Utc::now();
        let point = TrackPoint {
            id: state.next_point_id,
            session_id: session_id.to_string(),
            lat: fix.lat,
            lng: fix.lng,
            elevation_m: fix.elevation_m,
            recorded_at: fix.recorded_at.unwrap_or(now),
            speed_mps: fix.speed_mps,
            created_at: now,
        };

        state
            .points
            .entry(session_id.to_string())
            .or_default()
            .push(point.clone());

        Ok(Some(point))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.state.lock().sessions.get(session_id).cloned())
    }

    async fn end_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mut state = self.state.lock();
        match state.sessions.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::Active => {
                session.status = SessionStatus::Ended;
                session.ended_at = Some(ended_at);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count_points(&self, session_id: &str) -> Result<i64> {
        let state = self.state.lock();
        Ok(state.points.get(session_id).map(|p| p.len() as i64).unwrap_or(0))
    }

    async fn list_points(&self, session_id: &str) -> Result<Vec<TrackPoint>> {
        let state = self.state.lock();
        let mut points = state.points.get(session_id).cloned().unwrap_or_default();
        points.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)));
        Ok(points)
    }
}

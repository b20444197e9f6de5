//! Session lifecycle and incremental point aggregation
//!
//! Each ingested fix is compared against the session's most recently
//! recorded point; the great-circle distance and the positive elevation
//! change are added to the session totals in the same storage transaction
//! that inserts the point. The persisted point is then pushed to live
//! subscribers through the broadcast hub.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, TrackingError};
use crate::geo::haversine_m;
use crate::models::{
    Fix, LastPoint, Session, SessionStatus, StartSessionRequest, Summary, TotalsDelta, TrackPoint,
};
use crate::repository::TrackingRepository;
use crate::stream::BroadcastHub;

/// Totals increment between the previous point and a new fix
pub fn totals_delta(prev: &LastPoint, fix: &Fix) -> TotalsDelta {
    TotalsDelta {
        distance_m: haversine_m(prev.lat, prev.lng, fix.lat, fix.lng),
        elevation_gain_m: (fix.elevation_m - prev.elevation_m).max(0.0),
    }
}

type WriterLocks = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Per-session writer lock handle
///
/// Removes the session's map entry on drop once no other ingest holds it,
/// including when the owning future is cancelled mid-ingest.
struct WriterLease<'a> {
    // declared first so it is released before `_cleanup` runs
    lock: Arc<tokio::sync::Mutex<()>>,
    _cleanup: LeaseCleanup<'a>,
}

struct LeaseCleanup<'a> {
    writers: &'a WriterLocks,
    session_id: &'a str,
}

impl<'a> WriterLease<'a> {
    fn acquire(writers: &'a WriterLocks, session_id: &'a str) -> Self {
        let lock = writers.entry(session_id.to_string()).or_default().clone();
        Self {
            lock,
            _cleanup: LeaseCleanup {
                writers,
                session_id,
            },
        }
    }
}

impl Drop for LeaseCleanup<'_> {
    fn drop(&mut self) {
        self.writers
            .remove_if(self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Tracking session service
pub struct TrackingAggregator {
    repository: Arc<dyn TrackingRepository>,
    hub: Option<Arc<BroadcastHub>>,
    // one writer per session at a time, so each delta is computed against
    // the point the previous ingest actually stored
    writers: WriterLocks,
}

impl TrackingAggregator {
    pub fn new(repository: Arc<dyn TrackingRepository>, hub: Option<Arc<BroadcastHub>>) -> Self {
        Self {
            repository,
            hub,
            writers: DashMap::new(),
        }
    }

    /// Create an active session
    pub async fn start_session(&self, request: StartSessionRequest) -> Result<Session> {
        request.validate()?;

        let session = Session {
            id: Uuid::new_v4().to_string(),
            trip_id: request.trip_id,
            user_id: request.user_id,
            started_at: request.started_at.unwrap_or_else(Utc::now),
            ended_at: None,
            total_distance_m: 0.0,
            total_elevation_gain_m: 0.0,
            status: SessionStatus::Active,
        };

        let session = self.repository.create_session(&session).await?;

        tracing::info!(
            session_id = %session.id,
            trip_id = %session.trip_id,
            user_id = %session.user_id,
            "Tracking session started"
        );

        Ok(session)
    }

    /// Persist a fix, update totals and push it to live subscribers
    pub async fn add_point(&self, session_id: &str, mut fix: Fix) -> Result<TrackPoint> {
        fix.validate()?;
        fix.recorded_at.get_or_insert_with(Utc::now);

        let lease = WriterLease::acquire(&self.writers, session_id);
        let _guard = lease.lock.lock().await;

        let point = self.ingest(session_id, &fix).await?;
        // still under the writer lock, so live order matches storage order
        self.publish(&point).await;

        Ok(point)
    }

    async fn ingest(&self, session_id: &str, fix: &Fix) -> Result<TrackPoint> {
        let previous = self.repository.last_point(session_id).await?;
        let delta = previous
            .map(|prev| totals_delta(&prev, fix))
            .unwrap_or_default();

        match self.repository.record_point(session_id, fix, delta).await? {
            Some(point) => {
                tracing::debug!(
                    session_id,
                    point_id = point.id,
                    distance_delta_m = delta.distance_m,
                    elevation_delta_m = delta.elevation_gain_m,
                    "Recorded track point"
                );
                Ok(point)
            }
            None => Err(self.inactive_error(session_id).await),
        }
    }

    async fn publish(&self, point: &TrackPoint) {
        let Some(hub) = &self.hub else {
            return;
        };

        match serde_json::to_vec(point) {
            Ok(payload) => hub.broadcast(&point.session_id, payload).await,
            Err(e) => tracing::warn!(
                session_id = %point.session_id,
                error = %e,
                "Failed to serialize live update"
            ),
        }
    }

    /// Close a session; ending twice is rejected
    pub async fn end_session(&self, session_id: &str) -> Result<Session> {
        match self.repository.end_session(session_id, Utc::now()).await? {
            Some(session) => {
                tracing::info!(
                    session_id,
                    total_distance_m = session.total_distance_m,
                    "Tracking session ended"
                );
                Ok(session)
            }
            None => Err(self.inactive_error(session_id).await),
        }
    }

    pub async fn summary(&self, session_id: &str) -> Result<Summary> {
        let session = self.require_session(session_id).await?;
        let point_count = self.repository.count_points(session_id).await?;

        let end = session.ended_at.unwrap_or_else(Utc::now);
        let duration = (end - session.started_at).max(Duration::zero());
        let seconds = duration.num_milliseconds() as f64 / 1000.0;

        let average_speed_mps = if seconds > 0.0 {
            session.total_distance_m / seconds
        } else {
            0.0
        };

        Ok(Summary {
            session_id: session.id,
            point_count,
            distance_m: session.total_distance_m,
            elevation_gain_m: session.total_elevation_gain_m,
            duration_sec: duration.num_seconds(),
            average_speed_mps,
        })
    }

    /// All points of a session, ascending by recorded time
    pub async fn points(&self, session_id: &str) -> Result<Vec<TrackPoint>> {
        self.require_session(session_id).await?;
        Ok(self.repository.list_points(session_id).await?)
    }

    async fn require_session(&self, session_id: &str) -> Result<Session> {
        self.repository
            .get_session(session_id)
            .await?
            .ok_or_else(|| TrackingError::NotFound(session_id.to_string()))
    }

    /// Explain why a write against `session_id` was refused
    async fn inactive_error(&self, session_id: &str) -> TrackingError {
        match self.repository.get_session(session_id).await {
            Ok(Some(_)) => TrackingError::SessionEnded(session_id.to_string()),
            Ok(None) => TrackingError::NotFound(session_id.to_string()),
            Err(e) => TrackingError::Persistence(e),
        }
    }
}

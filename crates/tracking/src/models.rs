//! Tracking session and point models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use summithub_core::validation::{
    validate_finite, validate_latitude, validate_longitude, validate_non_negative,
    validate_required,
};
use summithub_core::SummitHubError;

/// Session lifecycle state; `Ended` is terminal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

/// A live tracking session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub trip_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub total_distance_m: f64,
    pub total_elevation_gain_m: f64,
    pub status: SessionStatus,
}

/// A persisted GPS fix
///
/// This is also the exact JSON pushed to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub id: i64,
    pub session_id: String,
    pub lat: f64,
    pub lng: f64,
    pub elevation_m: f64,
    pub recorded_at: DateTime<Utc>,
    pub speed_mps: f64,
    pub created_at: DateTime<Utc>,
}

/// An incoming GPS fix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub elevation_m: f64,
    /// Defaults to the ingestion time
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub speed_mps: f64,
}

impl Fix {
    pub fn new(lat: f64, lng: f64, elevation_m: f64) -> Self {
        Self {
            lat,
            lng,
            elevation_m,
            recorded_at: None,
            speed_mps: 0.0,
        }
    }

    pub fn recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    pub fn speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = speed_mps;
        self
    }

    pub fn validate(&self) -> Result<(), SummitHubError> {
        validate_latitude(self.lat)?;
        validate_longitude(self.lng)?;
        validate_finite(self.elevation_m, "elevation_m")?;
        validate_finite(self.speed_mps, "speed_mps")?;
        validate_non_negative(self.speed_mps, "speed_mps")?;
        Ok(())
    }
}

/// Position of the most recent point of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastPoint {
    pub lat: f64,
    pub lng: f64,
    pub elevation_m: f64,
}

/// Increments applied to session totals together with a point insert
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TotalsDelta {
    pub distance_m: f64,
    pub elevation_gain_m: f64,
}

/// Request body for starting a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default)]
    pub trip_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl StartSessionRequest {
    pub fn new(trip_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            user_id: user_id.into(),
            started_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), SummitHubError> {
        validate_required(&self.trip_id, "trip_id")?;
        validate_required(&self.user_id, "user_id")?;
        Ok(())
    }
}

/// Derived session statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub session_id: String,
    pub point_count: i64,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub duration_sec: i64,
    pub average_speed_mps: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_defaults_from_json() {
        let fix: Fix = serde_json::from_str(r#"{"lat": -6.2, "lng": 106.8}"#).unwrap();
        assert_eq!(fix.elevation_m, 0.0);
        assert_eq!(fix.speed_mps, 0.0);
        assert!(fix.recorded_at.is_none());
    }

    #[test]
    fn test_fix_validation() {
        assert!(Fix::new(0.0, 0.0, 0.0).validate().is_ok());
        assert!(Fix::new(90.0, -180.0, 8848.0).validate().is_ok());

        let err = Fix::new(91.0, 0.0, 0.0).validate().unwrap_err();
        assert_eq!(err.field(), Some("lat"));

        let err = Fix::new(0.0, 180.5, 0.0).validate().unwrap_err();
        assert_eq!(err.field(), Some("lng"));

        let err = Fix::new(0.0, 0.0, f64::NAN).validate().unwrap_err();
        assert_eq!(err.field(), Some("elevation_m"));

        let err = Fix::new(0.0, 0.0, 0.0).speed(-1.0).validate().unwrap_err();
        assert_eq!(err.field(), Some("speed_mps"));
    }

    #[test]
    fn test_start_request_requires_ids() {
        assert!(StartSessionRequest::new("trip-1", "user-1").validate().is_ok());
        assert_eq!(
            StartSessionRequest::new("", "user-1").validate().unwrap_err().field(),
            Some("trip_id")
        );
        assert_eq!(
            StartSessionRequest::new("trip-1", " ").validate().unwrap_err().field(),
            Some("user_id")
        );
    }

    #[test]
    fn test_session_status_serialization() {
        assert_eq!(serde_json::to_string(&SessionStatus::Active).unwrap(), "\"active\"");
        assert_eq!(SessionStatus::parse("ended"), Some(SessionStatus::Ended));
        assert_eq!(SessionStatus::parse("paused"), None);
    }
}

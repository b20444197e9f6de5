//! Input validation helpers

use crate::error::SummitHubError;

/// Reject empty or whitespace-only identifiers
pub fn validate_required(value: &str, field: &str) -> Result<(), SummitHubError> {
    if value.trim().is_empty() {
        return Err(SummitHubError::validation_field("is required", field));
    }
    Ok(())
}

/// Reject NaN and infinities
pub fn validate_finite(value: f64, field: &str) -> Result<(), SummitHubError> {
    if !value.is_finite() {
        return Err(SummitHubError::validation_field("must be a finite number", field));
    }
    Ok(())
}

/// Latitude in decimal degrees, [-90, 90]
///
/// ```
/// use summithub_core::validation::validate_latitude;
///
/// assert!(validate_latitude(-6.2).is_ok());
/// assert!(validate_latitude(91.0).is_err());
/// ```
pub fn validate_latitude(lat: f64) -> Result<(), SummitHubError> {
    validate_finite(lat, "lat")?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(SummitHubError::validation_field(
            "must be between -90 and 90",
            "lat",
        ));
    }
    Ok(())
}

/// Longitude in decimal degrees, [-180, 180]
pub fn validate_longitude(lng: f64) -> Result<(), SummitHubError> {
    validate_finite(lng, "lng")?;
    if !(-180.0..=180.0).contains(&lng) {
        return Err(SummitHubError::validation_field(
            "must be between -180 and 180",
            "lng",
        ));
    }
    Ok(())
}

/// Finite and not negative
pub fn validate_non_negative(value: f64, field: &str) -> Result<(), SummitHubError> {
    validate_finite(value, field)?;
    if value < 0.0 {
        return Err(SummitHubError::validation_field("must not be negative", field));
    }
    Ok(())
}

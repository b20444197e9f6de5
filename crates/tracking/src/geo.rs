//! Great-circle distance on a spherical Earth

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points given in decimal degrees, in kilometers
///
/// ```
/// use summithub_tracking::geo::haversine_km;
///
/// assert_eq!(haversine_km(-6.2, 106.8, -6.2, 106.8), 0.0);
/// ```
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // clamp: rounding can push `a` a hair above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Haversine distance in meters
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_km(lat1, lng1, lat2, lng2) * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jakarta_to_bandung() {
        let d = haversine_km(-6.2, 106.816, -6.9175, 107.6191);
        assert!(d > 100.0 && d < 140.0, "unexpected distance: {}", d);
    }

    #[test]
    fn test_symmetric() {
        let ab = haversine_km(-6.2, 106.8, -6.1, 106.9);
        let ba = haversine_km(-6.1, 106.9, -6.2, 106.8);
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn test_identical_points_are_zero() {
        assert_eq!(haversine_km(0.0, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(haversine_km(45.5, -122.6, 45.5, -122.6), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // pi * R / 180
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.194_926_6).abs() < 1e-3);
    }

    #[test]
    fn test_antipodal_points() {
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn test_meters_scale() {
        let km = haversine_km(-6.2, 106.8, -6.1, 106.9);
        assert!((haversine_m(-6.2, 106.8, -6.1, 106.9) - km * 1000.0).abs() < 1e-9);
    }
}

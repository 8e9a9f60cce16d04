//! WGS-84 conversions between ECEF and geodetic coordinates.

use serde::{Deserialize, Serialize};

/// Semi-major axis, metres.
pub const WGS84_A: f64 = 6_378_137.0;
/// Flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// Fixed iteration count for the latitude refinement (sub-millimetre).
const ITERATIONS: usize = 5;

/// Latitude/longitude in degrees, altitude in metres above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// ECEF (metres) to geodetic, iterating on latitude from the spherical guess.
pub fn ecef_to_geodetic(x: f64, y: f64, z: f64) -> Geodetic {
    let longitude = y.atan2(x).to_degrees();
    let p = x.hypot(y);

    // On the polar axis the iteration divides by cos(lat) = 0
    if p < 1e-3 {
        return Geodetic {
            latitude: if z >= 0.0 { 90.0 } else { -90.0 },
            longitude: 0.0,
            altitude: z.abs() - WGS84_B,
        };
    }

    let mut lat = z.atan2(p * (1.0 - WGS84_E2));
    let mut alt = 0.0;
    for _ in 0..ITERATIONS {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        alt = p / lat.cos() - n;
        lat = z.atan2(p * (1.0 - WGS84_E2 * n / (n + alt)));
    }

    Geodetic {
        latitude: lat.to_degrees(),
        longitude,
        altitude: alt,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_southern_western_quadrant() {
        // Mirror of the reference station through the origin
        let geo = ecef_to_geodetic(-4_278_000.1234, -651_000.5678, -4_672_000.9012);
        assert!((geo.latitude + 47.385_631_56).abs() < 1e-6);
        assert!((geo.longitude - (8.652_548_98 - 180.0)).abs() < 1e-6);
        assert!((geo.altitude - 1498.6828).abs() < 1e-3);
    }

    #[test]
    fn test_reference_station() {
        let geo = ecef_to_geodetic(4_278_000.1234, 651_000.5678, 4_672_000.9012);
        assert!((geo.latitude - 47.385_631_56).abs() < 1e-6);
        assert!((geo.longitude - 8.652_548_98).abs() < 1e-6);
        assert!((geo.altitude - 1498.6828).abs() < 1e-3);
    }

    #[test]
    fn test_equator_prime_meridian() {
        let geo = ecef_to_geodetic(WGS84_A, 0.0, 0.0);
        assert!(geo.latitude.abs() < 1e-12);
        assert!(geo.longitude.abs() < 1e-12);
        assert!(geo.altitude.abs() < 1e-6);
    }

    #[test]
    fn test_pole() {
        let geo = ecef_to_geodetic(0.0, 0.0, WGS84_B + 100.0);
        assert_eq!(geo.latitude, 90.0);
        assert!((geo.altitude - 100.0).abs() < 1e-6);
    }
}

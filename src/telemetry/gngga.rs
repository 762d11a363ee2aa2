//! # GNGGA Parser
//!
//! Parses the NMEA `GGA` fix sentence the RTK rover embeds in telemetry.
//!
//! ```text
//! $GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47
//!        time   lat      NS lon       EW q sats hdop alt
//! ```
//!
//! Malformed input never errors: a sentence with too few fields yields no
//! fix, and a field that does not parse is `None` without affecting the rest.

use serde::{Deserialize, Serialize};

/// Minimum number of comma-separated fields in a usable sentence
pub const GNGGA_MIN_FIELDS: usize = 10;

/// Parsed GGA position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GnggaFix {
    /// Latitude in decimal degrees (negative south)
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees (negative west)
    pub longitude: Option<f64>,
    /// GPS quality indicator (0 = invalid, 1 = GPS, 4 = RTK fixed, ...)
    pub fix_quality: Option<i64>,
    pub satellite_count: Option<i64>,
    /// Horizontal dilution of precision
    pub hdop: Option<f64>,
    /// Altitude above mean sea level in meters
    pub altitude_m: Option<f64>,
}

/// Parse a GGA sentence.
///
/// # Examples
///
/// ```
/// use yarbo_link::telemetry::gngga::parse_gngga;
///
/// let fix = parse_gngga("$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47").unwrap();
/// assert_eq!(fix.satellite_count, Some(8));
/// assert!(parse_gngga("$GNGGA,123519,4807.038,N").is_none());
/// ```
pub fn parse_gngga(sentence: &str) -> Option<GnggaFix> {
    let mut line = sentence.trim();
    if let Some((body, _checksum)) = line.split_once('*') {
        line = body;
    }
    line = line.strip_prefix('$').unwrap_or(line);
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < GNGGA_MIN_FIELDS {
        return None;
    }

    Some(GnggaFix {
        latitude: parse_coordinate(parts[2], parts[3]),
        longitude: parse_coordinate(parts[4], parts[5]),
        fix_quality: parse_int(parts[6]),
        satellite_count: parse_int(parts[7]),
        hdop: parse_float(parts[8]),
        altitude_m: parse_float(parts[9]),
    })
}

/// Convert `DDMM.MMMM` / `DDDMM.MMMM` plus hemisphere into decimal degrees.
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let hemisphere = hemisphere.trim();
    if hemisphere.is_empty() {
        return None;
    }
    let raw = parse_float(value)?;
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    if hemisphere.eq_ignore_ascii_case("S") || hemisphere.eq_ignore_ascii_case("W") {
        Some(-decimal)
    } else {
        Some(decimal)
    }
}

fn parse_int(value: &str) -> Option<i64> {
    parse_float(value).map(|v| v.trunc() as i64)
}

fn parse_float(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-4).unwrap_or(false)
    }

    #[test]
    fn test_reference_sentence() {
        let fix = parse_gngga(REFERENCE).unwrap();
        assert!(approx(fix.latitude, 48.1173), "latitude {:?}", fix.latitude);
        assert!(approx(fix.longitude, 11.5167), "longitude {:?}", fix.longitude);
        assert_eq!(fix.fix_quality, Some(1));
        assert_eq!(fix.satellite_count, Some(8));
        assert_eq!(fix.hdop, Some(0.9));
        assert_eq!(fix.altitude_m, Some(545.4));
    }

    #[test]
    fn test_too_few_fields() {
        assert!(parse_gngga("$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9").is_none());
        assert!(parse_gngga("").is_none());
        assert!(parse_gngga("   ").is_none());
        assert!(parse_gngga("$*47").is_none());
    }

    #[test]
    fn test_southern_and_western_hemispheres() {
        let fix = parse_gngga("$GNGGA,123519,3352.128,S,15112.558,W,4,12,0.6,39.0,M,,M,,").unwrap();
        assert!(fix.latitude.unwrap() < 0.0);
        assert!(fix.longitude.unwrap() < 0.0);
        assert!(approx(fix.latitude, -33.8688));
        assert!(approx(fix.longitude, -151.2093));
    }

    #[test]
    fn test_lowercase_hemisphere() {
        let fix = parse_gngga("GNGGA,123519,4807.038,s,01131.000,w,1,08,0.9,545.4").unwrap();
        assert!(fix.latitude.unwrap() < 0.0);
        assert!(fix.longitude.unwrap() < 0.0);
    }

    #[test]
    fn test_without_sentinel_or_checksum() {
        let fix = parse_gngga("GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4").unwrap();
        assert_eq!(fix.satellite_count, Some(8));
    }

    #[test]
    fn test_one_bad_field_does_not_invalidate_fix() {
        let fix = parse_gngga("$GNGGA,123519,4807.038,N,01131.000,E,1,xx,0.9,545.4,M,46.9,M,,*47").unwrap();
        assert_eq!(fix.satellite_count, None);
        assert_eq!(fix.fix_quality, Some(1));
        assert_eq!(fix.hdop, Some(0.9));
        assert!(fix.latitude.is_some());
    }

    #[test]
    fn test_missing_hemisphere_yields_no_coordinate() {
        let fix = parse_gngga("$GNGGA,123519,4807.038,,01131.000,E,1,08,0.9,545.4").unwrap();
        assert_eq!(fix.latitude, None);
        assert!(fix.longitude.is_some());
    }

    #[test]
    fn test_empty_position_fields_are_none_not_zero() {
        let fix = parse_gngga("$GNGGA,123519,,,,,0,00,,,M,,M,,*66").unwrap();
        assert_eq!(fix.latitude, None);
        assert_eq!(fix.longitude, None);
        assert_eq!(fix.fix_quality, Some(0));
        assert_eq!(fix.hdop, None);
        assert_eq!(fix.altitude_m, None);
    }

    #[test]
    fn test_fractional_integer_fields_truncate() {
        let fix = parse_gngga("$GNGGA,123519,4807.038,N,01131.000,E,4.0,12.7,0.9,545.4").unwrap();
        assert_eq!(fix.fix_quality, Some(4));
        assert_eq!(fix.satellite_count, Some(12));
    }
}

//! NMEA-0183 sentence framing, parsing and GGA interpretation.
//!
//! Framing: `$` up to and including the first `\r\n`, printable ASCII only.
//! The transmitted checksum is compared and recorded on the sentence; a
//! mismatch is reported through `checksum_ok` but does not make the sentence
//! invalid.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::crc;
use crate::frame::{Discard, FrameCheck};
use crate::types::{fix_quality_description, NmeaSentence};

/// Longest sentence accepted by the demultiplexer, terminator included.
pub const MAX_SENTENCE_LEN: usize = 512;

/// GGA sentences must carry at least this many fields after the type.
const GGA_MIN_FIELDS: usize = 14;

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Check for a complete sentence at the head of `buf` (which starts with `$`).
pub fn check_frame(buf: &[u8]) -> FrameCheck {
    let limit = buf.len().min(MAX_SENTENCE_LEN);
    for i in 1..limit {
        match buf[i] {
            b'\r' => {
                return match buf.get(i + 1) {
                    None => FrameCheck::Incomplete,
                    Some(b'\n') => FrameCheck::Complete(i + 2),
                    Some(_) => FrameCheck::Invalid(Discard::Malformed),
                };
            }
            b'$' => return FrameCheck::Invalid(Discard::Malformed),
            0x20..=0x7E => {}
            _ => return FrameCheck::Invalid(Discard::Malformed),
        }
    }
    if buf.len() >= MAX_SENTENCE_LEN {
        FrameCheck::Invalid(Discard::TooLong)
    } else {
        FrameCheck::Incomplete
    }
}

/// Decode one framed sentence (bytes including `\r\n`).
pub fn decode(frame: &[u8]) -> Option<NmeaSentence> {
    let text = std::str::from_utf8(frame).ok()?;
    parse_sentence(text)
}

// ---------------------------------------------------------------------------
// Sentence parsing
// ---------------------------------------------------------------------------

/// Split a sentence into type, fields and checksum.
///
/// Returns `None` for text that is not a sentence at all (too short, missing
/// `$`, no field separator). GGA sentences with fewer than 14 fields are
/// returned with `valid = false`.
pub fn parse_sentence(line: &str) -> Option<NmeaSentence> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() < 6 || !line.starts_with('$') {
        return None;
    }

    let (data, checksum) = match line.rfind('*') {
        Some(pos) if pos + 2 < line.len() => {
            (&line[..pos], Some(line[pos + 1..].to_string()))
        }
        _ => (line, None),
    };

    let checksum_ok = checksum.as_deref().map(|cs| {
        let computed = crc::nmea_checksum(&data.as_bytes()[1..]);
        u8::from_str_radix(cs, 16).map(|v| v == computed).unwrap_or(false)
    });

    let mut parts = data.split(',');
    let head = parts.next()?;
    let fields: Vec<String> = parts.map(str::to_string).collect();
    if fields.is_empty() {
        return None;
    }
    let sentence_type = head.strip_prefix('$').unwrap_or(head).to_string();
    let valid = !(sentence_type.ends_with("GGA") && fields.len() < GGA_MIN_FIELDS);

    Some(NmeaSentence {
        sentence_type,
        fields,
        checksum,
        checksum_ok,
        valid,
    })
}

// ---------------------------------------------------------------------------
// GGA
// ---------------------------------------------------------------------------

/// Interpreted GGA fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GgaFix {
    pub time: Option<NaiveTime>,
    /// Signed decimal degrees, negative south
    pub latitude: f64,
    /// Signed decimal degrees, negative west
    pub longitude: f64,
    pub fix_quality: u8,
    pub satellites: u32,
    pub hdop: f64,
    /// Altitude above mean sea level, metres
    pub altitude: f64,
    pub geoid_separation: Option<f64>,
    /// Age of differential corrections, seconds
    pub diff_age: Option<f64>,
    pub station_id: Option<String>,
}

impl GgaFix {
    /// Combine the time of day with `date` into a UTC timestamp.
    pub fn timestamp_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.time.map(|t| date.and_time(t).and_utc())
    }

    pub fn quality_description(&self) -> String {
        fix_quality_description(self.fix_quality)
    }
}

impl NmeaSentence {
    pub fn is_gga(&self) -> bool {
        self.sentence_type.ends_with("GGA")
    }

    /// Interpret a GGA sentence. `None` for other types or short sentences.
    pub fn gga(&self) -> Option<GgaFix> {
        if !self.is_gga() || self.fields.len() < GGA_MIN_FIELDS {
            return None;
        }
        let f = &self.fields;
        Some(GgaFix {
            time: parse_time(&f[0]),
            latitude: parse_coordinate(&f[1], &f[2]),
            longitude: parse_coordinate(&f[3], &f[4]),
            fix_quality: f[5].parse().unwrap_or(0),
            satellites: f[6].parse().unwrap_or(0),
            hdop: f[7].parse().unwrap_or(0.0),
            altitude: f[8].parse().unwrap_or(0.0),
            geoid_separation: f[10].parse().ok(),
            diff_age: f[12].parse().ok(),
            station_id: Some(f[13].clone()).filter(|s| !s.is_empty()),
        })
    }
}

/// `DDMM.MMMM` / `DDDMM.MMMM` plus hemisphere into signed decimal degrees.
/// Empty or malformed input yields 0.0.
fn parse_coordinate(value: &str, hemisphere: &str) -> f64 {
    let raw: f64 = value.parse().unwrap_or(0.0);
    let degrees = (raw / 100.0).trunc();
    let decimal = degrees + (raw - degrees * 100.0) / 60.0;
    match hemisphere {
        "S" | "W" => -decimal,
        _ => decimal,
    }
}

/// `HHMMSS` or `HHMMSS.sss` into a time of day.
fn parse_time(value: &str) -> Option<NaiveTime> {
    if value.len() < 6 || !value.is_ascii() {
        return None;
    }
    let hour: u32 = value[0..2].parse().ok()?;
    let minute: u32 = value[2..4].parse().ok()?;
    let seconds: f64 = value[4..].parse().ok()?;
    let whole = seconds.trunc();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    NaiveTime::from_hms_nano_opt(hour, minute, whole as u32, nanos.min(999_999_999))
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Format `HHMMSS(.sss)` as `HH:MM:SS`. Short input is returned unchanged.
pub fn format_time(value: &str) -> String {
    if value.len() < 6 || !value.is_ascii() {
        return value.to_string();
    }
    format!("{}:{}:{}", &value[0..2], &value[2..4], &value[4..6])
}

/// GSA fix type field (`1`, `2`, `3`).
pub fn fix_type_description(value: &str) -> &'static str {
    match value {
        "1" => "No fix",
        "2" => "2D fix",
        "3" => "3D fix",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str = "$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn test_parse_gga_sentence() {
        let s = parse_sentence(GGA).unwrap();
        assert_eq!(s.sentence_type, "GNGGA");
        assert_eq!(s.fields.len(), 14);
        assert_eq!(s.checksum.as_deref(), Some("47"));
        assert!(s.valid);
        // 0x47 is the checksum of the GPGGA variant of this body
        assert_eq!(s.checksum_ok, Some(false));
    }

    #[test]
    fn test_checksum_match() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let s = parse_sentence(line).unwrap();
        assert_eq!(s.checksum_ok, Some(true));
    }

    #[test]
    fn test_gga_fields() {
        let fix = parse_sentence(GGA).unwrap().gga().unwrap();
        assert!((fix.latitude - 48.1173).abs() < 1e-6);
        assert!((fix.longitude - 11.516_667).abs() < 1e-6);
        assert_eq!(fix.fix_quality, 1);
        assert_eq!(fix.satellites, 8);
        assert!((fix.hdop - 0.9).abs() < 1e-9);
        assert!((fix.altitude - 545.4).abs() < 1e-9);
        assert_eq!(fix.geoid_separation, Some(46.9));
        assert_eq!(fix.diff_age, None);
        assert_eq!(fix.station_id, None);
        assert_eq!(fix.time, NaiveTime::from_hms_opt(12, 35, 19));
        assert_eq!(fix.quality_description(), "GPS Fix");
    }

    #[test]
    fn test_gga_rtk_fixed_with_station() {
        let line = "$GNGGA,092725.00,4717.11399,N,00833.91590,E,4,08,1.01,499.6,M,48.0,M,1.0,0000*6F";
        let s = parse_sentence(line).unwrap();
        assert_eq!(s.checksum_ok, Some(true));
        let fix = s.gga().unwrap();
        assert_eq!(fix.fix_quality, 4);
        assert!((fix.latitude - 47.285_233_166).abs() < 1e-6);
        assert!((fix.longitude - 8.565_265).abs() < 1e-6);
        assert_eq!(fix.diff_age, Some(1.0));
        assert_eq!(fix.station_id.as_deref(), Some("0000"));
        assert_eq!(fix.time, NaiveTime::from_hms_milli_opt(9, 27, 25, 0));
    }

    #[test]
    fn test_southern_western_hemisphere() {
        let line = "$GPGGA,000000,3351.000,S,15112.000,W,2,05,1.2,10.0,M,0.0,M,,";
        let fix = parse_sentence(line).unwrap().gga().unwrap();
        assert!((fix.latitude + 33.85).abs() < 1e-9);
        assert!((fix.longitude + 151.2).abs() < 1e-9);
    }

    #[test]
    fn test_short_gga_invalid() {
        let s = parse_sentence("$GPGGA,123519,4807.038,N,01131.000,E,1*00").unwrap();
        assert!(!s.valid);
        assert!(s.gga().is_none());
    }

    #[test]
    fn test_unpadded_longitude() {
        let line = "$GPGGA,123519,4807.038,N,1131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        let fix = parse_sentence(line).unwrap().gga().unwrap();
        assert!((fix.longitude - 11.516_667).abs() < 1e-6);
    }

    #[test]
    fn test_empty_coordinates_are_zero() {
        let line = "$GPGGA,,,,,,0,00,99.99,,,,,,";
        let fix = parse_sentence(line).unwrap().gga().unwrap();
        assert_eq!(fix.latitude, 0.0);
        assert_eq!(fix.longitude, 0.0);
        assert_eq!(fix.time, None);
    }

    #[test]
    fn test_not_a_sentence() {
        assert!(parse_sentence("GPGGA,1,2,3").is_none());
        assert!(parse_sentence("$GP").is_none());
        assert!(parse_sentence("$GPXYZ").is_none());
    }

    #[test]
    fn test_other_sentence_types_pass_through() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
        let s = parse_sentence(line).unwrap();
        assert_eq!(s.sentence_type, "GPRMC");
        assert_eq!(s.checksum_ok, Some(true));
        assert!(s.valid);
        assert!(s.gga().is_none());
    }

    #[test]
    fn test_check_frame() {
        assert_eq!(check_frame(b"$GPGGA,1"), FrameCheck::Incomplete);
        assert_eq!(check_frame(b"$GPGGA,1\r"), FrameCheck::Incomplete);
        assert_eq!(check_frame(b"$GPGGA,1\r\nxx"), FrameCheck::Complete(10));
        assert_eq!(
            check_frame(b"$GPGGA,1\rX"),
            FrameCheck::Invalid(Discard::Malformed)
        );
        assert_eq!(
            check_frame(b"$GP$GGA"),
            FrameCheck::Invalid(Discard::Malformed)
        );
        assert_eq!(
            check_frame(b"$GP\x01"),
            FrameCheck::Invalid(Discard::Malformed)
        );
    }

    #[test]
    fn test_display_helpers() {
        assert_eq!(format_time("123519"), "12:35:19");
        assert_eq!(format_time("092725.00"), "09:27:25");
        assert_eq!(format_time("12"), "12");
        assert_eq!(fix_type_description("3"), "3D fix");
        assert_eq!(fix_type_description("9"), "Unknown");
    }

    #[test]
    fn test_timestamp_on_date() {
        let fix = parse_sentence(GGA).unwrap().gga().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let ts = fix.timestamp_on(date).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:35:19+00:00");
    }
}

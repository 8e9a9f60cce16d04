//! NTRIP sourcetable parsing (`STR;` records).

use serde::Serialize;

/// One stream record from a caster sourcetable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MountPoint {
    pub name: String,
    pub identifier: String,
    pub format: String,
    pub format_details: String,
    /// 0 none, 1 L1 phase, 2 L1+L2 phase
    pub carrier: Option<u8>,
    pub nav_system: String,
    pub network: String,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Caster expects NMEA GGA from the client
    pub nmea: bool,
    /// Network (true) or single-base (false) solution
    pub network_solution: bool,
    pub generator: String,
    pub compression: String,
    /// `N` none, `B` basic, `D` digest
    pub authentication: String,
    pub fee: bool,
    pub bitrate: Option<u32>,
    pub misc: String,
}

impl MountPoint {
    pub fn requires_auth(&self) -> bool {
        matches!(self.authentication.as_str(), "B" | "D")
    }
}

/// Parsed sourcetable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sourcetable {
    pub mounts: Vec<MountPoint>,
    /// `ENDSOURCETABLE` marker was seen
    pub complete: bool,
}

impl Sourcetable {
    pub fn find(&self, name: &str) -> Option<&MountPoint> {
        self.mounts.iter().find(|m| m.name == name)
    }
}

/// Parse sourcetable text. Non-`STR;` lines are skipped, as are `STR`
/// records with fewer than five fields; parsing stops at `ENDSOURCETABLE`.
pub fn parse_sourcetable(text: &str) -> Sourcetable {
    let mut table = Sourcetable::default();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("ENDSOURCETABLE") {
            table.complete = true;
            break;
        }
        if let Some(mount) = line.strip_prefix("STR;").and_then(parse_stream_record) {
            table.mounts.push(mount);
        }
    }
    table
}

fn parse_stream_record(record: &str) -> Option<MountPoint> {
    let fields: Vec<&str> = record.split(';').collect();
    if fields.len() < 4 {
        return None;
    }
    let text = |i: usize| fields.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
    let flag = |i: usize| fields.get(i).map(|s| s.trim() == "1" || s.trim() == "Y").unwrap_or(false);

    Some(MountPoint {
        name: text(0),
        identifier: text(1),
        format: text(2),
        format_details: text(3),
        carrier: fields.get(4).and_then(|s| s.trim().parse().ok()),
        nav_system: text(5),
        network: text(6),
        country: text(7),
        latitude: fields.get(8).and_then(|s| s.trim().parse().ok()),
        longitude: fields.get(9).and_then(|s| s.trim().parse().ok()),
        nmea: flag(10),
        network_solution: flag(11),
        generator: text(12),
        compression: text(13),
        authentication: text(14),
        fee: flag(15),
        bitrate: fields.get(16).and_then(|s| s.trim().parse().ok()),
        misc: fields[17.min(fields.len())..].join(";"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! RTCM3 framing and body decoding.
//!
//! Frame: preamble `0xD3`, 6 reserved bits, 10-bit payload length, payload,
//! 24-bit CRC-24Q over header + payload. The message number is the first
//! 12 bits of the payload.
//!
//! Framing and CRC are checked here; bodies are parsed by `rtcm_rs` and
//! reduced to what the aggregator consumes:
//! - 1001-1004 GPS legacy observations (satellite list + carrier validity)
//! - MSM4-7 for GPS, GLONASS, Galileo, SBAS, QZSS, BeiDou (satellites + cells)
//! - 1005/1006 reference station ARP
//! - 1019 GPS ephemeris

use std::f64::consts::PI;

use log::debug;
use rtcm_rs::{Message, MessageFrame};
use serde::Serialize;

use crate::crc;
use crate::frame::{Discard, FrameCheck};
use crate::geodesy::{ecef_to_geodetic, Geodetic};
use crate::types::RtcmMessage;

pub const PREAMBLE: u8 = 0xD3;
pub const MAX_PAYLOAD_LEN: usize = 1023;

const HEADER_LEN: usize = 3;
const CRC_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn payload_len(buf: &[u8]) -> usize {
    ((buf[1] as usize & 0x03) << 8) | buf[2] as usize
}

/// Check for a complete frame at the head of `buf` (which starts with `0xD3`).
pub fn check_frame(buf: &[u8]) -> FrameCheck {
    if buf.len() < HEADER_LEN {
        return FrameCheck::Incomplete;
    }
    if buf[1] & 0xFC != 0 {
        return FrameCheck::Invalid(Discard::BadHeader);
    }
    let total = HEADER_LEN + payload_len(buf) + CRC_LEN;
    if buf.len() < total {
        return FrameCheck::Incomplete;
    }
    if crc::rtcm_frame_crc_ok(&buf[..total]) {
        FrameCheck::Complete(total)
    } else {
        FrameCheck::Invalid(Discard::Checksum)
    }
}

/// Decode one complete frame into an [`RtcmMessage`].
pub fn decode(frame: &[u8]) -> Option<RtcmMessage> {
    match check_frame(frame) {
        FrameCheck::Complete(total) if total == frame.len() => {}
        _ => return None,
    }
    let length = payload_len(frame);
    if length < 2 {
        debug!("RTCM3 frame with {length}-byte payload discarded");
        return None;
    }
    let payload = frame[HEADER_LEN..HEADER_LEN + length].to_vec();
    let message_type = ((payload[0] as u16) << 4) | ((payload[1] as u16) >> 4);
    Some(RtcmMessage {
        message_type,
        length,
        payload,
    })
}

/// Wrap a payload in preamble, length and CRC. `None` if the payload is
/// longer than 1023 bytes.
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return None;
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    frame.push(PREAMBLE);
    frame.push((payload.len() >> 8) as u8 & 0x03);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    let crc = crc::crc24q(&frame);
    frame.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
    Some(frame)
}

// ---------------------------------------------------------------------------
// Message catalogue
// ---------------------------------------------------------------------------

/// Satellite system of an observation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Constellation {
    Gps,
    Glonass,
    Galileo,
    Sbas,
    Qzss,
    Beidou,
}

impl Constellation {
    pub fn name(self) -> &'static str {
        match self {
            Constellation::Gps => "GPS",
            Constellation::Glonass => "GLONASS",
            Constellation::Galileo => "Galileo",
            Constellation::Sbas => "SBAS",
            Constellation::Qzss => "QZSS",
            Constellation::Beidou => "BeiDou",
        }
    }
}

/// Split an MSM message number into constellation and MSM level (1-7).
pub fn msm_kind(message_type: u16) -> Option<(Constellation, u8)> {
    let constellation = match message_type / 10 {
        107 => Constellation::Gps,
        108 => Constellation::Glonass,
        109 => Constellation::Galileo,
        110 => Constellation::Sbas,
        111 => Constellation::Qzss,
        112 => Constellation::Beidou,
        _ => return None,
    };
    let level = (message_type % 10) as u8;
    (1..=7).contains(&level).then_some((constellation, level))
}

/// Human-readable name of an RTCM3 message number.
pub fn message_description(message_type: u16) -> String {
    let text = match message_type {
        1001 => "GPS L1-Only RTK Observables",
        1002 => "GPS Extended L1-Only RTK Observables",
        1003 => "GPS L1/L2 RTK Observables",
        1004 => "GPS Extended L1/L2 RTK Observables",
        1005 => "Stationary RTK Reference Station ARP",
        1006 => "Stationary RTK Reference Station ARP with Antenna Height",
        1007 => "Antenna Descriptor",
        1008 => "Antenna Descriptor & Serial Number",
        1009 => "GLONASS L1-Only RTK Observables",
        1010 => "GLONASS Extended L1-Only RTK Observables",
        1011 => "GLONASS L1/L2 RTK Observables",
        1012 => "GLONASS Extended L1/L2 RTK Observables",
        1019 => "GPS Ephemerides",
        1020 => "GLONASS Ephemerides",
        1033 => "Receiver and Antenna Descriptors",
        t => {
            return match msm_kind(t) {
                Some((c, level)) => format!("{} MSM{}", c.name(), level),
                None => "Unknown RTCM Message Type".to_string(),
            }
        }
    };
    text.to_string()
}

/// Parse a message body through `rtcm_rs`. Unsupported or malformed
/// bodies are `None`.
fn parse_body(msg: &RtcmMessage) -> Option<Message> {
    let frame = encode_frame(&msg.payload)?;
    let parsed = MessageFrame::new(&frame).ok()?;
    match parsed.get_message() {
        Message::Empty | Message::Corrupt | Message::MsgNotSupported(_) => {
            debug!("RTCM3 {} body not decoded", msg.message_type);
            None
        }
        body => Some(body),
    }
}

// ---------------------------------------------------------------------------
// 1005 / 1006: reference station ARP
// ---------------------------------------------------------------------------

/// Reference station antenna reference point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationCoordinates {
    pub station_id: u16,
    /// ECEF metres
    pub ecef_x: f64,
    pub ecef_y: f64,
    pub ecef_z: f64,
    /// Only present in 1006
    pub antenna_height: Option<f64>,
}

impl StationCoordinates {
    pub fn geodetic(&self) -> Geodetic {
        ecef_to_geodetic(self.ecef_x, self.ecef_y, self.ecef_z)
    }
}

pub fn decode_station(msg: &RtcmMessage) -> Option<StationCoordinates> {
    if msg.message_type != 1005 && msg.message_type != 1006 {
        return None;
    }
    match parse_body(msg)? {
        Message::Msg1005(m) => Some(StationCoordinates {
            station_id: m.reference_station_id,
            ecef_x: m.antenna_ref_point_ecef_x_m,
            ecef_y: m.antenna_ref_point_ecef_y_m,
            ecef_z: m.antenna_ref_point_ecef_z_m,
            antenna_height: None,
        }),
        Message::Msg1006(m) => Some(StationCoordinates {
            station_id: m.reference_station_id,
            ecef_x: m.antenna_ref_point_ecef_x_m,
            ecef_y: m.antenna_ref_point_ecef_y_m,
            ecef_z: m.antenna_ref_point_ecef_z_m,
            antenna_height: Some(m.antenna_height_m),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Observations: 1001-1004 and MSM4-7
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SatelliteObservation {
    pub prn: u8,
    /// Usable carrier/cell data present for this satellite
    pub valid: bool,
}

/// One epoch of observations from a reference station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationSet {
    pub message_type: u16,
    pub constellation: Constellation,
    pub station_id: u16,
    /// Epoch time in milliseconds (GPS TOW for GPS messages)
    pub epoch_ms: u32,
    pub satellites: Vec<SatelliteObservation>,
}

impl ObservationSet {
    pub fn valid_satellites(&self) -> usize {
        self.satellites.iter().filter(|s| s.valid).count()
    }
}

/// Decode any supported observation message.
pub fn decode_observations(msg: &RtcmMessage) -> Option<ObservationSet> {
    match msg.message_type {
        1001..=1004 => decode_gps_observations(msg),
        t if matches!(msm_kind(t), Some((_, 4..=7))) => decode_msm(msg),
        _ => None,
    }
}

// Header and satellites of a legacy GPS observation body. A satellite is
// valid unless its L1 phase-range field carries the invalid marker.
macro_rules! legacy_observations {
    ($body:expr) => {{
        let body = $body;
        let satellites = body
            .satellites
            .iter()
            .map(|sat| SatelliteObservation {
                prn: sat.gps_satellite_id,
                valid: sat.l1_phase_pseudorange_diff_m.is_some(),
            })
            .collect();
        (body.reference_station_id, body.gps_epoch_time_ms, satellites)
    }};
}

/// GPS legacy observations (1001-1004).
pub fn decode_gps_observations(msg: &RtcmMessage) -> Option<ObservationSet> {
    if !(1001..=1004).contains(&msg.message_type) {
        return None;
    }
    let (station_id, epoch_ms, satellites) = match parse_body(msg)? {
        Message::Msg1001(m) => legacy_observations!(m),
        Message::Msg1002(m) => legacy_observations!(m),
        Message::Msg1003(m) => legacy_observations!(m),
        Message::Msg1004(m) => legacy_observations!(m),
        _ => return None,
    };
    Some(ObservationSet {
        message_type: msg.message_type,
        constellation: Constellation::Gps,
        station_id,
        epoch_ms,
        satellites,
    })
}

// Header and satellites of an MSM body. A satellite is valid when at least
// one of its signal cells is present.
macro_rules! msm_observations {
    ($body:expr, $epoch:ident) => {{
        let body = $body;
        let cells = &body.data_segment.signal_data;
        let satellites = body
            .data_segment
            .satellite_data
            .iter()
            .map(|sat| SatelliteObservation {
                prn: sat.satellite_id,
                valid: cells.iter().any(|cell| cell.satellite_id == sat.satellite_id),
            })
            .collect();
        (body.reference_station_id, body.$epoch, satellites)
    }};
}

/// MSM4-7 for any constellation.
pub fn decode_msm(msg: &RtcmMessage) -> Option<ObservationSet> {
    let (constellation, level) = msm_kind(msg.message_type)?;
    if level < 4 {
        return None;
    }
    let (station_id, epoch_ms, satellites) = match parse_body(msg)? {
        Message::Msg1074(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1075(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1076(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1077(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1084(m) => msm_observations!(m, glo_epoch_time_ms),
        Message::Msg1085(m) => msm_observations!(m, glo_epoch_time_ms),
        Message::Msg1086(m) => msm_observations!(m, glo_epoch_time_ms),
        Message::Msg1087(m) => msm_observations!(m, glo_epoch_time_ms),
        Message::Msg1094(m) => msm_observations!(m, gal_epoch_time_ms),
        Message::Msg1095(m) => msm_observations!(m, gal_epoch_time_ms),
        Message::Msg1096(m) => msm_observations!(m, gal_epoch_time_ms),
        Message::Msg1097(m) => msm_observations!(m, gal_epoch_time_ms),
        Message::Msg1104(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1105(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1106(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1107(m) => msm_observations!(m, gps_epoch_time_ms),
        Message::Msg1114(m) => msm_observations!(m, qzss_epoch_time_ms),
        Message::Msg1115(m) => msm_observations!(m, qzss_epoch_time_ms),
        Message::Msg1116(m) => msm_observations!(m, qzss_epoch_time_ms),
        Message::Msg1117(m) => msm_observations!(m, qzss_epoch_time_ms),
        Message::Msg1124(m) => msm_observations!(m, bds_epoch_time_ms),
        Message::Msg1125(m) => msm_observations!(m, bds_epoch_time_ms),
        Message::Msg1126(m) => msm_observations!(m, bds_epoch_time_ms),
        Message::Msg1127(m) => msm_observations!(m, bds_epoch_time_ms),
        _ => return None,
    };
    Some(ObservationSet {
        message_type: msg.message_type,
        constellation,
        station_id,
        epoch_ms,
        satellites,
    })
}

// ---------------------------------------------------------------------------
// 1019: GPS ephemeris
// ---------------------------------------------------------------------------

/// GPS broadcast ephemeris. Angles in radians, angular rates in rad/s,
/// times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ephemeris {
    pub satellite_id: u8,
    /// GPS week modulo 1024
    pub week: u16,
    pub sv_accuracy: u8,
    pub code_on_l2: u8,
    pub idot: f64,
    pub iode: u8,
    pub toc: f64,
    pub af2: f64,
    pub af1: f64,
    pub af0: f64,
    pub iodc: u16,
    pub crs: f64,
    pub delta_n: f64,
    pub m0: f64,
    pub cuc: f64,
    pub eccentricity: f64,
    pub cus: f64,
    pub sqrt_a: f64,
    pub toe: f64,
    pub cic: f64,
    pub omega0: f64,
    pub cis: f64,
    pub i0: f64,
    pub crc: f64,
    pub omega: f64,
    pub omega_dot: f64,
    pub tgd: f64,
    pub health: u8,
    pub l2p_flag: bool,
    pub fit_interval: bool,
}

pub fn decode_gps_ephemeris(msg: &RtcmMessage) -> Option<Ephemeris> {
    if msg.message_type != 1019 {
        return None;
    }
    let Message::Msg1019(m) = parse_body(msg)? else {
        return None;
    };
    // Broadcast angles are in semicircles
    Some(Ephemeris {
        satellite_id: m.gps_satellite_id,
        week: m.gps_week_number,
        sv_accuracy: m.ura_index,
        code_on_l2: m.code_on_l2_ind,
        idot: m.idot_sc_s * PI,
        iode: m.iode,
        toc: f64::from(m.toc_s),
        af2: f64::from(m.af2_s_s2),
        af1: f64::from(m.af1_s_s),
        af0: m.af0_s,
        iodc: m.iodc,
        crs: f64::from(m.crs_m),
        delta_n: f64::from(m.delta_n_sc_s) * PI,
        m0: m.m0_sc * PI,
        cuc: f64::from(m.cuc_rad),
        eccentricity: m.eccentricity,
        cus: f64::from(m.cus_rad),
        sqrt_a: m.sqrt_a_sqrt_m,
        toe: f64::from(m.toe_s),
        cic: f64::from(m.cic_rad),
        omega0: m.omega0_sc * PI,
        cis: f64::from(m.cis_rad),
        i0: m.i0_sc * PI,
        crc: f64::from(m.crc_m),
        omega: m.omega_sc * PI,
        omega_dot: m.omegadot_sc_s * PI,
        tgd: f64::from(m.tgd_s),
        health: m.sv_health_ind,
        l2p_flag: m.l2_p_data_flag != 0,
        fit_interval: m.fit_interval_ind != 0,
    })
}

// ---------------------------------------------------------------------------
// Test message builders
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

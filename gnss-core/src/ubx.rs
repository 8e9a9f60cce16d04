//! UBX framing and NAV-PVT decoding.
//!
//! Frame: sync `0xB5 0x62`, class, id, little-endian u16 payload length,
//! payload, Fletcher checksum `(CK_A, CK_B)` over class..payload. Framing is
//! checked here; the NAV-PVT body is read with the `ublox` crate.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;
use serde::Serialize;
use ublox::PacketRef;

use crate::crc;
use crate::frame::{Discard, FrameCheck};
use crate::types::{SolutionStatus, UbxMessage};

pub const SYNC: [u8; 2] = [0xB5, 0x62];

/// Payloads above this are treated as a corrupted length field.
pub const MAX_PAYLOAD_LEN: usize = 8192;

const HEADER_LEN: usize = 6;
const CHECKSUM_LEN: usize = 2;

pub const CLASS_NAV: u8 = 0x01;
pub const ID_NAV_PVT: u8 = 0x07;

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Check for a complete frame at the head of `buf` (which starts with `0xB5`).
pub fn check_frame(buf: &[u8]) -> FrameCheck {
    if buf.len() < 2 {
        return FrameCheck::Incomplete;
    }
    if buf[1] != SYNC[1] {
        return FrameCheck::Invalid(Discard::BadHeader);
    }
    if buf.len() < HEADER_LEN {
        return FrameCheck::Incomplete;
    }
    let len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return FrameCheck::Invalid(Discard::TooLong);
    }
    let total = HEADER_LEN + len + CHECKSUM_LEN;
    if buf.len() < total {
        return FrameCheck::Incomplete;
    }
    let (ck_a, ck_b) = crc::ubx_checksum(&buf[2..HEADER_LEN + len]);
    if ck_a == buf[total - 2] && ck_b == buf[total - 1] {
        FrameCheck::Complete(total)
    } else {
        FrameCheck::Invalid(Discard::Checksum)
    }
}

/// Decode one complete frame into a [`UbxMessage`].
pub fn decode(frame: &[u8]) -> Option<UbxMessage> {
    match check_frame(frame) {
        FrameCheck::Complete(total) if total == frame.len() => {}
        _ => return None,
    }
    let length = u16::from_le_bytes([frame[4], frame[5]]);
    Some(UbxMessage {
        class: frame[2],
        id: frame[3],
        length,
        payload: frame[HEADER_LEN..HEADER_LEN + length as usize].to_vec(),
    })
}

/// Build a complete frame around `payload`.
pub fn encode_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&SYNC);
    frame.push(class);
    frame.push(id);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    let (ck_a, ck_b) = crc::ubx_checksum(&frame[2..]);
    frame.push(ck_a);
    frame.push(ck_b);
    frame
}

// ---------------------------------------------------------------------------
// Message catalogue
// ---------------------------------------------------------------------------

pub fn class_description(class: u8) -> &'static str {
    match class {
        0x01 => "NAV (Navigation Results)",
        0x02 => "RXM (Receiver Manager Messages)",
        0x05 => "ACK (Acknowledgement Messages)",
        0x06 => "CFG (Configuration Messages)",
        0x0A => "MON (Monitoring Messages)",
        0x0B => "AID (AssistNow Aiding Messages)",
        0x0D => "TIM (Timing Messages)",
        0x10 => "ESF (External Sensor Fusion Messages)",
        0x13 => "MGA (Multiple GNSS Assistance Messages)",
        0x21 => "LOG (Logging Messages)",
        0x27 => "SEC (Security Messages)",
        0x28 => "HNR (High Rate Navigation Results)",
        _ => "Unknown Message Class",
    }
}

pub fn message_description(class: u8, id: u8) -> &'static str {
    match (class, id) {
        (0x01, 0x01) => "NAV-POSECEF (Position Solution in ECEF)",
        (0x01, 0x02) => "NAV-POSLLH (Geodetic Position Solution)",
        (0x01, 0x03) => "NAV-STATUS (Receiver Navigation Status)",
        (0x01, 0x04) => "NAV-DOP (Dilution of Precision)",
        (0x01, 0x06) => "NAV-SOL (Navigation Solution Information)",
        (0x01, 0x07) => "NAV-PVT (Navigation Position Velocity Time Solution)",
        (0x01, 0x11) => "NAV-VELECEF (Velocity Solution in ECEF)",
        (0x01, 0x12) => "NAV-VELNED (Velocity Solution in NED)",
        (0x01, 0x20) => "NAV-TIMEGPS (GPS Time Solution)",
        (0x01, 0x21) => "NAV-TIMEUTC (UTC Time Solution)",
        (0x01, 0x3C) => "NAV-RELPOSNED (Relative Positioning Information)",
        (0x02, 0x15) => "RXM-RAWX (Multi-GNSS Raw Measurements)",
        (0x02, 0x13) => "RXM-SFRBX (Broadcast Navigation Data Subframe)",
        (0x05, 0x00) => "ACK-NAK (Message Not Acknowledged)",
        (0x05, 0x01) => "ACK-ACK (Message Acknowledged)",
        (0x06, 0x00) => "CFG-PRT (Port Configuration)",
        (0x06, 0x01) => "CFG-MSG (Message Configuration)",
        (0x06, 0x04) => "CFG-RST (Reset Receiver)",
        (0x06, 0x24) => "CFG-NAV5 (Navigation Engine Settings)",
        (0x06, 0x31) => "CFG-TP5 (Time Pulse Parameters)",
        (0x06, 0x8A) => "CFG-VALSET (Set Configuration Values)",
        (0x06, 0x8B) => "CFG-VALGET (Get Configuration Values)",
        (0x06, 0x8C) => "CFG-VALDEL (Delete Configuration Values)",
        (0x0A, 0x04) => "MON-VER (Receiver and Software Version)",
        (0x01, _) => "Unknown NAV message",
        (0x06, _) => "Unknown CFG message",
        _ => "Unknown message",
    }
}

// ---------------------------------------------------------------------------
// NAV-PVT
// ---------------------------------------------------------------------------

/// Receiver navigation solution (UBX-NAV-PVT).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavPvt {
    /// GPS time of week, ms
    pub itow: u32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Validity flags (bit 0 date, bit 1 time)
    pub valid: u8,
    pub nano: i32,
    /// 0 none, 1 dead reckoning, 2 2D, 3 3D, 4 GNSS + DR, 5 time only
    pub fix_type: u8,
    pub flags: u8,
    pub num_sv: u8,
    /// Degrees
    pub longitude: f64,
    pub latitude: f64,
    /// Height above ellipsoid, metres
    pub height: f64,
    /// Height above mean sea level, metres
    pub height_msl: f64,
    /// Horizontal accuracy estimate, metres
    pub h_acc: f64,
    pub v_acc: f64,
    pub pdop: f64,
}

impl NavPvt {
    pub fn gnss_fix_ok(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn diff_soln(&self) -> bool {
        self.flags & 0x02 != 0
    }

    /// Carrier phase range solution: 0 none, 1 float, 2 fixed.
    pub fn carrier_solution(&self) -> u8 {
        (self.flags >> 6) & 0x03
    }

    /// Solution tier as reported by the receiver.
    pub fn status(&self) -> SolutionStatus {
        match self.carrier_solution() {
            2 => SolutionStatus::Fix,
            1 => SolutionStatus::Float,
            _ if self.diff_soln() => SolutionStatus::Dgps,
            _ if (2..=4).contains(&self.fix_type) => SolutionStatus::Single,
            _ => SolutionStatus::None,
        }
    }

    /// UTC epoch, when the receiver flags both date and time as valid.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if self.valid & 0x03 != 0x03 {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?;
        let time = date.and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)?;
        Some(time.and_utc() + Duration::nanoseconds(self.nano as i64))
    }
}

/// Decode a NAV-PVT body through the `ublox` packet parser.
pub fn decode_nav_pvt(msg: &UbxMessage) -> Option<NavPvt> {
    if msg.class != CLASS_NAV || msg.id != ID_NAV_PVT {
        return None;
    }
    let frame = encode_frame(msg.class, msg.id, &msg.payload);
    let mut parser = ublox::Parser::default();
    let mut packets = parser.consume(&frame);
    match packets.next()? {
        Ok(PacketRef::NavPvt(pkt)) => Some(NavPvt {
            itow: pkt.itow(),
            year: pkt.year(),
            month: pkt.month(),
            day: pkt.day(),
            hour: pkt.hour(),
            minute: pkt.min(),
            second: pkt.sec(),
            valid: pkt.valid(),
            nano: pkt.nanosecond(),
            fix_type: pkt.fix_type() as u8,
            flags: pkt.flags().bits(),
            num_sv: pkt.num_satellites(),
            longitude: pkt.lon_degrees(),
            latitude: pkt.lat_degrees(),
            height: pkt.height_meters(),
            height_msl: pkt.height_msl(),
            h_acc: f64::from(pkt.horiz_accuracy()) / 1000.0,
            v_acc: f64::from(pkt.vert_accuracy()) / 1000.0,
            pdop: f64::from(pkt.pdop()) * 0.01,
        }),
        Ok(_) => None,
        Err(e) => {
            debug!("NAV-PVT body rejected: {e:?}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Test message builders
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_known_poll_frame() {
        let frame = [0xB5, 0x62, 0x06, 0x00, 0x00, 0x00, 0x06, 0x18];
        assert_eq!(check_frame(&frame), FrameCheck::Complete(8));
        let msg = decode(&frame).unwrap();
        assert_eq!((msg.class, msg.id, msg.length), (0x06, 0x00, 0));
        assert!(msg.payload.is_empty());
        assert_eq!(encode_frame(0x06, 0x00, &[]), frame.to_vec());
    }

    #[test]
    fn test_check_frame_states() {
        assert_eq!(check_frame(&[0xB5]), FrameCheck::Incomplete);
        assert_eq!(check_frame(&[0xB5, 0x00]), FrameCheck::Invalid(Discard::BadHeader));
        assert_eq!(check_frame(&[0xB5, 0x62, 0x01, 0x07, 0x5C]), FrameCheck::Incomplete);
        assert_eq!(
            check_frame(&[0xB5, 0x62, 0x01, 0x07, 0x01, 0x20]),
            FrameCheck::Invalid(Discard::TooLong)
        );
        assert_eq!(
            check_frame(&[0xB5, 0x62, 0x06, 0x00, 0x00, 0x00, 0x06, 0x19]),
            FrameCheck::Invalid(Discard::Checksum)
        );
    }

    #[test]
    fn test_decode_nav_pvt() {
        let msg = nav_pvt(3, 0x83, 18, 51.5076, -0.1276, 46.0);
        let pvt = decode_nav_pvt(&msg).unwrap();
        assert_eq!(pvt.itow, 123_456_000);
        assert_eq!(pvt.fix_type, 3);
        assert_eq!(pvt.num_sv, 18);
        assert!((pvt.latitude - 51.5076).abs() < 1e-7);
        assert!((pvt.longitude + 0.1276).abs() < 1e-7);
        assert!((pvt.height_msl - 46.0).abs() < 1e-9);
        assert!((pvt.height - 93.0).abs() < 1e-9);
        assert!((pvt.h_acc - 0.014).abs() < 1e-12);
        assert!((pvt.pdop - 1.32).abs() < 1e-9);
        assert!(pvt.gnss_fix_ok());
        assert!(pvt.diff_soln());
        assert_eq!(pvt.carrier_solution(), 2);
        assert_eq!(pvt.status(), SolutionStatus::Fix);
        assert_eq!(
            pvt.timestamp().unwrap().to_rfc3339(),
            "2024-05-01T10:20:30+00:00"
        );
    }

    #[test]
    fn test_nav_pvt_status_tiers() {
        let tier = |fix_type, flags| {
            decode_nav_pvt(&nav_pvt(fix_type, flags, 10, 0.0, 0.0, 0.0))
                .unwrap()
                .status()
        };
        assert_eq!(tier(3, 0x43), SolutionStatus::Float);
        assert_eq!(tier(3, 0x03), SolutionStatus::Dgps);
        assert_eq!(tier(3, 0x01), SolutionStatus::Single);
        assert_eq!(tier(2, 0x01), SolutionStatus::Single);
        assert_eq!(tier(0, 0x00), SolutionStatus::None);
        assert_eq!(tier(5, 0x00), SolutionStatus::None);
    }

    #[test]
    fn test_nav_pvt_wrong_message_or_short() {
        let mut msg = nav_pvt(3, 0x01, 10, 0.0, 0.0, 0.0);
        msg.payload.truncate(60);
        assert!(decode_nav_pvt(&msg).is_none());
        let other = UbxMessage {
            class: 0x01,
            id: 0x02,
            length: 0,
            payload: vec![0; 92],
        };
        assert!(decode_nav_pvt(&other).is_none());
    }

    #[test]
    fn test_timestamp_requires_valid_flags() {
        let mut payload = nav_pvt_payload(3, 0x01, 10, 0.0, 0.0, 0.0);
        payload[11] = 0x01;
        let msg = decode(&encode_frame(CLASS_NAV, ID_NAV_PVT, &payload)).unwrap();
        assert!(decode_nav_pvt(&msg).unwrap().timestamp().is_none());
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(class_description(0x01), "NAV (Navigation Results)");
        assert_eq!(
            message_description(0x01, 0x07),
            "NAV-PVT (Navigation Position Velocity Time Solution)"
        );
        assert_eq!(message_description(0x01, 0x99), "Unknown NAV message");
        assert_eq!(message_description(0x42, 0x01), "Unknown message");
    }
}

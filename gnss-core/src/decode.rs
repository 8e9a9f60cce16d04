//! Dispatch framed bytes to the protocol decoders and describe the results.
//!
//! - RTCM3: message number + payload, bodies for 1004/MSM/1005/1006/1019
//! - UBX:   class/id + payload, body for NAV-PVT
//! - NMEA:  type + fields, GGA interpreted

use crate::frame::RawFrame;
use crate::types::*;
use crate::{nmea, rtcm, ubx};

/// Decode a frame with the decoder matching its protocol tag.
pub fn decode(frame: &RawFrame) -> Option<Message> {
    match frame.protocol {
        Protocol::Rtcm3 => rtcm::decode(&frame.bytes).map(Message::Rtcm),
        Protocol::Ubx => ubx::decode(&frame.bytes).map(Message::Ubx),
        Protocol::Nmea => nmea::decode(&frame.bytes).map(Message::Nmea),
    }
}

/// One-line human-readable summary of a message.
pub fn describe(msg: &Message) -> String {
    match msg {
        Message::Nmea(s) => describe_nmea(s),
        Message::Rtcm(m) => describe_rtcm(m),
        Message::Ubx(m) => describe_ubx(m),
    }
}

/// Name of the message kind without per-message values.
pub fn kind_description(msg: &Message) -> String {
    match msg {
        Message::Nmea(s) => s.sentence_type.clone(),
        Message::Rtcm(m) => rtcm::message_description(m.message_type),
        Message::Ubx(m) => ubx::message_description(m.class, m.id).to_string(),
    }
}

fn describe_nmea(s: &NmeaSentence) -> String {
    let mut out = if let Some(fix) = s.gga() {
        format!(
            "{} {} lat={:.7} lon={:.7} alt={:.1} m, {} sats, HDOP {:.1}, {}",
            s.sentence_type,
            nmea::format_time(&s.fields[0]),
            fix.latitude,
            fix.longitude,
            fix.altitude,
            fix.satellites,
            fix.hdop,
            fix.quality_description()
        )
    } else if s.sentence_type.ends_with("GSA") && s.fields.len() > 1 {
        format!("{} {}", s.sentence_type, nmea::fix_type_description(&s.fields[1]))
    } else {
        format!("{} ({} fields)", s.sentence_type, s.fields.len())
    };
    if !s.valid {
        out.push_str(" [invalid]");
    }
    if s.checksum_ok == Some(false) {
        out.push_str(" [checksum mismatch]");
    }
    out
}

fn describe_rtcm(m: &RtcmMessage) -> String {
    let name = rtcm::message_description(m.message_type);
    if let Some(station) = rtcm::decode_station(m) {
        let geo = station.geodetic();
        return format!(
            "RTCM {} {}: station {} lat={:.7} lon={:.7} h={:.3} m",
            m.message_type, name, station.station_id, geo.latitude, geo.longitude, geo.altitude
        );
    }
    if let Some(obs) = rtcm::decode_observations(m) {
        return format!(
            "RTCM {} {}: station {} epoch {} ms, {} sats ({} valid)",
            m.message_type,
            name,
            obs.station_id,
            obs.epoch_ms,
            obs.satellites.len(),
            obs.valid_satellites()
        );
    }
    if let Some(eph) = rtcm::decode_gps_ephemeris(m) {
        return format!(
            "RTCM {} {}: G{:02} week {} IODE {} toe {}",
            m.message_type, name, eph.satellite_id, eph.week, eph.iode, eph.toe
        );
    }
    format!("RTCM {} {} ({} bytes)", m.message_type, name, m.length)
}

fn describe_ubx(m: &UbxMessage) -> String {
    let name = ubx::message_description(m.class, m.id);
    match ubx::decode_nav_pvt(m) {
        Some(pvt) => format!(
            "UBX {}: {} lat={:.7} lon={:.7} hMSL={:.3} m, {} sats, hAcc {:.3} m",
            name,
            pvt.status(),
            pvt.latitude,
            pvt.longitude,
            pvt.height_msl,
            pvt.num_sv,
            pvt.h_acc
        ),
        None => format!("UBX {} ({} bytes)", name, m.length),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_protocol() {
        let nmea_frame = RawFrame {
            protocol: Protocol::Nmea,
            bytes: b"$GPGSA,A,3,04,05,,,,,,,,,,,2.5,1.3,2.1*39\r\n".to_vec(),
        };
        match decode(&nmea_frame) {
            Some(Message::Nmea(s)) => assert_eq!(s.sentence_type, "GPGSA"),
            other => panic!("unexpected {other:?}"),
        }

        let ubx_frame = RawFrame {
            protocol: Protocol::Ubx,
            bytes: vec![0xB5, 0x62, 0x06, 0x00, 0x00, 0x00, 0x06, 0x18],
        };
        assert!(matches!(decode(&ubx_frame), Some(Message::Ubx(_))));
    }

    #[test]
    fn test_frame_only_decoded_by_its_protocol() {
        // UBX bytes tagged as RTCM3 are rejected, not reinterpreted
        let frame = RawFrame {
            protocol: Protocol::Rtcm3,
            bytes: vec![0xB5, 0x62, 0x06, 0x00, 0x00, 0x00, 0x06, 0x18],
        };
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_describe_gga() {
        let s = nmea::parse_sentence(
            "$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
        )
        .unwrap();
        let text = describe(&Message::Nmea(s));
        assert!(text.starts_with("GNGGA 12:35:19"));
        assert!(text.contains("8 sats"));
        assert!(text.ends_with("[checksum mismatch]"));
    }

    #[test]
    fn test_describe_gsa() {
        let s = nmea::parse_sentence("$GPGSA,A,3,04,05,,,,,,,,,,,2.5,1.3,2.1").unwrap();
        assert_eq!(describe(&Message::Nmea(s)), "GPGSA 3D fix");
    }

    #[test]
    fn test_describe_rtcm_station() {
        let msg = rtcm::testutil::station_arp(2003, 4_278_000.1234, 651_000.5678, 4_672_000.9012);
        let text = describe(&Message::Rtcm(msg.clone()));
        assert!(text.starts_with("RTCM 1005 Stationary RTK Reference Station ARP: station 2003"));
        assert_eq!(
            kind_description(&Message::Rtcm(msg)),
            "Stationary RTK Reference Station ARP"
        );
    }

    #[test]
    fn test_describe_nav_pvt() {
        let msg = ubx::testutil::nav_pvt(3, 0x01, 9, 10.0, 20.0, 5.0);
        let text = describe(&Message::Ubx(msg));
        assert!(text.contains("single"));
        assert!(text.contains("9 sats"));
    }
}

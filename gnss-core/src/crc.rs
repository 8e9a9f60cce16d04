//! Checksums for the three wire protocols.
//!
//! - RTCM3: CRC-24Q, polynomial 0x1864CFB, init 0, no reflection, computed
//!   over header + payload and carried big-endian in the last 3 bytes.
//! - UBX: 8-bit Fletcher pair over class, id, length and payload.
//! - NMEA: XOR of every byte between `$` and `*`.

/// CRC-24Q generator without the implicit x^24 term.
const POLY: u32 = 0x864CFB;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

// ---------------------------------------------------------------------------
// RTCM3
// ---------------------------------------------------------------------------

/// CRC-24Q of `data`.
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }
    crc
}

/// Check the trailing CRC of a complete RTCM3 frame (header + payload + CRC).
pub fn rtcm_frame_crc_ok(frame: &[u8]) -> bool {
    if frame.len() < 6 {
        return false;
    }
    let body_len = frame.len() - 3;
    let expected = (frame[body_len] as u32) << 16
        | (frame[body_len + 1] as u32) << 8
        | frame[body_len + 2] as u32;
    crc24q(&frame[..body_len]) == expected
}

// ---------------------------------------------------------------------------
// UBX / NMEA
// ---------------------------------------------------------------------------

/// UBX Fletcher checksum `(CK_A, CK_B)` over class..payload.
pub fn ubx_checksum(data: &[u8]) -> (u8, u8) {
    let mut ck_a = 0u8;
    let mut ck_b = 0u8;
    for &b in data {
        ck_a = ck_a.wrapping_add(b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// NMEA checksum: XOR of the sentence body (without `$` and `*hh`).
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &b| acc ^ b)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

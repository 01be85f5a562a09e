use serde::Serialize;

use crate::sei::SeiCandidate;

/// Smallest payload that can hold every field we read.
pub const MIN_PAYLOAD_LEN: usize = 35;

/// Offset of the little-endian u16 seconds-since-midnight field.
const TS_OFFSET: usize = 24;
/// Offset of the camera name field.
const NAME_OFFSET: usize = 27;
/// Widest name field the encoder writes.
const NAME_MAX_LEN: usize = 32;

/// Camera identity and intra-day start time recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraMetadata {
    pub camera: String,
    /// Seconds since midnight at the moment recording started.
    pub start_seconds: u32,
}

impl CameraMetadata {
    /// Substituted when the stream carries no decodable record.
    pub fn fallback() -> Self {
        Self {
            camera: "NO CAMERA NAME".to_string(),
            start_seconds: 0,
        }
    }

    /// Start-of-recording wall clock as `HH:MM:SS`.
    pub fn start_time(&self) -> String {
        let hours = self.start_seconds / 3600;
        let minutes = (self.start_seconds % 3600) / 60;
        let seconds = self.start_seconds % 60;
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Decoding a candidate either yields metadata or rejects it; rejection is
/// an ordinary outcome, scanning just moves on to the next occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    Decoded(CameraMetadata),
    Rejected,
}

pub fn decode_candidate(candidate: &SeiCandidate<'_>) -> Decode {
    decode_payload(candidate.payload)
}

/// Validate the payload's structural signature and decode the camera name
/// and timestamp. Every check is a hard precondition for the next.
pub fn decode_payload(payload: &[u8]) -> Decode {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Decode::Rejected;
    }
    // Structural watermark: 0xAA 0xFF eight times over.
    if !payload[..16].chunks_exact(2).all(|pair| pair == [0xAA, 0xFF]) {
        return Decode::Rejected;
    }
    if payload[16..18] != [0xAA, 0xAA] {
        return Decode::Rejected;
    }
    // Format/version tag.
    if payload[18] != 0xAB || payload[19] != 0xB2 {
        return Decode::Rejected;
    }

    let start_seconds =
        u16::from_le_bytes([payload[TS_OFFSET], payload[TS_OFFSET + 1]]) as u32;

    let name_end = (NAME_OFFSET + NAME_MAX_LEN).min(payload.len());
    let name_field = &payload[NAME_OFFSET..name_end];
    match clean_name(name_field) {
        Some(camera) => Decode::Decoded(CameraMetadata {
            camera,
            start_seconds,
        }),
        None => Decode::Rejected,
    }
}

/// NUL-truncate, decode permissively, strip whitespace and non-printables,
/// drop the encoder's framing artifact. Names of two characters or fewer are
/// not trusted.
fn clean_name(field: &[u8]) -> Option<String> {
    let raw = field.split(|&b| b == 0).next().unwrap_or(&[]);
    let text = String::from_utf8_lossy(raw);
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_control() && *c != char::REPLACEMENT_CHARACTER)
        .collect();
    // The encoder's field framing leaks a leading 'i' into the name; it is
    // stripped unconditionally, so a camera genuinely named "iron" comes out
    // as "ron".
    let cleaned = match cleaned.strip_prefix('i') {
        Some(rest) => rest.to_string(),
        None => cleaned,
    };
    if cleaned.chars().count() > 2 {
        Some(cleaned)
    } else {
        None
    }
}

/// Build a conforming payload around a name and timestamp (test support).
#[cfg(test)]
pub(crate) fn make_payload(name: &[u8], start_seconds: u16) -> Vec<u8> {
    let mut p = Vec::new();
    for _ in 0..8 {
        p.extend_from_slice(&[0xAA, 0xFF]);
    }
    p.extend_from_slice(&[0xAA, 0xAA, 0xAB, 0xB2]);
    p.extend_from_slice(&[0x02, 0x00, 0xC8, 0x00]); // bytes 20..24
    p.extend_from_slice(&start_seconds.to_le_bytes()); // bytes 24..26
    p.push(0x00); // byte 26
    p.extend_from_slice(name);
    // NUL padding out to the full name field.
    p.resize(NAME_OFFSET + NAME_MAX_LEN, 0);
    p
}

//! # BerryMed Frame Protocol
//!
//! Wire format shared by both link types (BLE notifications and USB serial):
//!
//! ```text
//! 0x55 0xAA <LEN> <TYPE> <DATA...> <CHECKSUM>
//! ```
//!
//! `LEN` counts the TYPE byte, the DATA bytes and the checksum byte itself
//! plus one (`LEN = 2 + len(TYPE..DATA)`), so a whole frame occupies
//! `LEN + 2` bytes on the wire. The checksum is the one's complement (mod
//! 256) of `LEN` plus every TYPE/DATA byte.
//!
//! Outbound command frames always carry exactly one parameter byte, e.g. the
//! NIBP start command `55 AA 04 02 01 F8`.
//!
//! This module holds the frame model and encoding; incremental decoding and
//! resynchronization live in [`decoder`], semantic interpretation in
//! [`interpreter`].

pub mod decoder;
pub mod interpreter;

/// Frame header bytes preceding every packet in both directions.
pub const FRAME_HEADER: [u8; 2] = [0x55, 0xAA];

/// Smallest frame that can exist on the wire: header + LEN + checksum.
pub const MIN_FRAME_LEN: usize = 4;

/// Command type byte controlling NIBP measurement (start/stop).
pub const CMD_NIBP: u8 = 0x02;
/// Parameter byte starting an NIBP measurement cycle.
pub const NIBP_START: u8 = 0x01;
/// Parameter byte aborting an in-flight NIBP measurement.
pub const NIBP_STOP: u8 = 0x00;

/// Channel-enable command sequence sent after opening the serial link.
///
/// The enable codes are not the same table as the receive packet types (the
/// ECG waveform enable is 0xFB while decoded ECG waveform frames arrive as
/// type 0x01); the two tables are kept independent on purpose.
pub const ENABLE_SEQUENCE: &[(u8, u8)] = &[
    (0x01, 0x01), // ECG parameters
    (0x02, 0x01), // NIBP parameters
    (0x03, 0x01), // SpO2 parameters
    (0x04, 0x01), // Temperature parameters
    (0xFB, 0x01), // ECG waveform
    (0xFE, 0x01), // SpO2 waveform
    (0xFF, 0x01), // Respiration waveform
];

/// Semantic classification of the frame TYPE byte.
///
/// Codes outside this table are still valid frames; they decode to no
/// state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    EcgWaveform,
    EcgParams,
    NibpParams,
    Spo2Params,
    TempParams,
    EcgPeak,
    Spo2Peak,
    Spo2Waveform,
    RespWaveform,
}

impl PacketType {
    /// Map a TYPE byte to its semantic meaning, `None` for unknown codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PacketType::EcgWaveform),
            0x02 => Some(PacketType::EcgParams),
            0x03 => Some(PacketType::NibpParams),
            0x04 => Some(PacketType::Spo2Params),
            0x05 => Some(PacketType::TempParams),
            0x30 => Some(PacketType::EcgPeak),
            0x31 => Some(PacketType::Spo2Peak),
            0xFE => Some(PacketType::Spo2Waveform),
            0xFF => Some(PacketType::RespWaveform),
            _ => None,
        }
    }
}

/// One validated protocol frame. Header, length and checksum have already
/// been consumed and verified; only the semantic content remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Semantic packet type, if the TYPE byte is a known code.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_code(self.frame_type)
    }
}

/// Checksum over the LEN byte and the TYPE/DATA bytes.
pub fn checksum(len: u8, type_and_data: &[u8]) -> u8 {
    let sum: u32 = len as u32 + type_and_data.iter().map(|&b| b as u32).sum::<u32>();
    !(sum as u8)
}

/// Encode a frame for the wire: header, LEN, TYPE, DATA, checksum.
pub fn encode_frame(frame_type: u8, data: &[u8]) -> Vec<u8> {
    let len = (2 + 1 + data.len()) as u8;
    let mut out = Vec::with_capacity(data.len() + 5);
    out.extend_from_slice(&FRAME_HEADER);
    out.push(len);
    out.push(frame_type);
    out.extend_from_slice(data);
    let mut summed = Vec::with_capacity(data.len() + 1);
    summed.push(frame_type);
    summed.extend_from_slice(data);
    out.push(checksum(len, &summed));
    out
}

/// Encode a one-parameter command frame (`LEN = 4`).
pub fn encode_command(cmd: u8, param: u8) -> Vec<u8> {
    encode_frame(cmd, &[param])
}

#[cfg(test)]
mod tests {
    use super::decoder::FrameDecoder;
    use super::*;

    #[test]
    fn nibp_start_command_matches_device_documentation() {
        assert_eq!(
            encode_command(CMD_NIBP, NIBP_START),
            vec![0x55, 0xAA, 0x04, 0x02, 0x01, 0xF8]
        );
    }

    #[test]
    fn checksum_round_trip() {
        // Encode arbitrary (type, data) pairs and decode them back.
        let cases: &[(u8, &[u8])] = &[
            (0x02, &[0x48, 0x32, 0x1E]),
            (0x04, &[0x00, 0x62, 0x4B]),
            (0x30, &[]),
            (0xFE, &[0x7F]),
            (0xAB, &[1, 2, 3, 4, 5, 6, 7]),
        ];
        for (frame_type, data) in cases {
            let wire = encode_frame(*frame_type, data);
            let mut dec = FrameDecoder::new();
            let frames = dec.feed(&wire);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].frame_type, *frame_type);
            assert_eq!(frames[0].payload, *data);
        }
    }

    #[test]
    fn unknown_type_codes_have_no_semantics() {
        assert_eq!(PacketType::from_code(0x77), None);
        assert_eq!(PacketType::from_code(0x02), Some(PacketType::EcgParams));
        assert_eq!(PacketType::from_code(0xFF), Some(PacketType::RespWaveform));
    }
}

//! End-to-end decode scenarios over realistic byte streams: interleaved
//! garbage, arbitrary chunking and mixed packet types, exercised through the
//! public decoder/interpreter API.

use std::sync::{Arc, Mutex};

use berrybridge::protocol::decoder::FrameDecoder;
use berrybridge::protocol::interpreter::PacketInterpreter;
use berrybridge::protocol::{encode_frame, Frame};
use berrybridge::vitals::VitalsState;

/// Feed a stream in chunks of cycling sizes and collect everything decoded.
fn decode_chunked(stream: &[u8], sizes: &[usize]) -> Vec<Frame> {
    let mut dec = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    let mut i = 0;
    while offset < stream.len() {
        let size = sizes[i % sizes.len()].min(stream.len() - offset);
        frames.extend(dec.feed(&stream[offset..offset + size]));
        offset += size;
        i += 1;
    }
    frames
}

#[test]
fn garbage_laced_stream_yields_frames_in_order_once() {
    let mut stream = Vec::new();
    // 60 frames of rotating types, each preceded by noise containing a
    // stray 0x55, a stray 0xAA and a reversed header, none of which can
    // pair up into a real `55 AA` even across frame boundaries.
    for i in 0..60u8 {
        stream.extend_from_slice(&[0x00, 0xAA, 0x55, 0x13]);
        let frame = match i % 3 {
            0 => encode_frame(0x01, &[i]),
            1 => encode_frame(0x02, &[0x00, i, i / 2]),
            _ => encode_frame(0xFE, &[i]),
        };
        stream.extend_from_slice(&frame);
    }
    stream.extend_from_slice(&[0x55, 0xAA]); // trailing partial header

    for sizes in [&[1usize][..], &[2, 3, 5, 7][..], &[64][..], &[stream.len()][..]] {
        let frames = decode_chunked(&stream, sizes);
        assert_eq!(frames.len(), 60, "chunk sizes {:?}", sizes);
        for (i, frame) in frames.iter().enumerate() {
            let tag = match i % 3 {
                0 => frame.payload[0],
                1 => frame.payload[1],
                _ => frame.payload[0],
            };
            assert_eq!(tag, i as u8, "frame {} out of order", i);
        }
    }
}

#[test]
fn documented_ecg_frame_decodes_and_corruption_is_dropped() {
    // 55 AA 06 02 48 32 1E 5F: ECG params, states=0x48, HR=50, RR=30.
    let wire = [0x55, 0xAA, 0x06, 0x02, 0x48, 0x32, 0x1E, 0x5F];
    assert_eq!(encode_frame(0x02, &[0x48, 0x32, 0x1E]), wire);

    let vitals = Arc::new(Mutex::new(VitalsState::new()));
    let mut interp = PacketInterpreter::new(vitals.clone());
    let mut dec = FrameDecoder::new();

    for frame in dec.feed(&wire) {
        interp.apply_at(&frame, 0);
    }
    {
        let signs = vitals.lock().unwrap().snapshot().vital_signs;
        assert_eq!(signs.heart_rate, "50");
        assert_eq!(signs.resp_rate, "30");
    }

    // Same frame with a corrupted trailing byte and different rates: it
    // must vanish without touching the decoded state.
    let mut corrupted = encode_frame(0x02, &[0x48, 0x55, 0x28]);
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x40;
    for frame in dec.feed(&corrupted) {
        interp.apply_at(&frame, 0);
    }
    let signs = vitals.lock().unwrap().snapshot().vital_signs;
    assert_eq!(signs.heart_rate, "50");
    assert_eq!(signs.resp_rate, "30");
}

#[test]
fn mixed_session_traffic_builds_full_snapshot() {
    let vitals = Arc::new(Mutex::new(VitalsState::new()));
    let mut interp = PacketInterpreter::new(vitals.clone());
    let mut dec = FrameDecoder::new();

    let mut stream = Vec::new();
    for i in 0..30u8 {
        stream.extend_from_slice(&encode_frame(0x01, &[i])); // ECG wave
        stream.extend_from_slice(&encode_frame(0xFE, &[i])); // SpO2 wave
        stream.extend_from_slice(&encode_frame(0xFF, &[i])); // Resp wave
    }
    stream.extend_from_slice(&encode_frame(0x02, &[0x00, 72, 16]));
    stream.extend_from_slice(&encode_frame(0x04, &[0x00, 98, 70]));
    stream.extend_from_slice(&encode_frame(0x05, &[0x00, 36, 6]));
    stream.extend_from_slice(&encode_frame(0x03, &[0x00, 60, 118, 92, 79]));
    stream.extend_from_slice(&encode_frame(0x42, &[1, 2, 3])); // unknown type

    for frame in dec.feed(&stream) {
        interp.apply_at(&frame, 100);
    }

    let snap = vitals.lock().unwrap().snapshot();
    assert_eq!(snap.ecg.len(), 25);
    assert_eq!(snap.spo2.len(), 25);
    assert_eq!(snap.resp.len(), 25);
    assert_eq!(snap.vital_signs.heart_rate, "72");
    assert_eq!(snap.vital_signs.resp_rate, "16");
    assert_eq!(snap.vital_signs.spo2_pulse, "98/70");
    assert_eq!(snap.vital_signs.temperature, "36.6");
    assert_eq!(snap.vital_signs.nibp, "118/79");
}

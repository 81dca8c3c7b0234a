//! Semantic interpretation of validated frames.
//!
//! [`PacketInterpreter`] maps a frame's TYPE byte onto a [`VitalsState`]
//! mutation and fires the registered handler for that packet type with the
//! decoded values (never raw bytes). Handlers live in a
//! [`CallbackRegistry`] with one optional slot per [`PacketType`] variant;
//! an unset slot is a no-op, not an error.
//!
//! Display formatting rules implemented here:
//! - a raw value of 0 renders as `-` (no valid reading);
//! - temperature is `(int*10 + decile)/10.0` with one decimal place;
//! - SpO2 above 100 means the finger sensor is disconnected and forces the
//!   `- - /- -` sentinel instead of formatting the bogus numbers;
//! - a NIBP packet with both systolic and diastolic zero never clobbers the
//!   last real reading.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::{Frame, PacketType};
use crate::vitals::{VitalsState, WaveformKind, SENTINEL_PAIR};

/// Decoded values handed to event handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// One time-step of a continuous signal (ECG/SpO2/respiration).
    Waveform { sample: u8 },
    Ecg {
        states: u8,
        heart_rate: u8,
        resp_rate: u8,
    },
    Nibp {
        states: u8,
        cuff_pressure: u16,
        systolic: u8,
        mean: u8,
        diastolic: u8,
    },
    Spo2 {
        states: u8,
        spo2: u8,
        pulse: u8,
    },
    Temp {
        states: u8,
        celsius: f32,
    },
    /// Beat marker carrying no values.
    Peak,
}

pub type EventHandler = Box<dyn Fn(&EventPayload) + Send + Sync>;

const SLOT_COUNT: usize = 9;

fn slot_index(packet_type: PacketType) -> usize {
    match packet_type {
        PacketType::EcgWaveform => 0,
        PacketType::EcgParams => 1,
        PacketType::NibpParams => 2,
        PacketType::Spo2Params => 3,
        PacketType::TempParams => 4,
        PacketType::EcgPeak => 5,
        PacketType::Spo2Peak => 6,
        PacketType::Spo2Waveform => 7,
        PacketType::RespWaveform => 8,
    }
}

/// One optional handler per packet type, defaulting to no-op.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: [Option<EventHandler>; SLOT_COUNT],
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the handler for one packet type.
    pub fn register(&mut self, packet_type: PacketType, handler: EventHandler) {
        self.slots[slot_index(packet_type)] = Some(handler);
    }

    fn fire(&self, packet_type: PacketType, payload: &EventPayload) {
        if let Some(handler) = &self.slots[slot_index(packet_type)] {
            handler(payload);
        }
    }
}

/// Convert 0 to `-` or format the value as its decimal string.
fn format_value(value: u8) -> String {
    if value == 0 {
        "-".to_string()
    } else {
        value.to_string()
    }
}

/// Single writer of the vitals state: applies validated frames and
/// dispatches typed callbacks.
pub struct PacketInterpreter {
    vitals: Arc<Mutex<VitalsState>>,
    callbacks: CallbackRegistry,
}

impl PacketInterpreter {
    pub fn new(vitals: Arc<Mutex<VitalsState>>) -> Self {
        Self {
            vitals,
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn register(&mut self, packet_type: PacketType, handler: EventHandler) {
        self.callbacks.register(packet_type, handler);
    }

    /// Apply a frame against the current wall clock.
    pub fn apply(&mut self, frame: &Frame) -> Option<(PacketType, EventPayload)> {
        self.apply_at(frame, chrono::Utc::now().timestamp())
    }

    /// Apply a frame with an explicit wall-clock second (drives the
    /// per-second waveform throttle; injectable for tests).
    pub fn apply_at(&mut self, frame: &Frame, epoch_sec: i64) -> Option<(PacketType, EventPayload)> {
        let packet_type = frame.packet_type()?;
        let payload = match packet_type {
            PacketType::EcgWaveform => self.waveform(frame, WaveformKind::Ecg, epoch_sec)?,
            PacketType::Spo2Waveform => self.waveform(frame, WaveformKind::Spo2, epoch_sec)?,
            PacketType::RespWaveform => self.waveform(frame, WaveformKind::Resp, epoch_sec)?,
            PacketType::EcgParams => self.ecg_params(frame)?,
            PacketType::NibpParams => self.nibp_params(frame)?,
            PacketType::Spo2Params => self.spo2_params(frame)?,
            PacketType::TempParams => self.temp_params(frame)?,
            PacketType::EcgPeak | PacketType::Spo2Peak => EventPayload::Peak,
        };
        self.callbacks.fire(packet_type, &payload);
        Some((packet_type, payload))
    }

    fn waveform(
        &mut self,
        frame: &Frame,
        kind: WaveformKind,
        epoch_sec: i64,
    ) -> Option<EventPayload> {
        let sample = match frame.payload.first() {
            Some(&s) => s,
            None => {
                warn!("waveform frame {:#04x} without sample byte", frame.frame_type);
                return None;
            }
        };
        self.vitals
            .lock()
            .unwrap()
            .push_waveform(kind, sample, epoch_sec);
        Some(EventPayload::Waveform { sample })
    }

    fn ecg_params(&mut self, frame: &Frame) -> Option<EventPayload> {
        let [states, heart_rate, resp_rate] = *Self::fixed::<3>(frame)?;
        {
            let mut vitals = self.vitals.lock().unwrap();
            vitals.set_cardiac(format_value(heart_rate), format_value(resp_rate));
        }
        Some(EventPayload::Ecg {
            states,
            heart_rate,
            resp_rate,
        })
    }

    fn spo2_params(&mut self, frame: &Frame) -> Option<EventPayload> {
        let [states, spo2, pulse] = *Self::fixed::<3>(frame)?;
        {
            let mut vitals = self.vitals.lock().unwrap();
            if spo2 > 100 {
                // Probe off finger: the device reports an out-of-range value.
                vitals.set_spo2_pulse(SENTINEL_PAIR.to_string());
            } else {
                vitals.set_spo2_pulse(format!("{}/{}", format_value(spo2), format_value(pulse)));
            }
        }
        Some(EventPayload::Spo2 {
            states,
            spo2,
            pulse,
        })
    }

    fn temp_params(&mut self, frame: &Frame) -> Option<EventPayload> {
        let [states, int_part, decile] = *Self::fixed::<3>(frame)?;
        let celsius = (int_part as u16 * 10 + decile as u16) as f32 / 10.0;
        {
            let mut vitals = self.vitals.lock().unwrap();
            let display = if celsius == 0.0 {
                "-".to_string()
            } else {
                format!("{:.1}", celsius)
            };
            vitals.set_temperature(display);
        }
        Some(EventPayload::Temp { states, celsius })
    }

    fn nibp_params(&mut self, frame: &Frame) -> Option<EventPayload> {
        let [states, cuff_raw, systolic, mean, diastolic] = *Self::fixed::<5>(frame)?;
        // Cuff pressure arrives half-scale.
        let cuff_pressure = cuff_raw as u16 * 2;
        if systolic != 0 || diastolic != 0 {
            let mut vitals = self.vitals.lock().unwrap();
            vitals.set_nibp(format!(
                "{}/{}",
                format_value(systolic),
                format_value(diastolic)
            ));
        } else {
            debug!("zeroed NIBP packet, keeping last displayed reading");
        }
        Some(EventPayload::Nibp {
            states,
            cuff_pressure,
            systolic,
            mean,
            diastolic,
        })
    }

    fn fixed<const N: usize>(frame: &Frame) -> Option<&[u8; N]> {
        match frame.payload.first_chunk::<N>() {
            Some(bytes) => Some(bytes),
            None => {
                warn!(
                    "short payload for frame type {:#04x}: {} bytes, need {}",
                    frame.frame_type,
                    frame.payload.len(),
                    N
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::FrameDecoder;
    use crate::protocol::encode_frame;

    fn interpreter() -> (PacketInterpreter, Arc<Mutex<VitalsState>>) {
        let vitals = Arc::new(Mutex::new(VitalsState::new()));
        (PacketInterpreter::new(vitals.clone()), vitals)
    }

    fn frame(frame_type: u8, payload: &[u8]) -> Frame {
        Frame {
            frame_type,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn ecg_params_end_to_end() {
        // 55 AA 06 02 48 32 1E <checksum> per the device protocol notes.
        let wire = encode_frame(0x02, &[0x48, 0x32, 0x1E]);
        let mut dec = FrameDecoder::new();
        let (mut interp, vitals) = interpreter();
        for f in dec.feed(&wire) {
            interp.apply_at(&f, 0);
        }
        let signs = vitals.lock().unwrap().snapshot().vital_signs;
        assert_eq!(signs.heart_rate, "50");
        assert_eq!(signs.resp_rate, "30");
    }

    #[test]
    fn corrupted_frame_leaves_state_untouched() {
        let (mut interp, vitals) = interpreter();
        interp.apply_at(&frame(0x02, &[0x00, 0x48, 0x14]), 0);
        assert_eq!(vitals.lock().unwrap().signs().heart_rate, "72");

        let mut wire = encode_frame(0x02, &[0x00, 0x32, 0x1E]);
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let mut dec = FrameDecoder::new();
        for f in dec.feed(&wire) {
            interp.apply_at(&f, 0);
        }
        // Frame never decoded, heart rate still the previous reading.
        assert_eq!(vitals.lock().unwrap().signs().heart_rate, "72");
    }

    #[test]
    fn zero_values_render_sentinel_dash() {
        let (mut interp, vitals) = interpreter();
        interp.apply_at(&frame(0x02, &[0x00, 0x00, 0x1E]), 0);
        let signs = vitals.lock().unwrap().snapshot().vital_signs;
        assert_eq!(signs.heart_rate, "-");
        assert_eq!(signs.resp_rate, "30");
    }

    #[test]
    fn spo2_above_100_is_disconnected_sensor() {
        let (mut interp, vitals) = interpreter();
        interp.apply_at(&frame(0x04, &[0x00, 150, 80]), 0);
        assert_eq!(vitals.lock().unwrap().signs().spo2_pulse, "- - /- -");

        interp.apply_at(&frame(0x04, &[0x00, 98, 72]), 0);
        assert_eq!(vitals.lock().unwrap().signs().spo2_pulse, "98/72");
    }

    #[test]
    fn zeroed_nibp_packet_does_not_clobber_reading() {
        let (mut interp, vitals) = interpreter();
        interp.apply_at(&frame(0x03, &[0x00, 60, 113, 90, 76]), 0);
        assert_eq!(vitals.lock().unwrap().signs().nibp, "113/76");

        interp.apply_at(&frame(0x03, &[0x00, 0, 0, 0, 0]), 0);
        assert_eq!(vitals.lock().unwrap().signs().nibp, "113/76");
    }

    #[test]
    fn temperature_decodes_with_one_decimal() {
        let (mut interp, vitals) = interpreter();
        interp.apply_at(&frame(0x05, &[0x00, 36, 8]), 0);
        assert_eq!(vitals.lock().unwrap().signs().temperature, "36.8");

        interp.apply_at(&frame(0x05, &[0x00, 0, 0]), 0);
        assert_eq!(vitals.lock().unwrap().signs().temperature, "-");
    }

    #[test]
    fn waveform_samples_store_and_throttle() {
        let (mut interp, vitals) = interpreter();
        for i in 0..40u8 {
            interp.apply_at(&frame(0xFE, &[i]), 5);
        }
        assert_eq!(vitals.lock().unwrap().snapshot().spo2.len(), 25);
        // Next second starts over with the new sample.
        interp.apply_at(&frame(0xFE, &[7]), 6);
        assert_eq!(vitals.lock().unwrap().snapshot().spo2, vec![7]);
    }

    #[test]
    fn callbacks_receive_decoded_values() {
        let (mut interp, _vitals) = interpreter();
        let seen: Arc<Mutex<Vec<EventPayload>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        interp.register(
            PacketType::NibpParams,
            Box::new(move |payload| sink.lock().unwrap().push(payload.clone())),
        );
        interp.apply_at(&frame(0x03, &[0x01, 60, 113, 90, 76]), 0);
        let events = seen.lock().unwrap();
        assert_eq!(
            events[0],
            EventPayload::Nibp {
                states: 0x01,
                cuff_pressure: 120,
                systolic: 113,
                mean: 90,
                diastolic: 76,
            }
        );
    }

    #[test]
    fn peak_markers_fire_event_only() {
        let (mut interp, vitals) = interpreter();
        let fired = Arc::new(Mutex::new(0u32));
        let sink = fired.clone();
        interp.register(
            PacketType::EcgPeak,
            Box::new(move |payload| {
                assert_eq!(*payload, EventPayload::Peak);
                *sink.lock().unwrap() += 1;
            }),
        );
        interp.apply_at(&frame(0x30, &[]), 0);
        assert_eq!(*fired.lock().unwrap(), 1);
        // No state change from a peak marker.
        assert_eq!(
            vitals.lock().unwrap().snapshot().vital_signs,
            crate::vitals::VitalSigns::default()
        );
    }

    #[test]
    fn unknown_and_short_frames_are_ignored() {
        let (mut interp, vitals) = interpreter();
        assert!(interp.apply_at(&frame(0x77, &[1, 2, 3]), 0).is_none());
        assert!(interp.apply_at(&frame(0x02, &[0x00]), 0).is_none());
        assert_eq!(
            vitals.lock().unwrap().snapshot().vital_signs,
            crate::vitals::VitalSigns::default()
        );
    }
}

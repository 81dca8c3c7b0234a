//! Current-vitals snapshot shared with the forwarding layer.
//!
//! [`VitalsState`] aggregates the three waveform buffers and the display
//! values of the scalar vital signs. The packet interpreter is its only
//! writer; external consumers read cloned [`VitalsSnapshot`]s, which
//! serialize with the camelCase keys the forwarding API expects.
//!
//! Waveform buffers are throttled to [`MAX_WAVEFORM_POINTS`] samples per
//! wall-clock second: the first sample of a new second replaces the previous
//! second's buffer, and samples beyond the cap within one second are dropped
//! rather than queued.

use serde::Serialize;

/// Cap on stored waveform samples per wall-clock second.
pub const MAX_WAVEFORM_POINTS: usize = 25;

/// Display sentinel for a scalar with no valid reading.
pub const SENTINEL_SCALAR: &str = "- -";
/// Display sentinel for a compound (pair) field with no valid reading.
pub const SENTINEL_PAIR: &str = "- - /- -";

/// Which continuous signal a waveform sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformKind {
    Ecg,
    Spo2,
    Resp,
}

/// Display strings for the scalar vital signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSigns {
    pub heart_rate: String,
    pub nibp: String,
    pub spo2_pulse: String,
    pub temperature: String,
    pub resp_rate: String,
}

impl Default for VitalSigns {
    fn default() -> Self {
        Self {
            heart_rate: SENTINEL_SCALAR.into(),
            nibp: SENTINEL_PAIR.into(),
            spo2_pulse: SENTINEL_PAIR.into(),
            temperature: SENTINEL_SCALAR.into(),
            resp_rate: SENTINEL_SCALAR.into(),
        }
    }
}

#[derive(Debug, Default)]
struct WaveformBuffer {
    samples: Vec<u8>,
    last_sec: i64,
}

impl WaveformBuffer {
    fn push(&mut self, sample: u8, epoch_sec: i64) {
        if epoch_sec != self.last_sec {
            self.samples.clear();
            self.last_sec = epoch_sec;
        }
        if self.samples.len() < MAX_WAVEFORM_POINTS {
            self.samples.push(sample);
        }
    }
}

/// Immutable copy of the current vitals, safe to hand across task and
/// serialization boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct VitalsSnapshot {
    pub spo2: Vec<u8>,
    pub ecg: Vec<u8>,
    pub resp: Vec<u8>,
    #[serde(rename = "vitalSigns")]
    pub vital_signs: VitalSigns,
}

/// Mutable aggregate of the monitoring session. One writer (the packet
/// interpreter); everyone else reads snapshots.
#[derive(Debug, Default)]
pub struct VitalsState {
    spo2: WaveformBuffer,
    ecg: WaveformBuffer,
    resp: WaveformBuffer,
    signs: VitalSigns,
}

impl VitalsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one waveform sample, applying the per-second throttle.
    pub fn push_waveform(&mut self, kind: WaveformKind, sample: u8, epoch_sec: i64) {
        let buf = match kind {
            WaveformKind::Ecg => &mut self.ecg,
            WaveformKind::Spo2 => &mut self.spo2,
            WaveformKind::Resp => &mut self.resp,
        };
        buf.push(sample, epoch_sec);
    }

    pub fn set_cardiac(&mut self, heart_rate: String, resp_rate: String) {
        self.signs.heart_rate = heart_rate;
        self.signs.resp_rate = resp_rate;
    }

    pub fn set_spo2_pulse(&mut self, value: String) {
        self.signs.spo2_pulse = value;
    }

    pub fn set_temperature(&mut self, value: String) {
        self.signs.temperature = value;
    }

    pub fn set_nibp(&mut self, value: String) {
        self.signs.nibp = value;
    }

    pub fn signs(&self) -> &VitalSigns {
        &self.signs
    }

    /// Clone out the current state.
    pub fn snapshot(&self) -> VitalsSnapshot {
        VitalsSnapshot {
            spo2: self.spo2.samples.clone(),
            ecg: self.ecg.samples.clone(),
            resp: self.resp.samples.clone(),
            vital_signs: self.signs.clone(),
        }
    }

    /// Return every field to its session default.
    pub fn reset(&mut self) {
        self.spo2 = WaveformBuffer::default();
        self.ecg = WaveformBuffer::default();
        self.resp = WaveformBuffer::default();
        self.signs = VitalSigns::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_throttles_to_cap_within_one_second() {
        let mut state = VitalsState::new();
        for i in 0..40u8 {
            state.push_waveform(WaveformKind::Ecg, i, 1000);
        }
        let snap = state.snapshot();
        assert_eq!(snap.ecg.len(), MAX_WAVEFORM_POINTS);
        assert_eq!(snap.ecg[0], 0);
        assert_eq!(snap.ecg[24], 24);
    }

    #[test]
    fn new_second_clears_previous_buffer() {
        let mut state = VitalsState::new();
        for i in 0..10u8 {
            state.push_waveform(WaveformKind::Spo2, i, 1000);
        }
        state.push_waveform(WaveformKind::Spo2, 99, 1001);
        let snap = state.snapshot();
        assert_eq!(snap.spo2, vec![99]);
    }

    #[test]
    fn buffers_throttle_independently() {
        let mut state = VitalsState::new();
        state.push_waveform(WaveformKind::Ecg, 1, 1000);
        state.push_waveform(WaveformKind::Resp, 2, 1001);
        let snap = state.snapshot();
        assert_eq!(snap.ecg, vec![1]);
        assert_eq!(snap.resp, vec![2]);
    }

    #[test]
    fn reset_restores_session_defaults() {
        let mut state = VitalsState::new();
        state.set_cardiac("72".into(), "16".into());
        state.set_nibp("113/76".into());
        state.push_waveform(WaveformKind::Ecg, 5, 1000);
        state.reset();
        let snap = state.snapshot();
        assert!(snap.ecg.is_empty());
        assert_eq!(snap.vital_signs, VitalSigns::default());
        assert_eq!(snap.vital_signs.heart_rate, SENTINEL_SCALAR);
        assert_eq!(snap.vital_signs.nibp, SENTINEL_PAIR);
    }

    #[test]
    fn snapshot_serializes_with_forwarding_keys() {
        let state = VitalsState::new();
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert!(json.get("vitalSigns").is_some());
        let signs = &json["vitalSigns"];
        assert_eq!(signs["heartRate"], "- -");
        assert_eq!(signs["spo2Pulse"], "- - /- -");
        assert_eq!(signs["respRate"], "- -");
    }
}

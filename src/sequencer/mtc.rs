// MTC quarter frame generation
// Encodes the engine's millisecond position into rotating quarter frame
// messages on the nearest millisecond. Jitter is minimal at 25 fps and up
// to half a millisecond at 24 and 30 fps, plus scheduling jitter.

use crate::midi::message::{MidiError, MidiMessage};
use crate::midi::target::MidiTransport;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// MTC frame rate
///
/// The code is the two-bit rate field carried in quarter frame piece 7 and
/// in full frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRate {
    Fps24,
    Fps25,
    Fps30Drop,
    Fps30,
}

impl FrameRate {
    pub fn fps(&self) -> f64 {
        match self {
            FrameRate::Fps24 => 24.0,
            FrameRate::Fps25 => 25.0,
            FrameRate::Fps30Drop => 29.97,
            FrameRate::Fps30 => 30.0,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            FrameRate::Fps24 => 0,
            FrameRate::Fps25 => 1,
            FrameRate::Fps30Drop => 2,
            FrameRate::Fps30 => 3,
        }
    }

    pub fn is_drop_frame(&self) -> bool {
        matches!(self, FrameRate::Fps30Drop)
    }

    fn from_code(code: u8) -> FrameRate {
        match code & 0x03 {
            0 => FrameRate::Fps24,
            1 => FrameRate::Fps25,
            2 => FrameRate::Fps30Drop,
            _ => FrameRate::Fps30,
        }
    }
}

/// An hh:mm:ss:ff timecode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MtcTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl MtcTime {
    pub fn clear(&mut self) {
        *self = MtcTime::default();
    }

    /// Decompose a millisecond position into timecode at the given rate
    pub fn from_millis(millis: u64, rate: FrameRate) -> Self {
        let mspf = 1000.0 / rate.fps();
        let frames = ((millis % 1000) as f64 / mspf).round() as u8;
        let s = millis / 1000;
        let m = s / 60;
        let h = m / 60;
        Self {
            hours: (h % 24) as u8,
            minutes: (m % 60) as u8,
            seconds: (s % 60) as u8,
            frames,
        }
    }

    /// Payload nibble for quarter frame `piece` 0..=7
    fn piece(&self, piece: u8, rate: FrameRate) -> u8 {
        match piece {
            0 => self.frames & 0x0F,
            1 => self.frames >> 4,
            2 => self.seconds & 0x0F,
            3 => self.seconds >> 4,
            4 => self.minutes & 0x0F,
            5 => self.minutes >> 4,
            6 => self.hours & 0x0F,
            _ => (self.hours >> 4) | (rate.code() << 1),
        }
    }
}

/// Shared knobs a control thread may turn while the engine is running
pub(crate) struct MtcShared {
    enabled: AtomicBool,
    requested_rate: AtomicU8,
}

impl MtcShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(false),
            requested_rate: AtomicU8::new(FrameRate::Fps25.code()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn request_rate(&self, rate: FrameRate) {
        self.requested_rate.store(rate.code(), Ordering::Relaxed);
    }

    pub fn requested_rate(&self) -> FrameRate {
        FrameRate::from_code(self.requested_rate.load(Ordering::Relaxed))
    }
}

/// Quarter frame encoder, driven once per engine iteration
pub(crate) struct MtcGenerator {
    shared: Arc<MtcShared>,
    port: Box<dyn MidiTransport>,
    rate: FrameRate,
    mspf: f64,  // milliseconds per frame
    qfpms: f64, // quarter frames per millisecond
    prev_qf: i32,
    time: MtcTime,
    failures: u64,
}

impl MtcGenerator {
    pub fn new(shared: Arc<MtcShared>, port: Box<dyn MidiTransport>) -> Self {
        let mut generator = Self {
            shared,
            port,
            rate: FrameRate::Fps25,
            mspf: 0.0,
            qfpms: 0.0,
            prev_qf: -1,
            time: MtcTime::default(),
            failures: 0,
        };
        generator.apply_rate(FrameRate::Fps25);
        generator
    }

    /// Switch the effective rate. While running this is only called from
    /// the real-time thread via `check`; a control thread may call it
    /// directly when stopped.
    pub fn apply_rate(&mut self, rate: FrameRate) {
        self.rate = rate;
        self.mspf = 1000.0 / rate.fps();
        self.qfpms = 4.0 / self.mspf;
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    /// Emit a quarter frame if one is due at this millisecond position
    pub fn check(&mut self, millis: u64) {
        // rate changes are deferred to here so they swap in synchronously
        // with the real-time thread
        let requested = self.shared.requested_rate();
        if requested != self.rate {
            self.apply_rate(requested);
        }
        // eight quarter frames span two frames. The modulus by 250 keeps
        // the arithmetic exact over long runs, every supported rate emits
        // an integral number of quarter frames per 250 ms.
        let f = ((millis % 250) as f64 / self.mspf) % 2.0;
        // add half a quarter frame per millisecond so the quarter frame is
        // detected on the nearest millisecond
        let qff = self.qfpms / 2.0 + 4.0 * f;
        let qf = (qff as i64 % 8) as i32;
        if qf == self.prev_qf {
            return;
        }
        if qf == 0 {
            // cache the time for all eight pieces of this rotation
            self.time = MtcTime::from_millis(millis, self.rate);
        }
        match MidiMessage::quarter_frame(qf as u8, self.time.piece(qf as u8, self.rate)) {
            Ok(msg) => self.send(&msg),
            Err(e) => self.record_failure(e),
        }
        self.prev_qf = qf;
    }

    /// Full timecode frame at 00:00:00:00, sent on rewind
    pub fn send_full_frame(&mut self) {
        self.time.clear();
        let t = self.time;
        match MidiMessage::sysex(vec![
            0xF0,
            0x7F,
            0x7F, // device id: all call
            0x01,
            0x01,
            (self.rate.code() << 5) | t.hours,
            t.minutes,
            t.seconds,
            t.frames,
            0xF7,
        ]) {
            Ok(msg) => self.send(&msg),
            Err(e) => self.record_failure(e),
        }
    }

    fn send(&mut self, msg: &MidiMessage) {
        if let Err(e) = self.port.transport(msg, 0) {
            self.record_failure(e);
        }
    }

    fn record_failure(&mut self, error: MidiError) {
        self.failures += 1;
        if self.failures == 1 {
            log::warn!("failed to send MTC message: {}", error);
        }
    }
}

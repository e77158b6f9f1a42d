// Shared playback state
// Written by the engine thread, read from anywhere, all atomics so the
// real-time path never takes a lock

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) const DEFAULT_BPM: f64 = 120.0;

/// State shared between the engine thread, control threads, and an
/// external clock producer
#[derive(Debug)]
pub(crate) struct SharedState {
    running: AtomicBool,
    tick_position: AtomicI64,
    micros_position: AtomicU64,
    bpm_bits: AtomicU64,
    tempo_factor_bits: AtomicU64,
    stop_on_empty: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            tick_position: AtomicI64::new(0),
            micros_position: AtomicU64::new(0),
            bpm_bits: AtomicU64::new(DEFAULT_BPM.to_bits()),
            tempo_factor_bits: AtomicU64::new(1.0f64.to_bits()),
            stop_on_empty: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn tick_position(&self) -> i64 {
        self.tick_position.load(Ordering::Relaxed)
    }

    pub fn set_tick_position(&self, tick: i64) {
        self.tick_position.store(tick, Ordering::Relaxed);
    }

    pub fn add_ticks(&self, ticks: i64) -> i64 {
        self.tick_position.fetch_add(ticks, Ordering::Relaxed) + ticks
    }

    pub fn micros_position(&self) -> u64 {
        self.micros_position.load(Ordering::Relaxed)
    }

    pub fn set_micros_position(&self, micros: u64) {
        self.micros_position.store(micros, Ordering::Relaxed);
    }

    pub fn add_micros(&self, micros: u64) {
        self.micros_position.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    pub fn set_bpm(&self, bpm: f64) {
        if bpm > 0.0 {
            self.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn tempo_factor(&self) -> f64 {
        f64::from_bits(self.tempo_factor_bits.load(Ordering::Relaxed))
    }

    pub fn set_tempo_factor(&self, factor: f64) {
        if factor > 0.0 {
            self.tempo_factor_bits
                .store(factor.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn stop_on_empty(&self) -> bool {
        self.stop_on_empty.load(Ordering::Relaxed)
    }

    pub fn set_stop_on_empty(&self, stop: bool) {
        self.stop_on_empty.store(stop, Ordering::Relaxed);
    }
}

/// Capability handed to a [`Source`](crate::sequencer::source::Source) so it
/// can steer the engine without holding a reference to it
///
/// The only mutation it exposes is the tempo, which a source may change
/// from within `play_to_tick` (typically on a tempo meta event) or `sync`.
/// The change starts a new linear tempo segment immediately.
#[derive(Clone)]
pub struct SynchronousControl {
    shared: Arc<SharedState>,
}

impl SynchronousControl {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Set the tempo in beats per minute, effective immediately
    pub fn set_bpm(&self, bpm: f64) {
        self.shared.set_bpm(bpm);
    }

    /// Current tempo in beats per minute
    pub fn bpm(&self) -> f64 {
        self.shared.bpm()
    }
}

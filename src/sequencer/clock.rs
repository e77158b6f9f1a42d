// Clock variants - where ticks come from
// Master integrates tempo over elapsed time. Slave jams to externally
// supplied clock pulses and interpolates between them.

use crate::sequencer::state::SharedState;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

// first-order IIR coefficient for the slave tempo smoother
const BPM_SMOOTHING: f64 = 0.25;

// instantaneous readings above this are transport spikes, not tempo
const MAX_INSTANT_BPM: f64 = 300.0;

/// Tick generator for one play session, constructed at play and dropped
/// when the engine thread exits
pub(crate) enum Clock {
    Master(MasterClock),
    Slave(SlaveClock),
}

impl Clock {
    /// Advance by one timing interval. Returns true when the integer tick
    /// position moved and the source should be pumped.
    pub fn interval(&mut self, delta_micros: u64) -> bool {
        match self {
            Clock::Master(clock) => clock.interval(delta_micros),
            Clock::Slave(clock) => clock.interval(delta_micros),
        }
    }

    /// The source repositioned the engine, restart the current segment
    pub fn repositioned(&mut self, tick: i64) {
        match self {
            Clock::Master(clock) => clock.delta_ticks = 0.0,
            Clock::Slave(clock) => {
                clock.delta_ticks = 0.0;
                clock.slave.last_tick.store(tick, Ordering::Relaxed);
            }
        }
    }
}

/// Internal tempo: distance = velocity * time over the current linear
/// segment, fractional ticks carried between intervals
pub(crate) struct MasterClock {
    shared: Arc<SharedState>,
    ticks_per_quarter: u32,
    delta_ticks: f64,
}

impl MasterClock {
    pub fn new(shared: Arc<SharedState>, ticks_per_quarter: u32) -> Self {
        Self {
            shared,
            ticks_per_quarter,
            delta_ticks: 0.0,
        }
    }

    fn interval(&mut self, delta_micros: u64) -> bool {
        let velocity = self.shared.bpm() * self.shared.tempo_factor();
        self.delta_ticks +=
            delta_micros as f64 * velocity * self.ticks_per_quarter as f64 / MICROS_PER_MINUTE;
        if self.delta_ticks < 1.0 {
            return false;
        }
        let due = self.delta_ticks.floor();
        self.delta_ticks -= due;
        self.shared.add_ticks(due as i64);
        true
    }
}

/// Single-slot mailbox between the clock producer thread and the engine.
/// The producer sets the pending flag, the engine clears it.
pub(crate) struct SlaveShared {
    jam_pending: AtomicBool,
    jam_tick: AtomicI64,
    last_tick: AtomicI64,
    primed: AtomicBool,
    prev_pulse_micros: AtomicU64,
}

impl SlaveShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jam_pending: AtomicBool::new(false),
            jam_tick: AtomicI64::new(0),
            last_tick: AtomicI64::new(0),
            primed: AtomicBool::new(false),
            prev_pulse_micros: AtomicU64::new(0),
        })
    }

    /// Forget pulse history and align to the given tick, called when a
    /// play session starts
    pub fn reset(&self, tick: i64) {
        self.jam_pending.store(false, Ordering::Relaxed);
        self.last_tick.store(tick, Ordering::Relaxed);
        self.primed.store(false, Ordering::Relaxed);
        self.prev_pulse_micros.store(0, Ordering::Relaxed);
    }
}

/// External tempo: each pulse jams the position to the pulse's tick, the
/// interval path interpolates at the smoothed tempo in between
pub(crate) struct SlaveClock {
    shared: Arc<SharedState>,
    slave: Arc<SlaveShared>,
    ticks_per_quarter: u32,
    clock_multiplier: u32,
    delta_ticks: f64,
    countdown: u32, // interpolation ticks left before the next pulse
}

impl SlaveClock {
    pub fn new(
        shared: Arc<SharedState>,
        slave: Arc<SlaveShared>,
        ticks_per_quarter: u32,
        clock_multiplier: u32,
    ) -> Self {
        Self {
            shared,
            slave,
            ticks_per_quarter,
            clock_multiplier,
            delta_ticks: 0.0,
            countdown: 0,
        }
    }

    fn interval(&mut self, delta_micros: u64) -> bool {
        if self.slave.jam_pending.swap(false, Ordering::Acquire) {
            // the pulse is ground truth, interpolation only hides the
            // quantisation between pulses
            let jam = self.slave.jam_tick.load(Ordering::Relaxed);
            self.shared.set_tick_position(jam);
            self.delta_ticks = 0.0;
            self.countdown = self.clock_multiplier - 1;
            return true;
        }
        if self.countdown == 0 {
            return false;
        }
        // tempo factor is ignored while clocked externally
        self.delta_ticks += delta_micros as f64 * self.shared.bpm() * self.ticks_per_quarter as f64
            / MICROS_PER_MINUTE;
        let due = (self.delta_ticks.floor() as u32).min(self.countdown);
        if due == 0 {
            return false;
        }
        self.delta_ticks -= due as f64;
        self.countdown -= due;
        self.shared.add_ticks(due as i64);
        true
    }
}

/// Producer-side handle for driving the sequencer from external clock
/// pulses, cloneable and usable from any thread
#[derive(Clone)]
pub struct ExternalClock {
    shared: Arc<SharedState>,
    slave: Arc<SlaveShared>,
    clocks_per_quarter: u32,
    clock_multiplier: u32,
    epoch: Instant,
}

impl ExternalClock {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        slave: Arc<SlaveShared>,
        clocks_per_quarter: u32,
        clock_multiplier: u32,
    ) -> Self {
        Self {
            shared,
            slave,
            clocks_per_quarter,
            clock_multiplier,
            epoch: Instant::now(),
        }
    }

    /// One external clock pulse, timestamped now
    pub fn pulse(&self) {
        self.pulse_at(self.epoch.elapsed().as_micros() as u64);
    }

    /// One external clock pulse with a caller-supplied timestamp, e.g. the
    /// microsecond timestamp a MIDI input driver delivers with 0xF8.
    /// Timestamps only need to be consistent with each other.
    pub fn pulse_at(&self, timestamp_micros: u64) {
        let target = self.slave.last_tick.load(Ordering::Relaxed) + self.clock_multiplier as i64;
        self.slave.jam_tick.store(target, Ordering::Relaxed);
        self.slave.jam_pending.store(true, Ordering::Release);
        self.slave.last_tick.store(target, Ordering::Relaxed);

        let prev = self
            .slave
            .prev_pulse_micros
            .swap(timestamp_micros, Ordering::Relaxed);
        if !self.slave.primed.swap(true, Ordering::Relaxed) {
            // first pulse establishes the timestamp base only
            return;
        }
        let delta = timestamp_micros.saturating_sub(prev);
        if delta == 0 {
            return;
        }
        let instant_bpm = MICROS_PER_MINUTE / (delta as f64 * self.clocks_per_quarter as f64);
        if instant_bpm <= MAX_INSTANT_BPM {
            let bpm = self.shared.bpm();
            self.shared
                .set_bpm(BPM_SMOOTHING * instant_bpm + (1.0 - BPM_SMOOTHING) * bpm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_rate_law() {
        let shared = SharedState::new();
        let mut clock = MasterClock::new(shared.clone(), 480);

        // 120 bpm at 480 tpq is 960 ticks per second
        for _ in 0..1000 {
            clock.interval(1000);
        }
        assert_eq!(shared.tick_position(), 960);
    }

    #[test]
    fn test_master_fractional_carry() {
        let shared = SharedState::new();
        shared.set_bpm(100.0);
        let mut clock = MasterClock::new(shared.clone(), 96);

        // 100 bpm at 96 tpq is 0.16 ticks per millisecond, so single
        // milliseconds accumulate before a tick is due
        assert!(!clock.interval(1000));
        for _ in 0..9999 {
            clock.interval(1000);
        }
        // 10 seconds at 16 ticks per second
        assert_eq!(shared.tick_position(), 160);
    }

    #[test]
    fn test_master_tempo_factor() {
        let shared = SharedState::new();
        shared.set_tempo_factor(0.5);
        let mut clock = MasterClock::new(shared.clone(), 480);

        for _ in 0..1000 {
            clock.interval(1000);
        }
        assert_eq!(shared.tick_position(), 480);
    }

    fn slave_setup(resolution: u32, cpq: u32) -> (Arc<SharedState>, ExternalClock, SlaveClock) {
        let shared = SharedState::new();
        let slave = SlaveShared::new();
        let multiplier = resolution / cpq;
        let external = ExternalClock::new(shared.clone(), slave.clone(), cpq, multiplier);
        let clock = SlaveClock::new(shared.clone(), slave, resolution, multiplier);
        (shared, external, clock)
    }

    #[test]
    fn test_slave_jam_snaps_position() {
        let (shared, external, mut clock) = slave_setup(96, 24);

        external.pulse_at(0);
        assert!(clock.interval(1000));
        assert_eq!(shared.tick_position(), 4);

        external.pulse_at(20_000);
        assert!(clock.interval(1000));
        assert_eq!(shared.tick_position(), 8);
    }

    #[test]
    fn test_slave_interpolates_between_pulses() {
        let (shared, external, mut clock) = slave_setup(96, 24);
        shared.set_bpm(125.0); // 200 ticks per second, 5 ms per tick

        external.pulse_at(0);
        clock.interval(1000); // jam to 4

        // at 5 ms per tick the countdown of 3 runs out after 15 ms
        for _ in 0..30 {
            clock.interval(1000);
        }
        assert_eq!(shared.tick_position(), 7);

        // idles until the next pulse regardless of elapsed time
        clock.interval(50_000);
        assert_eq!(shared.tick_position(), 7);

        external.pulse_at(20_000);
        clock.interval(1000);
        assert_eq!(shared.tick_position(), 8);
    }

    #[test]
    fn test_slave_jam_overrides_interpolation() {
        let (shared, external, mut clock) = slave_setup(96, 24);
        shared.set_bpm(240.0);

        external.pulse_at(0);
        clock.interval(1000);
        // pulse arrives while interpolation still has ticks left
        external.pulse_at(10_000);
        clock.interval(1000);
        assert_eq!(shared.tick_position(), 8);
    }

    #[test]
    fn test_slave_bpm_convergence() {
        let (shared, external, _clock) = slave_setup(96, 24);

        // 24 pulses per quarter at 60 bpm is one pulse every 41667 us
        let mut t = 0u64;
        for _ in 0..13 {
            external.pulse_at(t);
            t += 41_667;
        }
        let bpm = shared.bpm();
        assert!((bpm - 60.0).abs() < 3.0, "bpm {} has not converged", bpm);
    }

    #[test]
    fn test_slave_ignores_transport_spikes() {
        let (shared, external, _clock) = slave_setup(96, 24);

        external.pulse_at(0);
        external.pulse_at(41_667);
        let before = shared.bpm();

        // a 1 ms gap reads as 2500 bpm, which is not a tempo
        external.pulse_at(42_667);
        assert_eq!(shared.bpm(), before);

        // zero delta is ignored outright
        external.pulse_at(42_667);
        assert_eq!(shared.bpm(), before);
    }

    #[test]
    fn test_slave_first_pulse_skips_bpm() {
        let (shared, external, _clock) = slave_setup(96, 24);

        external.pulse_at(5_000);
        assert_eq!(shared.bpm(), 120.0);

        external.pulse_at(46_667);
        assert!(shared.bpm() < 120.0);
    }

    #[test]
    fn test_reposition_republishes_last_tick() {
        let (shared, external, mut clock) = slave_setup(96, 24);

        external.pulse_at(0);
        clock.interval(1000);
        assert_eq!(shared.tick_position(), 4);

        // source repositioned us to 100, the next pulse continues from it
        let mut wrapped = Clock::Slave(clock);
        wrapped.repositioned(100);
        external.pulse_at(20_000);
        wrapped.interval(1000);
        assert_eq!(shared.tick_position(), 104);
    }
}

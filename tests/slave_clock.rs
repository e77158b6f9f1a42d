//! Slave clock integration tests
//!
//! The engine locks to externally supplied clock pulses: each pulse jams
//! the position forward by one clock multiplier, interpolation fills the
//! gap in between.

use midiseq::{MidiError, MidiMessage, MidiTransport, Sequence, SequenceSource, Sequencer};
use std::thread;
use std::time::{Duration, Instant};

struct NullSink;

impl MidiTransport for NullSink {
    fn transport(&mut self, _message: &MidiMessage, _ts: u64) -> Result<(), MidiError> {
        Ok(())
    }
}

fn slaved_sequencer() -> Sequencer {
    let mut sequence = Sequence::new(96);
    sequence.add_track();
    let mut sequencer = Sequencer::new();
    sequencer.set_clocks_per_quarter(24).unwrap();
    sequencer
        .set_source(Box::new(SequenceSource::new(sequence, Box::new(NullSink))))
        .unwrap();
    sequencer
}

fn wait_stopped(sequencer: &Sequencer) {
    let deadline = Instant::now() + Duration::from_millis(500);
    while sequencer.is_running() {
        assert!(Instant::now() < deadline, "engine did not stop in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_engine_idles_without_pulses() {
    let mut sequencer = slaved_sequencer();
    sequencer.play().unwrap();
    thread::sleep(Duration::from_millis(100));

    // no pulses, no movement
    assert_eq!(sequencer.tick_position(), 0);

    sequencer.stop().unwrap();
    wait_stopped(&sequencer);
}

#[test]
fn test_pulses_jam_and_interpolate() {
    // resolution 96 over 24 clocks per quarter gives a multiplier of 4
    let mut sequencer = slaved_sequencer();
    let clock = sequencer.external_clock().unwrap();
    sequencer.play().unwrap();
    thread::sleep(Duration::from_millis(10));

    for pulse in 1..=3i64 {
        clock.pulse();
        thread::sleep(Duration::from_millis(5));
        let tick = sequencer.tick_position();
        // the jam snapped us to pulse * 4, interpolation may have added
        // at most multiplier - 1 ticks on top
        assert!(
            tick >= pulse * 4 && tick <= pulse * 4 + 3,
            "tick {} out of range after pulse {}",
            tick,
            pulse
        );
        thread::sleep(Duration::from_millis(15));
    }

    // interpolation never runs past the next pulse's position
    thread::sleep(Duration::from_millis(100));
    assert!(sequencer.tick_position() <= 15);

    sequencer.stop().unwrap();
    wait_stopped(&sequencer);
}

#[test]
fn test_pulse_rate_becomes_tempo() {
    let mut sequencer = slaved_sequencer();
    let clock = sequencer.external_clock().unwrap();
    sequencer.play().unwrap();

    // 24 pulses per quarter at 125 bpm is one pulse every 20 ms. Use
    // synthetic timestamps so scheduling jitter stays out of the tempo.
    let mut t = 0u64;
    for _ in 0..20 {
        clock.pulse_at(t);
        t += 20_000;
        thread::sleep(Duration::from_millis(2));
    }

    let bpm = sequencer.bpm();
    assert!(
        (bpm - 125.0).abs() < 6.5,
        "bpm {} has not locked to the pulse rate",
        bpm
    );

    sequencer.stop().unwrap();
    wait_stopped(&sequencer);
}

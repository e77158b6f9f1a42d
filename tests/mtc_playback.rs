//! MTC generation integration tests
//!
//! Quarter frames are emitted from the real-time thread at the cadence of
//! the configured frame rate, 100 per second at 25 fps.

use midiseq::{
    FrameRate, MidiError, MidiMessage, MidiTransport, Sequence, SequenceSource, Sequencer,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct CollectingSink {
    messages: Arc<Mutex<Vec<MidiMessage>>>,
}

impl MidiTransport for CollectingSink {
    fn transport(&mut self, message: &MidiMessage, _ts: u64) -> Result<(), MidiError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct NullSink;

impl MidiTransport for NullSink {
    fn transport(&mut self, _message: &MidiMessage, _ts: u64) -> Result<(), MidiError> {
        Ok(())
    }
}

fn mtc_sequencer() -> (Arc<Mutex<Vec<MidiMessage>>>, Sequencer) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let mut sequencer = Sequencer::with_mtc(Box::new(CollectingSink {
        messages: messages.clone(),
    }));
    let mut sequence = Sequence::new(480);
    sequence.add_track();
    sequencer
        .set_source(Box::new(SequenceSource::new(sequence, Box::new(NullSink))))
        .unwrap();
    (messages, sequencer)
}

fn wait_stopped(sequencer: &Sequencer) {
    let deadline = Instant::now() + Duration::from_millis(500);
    while sequencer.is_running() {
        assert!(Instant::now() < deadline, "engine did not stop in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_quarter_frame_cadence_at_25fps() {
    let (messages, mut sequencer) = mtc_sequencer();
    sequencer.set_mtc_enabled(true).unwrap();

    sequencer.play().unwrap();
    thread::sleep(Duration::from_millis(1000));
    sequencer.stop().unwrap();
    wait_stopped(&sequencer);

    let sent = messages.lock().unwrap();
    let pieces: Vec<u8> = sent
        .iter()
        .filter(|m| m.status() == Some(0xF1))
        .map(|m| m.data1().unwrap() >> 4)
        .collect();

    // about 100 quarter frames per second, give scheduling some slack
    assert!(
        (85..=115).contains(&pieces.len()),
        "expected about 100 quarter frames, got {}",
        pieces.len()
    );
    // in strict rotation, starting from piece 0
    assert_eq!(pieces[0], 0);
    for pair in pieces.windows(2) {
        assert_eq!(pair[1], (pair[0] + 1) % 8);
    }
}

#[test]
fn test_mtc_silent_when_disabled() {
    let (messages, mut sequencer) = mtc_sequencer();

    sequencer.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    sequencer.stop().unwrap();
    wait_stopped(&sequencer);

    assert!(messages.lock().unwrap().is_empty());
}

#[test]
fn test_full_frame_on_return_to_zero() {
    let (messages, mut sequencer) = mtc_sequencer();

    sequencer.return_to_zero().unwrap();

    let sent = messages.lock().unwrap();
    let rate_bits = FrameRate::Fps25.code() << 5;
    assert_eq!(
        sent[0],
        MidiMessage::sysex(vec![0xF0, 0x7F, 0x7F, 0x01, 0x01, rate_bits, 0, 0, 0, 0xF7]).unwrap()
    );
}

#[test]
fn test_rate_change_while_stopped_is_immediate() {
    let (messages, mut sequencer) = mtc_sequencer();

    sequencer.set_mtc_frame_rate(FrameRate::Fps30).unwrap();
    sequencer.return_to_zero().unwrap();

    // the full frame already carries the new rate bits
    let sent = messages.lock().unwrap();
    let rate_bits = FrameRate::Fps30.code() << 5;
    assert_eq!(
        sent[0],
        MidiMessage::sysex(vec![0xF0, 0x7F, 0x7F, 0x01, 0x01, rate_bits, 0, 0, 0, 0xF7]).unwrap()
    );
}

#[test]
fn test_rate_change_while_running_is_deferred() {
    let (messages, mut sequencer) = mtc_sequencer();
    sequencer.set_mtc_enabled(true).unwrap();

    sequencer.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    let before = messages.lock().unwrap().len();

    sequencer.set_mtc_frame_rate(FrameRate::Fps30).unwrap();
    assert_eq!(sequencer.mtc_frame_rate(), Some(FrameRate::Fps30));
    thread::sleep(Duration::from_millis(300));
    sequencer.stop().unwrap();
    wait_stopped(&sequencer);

    // generation continued at the new rate, 120 quarter frames per second
    let after = messages.lock().unwrap().len() - before;
    assert!(
        (25..=45).contains(&after),
        "expected about 36 quarter frames after the swap, got {}",
        after
    );
}

// midiseq demo - plays a short built-in sequence
// Uses the first available MIDI output, or falls back to printing the
// messages when no device is present

use midir::MidiOutput;
use midiseq::{
    MidiError, MidiMessage, MidiTransport, Sequence, SequenceSource, Sequencer, TransportObserver,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sink over a real MIDI output port
struct MidirSink {
    connection: midir::MidiOutputConnection,
}

impl MidiTransport for MidirSink {
    fn transport(&mut self, message: &MidiMessage, _timestamp_micros: u64) -> Result<(), MidiError> {
        let Some(bytes) = message.wire_bytes() else {
            return Ok(());
        };
        self.connection
            .send(&bytes)
            .map_err(|e| MidiError::Rejected(e.to_string()))
    }
}

/// Fallback sink that prints what would have been sent
struct ConsoleSink;

impl MidiTransport for ConsoleSink {
    fn transport(&mut self, message: &MidiMessage, _timestamp_micros: u64) -> Result<(), MidiError> {
        if let Some(bytes) = message.wire_bytes() {
            println!("  -> {:02X?}", bytes);
        }
        Ok(())
    }
}

struct PrintObserver;

impl TransportObserver for PrintObserver {
    fn transport_changed(&self, running: bool) {
        println!("transport: {}", if running { "playing" } else { "stopped" });
    }
}

fn open_output() -> Box<dyn MidiTransport> {
    let midi_out = match MidiOutput::new("midiseq demo") {
        Ok(out) => out,
        Err(e) => {
            eprintln!("MIDI unavailable ({}), printing messages instead", e);
            return Box::new(ConsoleSink);
        }
    };
    let ports = midi_out.ports();
    let Some(port) = ports.first() else {
        println!("No MIDI output ports found, printing messages instead");
        return Box::new(ConsoleSink);
    };
    let name = midi_out
        .port_name(port)
        .unwrap_or_else(|_| "Unknown".to_string());
    match midi_out.connect(port, "midiseq-demo") {
        Ok(connection) => {
            println!("MIDI output: {}", name);
            Box::new(MidirSink { connection })
        }
        Err(e) => {
            eprintln!("Failed to connect to '{}' ({}), printing instead", name, e);
            Box::new(ConsoleSink)
        }
    }
}

/// Two bars of an arpeggio with a tempo change halfway through
fn demo_sequence() -> Sequence {
    let mut sequence = Sequence::new(480);

    let conductor = sequence.add_track();
    sequence.add_event(conductor, 0, MidiMessage::track_name("Demo"));
    sequence.add_event(conductor, 0, MidiMessage::tempo(120.0));
    sequence.add_event(conductor, 480 * 4, MidiMessage::tempo(90.0));

    let lead = sequence.add_track();
    sequence.add_event(lead, 0, MidiMessage::track_name("Lead"));
    let line = [60u8, 64, 67, 72, 67, 64, 60, 55];
    for bar in 0..2i64 {
        for (i, note) in line.iter().enumerate() {
            let tick = (bar * 8 + i as i64) * 240;
            sequence.add_event(lead, tick, MidiMessage::note_on(0, *note, 96).unwrap());
            sequence.add_event(lead, tick + 200, MidiMessage::note_on(0, *note, 0).unwrap());
        }
    }
    sequence
}

fn main() {
    env_logger::init();

    println!("=== midiseq demo ===\n");

    let source = SequenceSource::new(demo_sequence(), open_output());
    let mut sequencer = Sequencer::new();
    sequencer.add_observer(Arc::new(PrintObserver));
    if let Err(e) = sequencer.set_source(Box::new(source)) {
        eprintln!("ERROR: {}", e);
        return;
    }
    sequencer.set_stop_on_empty(true);

    if let Err(e) = sequencer.play() {
        eprintln!("ERROR: {}", e);
        return;
    }

    while sequencer.is_running() {
        thread::sleep(Duration::from_millis(50));
    }
    println!(
        "\nDone after {} ticks / {} ms",
        sequencer.tick_position(),
        sequencer.millisecond_position()
    );
}

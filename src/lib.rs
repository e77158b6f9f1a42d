// midiseq - real-time MIDI sequencer core
// Plays track based music representations against an internal tempo clock
// or external clock pulses, generating MTC quarter frames alongside

pub mod messaging;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use messaging::channels::{
    create_notification_channel, NotificationConsumer, NotificationProducer,
};
pub use messaging::notification::{Notification, NotificationCategory, NotificationLevel};
pub use midi::message::{MidiError, MidiMessage};
pub use midi::note_cache::NoteOnCache;
pub use midi::target::{MessageTarget, MidiTransport};
pub use sequencer::clock::ExternalClock;
pub use sequencer::engine::{Sequencer, SequencerError, TransportObserver};
pub use sequencer::mtc::{FrameRate, MtcTime};
pub use sequencer::sequence::{Sequence, SequenceEditor, SequenceEvent, SequenceSource};
pub use sequencer::source::{Source, Track, MAX_TICK};
pub use sequencer::state::SynchronousControl;

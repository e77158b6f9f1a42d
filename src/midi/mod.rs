// MIDI module - message model and outbound plumbing

pub mod message;
pub mod note_cache;
pub mod target;

pub use message::{MidiError, MidiMessage};
pub use note_cache::NoteOnCache;
pub use target::{MessageTarget, MidiTransport};

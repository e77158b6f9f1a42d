// Sequencer module
// Source contracts, clock domains, the timing engine, and MTC generation

pub mod clock;
pub mod engine;
pub mod mtc;
pub mod sequence;
pub mod source;
pub mod state;

pub use clock::ExternalClock;
pub use engine::{Sequencer, SequencerError, TransportObserver};
pub use mtc::{FrameRate, MtcTime};
pub use sequence::{Sequence, SequenceEditor, SequenceEvent, SequenceSource};
pub use source::{Source, Track, MAX_TICK};
pub use state::SynchronousControl;

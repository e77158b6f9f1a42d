// In-memory sequence and the Source implementation backed by it
// Broadly equivalent to a standard MIDI file loaded in memory, with a
// single output shared by all tracks

use crate::messaging::channels::NotificationProducer;
use crate::midi::message::MidiMessage;
use crate::midi::target::{MessageTarget, MidiTransport};
use crate::sequencer::source::{Source, Track, MAX_TICK};
use crate::sequencer::state::SynchronousControl;
use std::sync::{Arc, Mutex};

/// One event in a sequence track
#[derive(Debug, Clone)]
pub struct SequenceEvent {
    pub tick: i64,
    pub message: MidiMessage,
}

/// Tick-ordered, track based music data
///
/// Track 0 plays the role of the first track of a type 1 standard MIDI
/// file: tempo events belong there.
#[derive(Debug, Clone)]
pub struct Sequence {
    resolution: u32,
    tracks: Vec<Vec<SequenceEvent>>,
}

impl Sequence {
    pub fn new(resolution: u32) -> Self {
        assert!(resolution > 0, "resolution must be > 0");
        Self {
            resolution,
            tracks: Vec::new(),
        }
    }

    /// Append an empty track, returning its index
    pub fn add_track(&mut self) -> usize {
        self.tracks.push(Vec::new());
        self.tracks.len() - 1
    }

    /// Insert an event keeping the track tick-ordered.
    /// Events at equal ticks keep insertion order.
    pub fn add_event(&mut self, track: usize, tick: i64, message: MidiMessage) {
        let events = &mut self.tracks[track];
        let at = events.partition_point(|e| e.tick <= tick);
        events.insert(at, SequenceEvent { tick, message });
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn events(&self, track: usize) -> &[SequenceEvent] {
        &self.tracks[track]
    }
}

/// Pending mutation, applied inside the sync window
#[derive(Debug, Clone)]
enum SequenceEdit {
    Insert {
        track: usize,
        tick: i64,
        message: MidiMessage,
    },
}

/// Handle for editing a playing [`SequenceSource`]
///
/// Edits are queued and applied by the engine's next `sync` call, the only
/// point where the track data may change.
#[derive(Clone)]
pub struct SequenceEditor {
    pending: Arc<Mutex<Vec<SequenceEdit>>>,
}

impl SequenceEditor {
    /// Queue an event insertion
    pub fn insert_event(&self, track: usize, tick: i64, message: MidiMessage) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(SequenceEdit::Insert {
                track,
                tick,
                message,
            });
        }
    }
}

/// Cursor state of one sequence track, shared between the playing track
/// and the sync-window edit application
struct TrackState {
    events: Vec<SequenceEvent>,
    index: usize,
}

impl TrackState {
    fn insert(&mut self, tick: i64, message: MidiMessage) {
        let at = self.events.partition_point(|e| e.tick <= tick);
        self.events.insert(at, SequenceEvent { tick, message });
        // keep the cursor anchored on what has already been played, an
        // insertion behind it is too late and must not shift what is due
        if at < self.index {
            self.index += 1;
        }
    }
}

struct SequenceTrack {
    name: String,
    state: Arc<Mutex<TrackState>>,
    target: Arc<Mutex<MessageTarget>>,
    control: Arc<Mutex<Option<SynchronousControl>>>,
}

impl Track for SequenceTrack {
    fn next_tick(&self) -> i64 {
        match self.state.lock() {
            Ok(state) => state
                .events
                .get(state.index)
                .map(|e| e.tick)
                .unwrap_or(MAX_TICK),
            Err(_) => MAX_TICK,
        }
    }

    fn play_next(&mut self) {
        let event = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let Some(event) = state.events.get(state.index).cloned() else {
                return;
            };
            state.index += 1;
            event
        };
        if event.message.is_meta() {
            // tempo events are not transportable, they steer the engine
            if let Some(bpm) = event.message.tempo_bpm() {
                if let Ok(control) = self.control.lock() {
                    if let Some(control) = control.as_ref() {
                        control.set_bpm(bpm);
                    }
                }
            }
            return;
        }
        if let Ok(mut target) = self.target.lock() {
            target.transport(&event.message, 0);
        }
    }

    fn off(&mut self, stop: bool) {
        if let Ok(mut target) = self.target.lock() {
            target.notes_off(stop);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// [`Source`] over an in-memory [`Sequence`], one [`MessageTarget`] shared
/// by every track
pub struct SequenceSource {
    name: String,
    resolution: u32,
    tracks: Vec<Box<dyn Track>>,
    states: Vec<Arc<Mutex<TrackState>>>,
    pending: Arc<Mutex<Vec<SequenceEdit>>>,
    control: Arc<Mutex<Option<SynchronousControl>>>,
}

impl SequenceSource {
    pub fn new(sequence: Sequence, sink: Box<dyn MidiTransport>) -> Self {
        Self::build(sequence, MessageTarget::new(sink))
    }

    /// Like [`SequenceSource::new`] with a channel for sink failure
    /// notifications
    pub fn with_notifications(
        sequence: Sequence,
        sink: Box<dyn MidiTransport>,
        tx: NotificationProducer,
    ) -> Self {
        Self::build(sequence, MessageTarget::with_notifications(sink, tx))
    }

    fn build(sequence: Sequence, target: MessageTarget) -> Self {
        let target = Arc::new(Mutex::new(target));
        let control = Arc::new(Mutex::new(None));

        let mut tracks: Vec<Box<dyn Track>> = Vec::new();
        let mut states = Vec::new();
        let mut name = None;
        for (i, events) in sequence.tracks.into_iter().enumerate() {
            let meta_name = events.iter().find_map(|e| e.message.meta_text());
            if i == 0 {
                name = meta_name.clone();
            }
            let state = Arc::new(Mutex::new(TrackState { events, index: 0 }));
            states.push(state.clone());
            tracks.push(Box::new(SequenceTrack {
                name: meta_name.unwrap_or_else(|| format!("Track {}", i + 1)),
                state,
                target: target.clone(),
                control: control.clone(),
            }));
        }

        Self {
            name: name.unwrap_or_else(|| "sequence".to_string()),
            resolution: sequence.resolution,
            tracks,
            states,
            pending: Arc::new(Mutex::new(Vec::new())),
            control,
        }
    }

    /// Editing handle, usable from any thread while playing
    pub fn editor(&self) -> SequenceEditor {
        SequenceEditor {
            pending: self.pending.clone(),
        }
    }
}

impl Source for SequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }

    fn control(&mut self, control: SynchronousControl) {
        if let Ok(mut slot) = self.control.lock() {
            *slot = Some(control);
        }
    }

    fn sync(&mut self, _current_tick: i64) -> i64 {
        let edits = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return 0,
        };
        for edit in edits {
            match edit {
                SequenceEdit::Insert {
                    track,
                    tick,
                    message,
                } => {
                    if let Some(state) = self.states.get(track) {
                        if let Ok(mut state) = state.lock() {
                            state.insert(tick, message);
                        }
                    }
                }
            }
        }
        0
    }

    fn play_to_tick(&mut self, target_tick: i64) {
        for track in &mut self.tracks {
            while track.next_tick() <= target_tick {
                track.play_next();
            }
        }
    }

    fn exhausted(&self) -> bool {
        self.tracks.iter().all(|t| t.next_tick() == MAX_TICK)
    }

    fn return_to_zero(&mut self) {
        for state in &self.states {
            if let Ok(mut state) = state.lock() {
                state.index = 0;
            }
        }
    }

    fn stopped(&mut self) {
        for track in &mut self.tracks {
            track.off(true);
        }
    }
}

// MessageTarget - decorates an outbound MIDI sink
// Tracks note ons in a NoteOnCache so stop and mute can send balancing
// note offs instead of leaving notes hanging

use crate::messaging::channels::NotificationProducer;
use crate::messaging::notification::{Notification, NotificationCategory};
use crate::midi::message::{
    MidiError, MidiMessage, ALL_CONTROLLERS_OFF, ALL_NOTES_OFF, HOLD_PEDAL, NOTE_OFF, NOTE_ON,
};
use crate::midi::note_cache::NoteOnCache;
use ringbuf::traits::Producer;

/// Downstream MIDI sink
///
/// Timestamp 0 means immediate. A sink may reject a message it considers
/// malformed; callers on the real-time path absorb the error.
pub trait MidiTransport: Send {
    fn transport(&mut self, message: &MidiMessage, timestamp_micros: u64) -> Result<(), MidiError>;
}

/// Decorator around a [`MidiTransport`] that maintains a [`NoteOnCache`]
/// and can flush every active note
///
/// Sink failures never propagate. They are counted, the first one is
/// logged, and one notification is pushed when a channel is attached. The
/// cache is updated regardless so its view of active notes stays
/// consistent with what was asked for.
pub struct MessageTarget {
    sink: Box<dyn MidiTransport>,
    cache: NoteOnCache,
    failures: u64,
    notifications: Option<NotificationProducer>,
}

impl MessageTarget {
    pub fn new(sink: Box<dyn MidiTransport>) -> Self {
        Self {
            sink,
            cache: NoteOnCache::new(),
            failures: 0,
            notifications: None,
        }
    }

    pub fn with_notifications(sink: Box<dyn MidiTransport>, tx: NotificationProducer) -> Self {
        let mut target = Self::new(sink);
        target.notifications = Some(tx);
        target
    }

    /// Forward a message to the sink, keeping the cache in step
    pub fn transport(&mut self, message: &MidiMessage, timestamp_micros: u64) {
        if let Err(e) = self.sink.transport(message, timestamp_micros) {
            self.record_failure(e);
        }
        let (Some(status), Some(note)) = (message.status(), message.data1()) else {
            return;
        };
        let channel = status & 0x0F;
        match status & 0xF0 {
            NOTE_OFF => self.cache.clear(note, channel),
            NOTE_ON => {
                if message.data2().unwrap_or(0) > 0 {
                    self.cache.set(note, channel);
                } else {
                    self.cache.clear(note, channel);
                }
            }
            _ => {}
        }
    }

    /// Turn off everything that is sounding
    ///
    /// Called for stop or mute, `stop` true resets controllers as well.
    /// Explicit per-note offs go first so devices that ignore the blanket
    /// all-notes-off controller still silence.
    pub fn notes_off(&mut self, stop: bool) {
        for channel in 0..16u8 {
            for note in 0..128u8 {
                if self.cache.test_and_clear(note, channel) {
                    // note on with velocity 0, widely accepted as note off
                    self.send(MidiMessage::note_on(channel, note, 0));
                }
            }
            self.send(MidiMessage::control_change(channel, ALL_NOTES_OFF, 0));
            self.send(MidiMessage::control_change(channel, HOLD_PEDAL, 0));
            if stop {
                self.send(MidiMessage::control_change(channel, ALL_CONTROLLERS_OFF, 0));
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &NoteOnCache {
        &self.cache
    }

    fn send(&mut self, message: Result<MidiMessage, MidiError>) {
        let result = match message {
            Ok(msg) => self.sink.transport(&msg, 0),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.record_failure(e);
        }
    }

    fn record_failure(&mut self, error: MidiError) {
        self.failures += 1;
        if self.failures == 1 {
            log::warn!("MIDI sink rejected a message: {}", error);
            if let Some(tx) = &mut self.notifications {
                let _ = tx.try_push(Notification::error(
                    NotificationCategory::Midi,
                    format!("MIDI sink rejected a message: {}", error),
                ));
            }
        }
    }
}

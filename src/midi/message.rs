// MIDI message model
// Byte-level messages with validating constructors, plus the SMF meta
// events the sequencer cares about (tempo, track name)

use thiserror::Error;

// Channel status nibbles
pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const POLY_PRESSURE: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;

// System messages
pub const SYSEX_START: u8 = 0xF0;
pub const MTC_QUARTER_FRAME: u8 = 0xF1;
pub const SYSEX_END: u8 = 0xF7;

// Controllers
pub const HOLD_PEDAL: u8 = 64;
pub const ALL_SOUND_OFF: u8 = 120;
pub const ALL_CONTROLLERS_OFF: u8 = 121;
pub const ALL_NOTES_OFF: u8 = 123;

// SMF meta types
pub const META_TRACK_NAME: u8 = 0x03;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;

/// Errors raised when constructing or transporting MIDI messages
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("data byte out of range: {0}")]
    DataOutOfRange(u8),
    #[error("channel out of range: {0}")]
    ChannelOutOfRange(u8),
    #[error("malformed system exclusive message")]
    MalformedSysEx,
    #[error("message rejected by sink: {0}")]
    Rejected(String),
}

/// A MIDI message as the sequencer moves it around
///
/// Channel and system messages carry raw wire bytes. Meta events only exist
/// inside sequences; they are never transported and `wire_bytes` returns
/// `None` for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    Channel { status: u8, data1: u8, data2: u8 },
    System { status: u8, data1: u8 },
    SysEx(Vec<u8>),
    Meta { meta_type: u8, data: Vec<u8> },
}

fn check_data(byte: u8) -> Result<u8, MidiError> {
    if byte > 0x7F {
        return Err(MidiError::DataOutOfRange(byte));
    }
    Ok(byte)
}

fn check_channel(channel: u8) -> Result<u8, MidiError> {
    if channel > 0x0F {
        return Err(MidiError::ChannelOutOfRange(channel));
    }
    Ok(channel)
}

impl MidiMessage {
    /// Note on. Velocity 0 is legal and means note off on the wire.
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Result<Self, MidiError> {
        Ok(MidiMessage::Channel {
            status: NOTE_ON | check_channel(channel)?,
            data1: check_data(note)?,
            data2: check_data(velocity)?,
        })
    }

    /// Note off with release velocity 0
    pub fn note_off(channel: u8, note: u8) -> Result<Self, MidiError> {
        Ok(MidiMessage::Channel {
            status: NOTE_OFF | check_channel(channel)?,
            data1: check_data(note)?,
            data2: 0,
        })
    }

    /// Control change
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Result<Self, MidiError> {
        Ok(MidiMessage::Channel {
            status: CONTROL_CHANGE | check_channel(channel)?,
            data1: check_data(controller)?,
            data2: check_data(value)?,
        })
    }

    /// Program change
    pub fn program_change(channel: u8, program: u8) -> Result<Self, MidiError> {
        Ok(MidiMessage::Channel {
            status: PROGRAM_CHANGE | check_channel(channel)?,
            data1: check_data(program)?,
            data2: 0,
        })
    }

    /// MTC quarter frame (0xF1), `piece` 0..=7, `nibble` the 4-bit payload
    pub fn quarter_frame(piece: u8, nibble: u8) -> Result<Self, MidiError> {
        if piece > 7 {
            return Err(MidiError::DataOutOfRange(piece));
        }
        if nibble > 0x0F {
            return Err(MidiError::DataOutOfRange(nibble));
        }
        Ok(MidiMessage::System {
            status: MTC_QUARTER_FRAME,
            data1: (piece << 4) | nibble,
        })
    }

    /// System exclusive from complete wire bytes (0xF0 .. 0xF7)
    pub fn sysex(bytes: Vec<u8>) -> Result<Self, MidiError> {
        if bytes.len() < 2 || bytes[0] != SYSEX_START || bytes[bytes.len() - 1] != SYSEX_END {
            return Err(MidiError::MalformedSysEx);
        }
        Ok(MidiMessage::SysEx(bytes))
    }

    /// SMF set-tempo meta event, stored as microseconds per quarter note
    pub fn tempo(bpm: f64) -> Self {
        let uspq = (60_000_000.0 / bpm).round() as u32;
        MidiMessage::Meta {
            meta_type: META_TEMPO,
            data: vec![(uspq >> 16) as u8, (uspq >> 8) as u8, uspq as u8],
        }
    }

    /// SMF track-name meta event
    pub fn track_name(name: &str) -> Self {
        MidiMessage::Meta {
            meta_type: META_TRACK_NAME,
            data: name.as_bytes().to_vec(),
        }
    }

    /// Status byte, or `None` for meta events which have no wire status
    pub fn status(&self) -> Option<u8> {
        match self {
            MidiMessage::Channel { status, .. } => Some(*status),
            MidiMessage::System { status, .. } => Some(*status),
            MidiMessage::SysEx(bytes) => bytes.first().copied(),
            MidiMessage::Meta { .. } => None,
        }
    }

    /// Channel for channel messages
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::Channel { status, .. } => Some(status & 0x0F),
            _ => None,
        }
    }

    pub fn data1(&self) -> Option<u8> {
        match self {
            MidiMessage::Channel { data1, .. } => Some(*data1),
            MidiMessage::System { data1, .. } => Some(*data1),
            _ => None,
        }
    }

    pub fn data2(&self) -> Option<u8> {
        match self {
            MidiMessage::Channel { data2, .. } => Some(*data2),
            _ => None,
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, MidiMessage::Meta { .. })
    }

    pub fn meta_type(&self) -> Option<u8> {
        match self {
            MidiMessage::Meta { meta_type, .. } => Some(*meta_type),
            _ => None,
        }
    }

    /// Decode a set-tempo meta event back to beats per minute
    pub fn tempo_bpm(&self) -> Option<f64> {
        match self {
            MidiMessage::Meta { meta_type, data } if *meta_type == META_TEMPO && data.len() == 3 => {
                let uspq =
                    ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32;
                if uspq == 0 {
                    return None;
                }
                Some(60_000_000.0 / uspq as f64)
            }
            _ => None,
        }
    }

    /// Text payload of a text-carrying meta event
    pub fn meta_text(&self) -> Option<String> {
        match self {
            MidiMessage::Meta { meta_type, data } if *meta_type == META_TRACK_NAME => {
                String::from_utf8(data.clone()).ok()
            }
            _ => None,
        }
    }

    /// Raw bytes as they go on the wire, `None` for meta events
    pub fn wire_bytes(&self) -> Option<Vec<u8>> {
        match self {
            MidiMessage::Channel {
                status,
                data1,
                data2,
            } => {
                // program change and channel pressure carry one data byte
                if matches!(status & 0xF0, PROGRAM_CHANGE | CHANNEL_PRESSURE) {
                    Some(vec![*status, *data1])
                } else {
                    Some(vec![*status, *data1, *data2])
                }
            }
            MidiMessage::System { status, data1 } => Some(vec![*status, *data1]),
            MidiMessage::SysEx(bytes) => Some(bytes.clone()),
            MidiMessage::Meta { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_bytes() {
        let msg = MidiMessage::note_on(9, 60, 100).unwrap();
        assert_eq!(msg.status(), Some(0x99));
        assert_eq!(msg.channel(), Some(9));
        assert_eq!(msg.data1(), Some(60));
        assert_eq!(msg.data2(), Some(100));
        assert_eq!(msg.wire_bytes(), Some(vec![0x99, 60, 100]));
    }

    #[test]
    fn test_note_on_validation() {
        assert!(MidiMessage::note_on(16, 60, 100).is_err());
        assert!(MidiMessage::note_on(0, 128, 100).is_err());
        assert!(MidiMessage::note_on(0, 60, 128).is_err());
    }

    #[test]
    fn test_control_change() {
        let msg = MidiMessage::control_change(2, ALL_NOTES_OFF, 0).unwrap();
        assert_eq!(msg.status(), Some(0xB2));
        assert_eq!(msg.data1(), Some(123));
    }

    #[test]
    fn test_program_change_is_two_bytes() {
        let msg = MidiMessage::program_change(0, 5).unwrap();
        assert_eq!(msg.wire_bytes(), Some(vec![0xC0, 5]));
    }

    #[test]
    fn test_quarter_frame() {
        let msg = MidiMessage::quarter_frame(3, 0x0A).unwrap();
        assert_eq!(msg.status(), Some(0xF1));
        assert_eq!(msg.data1(), Some(0x3A));
        assert!(MidiMessage::quarter_frame(8, 0).is_err());
        assert!(MidiMessage::quarter_frame(0, 0x10).is_err());
    }

    #[test]
    fn test_sysex_validation() {
        assert!(MidiMessage::sysex(vec![0xF0, 0x7F, 0xF7]).is_ok());
        assert!(MidiMessage::sysex(vec![0x7F, 0xF7]).is_err());
        assert!(MidiMessage::sysex(vec![0xF0, 0x7F]).is_err());
    }

    #[test]
    fn test_tempo_round_trip() {
        // 120 BPM = 500000 microseconds per quarter
        let msg = MidiMessage::tempo(120.0);
        assert!(msg.is_meta());
        assert_eq!(msg.meta_type(), Some(META_TEMPO));
        assert_eq!(msg.tempo_bpm(), Some(120.0));
        assert_eq!(msg.wire_bytes(), None);

        let msg = MidiMessage::tempo(90.0);
        let bpm = msg.tempo_bpm().unwrap();
        assert!((bpm - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_track_name() {
        let msg = MidiMessage::track_name("Lead");
        assert_eq!(msg.meta_text(), Some("Lead".to_string()));
        assert_eq!(msg.channel(), None);
    }
}

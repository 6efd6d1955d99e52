/// Channel voice messages the sequencer emits, and their wire encoding

/// Controller number for "All Notes Off"
pub const ALL_NOTES_OFF_CC: u8 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    AllNotesOff { channel: u8 },
}

impl MidiMessage {
    /// Note on with a 0.0..=1.0 velocity, as the volume controls produce.
    pub fn note_on(channel: u8, pitch: u8, velocity: f32) -> Self {
        Self::NoteOn {
            channel,
            pitch: pitch.min(127),
            velocity: velocity_to_byte(velocity),
        }
    }

    pub fn note_off(channel: u8, pitch: u8) -> Self {
        Self::NoteOff {
            channel,
            pitch: pitch.min(127),
        }
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::AllNotesOff { channel }
    }

    /// Raw three-byte message. Channels are 1-based.
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            Self::NoteOn {
                channel,
                pitch,
                velocity,
            } => [0x90 | channel_nibble(channel), pitch, velocity],
            Self::NoteOff { channel, pitch } => [0x80 | channel_nibble(channel), pitch, 0],
            Self::AllNotesOff { channel } => {
                [0xB0 | channel_nibble(channel), ALL_NOTES_OFF_CC, 0]
            }
        }
    }
}

fn channel_nibble(channel: u8) -> u8 {
    channel.clamp(1, 16) - 1
}

/// Map a float velocity onto the 7-bit MIDI range.
pub fn velocity_to_byte(velocity: f32) -> u8 {
    if velocity.is_nan() {
        return 0;
    }
    (velocity * 127.0).round().clamp(0.0, 127.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_encoding() {
        assert_eq!(MidiMessage::note_on(1, 35, 1.0).to_bytes(), [0x90, 35, 127]);
        assert_eq!(MidiMessage::note_on(2, 60, 0.5).to_bytes(), [0x91, 60, 64]);
    }

    #[test]
    fn test_note_off_encoding() {
        assert_eq!(MidiMessage::note_off(2, 62).to_bytes(), [0x81, 62, 0]);
    }

    #[test]
    fn test_all_notes_off_is_cc_123() {
        assert_eq!(MidiMessage::all_notes_off(1).to_bytes(), [0xB0, 123, 0]);
        assert_eq!(MidiMessage::all_notes_off(16).to_bytes(), [0xBF, 123, 0]);
    }

    #[test]
    fn test_velocity_mapping() {
        assert_eq!(velocity_to_byte(0.0), 0);
        assert_eq!(velocity_to_byte(1.0), 127);
        assert_eq!(velocity_to_byte(2.0), 127);
        assert_eq!(velocity_to_byte(-1.0), 0);
        assert_eq!(velocity_to_byte(f32::NAN), 0);
    }
}

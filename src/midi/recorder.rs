/// In-memory note sink
use super::NoteSink;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoteEvent {
    On { channel: u8, pitch: u8, velocity: f32 },
    Off { channel: u8, pitch: u8 },
    AllOff { channel: u8 },
}

/// Records every call it receives. `bound` controls what `is_bound` reports,
/// so the silent mode can be exercised without a device.
#[derive(Debug, Clone)]
pub struct NoteRecorder {
    events: Vec<NoteEvent>,
    bound: bool,
}

impl NoteRecorder {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            bound: true,
        }
    }

    pub fn unbound() -> Self {
        Self {
            events: Vec::new(),
            bound: false,
        }
    }

    pub fn set_bound(&mut self, bound: bool) {
        self.bound = bound;
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<NoteEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Pitches of the note-ons on one channel, in order.
    pub fn note_ons(&self, channel: u8) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                NoteEvent::On { channel: c, pitch, .. } if c == channel => Some(pitch),
                _ => None,
            })
            .collect()
    }
}

impl Default for NoteRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteSink for NoteRecorder {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: f32) {
        self.events.push(NoteEvent::On {
            channel,
            pitch,
            velocity,
        });
    }

    fn note_off(&mut self, channel: u8, pitch: u8) {
        self.events.push(NoteEvent::Off { channel, pitch });
    }

    fn all_notes_off(&mut self, channel: u8) {
        self.events.push(NoteEvent::AllOff { channel });
    }

    fn is_bound(&self) -> bool {
        self.bound
    }
}

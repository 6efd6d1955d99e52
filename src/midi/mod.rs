/// MIDI output using midir
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{Error, Result};

pub mod message;
pub mod recorder;

pub use message::MidiMessage;
pub use recorder::{NoteEvent, NoteRecorder};

/// Channel used by the drum lanes
pub const DRUM_CHANNEL: u8 = 1;
/// Channel used by the melodic voice
pub const MELODIC_CHANNEL: u8 = 2;

/// Anything the transport can play notes into.
///
/// Sends are fire-and-forget: implementations log failures and carry on.
/// Channels are 1-based.
pub trait NoteSink {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: f32);
    fn note_off(&mut self, channel: u8, pitch: u8);
    fn all_notes_off(&mut self, channel: u8);

    /// Whether an output is bound. An unbound sink puts the transport in
    /// silent mode.
    fn is_bound(&self) -> bool {
        true
    }
}

pub struct MidiOutputDevice {
    client_name: String,
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
}

impl MidiOutputDevice {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports(client_name: &str) -> Vec<String> {
        match MidiOutput::new(client_name) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("MIDI output unavailable: {}", e);
                vec![]
            }
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new(&self.client_name)?;

        let ports = midi_out.ports();
        let port = ports.get(port_index).ok_or(Error::PortIndex(port_index))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("port {}", port_index));

        let connection = midi_out
            .connect(port, &self.client_name)
            .map_err(|e| Error::Connect(e.to_string()))?;

        log::info!("Connected MIDI output '{}'", name);
        self.connection = Some(connection);
        self.port_name = Some(name);
        Ok(())
    }

    pub fn connect_by_name(&mut self, name: &str) -> Result<()> {
        let index = Self::available_ports(&self.client_name)
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| Error::PortName(name.to_string()))?;
        self.connect(index)
    }

    /// Bind the named port if given, otherwise the first port available.
    pub fn connect_preferred(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) => self.connect_by_name(name),
            None => self.connect(0),
        }
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            log::info!("Disconnected MIDI output");
        }
        self.port_name = None;
    }

    pub fn send(&mut self, message: MidiMessage) -> Result<()> {
        if let Some(ref mut conn) = self.connection {
            conn.send(&message.to_bytes())?;
        }
        Ok(())
    }

    fn send_or_warn(&mut self, message: MidiMessage) {
        if let Err(e) = self.send(message) {
            log::warn!("Dropped {:?}: {}", message, e);
        }
    }
}

impl NoteSink for MidiOutputDevice {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: f32) {
        self.send_or_warn(MidiMessage::note_on(channel, pitch, velocity));
    }

    fn note_off(&mut self, channel: u8, pitch: u8) {
        self.send_or_warn(MidiMessage::note_off(channel, pitch));
    }

    fn all_notes_off(&mut self, channel: u8) {
        self.send_or_warn(MidiMessage::all_notes_off(channel));
    }

    fn is_bound(&self) -> bool {
        self.connection.is_some()
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(61), "C#4");
        assert_eq!(midi_note_name(0), "C-1");
        assert_eq!(midi_note_name(127), "G9");
    }

    #[test]
    fn test_unconnected_device_is_silent() {
        let mut device = MidiOutputDevice::new("stepseq test");
        assert!(!device.is_bound());
        assert!(device.send(MidiMessage::note_on(1, 35, 1.0)).is_ok());
        assert_eq!(device.port_name(), None);
    }
}

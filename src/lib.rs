/// STEPSEQ - a MIDI step sequencer and a bouncing-ball toy
///
/// This library provides the pieces behind both demos:
/// - A 16-step pattern: four drum lanes and an eight-note melodic line
/// - A transport thread that walks the pattern and plays it into a note sink
/// - MIDI output for production use, and a recorder for inspection
/// - Ball physics with collision listeners, and a chime that plays on bounces

pub mod audio;
pub mod ball;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioOutput, Chime};
pub use ball::{Ball, BallField, Bounds, Collision, CollisionListener};
pub use config::Config;
pub use error::{Error, Result};
pub use midi::{midi_note_name, MidiOutputDevice, NoteEvent, NoteRecorder, NoteSink};
pub use sequencer::pattern::{Lane, Pattern, PatternSource, SharedPattern};
pub use sequencer::playback::{PlaybackEvent, StopOutcome, Transport, TransportState};
pub use sequencer::Sequencer;

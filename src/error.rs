/// Crate-wide error type
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to create MIDI output: {0}")]
    MidiInit(#[from] midir::InitError),

    #[error("Invalid MIDI port index: {0}")]
    PortIndex(usize),

    #[error("No MIDI output port named '{0}'")]
    PortName(String),

    #[error("Failed to connect to MIDI port: {0}")]
    Connect(String),

    #[error("Failed to send MIDI message: {0}")]
    Send(#[from] midir::SendError),

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Settings loaded from the embedded defaults plus an optional user file
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::sequencer::pattern::{DEFAULT_SLOTS, SLOT_COUNT};
use crate::sequencer::playback::{DEFAULT_BPM, DEFAULT_STEPS_PER_BEAT, DEFAULT_STOP_TIMEOUT};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    transport: TransportFile,
    #[serde(default)]
    pattern: PatternFile,
    #[serde(default)]
    midi: MidiFile,
    #[serde(default)]
    balls: BallsFile,
}

#[derive(Deserialize, Default)]
struct TransportFile {
    bpm: Option<f32>,
    steps_per_beat: Option<u32>,
    stop_timeout_ms: Option<u64>,
    melodic_volume: Option<f32>,
    step_volume: Option<f32>,
}

#[derive(Deserialize, Default)]
struct PatternFile {
    slots: Option<[u8; SLOT_COUNT]>,
}

#[derive(Deserialize, Default)]
struct MidiFile {
    client_name: Option<String>,
    output_port: Option<String>,
}

#[derive(Deserialize, Default)]
struct BallsFile {
    count: Option<usize>,
    timer_ms: Option<u64>,
    width: Option<f32>,
    height: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub bpm: f32,
    pub steps_per_beat: u32,
    pub stop_timeout_ms: u64,
    pub melodic_volume: f32,
    pub step_volume: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternConfig {
    pub slots: [u8; SLOT_COUNT],
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiConfig {
    pub client_name: String,
    /// Port to bind at startup; the first port when unset
    pub output_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BallConfig {
    pub count: usize,
    pub timer_ms: u64,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub transport: TransportConfig,
    pub pattern: PatternConfig,
    pub midi: MidiConfig,
    pub balls: BallConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                bpm: DEFAULT_BPM,
                steps_per_beat: DEFAULT_STEPS_PER_BEAT,
                stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
                melodic_volume: 1.0,
                step_volume: 1.0,
            },
            pattern: PatternConfig {
                slots: DEFAULT_SLOTS,
            },
            midi: MidiConfig {
                client_name: "stepseq".to_string(),
                output_port: None,
            },
            balls: BallConfig {
                count: 4,
                timer_ms: 40,
                width: 300.0,
                height: 300.0,
            },
        }
    }
}

impl Config {
    /// Embedded defaults overlaid with the user's config file, if any.
    ///
    /// A missing, unreadable or malformed user file leaves the defaults in place.
    pub fn load() -> Self {
        let mut config = match Self::from_toml_str(DEFAULT_CONFIG) {
            Ok(config) => config,
            Err(e) => {
                log::error!(target: "config", "embedded config.toml is invalid: {}", e);
                Self::default()
            }
        };

        if let Some(path) = user_config_path() {
            if path.exists() {
                match read_file(&path) {
                    Ok(user) => config.apply(user),
                    Err(e) => {
                        log::warn!(target: "config", "ignoring config {}: {}", path.display(), e)
                    }
                }
            }
        }

        config
    }

    /// Defaults overlaid with one specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.apply(read_file(path)?);
        Ok(config)
    }

    /// Defaults overlaid with whatever keys `contents` sets.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply(toml::from_str(contents)?);
        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        let t = file.transport;
        if let Some(bpm) = t.bpm {
            self.transport.bpm = bpm;
        }
        if let Some(steps) = t.steps_per_beat {
            self.transport.steps_per_beat = steps.max(1);
        }
        if let Some(ms) = t.stop_timeout_ms {
            self.transport.stop_timeout_ms = ms;
        }
        if let Some(v) = t.melodic_volume {
            self.transport.melodic_volume = v;
        }
        if let Some(v) = t.step_volume {
            self.transport.step_volume = v;
        }

        if let Some(slots) = file.pattern.slots {
            self.pattern.slots = slots;
        }

        if let Some(name) = file.midi.client_name {
            self.midi.client_name = name;
        }
        if file.midi.output_port.is_some() {
            self.midi.output_port = file.midi.output_port;
        }

        let b = file.balls;
        if let Some(count) = b.count {
            self.balls.count = count;
        }
        if let Some(ms) = b.timer_ms {
            self.balls.timer_ms = ms.max(1);
        }
        if let Some(w) = b.width {
            self.balls.width = w;
        }
        if let Some(h) = b.height {
            self.balls.height = h;
        }
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stepseq").join("config.toml"))
}

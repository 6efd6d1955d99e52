/// Audio output using cpal - short decaying tones for ball collisions
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

use crate::ball::{Collision, CollisionListener};

/// Seconds for a ping to fall to 1/e of its start level
const PING_DECAY_SECS: f32 = 0.25;
const PING_LEVEL: f32 = 0.2;
const SILENT: f32 = 0.001;
const MAX_VOICES: usize = 16;

/// Pitches handed out to balls in turn (C major pentatonic)
const CHIME_NOTES: [u8; 5] = [72, 74, 76, 79, 81];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ping {
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    voices: Arc<Mutex<Vec<Ping>>>,
}

impl AudioOutput {
    pub fn new() -> Option<Self> {
        let voices = Arc::new(Mutex::new(Vec::new()));
        let stream = Self::setup_audio_stream(Arc::clone(&voices))?;

        Some(Self {
            _stream: Some(stream),
            voices,
        })
    }

    fn setup_audio_stream(voices: Arc<Mutex<Vec<Ping>>>) -> Option<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let config = device.default_output_config().ok()?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut voices = voices.lock().unwrap_or_else(|e| e.into_inner());
                    render(&mut voices, data, channels, sample_rate);
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            ),
            format => {
                log::warn!("Unsupported output sample format {:?}, chimes muted", format);
                return None;
            }
        };

        match stream {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    log::warn!("Could not start audio stream: {}", e);
                }
                Some(stream)
            }
            Err(e) => {
                log::warn!("Could not open audio output: {}", e);
                None
            }
        }
    }

    /// A listener that plays a tone for each collision through this output.
    pub fn chime(&self) -> Chime {
        Chime {
            voices: Arc::clone(&self.voices),
        }
    }
}

impl Default for AudioOutput {
    fn default() -> Self {
        Self::new().unwrap_or_else(|| Self {
            _stream: None,
            voices: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

/// Collision listener that starts a ping for the ball that bounced
#[derive(Clone)]
pub struct Chime {
    voices: Arc<Mutex<Vec<Ping>>>,
}

impl Chime {
    pub fn ping(&self, note: u8) {
        let mut voices = self.voices.lock().unwrap_or_else(|e| e.into_inner());
        if voices.len() >= MAX_VOICES {
            voices.remove(0);
        }
        voices.push(Ping {
            frequency: midi_note_to_frequency(note),
            phase: 0.0,
            amplitude: 1.0,
        });
    }

    pub fn active_voices(&self) -> usize {
        self.voices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl CollisionListener for Chime {
    fn ball_collision(&mut self, collision: &Collision) {
        self.ping(chime_note(collision.ball));
    }
}

pub fn chime_note(ball: usize) -> u8 {
    CHIME_NOTES[ball % CHIME_NOTES.len()]
}

/// Mix the active pings into an interleaved buffer, dropping the ones that
/// have died away.
fn render(voices: &mut Vec<Ping>, data: &mut [f32], channels: usize, sample_rate: f32) {
    let decay = (-1.0 / (PING_DECAY_SECS * sample_rate)).exp();

    for frame in data.chunks_mut(channels.max(1)) {
        let mut sample = 0.0;
        for ping in voices.iter_mut() {
            sample += (ping.phase * 2.0 * std::f32::consts::PI).sin() * ping.amplitude * PING_LEVEL;
            ping.phase += ping.frequency / sample_rate;
            if ping.phase >= 1.0 {
                ping.phase -= 1.0;
            }
            ping.amplitude *= decay;
        }
        frame.fill(sample);
    }

    voices.retain(|p| p.amplitude > SILENT);
}

fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_chime() -> Chime {
        Chime {
            voices: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[test]
    fn test_note_frequencies() {
        assert!((midi_note_to_frequency(69) - 440.0).abs() < 1e-3);
        assert!((midi_note_to_frequency(81) - 880.0).abs() < 1e-2);
    }

    #[test]
    fn test_collision_starts_a_ping() {
        let mut chime = silent_chime();
        chime.ball_collision(&Collision {
            ball: 6,
            x: 0.0,
            y: 0.0,
        });
        assert_eq!(chime.active_voices(), 1);
        assert_eq!(chime_note(6), 74);
    }

    #[test]
    fn test_voice_limit() {
        let chime = silent_chime();
        for i in 0..(MAX_VOICES + 5) {
            chime.ping(60 + i as u8);
        }
        assert_eq!(chime.active_voices(), MAX_VOICES);
    }

    #[test]
    fn test_render_mixes_and_decays() {
        let mut voices = vec![Ping {
            frequency: 440.0,
            phase: 0.25,
            amplitude: 1.0,
        }];
        let mut data = [0.0f32; 4];
        render(&mut voices, &mut data, 2, 48_000.0);

        // Both channels of a frame carry the same sample
        assert_eq!(data[0], data[1]);
        assert!((data[0] - PING_LEVEL).abs() < 1e-4);
        assert!(voices[0].amplitude < 1.0);
    }

    #[test]
    fn test_render_drops_dead_voices() {
        let mut voices = vec![Ping {
            frequency: 440.0,
            phase: 0.0,
            amplitude: SILENT,
        }];
        let mut data = [0.0f32; 2];
        render(&mut voices, &mut data, 1, 48_000.0);
        assert!(voices.is_empty());
    }
}

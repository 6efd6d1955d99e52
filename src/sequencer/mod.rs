/// Core sequencer logic - the pattern, the transport and the controller the UI drives
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod pattern;
pub mod playback;

use crate::config::Config;
use crate::error::Result;
use crate::midi::{NoteSink, DRUM_CHANNEL, MELODIC_CHANNEL};
use pattern::{Lane, Pattern, PatternSource, SharedPattern};
use playback::{PlaybackEvent, StopOutcome, Transport, TransportControls, TransportState};

pub struct Sequencer<S: NoteSink + Send + 'static> {
    pattern: SharedPattern,
    controls: Arc<TransportControls>,
    transport: Transport<S>,
    current_position: usize,
}

impl<S: NoteSink + Send + 'static> Sequencer<S> {
    pub fn new(sink: S) -> Self {
        Self::from_config(sink, &Config::default())
    }

    pub fn from_config(sink: S, config: &Config) -> Self {
        let transport_cfg = &config.transport;
        let pattern = SharedPattern::new(Pattern::with_slots(config.pattern.slots));
        let controls = Arc::new(TransportControls::new(
            transport_cfg.bpm,
            transport_cfg.steps_per_beat,
        ));
        controls.set_melodic_volume(transport_cfg.melodic_volume);
        controls.set_step_volume(transport_cfg.step_volume);

        let transport = Transport::new(
            Arc::new(Mutex::new(sink)),
            pattern.clone(),
            Arc::clone(&controls),
        )
        .with_stop_timeout(Duration::from_millis(transport_cfg.stop_timeout_ms));

        Self {
            pattern,
            controls,
            transport,
            current_position: 0,
        }
    }

    pub fn sink(&self) -> &Arc<Mutex<S>> {
        self.transport.sink()
    }

    /// Run `f` against the note sink, e.g. to bind or unbind a device.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut sink = self.sink().lock().unwrap_or_else(|e| e.into_inner());
        f(&mut sink)
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern.snapshot()
    }

    pub fn shared_pattern(&self) -> &SharedPattern {
        &self.pattern
    }

    pub fn controls(&self) -> &Arc<TransportControls> {
        &self.controls
    }

    pub fn start(&mut self) -> Result<()> {
        self.transport.start()
    }

    /// Stop playback and rewind to the first step.
    pub fn stop(&mut self) -> StopOutcome {
        let outcome = self.transport.stop();
        // Stale positions from the finished run
        let _ = self.transport.poll_events();
        self.current_position = 0;
        outcome
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_running()
    }

    /// Drain playback events, tracking the playhead as they go by.
    pub fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let events = self.transport.poll_events();
        for event in &events {
            match event {
                PlaybackEvent::StepAdvanced(step) => self.current_position = *step,
            }
        }
        events
    }

    pub fn current_position(&self) -> usize {
        self.current_position
    }

    pub fn toggle_step(&self, lane: Lane, step: usize) {
        self.pattern.toggle_step(lane, step);
    }

    pub fn is_step_active(&self, lane: Lane, step: usize) -> bool {
        self.pattern.is_step_active(lane, step)
    }

    pub fn clear_steps(&self) {
        self.pattern.update(|p| p.drums_mut().clear());
    }

    pub fn slot(&self, slot: usize) -> Option<u8> {
        self.pattern.read(|p| p.slot(slot))
    }

    /// Change a melodic slot. Whatever the melodic voice was holding is
    /// released so the old pitch does not hang.
    pub fn set_slot(&self, slot: usize, pitch: u8) {
        self.pattern.set_slot(slot, pitch);
        self.all_notes_off(MELODIC_CHANNEL);
    }

    pub fn bpm(&self) -> f32 {
        self.controls.bpm()
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.controls.set_bpm(bpm);
    }

    pub fn tick_interval(&self) -> Duration {
        self.controls.tick_interval()
    }

    pub fn melodic_volume(&self) -> f32 {
        self.controls.melodic_volume()
    }

    pub fn set_melodic_volume(&self, volume: f32) {
        self.controls.set_melodic_volume(volume);
    }

    pub fn step_volume(&self) -> f32 {
        self.controls.step_volume()
    }

    pub fn set_step_volume(&self, volume: f32) {
        self.controls.set_step_volume(volume);
    }

    pub fn melodic_enabled(&self) -> bool {
        self.controls.melodic_enabled()
    }

    pub fn set_melodic_enabled(&self, enabled: bool) {
        self.controls.set_melodic_enabled(enabled);
        if !enabled {
            self.all_notes_off(MELODIC_CHANNEL);
        }
    }

    pub fn drums_enabled(&self) -> bool {
        self.controls.drums_enabled()
    }

    pub fn set_drums_enabled(&self, enabled: bool) {
        self.controls.set_drums_enabled(enabled);
        if !enabled {
            self.all_notes_off(DRUM_CHANNEL);
        }
    }

    fn all_notes_off(&self, channel: u8) {
        self.with_sink(|sink| {
            if sink.is_bound() {
                sink.all_notes_off(channel);
            }
        });
    }
}

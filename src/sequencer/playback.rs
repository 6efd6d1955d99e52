/// Playback engine - the transport worker, its live controls and the per-tick note logic
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::pattern::{Lane, PatternSource, SharedPattern};
use crate::error::Result;
use crate::midi::{NoteSink, DRUM_CHANNEL, MELODIC_CHANNEL};

pub const MIN_BPM: f32 = 60.0;
pub const MAX_BPM: f32 = 180.0;
pub const DEFAULT_BPM: f32 = 120.0;
/// 16th-note steps
pub const DEFAULT_STEPS_PER_BEAT: u32 = 4;
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(3000);

const EVENT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    StepAdvanced(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running
    Idle,
    /// The worker saw the request and cleaned up itself
    Graceful,
    /// The timeout elapsed; the worker was detached and the caller cleaned up
    Forced,
}

/// Pattern positions for one tick. Earlier positions wrap to the top of the
/// range, so `previous` at tick 0 is the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepIndices {
    pub current: usize,
    pub previous: usize,
    pub previous_melodic: usize,
}

impl StepIndices {
    pub fn at(step: u64, len: usize) -> Self {
        Self {
            current: wrap_step(step, 0, len),
            previous: wrap_step(step, 1, len),
            previous_melodic: wrap_step(step, 2, len),
        }
    }
}

/// `(step - back) mod len`, always in `0..len`.
pub fn wrap_step(step: u64, back: u64, len: usize) -> usize {
    assert!(len > 0, "pattern length must be non-zero");
    let len = len as u64;
    ((step % len + len - back % len) % len) as usize
}

/// Step interval for a tempo.
pub fn tick_interval(bpm: f32, steps_per_beat: u32) -> Duration {
    let steps_per_second = bpm / 60.0 * steps_per_beat.max(1) as f32;
    Duration::from_secs_f32(1.0 / steps_per_second)
}

/// Values the UI edits while the worker reads them once per tick
#[derive(Debug)]
pub struct TransportControls {
    bpm: AtomicU32,
    steps_per_beat: u32,
    melodic_volume: AtomicU32,
    step_volume: AtomicU32,
    melodic_enabled: AtomicBool,
    drums_enabled: AtomicBool,
}

impl TransportControls {
    pub fn new(bpm: f32, steps_per_beat: u32) -> Self {
        Self {
            bpm: AtomicU32::new(clamp_bpm(bpm).to_bits()),
            steps_per_beat: steps_per_beat.max(1),
            melodic_volume: AtomicU32::new(1.0f32.to_bits()),
            step_volume: AtomicU32::new(1.0f32.to_bits()),
            melodic_enabled: AtomicBool::new(true),
            drums_enabled: AtomicBool::new(true),
        }
    }

    pub fn bpm(&self) -> f32 {
        f32::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.bpm.store(clamp_bpm(bpm).to_bits(), Ordering::Relaxed);
    }

    pub fn steps_per_beat(&self) -> u32 {
        self.steps_per_beat
    }

    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.bpm(), self.steps_per_beat)
    }

    pub fn melodic_volume(&self) -> f32 {
        f32::from_bits(self.melodic_volume.load(Ordering::Relaxed))
    }

    pub fn set_melodic_volume(&self, volume: f32) {
        self.melodic_volume
            .store(clamp_volume(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn step_volume(&self) -> f32 {
        f32::from_bits(self.step_volume.load(Ordering::Relaxed))
    }

    pub fn set_step_volume(&self, volume: f32) {
        self.step_volume
            .store(clamp_volume(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn melodic_enabled(&self) -> bool {
        self.melodic_enabled.load(Ordering::Relaxed)
    }

    pub fn set_melodic_enabled(&self, enabled: bool) {
        self.melodic_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn drums_enabled(&self) -> bool {
        self.drums_enabled.load(Ordering::Relaxed)
    }

    pub fn set_drums_enabled(&self, enabled: bool) {
        self.drums_enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Default for TransportControls {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_STEPS_PER_BEAT)
    }
}

fn clamp_bpm(bpm: f32) -> f32 {
    if bpm.is_nan() {
        DEFAULT_BPM
    } else {
        bpm.clamp(MIN_BPM, MAX_BPM)
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Notes decided for one tick, sent once the pattern is released
#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    pub indices: StepIndices,
    /// Pitch to release, pitch to start and its velocity
    pub melodic: Option<(u8, u8, f32)>,
    pub drums: Vec<u8>,
    pub drum_velocity: f32,
}

impl TickPlan {
    /// Send the planned notes. With no output bound nothing is sent.
    pub fn emit<S: NoteSink + ?Sized>(&self, sink: &mut S) {
        if !sink.is_bound() {
            log::trace!("no output bound, step {} silent", self.indices.current);
            return;
        }

        if let Some((off, on, velocity)) = self.melodic {
            sink.note_off(MELODIC_CHANNEL, off);
            sink.note_on(MELODIC_CHANNEL, on, velocity);
        }
        for &note in &self.drums {
            sink.note_off(DRUM_CHANNEL, note);
            sink.note_on(DRUM_CHANNEL, note, self.drum_velocity);
        }
    }
}

/// Step counter plus the note decisions for one tick
#[derive(Debug, Default)]
pub struct Playhead {
    step: u64,
}

impl Playhead {
    pub fn new() -> Self {
        Self { step: 0 }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Decide the notes for the current step, then advance by one.
    pub fn plan<P>(&mut self, pattern: &P, controls: &TransportControls) -> TickPlan
    where
        P: PatternSource + ?Sized,
    {
        let indices = StepIndices::at(self.step, pattern.len());

        // The melodic line lives on even steps only
        let melodic = (controls.melodic_enabled() && indices.current % 2 == 0).then(|| {
            (
                pattern.pitch_at(indices.previous_melodic),
                pattern.pitch_at(indices.current),
                controls.melodic_volume(),
            )
        });

        let drums = if controls.drums_enabled() {
            Lane::ALL
                .into_iter()
                .filter(|&lane| pattern.is_step_active(lane, indices.current))
                .map(Lane::note)
                .collect()
        } else {
            Vec::new()
        };

        self.step += 1;
        TickPlan {
            indices,
            melodic,
            drums,
            drum_velocity: controls.step_volume(),
        }
    }

    /// Plan and emit in one go.
    ///
    /// With no output bound nothing is emitted but the step still advances.
    pub fn tick<P, S>(
        &mut self,
        pattern: &P,
        controls: &TransportControls,
        sink: &mut S,
    ) -> StepIndices
    where
        P: PatternSource + ?Sized,
        S: NoteSink + ?Sized,
    {
        let plan = self.plan(pattern, controls);
        plan.emit(sink);
        plan.indices
    }
}

/// All-notes-off on both channels, if anything is listening.
pub fn silence<S: NoteSink + ?Sized>(sink: &mut S) {
    if sink.is_bound() {
        sink.all_notes_off(DRUM_CHANNEL);
        sink.all_notes_off(MELODIC_CHANNEL);
    }
}

fn lock<S>(sink: &Mutex<S>) -> MutexGuard<'_, S> {
    sink.lock().unwrap_or_else(|e| e.into_inner())
}

/// Flags for one run of the worker
#[derive(Debug)]
struct RunState {
    running: AtomicBool,
    /// Set by a forced stop that already sent all-notes-off
    silenced: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
    run: Arc<RunState>,
}

struct WorkerContext<S> {
    sink: Arc<Mutex<S>>,
    pattern: SharedPattern,
    controls: Arc<TransportControls>,
    run: Arc<RunState>,
    events: SyncSender<PlaybackEvent>,
}

pub struct Transport<S: NoteSink + Send + 'static> {
    sink: Arc<Mutex<S>>,
    pattern: SharedPattern,
    controls: Arc<TransportControls>,
    worker: Option<Worker>,
    /// Events of the current (or last) run only
    receiver: Receiver<PlaybackEvent>,
    stop_timeout: Duration,
}

impl<S: NoteSink + Send + 'static> Transport<S> {
    pub fn new(
        sink: Arc<Mutex<S>>,
        pattern: SharedPattern,
        controls: Arc<TransportControls>,
    ) -> Self {
        let (_, receiver) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);

        Self {
            sink,
            pattern,
            controls,
            worker: None,
            receiver,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn sink(&self) -> &Arc<Mutex<S>> {
        &self.sink
    }

    pub fn controls(&self) -> &Arc<TransportControls> {
        &self.controls
    }

    pub fn state(&self) -> TransportState {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => TransportState::Running,
            _ => TransportState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == TransportState::Running
    }

    /// Spawn the worker. Does nothing if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a worker that died on its own
        if self.worker.is_some() {
            self.stop();
        }

        let run = Arc::new(RunState {
            running: AtomicBool::new(true),
            silenced: AtomicBool::new(false),
        });
        let (done_tx, done_rx) = mpsc::channel();
        let (events, receiver) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
        let ctx = WorkerContext {
            sink: Arc::clone(&self.sink),
            pattern: self.pattern.clone(),
            controls: Arc::clone(&self.controls),
            run: Arc::clone(&run),
            events,
        };

        let handle = thread::Builder::new()
            .name("sequencer".into())
            .spawn(move || {
                self::run(ctx);
                let _ = done_tx.send(());
            })?;

        log::info!("Transport started at {} BPM", self.controls.bpm());
        self.receiver = receiver;
        self.worker = Some(Worker {
            handle,
            done: done_rx,
            run,
        });
        Ok(())
    }

    /// Ask the worker to exit and wait up to the stop timeout for it.
    ///
    /// Never waits longer than the timeout. All-notes-off goes out on both
    /// channels (if an output is bound): from the worker when it exits, or
    /// from here on a forced stop. If a forced stop finds the output busy
    /// with a send, the detached worker silences it once that send returns.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(worker) = self.worker.take() else {
            return StopOutcome::Idle;
        };

        worker.run.running.store(false, Ordering::Release);

        match worker.done.recv_timeout(self.stop_timeout) {
            Ok(()) => {
                let _ = worker.handle.join();
                log::info!("Transport stopped");
                StopOutcome::Graceful
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The worker panicked before it could clean up
                if let Err(e) = worker.handle.join() {
                    log::error!("Sequencer thread panicked: {:?}", e);
                }
                silence(&mut *lock(&self.sink));
                StopOutcome::Forced
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Sequencer thread did not stop within {:?}, detaching it",
                    self.stop_timeout
                );
                match self.sink.try_lock() {
                    Ok(mut sink) => {
                        silence(&mut *sink);
                        worker.run.silenced.store(true, Ordering::Release);
                    }
                    Err(TryLockError::Poisoned(e)) => {
                        silence(&mut *e.into_inner());
                        worker.run.silenced.store(true, Ordering::Release);
                    }
                    Err(TryLockError::WouldBlock) => {
                        log::warn!("Output busy, detached thread will send all-notes-off");
                    }
                }
                StopOutcome::Forced
            }
        }
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<S: NoteSink + Send + 'static> Drop for Transport<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: NoteSink>(ctx: WorkerContext<S>) {
    let mut playhead = Playhead::new();

    while ctx.run.running.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        let plan = ctx.pattern.read(|pattern| playhead.plan(pattern, &ctx.controls));
        plan.emit(&mut *lock(&ctx.sink));

        // Dropped when the UI is not draining
        let _ = ctx
            .events
            .try_send(PlaybackEvent::StepAdvanced(plan.indices.current));

        // Tempo is read here, so a change lands on the next boundary
        let deadline = tick_start + ctx.controls.tick_interval();
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }

    // Checked under the sink lock, which a forced stop holds while it sets the flag
    let mut sink = lock(&ctx.sink);
    if !ctx.run.silenced.load(Ordering::Acquire) {
        silence(&mut *sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{NoteEvent, NoteRecorder};
    use crate::sequencer::pattern::{Pattern, REST, STEP_COUNT};

    fn silent_drums() -> Pattern {
        Pattern::with_slots([60, 62, 64, 65, 67, 65, 64, 62])
    }

    #[test]
    fn test_indices_wrap_at_zero() {
        let indices = StepIndices::at(0, 16);
        assert_eq!(indices.current, 0);
        assert_eq!(indices.previous, 15);
        assert_eq!(indices.previous_melodic, 14);

        let indices = StepIndices::at(1, 16);
        assert_eq!(indices.previous, 0);
        assert_eq!(indices.previous_melodic, 15);
    }

    #[test]
    fn test_indices_stay_in_range() {
        for len in [1usize, 2, 3, 16] {
            for n in 0..100u64 {
                let i = StepIndices::at(n, len);
                assert_eq!(i.current, (n % len as u64) as usize);
                assert!(i.current < len && i.previous < len && i.previous_melodic < len);
                assert_eq!((i.previous + 1) % len, i.current);
            }
        }
    }

    #[test]
    fn test_indices_for_huge_counter() {
        let i = StepIndices::at(u64::MAX, 16);
        assert_eq!(i.current, 15);
        assert_eq!(i.previous, 14);
    }

    #[test]
    #[should_panic]
    fn test_zero_length_is_a_contract_violation() {
        wrap_step(3, 1, 0);
    }

    #[test]
    fn test_melodic_scenario_one_cycle() {
        let pattern = silent_drums();
        let controls = TransportControls::default();
        let mut sink = NoteRecorder::new();
        let mut playhead = Playhead::new();

        for _ in 0..STEP_COUNT {
            playhead.tick(&pattern, &controls, &mut sink);
        }

        assert_eq!(sink.note_ons(MELODIC_CHANNEL), vec![60, 62, 64, 65, 67, 65, 64, 62]);
        assert!(sink.note_ons(DRUM_CHANNEL).is_empty());
        // Tick 0 releases the pitch at step 14, two steps back
        assert_eq!(
            &sink.events()[..2],
            &[
                NoteEvent::Off { channel: MELODIC_CHANNEL, pitch: 62 },
                NoteEvent::On { channel: MELODIC_CHANNEL, pitch: 60, velocity: 1.0 },
            ]
        );
        assert_eq!(
            sink.events()[2],
            NoteEvent::Off { channel: MELODIC_CHANNEL, pitch: 60 }
        );
    }

    #[test]
    fn test_melodic_fires_only_on_even_steps() {
        let pattern = silent_drums();
        let controls = TransportControls::default();
        let mut playhead = Playhead::new();

        for tick in 0..48u64 {
            let mut sink = NoteRecorder::new();
            playhead.tick(&pattern, &controls, &mut sink);
            let fired = !sink.note_ons(MELODIC_CHANNEL).is_empty();
            assert_eq!(fired, tick % 2 == 0, "tick {}", tick);
        }
    }

    #[test]
    fn test_rest_slot_still_sends_pair() {
        let mut pattern = silent_drums();
        pattern.set_slot(0, REST);
        let controls = TransportControls::default();
        let mut sink = NoteRecorder::new();
        Playhead::new().tick(&pattern, &controls, &mut sink);

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.note_ons(MELODIC_CHANNEL), vec![REST]);
    }

    #[test]
    fn test_kick_on_first_step_fires_once_per_cycle() {
        let mut pattern = silent_drums();
        pattern.set_step(Lane::Kick, 0, true);
        let controls = TransportControls::default();
        let mut playhead = Playhead::new();
        let mut kick_ticks = Vec::new();

        for tick in 0..48u64 {
            let mut sink = NoteRecorder::new();
            playhead.tick(&pattern, &controls, &mut sink);
            let kicks = sink.note_ons(DRUM_CHANNEL);
            if !kicks.is_empty() {
                assert_eq!(kicks, vec![Lane::Kick.note()]);
                assert!(sink.events().contains(&NoteEvent::Off {
                    channel: DRUM_CHANNEL,
                    pitch: Lane::Kick.note()
                }));
                kick_ticks.push(tick);
            }
        }

        assert_eq!(kick_ticks, vec![0, 16, 32]);
    }

    #[test]
    fn test_lanes_fire_independently() {
        let mut pattern = silent_drums();
        pattern.set_step(Lane::Snare, 4, true);
        pattern.set_step(Lane::OpenHat, 4, true);
        pattern.set_step(Lane::ClosedHat, 5, true);
        let controls = TransportControls::default();
        controls.set_step_volume(0.5);
        let mut playhead = Playhead::new();
        let mut sink = NoteRecorder::new();

        for _ in 0..4 {
            playhead.tick(&pattern, &controls, &mut sink);
        }
        sink.clear();
        playhead.tick(&pattern, &controls, &mut sink);

        let drum_events: Vec<NoteEvent> = sink
            .events()
            .iter()
            .copied()
            .filter(|e| matches!(e, NoteEvent::On { channel: DRUM_CHANNEL, .. } | NoteEvent::Off { channel: DRUM_CHANNEL, .. }))
            .collect();
        assert_eq!(
            drum_events,
            vec![
                NoteEvent::Off { channel: DRUM_CHANNEL, pitch: 38 },
                NoteEvent::On { channel: DRUM_CHANNEL, pitch: 38, velocity: 0.5 },
                NoteEvent::Off { channel: DRUM_CHANNEL, pitch: 46 },
                NoteEvent::On { channel: DRUM_CHANNEL, pitch: 46, velocity: 0.5 },
            ]
        );

        sink.clear();
        playhead.tick(&pattern, &controls, &mut sink);
        assert_eq!(sink.note_ons(DRUM_CHANNEL), vec![42]);
    }

    #[test]
    fn test_toggle_affects_only_future_ticks() {
        let shared = SharedPattern::new(silent_drums());
        let controls = TransportControls::default();
        let mut playhead = Playhead::new();
        let mut sink = NoteRecorder::new();

        playhead.tick(&shared, &controls, &mut sink);
        let before = sink.events().to_vec();
        shared.toggle_step(Lane::Kick, 1);
        playhead.tick(&shared, &controls, &mut sink);

        assert_eq!(&sink.events()[..before.len()], &before[..]);
        assert_eq!(sink.note_ons(DRUM_CHANNEL), vec![Lane::Kick.note()]);
    }

    #[test]
    fn test_unbound_output_is_silent_but_advances() {
        let mut pattern = silent_drums();
        pattern.set_step(Lane::Kick, 0, true);
        let controls = TransportControls::default();
        let mut sink = NoteRecorder::unbound();
        let mut playhead = Playhead::new();

        let first = playhead.tick(&pattern, &controls, &mut sink);
        let second = playhead.tick(&pattern, &controls, &mut sink);

        assert!(sink.events().is_empty());
        assert_eq!((first.current, second.current), (0, 1));
        assert_eq!(playhead.step(), 2);
    }

    #[test]
    fn test_plan_is_taken_without_an_output() {
        let shared = SharedPattern::new(silent_drums());
        shared.update(|p| {
            p.set_step(Lane::Kick, 0, true);
            p.set_step(Lane::OpenHat, 0, true);
        });
        let controls = TransportControls::default();
        controls.set_step_volume(0.5);

        let plan = shared.read(|pattern| Playhead::new().plan(pattern, &controls));
        assert_eq!(plan.indices.current, 0);
        assert_eq!(plan.melodic, Some((62, 60, 1.0)));
        assert_eq!(plan.drums, vec![35, 46]);

        // The pattern is free again before anything is sent
        shared.toggle_step(Lane::Kick, 0);
        let mut sink = NoteRecorder::new();
        plan.emit(&mut sink);
        assert_eq!(sink.note_ons(DRUM_CHANNEL), vec![35, 46]);
        assert_eq!(sink.note_ons(MELODIC_CHANNEL), vec![60]);
    }

    #[test]
    fn test_voice_toggles_gate_emission() {
        let mut pattern = silent_drums();
        pattern.set_step(Lane::Kick, 0, true);
        let controls = TransportControls::default();
        let mut sink = NoteRecorder::new();

        controls.set_melodic_enabled(false);
        Playhead::new().tick(&pattern, &controls, &mut sink);
        assert!(sink.note_ons(MELODIC_CHANNEL).is_empty());
        assert_eq!(sink.note_ons(DRUM_CHANNEL), vec![35]);

        sink.clear();
        controls.set_melodic_enabled(true);
        controls.set_drums_enabled(false);
        Playhead::new().tick(&pattern, &controls, &mut sink);
        assert_eq!(sink.note_ons(MELODIC_CHANNEL), vec![60]);
        assert!(sink.note_ons(DRUM_CHANNEL).is_empty());
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval(120.0, 4).as_millis(), 125);
        assert_eq!(tick_interval(60.0, 4).as_millis(), 250);
        assert_eq!(tick_interval(60.0, 1).as_millis(), 1000);
    }

    #[test]
    fn test_controls_read_live_tempo() {
        let controls = TransportControls::default();
        assert_eq!(controls.tick_interval().as_millis(), 125);
        controls.set_bpm(60.0);
        assert_eq!(controls.tick_interval().as_millis(), 250);
    }

    #[test]
    fn test_controls_clamp() {
        let controls = TransportControls::default();
        controls.set_bpm(500.0);
        assert_eq!(controls.bpm(), MAX_BPM);
        controls.set_bpm(1.0);
        assert_eq!(controls.bpm(), MIN_BPM);
        controls.set_melodic_volume(1.5);
        assert_eq!(controls.melodic_volume(), 1.0);
        controls.set_step_volume(-0.1);
        assert_eq!(controls.step_volume(), 0.0);
    }

    #[test]
    fn test_silence_respects_binding() {
        let mut bound = NoteRecorder::new();
        silence(&mut bound);
        assert_eq!(
            bound.events(),
            &[
                NoteEvent::AllOff { channel: DRUM_CHANNEL },
                NoteEvent::AllOff { channel: MELODIC_CHANNEL },
            ]
        );

        let mut unbound = NoteRecorder::unbound();
        silence(&mut unbound);
        assert!(unbound.events().is_empty());
    }
}

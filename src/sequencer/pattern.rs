/// Pattern store: the drum grid and the melodic note sequence
use std::sync::{Arc, Mutex, MutexGuard};

/// Steps per pattern
pub const STEP_COUNT: usize = 16;
/// Editable melodic slots; each occupies an even step
pub const SLOT_COUNT: usize = STEP_COUNT / 2;
/// Pitch that stands for "no note"
pub const REST: u8 = 0;

pub const DEFAULT_SLOTS: [u8; SLOT_COUNT] = [60, 62, 64, 65, 67, 65, 64, 62];

/// The four fixed drum voices, each bound to a General MIDI percussion note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Kick,
    Snare,
    ClosedHat,
    OpenHat,
}

impl Lane {
    pub const ALL: [Lane; 4] = [Lane::Kick, Lane::Snare, Lane::ClosedHat, Lane::OpenHat];

    pub fn note(self) -> u8 {
        match self {
            Lane::Kick => 35,
            Lane::Snare => 38,
            Lane::ClosedHat => 42,
            Lane::OpenHat => 46,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Lane::Kick => "Kick",
            Lane::Snare => "Snare",
            Lane::ClosedHat => "Closed Hat",
            Lane::OpenHat => "Open Hat",
        }
    }
}

/// Read access the transport needs each tick.
///
/// Indices wrap modulo `len()`.
pub trait PatternSource {
    fn len(&self) -> usize;
    fn is_step_active(&self, lane: Lane, index: usize) -> bool;
    fn pitch_at(&self, index: usize) -> u8;
}

/// Lanes × steps grid of on/off flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGrid {
    cells: Vec<Vec<bool>>,
    steps: usize,
}

impl StepGrid {
    pub fn new(lanes: usize, steps: usize) -> Self {
        Self {
            cells: vec![vec![false; steps]; lanes],
            steps,
        }
    }

    pub fn lanes(&self) -> usize {
        self.cells.len()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn get(&self, lane: usize, step: usize) -> bool {
        self.cells
            .get(lane)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, lane: usize, step: usize, value: bool) {
        if let Some(row) = self.cells.get_mut(lane) {
            if let Some(cell) = row.get_mut(step) {
                *cell = value;
            }
        }
    }

    pub fn toggle(&mut self, lane: usize, step: usize) {
        let current = self.get(lane, step);
        self.set(lane, step, !current);
    }

    pub fn clear(&mut self) {
        for row in &mut self.cells {
            row.fill(false);
        }
    }

    pub fn fill(&mut self) {
        for row in &mut self.cells {
            row.fill(true);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    drums: StepGrid,
    slots: [u8; SLOT_COUNT],
}

impl Pattern {
    pub fn new() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }

    pub fn with_slots(slots: [u8; SLOT_COUNT]) -> Self {
        Self {
            drums: StepGrid::new(Lane::ALL.len(), STEP_COUNT),
            slots: slots.map(|p| p.min(127)),
        }
    }

    pub fn drums(&self) -> &StepGrid {
        &self.drums
    }

    pub fn drums_mut(&mut self) -> &mut StepGrid {
        &mut self.drums
    }

    pub fn toggle_step(&mut self, lane: Lane, step: usize) {
        self.drums.toggle(lane.index(), step);
    }

    pub fn set_step(&mut self, lane: Lane, step: usize, active: bool) {
        self.drums.set(lane.index(), step, active);
    }

    pub fn slot(&self, slot: usize) -> Option<u8> {
        self.slots.get(slot).copied()
    }

    pub fn slots(&self) -> [u8; SLOT_COUNT] {
        self.slots
    }

    /// Set a melodic slot; pitches above 127 are clamped.
    pub fn set_slot(&mut self, slot: usize, pitch: u8) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = pitch.min(127);
        }
    }

    /// The 16-step melodic line: slots on even steps, rests on odd ones.
    pub fn melodic_sequence(&self) -> [u8; STEP_COUNT] {
        std::array::from_fn(|i| self.pitch_at(i))
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternSource for Pattern {
    fn len(&self) -> usize {
        STEP_COUNT
    }

    fn is_step_active(&self, lane: Lane, index: usize) -> bool {
        self.drums.get(lane.index(), index % STEP_COUNT)
    }

    fn pitch_at(&self, index: usize) -> u8 {
        let index = index % STEP_COUNT;
        if index % 2 == 0 {
            self.slots[index / 2]
        } else {
            REST
        }
    }
}

/// Pattern behind a lock, shared between the UI and the transport worker
#[derive(Debug, Clone, Default)]
pub struct SharedPattern {
    inner: Arc<Mutex<Pattern>>,
}

impl SharedPattern {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pattern)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pattern> {
        // A panic while holding the lock cannot leave a Pattern half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Pattern {
        self.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Pattern) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Pattern) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn toggle_step(&self, lane: Lane, step: usize) {
        self.lock().toggle_step(lane, step);
    }

    pub fn set_slot(&self, slot: usize, pitch: u8) {
        self.lock().set_slot(slot, pitch);
    }
}

impl PatternSource for SharedPattern {
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn is_step_active(&self, lane: Lane, index: usize) -> bool {
        self.lock().is_step_active(lane, index)
    }

    fn pitch_at(&self, index: usize) -> u8 {
        self.lock().pitch_at(index)
    }
}

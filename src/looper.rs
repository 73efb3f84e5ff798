// src/looper.rs
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

pub const SAMPLE_RATE: u32 = 44_100;
pub const BLOCK_SAMPLES: usize = 128;
pub const NUM_LOOPS: usize = 8;
pub const FADE_BLOCKS: usize = 3;
pub const FEEDBACK_MULTIPLIER: f32 = 0.95;
pub const TOTAL_ARENA_SAMPLES: usize = 8_388_608;

/// One audio callback's worth of mono 16-bit samples.
pub type AudioBlock = [i16; BLOCK_SAMPLES];

pub const SILENT_BLOCK: AudioBlock = [0; BLOCK_SAMPLES];

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LooperState {
    Idle,
    Recording,
    Playing,
    Stopped,
}

impl From<u8> for LooperState {
    fn from(val: u8) -> Self {
        match val {
            0 => LooperState::Idle,
            1 => LooperState::Recording,
            2 => LooperState::Playing,
            3 => LooperState::Stopped,
            _ => LooperState::Idle, // Default fallback
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Empty,
    Recording,
    Playing,
    Overdubbing,
    Stopped,
}

impl From<u8> for TrackState {
    fn from(val: u8) -> Self {
        match val {
            0 => TrackState::Empty,
            1 => TrackState::Recording,
            2 => TrackState::Playing,
            3 => TrackState::Overdubbing,
            4 => TrackState::Stopped,
            _ => TrackState::Empty, // Default fallback
        }
    }
}

/// Per-track state shared between the audio thread and the UI/main thread.
#[derive(Clone)]
pub struct SharedTrackState {
    state: Arc<AtomicU8>,
    timeline_blocks: Arc<AtomicUsize>,
    muted: Arc<AtomicBool>,
}

impl SharedTrackState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TrackState::Empty as u8)),
            timeline_blocks: Arc::new(AtomicUsize::new(0)),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(&self) -> TrackState {
        self.state.load(Ordering::Relaxed).into()
    }

    pub fn set(&self, state: TrackState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn timeline_blocks(&self) -> usize {
        self.timeline_blocks.load(Ordering::Relaxed)
    }

    pub fn set_timeline_blocks(&self, blocks: usize) {
        self.timeline_blocks.store(blocks, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

impl Default for SharedTrackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-level state shared between the audio thread and the UI/main thread.
/// Written only by the audio thread; every other thread reads.
#[derive(Clone)]
pub struct SharedEngineState {
    state: Arc<AtomicU8>,
    playhead: Arc<AtomicUsize>,
    timeline: Arc<AtomicUsize>,
    armed: Arc<AtomicBool>,
}

impl SharedEngineState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(LooperState::Idle as u8)),
            playhead: Arc::new(AtomicUsize::new(0)),
            timeline: Arc::new(AtomicUsize::new(0)),
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(&self) -> LooperState {
        self.state.load(Ordering::Relaxed).into()
    }

    pub fn set(&self, state: LooperState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn playhead(&self) -> usize {
        self.playhead.load(Ordering::Relaxed)
    }

    pub fn set_playhead(&self, playhead: usize) {
        self.playhead.store(playhead, Ordering::Relaxed);
    }

    pub fn timeline(&self) -> usize {
        self.timeline.load(Ordering::Relaxed)
    }

    pub fn set_timeline(&self, timeline: usize) {
        self.timeline.store(timeline, Ordering::Relaxed);
    }

    /// A trigger has been latched but has not yet committed on the loop grid.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Relaxed);
    }
}

impl Default for SharedEngineState {
    fn default() -> Self {
        Self::new()
    }
}

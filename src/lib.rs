// src/lib.rs

pub mod audio_engine;
pub mod audio_io;
pub mod looper;
pub mod settings;

pub use audio_engine::{AudioCommand, Looper, LooperHandle};
pub use looper::{
    AudioBlock, LooperState, TrackState, BLOCK_SAMPLES, FADE_BLOCKS, FEEDBACK_MULTIPLIER,
    NUM_LOOPS, SAMPLE_RATE, TOTAL_ARENA_SAMPLES,
};

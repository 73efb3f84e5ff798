// src/audio_engine/command.rs

/// Control-surface requests, pushed from the main thread and drained by the
/// audio thread at the top of each callback.
#[derive(Debug)]
pub enum AudioCommand {
    Trigger,
    Reset,
    ToggleOverdub(usize),
    SetTrackVolume { track_index: usize, gain: f32 },
    MuteTrack { track_index: usize, muted: bool },
    SmartMute(f32),
}

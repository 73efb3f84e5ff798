// src/audio_engine.rs
//
// The looper engine: a fixed set of loop tracks synchronized to the grid
// established by the first recorded loop. User triggers are latched and only
// commit on a block where the global playhead sits at the top of the loop
// (or before any loop exists), which phase-locks every record/stop edge to
// the loop grid.

pub mod arena;
pub mod command;
pub mod envelope;
pub mod spill;
pub mod track;

use arena::Arena;
pub use command::AudioCommand;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use spill::TrackSpill;
use track::Track;

use crate::looper::{
    AudioBlock, LooperState, SharedEngineState, SharedTrackState, TrackState, BLOCK_SAMPLES,
    SAMPLE_RATE,
};

pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// How long a reset may wait for stop fades before force-clearing (~1 s).
const RESET_TIMEOUT_BLOCKS: usize = SAMPLE_RATE as usize / BLOCK_SAMPLES;

pub struct Looper {
    tracks: Vec<Track>,
    arena: Arena,
    state: LooperState,
    requested: Option<LooperState>,
    playhead: usize, // block cursor into the global loop
    timeline: usize, // global loop length in blocks (track 0's length)
    active_track: usize,
    resetting: bool,
    reset_countdown: usize,
    command_consumer: HeapConsumer<AudioCommand>,
    shared: SharedEngineState,
}

/// Main-thread handle: pushes requests over the command ring and answers
/// state queries from the shared atomics. Cheap to move into UI threads.
pub struct LooperHandle {
    commands: HeapProducer<AudioCommand>,
    engine_state: SharedEngineState,
    track_states: Vec<SharedTrackState>,
}

impl Looper {
    /// Build the engine plus its control handle. `spill`, when present, must
    /// hold one storage handle per track and switches the tracks from the
    /// arena to the disk-spill tier.
    pub fn create(
        num_loops: usize,
        arena_samples: usize,
        spill: Option<Vec<TrackSpill>>,
    ) -> (Self, LooperHandle) {
        let num_loops = num_loops.clamp(2, 16);
        let command_rb = HeapRb::<AudioCommand>::new(COMMAND_QUEUE_CAPACITY);
        let (command_producer, command_consumer) = command_rb.split();

        let track_states: Vec<SharedTrackState> =
            (0..num_loops).map(|_| SharedTrackState::new()).collect();

        let mut spill_handles = spill.map(|v| v.into_iter());
        let tracks: Vec<Track> = track_states
            .iter()
            .enumerate()
            .map(|(i, shared)| {
                let storage = spill_handles.as_mut().and_then(|it| it.next());
                Track::new(i, shared.clone(), storage)
            })
            .collect();

        let shared = SharedEngineState::new();
        let engine = Self {
            tracks,
            arena: Arena::new(arena_samples),
            state: LooperState::Idle,
            requested: None,
            playhead: 0,
            timeline: 0,
            active_track: 0,
            resetting: false,
            reset_countdown: 0,
            command_consumer,
            shared,
        };
        let handle = LooperHandle {
            commands: command_producer,
            engine_state: engine.shared.clone(),
            track_states,
        };
        (engine, handle)
    }

    // --- Control surface (invoked by handle_commands or directly by tests) ---

    /// Advance the requested global state one step along the footswitch
    /// ladder. The transition itself commits on the loop grid.
    pub fn trigger(&mut self) {
        if self.resetting {
            return;
        }
        let effective = self.requested.unwrap_or(self.state);
        let next = match effective {
            LooperState::Idle => LooperState::Recording,
            LooperState::Recording => LooperState::Playing,
            LooperState::Playing => {
                if self.active_track + 1 < self.tracks.len() {
                    LooperState::Recording
                } else {
                    LooperState::Stopped
                }
            }
            LooperState::Stopped => LooperState::Playing,
        };
        self.requested = Some(next);
        self.shared.set_armed(true);
    }

    /// Stop everything, then clear every track in reverse allocation order
    /// and return to Idle. Completes over the next few blocks (stop fades),
    /// bounded by a timeout after which tracks are force-cleared.
    pub fn reset(&mut self) {
        for track in self.tracks.iter_mut().rev() {
            track.stop();
        }
        self.requested = None;
        self.shared.set_armed(false);
        self.resetting = true;
        self.reset_countdown = RESET_TIMEOUT_BLOCKS;
    }

    /// Drop a recorded track into overdub, or lift it back out. Refused
    /// while any other track is taking audio: only one voice may write at a
    /// time.
    pub fn toggle_overdub(&mut self, track_index: usize) {
        if self.resetting {
            return;
        }
        let other_busy = self.tracks.iter().enumerate().any(|(i, t)| {
            i != track_index
                && matches!(
                    t.state(),
                    TrackState::Recording | TrackState::Overdubbing
                )
        });
        if other_busy {
            return;
        }
        if let Some(track) = self.tracks.get_mut(track_index) {
            match track.state() {
                TrackState::Playing => track.overdub(),
                TrackState::Overdubbing => track.play(),
                _ => {}
            }
        }
    }

    pub fn set_volume(&mut self, track_index: usize, gain: f32) {
        if let Some(track) = self.tracks.get_mut(track_index) {
            track.set_volume(gain);
        }
    }

    pub fn mute_track(&mut self, track_index: usize, muted: bool) {
        if let Some(track) = self.tracks.get_mut(track_index) {
            track.mute(muted);
        }
    }

    /// Peel back layers with one knob: `p` sweeps from only track 0 audible
    /// (0.0) to every recorded track audible (1.0). Track 0 is never muted.
    pub fn smart_mute(&mut self, p: f32) {
        let active = self.tracks.iter().filter(|t| t.has_audio()).count();
        if active == 0 {
            return;
        }
        for i in 1..self.tracks.len() {
            if !self.tracks[i].has_audio() {
                continue;
            }
            let muted = p <= i as f32 / active as f32;
            self.tracks[i].mute(muted);
        }
    }

    /// Drain the command ring. Called once per audio callback, before the
    /// block ticks.
    pub fn handle_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            match command {
                AudioCommand::Trigger => self.trigger(),
                AudioCommand::Reset => self.reset(),
                AudioCommand::ToggleOverdub(track_index) => self.toggle_overdub(track_index),
                AudioCommand::SetTrackVolume { track_index, gain } => {
                    self.set_volume(track_index, gain)
                }
                AudioCommand::MuteTrack { track_index, muted } => {
                    self.mute_track(track_index, muted)
                }
                AudioCommand::SmartMute(p) => self.smart_mute(p),
            }
        }
    }

    // --- Audio callback entry: one block in, one mixed block out ---

    pub fn update(&mut self, in_block: Option<&AudioBlock>, out_block: &mut AudioBlock) {
        self.apply_requested_transition();

        // Dry path first; playing tracks sum on top with saturation.
        match in_block {
            Some(block) => out_block.copy_from_slice(block),
            None => out_block.fill(0),
        }

        for track in &mut self.tracks {
            track.update(&mut self.arena, in_block, out_block);
        }

        // A take can commit itself mid-cycle when the arena runs out; the
        // global state follows the track.
        if self.state == LooperState::Recording && !self.resetting {
            let active = &self.tracks[self.active_track];
            if active.state() != TrackState::Recording && active.has_audio() {
                if self.timeline == 0 {
                    self.timeline = active.timeline_blocks();
                }
                self.state = LooperState::Playing;
                self.requested = None;
                self.shared.set_armed(false);
            }
        }

        self.service_reset();

        // The grid advances only while it is running; transitions at the top
        // of the next tick therefore see playhead == 0 exactly at the wrap.
        if self.timeline > 0
            && matches!(self.state, LooperState::Playing | LooperState::Recording)
        {
            self.playhead += 1;
            if self.playhead >= self.timeline {
                self.playhead = 0;
            }
        }

        self.shared.set(self.state);
        self.shared.set_playhead(self.playhead);
        self.shared.set_timeline(self.timeline);
    }

    // --- Queries (tests and in-process observers) ---

    pub fn state(&self) -> LooperState {
        self.state
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn timeline(&self) -> usize {
        self.timeline
    }

    pub fn is_idle(&self) -> bool {
        self.state == LooperState::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.state == LooperState::Recording
    }

    pub fn is_playing(&self) -> bool {
        self.state == LooperState::Playing
    }

    /// A trigger is latched but has not yet committed on the grid.
    pub fn is_waiting(&self) -> bool {
        self.requested.is_some()
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_state(&self, index: usize) -> TrackState {
        self.tracks
            .get(index)
            .map(|t| t.state())
            .unwrap_or(TrackState::Empty)
    }

    pub fn track_timeline_blocks(&self, index: usize) -> usize {
        self.tracks.get(index).map(|t| t.timeline_blocks()).unwrap_or(0)
    }

    pub fn track_is_muted(&self, index: usize) -> bool {
        self.tracks.get(index).map(|t| t.is_muted()).unwrap_or(false)
    }

    pub fn arena_next_free(&self) -> usize {
        self.arena.next_free()
    }

    // --- Internals ---

    fn apply_requested_transition(&mut self) {
        if self.resetting {
            return;
        }
        let next = match self.requested {
            Some(next) => next,
            None => return,
        };
        // Phase lock: before the first loop exists every trigger is
        // immediate; afterwards only the top of the loop may switch state.
        if self.timeline != 0 && self.playhead != 0 {
            return;
        }

        let mut consumed = true;
        match (self.state, next) {
            (LooperState::Idle, LooperState::Recording) => {
                self.active_track = 0;
                self.tracks[0].record();
                self.playhead = 0;
                self.state = LooperState::Recording;
            }
            (LooperState::Recording, LooperState::Playing) => {
                self.tracks[self.active_track].play();
                if self.timeline == 0 {
                    // The first take defines the global loop.
                    self.timeline = self.tracks[self.active_track].timeline_blocks();
                    self.playhead = 0;
                }
                self.state = LooperState::Playing;
            }
            (LooperState::Playing, LooperState::Recording) => {
                let overdubbing = self
                    .tracks
                    .iter()
                    .any(|t| t.state() == TrackState::Overdubbing);
                if overdubbing {
                    // Only one voice may write at a time; stay latched until
                    // the overdub lifts and commit at a later wrap.
                    consumed = false;
                } else if self.active_track + 1 < self.tracks.len() {
                    self.active_track += 1;
                    self.tracks[self.active_track].record();
                    self.state = LooperState::Recording;
                }
            }
            (LooperState::Playing, LooperState::Stopped) => {
                for track in self.tracks.iter_mut() {
                    if track.has_audio() {
                        track.stop();
                    }
                }
                self.state = LooperState::Stopped;
            }
            (LooperState::Stopped, LooperState::Playing) => {
                for track in self.tracks.iter_mut() {
                    if track.has_audio() {
                        track.play();
                    }
                }
                self.playhead = 0;
                self.state = LooperState::Playing;
            }
            _ => {}
        }
        if consumed {
            self.requested = None;
            self.shared.set_armed(false);
        }
    }

    fn service_reset(&mut self) {
        if !self.resetting {
            return;
        }
        self.reset_countdown = self.reset_countdown.saturating_sub(1);
        let all_stopped = self.tracks.iter().all(|t| t.is_stopped());

        if all_stopped || self.reset_countdown == 0 {
            for i in (0..self.tracks.len()).rev() {
                if !self.tracks[i].is_stopped() {
                    self.tracks[i].force_stop(&mut self.arena);
                }
                self.tracks[i].clear(&mut self.arena);
            }
            self.state = LooperState::Idle;
            self.playhead = 0;
            self.timeline = 0;
            self.active_track = 0;
            self.resetting = false;
        }
    }
}

impl LooperHandle {
    pub fn trigger(&mut self) {
        self.send(AudioCommand::Trigger);
    }

    pub fn reset(&mut self) {
        self.send(AudioCommand::Reset);
    }

    pub fn toggle_overdub(&mut self, track_index: usize) {
        self.send(AudioCommand::ToggleOverdub(track_index));
    }

    pub fn set_volume(&mut self, track_index: usize, gain: f32) {
        self.send(AudioCommand::SetTrackVolume { track_index, gain });
    }

    pub fn mute(&mut self, track_index: usize, muted: bool) {
        self.send(AudioCommand::MuteTrack { track_index, muted });
    }

    pub fn smart_mute(&mut self, p: f32) {
        self.send(AudioCommand::SmartMute(p));
    }

    fn send(&mut self, command: AudioCommand) {
        if self.commands.push(command).is_err() {
            eprintln!("Command ring buffer full. Command dropped.");
        }
    }

    pub fn is_idle(&self) -> bool {
        self.engine_state.get() == LooperState::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.engine_state.get() == LooperState::Recording
    }

    pub fn is_playing(&self) -> bool {
        self.engine_state.get() == LooperState::Playing
    }

    pub fn is_stopped(&self) -> bool {
        self.engine_state.get() == LooperState::Stopped
    }

    pub fn is_waiting(&self) -> bool {
        self.engine_state.is_armed()
    }

    pub fn playhead(&self) -> usize {
        self.engine_state.playhead()
    }

    pub fn timeline(&self) -> usize {
        self.engine_state.timeline()
    }

    pub fn num_tracks(&self) -> usize {
        self.track_states.len()
    }

    pub fn track_state(&self, index: usize) -> TrackState {
        self.track_states
            .get(index)
            .map(|s| s.get())
            .unwrap_or(TrackState::Empty)
    }

    pub fn track_timeline_blocks(&self, index: usize) -> usize {
        self.track_states
            .get(index)
            .map(|s| s.timeline_blocks())
            .unwrap_or(0)
    }

    pub fn track_is_muted(&self, index: usize) -> bool {
        self.track_states
            .get(index)
            .map(|s| s.is_muted())
            .unwrap_or(false)
    }
}

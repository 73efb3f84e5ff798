// src/audio_engine/track.rs
//
// One loop voice. External code only *requests* transitions (record / play /
// overdub / stop write a single request field); the track applies them at
// the next block boundary, going through a pending phase when a transition
// has to wait for an envelope to finish (a stop waits for the volume fade,
// leaving overdub waits for the record fade).
//
// Overdub write-back formula: written = (stored + in * record_env) * FEEDBACK,
// where `stored` is this track's own raw sample, before the volume envelope
// and without the seam-tail mix. The tail is therefore never folded back
// into the loop by later overdub passes.

use super::arena::Arena;
use super::envelope::GainEnvelope;
use super::spill::TrackSpill;
use crate::looper::{
    AudioBlock, SharedTrackState, TrackState, BLOCK_SAMPLES, FADE_BLOCKS, FEEDBACK_MULTIPLIER,
    SILENT_BLOCK,
};

pub struct Track {
    index: usize,
    state: TrackState,
    requested: Option<TrackState>,
    pending: Option<TrackState>,

    base: Option<usize>, // arena base, in samples
    timeline: usize,     // recorded loop length, in blocks
    playhead: usize,     // block cursor into the loop
    tail_blocks: usize,  // seam-tail capacity reserved past the loop
    tail_captured: usize,

    muted: bool,
    volume: GainEnvelope,
    record: GainEnvelope,
    xfade: GainEnvelope,

    shared: SharedTrackState,
    spill: Option<TrackSpill>,
}

impl Track {
    pub fn new(index: usize, shared: SharedTrackState, spill: Option<TrackSpill>) -> Self {
        Self {
            index,
            state: TrackState::Empty,
            requested: None,
            pending: None,
            base: None,
            timeline: 0,
            playhead: 0,
            tail_blocks: 0,
            tail_captured: 0,
            muted: false,
            volume: GainEnvelope::new(1.0),
            record: GainEnvelope::new(1.0),
            xfade: GainEnvelope::new(0.0),
            shared,
            spill,
        }
    }

    // --- Request setters (single-field writes, applied at the block edge) ---

    pub fn record(&mut self) {
        self.requested = Some(TrackState::Recording);
    }

    pub fn play(&mut self) {
        self.requested = Some(TrackState::Playing);
    }

    pub fn overdub(&mut self) {
        self.requested = Some(TrackState::Overdubbing);
    }

    pub fn stop(&mut self) {
        self.requested = Some(TrackState::Stopped);
    }

    // --- Queries ---

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn timeline_blocks(&self) -> usize {
        self.timeline
    }

    pub fn has_audio(&self) -> bool {
        self.timeline > 0
    }

    pub fn is_empty(&self) -> bool {
        self.state == TrackState::Empty
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, TrackState::Stopped | TrackState::Empty)
    }

    /// Muted is only reported once the fade has actually landed at zero.
    pub fn is_muted(&self) -> bool {
        self.muted && self.volume.is_mute_done()
    }

    // --- Volume / mute ---

    pub fn set_volume(&mut self, gain: f32) {
        self.volume.set_gain(gain);
    }

    pub fn mute(&mut self, muted: bool) {
        self.muted = muted;
        self.volume.set_muted(muted);
        self.shared.set_muted(muted);
    }

    // --- Per-block tick, called once per block by the engine ---

    pub fn update(
        &mut self,
        arena: &mut Arena,
        in_block: Option<&AudioBlock>,
        out_block: &mut AudioBlock,
    ) {
        self.apply_transition(arena);

        match self.state {
            TrackState::Empty => {}
            TrackState::Recording => {
                // A take that would outgrow the arena commits itself.
                if self.spill.is_none() && !self.fits_next_record_block(arena) {
                    self.finalize_recording(arena);
                    self.act_playing(arena, in_block, out_block, false);
                } else {
                    self.act_recording(arena, in_block);
                }
            }
            TrackState::Playing => self.act_playing(arena, in_block, out_block, false),
            TrackState::Overdubbing => self.act_playing(arena, in_block, out_block, true),
            TrackState::Stopped => {
                self.playhead = 0;
            }
        }

        self.volume.update();
        self.record.update();
        self.xfade.update();

        self.shared.set(self.state);
        self.shared.set_timeline_blocks(self.timeline);
    }

    /// Wipe this voice. Only legal from Stopped/Empty, and only while its
    /// arena region is the most recently allocated one (LIFO).
    pub fn clear(&mut self, arena: &mut Arena) -> bool {
        if !self.is_stopped() {
            return false;
        }
        if self.base.is_some() && !arena.release(self.index) {
            return false;
        }
        if let Some(spill) = self.spill.as_mut() {
            spill.clear();
        }

        self.state = TrackState::Empty;
        self.requested = None;
        self.pending = None;
        self.base = None;
        self.timeline = 0;
        self.playhead = 0;
        self.tail_blocks = 0;
        self.tail_captured = 0;
        let gain = self.volume.user_gain();
        self.volume.hard_reset(gain);
        self.record.hard_reset(1.0);
        self.xfade.hard_reset(0.0);

        self.shared.set(self.state);
        self.shared.set_timeline_blocks(0);
        true
    }

    /// Bounded-reset escape hatch: abandon any fade in progress and land in
    /// a clearable state immediately.
    pub fn force_stop(&mut self, arena: &mut Arena) {
        self.requested = None;
        self.pending = None;
        if self.state == TrackState::Recording {
            self.finalize_recording(arena);
        }
        if self.state != TrackState::Empty {
            self.state = TrackState::Stopped;
        }
        self.playhead = 0;
        self.shared.set(self.state);
    }

    // --- State driver ---

    fn apply_transition(&mut self, arena: &mut Arena) {
        // Commit a fade-gated transition once its envelope lands.
        if let Some(next) = self.pending {
            let done = match next {
                TrackState::Stopped => self.volume.is_done(),
                TrackState::Playing => self.record.is_done(),
                _ => true,
            };
            if done {
                self.pending = None;
                match next {
                    TrackState::Stopped => self.enter_stopped(),
                    other => self.state = other,
                }
            }
        }

        let req = match self.requested.take() {
            Some(req) => req,
            None => return,
        };

        match (self.state, req) {
            (TrackState::Empty, TrackState::Recording) => self.start_recording(arena),
            (TrackState::Recording, TrackState::Playing) => self.finalize_recording(arena),
            (TrackState::Recording, TrackState::Stopped) => {
                self.finalize_recording(arena);
                self.enter_stopped();
            }
            (TrackState::Playing, TrackState::Overdubbing) => {
                // Rings cannot read-modify-write; overdub is arena-only.
                if self.spill.is_none() {
                    self.record.restart_from_zero();
                    self.state = TrackState::Overdubbing;
                }
            }
            (TrackState::Overdubbing, TrackState::Playing) => {
                self.record.mute();
                self.pending = Some(TrackState::Playing);
            }
            (TrackState::Playing, TrackState::Stopped)
            | (TrackState::Overdubbing, TrackState::Stopped) => {
                self.volume.mute();
                if self.state == TrackState::Overdubbing {
                    self.record.mute();
                }
                self.pending = Some(TrackState::Stopped);
            }
            (TrackState::Playing, TrackState::Playing) => {
                // A re-play while a stop fade is pending cancels the stop.
                if self.pending == Some(TrackState::Stopped) {
                    self.pending = None;
                    if !self.muted {
                        self.volume.unmute();
                    }
                }
            }
            (TrackState::Stopped, TrackState::Playing) => {
                if self.timeline > 0 {
                    self.playhead = 0;
                    if !self.muted {
                        self.volume.restart_from_zero();
                    }
                    self.state = TrackState::Playing;
                }
            }
            _ => {} // every other request is invalid here and dropped
        }
    }

    fn start_recording(&mut self, arena: &mut Arena) {
        if let Some(spill) = self.spill.as_mut() {
            spill.begin_recording();
        } else {
            let base = arena.next_free();
            if !arena.fits(base, 1) {
                return; // arena exhausted before a single block fits
            }
            self.base = Some(arena.alloc(self.index));
        }
        self.timeline = 0;
        self.playhead = 0;
        self.tail_blocks = 0;
        self.tail_captured = 0;
        self.record.restart_from_zero();
        self.state = TrackState::Recording;
    }

    fn finalize_recording(&mut self, arena: &mut Arena) {
        if let Some(spill) = self.spill.as_mut() {
            spill.finish_recording();
        } else if let Some(base) = self.base {
            // Reserve as much seam tail as still fits past the take.
            let mut tail = 0;
            while tail < FADE_BLOCKS && arena.fits(base, self.timeline + tail + 1) {
                tail += 1;
            }
            self.tail_blocks = tail;
            self.tail_captured = 0;
            arena.commit(self.index, (self.timeline + tail) * BLOCK_SAMPLES);
        }
        self.playhead = 0;
        if !self.muted {
            self.volume.restart_from_zero();
        }
        self.state = TrackState::Playing;
    }

    fn enter_stopped(&mut self) {
        self.state = TrackState::Stopped;
        self.playhead = 0;
        if let Some(spill) = self.spill.as_mut() {
            spill.restart_playback();
        }
    }

    fn fits_next_record_block(&self, arena: &Arena) -> bool {
        match self.base {
            Some(base) => arena.fits(base, self.timeline + 1),
            None => false,
        }
    }

    // --- Per-state block work ---

    fn act_recording(&mut self, arena: &mut Arena, in_block: Option<&AudioBlock>) {
        let input = in_block.unwrap_or(&SILENT_BLOCK);

        let mut gained = [0i16; BLOCK_SAMPLES];
        for (i, g) in gained.iter_mut().enumerate() {
            *g = clip_i16(input[i] as f32 * self.record.get(i));
        }

        if let Some(spill) = self.spill.as_mut() {
            // Ring overrun drops the newest block; the grid keeps counting.
            spill.push_recorded(gained);
        } else if let Some(base) = self.base {
            arena.write_block(base + self.timeline * BLOCK_SAMPLES, &gained);
        }
        self.timeline += 1;
    }

    fn act_playing(
        &mut self,
        arena: &mut Arena,
        in_block: Option<&AudioBlock>,
        out_block: &mut AudioBlock,
        overdub: bool,
    ) {
        if self.timeline == 0 {
            return;
        }

        // The seam crossfade rewinds to full strength at every cycle start.
        if self.playhead == 0 {
            self.xfade.hard_reset(1.0);
            self.xfade.mute();
        }

        // Capture the seam tail: the first FADE_BLOCKS of input right after
        // finalization, written raw past the end of the loop.
        if self.tail_captured < self.tail_blocks {
            if let Some(base) = self.base {
                let slot = base + (self.timeline + self.tail_captured) * BLOCK_SAMPLES;
                arena.write_block(slot, in_block.unwrap_or(&SILENT_BLOCK));
                self.tail_captured += 1;
            }
        }

        let mut stored = SILENT_BLOCK;
        match (self.spill.as_mut(), self.base) {
            (Some(spill), _) => stored = spill.pop_playback(),
            (None, Some(base)) => arena.read_block(base + self.playhead * BLOCK_SAMPLES, &mut stored),
            (None, None) => {}
        }

        let mix_tail = self.base.is_some() && self.playhead < self.tail_captured;
        let mut tail = SILENT_BLOCK;
        if mix_tail {
            let base = self.base.unwrap();
            arena.read_block(base + (self.timeline + self.playhead) * BLOCK_SAMPLES, &mut tail);
        }

        let input = in_block.unwrap_or(&SILENT_BLOCK);
        let mut written = SILENT_BLOCK;
        for i in 0..BLOCK_SAMPLES {
            let mut local = stored[i] as f32;
            if mix_tail {
                local += tail[i] as f32 * self.xfade.get(i);
            }
            let voiced = clip_i16(local * self.volume.get(i));
            out_block[i] = out_block[i].saturating_add(voiced);

            if overdub {
                let dubbed =
                    (stored[i] as f32 + input[i] as f32 * self.record.get(i)) * FEEDBACK_MULTIPLIER;
                written[i] = clip_i16(dubbed);
            }
        }

        if overdub {
            if let Some(base) = self.base {
                arena.write_block(base + self.playhead * BLOCK_SAMPLES, &written);
            }
        }

        self.playhead += 1;
        if self.playhead >= self.timeline {
            self.playhead = 0;
        }
    }
}

fn clip_i16(val: f32) -> i16 {
    if val > i16::MAX as f32 {
        i16::MAX
    } else if val < i16::MIN as f32 {
        i16::MIN
    } else {
        val as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::TOTAL_ARENA_SAMPLES;

    fn make_track() -> (Track, Arena) {
        let track = Track::new(0, SharedTrackState::new(), None);
        let arena = Arena::new(TOTAL_ARENA_SAMPLES);
        (track, arena)
    }

    fn tick(track: &mut Track, arena: &mut Arena, input: Option<&AudioBlock>) -> AudioBlock {
        let mut out = SILENT_BLOCK;
        track.update(arena, input, &mut out);
        out
    }

    #[test]
    fn requests_only_latch_until_update() {
        let (mut track, mut arena) = make_track();
        track.record();
        assert_eq!(track.state(), TrackState::Empty);

        tick(&mut track, &mut arena, None);
        assert_eq!(track.state(), TrackState::Recording);
    }

    #[test]
    fn record_then_play_round_trip() {
        let (mut track, mut arena) = make_track();
        let dc = [1000i16; BLOCK_SAMPLES];

        track.record();
        for _ in 0..10 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        assert_eq!(track.timeline_blocks(), 10);

        track.play();
        // One full cycle settles the volume and record envelopes.
        for _ in 0..10 {
            tick(&mut track, &mut arena, None);
        }

        // Second cycle, away from the seam: exact loop content.
        let mut cycle = Vec::new();
        for _ in 0..10 {
            cycle.push(tick(&mut track, &mut arena, None));
        }
        for block in &cycle[FADE_BLOCKS..] {
            assert!(block.iter().all(|&s| s == 1000));
        }
    }

    #[test]
    fn stop_waits_for_volume_fade() {
        let (mut track, mut arena) = make_track();
        let dc = [8000i16; BLOCK_SAMPLES];

        track.record();
        for _ in 0..20 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        track.play();
        for _ in 0..40 {
            tick(&mut track, &mut arena, None);
        }

        track.stop();
        // Fade out spans FADE_BLOCKS blocks; the track keeps playing through it.
        tick(&mut track, &mut arena, None);
        assert_eq!(track.state(), TrackState::Playing);
        for _ in 0..FADE_BLOCKS {
            tick(&mut track, &mut arena, None);
        }
        assert_eq!(track.state(), TrackState::Stopped);
        assert!(track.is_stopped());

        // Stopped produces nothing.
        let out = tick(&mut track, &mut arena, None);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn stopped_track_rearms_from_loop_start() {
        let (mut track, mut arena) = make_track();
        let dc = [4000i16; BLOCK_SAMPLES];

        track.record();
        for _ in 0..8 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        track.play();
        for _ in 0..16 {
            tick(&mut track, &mut arena, None);
        }
        track.stop();
        for _ in 0..FADE_BLOCKS + 1 {
            tick(&mut track, &mut arena, None);
        }
        assert_eq!(track.state(), TrackState::Stopped);

        track.play();
        tick(&mut track, &mut arena, None);
        assert_eq!(track.state(), TrackState::Playing);
        assert_eq!(track.timeline_blocks(), 8);
    }

    #[test]
    fn arena_exhaustion_auto_commits() {
        let mut track = Track::new(0, SharedTrackState::new(), None);
        let mut arena = Arena::new(BLOCK_SAMPLES * 200);

        track.record();
        let silence = SILENT_BLOCK;
        for _ in 0..250 {
            tick(&mut track, &mut arena, Some(&silence));
        }
        assert_eq!(track.state(), TrackState::Playing);
        assert_eq!(track.timeline_blocks(), 200);
    }

    #[test]
    fn overdub_layers_and_returns_to_play() {
        let (mut track, mut arena) = make_track();
        let dc = [1000i16; BLOCK_SAMPLES];

        track.record();
        for _ in 0..10 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        track.play();
        for _ in 0..20 {
            tick(&mut track, &mut arena, None);
        }

        track.overdub();
        tick(&mut track, &mut arena, Some(&dc));
        assert_eq!(track.state(), TrackState::Overdubbing);

        // A full cycle of overdubbed silence decays the loop by FEEDBACK.
        for _ in 0..30 {
            tick(&mut track, &mut arena, Some(&dc));
        }

        track.play();
        for _ in 0..FADE_BLOCKS + 1 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        assert_eq!(track.state(), TrackState::Playing);
    }

    #[test]
    fn clear_requires_stopped_and_lifo() {
        let (mut track, mut arena) = make_track();
        let dc = [100i16; BLOCK_SAMPLES];

        track.record();
        for _ in 0..4 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        track.play();
        tick(&mut track, &mut arena, None);

        // Playing: refused.
        assert!(!track.clear(&mut arena));

        track.stop();
        for _ in 0..FADE_BLOCKS + 1 {
            tick(&mut track, &mut arena, None);
        }
        assert!(track.clear(&mut arena));
        assert!(track.is_empty());
        assert_eq!(arena.next_free(), 0);
    }

    #[test]
    fn mute_reports_only_after_fade_lands() {
        let (mut track, mut arena) = make_track();
        let dc = [100i16; BLOCK_SAMPLES];

        track.record();
        for _ in 0..4 {
            tick(&mut track, &mut arena, Some(&dc));
        }
        track.play();
        for _ in 0..8 {
            tick(&mut track, &mut arena, None);
        }

        track.mute(true);
        assert!(!track.is_muted());
        for _ in 0..FADE_BLOCKS {
            tick(&mut track, &mut arena, None);
        }
        assert!(track.is_muted());
    }
}

// src/audio_engine/envelope.rs

use crate::looper::{BLOCK_SAMPLES, FADE_BLOCKS};

/// Linear gain ramp spanning `FADE_BLOCKS` audio blocks.
///
/// `get(i)` is sample-accurate within the current block and depends only on
/// the fade state, never on earlier `get` calls, so a block can be evaluated
/// any number of times with the same result. The owner must call `update()`
/// exactly once per block to advance the ramp.
pub struct GainEnvelope {
    user_gain: f32,    // the setting (pot / UI value)
    target_gain: f32,  // where the fade is heading (user_gain or 0.0)
    start_gain: f32,   // where the fade departed from
    current_gain: f32, // last evaluated value
    block_counter: usize,
}

impl GainEnvelope {
    /// New envelope resting at `gain` with no fade in progress.
    pub fn new(gain: f32) -> Self {
        Self {
            user_gain: gain,
            target_gain: gain,
            start_gain: gain,
            current_gain: gain,
            block_counter: FADE_BLOCKS,
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.user_gain = gain;
        // If muted, the new value only takes effect on the next unmute.
        if !self.is_muted() {
            self.start_fade_to(gain);
        }
    }

    pub fn user_gain(&self) -> f32 {
        self.user_gain
    }

    pub fn is_done(&self) -> bool {
        self.block_counter >= FADE_BLOCKS
    }

    pub fn unmute(&mut self) {
        self.start_fade_to(self.user_gain);
    }

    pub fn mute(&mut self) {
        self.start_fade_to(0.0);
    }

    pub fn set_muted(&mut self, muted: bool) {
        if muted {
            self.mute();
        } else {
            self.unmute();
        }
    }

    pub fn is_muted(&self) -> bool {
        self.target_gain == 0.0
    }

    pub fn is_mute_done(&self) -> bool {
        self.is_muted() && self.is_done()
    }

    /// Snap all gain fields to `gain` and cancel any fade in progress.
    pub fn hard_reset(&mut self, gain: f32) {
        self.user_gain = gain;
        self.target_gain = gain;
        self.start_gain = gain;
        self.current_gain = gain;
        self.block_counter = FADE_BLOCKS;
    }

    /// Snap silent, then fade back up to the user gain. Used when a voice
    /// (re)starts and must not click in at full level.
    pub fn restart_from_zero(&mut self) {
        let gain = self.user_gain;
        self.hard_reset(0.0);
        self.user_gain = gain;
        self.start_fade_to(gain);
    }

    /// Gain at sample `sample_num` of the current block.
    pub fn get(&mut self, sample_num: usize) -> f32 {
        if self.is_done() {
            // Land exactly on the target so the next retarget departs from it.
            self.current_gain = self.target_gain;
            return self.current_gain;
        }

        let total_samples = (FADE_BLOCKS * BLOCK_SAMPLES) as f32;
        let fade_pos = (self.block_counter * BLOCK_SAMPLES + sample_num) as f32;

        let t = (fade_pos / total_samples).min(1.0);

        self.current_gain = self.start_gain + (self.target_gain - self.start_gain) * t;
        self.current_gain
    }

    /// Advance the fade by one block. Must be called once per block by the owner.
    pub fn update(&mut self) {
        if self.block_counter < FADE_BLOCKS {
            self.block_counter += 1;
        }
    }

    fn start_fade_to(&mut self, new_target: f32) {
        if self.target_gain == new_target && self.is_done() {
            return; // Already there
        }

        // Start from wherever we are right now so the curve stays continuous
        self.start_gain = self.current_gain;
        self.target_gain = new_target;
        self.block_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_block(env: &mut GainEnvelope) -> Vec<f32> {
        let out = (0..BLOCK_SAMPLES).map(|i| env.get(i)).collect();
        env.update();
        out
    }

    #[test]
    fn starts_settled() {
        let mut env = GainEnvelope::new(1.0);
        assert!(env.is_done());
        assert!(!env.is_muted());
        assert_eq!(env.get(0), 1.0);
        assert_eq!(env.get(BLOCK_SAMPLES - 1), 1.0);
    }

    #[test]
    fn mute_reaches_zero_after_fade_blocks() {
        let mut env = GainEnvelope::new(1.0);
        env.mute();
        assert!(env.is_muted());
        assert!(!env.is_done());

        for _ in 0..FADE_BLOCKS {
            run_block(&mut env);
        }
        assert!(env.is_mute_done());
        assert_eq!(env.get(0), 0.0);
    }

    #[test]
    fn fade_is_linear_within_a_block() {
        let mut env = GainEnvelope::new(1.0);
        env.mute();

        let total = (FADE_BLOCKS * BLOCK_SAMPLES) as f32;
        for i in 0..BLOCK_SAMPLES {
            let expected = 1.0 - (i as f32 / total);
            assert!((env.get(i) - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn retarget_mid_fade_is_continuous() {
        let mut env = GainEnvelope::new(1.0);
        env.mute();
        run_block(&mut env);

        let before = env.get(BLOCK_SAMPLES - 1);
        env.unmute();
        let after = env.get(0);

        let step = 1.0 / (FADE_BLOCKS * BLOCK_SAMPLES) as f32;
        assert!((after - before).abs() <= step + 1e-6);
    }

    #[test]
    fn set_gain_while_muted_defers_to_unmute() {
        let mut env = GainEnvelope::new(1.0);
        env.mute();
        for _ in 0..FADE_BLOCKS {
            run_block(&mut env);
        }

        env.set_gain(0.5);
        assert!(env.is_muted());
        assert_eq!(env.get(0), 0.0);

        env.unmute();
        for _ in 0..FADE_BLOCKS {
            run_block(&mut env);
        }
        assert!((env.get(0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn hard_reset_snaps_without_fade() {
        let mut env = GainEnvelope::new(1.0);
        env.mute();
        env.hard_reset(0.7);
        assert!(env.is_done());
        assert_eq!(env.get(0), 0.7);
    }

    #[test]
    fn restart_from_zero_keeps_user_gain() {
        let mut env = GainEnvelope::new(0.8);
        env.restart_from_zero();
        assert_eq!(env.get(0), 0.0);

        for _ in 0..FADE_BLOCKS {
            run_block(&mut env);
        }
        assert!((env.get(0) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn get_is_idempotent_within_a_block() {
        let mut env = GainEnvelope::new(1.0);
        env.mute();
        run_block(&mut env);

        let a = env.get(40);
        let _ = env.get(90);
        let b = env.get(40);
        assert_eq!(a, b);
    }
}

use crate::random::Key;

/// FFT frame length in samples per channel.
pub const FRAME_SIZE: usize = 1024;
/// Number of complex bins kept from each frame (`FRAME_SIZE / 2 + 1`).
pub const NUM_BINS: usize = FRAME_SIZE / 2 + 1;
/// Data frames spent on each convolution-coded bit.
pub const FRAMES_PER_BIT: usize = 2;
/// Size of the up set and of the down set chosen per frame.
pub const BANDS_PER_FRAME: usize = 30;
/// Lowest FFT bin carrying watermark energy.
pub const MIN_BAND: usize = 20;
/// Highest FFT bin carrying watermark energy (inclusive).
pub const MAX_BAND: usize = 100;
/// Number of usable bins in `[MIN_BAND, MAX_BAND]`.
pub const N_BANDS: usize = MAX_BAND - MIN_BAND + 1;

/// Bits in one sync block; the pattern is 010101 (A) or 101010 (B).
pub const SYNC_BITS: usize = 6;
/// Frames repeating each sync bit.
pub const SYNC_FRAMES_PER_BIT: usize = 85;
/// Sample step of the coarse sync grid.
pub const SYNC_SEARCH_STEP: usize = 256;
/// Sample step of the fine sync refinement.
pub const SYNC_SEARCH_FINE: usize = 8;
/// Minimum quality for a coarse-grid candidate.
pub const SYNC_THRESHOLD1: f64 = 0.4;
/// Minimum refined quality for an accepted sync hit.
pub const SYNC_THRESHOLD2: f64 = 0.7;
/// Strength values above this no longer raise the expected sync quality.
pub const SYNC_QUALITY_DELTA_CLAMP: f64 = 0.080;
/// Empirical scale mapping a good sync block to quality ~1.0.
pub const SYNC_QUALITY_SCALE: f64 = 2.9;

/// Padding frames before the first block, in case the track starts silent.
pub const FRAMES_PAD_START: usize = 250;
/// Watermark generation and detection sample rate.
pub const MARK_SAMPLE_RATE: u32 = 44100;
/// Number of payload bits carried by each block.
pub const PAYLOAD_SIZE: usize = 128;

/// Run configuration threaded through the whole pipeline.
///
/// Everything above is a fixed protocol parameter; only the values here may
/// vary between encoder and decoder without breaking the wire format (and
/// `key` of course has to agree for decoding to succeed).
#[derive(Debug, Clone)]
pub struct Config {
    /// Watermark strength: magnitude exponent delta. Default 0.01.
    pub water_delta: f64,
    /// Non-linear bit storage: scatter each data bit's band edits over many
    /// frames. Disabled by `--linear`.
    pub mix: bool,
    /// Threshold soft bits before Viterbi decoding (soft decoding is better).
    pub hard: bool,
    /// Compute and report the watermark SNR while adding.
    pub snr: bool,
    /// Watermarking key; all-zero unless set by the user.
    pub key: Key,
    /// Test hook: skip the sync search and assume blocks at their
    /// theoretical positions.
    pub test_no_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            water_delta: 0.01,
            mix: true,
            hard: false,
            snr: false,
            key: Key::default(),
            test_no_sync: false,
        }
    }
}

impl Config {
    /// Strength as shown on the command line (`--strength`, delta × 1000).
    pub fn strength(&self) -> f64 {
        self.water_delta * 1000.0
    }

    /// Set the strength from the command-line scale.
    pub fn set_strength(&mut self, strength: f64) {
        self.water_delta = strength / 1000.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_window_fits_twice() {
        // the planner takes two disjoint sets of BANDS_PER_FRAME bins
        assert!(2 * BANDS_PER_FRAME <= N_BANDS);
    }

    #[test]
    fn default_strength_scale() {
        let config = Config::default();
        assert!((config.strength() - 10.0).abs() < 1e-9);

        let mut config = Config::default();
        config.set_strength(16.0);
        assert!((config.water_delta - 0.016).abs() < 1e-12);
    }
}

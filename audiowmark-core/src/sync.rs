//! Sync block search: locate watermark block boundaries in a signal with
//! unknown offset.
//!
//! The coarse stage scores every frame position on four shifted frame
//! grids (step 256 samples); local maxima above a first threshold are then
//! refined sample-accurately (step 8) and accepted above a second, higher
//! threshold. The sign of the score tells A blocks (010101) from B blocks
//! (101010).

use crate::bands::{get_up_down, mark_data_frame_count, mark_sync_frame_count, Layout};
use crate::config::{
    Config, FRAMES_PAD_START, FRAME_SIZE, MAX_BAND, MIN_BAND, N_BANDS, SYNC_BITS,
    SYNC_FRAMES_PER_BIT, SYNC_QUALITY_DELTA_CLAMP, SYNC_QUALITY_SCALE, SYNC_SEARCH_FINE,
    SYNC_SEARCH_STEP, SYNC_THRESHOLD1, SYNC_THRESHOLD2,
};
use crate::convcode::BlockType;
use crate::fft::FftProcessor;
use crate::frame::{compute_frame_ffts, db_from_factor, frame_count};
use crate::random::Stream;
use crate::wav::WavData;

const MIN_DB: f64 = -96.0;

/// One located sync block.
#[derive(Debug, Clone, Copy)]
pub struct Score {
    /// First-sample index of the block, in per-channel samples at the
    /// watermark rate.
    pub index: usize,
    pub quality: f64,
    pub block_type: BlockType,
}

/// Map a raw correlation to the strength-independent quality scale.
///
/// A good sync block lands around 1.0, random signal close to 0. The
/// divisor is empirical; strengths above the clamp no longer raise the
/// expected correlation.
fn normalize_sync_quality(cfg: &Config, raw_quality: f64) -> f64 {
    raw_quality / cfg.water_delta.min(SYNC_QUALITY_DELTA_CLAMP) / SYNC_QUALITY_SCALE
}

/// Sync search state: flattened up/down dB-vector indices per sync bit,
/// precomputed once per run.
pub struct SyncFinder {
    up: Vec<Vec<usize>>,
    down: Vec<Vec<usize>>,
    want_frames: Vec<bool>,
}

impl SyncFinder {
    pub fn new(cfg: &Config, layout: &Layout, n_channels: usize) -> Self {
        let mut up = vec![Vec::new(); SYNC_BITS];
        let mut down = vec![Vec::new(); SYNC_BITS];

        for bit in 0..SYNC_BITS {
            for f in 0..SYNC_FRAMES_PER_BIT {
                let abs_frame = f + bit * SYNC_FRAMES_PER_BIT;
                let (frame_up, frame_down) = get_up_down(&cfg.key, abs_frame, Stream::SyncUpDown);
                let frame_offset = layout.sync_frame_pos(abs_frame) * N_BANDS * n_channels;

                for u in frame_up {
                    up[bit].push(u - MIN_BAND + frame_offset);
                }
                for d in frame_down {
                    down[bit].push(d - MIN_BAND + frame_offset);
                }
            }
            up[bit].sort_unstable();
            down[bit].sort_unstable();
        }

        let total_frames = mark_sync_frame_count() + mark_data_frame_count();
        let mut want_frames = vec![false; total_frames];
        for f in 0..mark_sync_frame_count() {
            want_frames[layout.sync_frame_pos(f)] = true;
        }

        Self {
            up,
            down,
            want_frames,
        }
    }

    /// Score one candidate start frame against the 010101 template.
    /// Negative correlations mean a B block; the returned quality is
    /// always positive and already on the normalized scale.
    fn sync_decode(
        &self,
        cfg: &Config,
        n_channels: usize,
        start_frame: usize,
        fft_out_db: &[f32],
    ) -> (f64, BlockType) {
        let mut sync_quality = 0.0f64;

        for bit in 0..SYNC_BITS {
            let mut umag = 0.0f32;
            let mut dmag = 0.0f32;

            for ch in 0..n_channels {
                let index = (start_frame * n_channels + ch) * N_BANDS;
                for (&u, &d) in self.up[bit].iter().zip(self.down[bit].iter()) {
                    umag += fft_out_db[index + u];
                    dmag += fft_out_db[index + d];
                }
            }

            // ratio form avoids a bias from the absolute signal level
            let raw_bit = if umag < dmag {
                1.0 - umag as f64 / dmag as f64
            } else {
                dmag as f64 / umag as f64 - 1.0
            };
            let expect_data_bit = bit & 1; // expect 010101
            sync_quality += if expect_data_bit == 1 { raw_bit } else { -raw_bit };
        }
        sync_quality /= SYNC_BITS as f64;
        sync_quality = normalize_sync_quality(cfg, sync_quality);

        if sync_quality < 0.0 {
            (-sync_quality, BlockType::B)
        } else {
            (sync_quality, BlockType::A)
        }
    }

    /// dB magnitudes of the usable band window for `count` frames starting
    /// at sample `index`, flattened as frame-major, channel, band.
    /// Frames outside `want_frames` are filled with the floor value;
    /// an empty vector means the range does not fit the signal.
    fn sync_fft(
        &self,
        fft: &mut FftProcessor,
        wav: &WavData,
        index: usize,
        count: usize,
        want_frames: Option<&[bool]>,
    ) -> Vec<f32> {
        let mut fft_out_db = Vec::new();
        let Some(fft_out) = compute_frame_ffts(fft, wav, index, count, want_frames) else {
            return fft_out_db;
        };

        fft_out_db.reserve(count * wav.n_channels() * N_BANDS);
        for f in 0..count {
            for ch in 0..wav.n_channels() {
                if !fft_out.is_present(f, ch) {
                    for _ in MIN_BAND..=MAX_BAND {
                        fft_out_db.push(MIN_DB as f32);
                    }
                } else {
                    let bins = fft_out.bins(f, ch);
                    for i in MIN_BAND..=MAX_BAND {
                        fft_out_db.push(db_from_factor(bins[i].norm() as f64, MIN_DB) as f32);
                    }
                }
            }
        }
        fft_out_db
    }

    /// Find all sync blocks, ascending by sample index.
    pub fn search(&self, cfg: &Config, wav: &WavData) -> Vec<Score> {
        let total_frames = mark_sync_frame_count() + mark_data_frame_count();
        let n_frames = frame_count(wav);
        let n_channels = wav.n_channels();

        if cfg.test_no_sync {
            let expect_step = total_frames * FRAME_SIZE;
            let expect_end = n_frames * FRAME_SIZE;
            let mut scores = Vec::new();
            let mut expect_index = FRAMES_PAD_START * FRAME_SIZE;
            let mut ab = 0;
            while expect_index + expect_step < expect_end {
                scores.push(Score {
                    index: expect_index,
                    quality: 1.0,
                    block_type: if ab & 1 == 1 { BlockType::B } else { BlockType::A },
                });
                expect_index += expect_step;
                ab += 1;
            }
            return scores;
        }

        let mut fft = FftProcessor::new(FRAME_SIZE);
        let mut sync_scores = Vec::new();

        // coarse scores on shifted frame grids
        for sync_shift in (0..FRAME_SIZE).step_by(SYNC_SEARCH_STEP) {
            let fft_db = self.sync_fft(&mut fft, wav, sync_shift, n_frames.saturating_sub(1), None);
            for start_frame in 0..n_frames {
                if (start_frame + total_frames) * n_channels * N_BANDS < fft_db.len() {
                    let (quality, block_type) =
                        self.sync_decode(cfg, n_channels, start_frame, &fft_db);
                    sync_scores.push(Score {
                        index: start_frame * FRAME_SIZE + sync_shift,
                        quality,
                        block_type,
                    });
                }
            }
        }
        sync_scores.sort_unstable_by_key(|score| score.index);

        // local maxima above the coarse threshold, refined sample-accurately
        let mut result_scores: Vec<Score> = Vec::new();
        for i in 0..sync_scores.len() {
            if sync_scores[i].quality > SYNC_THRESHOLD1 {
                let q_last = if i > 0 { sync_scores[i - 1].quality } else { -1.0 };
                let q_next = if i + 1 < sync_scores.len() {
                    sync_scores[i + 1].quality
                } else {
                    -1.0
                };
                if sync_scores[i].quality > q_last && sync_scores[i].quality > q_next {
                    let mut best_quality = sync_scores[i].quality;
                    let mut best_index = sync_scores[i].index;
                    // block type does not flip during refinement
                    let best_block_type = sync_scores[i].block_type;

                    let start = sync_scores[i].index.saturating_sub(SYNC_SEARCH_STEP);
                    let end = sync_scores[i].index + SYNC_SEARCH_STEP;
                    let mut fine_index = start;
                    while fine_index <= end {
                        let fft_db = self.sync_fft(
                            &mut fft,
                            wav,
                            fine_index,
                            total_frames,
                            Some(&self.want_frames),
                        );
                        if !fft_db.is_empty() {
                            let (quality, _) = self.sync_decode(cfg, n_channels, 0, &fft_db);
                            if quality > best_quality {
                                best_quality = quality;
                                best_index = fine_index;
                            }
                        }
                        fine_index += SYNC_SEARCH_FINE;
                    }
                    log::debug!(
                        "sync candidate at {} refined to {best_index}, quality {best_quality:.3}",
                        sync_scores[i].index
                    );
                    if best_quality > SYNC_THRESHOLD2 {
                        result_scores.push(Score {
                            index: best_index,
                            quality: best_quality,
                            block_type: best_block_type,
                        });
                    }
                }
            }
        }
        result_scores
    }
}

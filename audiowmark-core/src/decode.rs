//! Soft-bit extraction and payload decoding for located blocks.

use crate::bands::{
    gen_mix_entries, get_up_down, mark_data_frame_count, mark_sync_frame_count,
    randomize_bit_order, Layout, MixEntry,
};
use crate::config::{
    Config, BANDS_PER_FRAME, FRAMES_PAD_START, FRAMES_PER_BIT, FRAME_SIZE, PAYLOAD_SIZE,
};
use crate::convcode::{conv_code_size, conv_decode_soft, BlockType};
use crate::fft::FftProcessor;
use crate::frame::{compute_frame_ffts, db_from_factor, frame_count, SpectrumMatrix};
use crate::random::Stream;
use crate::sync::{Score, SyncFinder};
use crate::wav::WavData;

const MIN_DB: f64 = -96.0;

/// One decoded payload report.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub bits: Vec<u8>,
    pub quality: f64,
    pub decode_error: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Decoded from one block (or an adjacent A+B pair for `Ab`).
    Block {
        index: usize,
        block_type: BlockType,
    },
    /// Soft bits of all blocks combined.
    All,
}

/// Everything `get`/`cmp` need to report.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub patterns: Vec<Pattern>,
    pub sync_scores: Vec<Score>,
    /// Whole frames in the analyzed signal, for expected-position checks.
    pub n_frames: usize,
}

/// Accumulate up/down dB magnitudes along the mix plan; one soft bit per
/// `FRAMES_PER_BIT` group of data frames.
fn mix_decode(entries: &[MixEntry], fft_out: &SpectrumMatrix) -> Vec<f32> {
    let mut raw_bit_vec = Vec::with_capacity(mark_data_frame_count() / FRAMES_PER_BIT);
    let mut umag = 0.0f64;
    let mut dmag = 0.0f64;

    for f in 0..mark_data_frame_count() {
        for ch in 0..fft_out.n_channels() {
            for frame_b in 0..BANDS_PER_FRAME {
                let entry = entries[f * BANDS_PER_FRAME + frame_b];
                let bins = fft_out.bins(entry.frame, ch);

                umag += db_from_factor(bins[entry.up].norm() as f64, MIN_DB);
                dmag += db_from_factor(bins[entry.down].norm() as f64, MIN_DB);
            }
        }
        if f % FRAMES_PER_BIT == FRAMES_PER_BIT - 1 {
            raw_bit_vec.push((umag - dmag) as f32);
            umag = 0.0;
            dmag = 0.0;
        }
    }
    raw_bit_vec
}

/// Same accumulation on the per-frame band plan (linear storage).
fn linear_decode(cfg: &Config, layout: &Layout, fft_out: &SpectrumMatrix) -> Vec<f32> {
    let mut raw_bit_vec = Vec::with_capacity(mark_data_frame_count() / FRAMES_PER_BIT);
    let mut umag = 0.0f64;
    let mut dmag = 0.0f64;

    for f in 0..mark_data_frame_count() {
        let (up, down) = get_up_down(&cfg.key, f, Stream::DataUpDown);
        for ch in 0..fft_out.n_channels() {
            let bins = fft_out.bins(layout.data_frame_pos(f), ch);
            for &u in &up {
                umag += db_from_factor(bins[u].norm() as f64, MIN_DB);
            }
            for &d in &down {
                dmag += db_from_factor(bins[d].norm() as f64, MIN_DB);
            }
        }
        if f % FRAMES_PER_BIT == FRAMES_PER_BIT - 1 {
            raw_bit_vec.push((umag - dmag) as f32);
            umag = 0.0;
            dmag = 0.0;
        }
    }
    raw_bit_vec
}

/// Map raw soft bits into [0, 1] for the Viterbi decoder.
///
/// Soft mode rescales by the mean level so 0.5 stays the decision point;
/// hard mode thresholds outright (soft decoding corrects more errors).
pub fn normalize_soft_bits(cfg: &Config, soft_bits: &[f32]) -> Vec<f32> {
    if cfg.hard {
        soft_bits
            .iter()
            .map(|&value| if value > 0.0 { 1.0 } else { 0.0 })
            .collect()
    } else {
        let mean = soft_bits.iter().map(|v| v.abs() as f64).sum::<f64>() / soft_bits.len() as f64;
        soft_bits
            .iter()
            .map(|&value| (0.5 * (value as f64 / mean + 1.0)) as f32)
            .collect()
    }
}

/// Expected first-sample block positions of an undisturbed file, used by
/// `cmp` to account for found/missed sync marks.
pub fn expected_block_positions(n_frames: usize) -> Vec<usize> {
    let expect_step = (mark_sync_frame_count() + mark_data_frame_count()) * FRAME_SIZE;
    let expect_end = n_frames * FRAME_SIZE;
    let mut positions = Vec::new();
    let mut expect_index = FRAMES_PAD_START * FRAME_SIZE;
    while expect_index + expect_step < expect_end {
        positions.push(expect_index);
        expect_index += expect_step;
    }
    positions
}

/// Locate sync blocks and decode every pattern the signal carries.
///
/// `wav` must already be at the watermark sample rate. A signal with no
/// sync hits yields an empty report.
pub fn decode_blocks(cfg: &Config, wav: &WavData) -> DecodeResult {
    let layout = Layout::new(&cfg.key);
    let finder = SyncFinder::new(cfg, &layout, wav.n_channels());
    let sync_scores = finder.search(cfg, wav);

    let block_frames = mark_sync_frame_count() + mark_data_frame_count();
    let mix_entries = cfg.mix.then(|| gen_mix_entries(&cfg.key, &layout));

    let mut patterns: Vec<Pattern> = Vec::new();
    let mut fft = FftProcessor::new(FRAME_SIZE);

    // per-position sums for the combined "all" pattern, A and B separate
    let mut raw_bit_vec_all = vec![0.0f32; conv_code_size(BlockType::Ab, PAYLOAD_SIZE)];
    let mut raw_bit_vec_norm = [0usize; 2];
    let mut all_quality = 0.0f64;

    // adjacent A then B blocks are additionally decoded as one AB block
    let mut last_block_type = BlockType::B;
    let mut ab_raw_bit_vec: [Vec<f32>; 2] = [Vec::new(), Vec::new()];
    let mut ab_quality = [0.0f64; 2];

    for sync_score in &sync_scores {
        let Some(fft_range_out) =
            compute_frame_ffts(&mut fft, wav, sync_score.index, block_frames, None)
        else {
            continue;
        };

        let raw_bit_vec = match &mix_entries {
            Some(entries) => mix_decode(entries, &fft_range_out),
            None => linear_decode(cfg, &layout, &fft_range_out),
        };
        debug_assert_eq!(
            raw_bit_vec.len(),
            conv_code_size(BlockType::A, PAYLOAD_SIZE)
        );
        let raw_bit_vec = randomize_bit_order(&cfg.key, &raw_bit_vec, false);

        let mut decode_error = 0.0;
        let bits = conv_decode_soft(
            sync_score.block_type,
            &normalize_soft_bits(cfg, &raw_bit_vec),
            &mut decode_error,
        );
        patterns.push(Pattern {
            kind: PatternKind::Block {
                index: sync_score.index,
                block_type: sync_score.block_type,
            },
            bits,
            quality: sync_score.quality,
            decode_error,
        });

        all_quality += sync_score.quality;
        let ab = (sync_score.block_type == BlockType::B) as usize;
        for (i, &value) in raw_bit_vec.iter().enumerate() {
            raw_bit_vec_all[i * 2 + ab] += value;
        }
        raw_bit_vec_norm[ab] += 1;

        ab_raw_bit_vec[ab] = raw_bit_vec;
        ab_quality[ab] = sync_score.quality;
        if last_block_type == BlockType::A && sync_score.block_type == BlockType::B {
            // join the A and B soft bits into one stronger AB block
            let mut ab_bits = vec![0.0f32; ab_raw_bit_vec[0].len() * 2];
            for i in 0..ab_raw_bit_vec[0].len() {
                ab_bits[i * 2] = ab_raw_bit_vec[0][i];
                ab_bits[i * 2 + 1] = ab_raw_bit_vec[1][i];
            }
            let mut decode_error = 0.0;
            let bits = conv_decode_soft(
                BlockType::Ab,
                &normalize_soft_bits(cfg, &ab_bits),
                &mut decode_error,
            );
            patterns.push(Pattern {
                kind: PatternKind::Block {
                    index: sync_score.index,
                    block_type: BlockType::Ab,
                },
                bits,
                quality: (ab_quality[0] + ab_quality[1]) / 2.0,
                decode_error,
            });
        }
        last_block_type = sync_score.block_type;
    }

    if patterns.len() > 1 {
        // average the A and B soft bits over their block counts and decode
        // the interleaved result; this is the headline pattern
        for pair in raw_bit_vec_all.chunks_mut(2) {
            pair[0] /= raw_bit_vec_norm[0].max(1) as f32;
            pair[1] /= raw_bit_vec_norm[1].max(1) as f32;
        }
        let quality = all_quality / (raw_bit_vec_norm[0] + raw_bit_vec_norm[1]) as f64;

        let mut decode_error = 0.0;
        let bits = conv_decode_soft(
            BlockType::Ab,
            &normalize_soft_bits(cfg, &raw_bit_vec_all),
            &mut decode_error,
        );
        patterns.push(Pattern {
            kind: PatternKind::All,
            bits,
            quality,
            decode_error,
        });
    }

    DecodeResult {
        patterns,
        sync_scores,
        n_frames: frame_count(wav),
    }
}

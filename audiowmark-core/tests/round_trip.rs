//! End-to-end scenarios: add a watermark, locate it with the full sync
//! search, decode the message back.

use audiowmark_core::bands::{mark_data_frame_count, mark_sync_frame_count};
use audiowmark_core::config::{FRAMES_PAD_START, FRAME_SIZE, SYNC_THRESHOLD2};
use audiowmark_core::payload::{bit_str_to_vec, bit_vec_to_str};
use audiowmark_core::{Config, Key, PatternKind, WavData, MARK_SAMPLE_RATE};

const MESSAGE: &str = "0123456789abcdef0123456789abcdef";

/// Deterministic broadband noise; every watermark band gets energy.
fn noise(n_samples: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..n_samples)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 8) as f32 / (1 << 24) as f32 - 0.5
        })
        .collect()
}

fn block_frames() -> usize {
    mark_sync_frame_count() + mark_data_frame_count()
}

/// Samples for `blocks` complete watermark blocks plus start padding.
fn samples_for_blocks(blocks: usize) -> usize {
    (FRAMES_PAD_START + blocks * block_frames() + 20) * FRAME_SIZE
}

#[test]
fn round_trip_clean_channel() {
    let cfg = Config::default();
    let wav = WavData::new(noise(samples_for_blocks(1), 0xA5A5), 1, MARK_SAMPLE_RATE, 16);
    let bits = bit_str_to_vec(MESSAGE).unwrap();

    let (marked, info) = audiowmark_core::add_watermark(&wav, &bits, &cfg).unwrap();
    assert_eq!(info.data_blocks, 1);
    assert_eq!(marked.n_values(), wav.n_values());

    let result = audiowmark_core::get_watermark(&marked, &cfg).unwrap();
    assert!(!result.patterns.is_empty(), "no pattern decoded");
    for pattern in &result.patterns {
        assert_eq!(bit_vec_to_str(&pattern.bits), MESSAGE);
        assert_eq!(pattern.decode_error, 0.0);
        assert!(
            pattern.quality > SYNC_THRESHOLD2,
            "quality too low: {}",
            pattern.quality
        );
    }
    // the hit sits at the first possible block position
    let expected = FRAMES_PAD_START * FRAME_SIZE;
    assert!(result
        .sync_scores
        .iter()
        .any(|s| (s.index as i64 - expected as i64).abs() < FRAME_SIZE as i64 / 2));
}

#[test]
fn round_trip_survives_cropped_prefix() {
    let cfg = Config::default();
    let wav = WavData::new(noise(samples_for_blocks(2), 0x5A5A), 1, MARK_SAMPLE_RATE, 16);
    let bits = bit_str_to_vec(MESSAGE).unwrap();

    let (marked, info) = audiowmark_core::add_watermark(&wav, &bits, &cfg).unwrap();
    assert_eq!(info.data_blocks, 2);

    // drop the first 7000 samples; the second block stays intact and the
    // finder has to recover the shifted grid
    let cropped = WavData::new(
        marked.samples()[7000..].to_vec(),
        1,
        MARK_SAMPLE_RATE,
        16,
    );
    let result = audiowmark_core::get_watermark(&cropped, &cfg).unwrap();

    assert!(!result.sync_scores.is_empty(), "no sync hit after cropping");
    let decoded = result
        .patterns
        .iter()
        .find(|p| bit_vec_to_str(&p.bits) == MESSAGE)
        .expect("message not recovered from cropped signal");
    assert_eq!(decoded.decode_error, 0.0);
}

#[test]
fn round_trip_with_resample_bookends() {
    let cfg = Config::default();
    // 48 kHz input; the pipeline resamples to 44.1 kHz and back
    let n_samples = 2_700_000;
    let wav = WavData::new(noise(n_samples, 0x1CE), 1, 48000, 16);
    let bits = bit_str_to_vec(MESSAGE).unwrap();

    let (marked, info) = audiowmark_core::add_watermark(&wav, &bits, &cfg).unwrap();
    assert_eq!(info.data_blocks, 1);
    assert_eq!(
        marked.n_values(),
        wav.n_values(),
        "resample bookends must not change the output length"
    );
    assert_eq!(marked.sample_rate(), 48000);

    let result = audiowmark_core::get_watermark(&marked, &cfg).unwrap();
    let decoded = result
        .patterns
        .iter()
        .find(|p| bit_vec_to_str(&p.bits) == MESSAGE)
        .expect("message not recovered after 48 kHz round trip");
    assert_eq!(decoded.decode_error, 0.0);
}

#[test]
fn round_trip_through_wav_file() {
    let cfg = Config::default();
    let wav = WavData::new(noise(samples_for_blocks(1) * 2, 0xBEEF), 2, MARK_SAMPLE_RATE, 16);
    let bits = bit_str_to_vec(MESSAGE).unwrap();

    let (marked, _) = audiowmark_core::add_watermark(&wav, &bits, &cfg).unwrap();

    // write at 16 bit, read back; quantization must not break decoding
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("marked.wav");
    marked.save(&path).unwrap();
    let loaded = WavData::load(&path).unwrap();

    let result = audiowmark_core::get_watermark(&loaded, &cfg).unwrap();
    let decoded = result
        .patterns
        .iter()
        .find(|p| bit_vec_to_str(&p.bits) == MESSAGE)
        .expect("message not recovered from wav file");
    assert_eq!(decoded.decode_error, 0.0);
}

#[test]
fn wrong_key_does_not_reveal_message() {
    let encode_cfg = Config {
        key: Key::from_test_seed(1),
        ..Config::default()
    };
    let wav = WavData::new(noise(samples_for_blocks(1), 0xD00D), 1, MARK_SAMPLE_RATE, 16);
    let bits = bit_str_to_vec(MESSAGE).unwrap();
    let (marked, _) = audiowmark_core::add_watermark(&wav, &bits, &encode_cfg).unwrap();

    let decode_cfg = Config {
        key: Key::from_test_seed(2),
        ..Config::default()
    };
    let result = audiowmark_core::get_watermark(&marked, &decode_cfg).unwrap();

    // either the sync search finds nothing, or whatever decodes is noise
    for pattern in &result.patterns {
        assert_ne!(bit_vec_to_str(&pattern.bits), MESSAGE);
        assert!(pattern.decode_error > 0.1);
    }
}

#[test]
fn short_input_reports_nothing() {
    let cfg = Config::default();
    // far less than one block
    let wav = WavData::new(
        noise(MARK_SAMPLE_RATE as usize * 4, 0xFACE),
        1,
        MARK_SAMPLE_RATE,
        16,
    );
    let bits = bit_str_to_vec(MESSAGE).unwrap();

    let (marked, info) = audiowmark_core::add_watermark(&wav, &bits, &cfg).unwrap();
    assert_eq!(info.data_blocks, 0);

    let result = audiowmark_core::get_watermark(&marked, &cfg).unwrap();
    assert!(result.patterns.is_empty());
}

#[test]
fn three_blocks_report_all_pattern() {
    // the sync bypass keeps this three-block scenario affordable; the
    // search itself is covered by the tests above
    let cfg = Config {
        test_no_sync: true,
        ..Config::default()
    };
    let wav = WavData::new(noise(samples_for_blocks(3), 0x3B10), 1, MARK_SAMPLE_RATE, 16);
    let bits = bit_str_to_vec(MESSAGE).unwrap();

    let (marked, info) = audiowmark_core::add_watermark(&wav, &bits, &cfg).unwrap();
    assert_eq!(info.data_blocks, 3);

    let result = audiowmark_core::get_watermark(&marked, &cfg).unwrap();
    let all = result
        .patterns
        .iter()
        .find(|p| p.kind == PatternKind::All)
        .expect("combined pattern missing with three blocks");
    assert_eq!(bit_vec_to_str(&all.bits), MESSAGE);
    assert_eq!(all.decode_error, 0.0);

    // A, B, A blocks plus one AB join plus the combined pattern
    assert_eq!(result.patterns.len(), 5);
}

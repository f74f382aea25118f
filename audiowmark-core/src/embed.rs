//! Watermark encoder: spectral magnitude edits plus overlap-add synthesis.

use realfft::num_complex::Complex32;

use crate::bands::{
    gen_mix_entries, get_up_down, mark_data_frame_count, mark_sync_frame_count,
    randomize_bit_order, Layout,
};
use crate::config::{
    Config, BANDS_PER_FRAME, FRAMES_PAD_START, FRAMES_PER_BIT, FRAME_SIZE, MARK_SAMPLE_RATE,
    PAYLOAD_SIZE, SYNC_FRAMES_PER_BIT,
};
use crate::convcode::{conv_encode, BlockType};
use crate::error::Result;
use crate::fft::FftProcessor;
use crate::frame::{compute_frame_ffts, frame_count, synthesis_window, SpectrumMatrix};
use crate::random::Stream;
use crate::resample::resample;
use crate::wav::WavData;

/// Magnitudes below this stay untouched; raising them to a negative power
/// would blow up.
const MIN_MAG: f32 = 1e-7;

/// Facts about a completed `add` operation, for reporting.
#[derive(Debug, Clone)]
pub struct AddInfo {
    /// Complete sync+data blocks written.
    pub data_blocks: usize,
    /// Factor the output was scaled by to avoid clipping (≤ 1).
    pub volume_norm: f64,
    /// Signal-to-watermark ratio in dB, when requested.
    pub snr_db: Option<f64>,
}

/// Write one bit into one frame: up bands are pushed towards
/// `|X|^(1-Δ)`, down bands towards `|X|^(1+Δ)` (reversed for a 0 bit).
/// Phases are preserved; only the delta is recorded.
pub fn mark_bit_linear(
    cfg: &Config,
    f: usize,
    fft_out: &[Complex32],
    fft_delta: &mut [Complex32],
    data_bit: u8,
    stream: Stream,
) {
    let (up, down) = get_up_down(&cfg.key, f, stream);
    let data_bit_sign: f32 = if data_bit > 0 { 1.0 } else { -1.0 };
    let delta = cfg.water_delta as f32;

    for u in up {
        let mag = fft_out[u].norm();
        if mag > MIN_MAG {
            let mag_factor = mag.powf(-delta * data_bit_sign);
            fft_delta[u] = fft_out[u] * (mag_factor - 1.0);
        }
    }
    for d in down {
        let mag = fft_out[d].norm();
        if mag > MIN_MAG {
            let mag_factor = mag.powf(delta * data_bit_sign);
            fft_delta[d] = fft_out[d] * (mag_factor - 1.0);
        }
    }
}

/// Write a whole data block starting at `start_frame`.
fn mark_data(
    cfg: &Config,
    layout: &Layout,
    start_frame: usize,
    fft_out: &SpectrumMatrix,
    fft_delta: &mut SpectrumMatrix,
    bitvec: &[u8],
) {
    let n_frames = mark_data_frame_count();
    let n_channels = fft_out.n_channels();
    debug_assert_eq!(bitvec.len(), n_frames / FRAMES_PER_BIT);

    if cfg.mix {
        let mix_entries = gen_mix_entries(&cfg.key, layout);
        let delta = cfg.water_delta as f32;

        for f in 0..n_frames {
            let data_bit = bitvec[f / FRAMES_PER_BIT];
            let data_bit_sign: f32 = if data_bit > 0 { 1.0 } else { -1.0 };

            for ch in 0..n_channels {
                for frame_b in 0..BANDS_PER_FRAME {
                    let entry = mix_entries[f * BANDS_PER_FRAME + frame_b];
                    let frame = start_frame + entry.frame;
                    let out = fft_out.bins(frame, ch);
                    let out_delta = fft_delta.bins_mut(frame, ch);

                    let mag = out[entry.up].norm();
                    if mag > MIN_MAG {
                        let mag_factor = mag.powf(-delta * data_bit_sign);
                        out_delta[entry.up] = out[entry.up] * (mag_factor - 1.0);
                    }
                    let mag = out[entry.down].norm();
                    if mag > MIN_MAG {
                        let mag_factor = mag.powf(delta * data_bit_sign);
                        out_delta[entry.down] = out[entry.down] * (mag_factor - 1.0);
                    }
                }
            }
        }
    } else {
        for f in 0..n_frames {
            for ch in 0..n_channels {
                let frame = start_frame + layout.data_frame_pos(f);
                mark_bit_linear(
                    cfg,
                    f,
                    fft_out.bins(frame, ch),
                    fft_delta.bins_mut(frame, ch),
                    bitvec[f / FRAMES_PER_BIT],
                    Stream::DataUpDown,
                );
            }
        }
    }
}

/// Write one sync block; `ab` selects the 010101 (A) or 101010 (B)
/// pattern. Sync is always stored linearly so the finder can score
/// candidate positions without the mix plan.
fn mark_sync(
    cfg: &Config,
    layout: &Layout,
    start_frame: usize,
    fft_out: &SpectrumMatrix,
    fft_delta: &mut SpectrumMatrix,
    ab: usize,
) {
    for f in 0..mark_sync_frame_count() {
        let data_bit = ((f / SYNC_FRAMES_PER_BIT + ab) & 1) as u8;
        for ch in 0..fft_out.n_channels() {
            let frame = start_frame + layout.sync_frame_pos(f);
            mark_bit_linear(
                cfg,
                f,
                fft_out.bins(frame, ch),
                fft_delta.bins_mut(frame, ch),
                data_bit,
                Stream::SyncUpDown,
            );
        }
    }
}

/// Fill a padding frame with a zero bit from the pad stream.
fn mark_pad(cfg: &Config, frame: usize, fft_out: &SpectrumMatrix, fft_delta: &mut SpectrumMatrix) {
    for ch in 0..fft_out.n_channels() {
        mark_bit_linear(
            cfg,
            frame,
            fft_out.bins(frame, ch),
            fft_delta.bins_mut(frame, ch),
            0,
            Stream::PadUpDown,
        );
    }
}

/// Embed `message_bits` (exactly [`PAYLOAD_SIZE`] bits) into `orig`.
///
/// Returns the watermarked audio at the original rate, length and bit
/// depth, together with the run statistics.
pub fn add_watermark(orig: &WavData, message_bits: &[u8], cfg: &Config) -> Result<(WavData, AddInfo)> {
    assert_eq!(message_bits.len(), PAYLOAD_SIZE);

    let bitvec_a = randomize_bit_order(
        &cfg.key,
        &conv_encode(BlockType::A, message_bits),
        true,
    );
    let bitvec_b = randomize_bit_order(
        &cfg.key,
        &conv_encode(BlockType::B, message_bits),
        true,
    );

    let n_channels = orig.n_channels();
    let needs_resample = orig.sample_rate() != MARK_SAMPLE_RATE;
    let mut in_signal = if needs_resample {
        resample(orig, MARK_SAMPLE_RATE)?.into_samples()
    } else {
        orig.samples().to_vec()
    };

    // pad with zeros so no partly filled frame needs special casing
    while in_signal.len() % (n_channels * FRAME_SIZE) != 0 {
        in_signal.push(0.0);
    }
    let wav = WavData::new(in_signal, n_channels, MARK_SAMPLE_RATE, orig.bit_depth());
    let n_frames = frame_count(&wav);

    let mut fft = FftProcessor::new(FRAME_SIZE);
    let fft_out = compute_frame_ffts(&mut fft, &wav, 0, n_frames, None)
        .expect("buffer was padded to whole frames");
    let mut fft_delta = SpectrumMatrix::zeros(n_frames, n_channels);
    let layout = Layout::new(&cfg.key);

    let block_frames = mark_sync_frame_count() + mark_data_frame_count();
    let mut frame_index = 0;
    let mut data_blocks = 0;

    while frame_index < FRAMES_PAD_START && frame_index < n_frames {
        mark_pad(cfg, frame_index, &fft_out, &mut fft_delta);
        frame_index += 1;
    }
    while frame_index + block_frames < n_frames {
        mark_sync(cfg, &layout, frame_index, &fft_out, &mut fft_delta, data_blocks & 1);
        mark_data(
            cfg,
            &layout,
            frame_index,
            &fft_out,
            &mut fft_delta,
            if data_blocks & 1 == 1 { &bitvec_b } else { &bitvec_a },
        );
        frame_index += block_frames;
        data_blocks += 1;
    }
    while frame_index < n_frames {
        mark_pad(cfg, frame_index, &fft_out, &mut fft_delta);
        frame_index += 1;
    }
    log::debug!("watermark delta spans {n_frames} frames, {data_blocks} data blocks");

    // overlap-add the per-frame deltas into the watermark signal; each
    // frame contributes to its predecessor, itself and its successor
    let synth_window = synthesis_window();
    let mut out_signal = vec![0.0f32; wav.n_values()];
    let mut delta_out = vec![0.0f32; FRAME_SIZE];
    for f in 0..n_frames {
        for ch in 0..n_channels {
            let mut spectrum = fft_delta.bins(f, ch).to_vec();
            fft.inverse(&mut spectrum, &mut delta_out)
                .expect("delta spectrum matches planned FFT size");

            for dframe in -1i64..=1 {
                let target = f as i64 + dframe;
                if target > 0 && (target as usize) < n_frames {
                    let wstart = ((dframe + 1) as usize) * FRAME_SIZE;
                    let mut pos = target as usize * FRAME_SIZE * n_channels + ch;
                    for x in 0..FRAME_SIZE {
                        out_signal[pos] += delta_out[x] * synth_window[wstart + x];
                        pos += n_channels;
                    }
                }
            }
        }
    }

    if needs_resample {
        let mark_wav = WavData::new(out_signal, n_channels, MARK_SAMPLE_RATE, wav.bit_depth());
        out_signal = resample(&mark_wav, orig.sample_rate())?.into_samples();
    }
    out_signal.resize(orig.n_values(), 0.0);

    let snr_db = cfg.snr.then(|| {
        let mut delta_power = 0.0f64;
        let mut signal_power = 0.0f64;
        for (&orig_sample, &delta) in orig.samples().iter().zip(out_signal.iter()) {
            delta_power += delta as f64 * delta as f64;
            signal_power += orig_sample as f64 * orig_sample as f64;
        }
        delta_power /= orig.n_values() as f64;
        signal_power /= orig.n_values() as f64;
        10.0 * (signal_power / delta_power).log10()
    });

    // scale (samples + watermark) down if necessary to avoid clipping;
    // inputs are treated as-if already clipped to [-1, 1]
    let mut max_value = 1e-6f32;
    for (&orig_sample, &delta) in orig.samples().iter().zip(out_signal.iter()) {
        let x = orig_sample.clamp(-1.0, 1.0);
        let value = (x + delta).abs();
        if value > max_value {
            max_value = value;
        }
    }
    let scale = (1.0 / max_value as f64).min(1.0);

    let samples: Vec<f32> = orig
        .samples()
        .iter()
        .zip(out_signal.iter())
        .map(|(&orig_sample, &delta)| (orig_sample + delta) * scale as f32)
        .collect();

    let out_wav = WavData::new(samples, n_channels, orig.sample_rate(), orig.bit_depth());
    Ok((
        out_wav,
        AddInfo {
            data_blocks,
            volume_norm: scale,
            snr_db,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_BAND, MIN_BAND, NUM_BINS};

    fn test_spectrum() -> Vec<Complex32> {
        (0..NUM_BINS)
            .map(|i| {
                let mag = 0.01 + 0.3 * ((i * 13 % 29) as f32 / 29.0);
                let phase = (i * 7 % 31) as f32;
                Complex32::from_polar(mag, phase)
            })
            .collect()
    }

    #[test]
    fn linear_embed_is_symmetric_in_the_bit() {
        let cfg = Config::default();
        let spectrum = test_spectrum();

        let mut delta_one = vec![Complex32::default(); NUM_BINS];
        let mut delta_zero = vec![Complex32::default(); NUM_BINS];
        mark_bit_linear(&cfg, 5, &spectrum, &mut delta_one, 1, Stream::DataUpDown);
        mark_bit_linear(&cfg, 5, &spectrum, &mut delta_zero, 0, Stream::DataUpDown);

        let (up, down) = get_up_down(&cfg.key, 5, Stream::DataUpDown);
        for &bin in up.iter().chain(down.iter()) {
            let mag = spectrum[bin].norm();
            let ratio_one = (spectrum[bin] + delta_one[bin]).norm() / mag;
            let ratio_zero = (spectrum[bin] + delta_zero[bin]).norm() / mag;
            // opposite bits move the magnitude by reciprocal factors
            assert!(
                (ratio_one * ratio_zero - 1.0).abs() < 1e-4,
                "bin {bin}: {ratio_one} * {ratio_zero} != 1"
            );
        }
    }

    #[test]
    fn linear_embed_touches_only_planned_bands() {
        let cfg = Config::default();
        let spectrum = test_spectrum();
        let mut delta = vec![Complex32::default(); NUM_BINS];
        mark_bit_linear(&cfg, 9, &spectrum, &mut delta, 1, Stream::SyncUpDown);

        let (up, down) = get_up_down(&cfg.key, 9, Stream::SyncUpDown);
        for (bin, value) in delta.iter().enumerate() {
            let planned = up.contains(&bin) || down.contains(&bin);
            assert_eq!(value.norm() > 0.0, planned, "unexpected delta at bin {bin}");
            if !(MIN_BAND..=MAX_BAND).contains(&bin) {
                assert_eq!(value.norm(), 0.0);
            }
        }
    }

    #[test]
    fn embed_preserves_phase() {
        let cfg = Config::default();
        let spectrum = test_spectrum();
        let mut delta = vec![Complex32::default(); NUM_BINS];
        mark_bit_linear(&cfg, 2, &spectrum, &mut delta, 1, Stream::DataUpDown);

        for (bin, d) in delta.iter().enumerate() {
            if d.norm() > 0.0 {
                let marked = spectrum[bin] + d;
                let angle_diff = (marked.arg() - spectrum[bin].arg()).abs();
                assert!(angle_diff < 1e-4, "phase moved at bin {bin}: {angle_diff}");
            }
        }
    }

    fn broadband(num_samples: usize, n_channels: usize) -> Vec<f32> {
        let mut samples = vec![0.0f32; num_samples * n_channels];
        for i in 0..num_samples {
            let t = i as f32 / MARK_SAMPLE_RATE as f32;
            let mut value = 0.0;
            for k in 1u32..60 {
                let freq = k as f32 * 73.0;
                value += (2.0 * std::f32::consts::PI * freq * t + k as f32).sin() / k as f32;
            }
            for ch in 0..n_channels {
                samples[i * n_channels + ch] = value * 0.2;
            }
        }
        samples
    }

    #[test]
    fn short_input_writes_no_blocks() {
        let cfg = Config::default();
        let wav = WavData::new(broadband(MARK_SAMPLE_RATE as usize, 1), 1, MARK_SAMPLE_RATE, 16);
        let bits = vec![0u8; PAYLOAD_SIZE];

        let (out, info) = add_watermark(&wav, &bits, &cfg).unwrap();
        assert_eq!(info.data_blocks, 0);
        assert_eq!(out.n_values(), wav.n_values());
    }

    #[test]
    fn output_length_and_small_delta() {
        let cfg = Config::default();
        let num_samples = MARK_SAMPLE_RATE as usize * 5 + 123; // not frame aligned
        let wav = WavData::new(broadband(num_samples, 2), 2, MARK_SAMPLE_RATE, 16);
        let bits = vec![1u8; PAYLOAD_SIZE];

        let (out, info) = add_watermark(&wav, &bits, &cfg).unwrap();
        assert_eq!(out.n_values(), wav.n_values());
        assert_eq!(out.sample_rate(), wav.sample_rate());
        assert!(info.volume_norm <= 1.0 && info.volume_norm > 0.9);

        let max_diff = wav
            .samples()
            .iter()
            .zip(out.samples())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff < 0.1, "watermark delta too large: {max_diff}");
    }

    #[test]
    fn normalization_prevents_clipping() {
        let mut cfg = Config::default();
        cfg.set_strength(30.0);
        // loud signal close to full scale
        let samples: Vec<f32> = broadband(MARK_SAMPLE_RATE as usize * 2, 1)
            .iter()
            .map(|s| (s * 12.0).clamp(-0.999, 0.999))
            .collect();
        let wav = WavData::new(samples, 1, MARK_SAMPLE_RATE, 16);
        let bits = vec![1u8; PAYLOAD_SIZE];

        let (out, info) = add_watermark(&wav, &bits, &cfg).unwrap();
        assert!(info.volume_norm <= 1.0);
        let peak = out.samples().iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak <= 1.0 + 1e-6, "output clips: {peak}");
    }

    #[test]
    fn snr_reported_when_requested() {
        let cfg = Config {
            snr: true,
            ..Config::default()
        };
        let wav = WavData::new(broadband(MARK_SAMPLE_RATE as usize * 2, 1), 1, MARK_SAMPLE_RATE, 16);
        let bits = vec![0u8; PAYLOAD_SIZE];

        let (_, info) = add_watermark(&wav, &bits, &cfg).unwrap();
        let snr = info.snr_db.expect("snr requested");
        assert!(snr > 20.0, "snr implausibly low: {snr}");
    }

    #[test]
    fn deterministic_output() {
        let cfg = Config::default();
        let wav = WavData::new(broadband(MARK_SAMPLE_RATE as usize * 2, 1), 1, MARK_SAMPLE_RATE, 16);
        let bits: Vec<u8> = (0..PAYLOAD_SIZE).map(|i| (i % 2) as u8).collect();

        let (out1, _) = add_watermark(&wav, &bits, &cfg).unwrap();
        let (out2, _) = add_watermark(&wav, &bits, &cfg).unwrap();
        assert_eq!(out1.samples(), out2.samples());
    }
}

//! Sample-rate conversion for the 44.1 kHz watermark bookends.
//!
//! Two kernels share the same windowed-sinc math: a polyphase table for
//! rates with a small rational ratio (covers the common studio rates),
//! and a per-sample evaluation fallback for arbitrary ratios.

use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::wav::WavData;

/// Sinc half-width in input samples at unity cutoff.
const KERNEL_HALF_WIDTH: usize = 16;
/// Largest phase table built for the fast path.
const MAX_PHASES: u32 = 1024;
/// Ratios beyond this are rejected as unsupported.
const MAX_RATIO: f64 = 64.0;

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Hann-windowed sinc taps centered `frac` samples after the reference
/// input sample, normalized to unity DC gain. Tap `k` weighs input sample
/// `reference + k - half`.
fn kernel_taps(frac: f64, cutoff: f64, half: usize) -> Vec<f32> {
    let span = half as f64 + 1.0;
    let mut taps = Vec::with_capacity(2 * half + 1);
    let mut sum = 0.0f64;
    for k in -(half as i64)..=(half as i64) {
        let t = k as f64 - frac;
        let window = if (t / span).abs() < 1.0 {
            0.5 * (1.0 + (PI * t / span).cos())
        } else {
            0.0
        };
        let c = cutoff * sinc(cutoff * t) * window;
        sum += c;
        taps.push(c);
    }
    if sum.abs() > 1e-9 {
        for c in taps.iter_mut() {
            *c /= sum;
        }
    }
    taps.into_iter().map(|c| c as f32).collect()
}

/// Apply one tap set at input frame `center` and accumulate per channel.
fn apply_taps(
    input: &[f32],
    n_channels: usize,
    n_in_frames: usize,
    center: i64,
    half: usize,
    taps: &[f32],
    out: &mut [f32],
) {
    for (k, &c) in taps.iter().enumerate() {
        let frame = center + k as i64 - half as i64;
        if frame < 0 || frame as usize >= n_in_frames {
            continue;
        }
        let base = frame as usize * n_channels;
        for (ch, sample) in out.iter_mut().enumerate() {
            *sample += input[base + ch] * c;
        }
    }
}

/// Resample to `rate`, preserving the channel count. The output holds
/// `round(frames_in * rate / rate_in)` frames.
pub fn resample(wav: &WavData, rate: u32) -> Result<WavData> {
    let from = wav.sample_rate();
    if rate == from {
        return Ok(wav.clone());
    }
    if rate == 0 || from == 0 {
        return Err(Error::UnsupportedRate { from, to: rate });
    }
    let ratio = rate as f64 / from as f64;
    if !(1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
        return Err(Error::UnsupportedRate { from, to: rate });
    }

    let n_channels = wav.n_channels();
    let input = wav.samples();
    let n_in_frames = input.len() / n_channels;
    let n_out_frames = (n_in_frames as f64 * ratio).round() as usize;

    let cutoff = ratio.min(1.0);
    let half = (KERNEL_HALF_WIDTH as f64 / cutoff).ceil() as usize;

    let g = gcd(rate, from);
    let phases = rate / g; // output frames per input period
    let stride = from / g; // input frames per input period

    let mut output = vec![0.0f32; n_out_frames * n_channels];
    let mut frame_out = vec![0.0f32; n_channels];

    if phases <= MAX_PHASES {
        // fast path: one precomputed tap set per output phase
        let tables: Vec<Vec<f32>> = (0..phases)
            .map(|p| kernel_taps(p as f64 / phases as f64, cutoff, half))
            .collect();

        for n in 0..n_out_frames {
            let num = n as u64 * stride as u64;
            let center = (num / phases as u64) as i64;
            let phase = (num % phases as u64) as usize;

            frame_out.iter_mut().for_each(|s| *s = 0.0);
            apply_taps(
                input,
                n_channels,
                n_in_frames,
                center,
                half,
                &tables[phase],
                &mut frame_out,
            );
            output[n * n_channels..(n + 1) * n_channels].copy_from_slice(&frame_out);
        }
    } else {
        // arbitrary-ratio fallback: evaluate the kernel per output frame
        for n in 0..n_out_frames {
            let pos = n as f64 / ratio;
            let center = pos.floor() as i64;
            let frac = pos - center as f64;
            let taps = kernel_taps(frac, cutoff, half);

            frame_out.iter_mut().for_each(|s| *s = 0.0);
            apply_taps(
                input,
                n_channels,
                n_in_frames,
                center,
                half,
                &taps,
                &mut frame_out,
            );
            output[n * n_channels..(n + 1) * n_channels].copy_from_slice(&frame_out);
        }
    }

    Ok(WavData::new(output, n_channels, rate, wav.bit_depth()))
}

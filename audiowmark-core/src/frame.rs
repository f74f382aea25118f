//! Frame analysis front-end: windowing, deinterleaving and per-frame FFTs.

use realfft::num_complex::Complex32;

use crate::config::{FRAME_SIZE, NUM_BINS};
use crate::fft::FftProcessor;
use crate::wav::WavData;

/// Hamming window on [-1, 1], sharp cutoffs at the boundaries.
fn window_hamming(x: f64) -> f64 {
    if x.abs() > 1.0 {
        return 0.0;
    }
    0.54 + 0.46 * (std::f64::consts::PI * x).cos()
}

/// Analysis window: Hamming scaled by `2 / sum(w)`.
pub fn analysis_window() -> Vec<f32> {
    let fsize_2 = FRAME_SIZE as f64 / 2.0;
    let raw: Vec<f64> = (0..FRAME_SIZE)
        .map(|i| window_hamming((i as f64 - fsize_2) / fsize_2))
        .collect();
    let weight: f64 = raw.iter().sum();
    raw.iter().map(|&w| (w * 2.0 / weight) as f32).collect()
}

/// Synthesis window for overlap-add, spanning the previous, current and
/// next frame. Triangular core with a 10% linear ramp around the frame
/// boundaries, smoothed by a raised cosine.
pub fn synthesis_window() -> Vec<f32> {
    let overlap = 0.1;
    (0..FRAME_SIZE * 3)
        .map(|i| {
            let mut norm_pos = (i as f64 - FRAME_SIZE as f64) / FRAME_SIZE as f64;
            if norm_pos > 0.5 {
                // symmetric window
                norm_pos = 1.0 - norm_pos;
            }
            let tri = if norm_pos < -overlap {
                0.0
            } else if norm_pos < overlap {
                0.5 + norm_pos / (2.0 * overlap)
            } else {
                1.0
            };
            (((tri * std::f64::consts::PI + std::f64::consts::PI).cos() + 1.0) * 0.5) as f32
        })
        .collect()
}

/// Magnitude factor to dB; non-positive factors map to `min_db`.
pub fn db_from_factor(factor: f64, min_db: f64) -> f64 {
    if factor > 0.0 {
        20.0 * factor.log10()
    } else {
        min_db
    }
}

/// Number of whole frames in a sample buffer.
pub fn frame_count(wav: &WavData) -> usize {
    wav.n_values() / wav.n_channels() / FRAME_SIZE
}

/// Spectra of a run of frames, addressed by `(frame, channel)`.
///
/// Frames skipped during a selective computation hold no bins; callers
/// check [`SpectrumMatrix::is_present`] before reading them.
pub struct SpectrumMatrix {
    n_frames: usize,
    n_channels: usize,
    frames: Vec<Vec<Complex32>>,
}

impl SpectrumMatrix {
    /// All-zero spectra, used to accumulate the watermark delta.
    pub fn zeros(n_frames: usize, n_channels: usize) -> Self {
        Self {
            n_frames,
            n_channels,
            frames: vec![vec![Complex32::default(); NUM_BINS]; n_frames * n_channels],
        }
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn index(&self, frame: usize, channel: usize) -> usize {
        assert!(frame < self.n_frames && channel < self.n_channels);
        frame * self.n_channels + channel
    }

    pub fn is_present(&self, frame: usize, channel: usize) -> bool {
        !self.frames[self.index(frame, channel)].is_empty()
    }

    pub fn bins(&self, frame: usize, channel: usize) -> &[Complex32] {
        &self.frames[self.index(frame, channel)]
    }

    pub fn bins_mut(&mut self, frame: usize, channel: usize) -> &mut [Complex32] {
        let index = self.index(frame, channel);
        &mut self.frames[index]
    }
}

/// Compute windowed FFTs for `n_frames` frames of every channel, starting
/// at per-channel sample offset `start_index`.
///
/// `want_frames` restricts the computation to selected frames (the sync
/// refinement only needs sync positions); skipped frames stay empty.
/// Returns `None` when the buffer cannot supply `n_frames` whole frames.
pub fn compute_frame_ffts(
    fft: &mut FftProcessor,
    wav: &WavData,
    start_index: usize,
    n_frames: usize,
    want_frames: Option<&[bool]>,
) -> Option<SpectrumMatrix> {
    let n_channels = wav.n_channels();
    let samples = wav.samples();
    if samples.len() < (start_index + n_frames * FRAME_SIZE) * n_channels {
        return None;
    }

    let window = analysis_window();
    let mut frame_buf = vec![0.0f32; FRAME_SIZE];
    let mut out = SpectrumMatrix {
        n_frames,
        n_channels,
        frames: Vec::with_capacity(n_frames * n_channels),
    };

    for f in 0..n_frames {
        if let Some(want) = want_frames {
            if !want[f] {
                for _ in 0..n_channels {
                    out.frames.push(Vec::new());
                }
                continue;
            }
        }
        for ch in 0..n_channels {
            let mut pos = (start_index + f * FRAME_SIZE) * n_channels + ch;
            for (x, w) in frame_buf.iter_mut().zip(window.iter()) {
                *x = samples[pos] * w;
                pos += n_channels;
            }
            let mut spectrum = vec![Complex32::default(); NUM_BINS];
            fft.forward(&mut frame_buf, &mut spectrum)
                .expect("frame buffer matches planned FFT size");
            out.frames.push(spectrum);
        }
    }
    Some(out)
}

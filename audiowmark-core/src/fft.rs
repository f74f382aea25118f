use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{Error, Result};

/// Pre-planned FFT pair for a fixed frame size.
pub struct FftProcessor {
    frame_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    scratch_fwd: Vec<Complex32>,
    scratch_inv: Vec<Complex32>,
}

impl FftProcessor {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(frame_size);
        let inverse = planner.plan_fft_inverse(frame_size);
        let scratch_fwd = forward.make_scratch_vec();
        let scratch_inv = inverse.make_scratch_vec();
        Self {
            frame_size,
            forward,
            inverse,
            scratch_fwd,
            scratch_inv,
        }
    }

    /// Number of complex bins per frame (frame_size/2 + 1).
    pub fn num_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Forward FFT: `time` (destroyed in the process) -> `spectrum`.
    pub fn forward(&mut self, time: &mut [f32], spectrum: &mut [Complex32]) -> Result<()> {
        self.forward
            .process_with_scratch(time, spectrum, &mut self.scratch_fwd)
            .map_err(|e| Error::Fft(e.to_string()))
    }

    /// Inverse FFT: `spectrum` (destroyed in the process) -> `time`,
    /// scaled so that forward followed by inverse is the identity.
    pub fn inverse(&mut self, spectrum: &mut [Complex32], time: &mut [f32]) -> Result<()> {
        self.inverse
            .process_with_scratch(spectrum, time, &mut self.scratch_inv)
            .map_err(|e| Error::Fft(e.to_string()))?;
        let scale = 1.0 / self.frame_size as f32;
        for sample in time.iter_mut() {
            *sample *= scale;
        }
        Ok(())
    }
}

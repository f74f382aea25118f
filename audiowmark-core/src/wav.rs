use std::path::Path;

use crate::error::Result;

/// An audio buffer of interleaved float samples in [-1, 1].
#[derive(Debug, Clone)]
pub struct WavData {
    samples: Vec<f32>,
    n_channels: usize,
    sample_rate: u32,
    bit_depth: u32,
}

impl WavData {
    pub fn new(samples: Vec<f32>, n_channels: usize, sample_rate: u32, bit_depth: u32) -> Self {
        Self {
            samples,
            n_channels,
            sample_rate,
            bit_depth,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        Ok(Self {
            samples,
            n_channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            bit_depth: spec.bits_per_sample as u32,
        })
    }

    /// Write the buffer at its stored bit depth, clipping to [-1, 1].
    pub fn save(&self, path: &Path) -> Result<()> {
        let float = self.bit_depth > 24;
        let spec = hound::WavSpec {
            channels: self.n_channels as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bit_depth as u16,
            sample_format: if float {
                hound::SampleFormat::Float
            } else {
                hound::SampleFormat::Int
            },
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        if float {
            for &s in &self.samples {
                writer.write_sample(s.clamp(-1.0, 1.0))?;
            }
        } else {
            let max = (1i64 << (self.bit_depth - 1)) as f32;
            let limit = max - 1.0;
            for &s in &self.samples {
                let value = (s * max).clamp(-max, limit);
                writer.write_sample(value as i32)?;
            }
        }
        writer.finalize()?;
        Ok(())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Total sample count over all channels.
    pub fn n_values(&self) -> usize {
        self.samples.len()
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }
}

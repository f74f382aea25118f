//! Robust, inaudible watermarking of PCM audio.
//!
//! A 128-bit payload is spread over pseudo-randomly selected spectral
//! bands of 1024-sample frames, protected by a rate-1/6 convolutional
//! code and framed by sync blocks that a decoder can locate under
//! unknown offsets. The embedding is a small magnitude-domain delta, so
//! the watermark survives resampling, transcoding and cropping while
//! staying perceptually transparent.

pub mod bands;
pub mod config;
pub mod convcode;
pub mod decode;
pub mod embed;
pub mod error;
pub mod fft;
pub mod frame;
pub mod payload;
pub mod random;
pub mod resample;
pub mod sync;
pub mod wav;

pub use config::{Config, MARK_SAMPLE_RATE, PAYLOAD_SIZE};
pub use convcode::BlockType;
pub use decode::{DecodeResult, Pattern, PatternKind};
pub use embed::AddInfo;
pub use error::{Error, Result};
pub use frame::db_from_factor;
pub use random::Key;
pub use wav::WavData;

/// Embed a message (exactly [`PAYLOAD_SIZE`] bits, see
/// [`payload::parse_message`]) into an audio buffer.
///
/// Resamples to the watermark rate and back as needed; the result keeps
/// the input's rate, length and bit depth.
pub fn add_watermark(orig: &WavData, message_bits: &[u8], cfg: &Config) -> Result<(WavData, AddInfo)> {
    embed::add_watermark(orig, message_bits, cfg)
}

/// Search a buffer for watermark blocks and decode every pattern found.
///
/// A buffer without sync hits yields an empty report, not an error.
pub fn get_watermark(wav: &WavData, cfg: &Config) -> Result<DecodeResult> {
    if wav.sample_rate() == MARK_SAMPLE_RATE {
        Ok(decode::decode_blocks(cfg, wav))
    } else {
        let resampled = resample::resample(wav, MARK_SAMPLE_RATE)?;
        Ok(decode::decode_blocks(cfg, &resampled))
    }
}

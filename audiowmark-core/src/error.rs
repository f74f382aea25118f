use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse message '{0}'")]
    InvalidMessage(String),

    #[error("number of bits in message larger than payload size ({got} > {max})")]
    PayloadTooLong { got: usize, max: usize },

    #[error("invalid watermarking key: {0}")]
    InvalidKey(String),

    #[error("watermark key can at most be set once (--key / --test-key option)")]
    KeyConflict,

    #[error("resampling from rate {from} to rate {to} not supported")]
    UnsupportedRate { from: u32, to: u32 },

    #[error("error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("audio file error: {0}")]
    Wav(#[from] hound::Error),

    #[error("FFT error: {0}")]
    Fft(String),
}

pub type Result<T> = std::result::Result<T, Error>;

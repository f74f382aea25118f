use std::path::Path;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{Error, Result};

/// Independent pseudo-random sequences used by the protocol.
///
/// The discriminants are mixed into the generator state and must never
/// change: encoder and decoder derive identical band plans, permutations
/// and mix orders from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stream {
    DataUpDown = 1,
    SyncUpDown = 2,
    PadUpDown = 3,
    BitOrder = 4,
    FramePosition = 5,
    Mix = 6,
}

/// A 128-bit watermarking key.
///
/// The key is the AES-128 key of every [`Rng`]; without it the band plans
/// and permutations are unrecoverable. The default all-zero key is used
/// when the user sets none.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    raw: [u8; 16],
}

impl Default for Key {
    fn default() -> Self {
        Self { raw: [0u8; 16] }
    }
}

impl Key {
    pub fn from_bytes(raw: [u8; 16]) -> Self {
        Self { raw }
    }

    /// Derive a key from a small integer, for reproducible tests
    /// (`--test-key`).
    pub fn from_test_seed(n: u64) -> Self {
        let mut raw = [0u8; 16];
        raw[0..8].copy_from_slice(&n.to_le_bytes());
        Self { raw }
    }

    /// Generate a fresh key from OS entropy.
    pub fn generate() -> Self {
        Self {
            raw: rand::random::<[u8; 16]>(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.raw
    }

    pub fn to_hex(&self) -> String {
        self.raw.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != 32 {
            return Err(Error::InvalidKey(format!(
                "expected 32 hex digits, got {}",
                hex.len()
            )));
        }
        let mut raw = [0u8; 16];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidKey(format!("invalid hex digit in '{hex}'")))?;
        }
        Ok(Self { raw })
    }

    /// Load a key from the text format written by `gen-key`.
    ///
    /// Blank lines and `#` comments are skipped; exactly one `key <hex>`
    /// line must remain.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut key = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.strip_prefix("key ") {
                Some(hex) => {
                    if key.is_some() {
                        return Err(Error::InvalidKey(format!(
                            "{}: more than one key line",
                            path.display()
                        )));
                    }
                    key = Some(Self::from_hex(hex)?);
                }
                None => {
                    return Err(Error::InvalidKey(format!(
                        "{}: parse error in line '{line}'",
                        path.display()
                    )));
                }
            }
        }
        key.ok_or_else(|| Error::InvalidKey(format!("{}: no key found", path.display())))
    }

    /// The key-file text persisted by `gen-key`.
    pub fn file_contents(&self) -> String {
        format!("# watermarking key for audiowmark\n\nkey {}\n", self.to_hex())
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("raw", &"[REDACTED]").finish()
    }
}

/// Deterministic generator for one `(key, stream, seed)` triple.
///
/// AES-128 in counter mode: each plaintext block is
/// `[seed: u64 LE | stream: u8 | zero pad | counter: u32 LE]` and every
/// encrypted block yields two little-endian 64-bit words. Identical
/// triples produce identical output on any platform.
pub struct Rng {
    cipher: Aes128,
    template: [u8; 16],
    counter: u32,
    words: [u64; 2],
    avail: usize,
}

impl Rng {
    pub fn new(key: &Key, seed: u64, stream: Stream) -> Self {
        let cipher = Aes128::new_from_slice(key.as_bytes()).expect("key is 16 bytes");
        let mut template = [0u8; 16];
        template[0..8].copy_from_slice(&seed.to_le_bytes());
        template[8] = stream as u8;
        Self {
            cipher,
            template,
            counter: 0,
            words: [0; 2],
            avail: 0,
        }
    }

    fn refill(&mut self) {
        let mut block = self.template;
        block[12..16].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);

        let mut block = aes::Block::from(block);
        self.cipher.encrypt_block(&mut block);
        let bytes: [u8; 16] = block.into();

        self.words[0] = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        self.words[1] = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes"));
        self.avail = 2;
    }

    pub fn next_u64(&mut self) -> u64 {
        if self.avail == 0 {
            self.refill();
        }
        self.avail -= 1;
        self.words[self.avail]
    }

    /// Uniform value in `[0, bound)` without modulo bias.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        // rejection zone keeps the distribution exactly uniform
        let zone = u64::MAX - (u64::MAX - bound + 1) % bound;
        loop {
            let word = self.next_u64();
            if word <= zone {
                return word % bound;
            }
        }
    }

    /// Unbiased Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_below(i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}

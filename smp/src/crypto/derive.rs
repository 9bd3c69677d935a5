//! Deterministic password derivation.
//!
//! Absorbed chunks are length-framed into SHA-256. The digest is stretched with
//! HKDF-SHA256 into a key bound to the requested options, and that key drives
//! an HMAC-SHA256 counter stream from which output characters are sampled
//! without modulo bias. Identical secret, hint and options always produce the
//! same output.

use std::collections::HashSet;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

/// Digits, both letter cases and a set of shell-friendly symbols.
pub const DEFAULT_ALPHABET: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&*+-=?@^_~";
pub const DEFAULT_SIZE: i64 = 16;
/// Longest output a single derivation will produce.
pub const MAX_SIZE: i64 = 4096;

const HKDF_SALT: &[u8] = b"smp/derive/v1";
const STREAM_KEY_LEN: usize = 64;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeriveError {
    #[error("output size must be positive, got {0}")]
    InvalidSize(i64),
    #[error("output size {0} exceeds the maximum of {max}", max = MAX_SIZE)]
    SizeTooLarge(i64),
    #[error("alphabet is empty")]
    EmptyAlphabet,
    #[error("no alphabet character satisfies the complexity flags at position {0}")]
    Unsatisfiable(usize),
    #[error("key stream setup failed: {0}")]
    KeyStream(String),
}

/// Output policy for a single derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub size: i64,
    pub alphabet: String,
    /// No character appears twice in the output.
    pub unique: bool,
    /// Adjacent characters never share a type (lowercase, uppercase, digit, other).
    pub no_type_repetition: bool,
    /// Adjacent characters are never equal.
    pub no_char_repetition: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            alphabet: DEFAULT_ALPHABET.to_string(),
            unique: false,
            no_type_repetition: false,
            no_char_repetition: false,
        }
    }
}

impl Options {
    fn allows(&self, candidate: char, previous: Option<char>, used: &HashSet<char>) -> bool {
        if self.unique && used.contains(&candidate) {
            return false;
        }
        if let Some(prev) = previous {
            if self.no_char_repetition && prev == candidate {
                return false;
            }
            if self.no_type_repetition && CharType::of(prev) == CharType::of(candidate) {
                return false;
            }
        }
        true
    }

    /// HKDF info string; changing any option yields an unrelated stream.
    fn context(&self) -> Vec<u8> {
        let flags = u8::from(self.unique)
            | (u8::from(self.no_type_repetition) << 1)
            | (u8::from(self.no_char_repetition) << 2);
        let mut info = Vec::with_capacity(self.alphabet.len() + 17);
        info.extend_from_slice(&self.size.to_be_bytes());
        info.push(flags);
        info.extend_from_slice(&(self.alphabet.len() as u64).to_be_bytes());
        info.extend_from_slice(self.alphabet.as_bytes());
        info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharType {
    Lower,
    Upper,
    Digit,
    Other,
}

impl CharType {
    fn of(c: char) -> Self {
        if c.is_lowercase() {
            CharType::Lower
        } else if c.is_uppercase() {
            CharType::Upper
        } else if c.is_numeric() {
            CharType::Digit
        } else {
            CharType::Other
        }
    }
}

/// Accumulates input chunks, then produces the derived output.
pub struct Deriver {
    options: Options,
    hasher: Sha256,
}

impl Deriver {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            hasher: Sha256::new(),
        }
    }

    /// Feeds one chunk. Chunks are framed, so `absorb(b"ab"); absorb(b"c")`
    /// differs from `absorb(b"a"); absorb(b"bc")`.
    pub fn absorb(&mut self, data: &[u8]) {
        self.hasher.update((data.len() as u64).to_be_bytes());
        self.hasher.update(data);
    }

    /// Produces exactly `options.size` characters drawn from `options.alphabet`.
    pub fn finish(self) -> Result<String, DeriveError> {
        if self.options.size > MAX_SIZE {
            return Err(DeriveError::SizeTooLarge(self.options.size));
        }
        let size = usize::try_from(self.options.size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or(DeriveError::InvalidSize(self.options.size))?;
        let alphabet: Vec<char> = self.options.alphabet.chars().collect();
        if alphabet.is_empty() {
            return Err(DeriveError::EmptyAlphabet);
        }
        if self.options.unique {
            let distinct = alphabet.iter().collect::<HashSet<_>>().len();
            if size > distinct {
                return Err(DeriveError::Unsatisfiable(distinct));
            }
        }

        let mut seed: [u8; 32] = self.hasher.finalize().into();
        let stream = KeyStream::new(&seed, &self.options.context());
        seed.zeroize();
        let mut stream = stream?;

        let mut output = String::new();
        let mut used = HashSet::new();
        let mut previous = None;
        let mut candidates = Vec::with_capacity(alphabet.len());
        for position in 0..size {
            candidates.clear();
            candidates.extend(
                alphabet
                    .iter()
                    .copied()
                    .filter(|c| self.options.allows(*c, previous, &used)),
            );
            if candidates.is_empty() {
                return Err(DeriveError::Unsatisfiable(position));
            }
            let picked = candidates[stream.next_index(candidates.len())?];
            output.push(picked);
            used.insert(picked);
            previous = Some(picked);
        }
        Ok(output)
    }
}

/// Convenience wrapper: absorbs the secret, then the hint.
pub fn derive(secret: &[u8], hint: &[u8], options: Options) -> Result<String, DeriveError> {
    let mut deriver = Deriver::new(options);
    deriver.absorb(secret);
    deriver.absorb(hint);
    deriver.finish()
}

/// HMAC-SHA256 in counter mode over an HKDF-derived key.
struct KeyStream {
    key: [u8; STREAM_KEY_LEN],
    counter: u64,
    block: [u8; 32],
    offset: usize,
}

impl KeyStream {
    fn new(seed: &[u8], info: &[u8]) -> Result<Self, DeriveError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), seed);
        let mut key = [0u8; STREAM_KEY_LEN];
        hk.expand(info, &mut key)
            .map_err(|e| DeriveError::KeyStream(format!("{e}")))?;
        Ok(Self {
            key,
            counter: 0,
            block: [0u8; 32],
            offset: 32,
        })
    }

    fn refill(&mut self) -> Result<(), DeriveError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| DeriveError::KeyStream(format!("{e}")))?;
        mac.update(&self.counter.to_be_bytes());
        self.block = mac.finalize().into_bytes().into();
        self.counter += 1;
        self.offset = 0;
        Ok(())
    }

    fn next_u32(&mut self) -> Result<u32, DeriveError> {
        if self.offset + 4 > self.block.len() {
            self.refill()?;
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.block[self.offset..self.offset + 4]);
        self.offset += 4;
        Ok(u32::from_be_bytes(word))
    }

    /// Uniform index in `0..bound` by rejection sampling.
    fn next_index(&mut self, bound: usize) -> Result<usize, DeriveError> {
        let bound = bound as u32;
        let limit = (u32::MAX / bound) * bound;
        loop {
            let value = self.next_u32()?;
            if value < limit {
                return Ok((value % bound) as usize);
            }
        }
    }
}

impl Drop for KeyStream {
    fn drop(&mut self) {
        self.key.zeroize();
        self.block.zeroize();
    }
}

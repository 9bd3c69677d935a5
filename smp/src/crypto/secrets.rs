//! Long-term secret generation. The random source is always passed in so
//! callers decide between the OS generator and a fixed one in tests.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// Number of random bytes behind a generated secret.
pub const SECRET_BYTES: usize = 64;

/// Draws `SECRET_BYTES` bytes from `rng` and returns them hex-encoded.
pub fn generate_secret<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rng.fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);
    bytes.zeroize();
    secret
}

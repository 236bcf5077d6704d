//! Hashing primitives.
//!
//! Every content hash in forknet is blake2b-256 with the network
//! personalization. CRC-24Q guards wire headers and the address encoding;
//! the base32 here is the symbol-free Crockford variant used by the address
//! string form.

pub use blake2b_ref::{Blake2b, Blake2bBuilder};

mod base32;
mod crc24q;

pub use base32::{base32_decode, base32_encode};
pub use crc24q::crc24q;

/// Personalization of all forknet content hashes.
pub const BLAKE2B_PERSONALIZATION: &[u8] = b"forknet-blake2b.";
/// Output length in bytes.
pub const BLAKE2B_LEN: usize = 32;

/// Creates a blake2b hasher with the forknet personalization.
pub fn new_blake2b() -> Blake2b {
    Blake2bBuilder::new(BLAKE2B_LEN)
        .personal(BLAKE2B_PERSONALIZATION)
        .build()
}

/// One-shot blake2b-256.
pub fn blake2b_256<T: AsRef<[u8]>>(data: T) -> [u8; 32] {
    let mut result = [0u8; 32];
    let mut blake2b = new_blake2b();
    blake2b.update(data.as_ref());
    blake2b.finalize(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_not_zero() {
        assert_ne!(blake2b_256([]), [0u8; 32]);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"the quick brown fox";
        let mut incremental = [0u8; 32];
        let mut blake2b = new_blake2b();
        blake2b.update(&data[..9]);
        blake2b.update(&data[9..]);
        blake2b.finalize(&mut incremental);
        assert_eq!(incremental, blake2b_256(data));
    }
}

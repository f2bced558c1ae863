//! Cryptographically secure randomness.
//!
//! All random fills in Sigil come from the OS CSPRNG, never a userspace
//! generator.

use rand::RngCore;

/// Fill `dest` with OS-CSPRNG bytes.
pub fn fill_random(dest: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(dest);
}

/// Return `len` OS-CSPRNG bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    fill_random(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_requested_length() {
        assert_eq!(random_bytes(32).len(), 32);
        assert_eq!(random_bytes(0).len(), 0);
    }

    #[test]
    fn consecutive_fills_differ() {
        let a = random_bytes(32);
        let b = random_bytes(32);
        assert_ne!(a, b);
    }
}

//! Locked, scrubbed byte buffers for secret material.
//!
//! A [`SecretBuffer`] owns its bytes exclusively. The backing pages are
//! locked against swap on Unix (`mlock`) where permissions allow; lock
//! failures degrade gracefully with a warning. Bytes are zeroed on
//! [`SecretBuffer::destroy`] and on drop, and destruction is idempotent:
//! after it the view is empty.

use std::fmt;

use zeroize::Zeroize;

/// A byte buffer holding secret material.
///
/// Ownership of a `SecretBuffer` is ownership of the obligation to
/// destroy it; passing one to a callee transfers that obligation.
pub struct SecretBuffer {
    bytes: Vec<u8>,
    locked: bool,
}

impl SecretBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    /// Allocate a buffer filled with OS-CSPRNG bytes.
    pub fn random(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        crate::rng::fill_random(&mut bytes);
        Self::from_vec(bytes)
    }

    /// Move bytes out of `src` into a new buffer, zeroing `src`.
    pub fn from_slice(src: &mut [u8]) -> Self {
        let buf = Self::from_vec(src.to_vec());
        src.zeroize();
        buf
    }

    /// Take ownership of an existing byte vector without copying.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let locked = lock_pages(&bytes);
        Self { bytes, locked }
    }

    /// Read-only view of the secret bytes. Empty after destruction.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no bytes (fresh zero-length or destroyed).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the backing pages are locked against swap. Diagnostic only.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Zero and release the secret bytes. Idempotent.
    pub fn destroy(&mut self) {
        if self.bytes.is_empty() {
            return;
        }
        self.bytes.zeroize();
        if self.locked {
            unlock_pages(&self.bytes);
            self.locked = false;
        }
        self.bytes = Vec::new();
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("len", &self.bytes.len())
            .field("locked", &self.locked)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Lock the buffer's pages against swap. Returns whether the lock took.
#[cfg(unix)]
fn lock_pages(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length come from a live allocation that
    // outlives the lock; mlock does not mutate the memory.
    let rc = unsafe { libc::mlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if rc == 0 {
        true
    } else {
        let errno = std::io::Error::last_os_error();
        tracing::warn!(len = bytes.len(), error = %errno, "mlock failed, secret may be swapped");
        false
    }
}

#[cfg(not(unix))]
fn lock_pages(_bytes: &[u8]) -> bool {
    tracing::warn!("memory locking not supported on this platform");
    false
}

#[cfg(unix)]
fn unlock_pages(bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    // SAFETY: only called on a region previously passed to mlock.
    let rc = unsafe { libc::munlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if rc != 0 {
        tracing::debug!("munlock returned non-zero (likely already unlocked)");
    }
}

#[cfg(not(unix))]
fn unlock_pages(_bytes: &[u8]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_zero_filled() {
        let buf = SecretBuffer::new(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn random_fills_bytes() {
        let buf = SecretBuffer::random(32);
        assert_eq!(buf.len(), 32);
        // 32 CSPRNG bytes are never all zero in practice.
        assert!(buf.as_slice().iter().any(|&b| b != 0));
    }

    #[test]
    fn from_slice_zeroes_source() {
        let mut src = [0xAAu8; 8];
        let buf = SecretBuffer::from_slice(&mut src);
        assert_eq!(buf.as_slice(), &[0xAA; 8]);
        assert_eq!(src, [0u8; 8]);
    }

    #[test]
    fn destroy_empties_view() {
        let mut buf = SecretBuffer::random(32);
        buf.destroy();
        assert!(buf.is_empty());
        assert!(buf.as_slice().is_empty());
        assert!(!buf.is_locked());
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut buf = SecretBuffer::random(32);
        buf.destroy();
        buf.destroy();
        assert!(buf.is_empty());
    }

    #[test]
    fn debug_redacts_contents() {
        let buf = SecretBuffer::random(8);
        let dbg = format!("{buf:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("0x"));
    }

    #[test]
    fn zero_length_buffer() {
        let mut buf = SecretBuffer::new(0);
        assert!(buf.is_empty());
        assert!(!buf.is_locked());
        buf.destroy();
    }
}

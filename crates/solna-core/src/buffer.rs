#![forbid(unsafe_code)]

//! Growable byte buffer used as the input and output of every transform.
//!
//! Growth goes through `try_reserve` so an allocation failure surfaces as
//! [`Error::Allocation`] instead of aborting the process.

use crate::{Error, Result};
use std::cmp::Ordering;

/// Owned contiguous byte storage.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Create an empty buffer without allocating.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create an empty buffer with room for at least `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Self::new();
        buf.reserve(capacity)?;
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the buffer, returning its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Move all bytes out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Ensure room for `additional` more bytes.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.data.try_reserve(additional).map_err(|e| {
            Error::Allocation(format!(
                "buffer of {} bytes cannot grow by {additional}: {e}",
                self.data.len()
            ))
        })
    }

    /// Append bytes at the tail.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Insert bytes at the head.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.reserve(bytes.len())?;
        self.data.splice(0..0, bytes.iter().copied());
        Ok(())
    }

    /// Drop the first `n` bytes. The capacity is left untouched.
    pub fn remove_head(&mut self, n: usize) -> Result<()> {
        if n > self.data.len() {
            return Err(Error::SizeMismatch(format!(
                "cannot remove {n} bytes from a buffer of {}",
                self.data.len()
            )));
        }
        self.data.drain(..n);
        Ok(())
    }

    /// Drop the last `n` bytes.
    pub fn remove_tail(&mut self, n: usize) -> Result<()> {
        if n > self.data.len() {
            return Err(Error::SizeMismatch(format!(
                "cannot remove {n} bytes from a buffer of {}",
                self.data.len()
            )));
        }
        self.data.truncate(self.data.len() - n);
        Ok(())
    }

    /// Keep only the first `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Reverse the contents in place.
    pub fn reverse(&mut self) {
        self.data.reverse();
    }

    /// Lexicographic three-way comparison against `other`.
    ///
    /// A proper prefix orders before the longer sequence.
    pub fn compare(&self, other: &[u8]) -> Ordering {
        self.data.as_slice().cmp(other)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer({} bytes)", self.data.len())
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_append_prepend() {
        let mut buf = Buffer::new();
        buf.append(b"world").unwrap();
        buf.prepend(b"hello ").unwrap();
        assert_eq!(buf.as_slice(), b"hello world");
        assert!(buf.len() <= buf.capacity());
    }

    #[test]
    fn test_remove_head_keeps_capacity() {
        let mut buf = Buffer::with_capacity(64).unwrap();
        buf.append(b"0123456789").unwrap();
        let cap = buf.capacity();
        buf.remove_head(4).unwrap();
        assert_eq!(buf.as_slice(), b"456789");
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_remove_too_much() {
        let mut buf = Buffer::from(&b"abc"[..]);
        assert!(matches!(buf.remove_head(4), Err(Error::SizeMismatch(_))));
        assert!(matches!(buf.remove_tail(4), Err(Error::SizeMismatch(_))));
        buf.remove_tail(1).unwrap();
        assert_eq!(buf.as_slice(), b"ab");
    }

    #[test]
    fn test_reverse() {
        let mut buf = Buffer::from(b"abcd".to_vec());
        buf.reverse();
        assert_eq!(buf.as_slice(), b"dcba");
    }

    #[test]
    fn test_compare_is_three_way() {
        let buf = Buffer::from(b"abc".to_vec());
        assert_eq!(buf.compare(b"abc"), Ordering::Equal);
        assert_eq!(buf.compare(b"abd"), Ordering::Less);
        assert_eq!(buf.compare(b"abb"), Ordering::Greater);
        assert_eq!(buf.compare(b"ab"), Ordering::Greater);
        assert_eq!(buf.compare(b"abcd"), Ordering::Less);
        assert_eq!(Buffer::new().compare(b""), Ordering::Equal);
    }

    proptest! {
        #[test]
        fn compare_is_antisymmetric(a in proptest::collection::vec(any::<u8>(), 0..32),
                                    b in proptest::collection::vec(any::<u8>(), 0..32)) {
            let ab = Buffer::from(a.clone()).compare(&b);
            let ba = Buffer::from(b.clone()).compare(&a);
            prop_assert_eq!(ab, ba.reverse());
            prop_assert_eq!(ab == Ordering::Equal, a == b);
        }

        #[test]
        fn double_reverse_is_identity(a in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut buf = Buffer::from(a.clone());
            buf.reverse();
            buf.reverse();
            prop_assert_eq!(buf.into_vec(), a);
        }
    }
}

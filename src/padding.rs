use crate::error::Error;
use crate::random::is_valid_bound;

const FILLER: u8 = b'A';

/// Immutable filler bytes sliced into per-response padding.
///
/// Only the length matters; the content is a run of `A`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padding {
    filler: Box<[u8]>,
}

impl Padding {
    /// Builds a padding buffer of exactly `size` bytes.
    ///
    /// `size` must be a power of two no larger than 65536. The built buffer
    /// is checked against `size` and any mismatch is reported as an error,
    /// which callers should treat as fatal at startup.
    pub fn new(size: usize) -> Result<Self, Error> {
        if !is_valid_bound(size) {
            return Err(Error::InvalidPaddingSize(size));
        }

        let filler = vec![FILLER; size].into_boxed_slice();
        if filler.len() != size {
            return Err(Error::PaddingMismatch {
                expected: size,
                actual: filler.len(),
            });
        }

        Ok(Self { filler })
    }

    /// Returns the full padding size.
    pub fn len(&self) -> usize {
        self.filler.len()
    }

    /// Always false; a padding buffer holds at least one byte.
    pub fn is_empty(&self) -> bool {
        self.filler.is_empty()
    }

    /// Returns the first `len` bytes, clamped to the buffer size.
    pub fn prefix(&self, len: usize) -> &[u8] {
        &self.filler[..len.min(self.filler.len())]
    }
}

use crate::error::Error;
use std::fmt;
use std::sync::Arc;

/// Largest bound a 16-bit draw can cover without bias.
pub const MAX_BOUND: usize = 1 << 16;

/// A source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync + 'static {
    /// Fills `dest` entirely with random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<(), getrandom::Error>;
}

/// The operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), getrandom::Error> {
        getrandom::getrandom(dest)
    }
}

/// Picks unbiased integers in `[1, bound]`.
///
/// `bound` is a power of two no larger than 65536, so reducing a uniform
/// 16-bit value modulo `bound` keeps the result uniform.
#[derive(Clone)]
pub struct RandomSelector {
    bound: u32,
    source: Arc<dyn EntropySource>,
}

impl RandomSelector {
    /// Creates a selector backed by [`OsEntropy`].
    pub fn new(bound: usize) -> Result<Self, Error> {
        Self::with_source(bound, Arc::new(OsEntropy))
    }

    /// Creates a selector drawing from the given source.
    pub fn with_source(bound: usize, source: Arc<dyn EntropySource>) -> Result<Self, Error> {
        if !is_valid_bound(bound) {
            return Err(Error::InvalidPaddingSize(bound));
        }

        Ok(Self {
            bound: bound as u32,
            source,
        })
    }

    /// Returns the inclusive upper bound.
    pub fn bound(&self) -> usize {
        self.bound as usize
    }

    /// Draws a value in `[1, bound]`.
    ///
    /// Fails if the entropy source fails. There is no fallback: a
    /// predictable value would make the padding useless.
    pub fn sample(&self) -> Result<usize, Error> {
        let mut scratch = [0u8; 2];
        self.source.fill(&mut scratch)?;

        let n = u32::from(u16::from_be_bytes(scratch));
        Ok((n % self.bound + 1) as usize)
    }
}

impl fmt::Debug for RandomSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSelector")
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

pub(crate) fn is_valid_bound(bound: usize) -> bool {
    bound.is_power_of_two() && bound <= MAX_BOUND
}

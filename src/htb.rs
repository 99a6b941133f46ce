use crate::error::Error;
use crate::padding::Padding;
use crate::pool::{EncoderPool, PooledEncoder};
use crate::random::{EntropySource, OsEntropy, RandomSelector};
use flate2::Compression;
use std::sync::Arc;

/// Default upper bound for the padding length, in bytes.
pub const DEFAULT_PADDING_SIZE: usize = 32;

/// Default deflate level.
pub const DEFAULT_LEVEL: u32 = 6;

/// Process-wide Heal-the-BREACH state: the padding buffer, the length
/// selector and the encoder pool.
///
/// Build one at startup and share it between layers through an `Arc`.
#[derive(Debug)]
pub struct Htb {
    padding: Padding,
    random: RandomSelector,
    pool: Arc<EncoderPool>,
}

impl Htb {
    /// Returns a builder with the default settings.
    pub fn builder() -> HtbBuilder {
        HtbBuilder::default()
    }

    /// Returns the padding buffer.
    pub fn padding(&self) -> &Padding {
        &self.padding
    }

    /// Returns the encoder pool.
    pub fn pool(&self) -> &Arc<EncoderPool> {
        &self.pool
    }

    /// Checks out an encoder and starts a member padded to a random length.
    ///
    /// On failure the encoder goes straight back to the pool.
    pub fn checkout(&self) -> Result<PooledEncoder, Error> {
        let mut encoder = self.pool.acquire();
        let len = self.random.sample()?;
        encoder.reset(self.padding.prefix(len))?;
        Ok(encoder)
    }
}

/// Builder for [`Htb`].
pub struct HtbBuilder {
    padding_size: usize,
    level: u32,
    max_idle: Option<usize>,
    entropy: Arc<dyn EntropySource>,
}

impl HtbBuilder {
    /// Sets the largest padding length. Must be a power of two up to 65536.
    pub fn padding_size(mut self, size: usize) -> Self {
        self.padding_size = size;
        self
    }

    /// Sets the deflate level, clamped to `0..=9`.
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Caps the number of idle encoders kept by the pool.
    pub fn max_idle(mut self, max: usize) -> Self {
        self.max_idle = Some(max);
        self
    }

    /// Replaces the entropy source used to pick padding lengths.
    pub fn entropy<E: EntropySource>(mut self, source: E) -> Self {
        self.entropy = Arc::new(source);
        self
    }

    /// Validates the settings and builds the state.
    pub fn build(self) -> Result<Htb, Error> {
        let padding = Padding::new(self.padding_size)?;
        let random = RandomSelector::with_source(padding.len(), self.entropy)?;

        let mut pool = EncoderPool::new(Compression::new(self.level));
        if let Some(max) = self.max_idle {
            pool = pool.max_idle(max);
        }

        Ok(Htb {
            padding,
            random,
            pool: Arc::new(pool),
        })
    }
}

impl Default for HtbBuilder {
    fn default() -> Self {
        Self {
            padding_size: DEFAULT_PADDING_SIZE,
            level: DEFAULT_LEVEL,
            max_idle: None,
            entropy: Arc::new(OsEntropy),
        }
    }
}

use crate::encoder::GzipEncoder;
use flate2::Compression;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// A pool of reusable gzip encoders shared across requests.
///
/// The pool grows on demand. With [`max_idle`](Self::max_idle) set, encoders
/// released while the idle set is full are dropped instead of kept.
pub struct EncoderPool {
    idle: Mutex<Vec<GzipEncoder>>,
    level: Compression,
    max_idle: Option<usize>,
}

impl EncoderPool {
    /// Creates an empty pool whose encoders use `level`.
    pub fn new(level: Compression) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            level,
            max_idle: None,
        }
    }

    /// Caps the number of idle encoders kept for reuse.
    pub fn max_idle(mut self, max: usize) -> Self {
        self.max_idle = Some(max);
        self
    }

    /// Checks out an idle encoder, or builds one if none is idle.
    ///
    /// The encoder's state is whatever its last user left behind; call
    /// [`GzipEncoder::reset`] before writing to it.
    pub fn acquire(self: &Arc<Self>) -> PooledEncoder {
        let idle = self.lock().pop();
        let encoder = idle.unwrap_or_else(|| {
            trace!("no idle gzip encoder, allocating a new one");
            GzipEncoder::new(self.level)
        });

        PooledEncoder {
            encoder: Some(encoder),
            pool: Arc::clone(self),
        }
    }

    /// Returns an encoder to the idle set.
    pub fn release(&self, encoder: GzipEncoder) {
        let mut idle = self.lock();
        if self.max_idle.is_some_and(|max| idle.len() >= max) {
            trace!(idle = idle.len(), "idle set full, dropping gzip encoder");
            return;
        }
        idle.push(encoder);
    }

    /// Returns the number of idle encoders.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GzipEncoder>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EncoderPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderPool")
            .field("idle", &self.idle())
            .field("level", &self.level.level())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// An encoder checked out of an [`EncoderPool`].
///
/// Dropping the guard returns the encoder to its pool.
pub struct PooledEncoder {
    encoder: Option<GzipEncoder>,
    pool: Arc<EncoderPool>,
}

impl Deref for PooledEncoder {
    type Target = GzipEncoder;

    fn deref(&self) -> &GzipEncoder {
        self.encoder.as_ref().expect("encoder is present until drop")
    }
}

impl DerefMut for PooledEncoder {
    fn deref_mut(&mut self) -> &mut GzipEncoder {
        self.encoder.as_mut().expect("encoder is present until drop")
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            if !encoder.is_finished() {
                trace!("gzip encoder released before the stream was finished");
            }
            self.pool.release(encoder);
        }
    }
}

impl fmt::Debug for PooledEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledEncoder").field(&self.encoder).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    fn pool() -> Arc<EncoderPool> {
        Arc::new(EncoderPool::new(Compression::default()))
    }

    #[test]
    fn test_acquire_from_empty_pool() {
        let pool = pool();
        assert_eq!(pool.idle(), 0);

        let encoder = pool.acquire();
        assert_eq!(pool.idle(), 0);
        drop(encoder);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_reuses_idle_encoder() {
        let pool = pool();
        drop(pool.acquire());
        drop(pool.acquire());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_grows_under_overlap() {
        let pool = pool();
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop((a, b, c));
        assert_eq!(pool.idle(), 3);
    }

    #[test]
    fn test_max_idle_drops_surplus() {
        let pool = Arc::new(EncoderPool::new(Compression::default()).max_idle(1));
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_guard_derefs_to_encoder() {
        let pool = pool();
        let mut encoder = pool.acquire();
        encoder.reset(b"AA").unwrap();
        encoder.write_all(b"payload").unwrap();
        encoder.finish().unwrap();
        assert!(encoder.is_finished());
        assert!(!encoder.take().is_empty());
    }

    #[test]
    fn test_released_on_unwind() {
        let pool = pool();
        let cloned = Arc::clone(&pool);
        let result = thread::spawn(move || {
            let _encoder = cloned.acquire();
            panic!("handler failed");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_concurrent_checkout() {
        let pool = pool();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let mut encoder = pool.acquire();
                        encoder.reset(b"A").unwrap();
                        encoder.write_all(b"x").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let idle = pool.idle();
        assert!((1..=16).contains(&idle), "unexpected idle count {idle}");
    }
}

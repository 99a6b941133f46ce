use crate::htb::Htb;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that gzip-compresses HTTP response bodies with
/// Heal-the-BREACH padding.
///
/// Every service produced by the layer shares the same [`Htb`] state.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    htb: Arc<Htb>,
}

impl CompressionLayer {
    /// Creates a layer with its own default state.
    ///
    /// The default padding size is 32 bytes.
    pub fn new() -> Self {
        let htb = Htb::builder()
            .build()
            .expect("default padding size is a valid power of two");
        Self::from_htb(Arc::new(htb))
    }

    /// Creates a layer over shared, already-validated state.
    pub fn from_htb(htb: Arc<Htb>) -> Self {
        Self { htb }
    }

    /// Returns the shared state.
    pub fn htb(&self) -> &Arc<Htb> {
        &self.htb
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::clone(&self.htb))
    }
}

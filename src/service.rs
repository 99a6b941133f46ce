use crate::body::CompressionBody;
use crate::future::ResponseFuture;
use crate::htb::Htb;
use http::{HeaderMap, Request, header};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::error;

const GZIP: &[u8] = b"gzip";

/// A Tower service that gzip-compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    htb: Arc<Htb>,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S, htb: Arc<Htb>) -> Self {
        Self { inner, htb }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
{
    type Response = http::Response<CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if !accepts_gzip(req.headers()) {
            return ResponseFuture::passthrough(self.inner.call(req));
        }

        match self.htb.checkout() {
            Ok(encoder) => ResponseFuture::compressed(self.inner.call(req), encoder),
            Err(e) => {
                error!(error = %e, "cannot pad compressed response, aborting request");
                ResponseFuture::aborted()
            }
        }
    }
}

/// Reports whether the first Accept-Encoding value mentions gzip.
///
/// This is a plain substring match: `q=0` is not honoured and any token
/// that happens to contain `gzip` counts.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .is_some_and(|v| v.as_bytes().windows(GZIP.len()).any(|w| w == GZIP))
}

//! Gzip response compression middleware for Tower with Heal-the-BREACH padding.
//!
//! This crate provides a Tower layer that gzip-compresses HTTP response
//! bodies when the client's `Accept-Encoding` header mentions `gzip`. Every
//! compressed response carries a random-length filler in the gzip header's
//! name field, so the compressed length stops leaking information about
//! secrets reflected in the body (the BREACH attack).
//!
//! # Example
//!
//! ```ignore
//! use http_response_htb::{CompressionLayer, Htb};
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! let htb = Arc::new(Htb::builder().padding_size(32).build()?);
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::from_htb(htb))
//!     .service(my_service);
//! ```
//!
//! # Negotiation
//!
//! Compression applies when the first `Accept-Encoding` value contains the
//! substring `gzip`. No other negotiation is done and content types are not
//! inspected.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to `gzip`
//! - `Content-Length` header is removed (compressed size is unknown)
//! - the gzip header name field holds between 1 and the padding size bytes
//!
//! The body is sync-flushed after each chunk when `X-Accel-Buffering: no`
//! is present or the `Content-Type` is `text/event-stream` or
//! `application/grpc-web`.
//!
//! # Failures
//!
//! If the secure random source fails, the inner service is not called and
//! the response is an empty `500 Internal Server Error`. Errors from the
//! inner service are returned unchanged.

#![deny(missing_docs)]

mod body;
mod encoder;
mod error;
mod future;
mod htb;
mod layer;
mod padding;
mod pool;
mod random;
mod service;

pub use body::CompressionBody;
pub use encoder::GzipEncoder;
pub use error::Error;
pub use future::ResponseFuture;
pub use htb::{DEFAULT_LEVEL, DEFAULT_PADDING_SIZE, Htb, HtbBuilder};
pub use layer::CompressionLayer;
pub use padding::Padding;
pub use pool::{EncoderPool, PooledEncoder};
pub use random::{EntropySource, MAX_BOUND, OsEntropy, RandomSelector};
pub use service::CompressionService;

use crate::body::CompressionBody;
use crate::pool::PooledEncoder;
use http::{Response, StatusCode, header};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Option<F>,
        encoder: Option<PooledEncoder>,
    }
}

impl<F> ResponseFuture<F> {
    /// Response left untouched.
    pub(crate) fn passthrough(inner: F) -> Self {
        Self {
            inner: Some(inner),
            encoder: None,
        }
    }

    /// Response compressed through `encoder`, already reset for this request.
    pub(crate) fn compressed(inner: F, encoder: PooledEncoder) -> Self {
        Self {
            inner: Some(inner),
            encoder: Some(encoder),
        }
    }

    /// Request aborted before the inner service was called.
    pub(crate) fn aborted() -> Self {
        Self {
            inner: None,
            encoder: None,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let Some(inner) = this.inner.as_pin_mut() else {
            let mut response = Response::new(CompressionBody::Aborted);
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return Poll::Ready(Ok(response));
        };

        match inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                // Hand the encoder back before surfacing the inner error
                this.encoder.take();
                Poll::Ready(Err(e))
            }
            Poll::Ready(Ok(response)) => {
                let response = wrap_response(response, this.encoder.take());
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Wraps the response body with compression when an encoder was checked out.
fn wrap_response<B>(
    response: Response<B>,
    encoder: Option<PooledEncoder>,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    let body = if let Some(encoder) = encoder {
        // Check for x-accel-buffering: no header or streaming content types
        let always_flush = parts
            .headers
            .get("x-accel-buffering")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("no"))
            || is_streaming_content_type(&parts.headers);

        parts.headers.insert(
            header::CONTENT_ENCODING,
            header::HeaderValue::from_static("gzip"),
        );

        // The compressed length differs from anything the handler computed
        parts.headers.remove(header::CONTENT_LENGTH);

        debug!(status = %parts.status, always_flush, "compressing response");
        CompressionBody::compressed(body, encoder, always_flush)
    } else {
        CompressionBody::passthrough(body)
    };

    Response::from_parts(parts, body)
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        })
}

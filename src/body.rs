use crate::pool::PooledEncoder;
use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be gzip-compressed.
    ///
    /// This type wraps an inner body and either writes it through a pooled
    /// gzip encoder or passes it through unchanged.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Compressed body with a checked-out encoder.
        Compressed {
            #[pin]
            inner: B,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
        /// Empty body of a request aborted before the inner service ran.
        Aborted,
    }
}

/// State for an actively compressed body.
pub(crate) struct CompressedBody {
    encoder: Option<PooledEncoder>,
    always_flush: bool,
    state: CompressState,
    pending_trailers: Option<http::HeaderMap>,
}

/// State machine for compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading data from inner body and compressing.
    Reading,
    /// Finishing compression after inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Compression is complete.
    Done,
}

impl CompressedBody {
    fn new(encoder: PooledEncoder, always_flush: bool) -> Self {
        Self {
            encoder: Some(encoder),
            always_flush,
            state: CompressState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current compression state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Returns whether always flush is enabled.
    #[allow(dead_code)]
    pub(crate) fn always_flush(&self) -> bool {
        self.always_flush
    }

    /// Returns whether the encoder is still checked out.
    #[cfg(test)]
    pub(crate) fn holds_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    let trailers = self.pending_trailers.take();
                    return Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))));
                }

                CompressState::Finishing => {
                    let Some(mut encoder) = self.encoder.take() else {
                        self.state = CompressState::Done;
                        continue;
                    };

                    if let Err(e) = encoder.finish() {
                        self.state = CompressState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    let data = encoder.take();
                    // Output is complete; hand the encoder back now
                    drop(encoder);

                    self.state = if self.pending_trailers.is_some() {
                        CompressState::Trailers
                    } else {
                        CompressState::Done
                    };
                    if !data.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                }

                CompressState::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        self.state = CompressState::Finishing;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(data) => match self.compress_chunk(data) {
                            Ok(output) if !output.is_empty() => {
                                return Poll::Ready(Some(Ok(Frame::data(output))));
                            }
                            // Encoder buffered everything; keep reading
                            Ok(_) => {}
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        },
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.pending_trailers = Some(trailers);
                                self.state = CompressState::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }

    /// Writes a chunk into the encoder and drains whatever it produced.
    fn compress_chunk<D: Buf>(&mut self, mut data: D) -> Result<Bytes, io::Error> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(io::Error::other("gzip encoder already released"));
        };

        while data.has_remaining() {
            let chunk = data.chunk();
            let len = chunk.len();
            encoder.write_all(chunk)?;
            data.advance(len);
        }

        if self.always_flush {
            encoder.flush()?;
        }

        Ok(encoder.take())
    }
}

impl<B> CompressionBody<B> {
    /// Creates a body compressed through the given encoder.
    ///
    /// The encoder must already be reset for this response.
    pub fn compressed(inner: B, encoder: PooledEncoder, always_flush: bool) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(encoder, always_flush),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
            CompressionBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
            CompressionBodyProj::Aborted => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Compressed { state, .. } => state.state() == CompressState::Done,
            CompressionBody::Aborted => true,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            // Compressed size is unknown
            CompressionBody::Compressed { .. } => http_body::SizeHint::default(),
            CompressionBody::Aborted => http_body::SizeHint::with_exact(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::EncoderPool;
    use flate2::Compression;
    use flate2::read::GzDecoder;
    use http::HeaderMap;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::Arc;

    /// A test body that yields predefined frames.
    struct TestBody {
        frames: VecDeque<Frame<Bytes>>,
    }

    impl TestBody {
        fn new(frames: Vec<Frame<Bytes>>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl Body for TestBody {
        type Data = Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            match self.frames.pop_front() {
                Some(frame) => Poll::Ready(Some(Ok(frame))),
                None => Poll::Ready(None),
            }
        }
    }

    fn poll_body<B: Body + Unpin>(body: &mut B) -> Option<Result<Frame<B::Data>, B::Error>> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        match Pin::new(body).poll_frame(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => None,
        }
    }

    fn checkout(pool: &Arc<EncoderPool>, name: &[u8]) -> PooledEncoder {
        let mut encoder = pool.acquire();
        encoder.reset(name).unwrap();
        encoder
    }

    /// Drains a body, returning the concatenated data and any trailers.
    fn drain<B: Body<Data = Bytes> + Unpin>(body: &mut B) -> (Vec<u8>, Option<HeaderMap>)
    where
        B::Error: std::fmt::Debug,
    {
        let mut data = Vec::new();
        let mut trailers = None;
        while let Some(frame) = poll_body(body) {
            let frame = frame.unwrap();
            if frame.is_data() {
                data.extend_from_slice(&frame.into_data().unwrap());
            } else if let Ok(t) = frame.into_trailers() {
                trailers = Some(t);
            }
        }
        (data, trailers)
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_passthrough_data() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from("hello world"))]);
        let mut body = CompressionBody::passthrough(inner);

        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_data());
        assert_eq!(frame.into_data().unwrap(), Bytes::from("hello world"));

        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_passthrough_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("data")),
            Frame::trailers(trailers.clone()),
        ]);
        let mut body = CompressionBody::passthrough(inner);

        let (data, received) = drain(&mut body);
        assert_eq!(data, b"data");
        assert_eq!(received.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_compressed_round_trip() {
        let pool = Arc::new(EncoderPool::new(Compression::default()));
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("hello ")),
            Frame::data(Bytes::from("world")),
        ]);
        let mut body = CompressionBody::compressed(inner, checkout(&pool, b"AAA"), false);

        let (data, trailers) = drain(&mut body);
        assert_eq!(&data[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&data), b"hello world");
        assert!(trailers.is_none());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_compressed_empty_body() {
        let pool = Arc::new(EncoderPool::new(Compression::default()));
        let inner = TestBody::new(vec![]);
        let mut body = CompressionBody::compressed(inner, checkout(&pool, b"A"), false);

        let (data, _) = drain(&mut body);
        assert!(gunzip(&data).is_empty());
    }

    #[test]
    fn test_compressed_with_trailers() {
        let pool = Arc::new(EncoderPool::new(Compression::default()));
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("hello world")),
            Frame::trailers(trailers),
        ]);
        let mut body = CompressionBody::compressed(inner, checkout(&pool, b"AA"), false);

        let (data, received) = drain(&mut body);
        assert_eq!(gunzip(&data), b"hello world");
        assert_eq!(received.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_encoder_released_at_end_of_stream() {
        let pool = Arc::new(EncoderPool::new(Compression::default()));
        let inner = TestBody::new(vec![Frame::data(Bytes::from("payload"))]);
        let mut body = CompressionBody::compressed(inner, checkout(&pool, b"A"), false);

        drain(&mut body);
        assert_eq!(pool.idle(), 1);
        match &body {
            CompressionBody::Compressed { state, .. } => assert!(!state.holds_encoder()),
            _ => panic!("Expected compressed body"),
        }
    }

    #[test]
    fn test_encoder_released_when_dropped_early() {
        let pool = Arc::new(EncoderPool::new(Compression::default()));
        let inner = TestBody::new(vec![Frame::data(Bytes::from("payload"))]);
        let body = CompressionBody::compressed(inner, checkout(&pool, b"A"), false);

        assert_eq!(pool.idle(), 0);
        drop(body);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_always_flush_emits_each_chunk() {
        let pool = Arc::new(EncoderPool::new(Compression::default()));
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("event: one\n\n")),
            Frame::data(Bytes::from("event: two\n\n")),
        ]);
        let mut body = CompressionBody::compressed(inner, checkout(&pool, b"A"), true);

        let first = poll_body(&mut body).unwrap().unwrap().into_data().unwrap();
        let mut decoder = GzDecoder::new(&first[..]);
        let mut buf = [0u8; 64];
        let n = decoder.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"event: one\n\n");

        let mut data = first.to_vec();
        data.extend(drain(&mut body).0);
        assert_eq!(gunzip(&data), b"event: one\n\nevent: two\n\n");
    }

    #[test]
    fn test_aborted_is_empty() {
        let mut body = CompressionBody::<TestBody>::Aborted;
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(poll_body(&mut body).is_none());
    }
}

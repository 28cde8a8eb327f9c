use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{BoxError, Error};
use crate::pool::PooledCompressor;

/// A response body that may be compressed.
///
/// Produced by the response future once the encoding decision has been
/// committed: either the body streams through a pooled compressor, or it
/// passes through untouched, or it was small enough to be replayed from an
/// in-memory buffer.
pub struct CompressionBody<B> {
    inner: Inner<B>,
}

enum Inner<B> {
    /// Frames stream through untouched.
    Passthrough { body: Pin<Box<B>> },
    /// The whole body was consumed while the decision was pending; replay it
    /// from memory.
    Buffered {
        data: Option<Bytes>,
        trailers: Option<HeaderMap>,
    },
    /// Remaining frames stream through a pooled compressor. The buffered
    /// prefix has already been written; its output is pending in the codec
    /// sink.
    Compressed {
        body: Pin<Box<B>>,
        state: CompressedState,
    },
    /// Commit failed; the error is yielded on first poll.
    Failed { error: Option<Error> },
}

struct CompressedState {
    compressor: PooledCompressor,
    phase: Phase,
    pending_trailers: Option<HeaderMap>,
}

#[derive(PartialEq, Eq)]
enum Phase {
    /// Reading data from the inner body and compressing.
    Reading,
    /// Stream trailer emitted; buffered trailers remain.
    Trailers,
    /// Compression is complete.
    Done,
}

impl<B> CompressionBody<B> {
    pub(crate) fn passthrough(body: B) -> Self {
        Self {
            inner: Inner::Passthrough {
                body: Box::pin(body),
            },
        }
    }

    pub(crate) fn buffered(data: Bytes, trailers: Option<HeaderMap>) -> Self {
        Self {
            inner: Inner::Buffered {
                data: if data.is_empty() { None } else { Some(data) },
                trailers,
            },
        }
    }

    pub(crate) fn compressed(
        body: Pin<Box<B>>,
        compressor: PooledCompressor,
        pending_trailers: Option<HeaderMap>,
    ) -> Self {
        Self {
            inner: Inner::Compressed {
                body,
                state: CompressedState {
                    compressor,
                    phase: Phase::Reading,
                    pending_trailers,
                },
            },
        }
    }

    pub(crate) fn failed(error: Error) -> Self {
        Self {
            inner: Inner::Failed { error: Some(error) },
        }
    }

    #[cfg(test)]
    pub(crate) fn is_compressed(&self) -> bool {
        matches!(self.inner, Inner::Compressed { .. })
    }

    #[cfg(test)]
    pub(crate) fn is_passthrough(&self) -> bool {
        matches!(
            self.inner,
            Inner::Passthrough { .. } | Inner::Buffered { .. }
        )
    }
}

impl CompressedState {
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        body: &mut Pin<Box<B>>,
    ) -> Poll<Option<Result<Frame<Bytes>, Error>>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(None),

                Phase::Trailers => {
                    self.phase = Phase::Done;
                    match self.pending_trailers.take() {
                        Some(trailers) => {
                            return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                        }
                        None => return Poll::Ready(None),
                    }
                }

                Phase::Reading => {
                    // Output from the buffered prefix, or from a previous
                    // write, goes out before the inner body is polled again.
                    let pending = self.compressor.take_output();
                    if !pending.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(pending))));
                    }

                    match body.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            let bytes_in = self.compressor.bytes_written();
                            let trailer = match self.compressor.close() {
                                Ok(trailer) => trailer,
                                Err(e) => {
                                    self.phase = Phase::Done;
                                    return Poll::Ready(Some(Err(e)));
                                }
                            };
                            self.phase = Phase::Trailers;
                            tracing::debug!(bytes_in, "compressed body closed");
                            if !trailer.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(trailer))));
                            }
                        }
                        Poll::Ready(Some(Err(e))) => {
                            self.phase = Phase::Done;
                            return Poll::Ready(Some(Err(Error::body(e))));
                        }
                        Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                            Ok(data) => {
                                let input = copy_to_bytes(data);
                                if let Err(e) = self.compressor.write(&input) {
                                    self.phase = Phase::Done;
                                    return Poll::Ready(Some(Err(e)));
                                }
                            }
                            Err(frame) => {
                                // Trailers go out after the stream trailer.
                                if let Ok(trailers) = frame.into_trailers() {
                                    self.pending_trailers = Some(trailers);
                                }
                            }
                        },
                    }
                }
            }
        }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Inner::Passthrough { body } => match body.as_mut().poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    Poll::Ready(Some(Ok(frame.map_data(copy_to_bytes))))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(Error::body(e)))),
            },
            Inner::Buffered { data, trailers } => {
                if let Some(data) = data.take() {
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                match trailers.take() {
                    Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                    None => Poll::Ready(None),
                }
            }
            Inner::Compressed { body, state } => state.poll_compressed(cx, body),
            Inner::Failed { error } => match error.take() {
                Some(e) => Poll::Ready(Some(Err(e))),
                None => Poll::Ready(None),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Inner::Passthrough { body } => body.is_end_stream(),
            Inner::Buffered { data, trailers } => data.is_none() && trailers.is_none(),
            Inner::Compressed { state, .. } => state.phase == Phase::Done,
            Inner::Failed { error } => error.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Inner::Passthrough { body } => body.size_hint(),
            Inner::Buffered { data, .. } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            // Compressed size is unknown.
            Inner::Compressed { .. } => SizeHint::default(),
            Inner::Failed { .. } => SizeHint::default(),
        }
    }
}

/// Flattens an arbitrary `Buf` into contiguous bytes, draining every chunk.
pub(crate) fn copy_to_bytes<D: Buf>(mut data: D) -> Bytes {
    if data.chunk().len() == data.remaining() {
        return data.copy_to_bytes(data.remaining());
    }
    let mut bytes = BytesMut::with_capacity(data.remaining());
    while data.has_remaining() {
        let chunk = data.chunk();
        bytes.extend_from_slice(chunk);
        let len = chunk.len();
        data.advance(len);
    }
    bytes.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::registry::Registry;
    use crate::test_util::{TestBody, collect_body, gzip_decompress, poll_collect_error};

    #[test]
    fn test_passthrough_data_and_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());
        let inner = TestBody::data(&[b"hello ", b"world"]).with_trailers(trailers);
        let mut body = CompressionBody::passthrough(inner);

        let (data, received) = collect_body(&mut body);
        assert_eq!(data, b"hello world".as_slice());
        assert_eq!(received.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_buffered_replays_data_then_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());
        let mut body: CompressionBody<TestBody> =
            CompressionBody::buffered(Bytes::from_static(b"replayed"), Some(trailers));

        assert!(!body.is_end_stream());
        let (data, received) = collect_body(&mut body);
        assert_eq!(data, b"replayed".as_slice());
        assert!(received.is_some());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_buffered_exact_size_hint() {
        let body: CompressionBody<TestBody> =
            CompressionBody::buffered(Bytes::from_static(b"12345"), None);
        assert_eq!(body.size_hint().exact(), Some(5));
    }

    #[test]
    fn test_compressed_round_trip() {
        let registry = Registry::default();
        let plain = b"hello world, compressed in flight".repeat(20);
        let chunks: Vec<&[u8]> = plain.chunks(17).collect();
        let compressor = registry.acquire_compressor(Codec::Gzip).unwrap();
        let mut body =
            CompressionBody::compressed(Box::pin(TestBody::data(&chunks)), compressor, None);

        let (compressed, _) = collect_body(&mut body);
        assert_eq!(gzip_decompress(&compressed), plain);
    }

    #[test]
    fn test_compressed_prefix_written_before_commit() {
        // The buffered prefix is written by the caller; the body only drains
        // its output and continues with the remaining frames.
        let registry = Registry::default();
        let mut compressor = registry.acquire_compressor(Codec::Gzip).unwrap();
        compressor.write(b"prefix bytes that were buffered, ").unwrap();
        let mut body = CompressionBody::compressed(
            Box::pin(TestBody::data(&[b"and the tail"])),
            compressor,
            None,
        );

        let (compressed, _) = collect_body(&mut body);
        assert_eq!(
            gzip_decompress(&compressed),
            b"prefix bytes that were buffered, and the tail"
        );
    }

    #[test]
    fn test_compressed_emits_trailers_after_stream_trailer() {
        let registry = Registry::default();
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());
        let compressor = registry.acquire_compressor(Codec::Gzip).unwrap();
        let mut body = CompressionBody::compressed(
            Box::pin(TestBody::data(&[b"payload"]).with_trailers(trailers)),
            compressor,
            None,
        );

        let (compressed, received) = collect_body(&mut body);
        assert_eq!(gzip_decompress(&compressed), b"payload");
        assert_eq!(received.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_inner_error_propagates() {
        let registry = Registry::default();
        let compressor = registry.acquire_compressor(Codec::Gzip).unwrap();
        let mut body = CompressionBody::compressed(
            Box::pin(TestBody::data(&[b"some"]).with_error("connection reset")),
            compressor,
            None,
        );

        let err = poll_collect_error(&mut body);
        assert!(matches!(err, Error::Body(_)));
    }

    #[test]
    fn test_failed_yields_error_once() {
        let mut body: CompressionBody<TestBody> =
            CompressionBody::failed(Error::Closed("close of an already-closed compressor"));
        let err = poll_collect_error(&mut body);
        assert!(err.is_contract_violation());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_copy_to_bytes_drains_chained_buf() {
        let chained = Bytes::from_static(b"front ").chain(Bytes::from_static(b"back"));
        assert_eq!(copy_to_bytes(chained), Bytes::from_static(b"front back"));
    }
}

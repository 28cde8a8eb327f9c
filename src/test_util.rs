//! Shared helpers for the crate's tests: a scriptable body, synchronous
//! polling, and reference codec round-trips.

use std::collections::VecDeque;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame};

use crate::error::BoxError;

/// In-memory body that yields a scripted sequence of frames.
pub(crate) struct TestBody {
    frames: VecDeque<Result<Frame<Bytes>, BoxError>>,
}

impl TestBody {
    /// A body made of the given data chunks, one frame per chunk.
    pub(crate) fn data(chunks: &[&[u8]]) -> Self {
        Self {
            frames: chunks
                .iter()
                .map(|chunk| Ok(Frame::data(Bytes::copy_from_slice(chunk))))
                .collect(),
        }
    }

    /// Appends a trailers frame after the data.
    pub(crate) fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.frames.push_back(Ok(Frame::trailers(trailers)));
        self
    }

    /// Appends a mid-stream error after the frames queued so far.
    pub(crate) fn with_error(mut self, message: &'static str) -> Self {
        self.frames.push_back(Err(message.into()));
        self
    }
}

impl Body for TestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.get_mut().frames.pop_front())
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Polls a body to completion, panicking on `Pending` or an error frame.
/// Returns the concatenated data and the trailers, if any.
pub(crate) fn collect_body<B>(body: &mut B) -> (Vec<u8>, Option<HeaderMap>)
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Debug,
{
    let mut cx = Context::from_waker(Waker::noop());
    let mut data = Vec::new();
    let mut trailers = None;
    loop {
        match Pin::new(&mut *body).poll_frame(&mut cx) {
            Poll::Pending => panic!("body unexpectedly pending"),
            Poll::Ready(None) => return (data, trailers),
            Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(frame) => {
                    if let Ok(t) = frame.into_trailers() {
                        trailers = Some(t);
                    }
                }
            },
            Poll::Ready(Some(Err(e))) => panic!("body error: {e:?}"),
        }
    }
}

/// Polls a body until it yields an error, panicking if it completes cleanly.
pub(crate) fn poll_collect_error<B>(body: &mut B) -> B::Error
where
    B: Body<Data = Bytes> + Unpin,
{
    let mut cx = Context::from_waker(Waker::noop());
    loop {
        match Pin::new(&mut *body).poll_frame(&mut cx) {
            Poll::Pending => panic!("body unexpectedly pending"),
            Poll::Ready(None) => panic!("body ended without an error"),
            Poll::Ready(Some(Ok(_))) => continue,
            Poll::Ready(Some(Err(e))) => return e,
        }
    }
}

/// Polls a future that is expected to resolve without real I/O.
pub(crate) fn poll_ready<F: Future + Unpin>(future: &mut F) -> F::Output {
    let mut cx = Context::from_waker(Waker::noop());
    for _ in 0..64 {
        if let Poll::Ready(output) = Pin::new(&mut *future).poll(&mut cx) {
            return output;
        }
    }
    panic!("future did not resolve");
}

pub(crate) fn gzip_compress(plain: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(6));
    encoder.write_all(plain).unwrap();
    encoder.finish().unwrap()
}

pub(crate) fn gzip_decompress(compressed: &[u8]) -> Vec<u8> {
    let mut decoder = flate2::write::GzDecoder::new(Vec::new());
    decoder.write_all(compressed).unwrap();
    decoder.finish().unwrap()
}

pub(crate) fn zlib_compress(plain: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(6));
    encoder.write_all(plain).unwrap();
    encoder.finish().unwrap()
}

pub(crate) fn zstd_compress(plain: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(plain, 3).unwrap()
}

pub(crate) fn zstd_decompress(compressed: &[u8]) -> Vec<u8> {
    zstd::stream::decode_all(compressed).unwrap()
}

pub(crate) fn brotli_compress(plain: &[u8]) -> Vec<u8> {
    let mut encoder = brotli::CompressorWriter::new(Vec::new(), 4096, 6, 22);
    encoder.write_all(plain).unwrap();
    encoder.flush().unwrap();
    encoder.into_inner()
}

pub(crate) fn brotli_decompress(compressed: &[u8]) -> Vec<u8> {
    let mut decoder = brotli::DecompressorWriter::new(Vec::new(), 4096);
    decoder.write_all(compressed).unwrap();
    decoder.flush().unwrap();
    decoder.into_inner().unwrap_or_else(|_| panic!("truncated brotli stream"))
}

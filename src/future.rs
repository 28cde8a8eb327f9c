use crate::body::CompressionBody;
use crate::codec::Codec;
use crate::error::{BoxError, Error};
use crate::service::Shared;
use bytes::{Bytes, BytesMut};
use http::response::Parts;
use http::{HeaderMap, Response, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    ///
    /// The encoding decision is not committed when the inner response
    /// arrives: the body is first buffered here, up to the configured
    /// threshold, so that small responses keep their headers untouched. The
    /// response is released only once the decision is final.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        codec: Option<Codec>,
        shared: Arc<Shared>,
        state: State<B>,
    }
}

enum State<B> {
    /// Waiting on the wrapped service.
    Inner,
    /// Response arrived; counting body bytes against the threshold.
    Buffering {
        parts: Option<Parts>,
        body: Option<Pin<Box<B>>>,
        buffered: BytesMut,
        trailers: Option<HeaderMap>,
        codec: Codec,
    },
    Done,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, codec: Option<Codec>, shared: Arc<Shared>) -> Self {
        Self {
            inner,
            codec,
            shared,
            state: State::Inner,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Error: Into<BoxError>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match this.state {
                State::Done => panic!("polled after completion"),

                State::Inner => {
                    let response = match this.inner.as_mut().poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => {
                            *this.state = State::Done;
                            return Poll::Ready(Err(e));
                        }
                        Poll::Ready(Ok(response)) => response,
                    };

                    let (mut parts, body) = response.into_parts();
                    let codec = (*this.codec).filter(|_| response_is_compressible(&parts.headers));
                    let Some(codec) = codec else {
                        *this.state = State::Done;
                        let response =
                            Response::from_parts(parts, CompressionBody::passthrough(body));
                        return Poll::Ready(Ok(response));
                    };

                    // A declared length settles the decision without
                    // buffering a single byte.
                    match declared_length(&parts.headers) {
                        Some(len) if len < this.shared.threshold => {
                            *this.state = State::Done;
                            let response =
                                Response::from_parts(parts, CompressionBody::passthrough(body));
                            return Poll::Ready(Ok(response));
                        }
                        Some(_) => {
                            *this.state = State::Done;
                            let body = match this.shared.registry.acquire_compressor(codec) {
                                Ok(compressor) => {
                                    commit_headers(&mut parts, codec);
                                    CompressionBody::compressed(Box::pin(body), compressor, None)
                                }
                                Err(e) => CompressionBody::failed(Error::Codec(e)),
                            };
                            return Poll::Ready(Ok(Response::from_parts(parts, body)));
                        }
                        None => {
                            *this.state = State::Buffering {
                                parts: Some(parts),
                                body: Some(Box::pin(body)),
                                buffered: BytesMut::new(),
                                trailers: None,
                                codec,
                            };
                        }
                    }
                }

                State::Buffering {
                    parts,
                    body,
                    buffered,
                    trailers,
                    codec,
                } => {
                    let codec = *codec;
                    let inner_body = match body.as_mut() {
                        Some(b) => b,
                        None => panic!("polled after completion"),
                    };
                    match inner_body.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,

                        Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                            Ok(data) => {
                                buffered.extend_from_slice(&crate::body::copy_to_bytes(data));
                                if buffered.len() >= this.shared.threshold {
                                    let mut parts = take_parts(parts);
                                    let prefix = std::mem::take(buffered).freeze();
                                    let trailers = trailers.take();
                                    let inner = match body.take() {
                                        Some(b) => b,
                                        None => unreachable!(),
                                    };
                                    *this.state = State::Done;
                                    let body = commit_streaming(
                                        this.shared, codec, &mut parts, inner, &prefix, trailers,
                                    );
                                    return Poll::Ready(Ok(Response::from_parts(parts, body)));
                                }
                            }
                            Err(frame) => {
                                if let Ok(t) = frame.into_trailers() {
                                    *trailers = Some(t);
                                }
                            }
                        },

                        Poll::Ready(Some(Err(e))) => {
                            let parts = take_parts(parts);
                            *this.state = State::Done;
                            let body = CompressionBody::failed(Error::body(e));
                            return Poll::Ready(Ok(Response::from_parts(parts, body)));
                        }

                        Poll::Ready(None) => {
                            let mut parts = take_parts(parts);
                            let data = std::mem::take(buffered).freeze();
                            let trailers = trailers.take();
                            *this.state = State::Done;
                            let body = if data.len() >= this.shared.threshold {
                                commit_buffered(this.shared, codec, &mut parts, &data, trailers)
                            } else {
                                // The full payload is in hand, so the exact
                                // length can be published.
                                if trailers.is_none() {
                                    parts.headers.insert(
                                        header::CONTENT_LENGTH,
                                        header::HeaderValue::from(data.len()),
                                    );
                                }
                                CompressionBody::buffered(data, trailers)
                            };
                            return Poll::Ready(Ok(Response::from_parts(parts, body)));
                        }
                    }
                }
            }
        }
    }
}

fn take_parts(parts: &mut Option<Parts>) -> Parts {
    match parts.take() {
        Some(parts) => parts,
        None => unreachable!(),
    }
}

/// Commits to compression for a body that is still streaming: the buffered
/// prefix goes into the compressor, the headers are rewritten, and the rest
/// of the body streams through.
fn commit_streaming<B>(
    shared: &Shared,
    codec: Codec,
    parts: &mut Parts,
    inner: Pin<Box<B>>,
    prefix: &Bytes,
    trailers: Option<HeaderMap>,
) -> CompressionBody<B> {
    let mut compressor = match shared.registry.acquire_compressor(codec) {
        Ok(compressor) => compressor,
        Err(e) => return CompressionBody::failed(Error::Codec(e)),
    };
    if let Err(e) = compressor.write(prefix) {
        return CompressionBody::failed(e);
    }
    commit_headers(parts, codec);
    CompressionBody::compressed(inner, compressor, trailers)
}

/// Commits to compression for a body that completed during buffering: the
/// whole payload is compressed up front and replayed from memory.
fn commit_buffered<B>(
    shared: &Shared,
    codec: Codec,
    parts: &mut Parts,
    data: &Bytes,
    trailers: Option<HeaderMap>,
) -> CompressionBody<B> {
    let mut compressor = match shared.registry.acquire_compressor(codec) {
        Ok(compressor) => compressor,
        Err(e) => return CompressionBody::failed(Error::Codec(e)),
    };
    if let Err(e) = compressor.write(data) {
        return CompressionBody::failed(e);
    }
    let mut compressed = compressor.take_output().to_vec();
    let bytes_in = compressor.bytes_written();
    match compressor.close() {
        Ok(trailer) => compressed.extend_from_slice(&trailer),
        Err(e) => return CompressionBody::failed(e),
    }
    tracing::debug!(bytes_in, "compressed body closed");
    commit_headers(parts, codec);
    CompressionBody::buffered(Bytes::from(compressed), trailers)
}

/// Header rewrite at the moment compression becomes final.
fn commit_headers(parts: &mut Parts, codec: Codec) {
    parts.headers.insert(
        header::CONTENT_ENCODING,
        header::HeaderValue::from_static(codec.token()),
    );
    // The compressed size is unknown and ranges no longer line up.
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::ACCEPT_RANGES);
    add_vary_accept_encoding(&mut parts.headers);
}

/// Response-side gate: an already-encoded, range, event-stream, or
/// uncompressible-content response is never touched.
fn response_is_compressible(headers: &header::HeaderMap) -> bool {
    !headers.contains_key(header::CONTENT_ENCODING)
        && !headers.contains_key(header::CONTENT_RANGE)
        && !is_uncompressible_content_type(headers)
        && !is_event_stream(headers)
}

fn declared_length(headers: &header::HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
}

/// Adds Accept-Encoding to the Vary header unless some existing Vary entry
/// already covers it.
fn add_vary_accept_encoding(headers: &mut header::HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }
    headers.append(
        header::VARY,
        header::HeaderValue::from_static("accept-encoding"),
    );
}

/// Compressing an image (except SVG) or a gRPC body (except grpc-web) wastes
/// cycles or breaks the protocol.
fn is_uncompressible_content_type(headers: &header::HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    if content_type.starts_with("image/") {
        return !content_type.starts_with("image/svg+xml");
    }
    if content_type.starts_with("application/grpc") {
        return !content_type.starts_with("application/grpc-web");
    }
    false
}

/// Event streams need each event on the wire as it happens; buffering them
/// inside a codec window would stall the client.
fn is_event_stream(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

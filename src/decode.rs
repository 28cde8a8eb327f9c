use crate::body::copy_to_bytes;
use crate::codec::Codec;
use crate::error::{BoxError, Error};
use crate::pool::PooledDecompressor;
use crate::registry::Registry;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use http::request;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A request body whose declared content encodings are transparently
    /// undone while it is read.
    ///
    /// Errors from a corrupt or truncated compressed body surface as
    /// [`Error::Codec`] on the first read that hits them, before any
    /// application logic sees decoded bytes from that point on.
    pub struct DecompressionBody<B> {
        #[pin]
        inner: B,
        state: DecodeState,
        // Trailers are held back until the chain's tail has been flushed so
        // they stay the final frame.
        pending_trailers: Option<http::HeaderMap>,
        done: bool,
    }
}

enum DecodeState {
    /// No recognized encodings to undo; frames stream through untouched.
    Passthrough,
    /// Active chain of pooled decompressors, outermost layer first.
    Chain(DecodeChain),
    /// Construction failed; the error is yielded on first poll.
    Failed(Option<Error>),
}

impl<B> DecompressionBody<B> {
    pub(crate) fn passthrough(inner: B) -> Self {
        Self {
            inner,
            state: DecodeState::Passthrough,
            pending_trailers: None,
            done: false,
        }
    }

    fn with_chain(inner: B, layers: Vec<PooledDecompressor>) -> Self {
        Self {
            inner,
            state: DecodeState::Chain(DecodeChain { layers }),
            pending_trailers: None,
            done: false,
        }
    }

    fn failed(inner: B, error: Error) -> Self {
        Self {
            inner,
            state: DecodeState::Failed(Some(error)),
            pending_trailers: None,
            done: false,
        }
    }
}

/// Ordered decompressor chain. `layers[0]` consumes the wire bytes (the
/// last-applied encoding); each layer feeds the next; output is read from the
/// final layer.
struct DecodeChain {
    layers: Vec<PooledDecompressor>,
}

impl DecodeChain {
    fn transform(&mut self, input: &[u8]) -> Result<Bytes, Error> {
        self.layers[0].write(input)?;
        for i in 1..self.layers.len() {
            let carry = self.layers[i - 1].take_output();
            if !carry.is_empty() {
                self.layers[i].write(&carry)?;
            }
        }
        let last = self.layers.len() - 1;
        Ok(self.layers[last].take_output())
    }

    /// Drains every layer once the input stream has ended, cascading each
    /// layer's remaining output into the next.
    fn finish(&mut self) -> Result<Bytes, Error> {
        let mut carry = Bytes::new();
        for layer in &mut self.layers {
            if !carry.is_empty() {
                layer.write(&carry)?;
            }
            carry = layer.finish()?;
        }
        Ok(carry)
    }

    /// Closes every layer. Each layer gets its close attempt even when an
    /// earlier one fails; the first failure is the one reported.
    fn close(&mut self) -> Result<(), Error> {
        let mut first_error = None;
        for layer in &mut self.layers {
            if let Err(e) = layer.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B> Body for DecompressionBody<B>
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
        let mut this = self.project();
        if *this.done {
            return match this.pending_trailers.take() {
                Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                None => Poll::Ready(None),
            };
        }

        let chain = match this.state {
            DecodeState::Failed(error) => {
                *this.done = true;
                return match error.take() {
                    Some(e) => Poll::Ready(Some(Err(e))),
                    None => Poll::Ready(None),
                };
            }
            DecodeState::Passthrough => {
                return match this.inner.poll_frame(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Ready(Some(Ok(frame))) => {
                        Poll::Ready(Some(Ok(frame.map_data(copy_to_bytes))))
                    }
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(Error::body(e)))),
                };
            }
            DecodeState::Chain(chain) => chain,
        };

        loop {
            match this.inner.as_mut().poll_frame(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    *this.done = true;
                    let tail = match chain.finish() {
                        Ok(tail) => tail,
                        Err(e) => {
                            // Layers are still closed on the error path; the
                            // decode failure outranks any close failure.
                            let _ = chain.close();
                            this.pending_trailers.take();
                            return Poll::Ready(Some(Err(e)));
                        }
                    };
                    if let Err(e) = chain.close() {
                        this.pending_trailers.take();
                        return Poll::Ready(Some(Err(e)));
                    }
                    if !tail.is_empty() {
                        // Held-back trailers go out on the next poll.
                        return Poll::Ready(Some(Ok(Frame::data(tail))));
                    }
                    return match this.pending_trailers.take() {
                        Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    let _ = chain.close();
                    this.pending_trailers.take();
                    return Poll::Ready(Some(Err(Error::body(e))));
                }
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => {
                        let input = copy_to_bytes(data);
                        match chain.transform(&input) {
                            Ok(out) if out.is_empty() => continue,
                            Ok(out) => return Poll::Ready(Some(Ok(Frame::data(out)))),
                            Err(e) => {
                                *this.done = true;
                                let _ = chain.close();
                                this.pending_trailers.take();
                                return Poll::Ready(Some(Err(e)));
                            }
                        }
                    }
                    Err(frame) => {
                        // Output may still be buffered inside the chain, so
                        // the trailers cannot go out yet.
                        if let Ok(trailers) = frame.into_trailers() {
                            *this.pending_trailers = Some(trailers);
                        }
                        continue;
                    }
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.state {
            DecodeState::Passthrough => self.inner.is_end_stream(),
            DecodeState::Chain(_) | DecodeState::Failed(_) => {
                self.done && self.pending_trailers.is_none()
            }
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match &self.state {
            DecodeState::Passthrough => self.inner.size_hint(),
            // The decoded length is unknown.
            DecodeState::Chain(_) | DecodeState::Failed(_) => http_body::SizeHint::default(),
        }
    }
}

/// Builds the decode chain for a request and rewrites its headers.
///
/// Encodings are declared in application order, so they are undone from the
/// end of the list backwards, peeling at most `max_steps` layers and stopping
/// without error at the first unrecognized token. When at least one layer is
/// peeled the stale `Content-Length` is dropped and `Content-Encoding` is
/// removed or truncated to the unpeeled prefix; when nothing is peeled the
/// request passes through with its headers untouched.
pub(crate) fn decode_request<B>(
    parts: &mut request::Parts,
    body: B,
    registry: &Registry,
    max_steps: usize,
) -> DecompressionBody<B> {
    let Some(header) = parts
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
    else {
        return DecompressionBody::passthrough(body);
    };

    let declared: Vec<String> = header
        .split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .collect();

    let mut layers = Vec::new();
    let mut remaining = declared.len();
    for token in declared.iter().rev() {
        if layers.len() == max_steps {
            break;
        }
        // Unrecognized encodings stay declared so downstream consumers know
        // the body is still encoded with them.
        let Some(codec) = Codec::from_token(token) else {
            break;
        };
        match registry.acquire_decompressor(codec) {
            Ok(layer) => layers.push(layer),
            Err(e) => return DecompressionBody::failed(body, Error::Codec(e)),
        }
        remaining -= 1;
    }

    if layers.is_empty() {
        return DecompressionBody::passthrough(body);
    }

    parts.headers.remove(CONTENT_LENGTH);
    if remaining == 0 {
        parts.headers.remove(CONTENT_ENCODING);
    } else {
        let rest = declared[..remaining].join(", ");
        match HeaderValue::from_str(&rest) {
            Ok(value) => {
                parts.headers.insert(CONTENT_ENCODING, value);
            }
            Err(_) => {
                parts.headers.remove(CONTENT_ENCODING);
            }
        }
    }

    DecompressionBody::with_chain(body, layers)
}

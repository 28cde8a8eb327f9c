use crate::body::CompressionBody;
use crate::decode::{DecompressionBody, decode_request};
use crate::error::BoxError;
use crate::future::ResponseFuture;
use crate::negotiate::{is_streaming_request, negotiate};
use crate::registry::Registry;
use http::{Request, Response, header, request};
use http_body::Body;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Requests for which the whole transform is skipped, both directions.
pub(crate) type ExcludePredicate = Arc<dyn Fn(&request::Parts) -> bool + Send + Sync>;

/// Configuration and pools shared by every clone of a service, and by every
/// in-flight request through it.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) threshold: usize,
    pub(crate) max_decode_steps: usize,
    pub(crate) decompress_requests: bool,
    pub(crate) exclude: Option<ExcludePredicate>,
}

/// A Tower service that negotiates and compresses HTTP response bodies and
/// decompresses HTTP request bodies.
#[derive(Clone)]
pub struct CompressionService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> CompressionService<S> {
    pub(crate) fn new(inner: S, shared: Arc<Shared>) -> Self {
        Self { inner, shared }
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

impl<S: fmt::Debug> fmt::Debug for CompressionService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionService")
            .field("inner", &self.inner)
            .field("threshold", &self.shared.threshold)
            .field("max_decode_steps", &self.shared.max_decode_steps)
            .field("decompress_requests", &self.shared.decompress_requests)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<DecompressionBody<ReqBody>>, Response = Response<ResBody>>,
    ResBody: Body,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (mut parts, body) = req.into_parts();

        let excluded = self.shared.exclude.as_ref().is_some_and(|f| f(&parts));
        let codec = if excluded || is_streaming_request(&parts.headers) {
            None
        } else {
            let accept = parts
                .headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok());
            negotiate(accept, &self.shared.registry)
        };

        let body = if self.shared.decompress_requests && !excluded {
            decode_request(
                &mut parts,
                body,
                &self.shared.registry,
                self.shared.max_decode_steps,
            )
        } else {
            DecompressionBody::passthrough(body)
        };

        let inner = self.inner.call(Request::from_parts(parts, body));
        ResponseFuture::new(inner, codec, self.shared.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::layer::CompressionLayer;
    use crate::test_util::{TestBody, collect_body, gzip_compress, gzip_decompress, poll_ready};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use std::convert::Infallible;
    use tower::{Layer, ServiceExt, service_fn};

    type EchoRequest = Request<DecompressionBody<TestBody>>;

    /// Echoes the (decoded) request body back, tagging the response with the
    /// bytes the handler actually observed.
    async fn echo(req: EchoRequest) -> Result<Response<Full<Bytes>>, Infallible> {
        let collected = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => Bytes::from(format!("decode error: {e}")),
        };
        Ok(Response::new(Full::new(collected)))
    }

    fn call<S>(
        service: &mut S,
        request: Request<TestBody>,
    ) -> Response<CompressionBody<Full<Bytes>>>
    where
        S: Service<
                Request<TestBody>,
                Response = Response<CompressionBody<Full<Bytes>>>,
                Error = Infallible,
            >,
    {
        let mut future = Box::pin(service.call(request));
        poll_ready(&mut future).unwrap()
    }

    #[test]
    fn test_end_to_end_response_compression() {
        let mut service = CompressionLayer::new()
            .threshold(64)
            .layer(service_fn(echo));
        let payload = b"sphinx of black quartz, judge my vow. ".repeat(10);
        let chunks: Vec<&[u8]> = payload.chunks(32).collect();
        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(TestBody::data(&chunks))
            .unwrap();

        let mut response = call(&mut service, request);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        let (compressed, _) = collect_body(response.body_mut());
        assert_eq!(gzip_decompress(&compressed), payload);
    }

    #[test]
    fn test_end_to_end_small_response_untouched() {
        let mut service = CompressionLayer::new().layer(service_fn(echo));
        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(TestBody::data(&[b"ok"]))
            .unwrap();

        let mut response = call(&mut service, request);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        let (data, _) = collect_body(response.body_mut());
        assert_eq!(data, b"ok".as_slice());
    }

    #[test]
    fn test_end_to_end_request_decompression() {
        let mut service = CompressionLayer::new().layer(service_fn(echo));
        let compressed = gzip_compress(b"posted payload");
        let request = Request::builder()
            .header(header::CONTENT_ENCODING, "gzip")
            .body(TestBody::data(&[&compressed]))
            .unwrap();

        // The handler echoes what it saw: the decoded bytes.
        let mut response = call(&mut service, request);
        let (data, _) = collect_body(response.body_mut());
        assert_eq!(data, b"posted payload".as_slice());
    }

    #[test]
    fn test_request_decompression_disabled() {
        let mut service = CompressionLayer::new()
            .decompress_requests(false)
            .layer(service_fn(echo));
        let compressed = gzip_compress(b"opaque");
        let request = Request::builder()
            .header(header::CONTENT_ENCODING, "gzip")
            .body(TestBody::data(&[&compressed]))
            .unwrap();

        let mut response = call(&mut service, request);
        let (data, _) = collect_body(response.body_mut());
        assert_eq!(data, compressed);
    }

    #[test]
    fn test_no_accept_encoding_means_identity_response() {
        let mut service = CompressionLayer::new()
            .threshold(4)
            .layer(service_fn(echo));
        let request = Request::builder()
            .body(TestBody::data(&[b"plain response body"]))
            .unwrap();

        let mut response = call(&mut service, request);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        let (data, _) = collect_body(response.body_mut());
        assert_eq!(data, b"plain response body".as_slice());
    }

    #[test]
    fn test_excluded_request_is_fully_transparent() {
        let mut service = CompressionLayer::new()
            .threshold(4)
            .exclude(|parts| parts.uri.path() == "/metrics")
            .layer(service_fn(echo));
        let compressed = gzip_compress(b"scrape");
        let request = Request::builder()
            .uri("/metrics")
            .header(header::ACCEPT_ENCODING, "gzip")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(TestBody::data(&[&compressed]))
            .unwrap();

        let mut response = call(&mut service, request);
        // Neither direction was touched: the request body reached the
        // handler still compressed and the response is identity.
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        let (data, _) = collect_body(response.body_mut());
        assert_eq!(data, compressed);
    }

    #[test]
    fn test_upgrade_request_not_compressed() {
        let mut service = CompressionLayer::new()
            .threshold(4)
            .layer(service_fn(echo));
        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .header(header::CONNECTION, "Upgrade")
            .body(TestBody::data(&[b"websocket handshake body"]))
            .unwrap();

        let response = call(&mut service, request);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_event_stream_accept_not_compressed() {
        let mut service = CompressionLayer::new()
            .threshold(4)
            .layer(service_fn(echo));
        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .header(header::ACCEPT, "text/event-stream")
            .body(TestBody::data(&[b"event: tick\n\nevent: tock\n\n"]))
            .unwrap();

        let response = call(&mut service, request);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_negotiation_prefers_configured_priority() {
        let mut service = CompressionLayer::new()
            .threshold(4)
            .priority(Codec::Zstd, 1000)
            .layer(service_fn(echo));
        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip, zstd, br")
            .body(TestBody::data(&[b"negotiate me, I am long enough"]))
            .unwrap();

        let mut response = call(&mut service, request);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "zstd"
        );
        let (compressed, _) = collect_body(response.body_mut());
        assert_eq!(
            crate::test_util::zstd_decompress(&compressed),
            b"negotiate me, I am long enough"
        );
    }

    #[test]
    fn test_default_negotiation_prefers_brotli() {
        let mut service = CompressionLayer::new()
            .threshold(4)
            .layer(service_fn(echo));
        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip, br")
            .body(TestBody::data(&[b"brotli wins on default priority"]))
            .unwrap();

        let mut response = call(&mut service, request);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "br"
        );
        let (compressed, _) = collect_body(response.body_mut());
        assert_eq!(
            crate::test_util::brotli_decompress(&compressed),
            b"brotli wins on default priority"
        );
    }

    #[test]
    fn test_service_is_clone_and_shares_pools() {
        let service = CompressionLayer::new().layer(service_fn(echo));
        let mut a = service.clone();
        let mut b = service;
        for service in [&mut a, &mut b] {
            let request = Request::builder()
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(TestBody::data(&[b"shared"]))
                .unwrap();
            let mut response = call(service, request);
            collect_body(response.body_mut());
        }
    }

    #[test]
    fn test_oneshot_compatible() {
        // Compile-time check that the service composes with tower combinators.
        let service = CompressionLayer::new().layer(service_fn(echo));
        let request = Request::builder().body(TestBody::data(&[b"x"])).unwrap();
        let mut future = Box::pin(service.oneshot(request));
        let response = poll_ready(&mut future).unwrap();
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }
}

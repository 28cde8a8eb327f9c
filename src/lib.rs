//! HTTP body compression middleware for Tower.
//!
//! This crate provides a Tower layer that negotiates a response encoding from
//! the client's `Accept-Encoding` header, compresses response bodies with
//! Zstd, Brotli, Gzip, or Deflate, and transparently decompresses request
//! bodies that declare a `Content-Encoding`.
//!
//! # Example
//!
//! ```ignore
//! use http_body_compression::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new())
//!     .service(my_service);
//! ```
//!
//! # Deferred commit
//!
//! The response headers are not rewritten when the response arrives. The body
//! is buffered, up to the configured threshold (default: 512 bytes), before
//! the response is released: a body that stays under the threshold goes out
//! byte for byte with its original headers, and one that reaches it commits
//! to compression, at which point `Content-Encoding` is set, `Content-Length`
//! and `Accept-Ranges` are removed, and `Vary` gains `Accept-Encoding`. A
//! declared `Content-Length` settles the decision without buffering.
//!
//! # Compression rules
//!
//! Responses are never compressed when:
//! - No supported `Accept-Encoding` is present in the request
//! - The request asks for `text/event-stream` or carries `Connection: Upgrade`
//! - The request matches the configured exclusion predicate
//! - `Content-Encoding` is already set on the response
//! - `Content-Range` is present (range responses)
//! - `Content-Type` is `text/event-stream`
//! - `Content-Type` starts with `image/` (except `image/svg+xml`)
//! - `Content-Type` starts with `application/grpc` (except `application/grpc-web`)
//!
//! # Request decompression
//!
//! Declared request encodings are undone from the outermost layer inwards,
//! at most [`DEFAULT_MAX_DECODE_STEPS`] layers by default, stopping at the
//! first unrecognized token. Undone layers are removed from
//! `Content-Encoding` and the stale `Content-Length` is dropped.
//!
//! Codec instances are pooled and reused across requests; a cancelled
//! response or an abandoned request body returns its instance to the pool.

#![deny(missing_docs)]

mod body;
mod codec;
mod decode;
mod error;
mod future;
mod layer;
mod negotiate;
mod pool;
mod registry;
mod service;
#[cfg(test)]
mod test_util;

pub use body::CompressionBody;
pub use codec::Codec;
pub use decode::DecompressionBody;
pub use error::Error;
pub use future::ResponseFuture;
pub use layer::{CompressionLayer, DEFAULT_MAX_DECODE_STEPS, DEFAULT_THRESHOLD};
pub use service::CompressionService;

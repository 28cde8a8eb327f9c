use crate::codec::Codec;
use crate::registry::{AlgorithmSettings, Registry};
use crate::service::{CompressionService, ExcludePredicate, Shared};
use http::request;
use std::fmt;
use std::sync::Arc;
use tower::Layer;

/// Default body size, in bytes, at which a response is compressed. A body
/// this large or larger commits to compression; anything smaller is released
/// untouched.
pub const DEFAULT_THRESHOLD: usize = 512;

/// Default number of request encoding layers undone per request.
pub const DEFAULT_MAX_DECODE_STEPS: usize = 1;

/// A Tower layer that compresses response bodies and decompresses request
/// bodies.
///
/// The response encoding is negotiated from the client's `Accept-Encoding`
/// header; request bodies have their declared `Content-Encoding` layers
/// undone, outermost first. All four algorithms are enabled by default.
///
/// ```
/// use http_body_compression::{Codec, CompressionLayer};
///
/// let layer = CompressionLayer::new()
///     .threshold(1024)
///     .enable(Codec::Brotli, false)
///     .exclude(|parts| parts.uri.path().starts_with("/internal/"));
/// ```
#[derive(Clone)]
pub struct CompressionLayer {
    settings: [AlgorithmSettings; 4],
    threshold: usize,
    max_decode_steps: usize,
    decompress_requests: bool,
    exclude: Option<ExcludePredicate>,
}

impl CompressionLayer {
    /// Creates a layer with default settings.
    pub fn new() -> Self {
        Self {
            settings: AlgorithmSettings::default_table(),
            threshold: DEFAULT_THRESHOLD,
            max_decode_steps: DEFAULT_MAX_DECODE_STEPS,
            decompress_requests: true,
            exclude: None,
        }
    }

    /// Sets the body size at which a response commits to compression.
    ///
    /// A response whose body reaches `threshold` bytes is compressed;
    /// a smaller one is passed through byte for byte.
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets how many request encoding layers are undone per request.
    ///
    /// # Panics
    ///
    /// Panics if `steps` is zero.
    pub fn max_decode_steps(mut self, steps: usize) -> Self {
        assert!(steps >= 1, "max_decode_steps must be at least 1");
        self.max_decode_steps = steps;
        self
    }

    /// Enables or disables request body decompression entirely.
    pub fn decompress_requests(mut self, decompress: bool) -> Self {
        self.decompress_requests = decompress;
        self
    }

    /// Enables or disables one algorithm for response negotiation.
    ///
    /// A disabled algorithm is still used to decode request bodies that
    /// declare it.
    pub fn enable(mut self, codec: Codec, enabled: bool) -> Self {
        self.settings[codec.index()].enabled = enabled;
        self
    }

    /// Sets the tie-break priority of one algorithm. Among encodings the
    /// client weights equally, the highest priority wins.
    pub fn priority(mut self, codec: Codec, priority: i32) -> Self {
        self.settings[codec.index()].priority = priority;
        self
    }

    /// Sets the compression level of one algorithm.
    pub fn level(mut self, codec: Codec, level: u32) -> Self {
        self.settings[codec.index()].level = level;
        self
    }

    /// Skips the transform, in both directions, for requests matching the
    /// predicate.
    pub fn exclude<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&request::Parts) -> bool + Send + Sync + 'static,
    {
        self.exclude = Some(Arc::new(predicate));
        self
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompressionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionLayer")
            .field("threshold", &self.threshold)
            .field("max_decode_steps", &self.max_decode_steps)
            .field("decompress_requests", &self.decompress_requests)
            .field("exclude", &self.exclude.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(
            inner,
            Arc::new(Shared {
                registry: Registry::new(self.settings),
                threshold: self.threshold,
                max_decode_steps: self.max_decode_steps,
                decompress_requests: self.decompress_requests,
                exclude: self.exclude.clone(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let layer = CompressionLayer::new();
        assert_eq!(layer.threshold, DEFAULT_THRESHOLD);
        assert_eq!(layer.max_decode_steps, DEFAULT_MAX_DECODE_STEPS);
        assert!(layer.decompress_requests);
        for codec in Codec::ALL {
            assert!(layer.settings[codec.index()].enabled);
        }
    }

    #[test]
    fn test_builder_settings_reach_registry() {
        let layer = CompressionLayer::new()
            .enable(Codec::Brotli, false)
            .priority(Codec::Zstd, 999)
            .level(Codec::Gzip, 9);
        assert!(!layer.settings[Codec::Brotli.index()].enabled);
        assert_eq!(layer.settings[Codec::Zstd.index()].priority, 999);
        assert_eq!(layer.settings[Codec::Gzip.index()].level, 9);
    }

    #[test]
    #[should_panic(expected = "max_decode_steps")]
    fn test_zero_decode_steps_rejected() {
        let _ = CompressionLayer::new().max_decode_steps(0);
    }

    #[test]
    fn test_debug_does_not_require_predicate_debug() {
        let layer = CompressionLayer::new().exclude(|_| true);
        let rendered = format!("{layer:?}");
        assert!(rendered.contains("exclude: true"));
    }
}

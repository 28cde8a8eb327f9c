use std::array;
use std::io;
use std::sync::Arc;

use crate::codec::Codec;
use crate::pool::{CodecPool, PooledCompressor, PooledDecompressor};

/// Negotiation and codec settings for one algorithm.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AlgorithmSettings {
    /// Whether the algorithm participates in negotiation.
    pub(crate) enabled: bool,
    /// Tie-break rank among equally weighted encodings; higher wins.
    pub(crate) priority: i32,
    /// Codec-specific quality knob.
    pub(crate) level: u32,
}

impl AlgorithmSettings {
    pub(crate) fn defaults(codec: Codec) -> Self {
        let priority = match codec {
            Codec::Zstd => 100,
            Codec::Deflate => 200,
            Codec::Gzip => 300,
            Codec::Brotli => 400,
        };
        Self {
            enabled: true,
            priority,
            level: codec.default_level(),
        }
    }

    pub(crate) fn default_table() -> [AlgorithmSettings; 4] {
        array::from_fn(|i| AlgorithmSettings::defaults(Codec::ALL[i]))
    }
}

/// Caller-owned table of per-algorithm settings plus the transform pools.
///
/// Settings are written at setup time only; concurrent requests read them and
/// share the pools through an `Arc`.
pub(crate) struct Registry {
    settings: [AlgorithmSettings; 4],
    compressors: [Arc<CodecPool>; 4],
    decompressors: [Arc<CodecPool>; 4],
}

impl Registry {
    pub(crate) fn new(settings: [AlgorithmSettings; 4]) -> Self {
        Self {
            settings,
            compressors: array::from_fn(|_| Arc::new(CodecPool::new())),
            decompressors: array::from_fn(|_| Arc::new(CodecPool::new())),
        }
    }

    pub(crate) fn is_enabled(&self, codec: Codec) -> bool {
        self.settings[codec.index()].enabled
    }

    pub(crate) fn priority(&self, codec: Codec) -> i32 {
        self.settings[codec.index()].priority
    }

    pub(crate) fn any_enabled(&self) -> bool {
        self.settings.iter().any(|s| s.enabled)
    }

    pub(crate) fn acquire_compressor(&self, codec: Codec) -> io::Result<PooledCompressor> {
        PooledCompressor::acquire(
            self.compressors[codec.index()].clone(),
            codec,
            self.settings[codec.index()].level,
        )
    }

    pub(crate) fn acquire_decompressor(&self, codec: Codec) -> io::Result<PooledDecompressor> {
        PooledDecompressor::acquire(self.decompressors[codec.index()].clone(), codec)
    }

    #[cfg(test)]
    pub(crate) fn idle_decompressors(&self, codec: Codec) -> usize {
        self.decompressors[codec.index()].idle_len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(AlgorithmSettings::default_table())
    }
}

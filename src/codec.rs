use std::io::{self, Write};
use std::mem;

use brotli::{CompressorWriter, DecompressorWriter};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use zstd::stream::write::{Decoder as ZstdDecoder, Encoder as ZstdEncoder};

/// Ring buffer size handed to codecs that want one.
const CODEC_BUFFER_SIZE: usize = 4096;

/// Brotli window size exponent.
const BROTLI_LGWIN: u32 = 22;

/// Supported compression codecs.
///
/// The set is closed: tokens outside it are never decoded and never
/// negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Zstd compression.
    Zstd,
    /// Brotli compression.
    Brotli,
    /// Gzip compression.
    Gzip,
    /// Deflate (zlib-wrapped) compression.
    Deflate,
}

impl Codec {
    pub(crate) const ALL: [Codec; 4] = [Codec::Zstd, Codec::Brotli, Codec::Gzip, Codec::Deflate];

    /// Returns the `Content-Encoding` token for this codec.
    pub fn token(&self) -> &'static str {
        match self {
            Codec::Zstd => "zstd",
            Codec::Brotli => "br",
            Codec::Gzip => "gzip",
            Codec::Deflate => "deflate",
        }
    }

    /// Resolves a lowercase `Content-Encoding` token, accepting the common
    /// aliases for gzip and brotli.
    pub fn from_token(token: &str) -> Option<Codec> {
        match token {
            "zstd" => Some(Codec::Zstd),
            "br" | "brotli" => Some(Codec::Brotli),
            "gzip" | "x-gzip" => Some(Codec::Gzip),
            "deflate" => Some(Codec::Deflate),
            _ => None,
        }
    }

    /// Default compression level for this codec.
    pub fn default_level(&self) -> u32 {
        match self {
            Codec::Zstd => 3,
            Codec::Brotli => 6,
            Codec::Gzip => 6,
            Codec::Deflate => 6,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Creates a fresh streaming compressor for this codec.
    pub(crate) fn new_compressor(self, level: u32) -> io::Result<Box<dyn Transform>> {
        Ok(match self {
            Codec::Zstd => Box::new(ZstdCompressor::new(level)?),
            Codec::Brotli => Box::new(BrotliCompressor::new(level)),
            Codec::Gzip => Box::new(GzipCompressor::new(level)),
            Codec::Deflate => Box::new(DeflateCompressor::new(level)),
        })
    }

    /// Creates a fresh streaming decompressor for this codec.
    pub(crate) fn new_decompressor(self) -> io::Result<Box<dyn Transform>> {
        Ok(match self {
            Codec::Zstd => Box::new(ZstdDecompressor::new()?),
            Codec::Brotli => Box::new(BrotliDecompressor::new()),
            Codec::Gzip => Box::new(GzipDecompressor::new()),
            Codec::Deflate => Box::new(DeflateDecompressor::new()),
        })
    }
}

/// Capability contract for a streaming compressor or decompressor.
///
/// Input is pushed with `write`; whatever output the codec has made available
/// is drained with `take_output`. `finish` writes any stream trailer and
/// returns the remaining output. `reset` rebinds the codec to a fresh stream
/// so a pooled instance never retains data from its previous owner.
pub(crate) trait Transform: Send {
    fn write(&mut self, input: &[u8]) -> io::Result<()>;
    fn take_output(&mut self) -> Bytes;
    fn finish(&mut self) -> io::Result<Bytes>;
    fn reset(&mut self) -> io::Result<()>;
}

struct GzipCompressor {
    inner: GzEncoder<Vec<u8>>,
    level: u32,
}

impl GzipCompressor {
    fn new(level: u32) -> Self {
        Self {
            inner: GzEncoder::new(Vec::new(), Compression::new(level)),
            level,
        }
    }
}

impl Transform for GzipCompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut sink = mem::take(self.inner.get_mut());
        sink.clear();
        self.inner = GzEncoder::new(sink, Compression::new(self.level));
        Ok(())
    }
}

struct DeflateCompressor {
    inner: ZlibEncoder<Vec<u8>>,
    level: u32,
}

impl DeflateCompressor {
    fn new(level: u32) -> Self {
        Self {
            inner: ZlibEncoder::new(Vec::new(), Compression::new(level)),
            level,
        }
    }
}

impl Transform for DeflateCompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut sink = mem::take(self.inner.get_mut());
        sink.clear();
        self.inner = ZlibEncoder::new(sink, Compression::new(self.level));
        Ok(())
    }
}

struct ZstdCompressor {
    inner: ZstdEncoder<'static, Vec<u8>>,
    level: i32,
}

impl ZstdCompressor {
    fn new(level: u32) -> io::Result<Self> {
        let level = level as i32;
        Ok(Self {
            inner: ZstdEncoder::new(Vec::new(), level)?,
            level,
        })
    }
}

impl Transform for ZstdCompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.do_finish()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut sink = mem::take(self.inner.get_mut());
        sink.clear();
        self.inner = ZstdEncoder::new(sink, self.level)?;
        Ok(())
    }
}

struct BrotliCompressor {
    // `into_inner` consumes the writer, so a finished stream leaves this empty
    // until the next reset.
    inner: Option<CompressorWriter<Vec<u8>>>,
    level: u32,
}

impl BrotliCompressor {
    fn new(level: u32) -> Self {
        Self {
            inner: Some(Self::build(level)),
            level,
        }
    }

    fn build(level: u32) -> CompressorWriter<Vec<u8>> {
        CompressorWriter::new(Vec::new(), CODEC_BUFFER_SIZE, level, BROTLI_LGWIN)
    }
}

impl Transform for BrotliCompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        match &mut self.inner {
            Some(w) => w.write_all(input),
            None => Err(finished_stream()),
        }
    }

    fn take_output(&mut self) -> Bytes {
        match &mut self.inner {
            Some(w) => Bytes::from(mem::take(w.get_mut())),
            None => Bytes::new(),
        }
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        let Some(mut w) = self.inner.take() else {
            return Err(finished_stream());
        };
        w.flush()?;
        Ok(Bytes::from(w.into_inner()))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.inner = Some(Self::build(self.level));
        Ok(())
    }
}

struct GzipDecompressor {
    inner: GzDecoder<Vec<u8>>,
}

impl GzipDecompressor {
    fn new() -> Self {
        Self {
            inner: GzDecoder::new(Vec::new()),
        }
    }
}

impl Transform for GzipDecompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut sink = mem::take(self.inner.get_mut());
        sink.clear();
        self.inner = GzDecoder::new(sink);
        Ok(())
    }
}

struct DeflateDecompressor {
    inner: ZlibDecoder<Vec<u8>>,
}

impl DeflateDecompressor {
    fn new() -> Self {
        Self {
            inner: ZlibDecoder::new(Vec::new()),
        }
    }
}

impl Transform for DeflateDecompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut sink = mem::take(self.inner.get_mut());
        sink.clear();
        self.inner = ZlibDecoder::new(sink);
        Ok(())
    }
}

struct ZstdDecompressor {
    inner: ZstdDecoder<'static, Vec<u8>>,
}

impl ZstdDecompressor {
    fn new() -> io::Result<Self> {
        Ok(Self {
            inner: ZstdDecoder::new(Vec::new())?,
        })
    }
}

impl Transform for ZstdDecompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.flush()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        let mut sink = mem::take(self.inner.get_mut());
        sink.clear();
        self.inner = ZstdDecoder::new(sink)?;
        Ok(())
    }
}

struct BrotliDecompressor {
    inner: DecompressorWriter<Vec<u8>>,
}

impl BrotliDecompressor {
    fn new() -> Self {
        Self {
            inner: DecompressorWriter::new(Vec::new(), CODEC_BUFFER_SIZE),
        }
    }
}

impl Transform for BrotliDecompressor {
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.inner.write_all(input)
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(mem::take(self.inner.get_mut()))
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        self.inner.flush()?;
        Ok(self.take_output())
    }

    fn reset(&mut self) -> io::Result<()> {
        self.inner = DecompressorWriter::new(Vec::new(), CODEC_BUFFER_SIZE);
        Ok(())
    }
}

fn finished_stream() -> io::Error {
    io::Error::other("brotli stream already finished")
}

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::codec::{Codec, Transform};
use crate::error::Error;

/// Idle transform instances for one codec in one direction.
///
/// Every instance in the idle list has been reset before release, so checkout
/// never observes state from a previous request.
pub(crate) struct CodecPool {
    idle: Mutex<Vec<Box<dyn Transform>>>,
}

impl CodecPool {
    pub(crate) fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }

    fn checkout(&self) -> Option<Box<dyn Transform>> {
        self.idle.lock().pop()
    }

    fn put_back(&self, transform: Box<dyn Transform>) {
        self.idle.lock().push(transform);
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

/// Resets a transform and returns it to its pool. A transform that fails to
/// rebind is discarded instead of pooled.
fn release(pool: &CodecPool, mut transform: Box<dyn Transform>) {
    if transform.reset().is_ok() {
        pool.put_back(transform);
    }
}

/// Sole-owner handle on a pooled streaming compressor.
///
/// `close` must be called exactly once; writing afterwards, or closing twice,
/// is a contract violation reported as [`Error::Closed`]. Dropping an unclosed
/// handle (a cancelled response) still resets and returns the instance.
pub(crate) struct PooledCompressor {
    transform: Option<Box<dyn Transform>>,
    pool: Arc<CodecPool>,
    bytes_in: u64,
}

impl PooledCompressor {
    pub(crate) fn acquire(pool: Arc<CodecPool>, codec: Codec, level: u32) -> io::Result<Self> {
        let transform = match pool.checkout() {
            Some(t) => {
                tracing::trace!(codec = codec.token(), "reusing pooled compressor");
                t
            }
            None => codec.new_compressor(level)?,
        };
        Ok(Self {
            transform: Some(transform),
            pool,
            bytes_in: 0,
        })
    }

    pub(crate) fn write(&mut self, input: &[u8]) -> Result<usize, Error> {
        let transform = self
            .transform
            .as_mut()
            .ok_or(Error::Closed("write to a closed compressor"))?;
        transform.write(input)?;
        self.bytes_in += input.len() as u64;
        Ok(input.len())
    }

    /// Bytes accepted from the producer so far, before compression.
    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_in
    }

    pub(crate) fn take_output(&mut self) -> Bytes {
        match &mut self.transform {
            Some(t) => t.take_output(),
            None => Bytes::new(),
        }
    }

    /// Finalizes the stream trailer, rebinds the codec to a fresh stream, and
    /// returns the instance to the pool, all before returning. The trailer
    /// bytes are handed back to the caller.
    pub(crate) fn close(&mut self) -> Result<Bytes, Error> {
        let mut transform = self
            .transform
            .take()
            .ok_or(Error::Closed("close of an already-closed compressor"))?;
        // A transform whose trailer fails to write is discarded, not pooled.
        let trailer = transform.finish()?;
        release(&self.pool, transform);
        Ok(trailer)
    }
}

impl Drop for PooledCompressor {
    fn drop(&mut self) {
        // Cancellation path: the owner never reached close. Reset and return
        // the instance so it is not leaked.
        if let Some(transform) = self.transform.take() {
            release(&self.pool, transform);
        }
    }
}

/// Sole-owner handle on a pooled streaming decompressor.
///
/// Unlike the compressor, `close` is idempotent: a consumer may close eagerly
/// on cancellation and cleanup may close again. Feeding data after close is
/// still a contract violation.
pub(crate) struct PooledDecompressor {
    transform: Option<Box<dyn Transform>>,
    pool: Arc<CodecPool>,
}

impl PooledDecompressor {
    pub(crate) fn acquire(pool: Arc<CodecPool>, codec: Codec) -> io::Result<Self> {
        let transform = match pool.checkout() {
            Some(t) => {
                tracing::trace!(codec = codec.token(), "reusing pooled decompressor");
                t
            }
            None => codec.new_decompressor()?,
        };
        Ok(Self {
            transform: Some(transform),
            pool,
        })
    }

    pub(crate) fn write(&mut self, input: &[u8]) -> Result<(), Error> {
        let transform = self
            .transform
            .as_mut()
            .ok_or(Error::Closed("read from a closed decompressor"))?;
        transform.write(input)?;
        Ok(())
    }

    pub(crate) fn take_output(&mut self) -> Bytes {
        match &mut self.transform {
            Some(t) => t.take_output(),
            None => Bytes::new(),
        }
    }

    /// Drives out whatever decompressed output remains once the input stream
    /// has ended.
    pub(crate) fn finish(&mut self) -> Result<Bytes, Error> {
        let transform = self
            .transform
            .as_mut()
            .ok_or(Error::Closed("read from a closed decompressor"))?;
        Ok(transform.finish()?)
    }

    /// Resets the instance and returns it to the pool. Repeated calls after
    /// the first are no-ops.
    pub(crate) fn close(&mut self) -> Result<(), Error> {
        if let Some(transform) = self.transform.take() {
            release(&self.pool, transform);
        }
        Ok(())
    }
}

impl Drop for PooledDecompressor {
    fn drop(&mut self) {
        if let Some(transform) = self.transform.take() {
            release(&self.pool, transform);
        }
    }
}

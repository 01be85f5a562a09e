use std::io;

use tracing::debug;

use crate::metadata::{decode_candidate, CameraMetadata, Decode};
use crate::sei::SeiScanner;

/// How much stream tail to keep between chunks. A heuristic, not a protocol
/// value; payloads starting further back than this before a trim point are
/// lost, an accepted limitation.
pub const DEFAULT_RETAIN_BYTES: usize = 100_000;

/// Accumulates demuxed stream chunks and scans for the first decodable
/// metadata record. A marker may straddle a chunk boundary, so every pass
/// scans the whole retained buffer, and the buffer is only trimmed *after*
/// a pass so nothing present is ever cut mid-scan.
pub struct StreamExtractor {
    buf: Vec<u8>,
    retain_bytes: usize,
}

impl Default for StreamExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamExtractor {
    pub fn new() -> Self {
        Self::with_retain_bytes(DEFAULT_RETAIN_BYTES)
    }

    pub fn with_retain_bytes(retain_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            retain_bytes,
        }
    }

    /// Append one chunk and scan. Returns the first decoded record, if any
    /// occurrence in the current buffer validates.
    pub fn push(&mut self, chunk: &[u8]) -> Option<CameraMetadata> {
        self.buf.extend_from_slice(chunk);

        let found = SeiScanner::new(&self.buf).find_map(|c| match decode_candidate(&c) {
            Decode::Decoded(m) => Some(m),
            Decode::Rejected => None,
        });

        if self.buf.len() > self.retain_bytes {
            let cut = self.buf.len() - self.retain_bytes;
            self.buf.drain(..cut);
        }

        found
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Drive a chunk producer to the first decoded record. First match wins;
/// later records, e.g. from a mid-recording camera change, are ignored.
/// An exhausted producer with no match is `Ok(None)`; the caller substitutes
/// defaults. Read errors from the producer propagate.
pub fn extract_metadata<I>(chunks: I, retain_bytes: usize) -> io::Result<Option<CameraMetadata>>
where
    I: IntoIterator<Item = io::Result<Vec<u8>>>,
{
    let mut extractor = StreamExtractor::with_retain_bytes(retain_bytes);
    let mut chunk_count = 0u64;
    for chunk in chunks {
        let chunk = chunk?;
        chunk_count += 1;
        if let Some(found) = extractor.push(&chunk) {
            debug!(
                camera = %found.camera,
                start = %found.start_time(),
                chunk = chunk_count,
                "embedded metadata found"
            );
            return Ok(Some(found));
        }
    }
    debug!(chunks = chunk_count, "stream exhausted without metadata");
    Ok(None)
}

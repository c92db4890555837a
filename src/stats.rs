use std::time::{Duration, Instant};

/// Snapshot of a finished transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferStats {
    /// Backend that received the stream (`filesystem`, `s3`, `gcs`, `discard`).
    pub backend: &'static str,
    /// Bytes read from the source stream.
    pub bytes: u64,
    /// Object parts sent; 0 for backends without parts.
    pub parts: u32,
    pub elapsed: Duration,
}

/// Internal tracker filled in while a transfer runs.
pub(crate) struct TransferTracker {
    backend: &'static str,
    started: Instant,
    bytes: u64,
    parts: u32,
}

impl TransferTracker {
    pub fn start(backend: &'static str) -> Self {
        Self {
            backend,
            started: Instant::now(),
            bytes: 0,
            parts: 0,
        }
    }

    pub fn record_bytes(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    pub fn record_part(&mut self, bytes: u64) {
        self.bytes += bytes;
        self.parts += 1;
    }

    pub fn finish(self) -> TransferStats {
        TransferStats {
            backend: self.backend,
            bytes: self.bytes,
            parts: self.parts,
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tracker_is_empty() {
        let stats = TransferTracker::start("discard").finish();
        assert_eq!(stats.backend, "discard");
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.parts, 0);
    }

    #[test]
    fn record_bytes_accumulates() {
        let mut t = TransferTracker::start("filesystem");
        t.record_bytes(1024);
        t.record_bytes(512);
        let stats = t.finish();
        assert_eq!(stats.bytes, 1536);
        assert_eq!(stats.parts, 0);
    }

    #[test]
    fn record_part_counts_parts_and_bytes() {
        let mut t = TransferTracker::start("s3");
        t.record_part(256);
        t.record_part(128);
        let stats = t.finish();
        assert_eq!(stats.bytes, 384);
        assert_eq!(stats.parts, 2);
    }
}

//! Built-in sample consumers of the acquisition daemon.

use daq_core::escape::add_backslash_sequences;
use daq_core::time::format_time_tag;
use daq_distribution::SampleClient;
use daq_pool::Sample;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Bytes of each sample shown in the debug log.
const PREVIEW_LEN: usize = 64;

/// Logs every sample at debug level with an escaped preview of its bytes.
#[derive(Debug, Default)]
pub struct LogClient;

impl SampleClient<u8> for LogClient {
    fn receive(&self, sample: &Sample<u8>) -> bool {
        let data = sample.data();
        let preview = &data[..data.len().min(PREVIEW_LEN)];
        debug!(
            id = %sample.id(),
            time = %format_time_tag(sample.time_tag()),
            len = data.len(),
            data = %add_backslash_sequences(preview),
            "sample"
        );
        true
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Counts samples and bytes received.
#[derive(Debug, Default)]
pub struct CountingClient {
    samples: AtomicU64,
    bytes: AtomicU64,
}

impl CountingClient {
    /// Samples received so far.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Data bytes received so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl SampleClient<u8> for CountingClient {
    fn receive(&self, sample: &Sample<u8>) -> bool {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(sample.data_byte_length() as u64, Ordering::Relaxed);
        true
    }

    fn name(&self) -> &str {
        "counter"
    }
}

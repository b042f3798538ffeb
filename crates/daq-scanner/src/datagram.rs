//! One sample per datagram.
//!
//! A fill performs one blocking read, then keeps reading while further packets are
//! already queued and fit in the remaining space. Each packet's length and arrival
//! time are recorded so packets stay distinct even though they share the buffer.

use crate::buffer::ScanBuffer;
use crate::scanner::{read_source, FillResult, ScanContext};
use crate::source::SensorSource;
use crate::stats::ScannerStats;
use daq_core::{DaqError, SampleClock, TimeTag};
use daq_pool::SampleMut;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::warn;

pub(crate) struct DatagramFramer {
    null_terminate: bool,
    packets: VecDeque<(usize, TimeTag)>,
    truncation_logged: bool,
}

impl DatagramFramer {
    pub fn new(null_terminate: bool) -> Self {
        Self {
            null_terminate,
            packets: VecDeque::new(),
            truncation_logged: false,
        }
    }

    pub fn fill<S: SensorSource + ?Sized>(
        &mut self,
        source: &mut S,
        buffer: &mut ScanBuffer,
        stats: &mut ScannerStats,
        clock: &dyn SampleClock,
        timeout: Option<Duration>,
    ) -> Result<FillResult, DaqError> {
        // Packets not yet taken by next() are dropped with the buffer.
        buffer.clear();
        self.packets.clear();

        let Some(n) = read_source(source, buffer.spare_mut(), timeout)? else {
            return Ok(FillResult {
                bytes_read: 0,
                exhausted: true,
            });
        };
        if n == buffer.capacity() && !self.truncation_logged {
            warn!(
                sensor = source.name(),
                buffer_size = buffer.capacity(),
                "Datagram filled the scan buffer and may have been truncated"
            );
            self.truncation_logged = true;
        }
        self.record(n, buffer, stats, clock);
        let mut total = n;

        while let Some(len) = source.pending_packet_len()? {
            if len > buffer.spare_mut().len() {
                break;
            }
            match read_source(source, buffer.spare_mut(), timeout)? {
                Some(n) => {
                    self.record(n, buffer, stats, clock);
                    total += n;
                }
                None => break,
            }
        }
        Ok(FillResult {
            bytes_read: total,
            exhausted: false,
        })
    }

    fn record(
        &mut self,
        n: usize,
        buffer: &mut ScanBuffer,
        stats: &mut ScannerStats,
        clock: &dyn SampleClock,
    ) {
        buffer.advance_head(n);
        stats.add_bytes(n);
        self.packets.push_back((n, clock.now()));
    }

    pub fn next(&mut self, ctx: &mut ScanContext<'_>) -> Result<Option<SampleMut<u8>>, DaqError> {
        let Some((len, tt)) = self.packets.pop_front() else {
            return Ok(None);
        };
        let nterm = usize::from(self.null_terminate);
        let mut out = ctx.pool.acquire(len + nterm)?;
        out.set_id(ctx.id);
        out.set_time_tag(tt);
        let data = out.data_mut();
        data[..len].copy_from_slice(&ctx.buffer.unread()[..len]);
        if nterm == 1 {
            data[len] = 0;
        }
        ctx.buffer.consume(len);
        ctx.stats.add_sample(len + nterm);
        Ok(Some(out))
    }
}

//! Driver-framed records.
//!
//! Each record starts with a packed header written by the acquisition driver:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | time of day in driver ticks (`u32`)     |
//! | 4      | 2    | payload length in bytes (`u16`)         |
//!
//! followed by the payload. Both fields use the driver's byte order. The payload
//! becomes the sample data; a record whose time does not pass the clock's sanity
//! check is skipped and counted.

use crate::scanner::ScanContext;
use daq_core::config::ByteOrder;
use daq_core::{DaqError, TimeTag};
use daq_pool::SampleMut;
use tracing::{debug, warn};

/// Size of the driver record header.
pub const DRIVER_HEADER_LEN: usize = 6;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverHeader {
    /// Time of day in driver ticks.
    pub ticks: u32,
    /// Payload length.
    pub length: u16,
}

impl DriverHeader {
    /// Decode a header from its packed form.
    pub fn decode(raw: [u8; DRIVER_HEADER_LEN], order: ByteOrder) -> Self {
        let ticks = [raw[0], raw[1], raw[2], raw[3]];
        let length = [raw[4], raw[5]];
        match order {
            ByteOrder::Little => Self {
                ticks: u32::from_le_bytes(ticks),
                length: u16::from_le_bytes(length),
            },
            ByteOrder::Big => Self {
                ticks: u32::from_be_bytes(ticks),
                length: u16::from_be_bytes(length),
            },
        }
    }

    /// Packed form of the header.
    pub fn encode(&self, order: ByteOrder) -> [u8; DRIVER_HEADER_LEN] {
        let (t, l) = match order {
            ByteOrder::Little => (self.ticks.to_le_bytes(), self.length.to_le_bytes()),
            ByteOrder::Big => (self.ticks.to_be_bytes(), self.length.to_be_bytes()),
        };
        [t[0], t[1], t[2], t[3], l[0], l[1]]
    }
}

enum Record {
    Fill { out: SampleMut<u8>, filled: usize },
    Skip { remaining: usize },
}

pub(crate) struct DriverFramer {
    usecs_per_tick: i64,
    byte_order: ByteOrder,
    record: Option<Record>,
}

impl DriverFramer {
    pub fn new(usecs_per_tick: i64, byte_order: ByteOrder) -> Self {
        Self {
            usecs_per_tick,
            byte_order,
            record: None,
        }
    }

    fn begin(&self, ctx: &mut ScanContext<'_>) -> Result<Option<Record>, DaqError> {
        let unread = ctx.buffer.unread();
        if unread.len() < DRIVER_HEADER_LEN {
            return Ok(None);
        }
        let mut raw = [0u8; DRIVER_HEADER_LEN];
        raw.copy_from_slice(&unread[..DRIVER_HEADER_LEN]);
        ctx.buffer.consume(DRIVER_HEADER_LEN);
        let header = DriverHeader::decode(raw, self.byte_order);
        let len = usize::from(header.length);
        let tod: TimeTag = i64::from(header.ticks) * self.usecs_per_tick;

        match ctx.clock.resolve_time_of_day(tod) {
            Some(tt) => {
                let mut out = ctx.pool.acquire(len)?;
                out.set_id(ctx.id);
                out.set_time_tag(tt);
                Ok(Some(Record::Fill { out, filled: 0 }))
            }
            None => {
                ctx.stats.add_bad_time_tag();
                if ctx.stats.bad_time_tags() == 1 {
                    warn!(
                        sensor = ctx.name,
                        ticks = header.ticks,
                        length = len,
                        "Discarding record with bad time tag"
                    );
                } else {
                    debug!(
                        sensor = ctx.name,
                        ticks = header.ticks,
                        bad_time_tags = ctx.stats.bad_time_tags(),
                        "Discarding record with bad time tag"
                    );
                }
                Ok(Some(Record::Skip { remaining: len }))
            }
        }
    }

    pub fn next(&mut self, ctx: &mut ScanContext<'_>) -> Result<Option<SampleMut<u8>>, DaqError> {
        loop {
            let record = match self.record.take() {
                Some(record) => record,
                None => match self.begin(ctx)? {
                    Some(record) => record,
                    None => return Ok(None),
                },
            };
            match record {
                Record::Fill { mut out, mut filled } => {
                    let len = out.len();
                    let n = (len - filled).min(ctx.buffer.available());
                    out.data_mut()[filled..filled + n].copy_from_slice(&ctx.buffer.unread()[..n]);
                    ctx.buffer.consume(n);
                    filled += n;
                    if filled < len {
                        self.record = Some(Record::Fill { out, filled });
                        return Ok(None);
                    }
                    ctx.stats.add_sample(len);
                    return Ok(Some(out));
                }
                Record::Skip { remaining } => {
                    let n = remaining.min(ctx.buffer.available());
                    ctx.buffer.consume(n);
                    if n < remaining {
                        self.record = Some(Record::Skip {
                            remaining: remaining - n,
                        });
                        return Ok(None);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_ticks_then_length() {
        let header = DriverHeader {
            ticks: 0x0102_0304,
            length: 0x0506,
        };
        assert_eq!(
            header.encode(ByteOrder::Little),
            [0x04, 0x03, 0x02, 0x01, 0x06, 0x05]
        );
        assert_eq!(
            header.encode(ByteOrder::Big),
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );
        let raw = [0x04, 0x03, 0x02, 0x01, 0x06, 0x05];
        assert_eq!(DriverHeader::decode(raw, ByteOrder::Little), header);
        assert_ne!(DriverHeader::decode(raw, ByteOrder::Big), header);
    }
}

//! Message stream framing: fixed length, separator at end or beginning of message.
//!
//! A sample under construction survives across fills, so messages may be split over
//! any number of reads. Sample buffers start at an adaptive size and grow by half as
//! needed up to the maximum sample length; a message that would exceed it is emitted
//! truncated and counted as an overflow.

use crate::scanner::ScanContext;
use crate::separator::SeparatorMatcher;
use daq_core::DaqError;
use daq_pool::SampleMut;
use tracing::{debug, warn};

/// Consecutive shorter samples required before the default allocation shrinks.
pub const SHRINK_STREAK: u32 = 100;

/// Adaptive default allocation for the next sample.
///
/// Grows at once to any longer sample; shrinks only after [`SHRINK_STREAK`]
/// consecutive samples more than a quarter shorter, to the longest of them.
#[derive(Debug, Clone)]
pub struct AllocSizer {
    current: usize,
    floor: usize,
    max: usize,
    streak: u32,
    streak_max: usize,
}

impl AllocSizer {
    /// Sizer starting at `floor` that never goes below it or above `max`.
    pub fn new(floor: usize, max: usize) -> Self {
        let floor = floor.clamp(1, max.max(1));
        Self {
            current: floor,
            floor,
            max: max.max(1),
            streak: 0,
            streak_max: 0,
        }
    }

    /// Allocation for the next sample.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Record the length of an emitted sample.
    pub fn observe(&mut self, len: usize) {
        if len > self.current {
            self.current = len.min(self.max);
            self.streak = 0;
            self.streak_max = 0;
        } else if self.current > len + len / 4 {
            self.streak += 1;
            self.streak_max = self.streak_max.max(len);
            if self.streak >= SHRINK_STREAK {
                self.current = self.streak_max.max(self.floor);
                self.streak = 0;
                self.streak_max = 0;
            }
        } else {
            self.streak = 0;
            self.streak_max = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Length,
    Eom,
    Bom,
}

pub(crate) struct StreamFramer {
    mode: Mode,
    matcher: SeparatorMatcher,
    message_length: usize,
    null_terminate: bool,
    max_len: usize,
    sizer: AllocSizer,
    out: Option<SampleMut<u8>>,
    filled: usize,
    /// BOM: separator deposited, fixed-length prefix still being copied.
    after_separator: bool,
}

impl StreamFramer {
    pub fn by_length(message_length: usize, null_terminate: bool, max_len: usize) -> Self {
        let nterm = usize::from(null_terminate);
        Self {
            mode: Mode::Length,
            matcher: SeparatorMatcher::new(Vec::new()),
            message_length,
            null_terminate,
            max_len,
            sizer: AllocSizer::new(message_length + nterm, max_len),
            out: None,
            filled: 0,
            after_separator: false,
        }
    }

    pub fn by_separator(
        separator: Vec<u8>,
        at_eom: bool,
        message_length: usize,
        null_terminate: bool,
        max_len: usize,
    ) -> Self {
        let nterm = usize::from(null_terminate);
        let floor = message_length + separator.len() + nterm;
        Self {
            mode: if at_eom { Mode::Eom } else { Mode::Bom },
            matcher: SeparatorMatcher::new(separator),
            message_length,
            null_terminate,
            max_len,
            sizer: AllocSizer::new(floor, max_len),
            out: None,
            filled: 0,
            after_separator: false,
        }
    }

    pub fn next(&mut self, ctx: &mut ScanContext<'_>) -> Result<Option<SampleMut<u8>>, DaqError> {
        match self.mode {
            Mode::Length => self.next_by_length(ctx),
            Mode::Eom => self.next_eom(ctx),
            Mode::Bom => self.next_bom(ctx),
        }
    }

    fn start(&mut self, ctx: &mut ScanContext<'_>) -> Result<SampleMut<u8>, DaqError> {
        let mut out = ctx.pool.acquire(self.sizer.current())?;
        out.set_id(ctx.id);
        self.filled = 0;
        Ok(out)
    }

    fn take_or_start(&mut self, ctx: &mut ScanContext<'_>) -> Result<SampleMut<u8>, DaqError> {
        match self.out.take() {
            Some(out) => Ok(out),
            None => self.start(ctx),
        }
    }

    /// Make room for `need` more bytes. Returns false when the maximum would be exceeded.
    fn reserve(&mut self, out: &mut SampleMut<u8>, need: usize) -> Result<bool, DaqError> {
        let want = self.filled + need;
        if want <= out.allocated_len() {
            return Ok(true);
        }
        if want > self.max_len {
            return Ok(false);
        }
        let grown = (self.filled + self.filled / 2).max(want).min(self.max_len);
        out.grow(grown)?;
        Ok(true)
    }

    fn push(&mut self, out: &mut SampleMut<u8>, bytes: &[u8]) {
        out.buffer_mut()[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }

    /// Copy up to `n` unread bytes verbatim.
    fn copy_unread(&mut self, out: &mut SampleMut<u8>, n: usize, ctx: &mut ScanContext<'_>) {
        let n = n.min(ctx.buffer.available());
        out.buffer_mut()[self.filled..self.filled + n].copy_from_slice(&ctx.buffer.unread()[..n]);
        ctx.buffer.consume(n);
        self.filled += n;
    }

    fn finish(
        &mut self,
        mut out: SampleMut<u8>,
        ctx: &mut ScanContext<'_>,
    ) -> Result<SampleMut<u8>, DaqError> {
        if self.null_terminate {
            if self.filled + 1 > out.allocated_len() {
                out.grow(self.filled + 1)?;
            }
            self.push(&mut out, &[0]);
        }
        self.complete(out, ctx)
    }

    fn complete(
        &mut self,
        mut out: SampleMut<u8>,
        ctx: &mut ScanContext<'_>,
    ) -> Result<SampleMut<u8>, DaqError> {
        out.set_length(self.filled)?;
        ctx.stats.add_sample(self.filled);
        self.sizer.observe(self.filled);
        self.filled = 0;
        self.after_separator = false;
        Ok(out)
    }

    /// Emit a message that hit the maximum length.
    fn overflow(
        &mut self,
        mut out: SampleMut<u8>,
        ctx: &mut ScanContext<'_>,
    ) -> Result<SampleMut<u8>, DaqError> {
        ctx.stats.add_overflow();
        if ctx.stats.overflows() == 1 {
            warn!(
                sensor = ctx.name,
                max_sample_length = self.max_len,
                "Message exceeded maximum length, truncating"
            );
        } else {
            debug!(
                sensor = ctx.name,
                overflows = ctx.stats.overflows(),
                "Message truncated"
            );
        }
        if self.null_terminate && self.filled > 0 {
            out.buffer_mut()[self.filled - 1] = 0;
        }
        self.complete(out, ctx)
    }

    fn next_by_length(
        &mut self,
        ctx: &mut ScanContext<'_>,
    ) -> Result<Option<SampleMut<u8>>, DaqError> {
        if ctx.buffer.available() == 0 {
            return Ok(None);
        }
        let mut out = self.take_or_start(ctx)?;
        if self.filled == 0 {
            out.set_time_tag(ctx.timing.byte_time(ctx.buffer.tail()));
        }
        let n = self.message_length - self.filled;
        if !self.reserve(&mut out, n)? {
            return self.overflow(out, ctx).map(Some);
        }
        self.copy_unread(&mut out, n, ctx);
        if self.filled == self.message_length {
            return self.finish(out, ctx).map(Some);
        }
        self.out = Some(out);
        Ok(None)
    }

    fn next_eom(&mut self, ctx: &mut ScanContext<'_>) -> Result<Option<SampleMut<u8>>, DaqError> {
        if ctx.buffer.available() == 0 {
            return Ok(None);
        }
        let mut out = self.take_or_start(ctx)?;
        if self.filled == 0 {
            out.set_time_tag(ctx.timing.byte_time(ctx.buffer.tail()));
        }
        if self.filled < self.message_length {
            let n = self.message_length - self.filled;
            if !self.reserve(&mut out, n)? {
                return self.overflow(out, ctx).map(Some);
            }
            self.copy_unread(&mut out, n, ctx);
            if self.filled < self.message_length {
                self.out = Some(out);
                return Ok(None);
            }
        }
        let nterm = usize::from(self.null_terminate);
        while let Some(c) = ctx.buffer.peek() {
            if !self.reserve(&mut out, 1 + nterm)? {
                return self.overflow(out, ctx).map(Some);
            }
            ctx.buffer.consume(1);
            self.push(&mut out, &[c]);
            if self.matcher.step(c).complete {
                return self.finish(out, ctx).map(Some);
            }
        }
        self.out = Some(out);
        Ok(None)
    }

    fn next_bom(&mut self, ctx: &mut ScanContext<'_>) -> Result<Option<SampleMut<u8>>, DaqError> {
        let sep_len = self.matcher.len();
        let nterm = usize::from(self.null_terminate);
        loop {
            if ctx.buffer.available() == 0 {
                return Ok(None);
            }
            let mut out = self.take_or_start(ctx)?;
            if self.after_separator {
                let n = sep_len + self.message_length - self.filled;
                if !self.reserve(&mut out, n)? {
                    return self.overflow(out, ctx).map(Some);
                }
                self.copy_unread(&mut out, n, ctx);
                if self.filled < sep_len + self.message_length {
                    self.out = Some(out);
                    return Ok(None);
                }
                self.after_separator = false;
            }
            if self.filled == 0 {
                out.set_time_tag(ctx.timing.byte_time(ctx.buffer.tail()));
            }
            loop {
                let Some(c) = ctx.buffer.peek() else {
                    self.out = Some(out);
                    return Ok(None);
                };
                if !self.reserve(&mut out, sep_len + nterm)? {
                    return self.overflow(out, ctx).map(Some);
                }
                let index = ctx.buffer.tail();
                ctx.buffer.consume(1);
                let step = self.matcher.step(c);
                if step.released > 0 {
                    let released = self.matcher.pattern()[..step.released].to_vec();
                    self.push(&mut out, &released);
                }
                if !step.consumed {
                    self.push(&mut out, &[c]);
                }
                if !step.complete {
                    continue;
                }
                let bom_time = ctx.timing.byte_time(index)
                    - (sep_len as i64 - 1) * ctx.timing.usecs_per_byte;
                self.matcher.reset();
                let separator = self.matcher.pattern().to_vec();
                if self.filled > 0 {
                    let previous = self.finish(out, ctx)?;
                    let mut next = self.start(ctx)?;
                    self.push(&mut next, &separator);
                    next.set_time_tag(bom_time);
                    self.after_separator = true;
                    self.out = Some(next);
                    return Ok(Some(previous));
                }
                self.push(&mut out, &separator);
                out.set_time_tag(bom_time);
                self.after_separator = true;
                self.out = Some(out);
                break;
            }
        }
    }

    /// Emit whatever has been assembled so far, including a pending partial separator.
    pub fn flush_partial(
        &mut self,
        ctx: &mut ScanContext<'_>,
    ) -> Result<Option<SampleMut<u8>>, DaqError> {
        let pending = if self.mode == Mode::Bom {
            self.matcher.matched()
        } else {
            0
        };
        let Some(mut out) = self.out.take() else {
            return Ok(None);
        };
        if self.filled == 0 && pending == 0 {
            self.out = Some(out);
            return Ok(None);
        }
        if pending > 0 {
            let partial = self.matcher.pattern()[..pending].to_vec();
            if self.filled + pending > out.allocated_len() {
                out.grow(self.filled + pending)?;
            }
            self.push(&mut out, &partial);
        }
        self.matcher.reset();
        self.finish(out, ctx).map(Some)
    }
}

//! Scanner counters.
//!
//! Totals accumulate for the life of the scanner. Minimum and maximum sample lengths
//! and the observed rates are per reporting period: [`ScannerStats::calc_statistics`]
//! closes a period and makes its values visible while the next one accumulates.

use daq_core::limits::USECS_PER_SEC;
use daq_core::TimeTag;

/// Counters kept by every scanner.
#[derive(Debug, Clone)]
pub struct ScannerStats {
    samples: u64,
    bytes: u64,
    bad_time_tags: u64,
    overflows: u64,
    period_samples: u64,
    period_bytes: u64,
    min_len: [usize; 2],
    max_len: [usize; 2],
    current: usize,
    sample_rate: f64,
    data_rate: f64,
}

impl Default for ScannerStats {
    fn default() -> Self {
        Self {
            samples: 0,
            bytes: 0,
            bad_time_tags: 0,
            overflows: 0,
            period_samples: 0,
            period_bytes: 0,
            min_len: [usize::MAX; 2],
            max_len: [0; 2],
            current: 0,
            sample_rate: 0.0,
            data_rate: 0.0,
        }
    }
}

impl ScannerStats {
    /// Count bytes read from the source.
    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
        self.period_bytes += n as u64;
    }

    /// Count one framed sample of `len` bytes.
    pub fn add_sample(&mut self, len: usize) {
        self.samples += 1;
        self.period_samples += 1;
        let c = self.current;
        self.min_len[c] = self.min_len[c].min(len);
        self.max_len[c] = self.max_len[c].max(len);
    }

    /// Count a frame discarded for a failed time tag check.
    pub fn add_bad_time_tag(&mut self) {
        self.bad_time_tags += 1;
    }

    /// Count a frame force-terminated at the maximum size.
    pub fn add_overflow(&mut self) {
        self.overflows += 1;
    }

    /// Close the current reporting period of `period` microseconds.
    pub fn calc_statistics(&mut self, period: TimeTag) {
        if period > 0 {
            let secs = period as f64 / USECS_PER_SEC as f64;
            self.sample_rate = self.period_samples as f64 / secs;
            self.data_rate = self.period_bytes as f64 / secs;
        }
        self.period_samples = 0;
        self.period_bytes = 0;
        self.current ^= 1;
        self.min_len[self.current] = usize::MAX;
        self.max_len[self.current] = 0;
    }

    /// Samples framed since creation.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Bytes read since creation.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Frames dropped because of a bad time tag.
    pub fn bad_time_tags(&self) -> u64 {
        self.bad_time_tags
    }

    /// Frames truncated at the maximum sample length.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Shortest sample in the last closed period, zero if none.
    pub fn min_sample_length(&self) -> usize {
        match self.min_len[self.current ^ 1] {
            usize::MAX => 0,
            n => n,
        }
    }

    /// Longest sample in the last closed period.
    pub fn max_sample_length(&self) -> usize {
        self.max_len[self.current ^ 1]
    }

    /// Samples per second in the last closed period.
    pub fn observed_sampling_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Bytes per second in the last closed period.
    pub fn observed_data_rate(&self) -> f64 {
        self.data_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_values_are_double_buffered() {
        let mut stats = ScannerStats::default();
        stats.add_bytes(100);
        stats.add_sample(10);
        stats.add_sample(30);
        assert_eq!(stats.max_sample_length(), 0);

        stats.calc_statistics(2 * USECS_PER_SEC);
        assert_eq!(stats.min_sample_length(), 10);
        assert_eq!(stats.max_sample_length(), 30);
        assert_eq!(stats.observed_sampling_rate(), 1.0);
        assert_eq!(stats.observed_data_rate(), 50.0);

        stats.add_sample(5);
        assert_eq!(stats.min_sample_length(), 10);
        stats.calc_statistics(USECS_PER_SEC);
        assert_eq!(stats.min_sample_length(), 5);
        assert_eq!(stats.max_sample_length(), 5);
        assert_eq!(stats.samples(), 3);
        assert_eq!(stats.bytes(), 100);
    }
}

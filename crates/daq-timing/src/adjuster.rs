//! Time tag jitter correction for one periodic stream.
//!
//! Raw time tags are arrival times: the true sample time plus a non-negative,
//! variable delay. The adjuster fits an evenly spaced time base `epoch + n * period`
//! underneath the raw tags. Between adjustments the base is only ever moved earlier
//! (when a raw tag arrives before its slot); every adjustment window it is raised by
//! the smallest slack seen, and the period is re-estimated from the observed mean
//! inter-arrival time.
//!
//! The slot of each tag is the nearest whole period after the epoch, but never the
//! same slot as its predecessor. A tag therefore lies within half a corrected period
//! of its slot, however large the jitter.

use daq_core::config::TimetagConfig;
use daq_core::limits::USECS_PER_SEC;
use daq_core::{DaqError, TimeTag};
use tracing::info;

/// Default gap, in nominal periods, that starts a new segment.
pub const DEFAULT_MAX_GAP_PERIODS: f64 = 10.0;

/// Cap on the weight of the running period estimate, in periods.
pub const MAX_PERIOD_WEIGHT: f64 = 100.0;

/// Smallest corrected period in microseconds.
pub const MIN_PERIOD_USECS: f64 = 1.0;

/// Counters kept for post-hoc logging.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjusterStats {
    /// Time tags adjusted.
    pub samples: u64,
    /// Gaps that restarted the time base.
    pub gaps: u64,
    /// Largest gap seen, microseconds.
    pub largest_gap: TimeTag,
    /// Raw time tags earlier than their predecessor.
    pub backwards: u64,
    /// Smallest corrected period, microseconds.
    pub min_period: f64,
    /// Largest corrected period, microseconds.
    pub max_period: f64,
    /// Smallest slack between raw and corrected tags.
    pub min_slack: TimeTag,
    /// Largest slack between raw and corrected tags.
    pub max_slack: TimeTag,
}

impl AdjusterStats {
    fn new(period: f64) -> Self {
        Self {
            samples: 0,
            gaps: 0,
            largest_gap: 0,
            backwards: 0,
            min_period: period,
            max_period: period,
            min_slack: TimeTag::MAX,
            max_slack: TimeTag::MIN,
        }
    }
}

/// Jitter-correcting state machine for one stream.
#[derive(Debug, Clone)]
pub struct TimetagAdjuster {
    nominal_period: f64,
    period: f64,
    weight: f64,
    max_gap: TimeTag,
    window_periods: u64,
    started: bool,
    epoch: TimeTag,
    periods: u64,
    window_samples: u64,
    window_start: TimeTag,
    window_min_slack: TimeTag,
    last_raw: TimeTag,
    last_adjusted: TimeTag,
    stats: AdjusterStats,
}

impl TimetagAdjuster {
    /// Adjuster for a stream of `rate_hz`, re-estimating every `adjust_secs` and
    /// restarting after gaps longer than `max_gap_secs`.
    pub fn new(rate_hz: f64, adjust_secs: f64, max_gap_secs: f64) -> Result<Self, DaqError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(DaqError::Configuration(format!(
                "rate {rate_hz} Hz must be positive"
            )));
        }
        if !(adjust_secs.is_finite() && adjust_secs > 0.0) {
            return Err(DaqError::Configuration(format!(
                "adjust window {adjust_secs} s must be positive"
            )));
        }
        if !(max_gap_secs.is_finite() && max_gap_secs > 0.0) {
            return Err(DaqError::Configuration(format!(
                "max gap {max_gap_secs} s must be positive"
            )));
        }
        let period = (USECS_PER_SEC as f64 / rate_hz).max(MIN_PERIOD_USECS);
        Ok(Self {
            nominal_period: period,
            period,
            weight: 0.0,
            max_gap: (max_gap_secs * USECS_PER_SEC as f64).round() as TimeTag,
            window_periods: ((adjust_secs * rate_hz).round() as u64).max(1),
            started: false,
            epoch: 0,
            periods: 0,
            window_samples: 0,
            window_start: 0,
            window_min_slack: TimeTag::MAX,
            last_raw: 0,
            last_adjusted: TimeTag::MIN,
            stats: AdjusterStats::new(period),
        })
    }

    /// Adjuster with the default max gap of ten nominal periods.
    pub fn with_default_gap(rate_hz: f64, adjust_secs: f64) -> Result<Self, DaqError> {
        Self::new(rate_hz, adjust_secs, DEFAULT_MAX_GAP_PERIODS / rate_hz)
    }

    /// Adjuster from a sensor's time tag configuration.
    pub fn from_config(config: &TimetagConfig) -> Result<Self, DaqError> {
        config.validate()?;
        match config.max_gap_secs {
            Some(gap) => Self::new(config.rate_hz, config.adjust_secs, gap),
            None => Self::with_default_gap(config.rate_hz, config.adjust_secs),
        }
    }

    /// Nominal period in microseconds.
    pub fn nominal_period(&self) -> f64 {
        self.nominal_period
    }

    /// Current corrected period estimate in microseconds.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Samples per adjustment window, one per nominal period.
    pub fn window_periods(&self) -> u64 {
        self.window_periods
    }

    /// Gap that restarts the time base, microseconds.
    pub fn max_gap(&self) -> TimeTag {
        self.max_gap
    }

    /// Counters.
    pub fn stats(&self) -> &AdjusterStats {
        &self.stats
    }

    fn restart(&mut self, tt: TimeTag) {
        self.epoch = tt;
        self.periods = 0;
        self.window_samples = 0;
        self.window_start = tt;
        self.window_min_slack = TimeTag::MAX;
        self.last_raw = tt;
    }

    /// Corrected time tag for raw time tag `tt`.
    pub fn adjust(&mut self, tt: TimeTag) -> TimeTag {
        self.stats.samples += 1;
        if !self.started {
            self.started = true;
            self.restart(tt);
            self.last_adjusted = tt;
            return tt;
        }

        let dt = tt - self.last_raw;
        if dt < 0 {
            self.stats.backwards += 1;
            self.last_raw = tt;
            return tt;
        }
        if dt > self.max_gap {
            self.stats.gaps += 1;
            self.stats.largest_gap = self.stats.largest_gap.max(dt);
            self.restart(tt);
            self.last_adjusted = self.last_adjusted.max(tt);
            return tt;
        }

        let slot = ((tt - self.epoch) as f64 / self.period).round().max(0.0) as u64;
        self.periods = slot.max(self.periods + 1);
        let mut candidate = self.epoch + (self.periods as f64 * self.period).round() as TimeTag;
        let mut slack = tt - candidate;
        if slack < 0 {
            // Raw tag came before its slot: the base is late by the deficit.
            self.epoch += slack;
            candidate = tt;
            slack = 0;
        }
        self.window_min_slack = self.window_min_slack.min(slack);
        self.window_samples += 1;
        self.stats.min_slack = self.stats.min_slack.min(slack);
        self.stats.max_slack = self.stats.max_slack.max(slack);

        if self.window_samples >= self.window_periods {
            let n = self.window_samples as f64;
            let observed = (tt - self.window_start) as f64 / n;
            self.period = ((self.period * self.weight + observed * n) / (self.weight + n))
                .max(MIN_PERIOD_USECS);
            self.weight = (self.weight + n).min(MAX_PERIOD_WEIGHT);
            self.stats.min_period = self.stats.min_period.min(self.period);
            self.stats.max_period = self.stats.max_period.max(self.period);

            candidate += self.window_min_slack;
            self.epoch = candidate;
            self.periods = 0;
            self.window_samples = 0;
            self.window_start = tt;
            self.window_min_slack = TimeTag::MAX;
        }

        let adjusted = candidate.max(self.last_adjusted + 1);
        self.last_adjusted = adjusted;
        self.last_raw = tt;
        adjusted
    }

    /// Log the counters at `info`.
    pub fn log_statistics(&self, name: &str) {
        let s = &self.stats;
        info!(
            stream = name,
            samples = s.samples,
            nominal_period_us = self.nominal_period,
            min_period_us = s.min_period,
            max_period_us = s.max_period,
            min_slack_us = if s.min_slack == TimeTag::MAX { 0 } else { s.min_slack },
            max_slack_us = if s.max_slack == TimeTag::MIN { 0 } else { s.max_slack },
            gaps = s.gaps,
            largest_gap_us = s.largest_gap,
            backwards = s.backwards,
            "Time tag adjustment statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_rates() {
        assert!(TimetagAdjuster::new(0.0, 10.0, 1.0).is_err());
        assert!(TimetagAdjuster::new(100.0, -1.0, 1.0).is_err());
        assert!(TimetagAdjuster::new(f64::NAN, 10.0, 1.0).is_err());
        assert!(TimetagAdjuster::new(100.0, 10.0, 0.0).is_err());
    }

    #[test]
    fn derived_parameters() {
        let adj = TimetagAdjuster::with_default_gap(50.0, 2.0).unwrap();
        assert_eq!(adj.nominal_period(), 20_000.0);
        assert_eq!(adj.window_periods(), 100);
        assert_eq!(adj.max_gap(), 200_000);
    }

    #[test]
    fn early_arrival_pulls_epoch_back() {
        let mut adj = TimetagAdjuster::with_default_gap(100.0, 10.0).unwrap();
        assert_eq!(adj.adjust(1_000_500), 1_000_500);
        assert_eq!(adj.adjust(1_010_500), 1_010_500);
        // arrives 400us before its slot
        assert_eq!(adj.adjust(1_020_100), 1_020_100);
        // following slots are on the new base
        assert_eq!(adj.adjust(1_030_900), 1_030_100);
    }

    #[test]
    fn backwards_tags_pass_through() {
        let mut adj = TimetagAdjuster::with_default_gap(100.0, 10.0).unwrap();
        adj.adjust(1_000_000);
        adj.adjust(1_010_000);
        assert_eq!(adj.adjust(1_005_000), 1_005_000);
        assert_eq!(adj.stats().backwards, 1);
    }

    #[test]
    fn dropped_samples_skip_slots() {
        let mut adj = TimetagAdjuster::with_default_gap(100.0, 10.0).unwrap();
        adj.adjust(1_000_000);
        adj.adjust(1_010_200);
        assert_eq!(adj.adjust(1_040_300), 1_040_000);
        assert_eq!(adj.adjust(1_050_100), 1_050_000);
    }

    #[test]
    fn heavy_jitter_keeps_period_and_bound() {
        let period = 10_000;
        let mut adj = TimetagAdjuster::with_default_gap(100.0, 1.0).unwrap();
        let mut last = TimeTag::MIN;
        for i in 0..5000 {
            // scattered over 0..90% of a period
            let jitter = ((i * 7919) % 100) * period * 9 / 1000;
            let tt = 1_000_000 + i * period + jitter;
            let out = adj.adjust(tt);
            assert!(out > last);
            assert!(out <= tt);
            assert!(tt - out < period, "tag {i}: {out} too far before {tt}");
            last = out;
        }
        let drift = (adj.period() - period as f64).abs() / period as f64;
        assert!(drift < 0.02, "period drifted to {}", adj.period());
    }

    #[test]
    fn gap_restarts_base() {
        let mut adj = TimetagAdjuster::with_default_gap(100.0, 10.0).unwrap();
        adj.adjust(1_000_000);
        adj.adjust(1_010_000);
        assert_eq!(adj.adjust(2_000_123), 2_000_123);
        assert_eq!(adj.stats().gaps, 1);
        assert_eq!(adj.stats().largest_gap, 990_123);
        assert_eq!(adj.adjust(2_010_900), 2_010_123);
    }
}

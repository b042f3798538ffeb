//! Per-sensor acquisition loop: source → scanner → time tag correction → distribution.
//!
//! Each enabled sensor gets one [`SensorPipeline`] running on its own blocking
//! thread. The pipeline performs one read at a time, drains every complete sample the
//! scanner can frame from it, optionally corrects the sample's time tag, and
//! publishes it to the shared [`SampleSource`]. Time tags are corrected per sample
//! id, so a source that interleaves several streams keeps one time base for each.

use crate::sources::open_source;
use daq_core::config::{ApplicationConfig, SensorConfig};
use daq_core::limits::USECS_PER_SEC;
use daq_core::{DaqError, SampleClock};
use daq_distribution::SampleSource;
use daq_pool::{SampleMut, SamplePool};
use daq_scanner::{SampleScanner, ScannerSettings, SensorSource};
use daq_timing::AdjusterSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Read timeout used when a sensor configures none, so stop requests are noticed.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of one [`SensorPipeline::poll_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A read completed and this many samples were published.
    Data {
        /// Samples published.
        samples: usize,
    },
    /// The read timed out with no data.
    Timeout,
    /// The source has no more data. Any partial message was published.
    Exhausted {
        /// Samples published, including a flushed partial message.
        samples: usize,
    },
}

/// Totals of a finished pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Sensor name.
    pub name: String,
    /// Samples framed by the scanner.
    pub samples: u64,
    /// Bytes read from the source.
    pub bytes: u64,
    /// Driver records dropped for an unusable time tag.
    pub bad_time_tags: u64,
    /// Messages truncated at the maximum sample length.
    pub overflows: u64,
}

/// Acquisition loop of one sensor.
pub struct SensorPipeline {
    name: String,
    source: Box<dyn SensorSource>,
    scanner: SampleScanner,
    adjusters: Option<AdjusterSet>,
    distributor: Arc<SampleSource<u8>>,
    read_timeout: Duration,
    stats_interval: Option<Duration>,
    last_stats: Instant,
}

impl SensorPipeline {
    /// Assemble a pipeline from parts.
    pub fn new(
        source: Box<dyn SensorSource>,
        scanner: SampleScanner,
        adjusters: Option<AdjusterSet>,
        distributor: Arc<SampleSource<u8>>,
    ) -> Self {
        Self {
            name: source.name().to_string(),
            source,
            scanner,
            adjusters,
            distributor,
            read_timeout: DEFAULT_POLL_TIMEOUT,
            stats_interval: None,
            last_stats: Instant::now(),
        }
    }

    /// Open the sensor's source and build its scanner and time tag adjusters.
    pub fn from_config(
        sensor: &SensorConfig,
        app: &ApplicationConfig,
        pool: SamplePool<u8>,
        clock: Arc<dyn SampleClock>,
        distributor: Arc<SampleSource<u8>>,
    ) -> Result<Self, DaqError> {
        let settings = ScannerSettings::from_config(&sensor.scanner)?;
        let scanner = SampleScanner::new(settings, pool, clock)?;
        let adjusters = sensor.timetag.clone().map(AdjusterSet::new).transpose()?;
        let source = open_source(sensor)?;

        let mut pipeline = Self::new(source, scanner, adjusters, distributor)
            .with_read_timeout(sensor.scanner.read_timeout().unwrap_or(DEFAULT_POLL_TIMEOUT));
        if app.stats_interval_secs > 0 {
            pipeline = pipeline.with_stats_interval(Duration::from_secs(app.stats_interval_secs));
        }
        Ok(pipeline)
    }

    /// Bound each read to `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Log scanner statistics every `interval`.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    /// Sensor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sensor's scanner.
    pub fn scanner(&self) -> &SampleScanner {
        &self.scanner
    }

    /// The sensor's time tag adjusters, if configured.
    pub fn adjusters(&self) -> Option<&AdjusterSet> {
        self.adjusters.as_ref()
    }

    /// Perform one read and publish every sample it completes.
    ///
    /// Timeouts are not errors. I/O failures are returned and end the pipeline.
    pub fn poll_once(&mut self) -> Result<PollOutcome, DaqError> {
        let fill = match self
            .scanner
            .fill(self.source.as_mut(), Some(self.read_timeout))
        {
            Ok(fill) => fill,
            Err(e) if e.is_timeout() => {
                trace!(sensor = %self.name, "Read timed out");
                return Ok(PollOutcome::Timeout);
            }
            Err(e) => return Err(e),
        };

        let mut samples = self.drain()?;
        if fill.exhausted {
            if let Some(partial) = self.scanner.flush_partial(self.source.as_ref())? {
                self.publish(partial)?;
                samples += 1;
            }
            debug!(sensor = %self.name, "Source exhausted");
            return Ok(PollOutcome::Exhausted { samples });
        }
        Ok(PollOutcome::Data { samples })
    }

    fn drain(&mut self) -> Result<usize, DaqError> {
        let mut count = 0;
        while let Some(sample) = self.scanner.next_sample(self.source.as_ref())? {
            self.publish(sample)?;
            count += 1;
        }
        Ok(count)
    }

    fn publish(&mut self, mut sample: SampleMut<u8>) -> Result<(), DaqError> {
        if let Some(adjusters) = &mut self.adjusters {
            let tt = adjusters.adjust(sample.id(), sample.time_tag())?;
            sample.set_time_tag(tt);
        }
        self.distributor.publish(sample.freeze());
        Ok(())
    }

    /// Poll until `stop` is set or the source is exhausted.
    pub fn run(mut self, stop: &AtomicBool) -> Result<PipelineSummary, DaqError> {
        info!(sensor = %self.name, scanner = ?self.scanner, "Acquisition started");
        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }
            match self.poll_once() {
                Ok(PollOutcome::Exhausted { .. }) => break Ok(()),
                Ok(_) => self.maybe_report_stats(),
                Err(e) => break Err(e),
            }
        };
        if let Some(adjusters) = &self.adjusters {
            adjusters.log_statistics();
        }
        result?;
        let summary = self.summary();
        info!(
            sensor = %summary.name,
            samples = summary.samples,
            bytes = summary.bytes,
            "Acquisition finished"
        );
        Ok(summary)
    }

    fn maybe_report_stats(&mut self) {
        let Some(interval) = self.stats_interval else {
            return;
        };
        let elapsed = self.last_stats.elapsed();
        if elapsed < interval {
            return;
        }
        self.last_stats = Instant::now();
        let period = (elapsed.as_secs_f64() * USECS_PER_SEC as f64) as i64;
        self.scanner.calc_statistics(period);
        let stats = self.scanner.stats();
        info!(
            sensor = %self.name,
            samples = stats.samples(),
            bytes = stats.bytes(),
            sample_rate = stats.observed_sampling_rate(),
            data_rate = stats.observed_data_rate(),
            min_len = stats.min_sample_length(),
            max_len = stats.max_sample_length(),
            bad_time_tags = stats.bad_time_tags(),
            overflows = stats.overflows(),
            "Scanner statistics"
        );
    }

    /// Totals so far.
    pub fn summary(&self) -> PipelineSummary {
        let stats = self.scanner.stats();
        PipelineSummary {
            name: self.name.clone(),
            samples: stats.samples(),
            bytes: stats.bytes(),
            bad_time_tags: stats.bad_time_tags(),
            overflows: stats.overflows(),
        }
    }
}

impl std::fmt::Debug for SensorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorPipeline")
            .field("name", &self.name)
            .field("scanner", &self.scanner)
            .field("adjusted", &self.adjusters.is_some())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CountingClient;
    use daq_core::config::TimetagConfig;
    use daq_core::{ManualClock, SampleId};
    use daq_distribution::SampleClient;
    use daq_pool::Sample;
    use daq_scanner::{Framing, ScriptedSource};
    use parking_lot::Mutex;

    const ID: SampleId = SampleId::new(2, 7);
    const NOON: i64 = 12 * 3600 * USECS_PER_SEC;

    fn pipeline(
        source: ScriptedSource,
        framing: Framing,
        adjusters: Option<AdjusterSet>,
        clock: Arc<ManualClock>,
    ) -> (SensorPipeline, Arc<SampleSource<u8>>, SamplePool<u8>) {
        let pool = SamplePool::new();
        let scanner =
            SampleScanner::new(ScannerSettings::new(framing), pool.clone(), clock).unwrap();
        let distributor = Arc::new(SampleSource::new());
        let p = SensorPipeline::new(Box::new(source), scanner, adjusters, Arc::clone(&distributor));
        (p, distributor, pool)
    }

    #[test]
    fn publishes_lines_and_flushes_partial_at_end() {
        let mut source = ScriptedSource::stream("gps", ID);
        source.push_timeout().push_data(&b"$A\n$B\n$C"[..]);
        let clock = Arc::new(ManualClock::new(NOON));
        let (mut p, distributor, pool) =
            pipeline(source, Framing::separator(b"\n".to_vec(), true), None, clock);
        let counter = Arc::new(CountingClient::default());
        let client: Arc<dyn SampleClient<u8>> = counter.clone();
        distributor.subscribe_for(&client, ID);

        assert_eq!(p.poll_once().unwrap(), PollOutcome::Timeout);
        assert_eq!(p.poll_once().unwrap(), PollOutcome::Data { samples: 2 });
        assert_eq!(p.poll_once().unwrap(), PollOutcome::Exhausted { samples: 1 });
        assert_eq!(counter.samples(), 3);
        // "$A\n\0" "$B\n\0" "$C\0"
        assert_eq!(counter.bytes(), 11);
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[test]
    fn io_errors_end_the_run() {
        let mut source = ScriptedSource::stream("gps", ID);
        source.push_data(&b"x\n"[..]).push_error(std::io::ErrorKind::BrokenPipe);
        let clock = Arc::new(ManualClock::new(NOON));
        let (p, _, _) = pipeline(source, Framing::separator(b"\n".to_vec(), true), None, clock);
        let err = p.run(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, DaqError::Io(_)));
    }

    #[test]
    fn stop_flag_ends_the_run() {
        let mut source = ScriptedSource::stream("gps", ID);
        source.push_data(&b"x\n"[..]);
        let clock = Arc::new(ManualClock::new(NOON));
        let (p, _, _) = pipeline(source, Framing::separator(b"\n".to_vec(), true), None, clock);
        let summary = p.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.name, "gps");
    }

    fn adjusters_at_100_hz() -> AdjusterSet {
        AdjusterSet::new(TimetagConfig {
            rate_hz: 100.0,
            adjust_secs: 10.0,
            max_gap_secs: None,
        })
        .unwrap()
    }

    fn recorded_time_tags(distributor: &SampleSource<u8>) -> Arc<Mutex<Vec<(SampleId, i64)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let client: Arc<dyn SampleClient<u8>> = Arc::new(move |s: &Sample<u8>| {
            sink.lock().push((s.id(), s.time_tag()));
            true
        });
        distributor.subscribe_all(&client);
        seen
    }

    #[test]
    fn time_tags_are_corrected_before_publishing() {
        let clock = Arc::new(ManualClock::new(NOON));
        let (mut p, distributor, _pool) = pipeline(
            ScriptedSource::packets("imu", ID),
            Framing::Datagram,
            Some(adjusters_at_100_hz()),
            Arc::clone(&clock),
        );
        let seen = recorded_time_tags(&distributor);

        // one packet per fill so each arrives at its own clock reading
        for jitter in [0, 10_700, 20_100, 30_400] {
            clock.set(NOON + jitter);
            let mut one = ScriptedSource::packets("imu", ID);
            one.push_data(&b"p"[..]);
            p.source = Box::new(one);
            assert_eq!(p.poll_once().unwrap(), PollOutcome::Data { samples: 1 });
        }
        let tags: Vec<i64> = seen.lock().iter().map(|(_, tt)| *tt).collect();
        assert_eq!(tags, vec![NOON, NOON + 10_000, NOON + 20_000, NOON + 30_000]);
        let adjusted = p.adjusters().and_then(|set| set.get(ID)).map(|a| a.stats().samples);
        assert_eq!(adjusted, Some(4));
    }

    #[test]
    fn each_sample_id_keeps_its_own_time_base() {
        const OTHER: SampleId = SampleId::new(2, 8);
        let clock = Arc::new(ManualClock::new(NOON));
        let (mut p, distributor, _pool) = pipeline(
            ScriptedSource::packets("imu", ID),
            Framing::Datagram,
            Some(adjusters_at_100_hz()),
            Arc::clone(&clock),
        );
        let seen = recorded_time_tags(&distributor);

        let arrivals = [
            (ID, 0),
            (OTHER, 4_000),
            (ID, 10_600),
            (OTHER, 14_300),
            (ID, 20_200),
            (OTHER, 24_900),
        ];
        for (id, offset) in arrivals {
            clock.set(NOON + offset);
            let mut one = ScriptedSource::packets("imu", id);
            one.push_data(&b"p"[..]);
            p.source = Box::new(one);
            p.poll_once().unwrap();
        }
        assert_eq!(
            *seen.lock(),
            vec![
                (ID, NOON),
                (OTHER, NOON + 4_000),
                (ID, NOON + 10_000),
                (OTHER, NOON + 14_000),
                (ID, NOON + 20_000),
                (OTHER, NOON + 24_000),
            ]
        );
        let set = p.adjusters().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(OTHER).map(|a| a.stats().samples), Some(3));
    }
}

//! Opening sensor sources from configuration.

use daq_core::config::{SensorConfig, SourceConfig};
use daq_core::DaqError;
use daq_scanner::{ReaderSource, SensorSource, UdpSource};
use tracing::info;

/// Open the byte source described by `sensor.source`.
pub fn open_source(sensor: &SensorConfig) -> Result<Box<dyn SensorSource>, DaqError> {
    let id = sensor.sample_id();
    let name = sensor.name.clone();
    let source: Box<dyn SensorSource> = match &sensor.source {
        SourceConfig::File { path } => {
            info!(sensor = %name, path = %path.display(), "Opening file source");
            Box::new(ReaderSource::open(name, id, path)?)
        }
        SourceConfig::Udp { bind } => {
            let source = UdpSource::bind(name, id, bind)?;
            info!(sensor = %sensor.name, addr = %source.local_addr()?, "Bound UDP source");
            Box::new(source)
        }
        SourceConfig::Serial { path, baud_rate } => open_serial(name, sensor, path, *baud_rate)?,
    };
    Ok(source)
}

#[cfg(feature = "serial")]
fn open_serial(
    name: String,
    sensor: &SensorConfig,
    path: &str,
    baud_rate: u32,
) -> Result<Box<dyn SensorSource>, DaqError> {
    info!(sensor = %name, path, baud_rate, "Opening serial port");
    Ok(Box::new(daq_scanner::SerialSource::open(
        name,
        sensor.sample_id(),
        path,
        baud_rate,
    )?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(
    name: String,
    _sensor: &SensorConfig,
    path: &str,
    _baud_rate: u32,
) -> Result<Box<dyn SensorSource>, DaqError> {
    Err(DaqError::Configuration(format!(
        "sensor {}: serial source {} requires the `serial` feature",
        name, path
    )))
}

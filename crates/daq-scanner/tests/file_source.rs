//! Scanning a recorded capture file.

use daq_core::config::ScannerConfig;
use daq_core::{ManualClock, SampleId};
use daq_pool::SamplePool;
use daq_scanner::{ReaderSource, SampleScanner, ScannerSettings};
use std::io::Write;
use std::sync::Arc;

#[test]
fn capture_file_is_framed_from_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..50 {
        write!(file, "$PTEMP,{i},21.{i}\r\n").unwrap();
    }
    file.write_all(b"$PTEMP,partial").unwrap();
    file.flush().unwrap();

    let config = ScannerConfig {
        separator: "\\r\\n".into(),
        buffer_size: Some(64),
        ..ScannerConfig::default()
    };
    let settings = ScannerSettings::from_config(&config).unwrap();
    assert!(settings.null_terminate);

    let id = SampleId::new(2, 300);
    let mut source = ReaderSource::open("capture", id, file.path()).unwrap();
    let pool = SamplePool::new();
    let mut scanner =
        SampleScanner::new(settings, pool.clone(), Arc::new(ManualClock::new(0))).unwrap();

    let mut lines = Vec::new();
    while !scanner.fill(&mut source, None).unwrap().exhausted {
        while let Some(sample) = scanner.next_sample(&source).unwrap() {
            lines.push(sample.freeze());
        }
    }
    let tail = scanner.flush_partial(&source).unwrap().unwrap();

    assert_eq!(lines.len(), 50);
    assert_eq!(lines[7].data(), b"$PTEMP,7,21.7\r\n\0");
    assert!(lines.iter().all(|s| s.id() == id));
    assert_eq!(tail.data(), b"$PTEMP,partial\0");
    assert_eq!(scanner.stats().samples(), 51);

    drop(tail);
    lines.clear();
    let stats = pool.stats();
    assert_eq!(stats.checked_out, 0);
    assert!(stats.is_consistent());
}

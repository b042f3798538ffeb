//! Sensor byte sources.
//!
//! A [`SensorSource`] is anything a scanner can read raw bytes from. Stream sources
//! (serial ports, files, character devices) return arbitrary fragments; datagram
//! sources return exactly one packet per read and can report the length of the next
//! pending packet.
//!
//! End of data is a zero-byte read on a stream source, or
//! [`std::io::ErrorKind::UnexpectedEof`] from any source. A bounded read that expires
//! returns [`std::io::ErrorKind::TimedOut`] or [`std::io::ErrorKind::WouldBlock`].

use daq_core::SampleId;
use std::io::{self, Read};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Byte source of one sensor.
pub trait SensorSource: Send {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Id stamped on the samples built from this source.
    fn sample_id(&self) -> SampleId;

    /// Read available bytes into `buf`, waiting at most `timeout` when given.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize>;

    /// Length of the next pending packet, for datagram sources. `None` when nothing
    /// is pending or the source has no packet boundaries.
    fn pending_packet_len(&mut self) -> io::Result<Option<usize>> {
        Ok(None)
    }
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sample_id(&self) -> SampleId {
        (**self).sample_id()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        (**self).read(buf, timeout)
    }

    fn pending_packet_len(&mut self) -> io::Result<Option<usize>> {
        (**self).pending_packet_len()
    }
}

/// Stream source over any blocking reader: files, FIFOs, character devices.
///
/// The timeout is ignored; the reader decides how long a read blocks.
pub struct ReaderSource<R> {
    name: String,
    id: SampleId,
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    /// Wrap `reader`.
    pub fn new(name: impl Into<String>, id: SampleId, reader: R) -> Self {
        Self {
            name: name.into(),
            id,
            reader,
        }
    }

    /// Recover the reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl ReaderSource<std::fs::File> {
    /// Open a file or device path for reading.
    pub fn open(
        name: impl Into<String>,
        id: SampleId,
        path: impl AsRef<std::path::Path>,
    ) -> io::Result<Self> {
        Ok(Self::new(name, id, std::fs::File::open(path)?))
    }
}

impl<R: Read + Send> SensorSource for ReaderSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_id(&self) -> SampleId {
        self.id
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> io::Result<usize> {
        loop {
            match self.reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// Datagram source on a bound UDP socket. Each read returns one packet.
pub struct UdpSource {
    name: String,
    id: SampleId,
    socket: UdpSocket,
    peek_buf: Vec<u8>,
}

impl UdpSource {
    /// Bind a socket to `addr`.
    pub fn bind(name: impl Into<String>, id: SampleId, addr: &str) -> io::Result<Self> {
        Ok(Self::from_socket(name, id, UdpSocket::bind(addr)?))
    }

    /// Wrap an already bound socket.
    pub fn from_socket(name: impl Into<String>, id: SampleId, socket: UdpSocket) -> Self {
        Self {
            name: name.into(),
            id,
            socket,
            peek_buf: vec![0u8; 65_536],
        }
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl SensorSource for UdpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_id(&self) -> SampleId {
        self.id
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        self.socket.set_read_timeout(timeout)?;
        self.socket.recv(buf)
    }

    fn pending_packet_len(&mut self) -> io::Result<Option<usize>> {
        self.socket.set_nonblocking(true)?;
        let peeked = self.socket.peek(&mut self.peek_buf);
        self.socket.set_nonblocking(false)?;
        match peeked {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Serial port source.
#[cfg(feature = "serial")]
pub struct SerialSource {
    name: String,
    id: SampleId,
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialSource {
    /// Longest wait used when the caller asks for an unbounded read.
    const BLOCKING_TIMEOUT: Duration = Duration::from_secs(3600);

    /// Open `path` at `baud_rate`, 8N1.
    pub fn open(
        name: impl Into<String>,
        id: SampleId,
        path: &str,
        baud_rate: u32,
    ) -> io::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Self::BLOCKING_TIMEOUT)
            .open()
            .map_err(io::Error::from)?;
        Ok(Self {
            name: name.into(),
            id,
            port,
        })
    }
}

#[cfg(feature = "serial")]
impl SensorSource for SerialSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_id(&self) -> SampleId {
        self.id
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        self.port
            .set_timeout(timeout.unwrap_or(Self::BLOCKING_TIMEOUT))
            .map_err(io::Error::from)?;
        self.port.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_source_reads_until_eof() {
        let mut src = ReaderSource::new("file", SampleId::new(1, 2), &b"abc"[..]);
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf, None).unwrap(), 3);
        assert_eq!(src.read(&mut buf, None).unwrap(), 0);
        assert_eq!(src.sample_id(), SampleId::new(1, 2));
    }

    #[test]
    fn udp_source_reports_pending_packets() {
        let mut src = UdpSource::bind("udp", SampleId::new(1, 3), "127.0.0.1:0").unwrap();
        let addr = src.local_addr().unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.send_to(b"hello", addr).unwrap();
        tx.send_to(b"", addr).unwrap();

        let mut buf = [0u8; 64];
        let n = src.read(&mut buf, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(&buf[..n], b"hello");

        let mut pending = None;
        for _ in 0..100 {
            pending = src.pending_packet_len().unwrap();
            if pending.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pending, Some(0));
        assert_eq!(src.read(&mut buf, Some(Duration::from_secs(2))).unwrap(), 0);
        assert_eq!(src.pending_packet_len().unwrap(), None);
    }

    #[test]
    fn udp_read_times_out() {
        let mut src = UdpSource::bind("udp", SampleId::new(1, 3), "127.0.0.1:0").unwrap();
        let mut buf = [0u8; 16];
        let err = src
            .read(&mut buf, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ));
    }
}

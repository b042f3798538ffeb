//! Deterministic sensor source for tests, demos and replay.
//!
//! A [`ScriptedSource`] plays back a queue of events. In stream mode a data event
//! larger than the caller's buffer is handed out over several reads; in packet mode
//! each data event is one datagram and excess bytes are truncated, like a UDP socket.

use crate::source::SensorSource;
use daq_core::SampleId;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// One scripted read outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// Bytes (stream) or one packet (datagram).
    Data(Vec<u8>),
    /// The read times out.
    Timeout,
    /// The read fails with this error kind.
    Error(io::ErrorKind),
}

/// Scripted byte source.
#[derive(Debug)]
pub struct ScriptedSource {
    name: String,
    id: SampleId,
    events: VecDeque<ScriptEvent>,
    packets: bool,
    reads: usize,
}

impl ScriptedSource {
    /// Stream source: data events may be split or merged by the reader's buffer size.
    pub fn stream(name: impl Into<String>, id: SampleId) -> Self {
        Self {
            name: name.into(),
            id,
            events: VecDeque::new(),
            packets: false,
            reads: 0,
        }
    }

    /// Datagram source: each data event is one packet.
    pub fn packets(name: impl Into<String>, id: SampleId) -> Self {
        Self {
            packets: true,
            ..Self::stream(name, id)
        }
    }

    /// Queue bytes or a packet.
    pub fn push_data(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.events.push_back(ScriptEvent::Data(data.into()));
        self
    }

    /// Queue `data` split into chunks of `chunk` bytes.
    pub fn push_chunks(&mut self, data: &[u8], chunk: usize) -> &mut Self {
        for piece in data.chunks(chunk.max(1)) {
            self.push_data(piece);
        }
        self
    }

    /// Queue a timeout.
    pub fn push_timeout(&mut self) -> &mut Self {
        self.events.push_back(ScriptEvent::Timeout);
        self
    }

    /// Queue an I/O failure.
    pub fn push_error(&mut self, kind: io::ErrorKind) -> &mut Self {
        self.events.push_back(ScriptEvent::Error(kind));
        self
    }

    /// Events not yet played.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }

    /// Reads performed so far.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl SensorSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_id(&self) -> SampleId {
        self.id
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> io::Result<usize> {
        self.reads += 1;
        let Some(event) = self.events.pop_front() else {
            return if self.packets {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "script finished"))
            } else {
                Ok(0)
            };
        };
        match event {
            ScriptEvent::Timeout => Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout")),
            ScriptEvent::Error(kind) => Err(io::Error::new(kind, "scripted failure")),
            ScriptEvent::Data(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if !self.packets && n < data.len() {
                    self.events.push_front(ScriptEvent::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }

    fn pending_packet_len(&mut self) -> io::Result<Option<usize>> {
        if !self.packets {
            return Ok(None);
        }
        Ok(match self.events.front() {
            Some(ScriptEvent::Data(data)) => Some(data.len()),
            _ => None,
        })
    }
}

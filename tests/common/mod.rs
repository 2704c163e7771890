//! Shared test transport: captures writes, can simulate a full kernel
//! buffer, and records shutdown/close calls.
#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use wsgrid::Transport;

#[derive(Default)]
pub struct WireLog {
    pub written: Vec<u8>,
    pub blocked: bool,
    pub shutdowns: usize,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub log: Arc<Mutex<WireLog>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose socket buffer is full from the start.
    pub fn blocked() -> Self {
        let transport = Self::default();
        transport.set_blocked(true);
        transport
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.log.lock().unwrap().blocked = blocked;
    }

    pub fn written(&self) -> Vec<u8> {
        self.log.lock().unwrap().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.log.lock().unwrap().written)
    }

    pub fn shutdowns(&self) -> usize {
        self.log.lock().unwrap().shutdowns
    }

    pub fn closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }
}

impl Transport for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut log = self.log.lock().unwrap();
        if log.blocked {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "buffer full"));
        }
        log.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn shutdown_write(&mut self) {
        self.log.lock().unwrap().shutdowns += 1;
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

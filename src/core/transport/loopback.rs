//! In-memory loopback driver
//!
//! Echoes everything written back into the read queue. A [`LoopbackHandle`]
//! lets the owner play the MCU side: inject replies and inspect writes.

use super::{LineConfig, PortDriver, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    open: bool,
    echo: bool,
    incoming: VecDeque<u8>,
    written: Vec<u8>,
}

/// Virtual port with no hardware behind it
#[derive(Debug)]
pub struct LoopbackPort {
    shared: Arc<Mutex<Shared>>,
}

/// Far-end view of a [`LoopbackPort`]
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackPort {
    /// Create an echoing port
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                echo: true,
                ..Shared::default()
            })),
        }
    }

    /// Create a port that only returns injected data
    #[cfg(test)]
    pub fn silent() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Far-end handle sharing this port's buffers
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for LoopbackPort {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHandle {
    /// Queue bytes as if the MCU had sent them
    pub fn inject(&self, data: &[u8]) {
        self.shared.lock().incoming.extend(data.iter().copied());
    }

    /// Everything written to the port so far
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().written.clone()
    }

    /// Whether the port is open
    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }
}

impl PortDriver for LoopbackPort {
    fn open(&mut self, _config: &LineConfig) -> Result<(), TransportError> {
        self.shared.lock().open = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = self.shared.lock();
        shared.open = false;
        shared.incoming.clear();
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut shared = self.shared.lock();
        if !shared.open {
            return Err(std::io::ErrorKind::NotConnected.into());
        }
        shared.written.extend_from_slice(data);
        if shared.echo {
            shared.incoming.extend(data.iter().copied());
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut shared = self.shared.lock();
        if !shared.open {
            return Err(std::io::ErrorKind::NotConnected.into());
        }
        let n = buf.len().min(shared.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(shared.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

//! Serial line transport gated by a timed lock

use super::{
    EventHook, LoopbackPort, PortDriver, TransportError, TransportEvent, TransportStats,
};
use crate::core::lock::{Secret, TimedLock};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tokio::time::Instant;

/// Settle window armed on every open
pub const DEFAULT_GUARD: Duration = Duration::from_secs(2);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {other}")),
        }
    }
}

fn default_baud() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// Configuration of one named bench line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Logical line name used by scripts (e.g. "iic")
    pub name: String,
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Data bits (5, 6, 7, 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: SerialParity,
    /// Flow control
    #[serde(default)]
    pub flow_control: SerialFlowControl,
    /// Use the in-memory echo driver instead of a real port
    #[serde(default)]
    pub loopback: bool,
    /// Settle window re-armed after every transmit (0 = none)
    #[serde(default)]
    pub post_tx_guard_ms: u64,
}

impl LineConfig {
    /// Create a line with 8N1 framing
    pub fn new(name: &str, port: &str, baud: u32) -> Self {
        Self {
            name: name.to_string(),
            port: port.to_string(),
            baud,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            loopback: false,
            post_tx_guard_ms: 0,
        }
    }

    /// Create an in-memory echo line
    pub fn loopback(name: &str) -> Self {
        Self {
            loopback: true,
            ..Self::new(name, "loopback", default_baud())
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Re-arm the lock for `guard` after each transmit
    #[must_use]
    pub fn post_tx_guard(mut self, guard: Duration) -> Self {
        self.post_tx_guard_ms = u64::try_from(guard.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Short framing summary, e.g. `/dev/ttyS0 @ 9600 baud (8N1)`
    pub fn describe(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.port,
            self.baud,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits,
        )
    }
}

/// [`PortDriver`] backed by an OS serial device
#[derive(Default)]
pub struct SystemPort {
    port: Option<Box<dyn SerialPort>>,
}

impl SystemPort {
    /// Create a closed driver
    pub fn new() -> Self {
        Self::default()
    }
}

impl PortDriver for SystemPort {
    fn open(&mut self, config: &LineConfig) -> Result<(), TransportError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let port = serialport::new(&config.port, config.baud)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| TransportError::OpenFailed {
                port: config.port.clone(),
                reason: match e.kind() {
                    serialport::ErrorKind::NoDevice => "device not found".to_string(),
                    serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                        "permission denied".to_string()
                    }
                    _ => e.to_string(),
                },
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        let written = port.write(data)?;
        port.flush()?;
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// One named bench line.
///
/// `transmit` and `receive` are refused with [`TransportError::Locked`]
/// until the guard window armed by [`open`](Self::open) has elapsed and the
/// lock accepts the secret generated for this open.
pub struct SerialTransport {
    config: LineConfig,
    driver: Box<dyn PortDriver>,
    lock: TimedLock,
    secret: Option<Secret>,
    guard: Duration,
    poll_interval: Duration,
    terminator: u8,
    pending: Vec<u8>,
    hook: Option<EventHook>,
    stats: TransportStats,
}

impl SerialTransport {
    /// Create a closed transport over `driver`
    pub fn new(config: LineConfig, driver: Box<dyn PortDriver>) -> Self {
        Self {
            config,
            driver,
            lock: TimedLock::new(),
            secret: None,
            guard: DEFAULT_GUARD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            terminator: b'\n',
            pending: Vec::new(),
            hook: None,
            stats: TransportStats::default(),
        }
    }

    /// Create a closed transport, picking the driver from `config.loopback`
    pub fn from_config(config: LineConfig) -> Self {
        let driver: Box<dyn PortDriver> = if config.loopback {
            Box::new(LoopbackPort::new())
        } else {
            Box::new(SystemPort::new())
        };
        Self::new(config, driver)
    }

    /// Set the guard window armed on open
    #[must_use]
    pub fn with_guard(mut self, guard: Duration) -> Self {
        self.guard = guard;
        self
    }

    /// Set the receive polling slice
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the line terminator byte (default `\n`)
    #[must_use]
    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    /// Attach an activity observer
    #[must_use]
    pub fn with_hook(mut self, hook: EventHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Replace the activity observer
    pub fn set_hook(&mut self, hook: Option<EventHook>) {
        self.hook = hook;
    }

    /// Logical line name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Line configuration
    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    /// Whether the OS handle is open
    pub fn is_open(&self) -> bool {
        self.driver.is_open()
    }

    /// Whether the timed lock is engaged
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Traffic counters
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Open the handle and arm the guard window with a fresh secret.
    ///
    /// Opening an already open line does nothing.
    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.driver.is_open() {
            tracing::debug!(line = %self.config.name, "open requested on an open line");
            return Ok(());
        }

        self.driver.open(&self.config)?;
        self.pending.clear();

        let secret = Secret::generate();
        self.lock.lock(self.guard, Some(secret.clone()));
        self.secret = Some(secret);

        tracing::info!(
            line = %self.config.name,
            port = %self.config.describe(),
            guard_ms = self.guard.as_millis() as u64,
            "line opened"
        );
        self.emit(&TransportEvent::Opened);
        Ok(())
    }

    /// Release the handle regardless of lock state
    pub fn close(&mut self) {
        if !self.driver.is_open() {
            return;
        }
        self.driver.close();
        tracing::info!(line = %self.config.name, "line closed");
        self.emit(&TransportEvent::Closed);
    }

    /// Write `data` to the line
    pub fn transmit(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.gate()?;
        self.ensure_open()?;

        let written = self.driver.write(data)?;
        self.stats.bytes_sent += written as u64;
        self.stats.frames_sent += 1;

        tracing::debug!(line = %self.config.name, data = %hex::encode(&data[..written]), "tx");
        self.emit(&TransportEvent::Sent(Bytes::copy_from_slice(&data[..written])));

        if self.config.post_tx_guard_ms > 0 {
            self.lock.lock(
                Duration::from_millis(self.config.post_tx_guard_ms),
                self.secret.clone(),
            );
        }
        Ok(written)
    }

    /// Read one terminated line, waiting at most `timeout`.
    ///
    /// The terminator (and a preceding `\r`) is stripped. Bytes past the
    /// terminator, and a partial line left by a timeout, are kept for the
    /// next call.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        self.gate()?;
        self.ensure_open()?;

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            let n = self.driver.read(&mut chunk)?;
            self.pending.extend_from_slice(&chunk[..n]);

            if let Some(line) = self.take_line() {
                self.stats.bytes_received += line.len() as u64;
                self.stats.frames_received += 1;
                tracing::debug!(line = %self.config.name, data = %hex::encode(&line), "rx");
                self.emit(&TransportEvent::Received(line.clone()));
                return Ok(line);
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats.timeouts += 1;
                return Err(TransportError::Timeout {
                    line: self.config.name.clone(),
                    millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }

            if n == 0 {
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        }
    }

    fn gate(&mut self) -> Result<(), TransportError> {
        if self.lock.attempt_unlock(self.secret.as_ref()) {
            return Ok(());
        }
        self.stats.lock_rejections += 1;
        tracing::debug!(
            line = %self.config.name,
            remaining_ms = self.lock.remaining().map_or(0, |d| d.as_millis() as u64),
            "refused by lock"
        );
        Err(TransportError::Locked {
            line: self.config.name.clone(),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.driver.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen {
                line: self.config.name.clone(),
            })
        }
    }

    fn take_line(&mut self) -> Option<Bytes> {
        let pos = self.pending.iter().position(|&b| b == self.terminator)?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(Bytes::from(line))
    }

    fn emit(&self, event: &TransportEvent) {
        if let Some(hook) = &self.hook {
            hook(&self.config.name, event);
        }
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("config", &self.config)
            .field("open", &self.driver.is_open())
            .field("locked", &self.lock.is_locked())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.driver.is_open() {
            self.driver.close();
            tracing::debug!(line = %self.config.name, "line closed on drop");
        }
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoFailure(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{LoopbackHandle, MockPortDriver};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn loopback_line(name: &str) -> (SerialTransport, LoopbackHandle) {
        let port = LoopbackPort::new();
        let handle = port.handle();
        let transport = SerialTransport::new(LineConfig::loopback(name), Box::new(port));
        (transport, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_during_guard_window() {
        let (mut line, _handle) = loopback_line("iic");
        line.open().unwrap();

        assert!(matches!(line.transmit(b"\x1f"), Err(TransportError::Locked { .. })));
        assert!(matches!(
            line.receive(Duration::from_millis(50)).await,
            Err(TransportError::Locked { .. })
        ));
        assert_eq!(line.stats().lock_rejections, 2);
        assert_eq!(line.stats().frames_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_and_receive_after_guard() {
        let (mut line, handle) = loopback_line("iic");
        line.open().unwrap();
        tokio::time::advance(DEFAULT_GUARD).await;

        assert_eq!(line.transmit(b"ping\r\n").unwrap(), 6);
        assert_eq!(handle.written(), b"ping\r\n".to_vec());
        assert!(!line.is_locked());

        let echoed = line.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(&echoed[..], b"ping");
        assert_eq!(line.stats().frames_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_keeps_bytes_past_terminator() {
        let (mut line, handle) = loopback_line("uart");
        line.open().unwrap();
        tokio::time::advance(DEFAULT_GUARD).await;

        handle.inject(b"first\nsecond\npart");
        assert_eq!(&line.receive(Duration::ZERO).await.unwrap()[..], b"first");
        assert_eq!(&line.receive(Duration::ZERO).await.unwrap()[..], b"second");

        let err = line.receive(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { millis: 30, .. }));
        assert!(err.is_retryable());

        handle.inject(b"ial\n");
        assert_eq!(&line.receive(Duration::ZERO).await.unwrap()[..], b"partial");
        assert_eq!(line.stats().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_tx_guard_relocks() {
        let port = LoopbackPort::new();
        let config = LineConfig::loopback("spi").post_tx_guard(Duration::from_millis(100));
        let mut line = SerialTransport::new(config, Box::new(port)).with_guard(Duration::ZERO);
        line.open().unwrap();

        line.transmit(b"\x01").unwrap();
        assert!(matches!(line.transmit(b"\x02"), Err(TransportError::Locked { .. })));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(line.transmit(b"\x02").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_drop_closes() {
        let (mut line, handle) = loopback_line("iic");
        line.open().unwrap();
        line.close();
        line.close();
        assert!(!handle.is_open());

        tokio::time::advance(DEFAULT_GUARD).await;
        assert!(matches!(line.transmit(b"x"), Err(TransportError::NotOpen { .. })));

        line.open().unwrap();
        assert!(handle.is_open());
        drop(line);
        assert!(!handle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_sees_activity() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let (line, _handle) = loopback_line("iic");
        let mut line = line.with_hook(Arc::new(move |name: &str, event: &TransportEvent| {
            sink.lock().push(format!("{name}: {event}"));
        }));

        line.open().unwrap();
        tokio::time::advance(DEFAULT_GUARD).await;
        line.transmit(b"\x1f\n").unwrap();
        line.receive(Duration::ZERO).await.unwrap();
        line.close();

        assert_eq!(
            *events.lock(),
            vec![
                "iic: opened".to_string(),
                "iic: TX 1f0a".to_string(),
                "iic: RX 1f".to_string(),
                "iic: closed".to_string(),
            ]
        );
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mut driver = MockPortDriver::new();
        driver.expect_is_open().return_const(false);
        driver.expect_open().returning(|config| {
            Err(TransportError::OpenFailed {
                port: config.port.clone(),
                reason: "device not found".to_string(),
            })
        });

        let mut line = SerialTransport::new(LineConfig::new("iic", "/dev/null0", 9600), Box::new(driver));
        let err = line.open().unwrap_err();
        assert!(matches!(err, TransportError::OpenFailed { ref port, .. } if port == "/dev/null0"));
        assert!(!err.is_retryable());
        assert!(!line.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_maps_to_io_failure() {
        let mut driver = MockPortDriver::new();
        let mut open_calls = 0;
        driver.expect_is_open().returning(move || {
            open_calls += 1;
            open_calls > 1
        });
        driver.expect_open().returning(|_| Ok(()));
        driver
            .expect_write()
            .returning(|_| Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
        driver.expect_close().return_const(());

        let mut line = SerialTransport::new(LineConfig::new("iic", "/dev/ttyS9", 9600), Box::new(driver))
            .with_guard(Duration::ZERO);
        line.open().unwrap();

        let err = line.transmit(b"\x00").unwrap_err();
        assert!(matches!(err, TransportError::IoFailure(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_line_config_describe() {
        let config = LineConfig::new("iic", "/dev/ttyS0", 115_200)
            .data_bits(7)
            .parity(SerialParity::Even)
            .stop_bits(2);
        assert_eq!(config.describe(), "/dev/ttyS0 @ 115200 baud (7E2)");
        assert_eq!("o".parse::<SerialParity>(), Ok(SerialParity::Odd));
        assert!("mark".parse::<SerialParity>().is_err());
    }
}

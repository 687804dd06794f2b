//! Instrument-side serial client.
//!
//! Stands in for the chronograph: a USB-serial adapter wired to the bridge's
//! UART, writing newline-terminated records at 19200 8N1.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Instrument line rate
pub const BAUD_RATE: u32 = 19_200;

/// Find candidate USB-serial adapters (ttyUSB / ttyACM / COM ports).
pub fn find_serial_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| {
            name.contains("ttyUSB") || name.contains("ttyACM") || name.starts_with("COM")
        })
        .collect())
}

/// Resolve a port argument - returns the port path if not "auto", otherwise
/// picks the first adapter found.
pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }

    match find_serial_ports()?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No serial adapter found - ensure the instrument side is connected"),
    }
}

/// Client for the instrument side of the bridge.
pub struct InstrumentPort {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    /// Bytes read past the last returned line
    pending: Vec<u8>,
}

impl InstrumentPort {
    /// Open the port configured 8N1 without flow control.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
            pending: Vec::new(),
        })
    }

    /// Set the line read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Clear any pending data in the serial buffers.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        self.pending.clear();
        Ok(())
    }

    /// Write one record followed by `\n`.
    pub fn send_line(&mut self, line: &[u8]) -> Result<()> {
        self.port.write_all(line)?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    /// Write bytes exactly as given.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one `\n`-terminated line, without the terminator or a trailing `\r`.
    /// Returns None if nothing complete arrives within the timeout.
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let mut buf = [0u8; 64];

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }

            if start.elapsed() >= self.timeout {
                return Ok(None);
            }

            match self.port.read(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Port path, for display.
    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_default()
    }
}

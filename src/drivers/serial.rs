use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::drivers::{CommandSink, SerialLink, TransportError};

/// Serial port opened for acquisition. Split into a reading half for the ingestion
/// worker and a writing half for outbound commands.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    pub fn open(
        port_name: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud)
            .timeout(read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| TransportError::Open {
                port: port_name.to_owned(),
                baud,
                source,
            })?;
        log::info!("port opened at: {port_name} ({baud} baud)");
        Ok(Self { port })
    }

    pub fn command_sink(&self) -> Result<SerialCommandSink, TransportError> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| TransportError::Write(e.into()))?;
        Ok(SerialCommandSink { port })
    }
}

impl SerialLink for SerialPortLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(TransportError::Read(e)),
        }
    }
}

pub struct SerialCommandSink {
    port: Box<dyn SerialPort>,
}

impl CommandSink for SerialCommandSink {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        log::trace!("sending command '{}'", command.escape_default());
        self.port
            .write_all(command.as_bytes())
            .and_then(|_| self.port.flush())
            .map_err(TransportError::Write)
    }
}

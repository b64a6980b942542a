/// Transport abstraction over the physical byte pipe to the radio. The
/// engine only ever sees non-blocking reads and whole-frame writes; the
/// blocking hardware calls live behind the implementations (a worker
/// thread for USB, a zero-timeout port for serial).
use crate::defines::TX_PAD_BYTES;
use crate::Result;
use log::error;
use serialport::SerialPort;
use std::io::Read;
use std::time::Duration;

pub trait Transport: Send {
    /// Whether the underlying device is still usable. Construction fails
    /// outright when no device is present; this goes false afterwards if
    /// the device drops off the bus.
    fn is_valid(&self) -> bool;

    /// Write one encoded frame, reporting the frame length written. The
    /// implementation appends the firmware zero padding; the padding is
    /// never part of the reported count.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Non-blocking read: whatever bytes are pending, empty when none.
    fn read(&mut self) -> Vec<u8>;
}

/// Frame bytes plus the trailing zero run the dongle firmware needs
/// between frames.
pub(crate) fn pad_frame(bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(bytes.len() + TX_PAD_BYTES);
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(&[0; TX_PAD_BYTES]);
    buf
}

const SERIAL_BAUD: u32 = 115_200;
const SERIAL_READ_BUF: usize = 255;

/// Serial transport for dongles that present a POSIX serial device. Opened
/// raw, 8N1, hardware flow control when the port supports it, reads with a
/// near-zero timeout so the poll loop never blocks.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    valid: bool,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<SerialTransport> {
        let builder = serialport::new(path, SERIAL_BAUD)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(1));
        let port = match builder
            .clone()
            .flow_control(serialport::FlowControl::Hardware)
            .open()
        {
            Ok(port) => port,
            // Not every adapter wires RTS/CTS; fall back to none.
            Err(_) => builder
                .flow_control(serialport::FlowControl::None)
                .open()?,
        };
        Ok(SerialTransport { port, valid: true })
    }
}

impl Transport for SerialTransport {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        use std::io::Write;
        let framed = pad_frame(bytes);
        self.port.write_all(&framed)?;
        Ok(bytes.len())
    }

    fn read(&mut self) -> Vec<u8> {
        let mut buf = [0u8; SERIAL_READ_BUF];
        match self.port.read(&mut buf) {
            Ok(len) => buf[..len].to_vec(),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Vec::new()
            }
            Err(e) => {
                error!("serial read failed: {}", e);
                self.valid = false;
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pad_frame_appends_zero_run() {
        let framed = pad_frame(&[0xA4, 0x01, 0x4A, 0x00, 0xEF]);
        assert_eq!(framed.len(), 5 + TX_PAD_BYTES);
        assert_eq!(&framed[..5], &[0xA4, 0x01, 0x4A, 0x00, 0xEF]);
        assert!(framed[5..].iter().all(|&b| b == 0));
    }
}

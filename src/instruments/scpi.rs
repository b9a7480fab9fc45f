use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::time::Duration;

use log::debug;

use super::InstrumentError;

/// Newline-terminated SCPI text protocol over any byte stream.
///
/// Replies are read up to `\n`; trailing `\r` is stripped.
pub struct ScpiPort<T> {
    inner: BufReader<T>,
}

impl<T: Read + Write> ScpiPort<T> {
    pub fn new(stream: T) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Send a command that has no reply.
    pub fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        debug!("SCPI -> {}", command);
        let stream = self.inner.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    /// Send a command and read one reply line.
    pub fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.write(command)?;
        let mut line = String::new();
        let read = self.inner.read_line(&mut line).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => InstrumentError::ProtocolTimeout {
                command: command.to_string(),
            },
            _ => InstrumentError::IoError(e),
        })?;
        if read == 0 {
            return Err(InstrumentError::ProtocolTimeout {
                command: command.to_string(),
            });
        }
        let reply = line.trim_end_matches(['\n', '\r']).to_string();
        debug!("SCPI <- {}", reply);
        Ok(reply)
    }

    /// Query a single numeric value.
    pub fn query_f64(&mut self, command: &str) -> Result<f64, InstrumentError> {
        let reply = self.query(command)?;
        parse_f64(command, &reply)
    }

    /// Query a comma-separated list of numbers.
    pub fn query_list(&mut self, command: &str) -> Result<Vec<f64>, InstrumentError> {
        let reply = self.query(command)?;
        if reply.trim().is_empty() {
            return Ok(Vec::new());
        }
        reply.split(',').map(|field| parse_f64(command, field)).collect()
    }

    /// Query and require an exact reply.
    pub fn expect(&mut self, command: &str, expected: &str) -> Result<(), InstrumentError> {
        let reply = self.query(command)?;
        if reply.trim() != expected {
            return Err(InstrumentError::UnexpectedResponse {
                command: command.to_string(),
                response: reply,
            });
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

fn parse_f64(command: &str, field: &str) -> Result<f64, InstrumentError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| InstrumentError::UnexpectedResponse {
            command: command.to_string(),
            response: field.to_string(),
        })
}

/// Open a serial port with 8N1 framing.
pub fn open_serial(
    path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<ScpiPort<Box<dyn serialport::SerialPort>>, InstrumentError> {
    let port = serialport::new(path, baud_rate)
        .timeout(timeout)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .open()?;
    debug!("Opened {} at {} baud", path, baud_rate);
    Ok(ScpiPort::new(port))
}

/// In-memory stream that replays canned replies and records what was
/// written. Used by the driver tests.
#[cfg(test)]
pub(crate) mod loopback {
    use std::io::{self, Cursor, Read, Write};

    pub struct Loopback {
        replies: Cursor<Vec<u8>>,
        pub written: Vec<u8>,
    }

    impl Loopback {
        pub fn new(replies: &[&str]) -> Self {
            let mut data = String::new();
            for reply in replies {
                data.push_str(reply);
                data.push_str("\r\n");
            }
            Self {
                replies: Cursor::new(data.into_bytes()),
                written: Vec::new(),
            }
        }

        pub fn commands(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.written)
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::Loopback;
    use super::*;

    #[test]
    fn test_query_strips_carriage_return() {
        let mut port = ScpiPort::new(Loopback::new(&["0"]));
        assert_eq!(port.query("*TST?").unwrap(), "0");
        assert_eq!(port.into_inner().commands(), vec!["*TST?"]);
    }

    #[test]
    fn test_query_list() {
        let mut port = ScpiPort::new(Loopback::new(&["1.5,2,0.25", ""]));
        assert_eq!(port.query_list("CONF:PUL?").unwrap(), vec![1.5, 2.0, 0.25]);
        assert!(port.query_list("CONF:PUL?").unwrap().is_empty());
    }

    #[test]
    fn test_missing_reply_is_timeout() {
        let mut port = ScpiPort::new(Loopback::new(&[]));
        let err = port.query("MEAS:VOLT?").unwrap_err();
        assert!(matches!(err, InstrumentError::ProtocolTimeout { .. }));
    }

    #[test]
    fn test_unparsable_number() {
        let mut port = ScpiPort::new(Loopback::new(&["abc"]));
        let err = port.query_f64("MEAS:CURR?").unwrap_err();
        assert!(matches!(err, InstrumentError::UnexpectedResponse { .. }));
    }

    #[test]
    fn test_expect_mismatch() {
        let mut port = ScpiPort::new(Loopback::new(&["1"]));
        assert!(port.expect("*TST?", "0").is_err());
    }
}

//! Line transport for the query connection.
//!
//! The client consumes the connection as two halves: a [`LineSource`] owned by
//! the receive thread and a [`LineSink`] shared by senders. Lines are
//! terminated by `\n`; a stray `\r` on either side of a line is dropped.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};

use tracing::debug;

use crate::TransportError;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// First line sent by a query server.
pub const QUERY_BANNER: &str = "TS3";

/// Inbound half of a line transport.
pub trait LineSource: Send {
    /// Blocks for the next line. Returns `Ok(None)` on orderly end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the read fails.
    fn next_line(&mut self) -> Result<Option<String>, TransportError>;
}

/// Outbound half of a line transport.
pub trait LineSink: Send {
    /// Writes one line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the write fails.
    fn send_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Closes the connection so that the paired [`LineSource`] reaches its end.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the shutdown fails.
    fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Reads `\n`-terminated lines from any buffered reader.
#[derive(Debug)]
pub struct StreamLineSource<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: BufRead> StreamLineSource<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }
}

impl<R: BufRead + Send> LineSource for StreamLineSource<R> {
    fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        self.buffer.clear();
        let read = self.reader.read_until(b'\n', &mut self.buffer)?;
        if read == 0 {
            return Ok(None);
        }
        let text = std::str::from_utf8(&self.buffer).map_err(|_| TransportError::InvalidUtf8)?;
        Ok(Some(text.trim_matches(['\r', '\n']).to_owned()))
    }
}

/// Writing half of a TCP query connection.
#[derive(Debug)]
pub struct TcpLineSink {
    writer: BufWriter<TcpStream>,
}

impl LineSink for TcpLineSink {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.flush()?;
        match self.writer.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Reading half of a TCP query connection.
pub type TcpLineSource = StreamLineSource<BufReader<TcpStream>>;

/// Opens query connections over TCP.
pub struct TcpTransport;

impl TcpTransport {
    /// Connects, checks the banner and skips the welcome text.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Banner`] when the server is not a query
    /// server, or [`TransportError::Io`] when the connection fails.
    pub fn connect(host: &str, port: u16) -> Result<(TcpLineSource, TcpLineSink), TransportError> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        let writer = BufWriter::new(stream.try_clone()?);
        let mut source = StreamLineSource::new(BufReader::new(stream));

        let banner = source.next_line()?.ok_or(TransportError::Closed)?;
        if banner != QUERY_BANNER {
            return Err(TransportError::Banner { received: banner });
        }
        let welcome = source.next_line()?.ok_or(TransportError::Closed)?;
        debug!(target: TRANSPORT_TARGET, host, port, welcome = %welcome, "query connection open");

        Ok((source, TcpLineSink { writer }))
    }
}

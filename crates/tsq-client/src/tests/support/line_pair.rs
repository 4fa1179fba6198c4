//! In-memory line transport connecting a client to a test-driven server.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::WAIT;
use crate::{LineSink, LineSource, TransportError};

/// Client-side reader fed by [`ServerEnd::feed`].
pub struct ChannelLineSource {
    inbound: Receiver<Option<String>>,
}

impl LineSource for ChannelLineSource {
    fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.recv().ok().flatten())
    }
}

/// Client-side writer read by [`ServerEnd::next_line`].
pub struct ChannelLineSink {
    outbound: Sender<String>,
    inbound: Sender<Option<String>>,
}

impl LineSink for ChannelLineSink {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.outbound
            .send(line.to_owned())
            .map_err(|_| TransportError::Closed)
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        // End the paired source even if the test still holds its sender.
        drop(self.inbound.send(None));
        Ok(())
    }
}

/// A sink whose first writes report a closed connection.
pub struct FailingLineSink<K> {
    inner: K,
    failures: usize,
}

impl<K> FailingLineSink<K> {
    /// Fails the next `failures` writes, then forwards to `inner`.
    pub fn new(inner: K, failures: usize) -> Self {
        Self { inner, failures }
    }
}

impl<K: LineSink> LineSink for FailingLineSink<K> {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(TransportError::Closed);
        }
        self.inner.send_line(line)
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown()
    }
}

/// The server side of [`line_pair`].
pub struct ServerEnd {
    inbound: Sender<Option<String>>,
    outbound: Receiver<String>,
}

impl ServerEnd {
    /// Delivers one line to the client.
    pub fn feed(&self, line: &str) {
        self.inbound
            .send(Some(line.to_owned()))
            .expect("client receive loop should be running");
    }

    /// Ends the client's inbound stream.
    pub fn close(&self) {
        drop(self.inbound.send(None));
    }

    /// Next line written by the client.
    pub fn next_line(&self) -> String {
        self.outbound
            .recv_timeout(WAIT)
            .expect("client should write a line")
    }

    /// Next line written by the client, which must be the command `name`.
    pub fn expect_command(&self, name: &str) -> String {
        let line = self.next_line();
        let sent = line.split(' ').next().unwrap_or_default();
        assert_eq!(sent, name, "unexpected command line {line:?}");
        line
    }

    /// A line already written by the client, if any.
    pub fn try_next_line(&self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Answers every command with the lines `answer` returns, until the
    /// client quits.
    pub fn serve<F>(self, mut answer: F) -> JoinHandle<()>
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        thread::spawn(move || {
            while let Ok(line) = self.outbound.recv() {
                if line == "quit" {
                    break;
                }
                for reply in answer(&line) {
                    if self.inbound.send(Some(reply)).is_err() {
                        return;
                    }
                }
            }
        })
    }
}

/// Creates a connected client transport and its server end.
#[must_use]
pub fn line_pair() -> (ChannelLineSource, ChannelLineSink, ServerEnd) {
    let (inbound_tx, inbound_rx) = channel::unbounded();
    let (outbound_tx, outbound_rx) = channel::unbounded();
    (
        ChannelLineSource {
            inbound: inbound_rx,
        },
        ChannelLineSink {
            outbound: outbound_tx,
            inbound: inbound_tx.clone(),
        },
        ServerEnd {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}

//! TCP connection management with line-delimited I/O.
//!
//! Stratum v1 uses newline-delimited JSON over TCP. [`LineCodec`] splits the
//! byte stream into lines and [`Connection`] turns lines into
//! [`JsonRpcMessage`]s. The [`Transport`] trait abstracts message I/O so the
//! client can run over channels in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::error::{StratumError, StratumResult};
use super::messages::JsonRpcMessage;
use crate::tracing::prelude::*;

/// Longest line accepted from a pool. Longer lines are dropped.
pub const MAX_LINE_LENGTH: usize = 128 * 1024;

/// Message-level I/O for Stratum protocol.
#[async_trait]
pub trait Transport: Send {
    /// Read one complete JSON-RPC message.
    ///
    /// Returns `None` on clean connection close (EOF). A line that is not a
    /// valid message yields [`StratumError::InvalidMessage`]; the transport
    /// stays usable afterwards.
    async fn read_message(&mut self) -> StratumResult<Option<JsonRpcMessage>>;

    /// Write a JSON-RPC message.
    async fn write_message(&mut self, msg: &JsonRpcMessage) -> StratumResult<()>;
}

/// Newline framing with a length cap.
///
/// Partial lines stay buffered until their `\n` arrives. A line longer than
/// `max_length` is skipped up to and including its terminating newline, and
/// decoding carries on with the next line. Invalid UTF-8 is replaced rather
/// than rejected so a bad line can't wedge the stream; JSON parsing rejects
/// it later.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes already scanned for a newline.
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn line_to_string(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = StratumError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, StratumError> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(line_to_string(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    warn!(
                        max_length = self.max_length,
                        "Line from pool too long, discarding"
                    );
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, StratumError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }

        // Unterminated final line
        let line = buf.split();
        Ok(Some(line_to_string(&line)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = StratumError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), StratumError> {
        buf.reserve(line.len() + 1);
        buf.put(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

/// Strip the scheme from a pool URL and check it names a host and port.
pub fn pool_address(url: &str) -> StratumResult<&str> {
    let addr = url
        .strip_prefix("stratum+tcp://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(addr),
        _ => Err(StratumError::InvalidUrl(url.to_string())),
    }
}

/// Framed TCP connection for Stratum protocol.
pub struct Connection {
    framed: Framed<TcpStream, LineCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, LineCodec::new(MAX_LINE_LENGTH)),
        }
    }

    /// Connect to a Stratum pool.
    ///
    /// Accepts `stratum+tcp://host:port`, `tcp://host:port` or `host:port`.
    /// Gives up with [`StratumError::Timeout`] after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> StratumResult<Self> {
        let addr = pool_address(url)?;

        debug!(addr = %addr, "Connecting to pool");

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| StratumError::Timeout)?
            .map_err(|e| StratumError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        stream.set_nodelay(true)?;
        debug!(addr = %addr, "Connected to pool");

        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for Connection {
    async fn read_message(&mut self) -> StratumResult<Option<JsonRpcMessage>> {
        loop {
            let line = match self.framed.next().await {
                Some(line) => line?,
                None => return Ok(None),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            trace!(rx = %line, "Received message");

            let msg = serde_json::from_str(line).map_err(|e| {
                StratumError::InvalidMessage(format!("{}, line: {}", e, line))
            })?;

            return Ok(Some(msg));
        }
    }

    async fn write_message(&mut self, msg: &JsonRpcMessage) -> StratumResult<()> {
        let json = serde_json::to_string(msg)?;
        trace!(tx = %json, "Sending message");
        self.framed.send(json).await
    }
}

/// Channel-based transport for deterministic testing.
///
/// Works with `tokio::time::pause()` since no real I/O is involved. The
/// transport is the client's side, the handle is the test's side.
#[cfg(test)]
pub(crate) struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<JsonRpcMessage>,
    tx: tokio::sync::mpsc::UnboundedSender<JsonRpcMessage>,
}

#[cfg(test)]
pub(crate) struct MockTransportHandle {
    tx: tokio::sync::mpsc::UnboundedSender<JsonRpcMessage>,
    rx: tokio::sync::mpsc::UnboundedReceiver<JsonRpcMessage>,
}

#[cfg(test)]
impl MockTransport {
    pub fn pair() -> (Self, MockTransportHandle) {
        let (client_tx, handle_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle_tx, client_rx) = tokio::sync::mpsc::unbounded_channel();

        let transport = MockTransport {
            rx: client_rx,
            tx: client_tx,
        };
        let handle = MockTransportHandle {
            tx: handle_tx,
            rx: handle_rx,
        };
        (transport, handle)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn read_message(&mut self) -> StratumResult<Option<JsonRpcMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn write_message(&mut self, msg: &JsonRpcMessage) -> StratumResult<()> {
        self.tx
            .send(msg.clone())
            .map_err(|_| StratumError::Disconnected)
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Send a message to the client.
    pub fn send(&self, msg: JsonRpcMessage) {
        self.tx.send(msg).expect("transport dropped");
    }

    /// Receive a message the client wrote.
    pub async fn recv(&mut self) -> JsonRpcMessage {
        self.rx.recv().await.expect("transport dropped")
    }
}

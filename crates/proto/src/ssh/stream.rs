//! Byte-stream view of the shell channel.
//!
//! [`ShellReader`] owns the [`Connection`] and is the only thing that reads
//! from the transport: each `read` processes packets until channel data is
//! queued. [`ShellWriter`] shares the outbound sender and may be cloned and
//! moved to another task.

use super::byte_queue::ByteQueue;
use super::client::Connection;
use super::connection::{ChannelData, Disconnect, DISCONNECT_BY_APPLICATION};
use super::message::MessageType;
use super::packet::MAX_PACKET_LENGTH;
use super::transport::Outbound;
use cellsh_platform::CellshResult;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Largest data chunk that still fits a packet of [`MAX_PACKET_LENGTH`].
///
/// Header (5), type (1), channel (4), length (4) and up to 19 bytes of
/// padding must fit next to the data.
pub const MAX_DATA_CHUNK: usize = MAX_PACKET_LENGTH - 64;

/// Reading end of the shell.
#[derive(Debug)]
pub struct ShellReader {
    connection: Connection,
    queue: Arc<ByteQueue>,
}

impl ShellReader {
    /// Wraps a connection and completes the handshake.
    ///
    /// Performs one zero-length read, which returns only after the shell has
    /// sent its first bytes (or the channel closed), so the caller cannot
    /// write before negotiation is done.
    pub async fn new(connection: Connection) -> CellshResult<Self> {
        let queue = connection.queue();
        let mut reader = Self { connection, queue };
        reader.read(&mut []).await?;
        debug!("handshake complete");
        Ok(reader)
    }

    /// Reads shell output into `buf`.
    ///
    /// Waits until at least one byte is queued, then returns up to
    /// `buf.len()` bytes. Returns `Ok(0)` once the channel is closed and
    /// everything queued has been read. After a fatal error every read that
    /// finds the queue empty fails.
    pub async fn read(&mut self, buf: &mut [u8]) -> CellshResult<usize> {
        while self.queue.is_empty() {
            if self.connection.failure().is_some() {
                return Err(self.connection.closed_error());
            }
            if self.connection.is_closed() {
                return Ok(0);
            }
            self.connection.process_packet().await?;
        }
        let n = self.queue.read(buf);
        trace!(n, remaining = self.queue.available(), "read from channel queue");
        Ok(n)
    }

    /// Bytes that can be read without touching the transport.
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    /// Returns a writer for the same session.
    pub fn writer(&self) -> ShellWriter {
        ShellWriter {
            outbound: self.connection.outbound(),
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// Writing end of the shell.
#[derive(Debug, Clone)]
pub struct ShellWriter {
    outbound: Arc<Mutex<Outbound>>,
}

impl ShellWriter {
    /// Sends `data` as channel data.
    ///
    /// Data larger than the server's maximum packet size goes out as several
    /// packets. The outbound lock is held for the whole write, so concurrent
    /// writes are never interleaved.
    pub async fn write(&self, data: &[u8]) -> CellshResult<()> {
        let mut outbound = self.outbound.lock().await;
        let channel = outbound.open_channel()?;

        let limit = usize::try_from(channel.maximum_packet_size)
            .unwrap_or(MAX_DATA_CHUNK)
            .clamp(1, MAX_DATA_CHUNK);
        for chunk in data.chunks(limit) {
            outbound
                .send_with(|packet| ChannelData::write(packet, channel.id, chunk))
                .await?;
        }
        trace!(len = data.len(), "wrote to channel");
        Ok(())
    }

    /// Sends SSH_MSG_IGNORE so idle connections are not dropped.
    pub async fn send_keepalive(&self) -> CellshResult<()> {
        self.outbound
            .lock()
            .await
            .send_with(|packet| {
                packet.put_u8(MessageType::Ignore as u8);
                packet.put_byte_string(&[]);
            })
            .await?;
        trace!("sent keep-alive");
        Ok(())
    }

    /// Sends SSH_MSG_DISCONNECT and shuts down the transport.
    pub async fn disconnect(&self) -> CellshResult<()> {
        let mut outbound = self.outbound.lock().await;
        let message = Disconnect {
            reason_code: DISCONNECT_BY_APPLICATION,
            description: "Disconnected by application".to_string(),
        };
        outbound.send_with(|packet| message.write_to(packet)).await?;
        outbound.close_channel();
        outbound.shutdown().await?;
        debug!("disconnected");
        Ok(())
    }
}

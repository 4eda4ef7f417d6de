//! Transport plumbing shared by the handshake and the stream adapters.
//!
//! The client session moves through a fixed set of phases:
//!
//! ```text
//! KexInit -> KexGroup -> KexReply -> NewKeys -> Service -> Auth
//!         -> ChannelOpen -> Channel -> Closed
//! ```
//!
//! Each phase is represented by which entries of the [`HandlerTable`] are
//! registered. An inbound message whose type has no handler is logged and
//! dropped; a handler decides which entries exist for the next phase.
//!
//! Everything written to the server goes through one [`Outbound`] sender
//! guarded by a `tokio::sync::Mutex`, so the reader side (handshake replies,
//! window adjustments) and the writer side (user keystrokes) never interleave
//! a frame or reuse a sequence number.

use super::packet::Packet;
use cellsh_platform::{CellshError, CellshResult};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Phase of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Our KEXINIT is out, waiting for the server's
    KexInit,
    /// Group request sent, waiting for SSH_MSG_KEX_DH_GEX_GROUP
    KexGroup,
    /// `e` sent, waiting for SSH_MSG_KEX_DH_GEX_REPLY
    KexReply,
    /// Exchange hash computed, waiting for SSH_MSG_NEWKEYS
    NewKeys,
    /// Encrypted, waiting for SSH_MSG_SERVICE_ACCEPT
    Service,
    /// Password sent, waiting for the verdict
    Auth,
    /// Session channel requested
    ChannelOpen,
    /// Shell running
    Channel,
    /// Terminal state; no further packets are processed
    Closed,
}

/// Inbound message handlers. One exists per message the client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// SSH_MSG_DISCONNECT
    Disconnect,
    /// SSH_MSG_IGNORE
    Ignore,
    /// SSH_MSG_UNIMPLEMENTED
    Unimplemented,
    /// SSH_MSG_DEBUG
    Debug,
    /// SSH_MSG_KEXINIT
    KexInit,
    /// SSH_MSG_KEX_DH_GEX_GROUP
    KexGroup,
    /// SSH_MSG_KEX_DH_GEX_REPLY
    KexReply,
    /// SSH_MSG_NEWKEYS
    NewKeys,
    /// SSH_MSG_SERVICE_ACCEPT
    ServiceAccept,
    /// SSH_MSG_USERAUTH_SUCCESS
    AuthSuccess,
    /// SSH_MSG_USERAUTH_FAILURE
    AuthFailure,
    /// SSH_MSG_USERAUTH_BANNER
    AuthBanner,
    /// SSH_MSG_CHANNEL_OPEN_CONFIRMATION
    OpenConfirmation,
    /// SSH_MSG_CHANNEL_OPEN_FAILURE
    OpenFailure,
    /// SSH_MSG_CHANNEL_DATA
    ChannelData,
    /// SSH_MSG_CHANNEL_EXTENDED_DATA
    ChannelExtendedData,
    /// SSH_MSG_CHANNEL_WINDOW_ADJUST
    WindowAdjust,
    /// SSH_MSG_CHANNEL_EOF
    ChannelEof,
    /// SSH_MSG_CHANNEL_CLOSE
    ChannelClose,
    /// SSH_MSG_CHANNEL_REQUEST
    ChannelRequest,
    /// SSH_MSG_CHANNEL_SUCCESS
    ChannelSuccess,
    /// SSH_MSG_CHANNEL_FAILURE
    ChannelFailure,
}

/// Message-type indexed handler registry.
#[derive(Debug, Clone)]
pub struct HandlerTable {
    slots: [Option<Handler>; 256],
}

impl HandlerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { slots: [None; 256] }
    }

    /// Installs `handler` for `message_type`, replacing any previous one.
    pub fn register(&mut self, message_type: u8, handler: Handler) {
        self.slots[usize::from(message_type)] = Some(handler);
    }

    /// Removes the handler for `message_type`.
    pub fn remove(&mut self, message_type: u8) {
        self.slots[usize::from(message_type)] = None;
    }

    /// Looks up the handler for `message_type`.
    pub fn get(&self, message_type: u8) -> Option<Handler> {
        self.slots[usize::from(message_type)]
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Server side of the open session channel, as seen by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChannel {
    /// Server's channel number
    pub id: u32,
    /// Largest data payload the server accepts
    pub maximum_packet_size: u32,
    /// Set once either side sent SSH_MSG_CHANNEL_CLOSE
    pub closed: bool,
}

/// The single outbound path to the server.
pub struct Outbound {
    packet: Packet,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    next_sequence: u32,
    channel: Option<RemoteChannel>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("next_sequence", &self.next_sequence)
            .field("encrypting", &self.packet.is_encrypting())
            .field("channel", &self.channel)
            .finish()
    }
}

impl Outbound {
    /// Wraps the write half of the transport. Sequence numbers start at 0.
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            packet: Packet::new(),
            writer,
            next_sequence: 0,
            channel: None,
        }
    }

    /// Builds one packet with `fill`, stamps the next sequence number and
    /// sends it. Returns the sequence number used.
    pub async fn send_with<F>(&mut self, fill: F) -> CellshResult<u32>
    where
        F: FnOnce(&mut Packet),
    {
        self.packet.reset();
        fill(&mut self.packet);

        let sequence = self.next_sequence;
        self.next_sequence = sequence.wrapping_add(1);
        self.packet.set_sequence_number(sequence);
        self.packet.send(&mut *self.writer).await?;
        Ok(sequence)
    }

    /// Outbound packet, for installing keys.
    pub fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// The session channel, once confirmed.
    pub fn channel(&self) -> Option<RemoteChannel> {
        self.channel
    }

    /// Records the confirmed session channel.
    pub fn set_channel(&mut self, channel: RemoteChannel) {
        self.channel = Some(channel);
    }

    /// Marks the session channel closed. Returns true the first time.
    pub fn close_channel(&mut self) -> bool {
        match self.channel.as_mut() {
            Some(channel) if !channel.closed => {
                channel.closed = true;
                true
            }
            _ => false,
        }
    }

    /// Session channel usable for data, or an error explaining why not.
    pub fn open_channel(&self) -> CellshResult<RemoteChannel> {
        match self.channel {
            Some(channel) if !channel.closed => Ok(channel),
            Some(_) => Err(CellshError::Protocol("Channel is closed".to_string())),
            None => Err(CellshError::Protocol("Channel is not open".to_string())),
        }
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> CellshResult<()> {
        trace!(next_sequence = self.next_sequence, "shutting down writer");
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::message::MessageType;

    #[test]
    fn test_handler_table_register_remove() {
        let mut table = HandlerTable::new();
        assert!(table.is_empty());

        table.register(MessageType::KexInit as u8, Handler::KexInit);
        table.register(MessageType::Disconnect as u8, Handler::Disconnect);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(20), Some(Handler::KexInit));
        assert_eq!(table.get(31), None);

        table.register(20, Handler::Ignore);
        assert_eq!(table.get(20), Some(Handler::Ignore));

        table.remove(20);
        assert_eq!(table.get(20), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_handler_table_covers_all_types() {
        let mut table = HandlerTable::new();
        table.register(255, Handler::Ignore);
        table.register(0, Handler::Ignore);
        assert_eq!(table.get(255), Some(Handler::Ignore));
        assert_eq!(table.get(0), Some(Handler::Ignore));
    }

    #[tokio::test]
    async fn test_outbound_sequence_numbers() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut outbound = Outbound::new(Box::new(client));

        assert_eq!(outbound.send_with(|p| p.put_u8(2)).await.unwrap(), 0);
        assert_eq!(outbound.send_with(|p| p.put_u8(2)).await.unwrap(), 1);
        assert_eq!(outbound.next_sequence(), 2);

        let mut packet = Packet::new();
        packet.from_network(&mut server).await.unwrap();
        assert_eq!(packet.message_type(), Some(2));
    }

    #[test]
    fn test_channel_state() {
        let (client, _server) = tokio::io::duplex(64);
        let mut outbound = Outbound::new(Box::new(client));
        assert!(outbound.open_channel().is_err());
        assert!(!outbound.close_channel());

        outbound.set_channel(RemoteChannel {
            id: 7,
            maximum_packet_size: 1024,
            closed: false,
        });
        assert_eq!(outbound.open_channel().unwrap().id, 7);

        assert!(outbound.close_channel());
        assert!(!outbound.close_channel());
        assert!(matches!(
            outbound.open_channel(),
            Err(CellshError::Protocol(_))
        ));
    }
}

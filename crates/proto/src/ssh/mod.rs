//! SSH2 client protocol.
//!
//! # Architecture
//!
//! The client is layered bottom-up:
//!
//! 1. **Buffers** ([`byte_queue`], [`packet`]) - channel data FIFO and the
//!    reusable binary packet codec (RFC 4253 Section 6)
//! 2. **Crypto** ([`crypto`], [`kex`], [`kex_dh`]) - AES-128-CBC, HMAC-SHA1,
//!    KEXINIT, DH group exchange and key derivation
//! 3. **Messages** ([`version`], [`auth`], [`connection`], [`message`]) -
//!    encoders and parsers for everything the client sends or receives
//! 4. **State machine** ([`transport`], [`client`]) - handler table, outbound
//!    sender and the per-phase handlers
//! 5. **Streams** ([`stream`]) - the shell as a pair of byte streams
//!
//! Progress is reported through a [`StatusListener`].
//!
//! # Example
//!
//! ```rust,no_run
//! use cellsh_proto::ssh::{SshClient, SshClientConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = tokio::net::TcpStream::connect("example.org:22").await?;
//! let client = SshClient::new(SshClientConfig::new("example.org", "alice", "secret"));
//! let (mut reader, writer) = client.open(stream).await?;
//!
//! writer.write(b"exit\n").await?;
//! let mut buf = [0u8; 256];
//! while reader.read(&mut buf).await? > 0 {}
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod byte_queue;
pub mod client;
pub mod connection;
pub mod crypto;
pub mod kex;
pub mod kex_dh;
pub mod listener;
pub mod message;
pub mod packet;
pub mod stream;
pub mod transport;
pub mod version;

pub use auth::{AuthBanner, AuthFailure, PasswordAuthRequest, ServiceAccept, ServiceRequest};
pub use byte_queue::ByteQueue;
pub use client::{host_key_fingerprint, Connection, SshClient, SshClientConfig};
pub use connection::{
    ChannelData, ChannelOpen, ChannelOpenConfirmation, ChannelOpenFailure,
    ChannelOpenFailureReason, ChannelRequest, ChannelRequestType, ChannelWindowAdjust,
    Disconnect, TerminalGeometry,
};
pub use crypto::{CipherAlgorithm, DecryptionKey, EncryptionKey, MacAlgorithm, MacKey};
pub use kex::{GroupSize, KexInit, NewKeys};
pub use kex_dh::{
    compute_exchange_hash, derive_key, DhGexExchange, ExchangeHashInput, SessionKeys,
};
pub use listener::{NoopListener, RecordingListener, StatusListener, CONNECTION_FAILED};
pub use message::MessageType;
pub use packet::{Packet, MAX_PACKET_LENGTH, MIN_PACKET_LENGTH};
pub use stream::{ShellReader, ShellWriter};
pub use transport::{Handler, HandlerTable, Outbound, Phase};
pub use version::Version;

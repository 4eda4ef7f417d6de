//! SSH client: configuration and the handshake state machine.
//!
//! [`SshClient`] takes a connected transport, runs the version exchange,
//! sends its KEXINIT and hands the session to a [`Connection`]. From then on
//! every inbound packet is dispatched through the connection's handler table;
//! each handler sends whatever reply the protocol requires and registers the
//! handlers for the next phase:
//!
//! | Phase       | On                        | Sends                          |
//! |-------------|---------------------------|--------------------------------|
//! | KexInit     | KEXINIT                   | KEX_DH_GEX_REQUEST             |
//! | KexGroup    | KEX_DH_GEX_GROUP          | KEX_DH_GEX_INIT                |
//! | KexReply    | KEX_DH_GEX_REPLY          |                                |
//! | NewKeys     | NEWKEYS                   | NEWKEYS, SERVICE_REQUEST       |
//! | Service     | SERVICE_ACCEPT            | USERAUTH_REQUEST (password)    |
//! | Auth        | USERAUTH_SUCCESS          | CHANNEL_OPEN "session"         |
//! | ChannelOpen | CHANNEL_OPEN_CONFIRMATION | pty-req, shell                 |
//! | Channel     | CHANNEL_DATA              | CHANNEL_WINDOW_ADJUST (if low) |
//!
//! USERAUTH_FAILURE, CHANNEL_OPEN_FAILURE, CHANNEL_FAILURE and DISCONNECT
//! end the session with an error.
//!
//! # Example
//!
//! ```rust,no_run
//! use cellsh_proto::ssh::client::{SshClient, SshClientConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SshClientConfig::new("example.org", "alice", "secret");
//! let (mut reader, writer) = SshClient::new(config).connect().await?;
//!
//! writer.write(b"uname -a\n").await?;
//! let mut buf = [0u8; 512];
//! let n = reader.read(&mut buf).await?;
//! print!("{}", String::from_utf8_lossy(&buf[..n]));
//! # Ok(())
//! # }
//! ```

use super::auth::{
    AuthBanner, AuthFailure, PasswordAuthRequest, ServiceAccept, ServiceRequest,
    SERVICE_USERAUTH,
};
use super::byte_queue::ByteQueue;
use super::connection::{
    write_channel_notice, ChannelData, ChannelExtendedData, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelRequest, ChannelRequestType,
    ChannelWindowAdjust, Disconnect, TerminalGeometry,
};
use super::kex::{GroupSize, KexInit, NewKeys};
use super::kex_dh::{compute_exchange_hash, DhGexExchange, ExchangeHashInput, SessionKeys};
use super::listener::{NoopListener, StatusListener, CONNECTION_FAILED};
use super::message::MessageType;
use super::packet::Packet;
use super::stream::{ShellReader, ShellWriter};
use super::transport::{Handler, HandlerTable, Outbound, Phase, RemoteChannel};
use super::version::{self, Version};
use cellsh_platform::{CellshError, CellshResult};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroize;

/// Our number for the session channel. Only one channel is ever opened.
pub const LOCAL_CHANNEL_ID: u32 = 0;

/// Default receive window for the session channel.
pub const DEFAULT_WINDOW_SIZE: u32 = 128 * 1024;

/// Default maximum packet size advertised for the session channel.
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 4096;

/// Client configuration.
#[derive(Clone)]
pub struct SshClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User to authenticate as.
    pub username: String,
    /// Password for the "password" method.
    pub password: String,
    /// Software version in our identification line.
    pub client_name: String,
    /// Terminal type sent in the pty request.
    pub term: String,
    /// Terminal geometry sent in the pty request.
    pub terminal: TerminalGeometry,
    /// DH group size bounds.
    pub group_size: GroupSize,
    /// Receive window for the session channel.
    pub initial_window_size: u32,
    /// Largest data packet we accept on the session channel.
    pub maximum_packet_size: u32,
    /// Timeout for [`SshClient::connect`].
    pub connect_timeout: Duration,
}

impl SshClientConfig {
    /// Creates a configuration with default settings for the given login.
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        let mut config = Self::default();
        config.host = host.to_string();
        config.username = username.to_string();
        config.password = password.to_string();
        config
    }

    /// Checks the settings before anything is sent.
    pub fn validate(&self) -> CellshResult<()> {
        if self.username.is_empty() {
            return Err(CellshError::Config("Username must not be empty".to_string()));
        }
        if self.client_name.is_empty() || self.client_name.contains(char::is_whitespace) {
            return Err(CellshError::Config(format!(
                "Invalid client name: {:?}",
                self.client_name
            )));
        }
        if self.terminal.columns == 0 || self.terminal.rows == 0 {
            return Err(CellshError::Config(format!(
                "Terminal geometry must be non-zero: {}x{}",
                self.terminal.columns, self.terminal.rows
            )));
        }
        if self.initial_window_size == 0 || self.maximum_packet_size == 0 {
            return Err(CellshError::Config(
                "Channel window and packet size must be non-zero".to_string(),
            ));
        }
        self.group_size.validate()
    }
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            client_name: "CellSSH".to_string(),
            term: "vt100".to_string(),
            terminal: TerminalGeometry::default(),
            group_size: GroupSize::default(),
            initial_window_size: DEFAULT_WINDOW_SIZE,
            maximum_packet_size: DEFAULT_MAX_PACKET_SIZE,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

// Manual Debug so the password never reaches a log line.
impl std::fmt::Debug for SshClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_name", &self.client_name)
            .field("term", &self.term)
            .field("terminal", &self.terminal)
            .field("group_size", &self.group_size)
            .field("initial_window_size", &self.initial_window_size)
            .field("maximum_packet_size", &self.maximum_packet_size)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Drop for SshClientConfig {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// SSH client.
///
/// Owns the configuration and the status listener; each call to
/// [`open`](Self::open) or [`connect`](Self::connect) runs one session.
pub struct SshClient {
    config: SshClientConfig,
    listener: Arc<dyn StatusListener>,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SshClient {
    /// Creates a client with a listener that ignores every event.
    pub fn new(config: SshClientConfig) -> Self {
        Self {
            config,
            listener: Arc::new(NoopListener),
        }
    }

    /// Replaces the status listener.
    pub fn with_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SshClientConfig {
        &self.config
    }

    /// Runs a session over an already connected transport.
    ///
    /// Returns once the shell has produced its first output, so nothing can be
    /// written before authentication and channel setup have completed.
    pub async fn open<S>(&self, stream: S) -> CellshResult<(ShellReader, ShellWriter)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection =
            Connection::open(stream, self.config.clone(), Arc::clone(&self.listener)).await?;
        let reader = ShellReader::new(connection).await?;
        let writer = reader.writer();
        Ok((reader, writer))
    }

    /// Opens a TCP connection to `host:port` and runs a session over it.
    pub async fn connect(&self) -> CellshResult<(ShellReader, ShellWriter)> {
        self.config.validate()?;
        let address = (self.config.host.as_str(), self.config.port);
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                CellshError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Connection timeout",
                ))
            })??;
        stream.set_nodelay(true)?;
        debug!(host = %self.config.host, port = self.config.port, "TCP connection established");

        self.open(stream).await
    }
}

/// Returns the OpenSSH-style fingerprint of a host key blob.
pub fn host_key_fingerprint(host_key: &[u8]) -> String {
    format!("SHA256:{}", hex::encode(Sha256::digest(host_key)))
}

/// Values collected during key exchange.
#[derive(Default)]
struct KexState {
    client_version: String,
    server_version: String,
    client_kexinit: Vec<u8>,
    server_kexinit: Vec<u8>,
    dh: Option<DhGexExchange>,
    // (K, H) from the reply, consumed by NEWKEYS.
    pending: Option<(BigUint, Vec<u8>)>,
}

/// Our view of the session channel.
#[derive(Debug, Default)]
struct ChannelState {
    remote_id: Option<u32>,
    local_window: u32,
    eof: bool,
    closed: bool,
}

/// One client session after the version exchange.
///
/// Owns the read half of the transport and the inbound packet. The outbound
/// sender is shared with every [`ShellWriter`].
pub struct Connection {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    inbound: Packet,
    recv_sequence: u32,
    outbound: Arc<Mutex<Outbound>>,
    handlers: HandlerTable,
    phase: Phase,
    config: SshClientConfig,
    listener: Arc<dyn StatusListener>,
    queue: Arc<ByteQueue>,
    kex: KexState,
    session_id: Option<Vec<u8>>,
    host_key: Option<Vec<u8>>,
    server: Option<Version>,
    authenticated: bool,
    channel: ChannelState,
    failure: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("phase", &self.phase)
            .field("recv_sequence", &self.recv_sequence)
            .field("authenticated", &self.authenticated)
            .field("channel", &self.channel)
            .field("failure", &self.failure)
            .field("queued", &self.queue.available())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Exchanges identification lines over `stream` and sends our KEXINIT.
    ///
    /// The rest of the handshake is driven by [`process_packet`](Self::process_packet).
    pub async fn open<S>(
        stream: S,
        config: SshClientConfig,
        listener: Arc<dyn StatusListener>,
    ) -> CellshResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        let mut writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);

        let client = Version::client(&config.client_name);
        let (client_version, server_version, server) =
            version::exchange(&mut *reader, &mut *writer, &client).await?;
        info!(server = %server_version, "connected");

        let mut outbound = Outbound::new(writer);
        let kexinit = KexInit::client_default();
        let mut client_kexinit = Vec::new();
        outbound
            .send_with(|packet| {
                kexinit.write_to(packet);
                client_kexinit = packet.payload().to_vec();
            })
            .await?;
        debug!("sent KEXINIT");

        let mut handlers = HandlerTable::new();
        handlers.register(MessageType::Disconnect as u8, Handler::Disconnect);
        handlers.register(MessageType::Ignore as u8, Handler::Ignore);
        handlers.register(MessageType::Unimplemented as u8, Handler::Unimplemented);
        handlers.register(MessageType::Debug as u8, Handler::Debug);
        handlers.register(MessageType::KexInit as u8, Handler::KexInit);

        let local_window = config.initial_window_size;
        Ok(Self {
            reader,
            inbound: Packet::new(),
            recv_sequence: 0,
            outbound: Arc::new(Mutex::new(outbound)),
            handlers,
            phase: Phase::KexInit,
            config,
            listener,
            queue: Arc::new(ByteQueue::new()),
            kex: KexState {
                client_version,
                server_version,
                client_kexinit,
                ..KexState::default()
            },
            session_id: None,
            host_key: None,
            server: Some(server),
            authenticated: false,
            channel: ChannelState {
                local_window,
                ..ChannelState::default()
            },
            failure: None,
        })
    }

    /// Receives one packet and runs its handler.
    ///
    /// The status listener is called after the handler, with the handler's
    /// text or the error that ended the session. A packet that cannot be read
    /// is reported as [`CONNECTION_FAILED`]. Returns the message type.
    pub async fn process_packet(&mut self) -> CellshResult<u8> {
        if self.phase == Phase::Closed {
            return Err(self.closed_error());
        }

        self.inbound.set_sequence_number(self.recv_sequence);
        self.recv_sequence = self.recv_sequence.wrapping_add(1);
        if let Err(e) = self.inbound.from_network(&mut *self.reader).await {
            return Err(self.fail(CONNECTION_FAILED, e));
        }

        let message_type = match self.inbound.message_type() {
            Some(message_type) => message_type,
            None => {
                let e = CellshError::Protocol("Empty packet payload".to_string());
                return Err(self.fail(CONNECTION_FAILED, e));
            }
        };
        self.inbound.skip(1)?;
        trace!(msg = %MessageType::describe(message_type), "received");

        let result = match self.handlers.get(message_type) {
            Some(handler) => self.dispatch(handler).await,
            None => {
                warn!(
                    msg = %MessageType::describe(message_type),
                    phase = ?self.phase,
                    "no handler registered, ignoring"
                );
                Ok(None)
            }
        };

        match result {
            Ok(message) => {
                self.listener.on_event(message_type, message.as_deref());
                Ok(message_type)
            }
            Err(e) => Err(self.fail(message_type, e)),
        }
    }

    /// Ends the session after a fatal error and reports it to the listener.
    fn fail(&mut self, message_type: u8, error: CellshError) -> CellshError {
        let description = error.to_string();
        warn!(code = message_type, error = %description, "connection failed");
        self.phase = Phase::Closed;
        self.listener.on_event(message_type, Some(&description));
        self.failure = Some(description);
        error
    }

    /// Error returned for any use of the connection once it is closed.
    pub(crate) fn closed_error(&self) -> CellshError {
        match &self.failure {
            Some(description) => {
                CellshError::Protocol(format!("Connection failed: {}", description))
            }
            None => CellshError::Protocol("Connection is closed".to_string()),
        }
    }

    async fn dispatch(&mut self, handler: Handler) -> CellshResult<Option<String>> {
        match handler {
            Handler::Disconnect => Err(Disconnect::read_from(&mut self.inbound)?.into_error()),
            Handler::Ignore => Ok(None),
            Handler::Unimplemented => {
                let sequence = self.inbound.get_u32()?;
                warn!(sequence, "server did not implement one of our packets");
                Ok(None)
            }
            Handler::Debug => {
                let always_display = self.inbound.get_bool()?;
                let message = self.inbound.get_string()?;
                debug!(message = %message, "server debug message");
                Ok(always_display.then_some(message))
            }
            Handler::KexInit => self.on_kex_init().await,
            Handler::KexGroup => self.on_kex_group().await,
            Handler::KexReply => self.on_kex_reply(),
            Handler::NewKeys => self.on_new_keys().await,
            Handler::ServiceAccept => self.on_service_accept().await,
            Handler::AuthSuccess => self.on_auth_success().await,
            Handler::AuthFailure => Err(AuthFailure::read_from(&mut self.inbound)?.into_error()),
            Handler::AuthBanner => {
                let banner = AuthBanner::read_from(&mut self.inbound)?;
                Ok(Some(banner.message().to_string()))
            }
            Handler::OpenConfirmation => self.on_open_confirmation().await,
            Handler::OpenFailure => {
                Err(ChannelOpenFailure::read_from(&mut self.inbound)?.into_error())
            }
            Handler::ChannelData => {
                let data = ChannelData::read_from(&mut self.inbound)?;
                self.on_channel_data(data.recipient_channel, &data.data).await
            }
            Handler::ChannelExtendedData => {
                let data = ChannelExtendedData::read_from(&mut self.inbound)?;
                self.on_channel_data(data.recipient_channel, &data.data).await
            }
            Handler::WindowAdjust => {
                let adjust = ChannelWindowAdjust::read_from(&mut self.inbound)?;
                trace!(bytes = adjust.bytes_to_add, "server window adjusted");
                Ok(None)
            }
            Handler::ChannelEof => {
                let recipient_channel = self.inbound.get_u32()?;
                self.check_recipient(recipient_channel)?;
                debug!("server sent EOF");
                self.channel.eof = true;
                Ok(None)
            }
            Handler::ChannelClose => self.on_channel_close().await,
            Handler::ChannelRequest => self.on_channel_request().await,
            Handler::ChannelSuccess => {
                debug!("channel request accepted");
                Ok(None)
            }
            Handler::ChannelFailure => Err(CellshError::ChannelFailed {
                message_type: MessageType::ChannelFailure as u8,
                reason_code: 0,
                description: "Channel request refused".to_string(),
            }),
        }
    }

    async fn send<F>(outbound: &Mutex<Outbound>, fill: F) -> CellshResult<u32>
    where
        F: FnOnce(&mut Packet),
    {
        outbound.lock().await.send_with(fill).await
    }

    fn advance(&mut self, from: &[MessageType], to: &[(MessageType, Handler)], phase: Phase) {
        for message in from {
            self.handlers.remove(*message as u8);
        }
        for (message, handler) in to {
            self.handlers.register(*message as u8, *handler);
        }
        debug!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
    }

    async fn on_kex_init(&mut self) -> CellshResult<Option<String>> {
        let server = KexInit::read_from(&mut self.inbound)?;
        server.supports_client_suite()?;
        if server.first_kex_packet_follows() {
            debug!("server announced a guessed key exchange packet");
        }
        self.kex.server_kexinit = self.inbound.payload().to_vec();

        let group_size = self.config.group_size;
        Self::send(&self.outbound, |packet| group_size.write_request(packet)).await?;

        self.advance(
            &[MessageType::KexInit],
            &[(MessageType::KexDhGexGroup, Handler::KexGroup)],
            Phase::KexGroup,
        );
        Ok(None)
    }

    async fn on_kex_group(&mut self) -> CellshResult<Option<String>> {
        let prime = self.inbound.get_biguint()?;
        let generator = self.inbound.get_biguint()?;

        let bits = prime.bits();
        let size = self.config.group_size;
        if bits < u64::from(size.min) || bits > u64::from(size.max) {
            warn!(bits, min = size.min, max = size.max, "DH group outside requested bounds");
        }

        let dh = DhGexExchange::new(prime, generator)?;
        let public_key = dh.public_key().clone();
        Self::send(&self.outbound, |packet| {
            packet.put_u8(MessageType::KexDhGexInit as u8);
            packet.put_biguint(&public_key);
        })
        .await?;
        self.kex.dh = Some(dh);

        self.advance(
            &[MessageType::KexDhGexGroup],
            &[(MessageType::KexDhGexReply, Handler::KexReply)],
            Phase::KexReply,
        );
        Ok(None)
    }

    fn on_kex_reply(&mut self) -> CellshResult<Option<String>> {
        let host_key = self.inbound.get_byte_string()?;
        let server_public = self.inbound.get_biguint()?;
        // The host key signature is read but not verified.
        let _signature = self.inbound.get_byte_string()?;

        let dh = self
            .kex
            .dh
            .take()
            .ok_or_else(|| CellshError::Protocol("DH reply without a group".to_string()))?;
        let shared_secret = dh.compute_shared_secret(&server_public)?;

        let exchange_hash = compute_exchange_hash(&ExchangeHashInput {
            client_version: &self.kex.client_version,
            server_version: &self.kex.server_version,
            client_kexinit: &self.kex.client_kexinit,
            server_kexinit: &self.kex.server_kexinit,
            host_key: &host_key,
            group_size: self.config.group_size,
            prime: dh.prime(),
            generator: dh.generator(),
            client_public: dh.public_key(),
            server_public: &server_public,
            shared_secret: &shared_secret,
        });

        if self.session_id.is_none() {
            self.session_id = Some(exchange_hash.clone());
        }
        debug!(fingerprint = %host_key_fingerprint(&host_key), "server host key");
        self.host_key = Some(host_key);
        self.kex.pending = Some((shared_secret, exchange_hash));

        self.advance(
            &[MessageType::KexDhGexReply],
            &[(MessageType::NewKeys, Handler::NewKeys)],
            Phase::NewKeys,
        );
        Ok(None)
    }

    async fn on_new_keys(&mut self) -> CellshResult<Option<String>> {
        let (shared_secret, exchange_hash) = self
            .kex
            .pending
            .take()
            .ok_or_else(|| CellshError::Protocol("NEWKEYS before key exchange".to_string()))?;
        let session_id = self
            .session_id
            .as_deref()
            .ok_or_else(|| CellshError::Protocol("No session identifier".to_string()))?;

        let keys = SessionKeys::derive(&shared_secret, &exchange_hash, session_id);
        let (encryption, encryption_mac) = keys.client_to_server()?;
        let (decryption, decryption_mac) = keys.server_to_client()?;
        drop(keys);

        {
            let mut outbound = self.outbound.lock().await;
            outbound.send_with(|packet| NewKeys.write_to(packet)).await?;
            outbound
                .packet_mut()
                .set_encryption(encryption, encryption_mac);
            self.inbound.set_decryption(decryption, decryption_mac);
            debug!("new keys installed");

            if !self.authenticated {
                outbound
                    .send_with(|packet| ServiceRequest::new(SERVICE_USERAUTH).write_to(packet))
                    .await?;
            }
        }

        self.advance(
            &[MessageType::NewKeys],
            &[(MessageType::ServiceAccept, Handler::ServiceAccept)],
            Phase::Service,
        );
        Ok(None)
    }

    async fn on_service_accept(&mut self) -> CellshResult<Option<String>> {
        let accept = ServiceAccept::read_from(&mut self.inbound)?;
        if accept.service_name() != SERVICE_USERAUTH {
            warn!(service = %accept.service_name(), "unexpected service accepted");
            return Ok(None);
        }

        let request = PasswordAuthRequest::new(&self.config.username, &self.config.password);
        Self::send(&self.outbound, |packet| request.write_to(packet)).await?;
        debug!(user = %request.user_name(), "sent password authentication");

        self.advance(
            &[MessageType::ServiceAccept],
            &[
                (MessageType::UserauthSuccess, Handler::AuthSuccess),
                (MessageType::UserauthFailure, Handler::AuthFailure),
                (MessageType::UserauthBanner, Handler::AuthBanner),
            ],
            Phase::Auth,
        );
        Ok(None)
    }

    async fn on_auth_success(&mut self) -> CellshResult<Option<String>> {
        self.authenticated = true;
        info!(user = %self.config.username, "authenticated");

        let open = ChannelOpen::session(
            LOCAL_CHANNEL_ID,
            self.config.initial_window_size,
            self.config.maximum_packet_size,
        );
        Self::send(&self.outbound, |packet| open.write_to(packet)).await?;

        self.advance(
            &[
                MessageType::UserauthSuccess,
                MessageType::UserauthFailure,
                MessageType::UserauthBanner,
            ],
            &[
                (MessageType::ChannelOpenConfirmation, Handler::OpenConfirmation),
                (MessageType::ChannelOpenFailure, Handler::OpenFailure),
                (MessageType::ChannelData, Handler::ChannelData),
                (MessageType::ChannelExtendedData, Handler::ChannelExtendedData),
                (MessageType::ChannelWindowAdjust, Handler::WindowAdjust),
                (MessageType::ChannelEof, Handler::ChannelEof),
                (MessageType::ChannelClose, Handler::ChannelClose),
                (MessageType::ChannelRequest, Handler::ChannelRequest),
                (MessageType::ChannelSuccess, Handler::ChannelSuccess),
                (MessageType::ChannelFailure, Handler::ChannelFailure),
            ],
            Phase::ChannelOpen,
        );
        Ok(None)
    }

    async fn on_open_confirmation(&mut self) -> CellshResult<Option<String>> {
        let confirmation = ChannelOpenConfirmation::read_from(&mut self.inbound)?;
        if confirmation.recipient_channel != LOCAL_CHANNEL_ID {
            return Err(CellshError::Protocol(format!(
                "Confirmation for unknown channel {}",
                confirmation.recipient_channel
            )));
        }
        if self.channel.remote_id.is_some() {
            return Err(CellshError::Protocol(
                "Session channel confirmed twice".to_string(),
            ));
        }

        let remote = RemoteChannel {
            id: confirmation.sender_channel,
            maximum_packet_size: confirmation.maximum_packet_size,
            closed: false,
        };
        let pty = ChannelRequest::new(
            remote.id,
            ChannelRequestType::PtyReq {
                term: self.config.term.clone(),
                geometry: self.config.terminal,
                modes: Vec::new(),
            },
            false,
        );
        let shell = ChannelRequest::new(remote.id, ChannelRequestType::Shell, false);

        {
            let mut outbound = self.outbound.lock().await;
            outbound.set_channel(remote);
            outbound.send_with(|packet| pty.write_to(packet)).await?;
            outbound.send_with(|packet| shell.write_to(packet)).await?;
        }
        self.channel.remote_id = Some(remote.id);
        info!(
            remote_channel = remote.id,
            max_packet = remote.maximum_packet_size,
            "session channel open"
        );

        self.advance(
            &[MessageType::ChannelOpenConfirmation, MessageType::ChannelOpenFailure],
            &[],
            Phase::Channel,
        );
        Ok(None)
    }

    fn check_recipient(&self, recipient_channel: u32) -> CellshResult<()> {
        if recipient_channel != LOCAL_CHANNEL_ID {
            return Err(CellshError::Protocol(format!(
                "Message for unknown channel {}",
                recipient_channel
            )));
        }
        Ok(())
    }

    async fn on_channel_data(
        &mut self,
        recipient_channel: u32,
        data: &[u8],
    ) -> CellshResult<Option<String>> {
        self.check_recipient(recipient_channel)?;
        if self.channel.closed {
            debug!(len = data.len(), "dropping data for closed channel");
            return Ok(None);
        }

        self.queue.write(data);

        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        if len > self.channel.local_window {
            warn!(
                len,
                window = self.channel.local_window,
                "server exceeded the channel window"
            );
        }
        self.channel.local_window = self.channel.local_window.saturating_sub(len);

        let initial = self.config.initial_window_size;
        if self.channel.local_window < initial / 2 {
            if let Some(remote_id) = self.channel.remote_id {
                let adjust = ChannelWindowAdjust {
                    recipient_channel: remote_id,
                    bytes_to_add: initial - self.channel.local_window,
                };
                Self::send(&self.outbound, |packet| adjust.write_to(packet)).await?;
                trace!(bytes = adjust.bytes_to_add, "window replenished");
                self.channel.local_window = initial;
            }
        }
        Ok(None)
    }

    async fn on_channel_close(&mut self) -> CellshResult<Option<String>> {
        let recipient_channel = self.inbound.get_u32()?;
        self.check_recipient(recipient_channel)?;
        self.channel.closed = true;

        {
            let mut outbound = self.outbound.lock().await;
            if let Some(remote) = outbound.channel() {
                if outbound.close_channel() {
                    outbound
                        .send_with(|packet| {
                            write_channel_notice(packet, MessageType::ChannelClose, remote.id)
                        })
                        .await?;
                }
            }
        }
        info!("session channel closed");

        self.advance(&[], &[], Phase::Closed);
        Ok(None)
    }

    async fn on_channel_request(&mut self) -> CellshResult<Option<String>> {
        let request = ChannelRequest::read_from(&mut self.inbound)?;
        self.check_recipient(request.recipient_channel())?;

        if request.want_reply() {
            warn!(request = %request.request_type().name(), "refusing channel request");
            if let Some(remote_id) = self.channel.remote_id {
                Self::send(&self.outbound, |packet| {
                    write_channel_notice(packet, MessageType::ChannelFailure, remote_id)
                })
                .await?;
            }
        }

        match request.request_type() {
            ChannelRequestType::ExitStatus { exit_status } => {
                Ok(Some(format!("exit-status {}", exit_status)))
            }
            other => {
                debug!(request = %other.name(), "channel request ignored");
                Ok(None)
            }
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Exchange hash of the first key exchange, once known.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// True after USERAUTH_SUCCESS.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Host key blob from the DH reply.
    pub fn host_key(&self) -> Option<&[u8]> {
        self.host_key.as_deref()
    }

    /// Fingerprint of the server host key, once received.
    pub fn host_key_fingerprint(&self) -> Option<String> {
        self.host_key.as_deref().map(host_key_fingerprint)
    }

    /// The server's parsed identification.
    pub fn server_version(&self) -> Option<&Version> {
        self.server.as_ref()
    }

    /// True once the server sent CHANNEL_EOF.
    pub fn is_eof(&self) -> bool {
        self.channel.eof
    }

    /// True once the session channel or the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.channel.closed || self.phase == Phase::Closed
    }

    /// Description of the error that ended the session, if one did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Bytes received on the session channel and not yet read.
    pub fn queue(&self) -> Arc<ByteQueue> {
        Arc::clone(&self.queue)
    }

    pub(crate) fn outbound(&self) -> Arc<Mutex<Outbound>> {
        Arc::clone(&self.outbound)
    }
}

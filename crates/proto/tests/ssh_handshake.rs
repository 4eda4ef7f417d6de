//! End-to-end handshake tests against a scripted in-process server.
//!
//! The server side is built from the same packet codec and key schedule the
//! client uses, talking over a `tokio::io::duplex` pipe:
//! - Version exchange and KEXINIT
//! - DH group exchange in the toy group p = 23, g = 5
//! - NEWKEYS and the switch to AES-128-CBC / HMAC-SHA1
//! - Password authentication
//! - Session channel, pty-req, shell and channel data

use cellsh_platform::CellshError;
use cellsh_proto::ssh::auth::{AuthFailure, ServiceAccept, ServiceRequest};
use cellsh_proto::ssh::connection::{
    write_channel_notice, ChannelData, ChannelOpen, ChannelOpenConfirmation, ChannelOpenFailure,
    ChannelRequest, ChannelRequestType, TerminalGeometry,
};
use cellsh_proto::ssh::kex::{GroupSize, KexInit, NewKeys};
use cellsh_proto::ssh::kex_dh::{compute_exchange_hash, ExchangeHashInput, SessionKeys};
use cellsh_proto::ssh::listener::{RecordingListener, CONNECTION_FAILED};
use cellsh_proto::ssh::message::MessageType;
use cellsh_proto::ssh::packet::Packet;
use cellsh_proto::ssh::{SshClient, SshClientConfig};
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{timeout, Duration};

const SERVER_VERSION: &str = "SSH-2.0-ScriptedServer_1.0";
const SERVER_CHANNEL: u32 = 42;
const HOST_KEY: &[u8] = b"\x00\x00\x00\x07ssh-dss scripted host key";

/// What the scripted server answers to the password request.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
}

/// Minimal server half of the protocol, one packet at a time.
struct ScriptedServer {
    stream: DuplexStream,
    outbound: Packet,
    inbound: Packet,
    send_sequence: u32,
    recv_sequence: u32,
}

impl ScriptedServer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            outbound: Packet::new(),
            inbound: Packet::new(),
            send_sequence: 0,
            recv_sequence: 0,
        }
    }

    async fn send<F: FnOnce(&mut Packet)>(&mut self, fill: F) -> Vec<u8> {
        self.outbound.reset();
        fill(&mut self.outbound);
        let payload = self.outbound.payload().to_vec();
        self.outbound.set_sequence_number(self.send_sequence);
        self.send_sequence += 1;
        self.outbound.send(&mut self.stream).await.unwrap();
        payload
    }

    /// Receives one packet and returns its type; the cursor is left after it.
    async fn recv(&mut self) -> u8 {
        self.inbound.set_sequence_number(self.recv_sequence);
        self.recv_sequence += 1;
        self.inbound.from_network(&mut self.stream).await.unwrap();
        self.inbound.get_u8().unwrap()
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        loop {
            let byte = self.stream.read_u8().await.unwrap();
            if byte == b'\n' {
                return line;
            }
            line.push(char::from(byte));
        }
    }

    /// Runs everything up to and including the password verdict.
    async fn handshake(&mut self, verdict: Verdict) {
        self.stream
            .write_all(format!("{}\r\n", SERVER_VERSION).as_bytes())
            .await
            .unwrap();
        let client_version = self.read_line().await;
        assert_eq!(client_version, "SSH-2.0-CellSSH");

        assert_eq!(self.recv().await, MessageType::KexInit as u8);
        let client_kexinit = self.inbound.payload().to_vec();
        let server_kexinit = self
            .send(|p| KexInit::client_default().write_to(p))
            .await;

        assert_eq!(self.recv().await, MessageType::KexDhGexRequest as u8);
        let group_size = GroupSize {
            min: self.inbound.get_u32().unwrap(),
            preferred: self.inbound.get_u32().unwrap(),
            max: self.inbound.get_u32().unwrap(),
        };
        assert_eq!(group_size, GroupSize::default());

        let prime = BigUint::from(23u32);
        let generator = BigUint::from(5u32);
        self.send(|p| {
            p.put_u8(MessageType::KexDhGexGroup as u8);
            p.put_biguint(&prime);
            p.put_biguint(&generator);
        })
        .await;

        assert_eq!(self.recv().await, MessageType::KexDhGexInit as u8);
        let client_public = self.inbound.get_biguint().unwrap();

        // y = 6: f = 5^6 mod 23 = 8.
        let server_private = BigUint::from(6u32);
        let server_public = generator.modpow(&server_private, &prime);
        assert_eq!(server_public, BigUint::from(8u32));
        let shared_secret = client_public.modpow(&server_private, &prime);

        let exchange_hash = compute_exchange_hash(&ExchangeHashInput {
            client_version: &client_version,
            server_version: SERVER_VERSION,
            client_kexinit: &client_kexinit,
            server_kexinit: &server_kexinit,
            host_key: HOST_KEY,
            group_size,
            prime: &prime,
            generator: &generator,
            client_public: &client_public,
            server_public: &server_public,
            shared_secret: &shared_secret,
        });

        self.send(|p| {
            p.put_u8(MessageType::KexDhGexReply as u8);
            p.put_byte_string(HOST_KEY);
            p.put_biguint(&server_public);
            p.put_byte_string(b"unverified signature");
        })
        .await;

        let keys = SessionKeys::derive(&shared_secret, &exchange_hash, &exchange_hash);
        self.send(|p| NewKeys.write_to(p)).await;
        let (cipher, mac) = keys.server_sealing().unwrap();
        self.outbound.set_encryption(cipher, mac);

        assert_eq!(self.recv().await, MessageType::NewKeys as u8);
        let (cipher, mac) = keys.server_opening().unwrap();
        self.inbound.set_decryption(cipher, mac);

        assert_eq!(self.recv().await, MessageType::ServiceRequest as u8);
        let request = ServiceRequest::read_from(&mut self.inbound).unwrap();
        assert_eq!(request.service_name(), "ssh-userauth");
        self.send(|p| ServiceAccept::new("ssh-userauth").write_to(p))
            .await;

        assert_eq!(self.recv().await, MessageType::UserauthRequest as u8);
        assert_eq!(self.inbound.get_string().unwrap(), "alice");
        assert_eq!(self.inbound.get_string().unwrap(), "ssh-connection");
        assert_eq!(self.inbound.get_string().unwrap(), "password");
        assert!(!self.inbound.get_bool().unwrap());
        assert_eq!(self.inbound.get_string().unwrap(), "secret");

        match verdict {
            Verdict::Accept => {
                self.send(|p| p.put_u8(MessageType::UserauthSuccess as u8))
                    .await;
            }
            Verdict::Reject => {
                let failure = AuthFailure::new(vec!["publickey".to_string()], false);
                self.send(|p| failure.write_to(p)).await;
            }
        }
    }

    /// Accepts the session channel and checks pty-req and shell.
    async fn open_shell(&mut self) {
        assert_eq!(self.recv().await, MessageType::ChannelOpen as u8);
        let open = ChannelOpen::read_from(&mut self.inbound).unwrap();
        assert_eq!(open.channel_type(), "session");
        assert_eq!(open.sender_channel(), 0);
        assert_eq!(open.initial_window_size(), 128 * 1024);

        let confirmation = ChannelOpenConfirmation {
            recipient_channel: open.sender_channel(),
            sender_channel: SERVER_CHANNEL,
            initial_window_size: 1 << 20,
            maximum_packet_size: 32768,
        };
        self.send(|p| confirmation.write_to(p)).await;

        assert_eq!(self.recv().await, MessageType::ChannelRequest as u8);
        let pty = ChannelRequest::read_from(&mut self.inbound).unwrap();
        assert_eq!(pty.recipient_channel(), SERVER_CHANNEL);
        assert!(!pty.want_reply());
        match pty.request_type() {
            ChannelRequestType::PtyReq {
                term,
                geometry,
                modes,
            } => {
                assert_eq!(term, "vt100");
                assert_eq!(*geometry, TerminalGeometry::default());
                assert!(modes.is_empty());
            }
            other => panic!("expected pty-req, got {:?}", other),
        }

        assert_eq!(self.recv().await, MessageType::ChannelRequest as u8);
        let shell = ChannelRequest::read_from(&mut self.inbound).unwrap();
        assert_eq!(shell.request_type(), &ChannelRequestType::Shell);
        assert!(!shell.want_reply());
    }

    /// Reads until the client hangs up, returning the message types seen.
    async fn drain(&mut self) -> Vec<u8> {
        let mut seen = Vec::new();
        loop {
            self.inbound.set_sequence_number(self.recv_sequence);
            self.recv_sequence += 1;
            if self.inbound.from_network(&mut self.stream).await.is_err() {
                return seen;
            }
            seen.push(self.inbound.get_u8().unwrap());
        }
    }
}

fn client(listener: Arc<RecordingListener>) -> SshClient {
    SshClient::new(SshClientConfig::new("scripted", "alice", "secret")).with_listener(listener)
}

#[tokio::test]
async fn test_handshake_to_shell_output() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cellsh_proto=debug")
        .with_test_writer()
        .try_init();

    let (client_end, server_end) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let mut server = ScriptedServer::new(server_end);
        server.handshake(Verdict::Accept).await;
        server.open_shell().await;
        server
            .send(|p| ChannelData::write(p, 0, b"hello\n"))
            .await;

        // Keystrokes from the client.
        assert_eq!(server.recv().await, MessageType::ChannelData as u8);
        let data = ChannelData::read_from(&mut server.inbound).unwrap();
        assert_eq!(data.recipient_channel, SERVER_CHANNEL);
        assert_eq!(data.data, b"exit\n");

        server
            .send(|p| write_channel_notice(p, MessageType::ChannelClose, 0))
            .await;
        server.drain().await
    });

    let listener = Arc::new(RecordingListener::new());
    let (mut reader, writer) = timeout(
        Duration::from_secs(5),
        client(listener.clone()).open(client_end),
    )
    .await
    .expect("handshake timed out")
    .expect("handshake failed");

    assert_eq!(listener.message_types(), vec![20, 31, 33, 21, 6, 52, 91, 94]);
    assert!(reader.connection().is_authenticated());
    assert_eq!(reader.connection().session_id().map(<[u8]>::len), Some(20));
    assert!(reader
        .connection()
        .host_key_fingerprint()
        .unwrap()
        .starts_with("SHA256:"));

    let mut buf = [0u8; 64];
    let n = reader.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello\n");

    writer.write(b"exit\n").await.unwrap();

    // CHANNEL_CLOSE ends the stream.
    let n = timeout(Duration::from_secs(5), reader.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(reader.connection().is_closed());
    assert!(writer.write(b"late").await.is_err());

    writer.disconnect().await.unwrap();
    let after_close = server.await.unwrap();
    assert_eq!(after_close, vec![97, 1]);
}

#[tokio::test]
async fn test_partial_reads_drain_queue_in_order() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let mut server = ScriptedServer::new(server_end);
        server.handshake(Verdict::Accept).await;
        server.open_shell().await;
        server
            .send(|p| ChannelData::write(p, 0, b"Last login: today\r\n"))
            .await;
        server.send(|p| ChannelData::write(p, 0, b"$ ")).await;
        server.drain().await
    });

    let (mut reader, writer) = client(Arc::new(RecordingListener::new()))
        .open(client_end)
        .await
        .unwrap();

    let mut output = Vec::new();
    let mut buf = [0u8; 5];
    while output.len() < 21 {
        let n = reader.read(&mut buf).await.unwrap();
        assert!(n > 0);
        output.extend_from_slice(&buf[..n]);
    }
    assert_eq!(output, b"Last login: today\r\n$ ");
    assert_eq!(reader.available(), 0);

    writer.disconnect().await.unwrap();
    assert_eq!(server.await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let mut server = ScriptedServer::new(server_end);
        server.handshake(Verdict::Reject).await;
        server.drain().await
    });

    let listener = Arc::new(RecordingListener::new());
    let result = timeout(
        Duration::from_secs(5),
        client(listener.clone()).open(client_end),
    )
    .await
    .expect("handshake timed out");

    match result {
        Err(CellshError::AuthenticationFailed {
            methods,
            partial_success,
        }) => {
            assert_eq!(methods, vec!["publickey"]);
            assert!(!partial_success);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("authentication should have failed"),
    }

    let events = listener.events();
    let (last_type, last_message) = events.last().unwrap();
    assert_eq!(*last_type, MessageType::UserauthFailure as u8);
    assert!(last_message.is_some());

    // The client gave up without asking for a channel.
    let after_failure = server.await.unwrap();
    assert!(!after_failure.contains(&(MessageType::ChannelOpen as u8)));
}

#[tokio::test]
async fn test_channel_open_failure_is_fatal() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut server = ScriptedServer::new(server_end);
        server.handshake(Verdict::Accept).await;
        assert_eq!(server.recv().await, MessageType::ChannelOpen as u8);
        let failure = ChannelOpenFailure {
            recipient_channel: 0,
            reason_code: 4,
            description: String::new(),
        };
        server.send(|p| failure.write_to(p)).await;
        server.drain().await
    });

    let result = client(Arc::new(RecordingListener::new()))
        .open(client_end)
        .await;
    match result {
        Err(error @ CellshError::ChannelFailed { .. }) => {
            assert_eq!(error.reason_code(), Some(92));
            assert!(error.to_string().contains("resource shortage"));
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("channel open should have failed"),
    }
}

#[tokio::test]
async fn test_tampered_packet_is_rejected() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut server = ScriptedServer::new(server_end);
        server.handshake(Verdict::Accept).await;
        server.open_shell().await;

        // Corrupt the last MAC byte of an otherwise valid data packet.
        server.outbound.reset();
        ChannelData::write(&mut server.outbound, 0, b"tampered");
        server.outbound.set_sequence_number(server.send_sequence);
        server.outbound.bless().unwrap();
        let mut wire = server.outbound.wire_bytes().to_vec();
        if let Some(last) = wire.last_mut() {
            *last ^= 0x01;
        }
        server.stream.write_all(&wire).await.unwrap();
        server.drain().await
    });

    let listener = Arc::new(RecordingListener::new());
    let result = client(listener.clone()).open(client_end).await;
    assert!(matches!(result, Err(CellshError::Security(_))));

    let events = listener.events();
    let (code, message) = events.last().unwrap();
    assert_eq!(*code, CONNECTION_FAILED);
    assert!(message.as_deref().unwrap().contains("MAC verification failed"));
}

#[tokio::test]
async fn test_reads_fail_after_corrupted_packet() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut server = ScriptedServer::new(server_end);
        server.handshake(Verdict::Accept).await;
        server.open_shell().await;
        server.send(|p| ChannelData::write(p, 0, b"hi")).await;

        server.outbound.reset();
        ChannelData::write(&mut server.outbound, 0, b"tampered");
        server.outbound.set_sequence_number(server.send_sequence);
        server.outbound.bless().unwrap();
        let mut wire = server.outbound.wire_bytes().to_vec();
        if let Some(last) = wire.last_mut() {
            *last ^= 0x01;
        }
        server.stream.write_all(&wire).await.unwrap();
        server.drain().await
    });

    let listener = Arc::new(RecordingListener::new());
    let (mut reader, _writer) = client(listener.clone())
        .open(client_end)
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hi");

    let first = timeout(Duration::from_secs(5), reader.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(first, Err(CellshError::Security(_))));

    // The session stays failed; it never turns into a clean end of stream.
    match reader.read(&mut buf).await {
        Err(CellshError::Protocol(message)) => {
            assert!(message.starts_with("Connection failed: "));
            assert!(message.contains("MAC verification failed"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(reader.connection().failure().is_some());

    let events = listener.events();
    assert_eq!(events.last().unwrap().0, CONNECTION_FAILED);
    assert_eq!(
        events.iter().filter(|(code, _)| *code == CONNECTION_FAILED).count(),
        1
    );
}

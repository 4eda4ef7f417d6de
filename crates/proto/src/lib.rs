//! SSH2 client engine for the CellSSH terminal.
//!
//! This crate speaks the client side of a deliberately small SSH2 subset:
//!
//! - **Transport** - version exchange, binary packet protocol, AES-128-CBC
//!   with HMAC-SHA1 (RFC 4253)
//! - **Key exchange** - diffie-hellman-group-exchange-sha1 (RFC 4419)
//! - **Authentication** - password only (RFC 4252)
//! - **Connection** - one "session" channel with a pty and a shell (RFC 4254)
//!
//! Terminal emulation, the user interface and opening the socket are left to
//! the embedding application. It hands over any connected
//! `AsyncRead + AsyncWrite` stream and gets back a [`ssh::ShellReader`] /
//! [`ssh::ShellWriter`] pair.
//!
//! # Features
//!
//! - `ssh` (default) - the SSH client
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::Packet;
//!
//! let mut packet = Packet::new();
//! packet.put_u8(2); // SSH_MSG_IGNORE
//! packet.put_string("keep-alive");
//! packet.bless().unwrap();
//!
//! // length, padding length, payload, padding; a multiple of 8 bytes
//! assert_eq!(packet.wire_bytes().len() % 8, 0);
//! ```
//!
//! # Security
//!
//! - Secrets (passwords, DH exponents, session keys) are zeroized on drop
//! - MACs are compared in constant time
//! - The server host key is fingerprinted but **not** verified
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol
//! - [RFC 4419](https://datatracker.ietf.org/doc/html/rfc4419) - Diffie-Hellman Group Exchange

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;

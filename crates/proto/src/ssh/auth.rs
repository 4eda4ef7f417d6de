//! SSH user authentication (RFC 4252).
//!
//! Only the "password" method is implemented. After NEWKEYS the client asks
//! for the `ssh-userauth` service; once the server accepts, it sends a single
//! password request and waits for success or failure.
//!
//! # Security
//!
//! - Passwords are zeroized when the request is dropped
//! - Passwords never appear in `Debug` output
//! - Only sent after encryption is active
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::auth::PasswordAuthRequest;
//! use cellsh_proto::ssh::Packet;
//!
//! let request = PasswordAuthRequest::new("alice", "secret");
//! let mut packet = Packet::new();
//! request.write_to(&mut packet);
//! assert_eq!(packet.message_type(), Some(50));
//! ```

use super::message::MessageType;
use super::packet::Packet;
use cellsh_platform::{CellshError, CellshResult};
use zeroize::Zeroize;

/// Service requested after key exchange.
pub const SERVICE_USERAUTH: &str = "ssh-userauth";

/// Service started once authenticated.
pub const SERVICE_CONNECTION: &str = "ssh-connection";

/// SSH_MSG_SERVICE_REQUEST (RFC 4253 Section 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    service_name: String,
}

impl ServiceRequest {
    /// Creates a request for the named service.
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ServiceRequest as u8);
        packet.put_string(&self.service_name);
    }

    /// Parses the message body (type byte already consumed).
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            service_name: packet.get_string()?,
        })
    }
}

/// SSH_MSG_SERVICE_ACCEPT (RFC 4253 Section 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    service_name: String,
}

impl ServiceAccept {
    /// Creates an accept for the named service.
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ServiceAccept as u8);
        packet.put_string(&self.service_name);
    }

    /// Parses the message body (type byte already consumed).
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            service_name: packet.get_string()?,
        })
    }
}

/// SSH_MSG_USERAUTH_REQUEST with the "password" method (RFC 4252 Section 8).
pub struct PasswordAuthRequest {
    user_name: String,
    password: String,
}

impl std::fmt::Debug for PasswordAuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuthRequest")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PasswordAuthRequest {
    /// Creates a password request for `ssh-connection`.
    pub fn new(user_name: &str, password: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            password: password.to_string(),
        }
    }

    /// Returns the user name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Writes the request.
    ///
    /// ```text
    /// byte      SSH_MSG_USERAUTH_REQUEST (50)
    /// string    user name
    /// string    "ssh-connection"
    /// string    "password"
    /// boolean   FALSE
    /// string    plaintext password
    /// ```
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::UserauthRequest as u8);
        packet.put_string(&self.user_name);
        packet.put_string(SERVICE_CONNECTION);
        packet.put_string("password");
        packet.put_bool(false);
        packet.put_string(&self.password);
    }
}

impl Drop for PasswordAuthRequest {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// SSH_MSG_USERAUTH_FAILURE message (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    /// Authentications that can continue
    methods_can_continue: Vec<String>,
    /// Partial success flag
    partial_success: bool,
}

impl AuthFailure {
    /// Creates a new authentication failure message.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods_can_continue: methods,
            partial_success,
        }
    }

    /// Returns the methods that can continue.
    pub fn methods_can_continue(&self) -> &[String] {
        &self.methods_can_continue
    }

    /// Returns whether partial success was achieved.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::UserauthFailure as u8);
        packet.put_string(&self.methods_can_continue.join(","));
        packet.put_bool(self.partial_success);
    }

    /// Parses the message body (type byte already consumed).
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        let methods = packet.get_string()?;
        let methods_can_continue = methods
            .split(',')
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();
        let partial_success = packet.get_bool()?;

        Ok(Self {
            methods_can_continue,
            partial_success,
        })
    }

    /// Converts the failure into the fatal error returned to the caller.
    pub fn into_error(self) -> CellshError {
        CellshError::AuthenticationFailed {
            methods: self.methods_can_continue,
            partial_success: self.partial_success,
        }
    }
}

/// SSH_MSG_USERAUTH_BANNER message (RFC 4252 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    message: String,
    language_tag: String,
}

impl AuthBanner {
    /// Returns the banner text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the RFC 3066 language tag, empty if none was sent.
    pub fn language_tag(&self) -> &str {
        &self.language_tag
    }

    /// Parses the message body (type byte already consumed).
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        let message = packet.get_string()?;
        // Some servers omit the language tag.
        let language_tag = if packet.remaining() > 0 {
            packet.get_string()?
        } else {
            String::new()
        };
        Ok(Self {
            message,
            language_tag,
        })
    }
}

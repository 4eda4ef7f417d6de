//! Error types for cellsh

use std::fmt;

/// SSH message number of `SSH_MSG_DISCONNECT`.
const MSG_DISCONNECT: u8 = 1;
/// SSH message number of `SSH_MSG_USERAUTH_FAILURE`.
const MSG_USERAUTH_FAILURE: u8 = 51;

/// Unified error type for all cellsh operations.
///
/// Every variant is fatal to the connection that produced it: once a
/// connection returns an error it must not be used again. Conditions the
/// session survives (unknown message types, debug messages) never surface
/// as a `CellshError`.
#[derive(Debug)]
pub enum CellshError {
    /// Transport I/O failed (read, write, connect).
    Io(std::io::Error),

    /// Invalid client configuration.
    Config(String),

    /// The peer violated the wire protocol (bad framing, malformed field,
    /// message in the wrong phase, no common algorithm).
    Protocol(String),

    /// An integrity or key-exchange check failed (MAC mismatch, DH value
    /// out of range).
    Security(String),

    /// The server rejected the password.
    AuthenticationFailed {
        /// Authentication methods the server says may continue.
        methods: Vec<String>,
        /// Partial success flag from `SSH_MSG_USERAUTH_FAILURE`.
        partial_success: bool,
    },

    /// Opening the session channel or one of its requests was refused.
    ChannelFailed {
        /// Message type that reported the failure (92 or 100).
        message_type: u8,
        /// Reason code sent by the server, 0 when none was given.
        reason_code: u32,
        /// Human readable description.
        description: String,
    },

    /// The peer sent `SSH_MSG_DISCONNECT`.
    Disconnected {
        /// Disconnect reason code (RFC 4253 Section 11.1).
        reason: u32,
        /// Description supplied by the peer.
        description: String,
    },
}

impl CellshError {
    /// Returns the SSH message type that triggered this error, if any.
    ///
    /// # Example
    ///
    /// ```
    /// use cellsh_platform::CellshError;
    ///
    /// let err = CellshError::AuthenticationFailed {
    ///     methods: vec!["publickey".to_string()],
    ///     partial_success: false,
    /// };
    /// assert_eq!(err.reason_code(), Some(51));
    /// assert_eq!(CellshError::Config("x".into()).reason_code(), None);
    /// ```
    pub fn reason_code(&self) -> Option<u8> {
        match self {
            CellshError::AuthenticationFailed { .. } => Some(MSG_USERAUTH_FAILURE),
            CellshError::ChannelFailed { message_type, .. } => Some(*message_type),
            CellshError::Disconnected { .. } => Some(MSG_DISCONNECT),
            _ => None,
        }
    }

    /// Returns true if the error came from the transport rather than the peer.
    pub fn is_io(&self) -> bool {
        matches!(self, CellshError::Io(_))
    }
}

impl fmt::Display for CellshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellshError::Io(e) => write!(f, "IO error: {}", e),
            CellshError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CellshError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CellshError::Security(msg) => write!(f, "Security error: {}", msg),
            CellshError::AuthenticationFailed {
                methods,
                partial_success,
            } => write!(
                f,
                "Authentication failed (can continue: {}, partial success: {})",
                methods.join(","),
                partial_success
            ),
            CellshError::ChannelFailed {
                message_type,
                reason_code,
                description,
            } => write!(
                f,
                "Channel failure ({}, reason {}): {}",
                message_type, reason_code, description
            ),
            CellshError::Disconnected {
                reason,
                description,
            } => write!(f, "Disconnected by peer (reason {}): {}", reason, description),
        }
    }
}

impl std::error::Error for CellshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CellshError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CellshError {
    fn from(err: std::io::Error) -> Self {
        CellshError::Io(err)
    }
}

/// Result type for cellsh operations
pub type CellshResult<T> = Result<T, CellshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CellshError::Protocol("bad packet length 3".to_string());
        assert_eq!(err.to_string(), "Protocol error: bad packet length 3");

        let err = CellshError::AuthenticationFailed {
            methods: vec!["publickey".to_string(), "keyboard-interactive".to_string()],
            partial_success: false,
        };
        assert_eq!(
            err.to_string(),
            "Authentication failed (can continue: publickey,keyboard-interactive, partial success: false)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        let err: CellshError = io_err.into();
        assert!(matches!(err, CellshError::Io(_)));
        assert!(err.is_io());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_reason_codes() {
        let channel = CellshError::ChannelFailed {
            message_type: 92,
            reason_code: 1,
            description: "administratively prohibited".to_string(),
        };
        assert_eq!(channel.reason_code(), Some(92));

        let disconnect = CellshError::Disconnected {
            reason: 11,
            description: "bye".to_string(),
        };
        assert_eq!(disconnect.reason_code(), Some(1));

        assert_eq!(CellshError::Security("mac".into()).reason_code(), None);
    }
}

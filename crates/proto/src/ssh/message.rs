//! SSH message numbers used by the client (RFC 4250 Section 4.1, RFC 4419).
//!
//! Only the messages the client sends or reacts to are listed. Anything else
//! arriving on the wire is reported to the status listener by its raw byte
//! and otherwise ignored.
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::message::MessageType;
//!
//! let msg_type = MessageType::KexDhGexGroup;
//! assert_eq!(msg_type as u8, 31);
//! ```

/// SSH message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message.
    Debug = 4,
    /// Service request ("ssh-userauth").
    ServiceRequest = 5,
    /// Service accept.
    ServiceAccept = 6,

    // Algorithm negotiation (20-29)
    /// Key exchange init - algorithm lists.
    KexInit = 20,
    /// New keys - switch to the derived keys.
    NewKeys = 21,

    // diffie-hellman-group-exchange (RFC 4419)
    /// Server supplies the group (p, g).
    KexDhGexGroup = 31,
    /// Client public value e.
    KexDhGexInit = 32,
    /// Server host key, public value f and signature.
    KexDhGexReply = 33,
    /// Client group size request (min, n, max).
    KexDhGexRequest = 34,

    // User authentication (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure.
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// Pre-authentication banner text.
    UserauthBanner = 53,

    // Connection protocol (80-127)
    /// Channel open.
    ChannelOpen = 90,
    /// Channel open confirmation.
    ChannelOpenConfirmation = 91,
    /// Channel open failure.
    ChannelOpenFailure = 92,
    /// Channel window adjust.
    ChannelWindowAdjust = 93,
    /// Channel data.
    ChannelData = 94,
    /// Channel extended data (stderr).
    ChannelExtendedData = 95,
    /// Channel EOF.
    ChannelEof = 96,
    /// Channel close.
    ChannelClose = 97,
    /// Channel request.
    ChannelRequest = 98,
    /// Channel success.
    ChannelSuccess = 99,
    /// Channel failure.
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a byte to a message type, `None` for numbers the client
    /// does not know.
    ///
    /// ```rust
    /// use cellsh_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(33), Some(MessageType::KexDhGexReply));
    /// assert_eq!(MessageType::from_u8(30), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            31 => Some(MessageType::KexDhGexGroup),
            32 => Some(MessageType::KexDhGexInit),
            33 => Some(MessageType::KexDhGexReply),
            34 => Some(MessageType::KexDhGexRequest),
            50 => Some(MessageType::UserauthRequest),
            51 => Some(MessageType::UserauthFailure),
            52 => Some(MessageType::UserauthSuccess),
            53 => Some(MessageType::UserauthBanner),
            90 => Some(MessageType::ChannelOpen),
            91 => Some(MessageType::ChannelOpenConfirmation),
            92 => Some(MessageType::ChannelOpenFailure),
            93 => Some(MessageType::ChannelWindowAdjust),
            94 => Some(MessageType::ChannelData),
            95 => Some(MessageType::ChannelExtendedData),
            96 => Some(MessageType::ChannelEof),
            97 => Some(MessageType::ChannelClose),
            98 => Some(MessageType::ChannelRequest),
            99 => Some(MessageType::ChannelSuccess),
            100 => Some(MessageType::ChannelFailure),
            _ => None,
        }
    }

    /// Returns the RFC name of the message.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Disconnect => "SSH_MSG_DISCONNECT",
            MessageType::Ignore => "SSH_MSG_IGNORE",
            MessageType::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            MessageType::Debug => "SSH_MSG_DEBUG",
            MessageType::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            MessageType::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            MessageType::KexInit => "SSH_MSG_KEXINIT",
            MessageType::NewKeys => "SSH_MSG_NEWKEYS",
            MessageType::KexDhGexGroup => "SSH_MSG_KEX_DH_GEX_GROUP",
            MessageType::KexDhGexInit => "SSH_MSG_KEX_DH_GEX_INIT",
            MessageType::KexDhGexReply => "SSH_MSG_KEX_DH_GEX_REPLY",
            MessageType::KexDhGexRequest => "SSH_MSG_KEX_DH_GEX_REQUEST",
            MessageType::UserauthRequest => "SSH_MSG_USERAUTH_REQUEST",
            MessageType::UserauthFailure => "SSH_MSG_USERAUTH_FAILURE",
            MessageType::UserauthSuccess => "SSH_MSG_USERAUTH_SUCCESS",
            MessageType::UserauthBanner => "SSH_MSG_USERAUTH_BANNER",
            MessageType::ChannelOpen => "SSH_MSG_CHANNEL_OPEN",
            MessageType::ChannelOpenConfirmation => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
            MessageType::ChannelOpenFailure => "SSH_MSG_CHANNEL_OPEN_FAILURE",
            MessageType::ChannelWindowAdjust => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
            MessageType::ChannelData => "SSH_MSG_CHANNEL_DATA",
            MessageType::ChannelExtendedData => "SSH_MSG_CHANNEL_EXTENDED_DATA",
            MessageType::ChannelEof => "SSH_MSG_CHANNEL_EOF",
            MessageType::ChannelClose => "SSH_MSG_CHANNEL_CLOSE",
            MessageType::ChannelRequest => "SSH_MSG_CHANNEL_REQUEST",
            MessageType::ChannelSuccess => "SSH_MSG_CHANNEL_SUCCESS",
            MessageType::ChannelFailure => "SSH_MSG_CHANNEL_FAILURE",
        }
    }

    /// Formats a raw message number for logs, falling back to the number
    /// alone when it is unknown.
    pub fn describe(byte: u8) -> String {
        match Self::from_u8(byte) {
            Some(msg) => msg.to_string(),
            None => format!("UNKNOWN({})", byte),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

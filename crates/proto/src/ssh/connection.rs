//! SSH connection protocol messages (RFC 4254).
//!
//! The client opens exactly one `session` channel, asks for a pty and a
//! shell on it, and then relays data. Each message type here can write
//! itself into a [`Packet`] and parse itself from one whose type byte has
//! already been consumed.
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::connection::ChannelOpen;
//! use cellsh_proto::ssh::Packet;
//!
//! let open = ChannelOpen::session(0, 128 * 1024, 16 * 1024);
//! let mut packet = Packet::new();
//! open.write_to(&mut packet);
//! assert_eq!(packet.message_type(), Some(90));
//! ```

use super::message::MessageType;
use super::packet::Packet;
use cellsh_platform::{CellshError, CellshResult};

/// Channel type requested by the client.
pub const SESSION_CHANNEL: &str = "session";

/// SSH_MSG_CHANNEL_OPEN (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    channel_type: String,
    sender_channel: u32,
    initial_window_size: u32,
    maximum_packet_size: u32,
}

impl ChannelOpen {
    /// Opens a `session` channel.
    pub fn session(sender_channel: u32, initial_window_size: u32, maximum_packet_size: u32) -> Self {
        Self {
            channel_type: SESSION_CHANNEL.to_string(),
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Returns the channel type.
    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    /// Returns the sender channel ID.
    pub fn sender_channel(&self) -> u32 {
        self.sender_channel
    }

    /// Returns the initial window size.
    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    /// Returns the maximum packet size.
    pub fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ChannelOpen as u8);
        packet.put_string(&self.channel_type);
        packet.put_u32(self.sender_channel);
        packet.put_u32(self.initial_window_size);
        packet.put_u32(self.maximum_packet_size);
    }

    /// Parses the message body.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            channel_type: packet.get_string()?,
            sender_channel: packet.get_u32()?,
            initial_window_size: packet.get_u32()?,
            maximum_packet_size: packet.get_u32()?,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_CONFIRMATION (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    /// Our channel number
    pub recipient_channel: u32,
    /// The server's channel number, used in everything we send
    pub sender_channel: u32,
    /// Server's initial window
    pub initial_window_size: u32,
    /// Largest data payload the server accepts in one packet
    pub maximum_packet_size: u32,
}

impl ChannelOpenConfirmation {
    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ChannelOpenConfirmation as u8);
        packet.put_u32(self.recipient_channel);
        packet.put_u32(self.sender_channel);
        packet.put_u32(self.initial_window_size);
        packet.put_u32(self.maximum_packet_size);
    }

    /// Parses the message body.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            recipient_channel: packet.get_u32()?,
            sender_channel: packet.get_u32()?,
            initial_window_size: packet.get_u32()?,
            maximum_packet_size: packet.get_u32()?,
        })
    }
}

/// Channel open failure reason codes (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelOpenFailureReason {
    /// SSH_OPEN_ADMINISTRATIVELY_PROHIBITED
    AdministrativelyProhibited = 1,
    /// SSH_OPEN_CONNECT_FAILED
    ConnectFailed = 2,
    /// SSH_OPEN_UNKNOWN_CHANNEL_TYPE
    UnknownChannelType = 3,
    /// SSH_OPEN_RESOURCE_SHORTAGE
    ResourceShortage = 4,
}

impl ChannelOpenFailureReason {
    /// Converts from the wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }

    /// Human readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "administratively prohibited",
            Self::ConnectFailed => "connect failed",
            Self::UnknownChannelType => "unknown channel type",
            Self::ResourceShortage => "resource shortage",
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// Our channel number
    pub recipient_channel: u32,
    /// Raw reason code
    pub reason_code: u32,
    /// Server supplied description
    pub description: String,
}

impl ChannelOpenFailure {
    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ChannelOpenFailure as u8);
        packet.put_u32(self.recipient_channel);
        packet.put_u32(self.reason_code);
        packet.put_string(&self.description);
        packet.put_string("");
    }

    /// Parses the message body. The language tag is ignored.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            recipient_channel: packet.get_u32()?,
            reason_code: packet.get_u32()?,
            description: packet.get_string()?,
        })
    }

    /// Converts the failure into the fatal error returned to the caller.
    pub fn into_error(self) -> CellshError {
        let description = if self.description.is_empty() {
            ChannelOpenFailureReason::from_u32(self.reason_code)
                .map_or_else(|| "unknown reason".to_string(), |r| r.as_str().to_string())
        } else {
            self.description
        };
        CellshError::ChannelFailed {
            message_type: MessageType::ChannelOpenFailure as u8,
            reason_code: self.reason_code,
            description,
        }
    }
}

/// Terminal geometry sent in the pty request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalGeometry {
    /// Width in characters
    pub columns: u32,
    /// Height in rows
    pub rows: u32,
    /// Width of one character cell in pixels
    pub char_width: u32,
    /// Height of one character cell in pixels
    pub char_height: u32,
}

impl TerminalGeometry {
    /// Terminal width in pixels.
    pub fn width_pixels(&self) -> u32 {
        self.columns.saturating_mul(self.char_width)
    }

    /// Terminal height in pixels.
    pub fn height_pixels(&self) -> u32 {
        self.rows.saturating_mul(self.char_height)
    }
}

impl Default for TerminalGeometry {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
            char_width: 6,
            char_height: 10,
        }
    }
}

/// Channel request types used by the client (RFC 4254 Section 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestType {
    /// Pseudo-terminal request
    PtyReq {
        /// TERM environment value
        term: String,
        /// Terminal geometry
        geometry: TerminalGeometry,
        /// Encoded terminal modes
        modes: Vec<u8>,
    },
    /// Start the user's shell
    Shell,
    /// Exit status of the remote command
    ExitStatus {
        /// Exit code
        exit_status: u32,
    },
    /// Any other request; the body is not parsed
    Other {
        /// Request name
        name: String,
    },
}

impl ChannelRequestType {
    /// Returns the request name.
    pub fn name(&self) -> &str {
        match self {
            ChannelRequestType::PtyReq { .. } => "pty-req",
            ChannelRequestType::Shell => "shell",
            ChannelRequestType::ExitStatus { .. } => "exit-status",
            ChannelRequestType::Other { name } => name,
        }
    }
}

/// SSH_MSG_CHANNEL_REQUEST (RFC 4254 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    recipient_channel: u32,
    request_type: ChannelRequestType,
    want_reply: bool,
}

impl ChannelRequest {
    /// Creates a new channel request.
    pub fn new(recipient_channel: u32, request_type: ChannelRequestType, want_reply: bool) -> Self {
        Self {
            recipient_channel,
            request_type,
            want_reply,
        }
    }

    /// Returns the recipient channel.
    pub fn recipient_channel(&self) -> u32 {
        self.recipient_channel
    }

    /// Returns the request type.
    pub fn request_type(&self) -> &ChannelRequestType {
        &self.request_type
    }

    /// Returns whether a reply was requested.
    pub fn want_reply(&self) -> bool {
        self.want_reply
    }

    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ChannelRequest as u8);
        packet.put_u32(self.recipient_channel);
        packet.put_string(self.request_type.name());
        packet.put_bool(self.want_reply);

        match &self.request_type {
            ChannelRequestType::PtyReq {
                term,
                geometry,
                modes,
            } => {
                packet.put_string(term);
                packet.put_u32(geometry.columns);
                packet.put_u32(geometry.rows);
                packet.put_u32(geometry.width_pixels());
                packet.put_u32(geometry.height_pixels());
                packet.put_byte_string(modes);
            }
            ChannelRequestType::Shell | ChannelRequestType::Other { .. } => {}
            ChannelRequestType::ExitStatus { exit_status } => {
                packet.put_u32(*exit_status);
            }
        }
    }

    /// Parses the message body.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        let recipient_channel = packet.get_u32()?;
        let name = packet.get_string()?;
        let want_reply = packet.get_bool()?;

        let request_type = match name.as_str() {
            "pty-req" => {
                let term = packet.get_string()?;
                let columns = packet.get_u32()?;
                let rows = packet.get_u32()?;
                let width_pixels = packet.get_u32()?;
                let height_pixels = packet.get_u32()?;
                let modes = packet.get_byte_string()?;
                ChannelRequestType::PtyReq {
                    term,
                    geometry: TerminalGeometry {
                        columns,
                        rows,
                        char_width: width_pixels.checked_div(columns).unwrap_or(0),
                        char_height: height_pixels.checked_div(rows).unwrap_or(0),
                    },
                    modes,
                }
            }
            "shell" => ChannelRequestType::Shell,
            "exit-status" => ChannelRequestType::ExitStatus {
                exit_status: packet.get_u32()?,
            },
            _ => ChannelRequestType::Other { name },
        };

        Ok(Self {
            recipient_channel,
            request_type,
            want_reply,
        })
    }
}

/// SSH_MSG_CHANNEL_DATA (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Channel the data is addressed to
    pub recipient_channel: u32,
    /// Payload
    pub data: Vec<u8>,
}

impl ChannelData {
    /// Writes a data message without building an owned value first.
    pub fn write(packet: &mut Packet, recipient_channel: u32, data: &[u8]) {
        packet.put_u8(MessageType::ChannelData as u8);
        packet.put_u32(recipient_channel);
        packet.put_byte_string(data);
    }

    /// Parses the message body.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            recipient_channel: packet.get_u32()?,
            data: packet.get_byte_string()?,
        })
    }
}

/// SSH_MSG_CHANNEL_EXTENDED_DATA (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    /// Channel the data is addressed to
    pub recipient_channel: u32,
    /// 1 = stderr
    pub data_type_code: u32,
    /// Payload
    pub data: Vec<u8>,
}

impl ChannelExtendedData {
    /// Parses the message body.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            recipient_channel: packet.get_u32()?,
            data_type_code: packet.get_u32()?,
            data: packet.get_byte_string()?,
        })
    }
}

/// SSH_MSG_CHANNEL_WINDOW_ADJUST (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindowAdjust {
    /// Channel whose window grows
    pub recipient_channel: u32,
    /// Bytes to add
    pub bytes_to_add: u32,
}

impl ChannelWindowAdjust {
    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::ChannelWindowAdjust as u8);
        packet.put_u32(self.recipient_channel);
        packet.put_u32(self.bytes_to_add);
    }

    /// Parses the message body.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            recipient_channel: packet.get_u32()?,
            bytes_to_add: packet.get_u32()?,
        })
    }
}

/// Writes one of the messages whose body is only the recipient channel:
/// EOF, CLOSE, SUCCESS or FAILURE.
pub fn write_channel_notice(packet: &mut Packet, message: MessageType, recipient_channel: u32) {
    debug_assert!(matches!(
        message,
        MessageType::ChannelEof
            | MessageType::ChannelClose
            | MessageType::ChannelSuccess
            | MessageType::ChannelFailure
    ));
    packet.put_u8(message as u8);
    packet.put_u32(recipient_channel);
}

/// Disconnect reason: the application closed the session.
pub const DISCONNECT_BY_APPLICATION: u32 = 11;

/// SSH_MSG_DISCONNECT (RFC 4253 Section 11.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Reason code
    pub reason_code: u32,
    /// Human readable description
    pub description: String,
}

impl Disconnect {
    /// Writes the message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::Disconnect as u8);
        packet.put_u32(self.reason_code);
        packet.put_string(&self.description);
        packet.put_string("");
    }

    /// Parses the message body. The language tag is ignored.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        Ok(Self {
            reason_code: packet.get_u32()?,
            description: packet.get_string()?,
        })
    }

    /// Converts the message into the fatal error returned to the caller.
    pub fn into_error(self) -> CellshError {
        CellshError::Disconnected {
            reason: self.reason_code,
            description: self.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(write: impl FnOnce(&mut Packet)) -> Packet {
        let mut packet = Packet::new();
        write(&mut packet);
        packet.rewind();
        packet.skip(1).unwrap();
        packet
    }

    #[test]
    fn test_channel_open_session() {
        let open = ChannelOpen::session(0, 131072, 4096);
        let mut packet = body(|p| open.write_to(p));
        let parsed = ChannelOpen::read_from(&mut packet).unwrap();
        assert_eq!(parsed, open);
        assert_eq!(parsed.channel_type(), "session");
        assert_eq!(parsed.initial_window_size(), 128 * 1024);
    }

    #[test]
    fn test_open_confirmation_round_trip() {
        let confirmation = ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            initial_window_size: 2097152,
            maximum_packet_size: 32768,
        };
        let mut packet = body(|p| confirmation.write_to(p));
        assert_eq!(
            ChannelOpenConfirmation::read_from(&mut packet).unwrap(),
            confirmation
        );
    }

    #[test]
    fn test_open_failure_error() {
        let failure = ChannelOpenFailure {
            recipient_channel: 0,
            reason_code: 1,
            description: String::new(),
        };
        let mut packet = body(|p| failure.write_to(p));
        let err = ChannelOpenFailure::read_from(&mut packet)
            .unwrap()
            .into_error();
        assert_eq!(err.reason_code(), Some(92));
        assert!(err.to_string().contains("administratively prohibited"));
    }

    #[test]
    fn test_pty_req_layout() {
        let request = ChannelRequest::new(
            3,
            ChannelRequestType::PtyReq {
                term: "vt100".to_string(),
                geometry: TerminalGeometry::default(),
                modes: vec![],
            },
            false,
        );
        let mut packet = Packet::new();
        request.write_to(&mut packet);

        packet.rewind();
        assert_eq!(packet.get_u8().unwrap(), 98);
        assert_eq!(packet.get_u32().unwrap(), 3);
        assert_eq!(packet.get_string().unwrap(), "pty-req");
        assert!(!packet.get_bool().unwrap());
        assert_eq!(packet.get_string().unwrap(), "vt100");
        assert_eq!(packet.get_u32().unwrap(), 80);
        assert_eq!(packet.get_u32().unwrap(), 24);
        assert_eq!(packet.get_u32().unwrap(), 480);
        assert_eq!(packet.get_u32().unwrap(), 240);
        assert!(packet.get_byte_string().unwrap().is_empty());

        packet.rewind();
        packet.skip(1).unwrap();
        assert_eq!(ChannelRequest::read_from(&mut packet).unwrap(), request);
    }

    #[test]
    fn test_unknown_request_kept_by_name() {
        let mut packet = body(|p| {
            p.put_u8(98);
            p.put_u32(0);
            p.put_string("keepalive@openssh.com");
            p.put_bool(true);
        });
        let request = ChannelRequest::read_from(&mut packet).unwrap();
        assert_eq!(request.request_type().name(), "keepalive@openssh.com");
        assert!(request.want_reply());
    }

    #[test]
    fn test_channel_data() {
        let mut packet = body(|p| ChannelData::write(p, 9, b"ls -l\n"));
        let data = ChannelData::read_from(&mut packet).unwrap();
        assert_eq!(data.recipient_channel, 9);
        assert_eq!(data.data, b"ls -l\n");
    }

    #[test]
    fn test_window_adjust_and_notices() {
        let adjust = ChannelWindowAdjust {
            recipient_channel: 1,
            bytes_to_add: 65536,
        };
        let mut packet = body(|p| adjust.write_to(p));
        assert_eq!(ChannelWindowAdjust::read_from(&mut packet).unwrap(), adjust);

        let mut packet = Packet::new();
        write_channel_notice(&mut packet, MessageType::ChannelClose, 4);
        assert_eq!(packet.payload(), &[97, 0, 0, 0, 4]);
    }

    #[test]
    fn test_disconnect_error() {
        let disconnect = Disconnect {
            reason_code: DISCONNECT_BY_APPLICATION,
            description: "bye".to_string(),
        };
        let mut packet = body(|p| disconnect.write_to(p));
        let parsed = Disconnect::read_from(&mut packet).unwrap();
        assert_eq!(parsed, disconnect);
        assert!(matches!(
            parsed.into_error(),
            CellshError::Disconnected { reason: 11, .. }
        ));
    }
}

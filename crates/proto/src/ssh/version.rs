//! SSH protocol version exchange (RFC 4253 Section 4.2).
//!
//! Both sides send an identification line before any binary packet:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments LF
//! ```
//!
//! The client writes `SSH-2.0-<name>\n` and then reads the server's line one
//! byte at a time up to `\n`, so no packet bytes are consumed by accident.
//! Lines before the identification line are skipped; the accepted line is
//! trimmed and used verbatim as `V_S` in the exchange hash.
//!
//! # Security
//!
//! - Maximum line length: 255 bytes
//! - At most 64 lines of preamble before the identification line
//! - Only protocol versions "2.0" and "1.99" are accepted
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::version::Version;
//!
//! let version = Version::client("CellSSH");
//! assert_eq!(version.to_wire_format(), b"SSH-2.0-CellSSH\n");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_4.3p2 Debian-9").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_4.3p2");
//! ```

use cellsh_platform::{CellshError, CellshResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Maximum identification line length, terminator included.
pub const MAX_VERSION_LENGTH: usize = 255;

/// Maximum number of non-identification lines accepted before it.
pub const MAX_PREAMBLE_LINES: usize = 64;

/// Parsed identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    proto_version: String,
    software_version: String,
    comments: Option<String>,
}

impl Version {
    /// The client's identification: protocol 2.0, no comments.
    pub fn client(software: &str) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: None,
        }
    }

    /// Parses an identification line. A trailing CR LF or LF is ignored.
    pub fn parse(line: &str) -> CellshResult<Self> {
        let line = line.trim_end_matches('\n').trim_end_matches('\r');

        // Latin-1: one char per wire byte.
        let length = line.chars().count();
        if length > MAX_VERSION_LENGTH {
            return Err(CellshError::Protocol(format!(
                "Version string too long: {} bytes (max {})",
                length, MAX_VERSION_LENGTH
            )));
        }

        if line.contains('\0') {
            return Err(CellshError::Protocol(
                "Version string contains null byte".to_string(),
            ));
        }

        let rest = line.strip_prefix("SSH-").ok_or_else(|| {
            CellshError::Protocol(format!(
                "Invalid version string: must start with 'SSH-', got '{}'",
                line
            ))
        })?;

        let (proto_version, rest) = rest.split_once('-').ok_or_else(|| {
            CellshError::Protocol(format!("Invalid version string format: '{}'", line))
        })?;

        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(CellshError::Protocol(format!(
                "Unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software, Some(comments.trim().to_string())),
            None => (rest, None),
        };

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version: software_version.to_string(),
            comments,
        })
    }

    /// Returns the protocol version ("2.0" or "1.99").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Line as sent on the wire, LF-terminated.
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\n", self).into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

/// Reads one LF-terminated line byte by byte. Bytes are taken as ISO-8859-1.
async fn read_line<R>(reader: &mut R) -> CellshResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            return Ok(line.into_iter().map(char::from).collect());
        }
        if line.len() >= MAX_VERSION_LENGTH {
            return Err(CellshError::Protocol(format!(
                "Identification line longer than {} bytes",
                MAX_VERSION_LENGTH
            )));
        }
        line.push(byte);
    }
}

/// Reads the server identification, skipping any preamble lines.
///
/// Returns the trimmed line exactly as it enters the exchange hash.
pub async fn read_identification<R>(reader: &mut R) -> CellshResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    for _ in 0..=MAX_PREAMBLE_LINES {
        let line = read_line(reader).await?;
        let line = line.trim();
        if line.starts_with("SSH-") {
            return Ok(line.to_string());
        }
        debug!(line = %line, "skipping pre-identification line");
    }
    Err(CellshError::Protocol(format!(
        "No identification line within {} lines",
        MAX_PREAMBLE_LINES
    )))
}

/// Sends our identification and reads the server's.
///
/// Returns `(V_C, V_S)` without line terminators, plus the parsed server
/// version.
pub async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    client: &Version,
) -> CellshResult<(String, String, Version)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&client.to_wire_format()).await?;
    writer.flush().await?;

    let server_line = read_identification(reader).await?;
    let server = Version::parse(&server_line)?;
    debug!(server = %server_line, "version exchange complete");

    Ok((client.to_string(), server_line, server))
}

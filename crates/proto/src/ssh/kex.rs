//! SSH algorithm negotiation (RFC 4253 Section 7, RFC 4419).
//!
//! The client offers exactly one algorithm per category:
//!
//! | Category | Algorithm |
//! |---|---|
//! | Key exchange | `diffie-hellman-group-exchange-sha1` |
//! | Host key | `ssh-dss` |
//! | Cipher (both ways) | `aes128-cbc` |
//! | MAC (both ways) | `hmac-sha1` |
//! | Compression (both ways) | `none` |
//! | Languages | empty |
//!
//! There is no negotiation beyond checking that the server's KEXINIT lists
//! each of them.
//!
//! # Key Exchange Flow
//!
//! 1. Server and client send SSH_MSG_KEXINIT
//! 2. Client sends SSH_MSG_KEX_DH_GEX_REQUEST with its [`GroupSize`]
//! 3. Server answers with SSH_MSG_KEX_DH_GEX_GROUP (p, g)
//! 4. Client sends SSH_MSG_KEX_DH_GEX_INIT (e), server SSH_MSG_KEX_DH_GEX_REPLY
//! 5. Both sides send SSH_MSG_NEWKEYS and switch keys
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::kex::KexInit;
//! use cellsh_proto::ssh::Packet;
//!
//! let kexinit = KexInit::client_default();
//! let mut packet = Packet::new();
//! kexinit.write_to(&mut packet);
//!
//! packet.rewind();
//! packet.skip(1).unwrap();
//! let parsed = KexInit::read_from(&mut packet).unwrap();
//! assert!(parsed.supports_client_suite().is_ok());
//! ```

use super::message::MessageType;
use super::packet::Packet;
use cellsh_platform::{CellshError, CellshResult};
use rand::rngs::OsRng;
use rand::RngCore;

/// Key exchange method.
pub const KEX_ALGORITHM: &str = "diffie-hellman-group-exchange-sha1";
/// Host key algorithm.
pub const HOST_KEY_ALGORITHM: &str = "ssh-dss";
/// Cipher used in both directions.
pub const CIPHER_ALGORITHM: &str = "aes128-cbc";
/// MAC used in both directions.
pub const MAC_ALGORITHM: &str = "hmac-sha1";
/// Compression used in both directions.
pub const COMPRESSION_ALGORITHM: &str = "none";

/// SSH_MSG_KEXINIT message (RFC 4253 Section 7.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// Random cookie (16 bytes)
    cookie: [u8; 16],
    kex_algorithms: Vec<String>,
    server_host_key_algorithms: Vec<String>,
    encryption_algorithms_client_to_server: Vec<String>,
    encryption_algorithms_server_to_client: Vec<String>,
    mac_algorithms_client_to_server: Vec<String>,
    mac_algorithms_server_to_client: Vec<String>,
    compression_algorithms_client_to_server: Vec<String>,
    compression_algorithms_server_to_client: Vec<String>,
    languages_client_to_server: Vec<String>,
    languages_server_to_client: Vec<String>,
    first_kex_packet_follows: bool,
}

impl KexInit {
    /// Creates the client's KEXINIT with a fresh cookie and the fixed suite.
    pub fn client_default() -> Self {
        let mut cookie = [0u8; 16];
        OsRng.fill_bytes(&mut cookie);

        let one = |name: &str| vec![name.to_string()];
        Self {
            cookie,
            kex_algorithms: one(KEX_ALGORITHM),
            server_host_key_algorithms: one(HOST_KEY_ALGORITHM),
            encryption_algorithms_client_to_server: one(CIPHER_ALGORITHM),
            encryption_algorithms_server_to_client: one(CIPHER_ALGORITHM),
            mac_algorithms_client_to_server: one(MAC_ALGORITHM),
            mac_algorithms_server_to_client: one(MAC_ALGORITHM),
            compression_algorithms_client_to_server: one(COMPRESSION_ALGORITHM),
            compression_algorithms_server_to_client: one(COMPRESSION_ALGORITHM),
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        }
    }

    /// Returns the cookie.
    pub fn cookie(&self) -> &[u8; 16] {
        &self.cookie
    }

    /// Returns the key exchange algorithms.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns the server host key algorithms.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns whether a guessed KEX packet follows.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Writes the full message, type byte included.
    ///
    /// ```text
    /// byte         SSH_MSG_KEXINIT (20)
    /// byte[16]     cookie
    /// name-list    x 10
    /// boolean      first_kex_packet_follows
    /// uint32       0 (reserved)
    /// ```
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::KexInit as u8);
        packet.put_bytes(&self.cookie);
        for list in self.name_lists() {
            write_name_list(packet, list);
        }
        packet.put_bool(self.first_kex_packet_follows);
        packet.put_u32(0);
    }

    /// Parses a KEXINIT whose type byte has already been consumed.
    pub fn read_from(packet: &mut Packet) -> CellshResult<Self> {
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(&packet.get_bytes(16)?);

        let kex_algorithms = read_name_list(packet)?;
        let server_host_key_algorithms = read_name_list(packet)?;
        let encryption_algorithms_client_to_server = read_name_list(packet)?;
        let encryption_algorithms_server_to_client = read_name_list(packet)?;
        let mac_algorithms_client_to_server = read_name_list(packet)?;
        let mac_algorithms_server_to_client = read_name_list(packet)?;
        let compression_algorithms_client_to_server = read_name_list(packet)?;
        let compression_algorithms_server_to_client = read_name_list(packet)?;
        let languages_client_to_server = read_name_list(packet)?;
        let languages_server_to_client = read_name_list(packet)?;
        let first_kex_packet_follows = packet.get_bool()?;
        let _reserved = packet.get_u32()?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_algorithms_client_to_server,
            encryption_algorithms_server_to_client,
            mac_algorithms_client_to_server,
            mac_algorithms_server_to_client,
            compression_algorithms_client_to_server,
            compression_algorithms_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }

    fn name_lists(&self) -> [&Vec<String>; 10] {
        [
            &self.kex_algorithms,
            &self.server_host_key_algorithms,
            &self.encryption_algorithms_client_to_server,
            &self.encryption_algorithms_server_to_client,
            &self.mac_algorithms_client_to_server,
            &self.mac_algorithms_server_to_client,
            &self.compression_algorithms_client_to_server,
            &self.compression_algorithms_server_to_client,
            &self.languages_client_to_server,
            &self.languages_server_to_client,
        ]
    }

    /// Checks that the peer offers every algorithm of the client suite.
    pub fn supports_client_suite(&self) -> CellshResult<()> {
        let required: [(&str, &[String], &str); 8] = [
            ("kex", &self.kex_algorithms, KEX_ALGORITHM),
            ("host key", &self.server_host_key_algorithms, HOST_KEY_ALGORITHM),
            (
                "cipher client->server",
                &self.encryption_algorithms_client_to_server,
                CIPHER_ALGORITHM,
            ),
            (
                "cipher server->client",
                &self.encryption_algorithms_server_to_client,
                CIPHER_ALGORITHM,
            ),
            ("mac client->server", &self.mac_algorithms_client_to_server, MAC_ALGORITHM),
            ("mac server->client", &self.mac_algorithms_server_to_client, MAC_ALGORITHM),
            (
                "compression client->server",
                &self.compression_algorithms_client_to_server,
                COMPRESSION_ALGORITHM,
            ),
            (
                "compression server->client",
                &self.compression_algorithms_server_to_client,
                COMPRESSION_ALGORITHM,
            ),
        ];

        for (category, offered, wanted) in required {
            if !offered.iter().any(|name| name == wanted) {
                return Err(CellshError::Protocol(format!(
                    "No common {} algorithm: server offers [{}], client needs {}",
                    category,
                    offered.join(","),
                    wanted
                )));
            }
        }
        Ok(())
    }
}

fn write_name_list(packet: &mut Packet, names: &[String]) {
    packet.put_string(&names.join(","));
}

fn read_name_list(packet: &mut Packet) -> CellshResult<Vec<String>> {
    Ok(packet
        .get_string()?
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

/// Group size bounds sent in SSH_MSG_KEX_DH_GEX_REQUEST (RFC 4419 Section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSize {
    /// Minimal acceptable group size in bits.
    pub min: u32,
    /// Preferred group size in bits.
    pub preferred: u32,
    /// Maximal acceptable group size in bits.
    pub max: u32,
}

impl GroupSize {
    /// Checks `min <= preferred <= max`.
    pub fn validate(&self) -> CellshResult<()> {
        if self.min > self.preferred || self.preferred > self.max {
            return Err(CellshError::Config(format!(
                "Invalid DH group size bounds: {}/{}/{}",
                self.min, self.preferred, self.max
            )));
        }
        Ok(())
    }

    /// Writes SSH_MSG_KEX_DH_GEX_REQUEST.
    pub fn write_request(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::KexDhGexRequest as u8);
        packet.put_u32(self.min);
        packet.put_u32(self.preferred);
        packet.put_u32(self.max);
    }
}

impl Default for GroupSize {
    fn default() -> Self {
        Self {
            min: 1024,
            preferred: 2048,
            max: 8192,
        }
    }
}

/// SSH_MSG_NEWKEYS message (RFC 4253 Section 7.3).
///
/// After both sides have sent it, every packet is encrypted and MACed with
/// the new keys. Sequence numbers are not reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewKeys;

impl NewKeys {
    /// Writes the single-byte message.
    pub fn write_to(&self, packet: &mut Packet) {
        packet.put_u8(MessageType::NewKeys as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(kexinit: &KexInit) -> KexInit {
        let mut packet = Packet::new();
        kexinit.write_to(&mut packet);
        packet.rewind();
        assert_eq!(packet.get_u8().unwrap(), 20);
        KexInit::read_from(&mut packet).unwrap()
    }

    #[test]
    fn test_client_default_suite() {
        let kexinit = KexInit::client_default();
        assert_eq!(kexinit.kex_algorithms(), &[KEX_ALGORITHM.to_string()]);
        assert_eq!(
            kexinit.server_host_key_algorithms(),
            &[HOST_KEY_ALGORITHM.to_string()]
        );
        assert!(!kexinit.first_kex_packet_follows());
        assert!(kexinit.supports_client_suite().is_ok());
    }

    #[test]
    fn test_cookies_are_random() {
        let a = KexInit::client_default();
        let b = KexInit::client_default();
        assert_ne!(a.cookie(), b.cookie());
    }

    #[test]
    fn test_kexinit_round_trip() {
        let original = KexInit::client_default();
        let parsed = round_trip(&original);
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_empty_language_lists_on_wire() {
        let mut packet = Packet::new();
        KexInit::client_default().write_to(&mut packet);
        // ..., lang c->s "", lang s->c "", bool false, uint32 0
        assert!(packet.payload().ends_with(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_server_with_extra_algorithms_accepted() {
        let mut server = KexInit::client_default();
        server.kex_algorithms = vec![
            "curve25519-sha256".to_string(),
            KEX_ALGORITHM.to_string(),
        ];
        server.encryption_algorithms_server_to_client =
            vec!["aes256-ctr".to_string(), CIPHER_ALGORITHM.to_string()];
        assert!(round_trip(&server).supports_client_suite().is_ok());
    }

    #[test]
    fn test_server_without_suite_rejected() {
        let mut server = KexInit::client_default();
        server.mac_algorithms_server_to_client = vec!["hmac-sha2-256".to_string()];
        let err = round_trip(&server).supports_client_suite().unwrap_err();
        assert!(matches!(err, CellshError::Protocol(_)));
        assert!(err.to_string().contains("mac server->client"));
    }

    #[test]
    fn test_truncated_kexinit() {
        let mut packet = Packet::new();
        packet.put_u8(20);
        packet.put_bytes(&[0u8; 16]);
        packet.put_string(KEX_ALGORITHM);
        packet.rewind();
        packet.skip(1).unwrap();
        assert!(KexInit::read_from(&mut packet).is_err());
    }

    #[test]
    fn test_group_size_request() {
        let size = GroupSize::default();
        assert!(size.validate().is_ok());

        let mut packet = Packet::new();
        size.write_request(&mut packet);
        assert_eq!(
            packet.payload(),
            &[34, 0, 0, 4, 0, 0, 0, 8, 0, 0, 0, 0x20, 0]
        );

        let inverted = GroupSize {
            min: 4096,
            preferred: 2048,
            max: 8192,
        };
        assert!(matches!(inverted.validate(), Err(CellshError::Config(_))));
    }

    #[test]
    fn test_newkeys() {
        let mut packet = Packet::new();
        NewKeys.write_to(&mut packet);
        assert_eq!(packet.payload(), &[21]);
    }
}

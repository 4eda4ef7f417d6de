//! Diffie-Hellman group exchange and key derivation (RFC 4419, RFC 4253 Section 7.2).
//!
//! This module implements the arithmetic side of
//! `diffie-hellman-group-exchange-sha1`:
//! - the client's ephemeral key pair in a server-chosen group ([`DhGexExchange`])
//! - the exchange hash `H` ([`compute_exchange_hash`])
//! - expansion of `K` and `H` into the six session keys ([`derive_key`],
//!   [`SessionKeys`])
//!
//! # Security
//!
//! - The private exponent is drawn uniformly from `[2, p-2]` using the OS RNG
//! - Peer values outside `(1, p-1)` are rejected
//! - Private exponents and derived keys are zeroized on drop
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::kex_dh::DhGexExchange;
//! use num_bigint::BigUint;
//!
//! let p = BigUint::from(23u32);
//! let g = BigUint::from(5u32);
//! let client = DhGexExchange::new(p.clone(), g.clone()).unwrap();
//! let server = DhGexExchange::with_private_key(p, g, BigUint::from(6u32)).unwrap();
//!
//! let k = client.compute_shared_secret(server.public_key()).unwrap();
//! assert_eq!(k, client.public_key().modpow(&BigUint::from(6u32), &BigUint::from(23u32)));
//! ```

use super::crypto::{
    CipherAlgorithm, DecryptionKey, EncryptionKey, MacAlgorithm, MacKey,
};
use super::kex::GroupSize;
use super::packet::Packet;
use cellsh_platform::{CellshError, CellshResult};
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a SHA-1 digest, and of every derived key.
pub const DIGEST_LEN: usize = 20;

/// Client side of a Diffie-Hellman group exchange.
pub struct DhGexExchange {
    prime: BigUint,
    generator: BigUint,
    /// Private exponent x, big-endian
    private_key: Vec<u8>,
    /// e = g^x mod p
    public_key: BigUint,
}

impl std::fmt::Debug for DhGexExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhGexExchange")
            .field("prime_bits", &self.prime.bits())
            .field("generator", &self.generator)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl DhGexExchange {
    /// Generates a key pair in the group `(prime, generator)` received in
    /// SSH_MSG_KEX_DH_GEX_GROUP.
    ///
    /// # Errors
    ///
    /// Returns [`CellshError::Security`] if the prime is not larger than 3 or
    /// the generator is outside `(1, p-1)`.
    pub fn new(prime: BigUint, generator: BigUint) -> CellshResult<Self> {
        Self::check_group(&prime, &generator)?;
        let lower = BigUint::from(2u32);
        let upper = &prime - 1u32;
        let x = OsRng.gen_biguint_range(&lower, &upper);
        Self::build(prime, generator, x)
    }

    /// Builds a key pair from a known private exponent.
    ///
    /// Used for known-answer checks and by test peers; real connections use
    /// [`new`](Self::new).
    pub fn with_private_key(
        prime: BigUint,
        generator: BigUint,
        private_key: BigUint,
    ) -> CellshResult<Self> {
        Self::check_group(&prime, &generator)?;
        Self::build(prime, generator, private_key)
    }

    fn check_group(prime: &BigUint, generator: &BigUint) -> CellshResult<()> {
        if *prime <= BigUint::from(3u32) {
            return Err(CellshError::Security(format!(
                "DH prime too small: {}",
                prime
            )));
        }
        let p_minus_one = prime - 1u32;
        if *generator <= BigUint::from(1u32) || *generator >= p_minus_one {
            return Err(CellshError::Security(
                "DH generator out of range".to_string(),
            ));
        }
        Ok(())
    }

    fn build(prime: BigUint, generator: BigUint, x: BigUint) -> CellshResult<Self> {
        let public_key = generator.modpow(&x, &prime);
        Ok(Self {
            prime,
            generator,
            private_key: x.to_bytes_be(),
            public_key,
        })
    }

    /// Group prime p.
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// Group generator g.
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Public value e = g^x mod p, sent in SSH_MSG_KEX_DH_GEX_INIT.
    pub fn public_key(&self) -> &BigUint {
        &self.public_key
    }

    /// Computes K = f^x mod p from the server's public value.
    ///
    /// # Errors
    ///
    /// Returns [`CellshError::Security`] if `f` is outside `(1, p-1)`.
    pub fn compute_shared_secret(&self, peer_public: &BigUint) -> CellshResult<BigUint> {
        let p_minus_one = &self.prime - 1u32;
        if *peer_public <= BigUint::from(1u32) || *peer_public >= p_minus_one {
            return Err(CellshError::Security(
                "Invalid peer public key: out of range".to_string(),
            ));
        }

        let x = BigUint::from_bytes_be(&self.private_key);
        Ok(peer_public.modpow(&x, &self.prime))
    }
}

impl Drop for DhGexExchange {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Everything hashed into the exchange hash H (RFC 4419 Section 3).
#[derive(Debug)]
pub struct ExchangeHashInput<'a> {
    /// V_C, client identification line without CR LF
    pub client_version: &'a str,
    /// V_S, server identification line without CR LF
    pub server_version: &'a str,
    /// I_C, payload of the client's SSH_MSG_KEXINIT
    pub client_kexinit: &'a [u8],
    /// I_S, payload of the server's SSH_MSG_KEXINIT
    pub server_kexinit: &'a [u8],
    /// K_S, server host key blob
    pub host_key: &'a [u8],
    /// min, n, max from SSH_MSG_KEX_DH_GEX_REQUEST
    pub group_size: GroupSize,
    /// p
    pub prime: &'a BigUint,
    /// g
    pub generator: &'a BigUint,
    /// e, client public value
    pub client_public: &'a BigUint,
    /// f, server public value
    pub server_public: &'a BigUint,
    /// K, shared secret
    pub shared_secret: &'a BigUint,
}

/// Computes H = SHA1 over the length-prefixed exchange fields.
pub fn compute_exchange_hash(input: &ExchangeHashInput<'_>) -> Vec<u8> {
    let mut scratch = Packet::new();
    scratch.put_string(input.client_version);
    scratch.put_string(input.server_version);
    scratch.put_byte_string(input.client_kexinit);
    scratch.put_byte_string(input.server_kexinit);
    scratch.put_byte_string(input.host_key);
    scratch.put_u32(input.group_size.min);
    scratch.put_u32(input.group_size.preferred);
    scratch.put_u32(input.group_size.max);
    scratch.put_biguint(input.prime);
    scratch.put_biguint(input.generator);
    scratch.put_biguint(input.client_public);
    scratch.put_biguint(input.server_public);
    scratch.put_biguint(input.shared_secret);

    Sha1::digest(scratch.payload()).to_vec()
}

/// Derives one key: `SHA1(mpint(K) || H || letter || session_id)`.
///
/// Letters 'A'..'F' select the client IV, server IV, client cipher key,
/// server cipher key, client MAC key and server MAC key.
pub fn derive_key(
    shared_secret: &BigUint,
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
) -> [u8; DIGEST_LEN] {
    let mut k = Packet::new();
    k.put_biguint(shared_secret);

    let mut hasher = Sha1::new();
    hasher.update(k.payload());
    hasher.update(exchange_hash);
    hasher.update([letter]);
    hasher.update(session_id);

    let mut key = [0u8; DIGEST_LEN];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// The six keys derived after a key exchange.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// 'A': IV client to server
    pub iv_client_to_server: [u8; DIGEST_LEN],
    /// 'B': IV server to client
    pub iv_server_to_client: [u8; DIGEST_LEN],
    /// 'C': cipher key client to server
    pub key_client_to_server: [u8; DIGEST_LEN],
    /// 'D': cipher key server to client
    pub key_server_to_client: [u8; DIGEST_LEN],
    /// 'E': MAC key client to server
    pub mac_client_to_server: [u8; DIGEST_LEN],
    /// 'F': MAC key server to client
    pub mac_server_to_client: [u8; DIGEST_LEN],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(<redacted>)")
    }
}

impl SessionKeys {
    /// Derives all six keys from K, H and the session identifier.
    pub fn derive(shared_secret: &BigUint, exchange_hash: &[u8], session_id: &[u8]) -> Self {
        let key = |letter: u8| derive_key(shared_secret, exchange_hash, letter, session_id);
        Self {
            iv_client_to_server: key(b'A'),
            iv_server_to_client: key(b'B'),
            key_client_to_server: key(b'C'),
            key_server_to_client: key(b'D'),
            mac_client_to_server: key(b'E'),
            mac_server_to_client: key(b'F'),
        }
    }

    /// Cipher and MAC state for packets the client sends.
    pub fn client_to_server(&self) -> CellshResult<(EncryptionKey, MacKey)> {
        Ok((
            EncryptionKey::new(
                CipherAlgorithm::Aes128Cbc,
                &self.key_client_to_server,
                &self.iv_client_to_server,
            )?,
            MacKey::new(MacAlgorithm::HmacSha1, &self.mac_client_to_server)?,
        ))
    }

    /// Cipher and MAC state for packets the client receives.
    pub fn server_to_client(&self) -> CellshResult<(DecryptionKey, MacKey)> {
        Ok((
            DecryptionKey::new(
                CipherAlgorithm::Aes128Cbc,
                &self.key_server_to_client,
                &self.iv_server_to_client,
            )?,
            MacKey::new(MacAlgorithm::HmacSha1, &self.mac_server_to_client)?,
        ))
    }

    /// The same keys seen from the server's side: what the client decrypts,
    /// the server encrypts.
    pub fn server_sealing(&self) -> CellshResult<(EncryptionKey, MacKey)> {
        Ok((
            EncryptionKey::new(
                CipherAlgorithm::Aes128Cbc,
                &self.key_server_to_client,
                &self.iv_server_to_client,
            )?,
            MacKey::new(MacAlgorithm::HmacSha1, &self.mac_server_to_client)?,
        ))
    }

    /// Server-side opener for packets the client sends.
    pub fn server_opening(&self) -> CellshResult<(DecryptionKey, MacKey)> {
        Ok((
            DecryptionKey::new(
                CipherAlgorithm::Aes128Cbc,
                &self.key_client_to_server,
                &self.iv_client_to_server,
            )?,
            MacKey::new(MacAlgorithm::HmacSha1, &self.mac_client_to_server)?,
        ))
    }
}

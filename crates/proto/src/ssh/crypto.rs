//! Symmetric cryptography for the SSH binary packet protocol.
//!
//! The client speaks exactly one suite in each direction:
//! - `aes128-cbc` (RFC 4253 Section 6.3), with the CBC chaining state carried
//!   from one packet to the next for the life of the keys
//! - `hmac-sha1` (RFC 4253 Section 6.4) over `sequence_number || packet`
//!
//! # Security
//!
//! - MAC verification uses a constant-time comparison ([`subtle`])
//! - Key material is zeroized on drop ([`zeroize`])
//! - Debug output never prints key material
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::crypto::{CipherAlgorithm, DecryptionKey, EncryptionKey};
//!
//! let key = [7u8; 16];
//! let iv = [9u8; 16];
//! let mut enc = EncryptionKey::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap();
//! let mut dec = DecryptionKey::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap();
//!
//! let mut data = *b"sixteen byte blk";
//! enc.encrypt(&mut data).unwrap();
//! dec.decrypt(&mut data).unwrap();
//! assert_eq!(&data, b"sixteen byte blk");
//! ```

use aes::Aes128;
use cbc::{Decryptor, Encryptor};
use cellsh_platform::{CellshError, CellshResult};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;
type HmacSha1 = Hmac<Sha1>;

/// Cipher algorithm for SSH encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-128 in CBC mode
    Aes128Cbc,
}

impl CipherAlgorithm {
    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128Cbc => "aes128-cbc",
        }
    }

    /// Returns the key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
        }
    }

    /// Returns the IV size in bytes.
    pub fn iv_size(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
        }
    }

    /// Returns the cipher block size in bytes.
    pub fn block_size(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
        }
    }

    /// Parses cipher algorithm from name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aes128-cbc" => Some(CipherAlgorithm::Aes128Cbc),
            _ => None,
        }
    }
}

fn check_material(what: &str, needed: usize, got: usize) -> CellshResult<()> {
    if got < needed {
        return Err(CellshError::Security(format!(
            "Insufficient {} material: expected {}, got {}",
            what, needed, got
        )));
    }
    Ok(())
}

fn check_blocks(len: usize, block_size: usize) -> CellshResult<()> {
    if len % block_size != 0 {
        return Err(CellshError::Protocol(format!(
            "Data length {} is not a multiple of the cipher block size {}",
            len, block_size
        )));
    }
    Ok(())
}

/// Outbound cipher state.
///
/// The CBC chaining value survives between calls, so consecutive packets
/// continue the same cipher stream as RFC 4253 requires.
pub struct EncryptionKey {
    algorithm: CipherAlgorithm,
    cipher: Aes128CbcEnc,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl EncryptionKey {
    /// Creates a new encryption key. Extra key or IV bytes are ignored.
    pub fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> CellshResult<Self> {
        check_material("key", algorithm.key_size(), key.len())?;
        check_material("IV", algorithm.iv_size(), iv.len())?;

        let cipher = Aes128CbcEnc::new_from_slices(
            &key[..algorithm.key_size()],
            &iv[..algorithm.iv_size()],
        )
        .map_err(|_| CellshError::Security("Failed to create AES-128-CBC key".to_string()))?;

        Ok(Self { algorithm, cipher })
    }

    /// Encrypts whole blocks in place.
    pub fn encrypt(&mut self, data: &mut [u8]) -> CellshResult<()> {
        let block_size = self.algorithm.block_size();
        check_blocks(data.len(), block_size)?;
        for block in data.chunks_exact_mut(block_size) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// Returns the algorithm.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }
}

/// Inbound cipher state.
pub struct DecryptionKey {
    algorithm: CipherAlgorithm,
    cipher: Aes128CbcDec,
}

impl std::fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl DecryptionKey {
    /// Creates a new decryption key. Extra key or IV bytes are ignored.
    pub fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> CellshResult<Self> {
        check_material("key", algorithm.key_size(), key.len())?;
        check_material("IV", algorithm.iv_size(), iv.len())?;

        let cipher = Aes128CbcDec::new_from_slices(
            &key[..algorithm.key_size()],
            &iv[..algorithm.iv_size()],
        )
        .map_err(|_| CellshError::Security("Failed to create AES-128-CBC key".to_string()))?;

        Ok(Self { algorithm, cipher })
    }

    /// Decrypts whole blocks in place.
    ///
    /// The packet reader calls this once for the first block, to learn the
    /// packet length, and again for the remainder.
    pub fn decrypt(&mut self, data: &mut [u8]) -> CellshResult<()> {
        let block_size = self.algorithm.block_size();
        check_blocks(data.len(), block_size)?;
        for block in data.chunks_exact_mut(block_size) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// Returns the algorithm.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }
}

/// MAC algorithm for SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// HMAC-SHA1
    HmacSha1,
}

impl MacAlgorithm {
    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            MacAlgorithm::HmacSha1 => "hmac-sha1",
        }
    }

    /// Returns the key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha1 => 20,
        }
    }

    /// Returns the MAC output size in bytes.
    pub fn mac_size(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha1 => 20,
        }
    }

    /// Parses MAC algorithm from name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hmac-sha1" => Some(MacAlgorithm::HmacSha1),
            _ => None,
        }
    }
}

/// MAC key for computing message authentication codes.
///
/// Unlike the cipher state the MAC is stateless; the caller supplies the
/// packet sequence number on every call.
pub struct MacKey {
    algorithm: MacAlgorithm,
    key: Vec<u8>,
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl MacKey {
    /// Creates a new MAC key.
    pub fn new(algorithm: MacAlgorithm, key_material: &[u8]) -> CellshResult<Self> {
        check_material("MAC key", algorithm.key_size(), key_material.len())?;

        Ok(Self {
            algorithm,
            key: key_material[..algorithm.key_size()].to_vec(),
        })
    }

    /// Computes `HMAC(key, sequence_be32 || packet_data)`.
    pub fn compute(&self, sequence: u32, packet_data: &[u8]) -> CellshResult<Vec<u8>> {
        let mut mac = HmacSha1::new_from_slice(&self.key)
            .map_err(|_| CellshError::Security("Invalid HMAC key".to_string()))?;
        mac.update(&sequence.to_be_bytes());
        mac.update(packet_data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Verifies the MAC received after a packet.
    ///
    /// Returns `Ok(())` if the MAC matches, a security error otherwise.
    pub fn verify(
        &self,
        sequence: u32,
        packet_data: &[u8],
        received_mac: &[u8],
    ) -> CellshResult<()> {
        let computed_mac = self.compute(sequence, packet_data)?;

        if computed_mac.len() != received_mac.len() {
            return Err(CellshError::Security("MAC length mismatch".to_string()));
        }

        if computed_mac.ct_eq(received_mac).into() {
            Ok(())
        } else {
            Err(CellshError::Security(format!(
                "MAC verification failed for packet {}",
                sequence
            )))
        }
    }

    /// Returns the algorithm.
    pub fn algorithm(&self) -> MacAlgorithm {
        self.algorithm
    }
}

impl Drop for MacKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

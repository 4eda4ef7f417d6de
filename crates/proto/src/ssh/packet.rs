//! SSH binary packet protocol (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (MAC = Message Authentication Code)
//! ```
//!
//! A [`Packet`] is a reusable, growable buffer. A connection keeps one for
//! each direction and refills it for every message instead of allocating:
//!
//! 1. [`Packet::reset`] clears the content (crypto state is kept)
//! 2. `put_*` calls append the payload, starting with the message type
//! 3. [`Packet::bless`] adds padding, writes the header, computes the MAC
//!    and encrypts the frame
//! 4. [`Packet::send`] writes the blessed frame to the transport
//!
//! On the receiving side [`Packet::from_network`] reads, decrypts and verifies
//! one frame, after which `get_*` calls walk the payload.
//!
//! # Constraints
//!
//! - `packet_length` must lie in `[5, 32768]`, checked before any payload
//!   byte is read
//! - `padding_length` is at least 4 and the whole frame is a multiple of the
//!   block size (8 before encryption, 16 with AES)
//! - Strings are ISO-8859-1: one byte per character
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::Packet;
//!
//! let mut packet = Packet::new();
//! packet.put_u8(5);
//! packet.put_string("ssh-userauth");
//! packet.bless().unwrap();
//! assert_eq!(packet.wire_bytes().len() % 8, 0);
//!
//! packet.rewind();
//! assert_eq!(packet.get_u8().unwrap(), 5);
//! assert_eq!(packet.get_string().unwrap(), "ssh-userauth");
//! ```

use super::crypto::{DecryptionKey, EncryptionKey, MacKey};
use bytes::{Buf, BufMut};
use cellsh_platform::{CellshError, CellshResult};
use num_bigint::{BigInt, BigUint, Sign};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Smallest legal `packet_length` field.
pub const MIN_PACKET_LENGTH: usize = 5;

/// Largest `packet_length` field the client accepts.
pub const MAX_PACKET_LENGTH: usize = 32768;

/// Minimum padding length in bytes (RFC 4253 Section 6).
pub const MIN_PADDING_LEN: usize = 4;

/// Block size used for padding before a cipher is active.
pub const PLAINTEXT_BLOCK_SIZE: usize = 8;

/// `packet_length` + `padding_length`.
const HEADER_LEN: usize = 5;

/// Initial buffer allocation.
const INITIAL_CAPACITY: usize = 512;

struct Sealer {
    cipher: EncryptionKey,
    mac: MacKey,
}

struct Opener {
    cipher: DecryptionKey,
    mac: MacKey,
}

/// Reusable SSH packet buffer for one direction of a connection.
pub struct Packet {
    /// Frame bytes: header, payload and (once blessed or received) padding.
    data: Vec<u8>,
    /// Read cursor into `data`.
    offset: usize,
    /// Padding length of the current frame, 0 until blessed or received.
    padding: usize,
    blessed: bool,
    sequence_number: u32,
    sealer: Option<Sealer>,
    opener: Option<Opener>,
    /// Blessed frame as it goes on the wire (ciphertext + MAC).
    wire: Vec<u8>,
    /// MAC read from the network.
    mac: Vec<u8>,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("offset", &self.offset)
            .field("blessed", &self.blessed)
            .field("sequence_number", &self.sequence_number)
            .field("encrypting", &self.sealer.is_some())
            .field("decrypting", &self.opener.is_some())
            .finish()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet {
    /// Creates an empty packet with no crypto attached.
    pub fn new() -> Self {
        let mut data = Vec::with_capacity(INITIAL_CAPACITY);
        data.extend_from_slice(&[0u8; HEADER_LEN]);
        Self {
            data,
            offset: HEADER_LEN,
            padding: 0,
            blessed: false,
            sequence_number: 0,
            sealer: None,
            opener: None,
            wire: Vec::new(),
            mac: Vec::new(),
        }
    }

    /// Clears the content so the buffer can carry a new message.
    ///
    /// Encryption, decryption and MAC state are preserved.
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.extend_from_slice(&[0u8; HEADER_LEN]);
        self.offset = HEADER_LEN;
        self.padding = 0;
        self.blessed = false;
        self.wire.clear();
    }

    /// Moves the read cursor back to the first payload byte (the message type).
    pub fn rewind(&mut self) {
        self.offset = HEADER_LEN;
    }

    /// Advances the read cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> CellshResult<()> {
        self.take(n).map(|_| ())
    }

    /// Read cursor position relative to the start of the payload.
    pub fn position(&self) -> usize {
        self.offset - HEADER_LEN
    }

    /// Bytes of payload left after the read cursor.
    pub fn remaining(&self) -> usize {
        self.payload_end().saturating_sub(self.offset)
    }

    /// Logical length of the frame (header, payload and padding if any).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no payload has been written or received.
    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Makes sure the buffer can hold `size` bytes without reallocating.
    ///
    /// When it cannot, storage for twice the requested size is reserved.
    pub fn ensure_size(&mut self, size: usize) {
        if self.data.capacity() < size {
            self.data.reserve(size * 2 - self.data.len());
        }
    }

    fn payload_end(&self) -> usize {
        self.data.len() - self.padding
    }

    fn take(&mut self, n: usize) -> CellshResult<&[u8]> {
        let end = self.offset.checked_add(n).filter(|end| *end <= self.payload_end());
        match end {
            Some(end) => {
                let start = self.offset;
                self.offset = end;
                Ok(&self.data[start..end])
            }
            None => Err(CellshError::Protocol(format!(
                "Truncated packet: wanted {} bytes at offset {}, only {} left",
                n,
                self.position(),
                self.remaining()
            ))),
        }
    }

    fn check_writable(&self) {
        debug_assert!(!self.blessed, "Packet written after bless() without reset()");
    }

    // ---- writers -----------------------------------------------------------

    /// Appends one byte.
    pub fn put_u8(&mut self, value: u8) {
        self.check_writable();
        self.data.put_u8(value);
    }

    /// Appends a boolean as one byte (0 or 1).
    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    /// Appends a big-endian `uint32`.
    pub fn put_u32(&mut self, value: u32) {
        self.check_writable();
        self.data.put_u32(value);
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.check_writable();
        self.ensure_size(self.data.len() + bytes.len());
        self.data.put_slice(bytes);
    }

    /// Appends an SSH `string`: `uint32` length followed by the bytes.
    pub fn put_byte_string(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes);
    }

    /// Appends text as an ISO-8859-1 SSH `string`.
    ///
    /// Characters outside Latin-1 are sent as `?`.
    pub fn put_string(&mut self, text: &str) {
        let bytes: Vec<u8> = text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        self.put_byte_string(&bytes);
    }

    /// Appends an `mpint`: two's complement, big-endian, minimal length.
    /// Zero is encoded as an empty string.
    pub fn put_mpint(&mut self, value: &BigInt) {
        if value.sign() == Sign::NoSign {
            self.put_u32(0);
        } else {
            self.put_byte_string(&value.to_signed_bytes_be());
        }
    }

    /// Appends a non-negative `mpint`.
    pub fn put_biguint(&mut self, value: &BigUint) {
        self.put_mpint(&BigInt::from_biguint(Sign::Plus, value.clone()));
    }

    // ---- readers -----------------------------------------------------------

    /// Reads one byte.
    pub fn get_u8(&mut self) -> CellshResult<u8> {
        Ok(self.take(1)?.get_u8())
    }

    /// Reads a boolean; any non-zero byte is true.
    pub fn get_bool(&mut self) -> CellshResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Reads a big-endian `uint32`.
    pub fn get_u32(&mut self) -> CellshResult<u32> {
        Ok(self.take(4)?.get_u32())
    }

    /// Reads `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> CellshResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Reads an SSH `string` as raw bytes.
    pub fn get_byte_string(&mut self) -> CellshResult<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.get_bytes(len)
    }

    /// Reads an SSH `string` as ISO-8859-1 text.
    pub fn get_string(&mut self) -> CellshResult<String> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.iter().map(|b| char::from(*b)).collect())
    }

    /// Reads an `mpint`.
    pub fn get_mpint(&mut self) -> CellshResult<BigInt> {
        let bytes = self.get_byte_string()?;
        if bytes.is_empty() {
            return Ok(BigInt::from(0u32));
        }
        Ok(BigInt::from_signed_bytes_be(&bytes))
    }

    /// Reads an `mpint` that must not be negative.
    pub fn get_biguint(&mut self) -> CellshResult<BigUint> {
        self.get_mpint()?
            .to_biguint()
            .ok_or_else(|| CellshError::Protocol("Negative mpint where unsigned expected".into()))
    }

    // ---- frame -------------------------------------------------------------

    /// The `packet_length` header field of a blessed or received frame.
    pub fn length_field(&self) -> u32 {
        (&self.data[..4]).get_u32()
    }

    /// Padding length of a blessed or received frame, 0 before blessing.
    pub fn padding_length(&self) -> usize {
        self.padding
    }

    /// The message type (first payload byte), if any payload exists.
    pub fn message_type(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    /// Payload bytes, starting with the message type.
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..self.payload_end()]
    }

    /// Returns true once [`bless`](Self::bless) has run since the last reset.
    pub fn is_blessed(&self) -> bool {
        self.blessed
    }

    /// Sequence number used for this packet's MAC.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Sets the sequence number used for the next MAC computation or check.
    pub fn set_sequence_number(&mut self, sequence_number: u32) {
        self.sequence_number = sequence_number;
    }

    /// Attaches outbound cipher and MAC state. Takes effect on the next bless.
    pub fn set_encryption(&mut self, cipher: EncryptionKey, mac: MacKey) {
        self.sealer = Some(Sealer { cipher, mac });
    }

    /// Attaches inbound cipher and MAC state. Takes effect on the next read.
    pub fn set_decryption(&mut self, cipher: DecryptionKey, mac: MacKey) {
        self.opener = Some(Opener { cipher, mac });
    }

    /// Returns true if outbound frames are encrypted.
    pub fn is_encrypting(&self) -> bool {
        self.sealer.is_some()
    }

    /// Block size used to pad outbound frames.
    pub fn block_size(&self) -> usize {
        self.sealer
            .as_ref()
            .map_or(PLAINTEXT_BLOCK_SIZE, |s| s.cipher.algorithm().block_size())
    }

    /// Pads, frames, MACs and encrypts the payload.
    ///
    /// Calling this again before [`reset`](Self::reset) does nothing, so the
    /// wire bytes stay identical.
    pub fn bless(&mut self) -> CellshResult<()> {
        if self.blessed {
            return Ok(());
        }

        let block_size = self.block_size();
        let unpadded = self.data.len();
        let mut padding = block_size - (unpadded % block_size);
        if padding < MIN_PADDING_LEN {
            padding += block_size;
        }

        let packet_length = unpadded + padding - 4;
        if packet_length > MAX_PACKET_LENGTH {
            return Err(CellshError::Protocol(format!(
                "Outbound packet too large: {} bytes (maximum {})",
                packet_length, MAX_PACKET_LENGTH
            )));
        }

        self.ensure_size(unpadded + padding);
        let mut random = [0u8; 2 * 16];
        rand::thread_rng().fill_bytes(&mut random[..padding]);
        self.data.put_slice(&random[..padding]);

        self.data[..4].copy_from_slice(&(packet_length as u32).to_be_bytes());
        self.data[4] = padding as u8;
        self.padding = padding;

        self.wire.clear();
        self.wire.extend_from_slice(&self.data);
        if let Some(sealer) = self.sealer.as_mut() {
            let mac = sealer.mac.compute(self.sequence_number, &self.data)?;
            sealer.cipher.encrypt(&mut self.wire)?;
            self.wire.extend_from_slice(&mac);
        }

        self.blessed = true;
        Ok(())
    }

    /// The blessed frame exactly as written to the transport.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.wire
    }

    /// Blesses the packet (if needed) and writes it to `writer`.
    pub async fn send<W>(&mut self, writer: &mut W) -> CellshResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.bless()?;
        writer.write_all(&self.wire).await?;
        writer.flush().await?;
        trace!(
            seq = self.sequence_number,
            msg = ?self.message_type(),
            len = self.wire.len(),
            "sent packet"
        );
        Ok(())
    }

    fn check_length(packet_length: usize) -> CellshResult<()> {
        if !(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&packet_length) {
            return Err(CellshError::Protocol(format!(
                "Bad packet length {} (allowed {}..={})",
                packet_length, MIN_PACKET_LENGTH, MAX_PACKET_LENGTH
            )));
        }
        Ok(())
    }

    /// Replaces the content with the next frame read from `reader`.
    ///
    /// With decryption attached, the first cipher block is decrypted to learn
    /// the length, the rest of the frame is read and decrypted, and the MAC
    /// that follows is checked against the current sequence number. A frame
    /// that fails any check is never exposed through the accessors.
    pub async fn from_network<R>(&mut self, reader: &mut R) -> CellshResult<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.reset();
        // Until the frame is verified the buffer must not look readable.
        self.padding = 0;
        self.data.clear();

        let result = self.read_frame(reader).await;
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn read_frame<R>(&mut self, reader: &mut R) -> CellshResult<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let block_size = self
            .opener
            .as_ref()
            .map_or(PLAINTEXT_BLOCK_SIZE, |o| o.cipher.algorithm().block_size());

        // The first block always holds the whole header.
        self.data.resize(block_size, 0);
        reader.read_exact(&mut self.data[..block_size]).await?;
        if let Some(opener) = self.opener.as_mut() {
            opener.cipher.decrypt(&mut self.data[..block_size])?;
        }

        let packet_length = (&self.data[..4]).get_u32() as usize;
        Self::check_length(packet_length)?;

        let total = packet_length + 4;
        if total < block_size || total % block_size != 0 {
            return Err(CellshError::Protocol(format!(
                "Packet length {} is not a multiple of the block size {}",
                total, block_size
            )));
        }

        self.ensure_size(total);
        self.data.resize(total, 0);
        reader.read_exact(&mut self.data[block_size..total]).await?;

        if let Some(opener) = self.opener.as_mut() {
            opener.cipher.decrypt(&mut self.data[block_size..total])?;

            self.mac.resize(opener.mac.algorithm().mac_size(), 0);
            reader.read_exact(&mut self.mac).await?;
            opener
                .mac
                .verify(self.sequence_number, &self.data, &self.mac)?;
        }

        let padding = self.data[4] as usize;
        if padding < MIN_PADDING_LEN || padding + 1 >= packet_length {
            return Err(CellshError::Protocol(format!(
                "Bad padding length {} for packet length {}",
                padding, packet_length
            )));
        }

        self.padding = padding;
        self.offset = HEADER_LEN;
        trace!(
            seq = self.sequence_number,
            msg = ?self.message_type(),
            len = total,
            "received packet"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::crypto::{CipherAlgorithm, MacAlgorithm};

    fn keyed_pair(seed: u8) -> (Packet, Packet) {
        let key = [seed; 16];
        let iv = [seed.wrapping_add(1); 16];
        let mac = [seed.wrapping_add(2); 20];

        let mut out = Packet::new();
        out.set_encryption(
            EncryptionKey::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap(),
            MacKey::new(MacAlgorithm::HmacSha1, &mac).unwrap(),
        );
        let mut inbound = Packet::new();
        inbound.set_decryption(
            DecryptionKey::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap(),
            MacKey::new(MacAlgorithm::HmacSha1, &mac).unwrap(),
        );
        (out, inbound)
    }

    #[test]
    fn test_primitive_round_trip() {
        let mut packet = Packet::new();
        packet.put_u8(94);
        packet.put_u32(0xDEAD_BEEF);
        packet.put_bool(true);
        packet.put_string("vt100");
        packet.put_byte_string(&[0, 1, 2]);
        packet.put_bytes(b"raw");

        packet.rewind();
        assert_eq!(packet.get_u8().unwrap(), 94);
        assert_eq!(packet.get_u32().unwrap(), 0xDEAD_BEEF);
        assert!(packet.get_bool().unwrap());
        assert_eq!(packet.get_string().unwrap(), "vt100");
        assert_eq!(packet.get_byte_string().unwrap(), vec![0, 1, 2]);
        assert_eq!(packet.get_bytes(3).unwrap(), b"raw");
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn test_u32_boundaries() {
        let values = [0, 1, 0x7FFF_FFFF, 0x8000_0000, u32::MAX];
        let mut packet = Packet::new();
        for value in values {
            packet.put_u32(value);
        }
        assert_eq!(&packet.payload()[12..16], &[0x80, 0, 0, 0]);

        packet.rewind();
        for value in values {
            assert_eq!(packet.get_u32().unwrap(), value);
        }
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn test_latin1_strings() {
        let mut packet = Packet::new();
        packet.put_string("caf\u{e9}");
        packet.put_string("\u{263a}");
        assert_eq!(&packet.payload()[..8], &[0, 0, 0, 4, b'c', b'a', b'f', 0xE9]);

        packet.rewind();
        assert_eq!(packet.get_string().unwrap(), "caf\u{e9}");
        assert_eq!(packet.get_string().unwrap(), "?");
    }

    #[test]
    fn test_mpint_encoding() {
        // RFC 4251 Section 5 examples.
        let cases: [(i64, &[u8]); 5] = [
            (0, &[0, 0, 0, 0]),
            (0x80, &[0, 0, 0, 2, 0x00, 0x80]),
            (-0x1234, &[0, 0, 0, 2, 0xed, 0xcc]),
            (-0xdead_beef, &[0, 0, 0, 5, 0xff, 0x21, 0x52, 0x41, 0x11]),
            (0x7f, &[0, 0, 0, 1, 0x7f]),
        ];

        for (value, expected) in cases {
            let mut packet = Packet::new();
            packet.put_mpint(&BigInt::from(value));
            assert_eq!(packet.payload(), expected, "encoding {}", value);

            packet.rewind();
            assert_eq!(packet.get_mpint().unwrap(), BigInt::from(value));
        }
    }

    #[test]
    fn test_negative_mpint_not_unsigned() {
        let mut packet = Packet::new();
        packet.put_mpint(&BigInt::from(-5));
        packet.rewind();
        assert!(packet.get_biguint().is_err());
    }

    #[test]
    fn test_truncated_reads_fail() {
        let mut packet = Packet::new();
        packet.put_u32(10);
        packet.put_bytes(b"short");
        packet.rewind();
        assert!(matches!(
            packet.get_byte_string(),
            Err(CellshError::Protocol(_))
        ));

        packet.rewind();
        assert!(packet.skip(100).is_err());
    }

    #[test]
    fn test_padding_law() {
        for encrypted in [false, true] {
            for payload_len in 1..=300usize {
                let (mut packet, _) = keyed_pair(3);
                if !encrypted {
                    packet = Packet::new();
                }
                packet.put_bytes(&vec![0x5a; payload_len]);
                packet.bless().unwrap();

                let block = if encrypted { 16 } else { 8 };
                let padding = packet.padding_length();
                let framed = HEADER_LEN + payload_len + padding;
                assert!(padding >= MIN_PADDING_LEN);
                assert!(padding < MIN_PADDING_LEN + block);
                assert_eq!(framed % block, 0);
                assert_eq!(packet.length_field() as usize, framed - 4);
                assert_eq!(packet.payload().len(), payload_len);
            }
        }
    }

    #[test]
    fn test_bless_is_idempotent() {
        let (mut packet, _) = keyed_pair(9);
        packet.put_u8(21);
        packet.bless().unwrap();
        let first = packet.wire_bytes().to_vec();
        packet.bless().unwrap();
        assert_eq!(packet.wire_bytes(), &first[..]);

        packet.reset();
        assert!(!packet.is_blessed());
        assert!(packet.is_encrypting());
        assert!(packet.is_empty());
    }

    #[tokio::test]
    async fn test_plaintext_network_round_trip() {
        let mut out = Packet::new();
        out.put_u8(20);
        out.put_string("diffie-hellman-group-exchange-sha1");

        let mut wire = Vec::new();
        out.send(&mut wire).await.unwrap();

        let mut inbound = Packet::new();
        inbound.from_network(&mut &wire[..]).await.unwrap();
        assert_eq!(inbound.message_type(), Some(20));
        assert_eq!(inbound.payload(), out.payload());
        inbound.skip(1).unwrap();
        assert_eq!(
            inbound.get_string().unwrap(),
            "diffie-hellman-group-exchange-sha1"
        );
    }

    #[tokio::test]
    async fn test_encrypted_stream_of_packets() {
        let (mut out, mut inbound) = keyed_pair(42);
        let mut wire = Vec::new();

        for seq in 0..5u32 {
            out.reset();
            out.set_sequence_number(seq);
            out.put_u8(94);
            out.put_byte_string(&vec![seq as u8; 40 * seq as usize]);
            out.send(&mut wire).await.unwrap();
        }

        let mut reader = &wire[..];
        for seq in 0..5u32 {
            inbound.set_sequence_number(seq);
            inbound.from_network(&mut reader).await.unwrap();
            assert_eq!(inbound.get_u8().unwrap(), 94);
            assert_eq!(
                inbound.get_byte_string().unwrap(),
                vec![seq as u8; 40 * seq as usize]
            );
        }
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_flipped_bits_rejected() {
        let (mut out, _) = keyed_pair(7);
        out.put_u8(94);
        out.put_byte_string(b"secret shell output");
        out.bless().unwrap();
        let wire = out.wire_bytes().to_vec();

        for position in [0, wire.len() - 30, wire.len() - 1] {
            let mut tampered = wire.clone();
            tampered[position] ^= 0x01;

            let (_, mut inbound) = keyed_pair(7);
            let result = inbound.from_network(&mut &tampered[..]).await;
            assert!(result.is_err(), "bit flip at {} accepted", position);
            assert!(inbound.payload().is_empty());
        }
    }

    #[tokio::test]
    async fn test_wrong_sequence_number_rejected() {
        let (mut out, mut inbound) = keyed_pair(1);
        out.set_sequence_number(0);
        out.put_u8(2);
        out.bless().unwrap();

        inbound.set_sequence_number(1);
        let result = inbound.from_network(&mut out.wire_bytes()).await;
        assert!(matches!(result, Err(CellshError::Security(_))));
    }

    #[tokio::test]
    async fn test_length_bounds_enforced() {
        for bad in [0u32, 4, 32769, u32::MAX] {
            let mut wire = bad.to_be_bytes().to_vec();
            wire.extend_from_slice(&[4, 0, 0, 0]);
            let mut inbound = Packet::new();
            let result = inbound.from_network(&mut &wire[..]).await;
            assert!(
                matches!(result, Err(CellshError::Protocol(_))),
                "length {} accepted",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_bad_padding_rejected() {
        // packet_length 12, padding_length 2
        let mut wire = vec![0, 0, 0, 12, 2];
        wire.extend_from_slice(&[0u8; 11]);
        let mut inbound = Packet::new();
        assert!(inbound.from_network(&mut &wire[..]).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_io_error() {
        let mut out = Packet::new();
        out.put_u8(2);
        out.bless().unwrap();
        let wire = &out.wire_bytes()[..10];

        let mut inbound = Packet::new();
        let result = inbound.from_network(&mut &wire[..]).await;
        assert!(matches!(result, Err(CellshError::Io(_))));
    }

    #[test]
    fn test_oversized_outbound_rejected() {
        let mut packet = Packet::new();
        packet.put_bytes(&vec![0u8; MAX_PACKET_LENGTH]);
        assert!(packet.bless().is_err());
    }

    #[test]
    fn test_ensure_size_doubles() {
        let mut packet = Packet::new();
        packet.ensure_size(4000);
        assert!(packet.data.capacity() >= 8000);
    }
}

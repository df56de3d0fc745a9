//! Session keys and the keyed stream transform applied to frames.
//!
//! ```text
//! secret (account password) ──┐
//!                              ├─[HKDF-SHA256]─► writer cipher | writer mac
//! challenge nonce (salt) ──────┘                 reader cipher | reader mac
//! ```
//!
//! A [`KeyStream`] is stateful: every `encode_message`/`decode_message`
//! call advances its sequence number, so the same plaintext never encodes
//! to the same bytes twice and both peers must process frames in order.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{Result, WaError};

type HmacSha256 = Hmac<Sha256>;

/// Bytes of authentication tag written per message
pub const MAC_LENGTH: usize = 4;

/// Key length of each derived sub-key
pub const KEY_LENGTH: usize = 32;

const HKDF_INFO: &[u8] = b"whatsapi/v2/session";

/// Keyed, stateful transform for one direction of the stream
pub trait KeyStream: Send {
    /// Encrypt `buffer[offset..offset + length]` in place and write the
    /// tag into `buffer[mac_offset..mac_offset + MAC_LENGTH]`.
    fn encode_message(
        &mut self,
        buffer: &mut [u8],
        mac_offset: usize,
        offset: usize,
        length: usize,
    ) -> Result<()>;

    /// Verify the tag at `mac_offset` and decrypt `buffer[offset..offset + length]` in place.
    fn decode_message(
        &mut self,
        buffer: &mut [u8],
        mac_offset: usize,
        offset: usize,
        length: usize,
    ) -> Result<()>;
}

/// Keys for both stream directions, as seen by the client
pub struct SessionKeys {
    /// Decrypts inbound frames
    pub reader: Box<dyn KeyStream>,
    /// Encrypts outbound frames and seals auth blobs
    pub writer: Box<dyn KeyStream>,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Key derivation from a shared secret and challenge material
pub trait Cipher: Send {
    /// Derive reader and writer streams for a fresh session
    fn derive_keys(&self, secret: &[u8], challenge: &[u8]) -> Result<SessionKeys>;
}

/// HKDF-SHA256 key derivation producing [`HmacKeyStream`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacCipher;

impl Cipher for HmacCipher {
    fn derive_keys(&self, secret: &[u8], challenge: &[u8]) -> Result<SessionKeys> {
        let hk = Hkdf::<Sha256>::new(Some(challenge), secret);
        let mut okm = [0u8; KEY_LENGTH * 4];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|e| WaError::Crypto(format!("HKDF expand failed: {e}")))?;

        let (writer, reader) = okm.split_at(KEY_LENGTH * 2);
        let keys = SessionKeys {
            writer: Box::new(HmacKeyStream::new(&writer[..KEY_LENGTH], &writer[KEY_LENGTH..])),
            reader: Box::new(HmacKeyStream::new(&reader[..KEY_LENGTH], &reader[KEY_LENGTH..])),
        };
        okm.zeroize();
        Ok(keys)
    }
}

/// HMAC-SHA256 counter-mode keystream with a truncated HMAC tag
pub struct HmacKeyStream {
    cipher_key: [u8; KEY_LENGTH],
    mac_key: [u8; KEY_LENGTH],
    sequence: u64,
}

impl HmacKeyStream {
    /// Create a stream from its two sub-keys
    pub fn new(cipher_key: &[u8], mac_key: &[u8]) -> Self {
        let mut stream = Self {
            cipher_key: [0u8; KEY_LENGTH],
            mac_key: [0u8; KEY_LENGTH],
            sequence: 0,
        };
        let n = cipher_key.len().min(KEY_LENGTH);
        stream.cipher_key[..n].copy_from_slice(&cipher_key[..n]);
        let n = mac_key.len().min(KEY_LENGTH);
        stream.mac_key[..n].copy_from_slice(&mac_key[..n]);
        stream
    }

    /// Messages processed so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn hmac(key: &[u8]) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| WaError::Crypto(format!("Invalid HMAC key: {e}")))
    }

    fn apply_keystream(&self, data: &mut [u8]) -> Result<()> {
        for (block, chunk) in data.chunks_mut(KEY_LENGTH).enumerate() {
            let mut mac = Self::hmac(&self.cipher_key)?;
            mac.update(&self.sequence.to_be_bytes());
            mac.update(&(block as u64).to_be_bytes());
            let pad = mac.finalize().into_bytes();
            for (byte, key) in chunk.iter_mut().zip(pad.iter()) {
                *byte ^= key;
            }
        }
        Ok(())
    }

    fn tag(&self, data: &[u8]) -> Result<[u8; MAC_LENGTH]> {
        let mut mac = Self::hmac(&self.mac_key)?;
        mac.update(data);
        mac.update(&self.sequence.to_be_bytes());
        let full = mac.finalize().into_bytes();

        let mut tag = [0u8; MAC_LENGTH];
        tag.copy_from_slice(&full[..MAC_LENGTH]);
        Ok(tag)
    }
}

fn check_bounds(buffer: &[u8], mac_offset: usize, offset: usize, length: usize) -> Result<()> {
    if offset + length > buffer.len() || mac_offset + MAC_LENGTH > buffer.len() {
        return Err(WaError::Crypto(format!(
            "message bounds out of range (buffer {}, data {offset}+{length}, mac {mac_offset})",
            buffer.len()
        )));
    }
    Ok(())
}

impl KeyStream for HmacKeyStream {
    fn encode_message(
        &mut self,
        buffer: &mut [u8],
        mac_offset: usize,
        offset: usize,
        length: usize,
    ) -> Result<()> {
        check_bounds(buffer, mac_offset, offset, length)?;

        self.apply_keystream(&mut buffer[offset..offset + length])?;
        let tag = self.tag(&buffer[offset..offset + length])?;
        buffer[mac_offset..mac_offset + MAC_LENGTH].copy_from_slice(&tag);

        self.sequence += 1;
        Ok(())
    }

    fn decode_message(
        &mut self,
        buffer: &mut [u8],
        mac_offset: usize,
        offset: usize,
        length: usize,
    ) -> Result<()> {
        check_bounds(buffer, mac_offset, offset, length)?;

        let expected = self.tag(&buffer[offset..offset + length])?;
        if !constant_time_eq(&expected, &buffer[mac_offset..mac_offset + MAC_LENGTH]) {
            return Err(WaError::Crypto("frame authentication failed".to_string()));
        }

        self.apply_keystream(&mut buffer[offset..offset + length])?;
        self.sequence += 1;
        Ok(())
    }
}

impl Drop for HmacKeyStream {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

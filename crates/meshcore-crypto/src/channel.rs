//! Channel message cryptography: AES-128-ECB encryption with a truncated
//! HMAC-SHA256 MAC (spec §4.2).
//!
//! A channel payload on the wire is `[mac:2][ciphertext:N]`, `N` a
//! multiple of 16. ECB is safe here only because each payload is a short,
//! independently-keyed record whose integrity is carried by the MAC, not
//! by semantic uniqueness of ciphertext blocks — there is no IV and the
//! protocol is defined to reproduce this bit-exactly, not to be
//! redesigned into a stronger mode.

use aes::Aes128;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, block_padding::NoPadding};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const MAC_LEN: usize = 2;
const BLOCK_LEN: usize = 16;
const PLAINTEXT_HEADER_LEN: usize = 5; // timestamp:u32 + txt_type:u8

/// The 16-byte shared secret for one channel slot.
///
/// Zeroized on drop; never implements `Debug`/`Display` to avoid
/// accidental logging of key material.
#[derive(Clone)]
pub struct ChannelSecret([u8; 16]);

impl ChannelSecret {
    /// Wrap a raw 16-byte secret.
    #[must_use]
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes, e.g. for storage.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Drop for ChannelSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A successfully decrypted channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedChannelMessage {
    /// Device-domain send timestamp.
    pub timestamp: u32,
    /// Text-type discriminant.
    pub txt_type: u8,
    /// NUL-trimmed message text.
    pub text: String,
}

fn truncated_hmac(secret: &ChannelSecret, ciphertext: &[u8]) -> [u8; MAC_LEN] {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key length");
    };
    mac.update(ciphertext);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&tag[..MAC_LEN]);
    out
}

/// Decrypt a `[mac:2][ciphertext:N]` channel payload.
///
/// # Errors
///
/// - [`CryptoError::HmacFailed`] if the recomputed truncated HMAC does not
///   match the transmitted tag.
/// - [`CryptoError::DecryptFailed`] if `N == 0` or `N % 16 != 0`.
/// - [`CryptoError::PayloadTooShort`] if the decrypted plaintext is
///   shorter than 5 bytes.
pub fn decrypt(
    secret: &ChannelSecret,
    payload: &[u8],
) -> Result<DecryptedChannelMessage, CryptoError> {
    if payload.len() < MAC_LEN {
        return Err(CryptoError::DecryptFailed {
            reason: format!("payload too short for mac: {} bytes", payload.len()),
        });
    }
    let (mac_tag, ciphertext) = payload.split_at(MAC_LEN);

    let expected = truncated_hmac(secret, ciphertext);
    if expected != mac_tag {
        return Err(CryptoError::HmacFailed);
    }

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::DecryptFailed {
            reason: format!("ciphertext length {} not a positive multiple of 16", ciphertext.len()),
        });
    }

    let decryptor = Aes128EcbDec::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::DecryptFailed { reason: e.to_string() })?;
    let plaintext = decryptor
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| CryptoError::DecryptFailed { reason: e.to_string() })?;

    if plaintext.len() < PLAINTEXT_HEADER_LEN {
        return Err(CryptoError::PayloadTooShort {
            got: plaintext.len(),
            need: PLAINTEXT_HEADER_LEN,
        });
    }

    let Ok(timestamp_bytes) = plaintext[0..4].try_into() else {
        unreachable!("slice is exactly 4 bytes");
    };
    let timestamp = u32::from_le_bytes(timestamp_bytes);
    let txt_type = plaintext[4];
    let text_end = plaintext[5..].iter().position(|&b| b == 0).map_or(plaintext.len(), |p| 5 + p);
    let text = crate::utf8_lossy_warn(&plaintext[5..text_end]);

    Ok(DecryptedChannelMessage { timestamp, txt_type, text })
}

/// Encrypt a channel message: pad `[timestamp][txt_type][text]` to a
/// 16-byte multiple with NUL bytes, AES-128-ECB encrypt, and prepend the
/// truncated HMAC tag.
#[must_use]
pub fn encrypt(secret: &ChannelSecret, timestamp: u32, txt_type: u8, text: &str) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(PLAINTEXT_HEADER_LEN + text.len());
    plaintext.extend_from_slice(&timestamp.to_le_bytes());
    plaintext.push(txt_type);
    plaintext.extend_from_slice(text.as_bytes());

    let padded_len = plaintext.len().div_ceil(BLOCK_LEN).max(1) * BLOCK_LEN;
    plaintext.resize(padded_len, 0);

    let Ok(encryptor) = Aes128EcbEnc::new_from_slice(secret.as_bytes()) else {
        unreachable!("channel secret is always exactly 16 bytes");
    };
    let ciphertext = encryptor.encrypt_padded_vec_mut::<NoPadding>(&plaintext);

    let mac = truncated_hmac(secret, &ciphertext);
    let mut out = Vec::with_capacity(MAC_LEN + ciphertext.len());
    out.extend_from_slice(&mac);
    out.extend_from_slice(&ciphertext);
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn golden_value_scenario() {
        // Spec §8 scenario 2: timestamp=0x668E5260, txt_type=0, text="hello".
        // The literal example's NUL padding count doesn't sum to a 16-byte
        // block; this test uses the minimum NUL padding that does, since
        // the declared ciphertext length (16) is the bit-exact contract.
        let secret = ChannelSecret::new([0x8B; 16]);
        let encrypted = encrypt(&secret, 0x668E_5260, 0, "hello");
        assert_eq!(encrypted.len(), MAC_LEN + BLOCK_LEN);

        let decrypted = decrypt(&secret, &encrypted).unwrap();
        assert_eq!(decrypted.timestamp, 0x668E_5260);
        assert_eq!(decrypted.txt_type, 0);
        assert_eq!(decrypted.text, "hello");
    }

    #[test]
    fn hmac_mismatch_is_rejected() {
        let secret = ChannelSecret::new([1u8; 16]);
        let mut encrypted = encrypt(&secret, 0, 0, "hi");
        encrypted[0] ^= 0xFF;
        assert_eq!(decrypt(&secret, &encrypted), Err(CryptoError::HmacFailed));
    }

    #[test]
    fn wrong_key_fails_hmac_before_decrypt() {
        let secret_a = ChannelSecret::new([1u8; 16]);
        let secret_b = ChannelSecret::new([2u8; 16]);
        let encrypted = encrypt(&secret_a, 0, 0, "hi");
        assert_eq!(decrypt(&secret_b, &encrypted), Err(CryptoError::HmacFailed));
    }

    #[test]
    fn non_multiple_of_16_ciphertext_is_decrypt_failed() {
        let secret = ChannelSecret::new([3u8; 16]);
        let ciphertext = vec![0u8; 17];
        let mac = truncated_hmac(&secret, &ciphertext);
        let mut payload = mac.to_vec();
        payload.extend_from_slice(&ciphertext);
        assert!(matches!(decrypt(&secret, &payload), Err(CryptoError::DecryptFailed { .. })));
    }

    proptest! {
        #[test]
        fn encrypt_decrypt_round_trip(
            key in proptest::array::uniform16(any::<u8>()),
            timestamp in any::<u32>(),
            txt_type in any::<u8>(),
            text in "[a-zA-Z0-9 ]{0,40}",
        ) {
            let secret = ChannelSecret::new(key);
            let encrypted = encrypt(&secret, timestamp, txt_type, &text);
            let decrypted = decrypt(&secret, &encrypted).unwrap();
            prop_assert_eq!(decrypted.timestamp, timestamp);
            prop_assert_eq!(decrypted.txt_type, txt_type);
            prop_assert_eq!(decrypted.text, text);
        }

        #[test]
        fn tampered_mac_always_rejected(
            key in proptest::array::uniform16(any::<u8>()),
            text in "[a-zA-Z0-9]{1,20}",
            flip_byte in 0usize..2,
        ) {
            let secret = ChannelSecret::new(key);
            let mut encrypted = encrypt(&secret, 1, 0, &text);
            encrypted[flip_byte] ^= 0x01;
            prop_assert_eq!(decrypt(&secret, &encrypted), Err(CryptoError::HmacFailed));
        }
    }
}

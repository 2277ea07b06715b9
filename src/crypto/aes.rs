use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _};
use base64::Engine as _;
use serde::Deserialize;

use super::kdf::cryptojs_key_and_iv;
use super::CryptoError;

const SALTED_MAGIC: &[u8; 8] = b"Salted__";
const SALT_LENGTH: usize = 8;
const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CbcPadding {
    #[default]
    Pkcs7,
    /// Input must already be block aligned.
    None,
}

/// Picks the AES variant from the key length. The iv is always one block.
macro_rules! with_aes_cipher {
    ($key:expr, $iv:expr, |$cipher:ident| $body:block) => {{
        let (key_len, iv_len) = ($key.len(), $iv.len());
        if iv_len != BLOCK_SIZE {
            return Err(CryptoError::InvalidKeyIvLength { key: key_len, iv: iv_len });
        }
        match key_len {
            16 => {
                type $cipher = aes::Aes128;
                $body
            }
            24 => {
                type $cipher = aes::Aes192;
                $body
            }
            32 => {
                type $cipher = aes::Aes256;
                $body
            }
            _ => return Err(CryptoError::InvalidKeyIvLength { key: key_len, iv: iv_len }),
        }
    }};
}

pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8], padding: CbcPadding) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Unaligned(ciphertext.len()));
    }

    let mut buffer = ciphertext.to_vec();
    let plain_len = with_aes_cipher!(key, iv, |Cipher| {
        let decryptor = cbc::Decryptor::<Cipher>::new_from_slices(key, iv).map_err(|_| {
            CryptoError::InvalidKeyIvLength {
                key: key.len(),
                iv: iv.len(),
            }
        })?;
        match padding {
            CbcPadding::Pkcs7 => decryptor.decrypt_padded_mut::<Pkcs7>(&mut buffer).map(|plain| plain.len()),
            CbcPadding::None => decryptor.decrypt_padded_mut::<NoPadding>(&mut buffer).map(|plain| plain.len()),
        }
        .map_err(|_| CryptoError::BadPadding)?
    });

    buffer.truncate(plain_len);
    Ok(buffer)
}

pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8], padding: CbcPadding) -> Result<Vec<u8>, CryptoError> {
    let mut buffer = vec![0u8; plaintext.len() + BLOCK_SIZE];
    buffer[..plaintext.len()].copy_from_slice(plaintext);

    let cipher_len = with_aes_cipher!(key, iv, |Cipher| {
        let encryptor = cbc::Encryptor::<Cipher>::new_from_slices(key, iv).map_err(|_| {
            CryptoError::InvalidKeyIvLength {
                key: key.len(),
                iv: iv.len(),
            }
        })?;
        match padding {
            CbcPadding::Pkcs7 => encryptor
                .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
                .map(|cipher| cipher.len()),
            CbcPadding::None => encryptor
                .encrypt_padded_mut::<NoPadding>(&mut buffer, plaintext.len())
                .map(|cipher| cipher.len()),
        }
        .map_err(|_| CryptoError::Unaligned(plaintext.len()))?
    });

    buffer.truncate(cipher_len);
    Ok(buffer)
}

/// Decrypts the textual output of `CryptoJS.AES.encrypt(text, passphrase)`.
///
/// The decoded bytes must start with `Salted__` followed by the 8 byte salt.
pub fn decrypt_cryptojs_base64(encoded: &str, password: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let blob = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;

    if !blob.starts_with(SALTED_MAGIC) {
        return Err(CryptoError::MissingSaltHeader);
    }

    decrypt_salted(&blob, password)
}

/// Decrypts a salted blob that may or may not carry the `Salted__` prefix.
///
/// With the prefix the layout is `Salted__ || salt || ciphertext`, without it `salt || ciphertext`.
pub fn decrypt_salted(blob: &[u8], password: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let rest = blob.strip_prefix(SALTED_MAGIC.as_slice()).unwrap_or(blob);

    if rest.len() < SALT_LENGTH + BLOCK_SIZE {
        return Err(CryptoError::TooShort(blob.len()));
    }

    let (salt, ciphertext) = rest.split_at(SALT_LENGTH);
    let material = cryptojs_key_and_iv(password, salt)?;

    decrypt(ciphertext, material.key(), material.iv(), CbcPadding::Pkcs7)
}

pub fn decrypt_salted_base64(encoded: &str, password: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let blob = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    decrypt_salted(&blob, password)
}

/// `CryptoJS` JSON formatter output. `iv` is carried along but is derived again from the password.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoJsEnvelope {
    pub ct: String,
    #[serde(default)]
    pub iv: Option<String>,
    #[serde(default)]
    pub s: Option<String>,
}

impl CryptoJsEnvelope {
    pub fn decrypt(&self, password: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let blob = base64::engine::general_purpose::STANDARD.decode(self.ct.trim())?;

        match &self.s {
            Some(salt) if !blob.starts_with(SALTED_MAGIC) => {
                let salt = hex::decode(salt.trim())?;
                let material = cryptojs_key_and_iv(password, &salt)?;
                decrypt(&blob, material.key(), material.iv(), CbcPadding::Pkcs7)
            }
            _ => decrypt_salted(&blob, password),
        }
    }
}

pub fn decrypt_cryptojs_json(envelope: &str, password: &[u8]) -> Result<Vec<u8>, CryptoError> {
    serde_json::from_str::<CryptoJsEnvelope>(envelope)?.decrypt(password)
}

/// Decrypts base64 ciphertext with an already known key and iv given as hex.
pub fn decrypt_key_iv_hex(
    ciphertext: &str,
    key_hex: &str,
    iv_hex: &str,
    padding: CbcPadding,
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = base64::engine::general_purpose::STANDARD.decode(ciphertext.trim())?;
    let key = zeroize::Zeroizing::new(hex::decode(key_hex.trim())?);
    let iv = hex::decode(iv_hex.trim())?;

    decrypt(&ciphertext, &key, &iv, padding)
}

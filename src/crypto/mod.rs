//! OpenSSL/CryptoJS compatible password based AES.

pub mod aes;
pub mod kdf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid json envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing Salted__ header")]
    MissingSaltHeader,
    #[error("encrypted payload too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid key or iv length: key {key} bytes, iv {iv} bytes")]
    InvalidKeyIvLength { key: usize, iv: usize },
    #[error("data length {0} is not a multiple of the block size")]
    Unaligned(usize),
    #[error("bad padding")]
    BadPadding,
    #[error("iteration count must be at least 1")]
    ZeroIterations,
}

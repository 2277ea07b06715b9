use digest::{Digest, FixedOutputReset};
use md5::Md5;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;

pub const CRYPTOJS_KEY_LENGTH: usize = 32;
pub const CRYPTOJS_IV_LENGTH: usize = 16;

/// Key and IV produced by [`derive_key_and_iv`]. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeyMaterial {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl DerivedKeyMaterial {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

impl std::fmt::Debug for DerivedKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyMaterial")
            .field("key_len", &self.key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

/// OpenSSL `EVP_BytesToKey`.
///
/// Each block is `D(previous_block || password || salt)`, re-digested `iterations - 1` times before it is
/// appended. Blocks are generated until `key_len + iv_len` bytes exist; key and iv are sliced from the front.
///
/// See https://github.com/openssl/openssl/blob/36614faa98c5a947a635d3f44e78c7c36b722534/crypto/evp/evp_key.c#L78
pub fn derive_key_and_iv<D: Digest + FixedOutputReset>(
    password: &[u8],
    salt: &[u8],
    key_len: usize,
    iv_len: usize,
    iterations: u32,
) -> Result<DerivedKeyMaterial, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::ZeroIterations);
    }

    let target_len = key_len + iv_len;
    let block_len = <D as Digest>::output_size();
    let mut buffer = Vec::with_capacity(target_len.div_ceil(block_len) * block_len);
    let mut hasher = D::new();
    let mut block: Vec<u8> = Vec::new();

    while buffer.len() < target_len {
        if !block.is_empty() {
            Digest::update(&mut hasher, &block);
        }
        Digest::update(&mut hasher, password);
        Digest::update(&mut hasher, salt);
        block.zeroize();
        block = hasher.finalize_reset().to_vec();

        for _ in 1..iterations {
            Digest::update(&mut hasher, &block);
            block.zeroize();
            block = hasher.finalize_reset().to_vec();
        }

        buffer.extend_from_slice(&block);
    }

    let material = DerivedKeyMaterial {
        key: buffer[..key_len].to_vec(),
        iv: buffer[key_len..target_len].to_vec(),
    };

    block.zeroize();
    buffer.zeroize();

    Ok(material)
}

/// The parameters CryptoJS uses for passphrase encryption: MD5, one round, AES-256 key, 16 byte iv.
pub fn cryptojs_key_and_iv(password: &[u8], salt: &[u8]) -> Result<DerivedKeyMaterial, CryptoError> {
    derive_key_and_iv::<Md5>(password, salt, CRYPTOJS_KEY_LENGTH, CRYPTOJS_IV_LENGTH, 1)
}

#[cfg(test)]
mod tests {
    use md5::{Digest, Md5};

    use super::{cryptojs_key_and_iv, derive_key_and_iv};
    use crate::crypto::CryptoError;

    #[test]
    fn test_cryptojs_key_and_iv() {
        let salt = hex::decode("0102030405060708").unwrap();
        let material = cryptojs_key_and_iv(b"test", &salt).unwrap();

        assert_eq!(
            hex::encode(material.key()),
            "d5e2ad1215fca1925ca04478222a1851925adb7b9bc2dc7b1e887ee1d41afb38"
        );
        assert_eq!(hex::encode(material.iv()), "424171e215213187b1d979ae24e2ab83");
    }

    #[test]
    fn test_known_vector() {
        const PASSWORD: &[u8] = &[
            54, 105, 68, 117, 114, 77, 99, 50, 108, 82, 65, 121, 71, 85, 69, 72, 80, 73, 73, 116,
        ];
        const SALT: &[u8] = &[129, 183, 235, 45, 252, 39, 206, 174];
        const KEY: &[u8] = &[
            120, 45, 195, 34, 78, 14, 231, 234, 67, 192, 62, 118, 235, 45, 97, 233, 50, 86, 206, 75, 148, 31, 180, 1,
            72, 43, 144, 123, 82, 233, 193, 178,
        ];
        const IV: &[u8] = &[62, 204, 205, 162, 189, 145, 136, 18, 170, 229, 108, 237, 29, 86, 47, 51];

        let material = cryptojs_key_and_iv(PASSWORD, SALT).unwrap();
        assert_eq!(material.key(), KEY);
        assert_eq!(material.iv(), IV);
    }

    #[test]
    fn test_iterations_rehash_each_block() {
        let salt = b"saltsalt";
        let material = derive_key_and_iv::<Md5>(b"pw", salt, 16, 16, 3).unwrap();

        let first = Md5::digest(Md5::digest(Md5::digest([&b"pw"[..], &salt[..]].concat())));
        let second = Md5::digest(Md5::digest(Md5::digest([&first[..], &b"pw"[..], &salt[..]].concat())));

        assert_eq!(material.key(), &first[..]);
        assert_eq!(material.iv(), &second[..]);
    }

    #[test]
    fn test_lengths_not_multiple_of_digest() {
        let full = derive_key_and_iv::<Md5>(b"pw", b"12345678", 32, 16, 1).unwrap();
        let odd = derive_key_and_iv::<Md5>(b"pw", b"12345678", 20, 7, 1).unwrap();

        assert_eq!(odd.key().len(), 20);
        assert_eq!(odd.iv().len(), 7);
        assert_eq!(odd.key(), &full.key()[..20]);
        assert_eq!(odd.iv(), &full.key()[20..27]);
    }

    #[test]
    fn test_zero_iterations() {
        assert!(matches!(
            derive_key_and_iv::<Md5>(b"pw", b"12345678", 32, 16, 0),
            Err(CryptoError::ZeroIterations)
        ));
    }
}

use aes::Aes128;
use base64::{engine::general_purpose, Engine as _};
use block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use thiserror::Error;

type Aes128EcbDec = ecb::Decryptor<Aes128>;
type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
#[cfg(test)]
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid key length {0}, expected 16 bytes")]
    InvalidKeyLength(usize),
    #[error("Decryption error: bad padding or wrong key")]
    DecryptionError,
}

/// Decodes a base64 AES-128 key.
pub fn decode_key(key: &str) -> Result<Vec<u8>, DecryptError> {
    let key_bytes = general_purpose::STANDARD.decode(key)?;
    if key_bytes.len() != AES_BLOCK_SIZE {
        return Err(DecryptError::InvalidKeyLength(key_bytes.len()));
    }
    Ok(key_bytes)
}

/// AES-128-ECB with PKCS#7 padding removed.
pub fn decrypt_aes_ecb(key: &str, data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let key_bytes = decode_key(key)?;
    let cipher = Aes128EcbDec::new_from_slice(&key_bytes)
        .map_err(|_| DecryptError::InvalidKeyLength(key_bytes.len()))?;

    let mut buf = data.to_vec();
    let len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| DecryptError::DecryptionError)?
        .len();
    buf.truncate(len);
    Ok(buf)
}

/// AES-128-ECB with PKCS#7 padding; the inverse of [`decrypt_aes_ecb`].
pub fn encrypt_aes_ecb(key: &str, data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let key_bytes = decode_key(key)?;
    let cipher = Aes128EcbEnc::new_from_slice(&key_bytes)
        .map_err(|_| DecryptError::InvalidKeyLength(key_bytes.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
}

/// AES-128-CBC with PKCS#7 padding under a random IV. Output is `iv || ciphertext`.
pub fn encrypt_aes_cbc(key: &str, data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let key_bytes = decode_key(key)?;
    let iv: [u8; AES_BLOCK_SIZE] = rand::random();
    let cipher = Aes128CbcEnc::new_from_slices(&key_bytes, &iv)
        .map_err(|_| DecryptError::InvalidKeyLength(key_bytes.len()))?;

    let mut out = Vec::with_capacity(AES_BLOCK_SIZE + data.len() + AES_BLOCK_SIZE);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&cipher.encrypt_padded_vec_mut::<Pkcs7>(data));
    Ok(out)
}

/// Repeating-key XOR, applied once to the geo map section.
pub fn decrypt_xor(key: &str, data: &mut [u8]) -> Result<(), DecryptError> {
    let key_bytes = general_purpose::STANDARD.decode(key)?;
    if key_bytes.is_empty() {
        return Ok(());
    }

    for (byte, k) in data.iter_mut().zip(key_bytes.iter().cycle()) {
        *byte ^= k;
    }
    Ok(())
}

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid hex key: {0}")]
    InvalidKeyHex(String),
    #[error("Credential key must be 32 bytes (256 bits) long")]
    InvalidKeyLength,
    #[error("Invalid hex ciphertext: {0}")]
    InvalidCiphertextHex(String),
    #[error("Ciphertext is too short to contain a nonce")]
    CiphertextTooShort,
    #[error("Encryption failed")]
    EncryptFailed,
    #[error("Decryption failed")]
    DecryptFailed,
}

/// Seals DNS account credentials at rest. Output is `hex(nonce || ciphertext)`.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CipherError> {
        let key_bytes =
            hex::decode(key_hex.trim()).map_err(|e| CipherError::InvalidKeyHex(e.to_string()))?;
        if key_bytes.len() != 32 {
            return Err(CipherError::InvalidKeyLength);
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CipherError::InvalidKeyLength)?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plain: &[u8]) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain)
            .map_err(|_| CipherError::EncryptFailed)?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn open(&self, sealed_hex: &str) -> Result<Vec<u8>, CipherError> {
        let sealed = hex::decode(sealed_hex.trim())
            .map_err(|e| CipherError::InvalidCiphertextHex(e.to_string()))?;
        if sealed.len() < NONCE_SIZE {
            return Err(CipherError::CiphertextTooShort);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_seal_then_open() {
        let cipher = CredentialCipher::from_hex_key(KEY).unwrap();
        let sealed = cipher.seal(br#"{"api_token":"cf-token"}"#).unwrap();

        assert!(!sealed.contains("cf-token"));
        assert_eq!(cipher.open(&sealed).unwrap(), br#"{"api_token":"cf-token"}"#.to_vec());
    }

    #[test]
    fn test_each_seal_uses_a_fresh_nonce() {
        let cipher = CredentialCipher::from_hex_key(KEY).unwrap();
        assert_ne!(cipher.seal(b"same").unwrap(), cipher.seal(b"same").unwrap());
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = CredentialCipher::from_hex_key(KEY).unwrap().seal(b"secret").unwrap();
        let other = CredentialCipher::from_hex_key(
            "f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000",
        )
        .unwrap();
        assert_eq!(other.open(&sealed), Err(CipherError::DecryptFailed));
    }

    #[test]
    fn test_rejects_bad_keys_and_ciphertexts() {
        assert_eq!(
            CredentialCipher::from_hex_key("1234").err(),
            Some(CipherError::InvalidKeyLength)
        );
        assert!(matches!(
            CredentialCipher::from_hex_key("not-a-hex-string"),
            Err(CipherError::InvalidKeyHex(_))
        ));

        let cipher = CredentialCipher::from_hex_key(KEY).unwrap();
        assert!(matches!(cipher.open("zz"), Err(CipherError::InvalidCiphertextHex(_))));
        assert_eq!(cipher.open("0011"), Err(CipherError::CiphertextTooShort));
    }
}

//! # 자격증명 서비스
//!
//! 브로커 자격증명을 AES-256-GCM으로 암호화/복호화합니다.
//!
//! - 키: base64로 인코딩된 32바이트
//! - 암호문: `base64(nonce ‖ ciphertext)`, 암호화마다 새 12바이트 nonce
//! - 복호화된 시크릿은 `SecretString`으로만 다루며 로그에 남기지 않습니다

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 암호화 에러
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Ciphertext too short: {0} bytes")]
    TruncatedCiphertext(usize),

    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("Malformed credential payload: {0}")]
    MalformedPayload(String),
}

impl From<CryptoError> for crate::error::TraderError {
    fn from(err: CryptoError) -> Self {
        crate::error::TraderError::Credential(err.to_string())
    }
}

/// AES-256-GCM nonce 크기 (바이트)
pub const NONCE_SIZE: usize = 12;

/// AES-256 키 크기 (바이트)
pub const KEY_SIZE: usize = 32;

/// 시크릿 키로 평문을 암호화/복호화하는 자격증명 서비스.
pub trait CredentialService: Send + Sync {
    /// 평문을 암호화해 저장 가능한 문자열로 반환합니다.
    fn encrypt(&self, plaintext: &str, key: &SecretString) -> Result<String, CryptoError>;

    /// 암호문을 복호화합니다. 결과는 호출한 레인의 메모리에만 남습니다.
    fn decrypt(&self, ciphertext: &str, key: &SecretString) -> Result<SecretString, CryptoError>;
}

/// AES-256-GCM 구현.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCredentialService;

impl AesGcmCredentialService {
    fn cipher(key: &SecretString) -> Result<Aes256Gcm, CryptoError> {
        let key_bytes = base64::engine::general_purpose::STANDARD.decode(key.expose_secret())?;
        if key_bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(key_bytes.len()));
        }
        Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }
}

impl CredentialService for AesGcmCredentialService {
    fn encrypt(&self, plaintext: &str, key: &SecretString) -> Result<String, CryptoError> {
        let cipher = Self::cipher(key)?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    fn decrypt(&self, ciphertext: &str, key: &SecretString) -> Result<SecretString, CryptoError> {
        let cipher = Self::cipher(key)?;
        let blob = base64::engine::general_purpose::STANDARD.decode(ciphertext)?;
        if blob.len() <= NONCE_SIZE {
            return Err(CryptoError::TruncatedCiphertext(blob.len()));
        }
        let (nonce, body) = blob.split_at(NONCE_SIZE);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        let text = String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        Ok(SecretString::from(text))
    }
}

/// 새로운 마스터 키 생성 (초기 설정용)
pub fn generate_master_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// 브로커 API 자격증명.
///
/// `Debug`는 시크릿을 마스킹합니다.
#[derive(Clone)]
pub struct BrokerCredentials {
    /// API 키
    pub api_key: String,
    /// API 시크릿
    pub api_secret: SecretString,
}

/// 직렬화 전용 평문 표현 (암호화 직전/복호화 직후에만 존재).
#[derive(Serialize, Deserialize)]
struct CredentialPayload {
    api_key: String,
    api_secret: String,
}

impl BrokerCredentials {
    /// 새 자격증명 생성.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// 암호화해 `encrypted_credentials_ref`로 저장할 문자열을 만듭니다.
    pub fn seal(
        &self,
        service: &dyn CredentialService,
        key: &SecretString,
    ) -> Result<String, CryptoError> {
        let payload = CredentialPayload {
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.expose_secret().to_string(),
        };
        let json = serde_json::to_string(&payload)
            .map_err(|e| CryptoError::MalformedPayload(e.to_string()))?;
        service.encrypt(&json, key)
    }

    /// 저장된 암호문에서 자격증명을 복원합니다.
    pub fn unseal(
        sealed: &str,
        service: &dyn CredentialService,
        key: &SecretString,
    ) -> Result<Self, CryptoError> {
        let json = service.decrypt(sealed, key)?;
        let payload: CredentialPayload = serde_json::from_str(json.expose_secret())
            .map_err(|e| CryptoError::MalformedPayload(e.to_string()))?;
        Ok(Self::new(payload.api_key, payload.api_secret))
    }
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = if self.api_key.len() > 8 {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        } else {
            "***REDACTED***".to_string()
        };
        f.debug_struct("BrokerCredentials")
            .field("api_key", &masked_key)
            .field("api_secret", &"***REDACTED***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from(generate_master_key())
    }

    #[test]
    fn test_encrypt_decrypt() {
        let service = AesGcmCredentialService;
        let key = key();

        let sealed = service.encrypt("my-secret-api-key-12345", &key).unwrap();
        assert!(!sealed.contains("my-secret"));
        let opened = service.decrypt(&sealed, &key).unwrap();
        assert_eq!(opened.expose_secret(), "my-secret-api-key-12345");
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let service = AesGcmCredentialService;
        let key = key();
        let a = service.encrypt("same", &key).unwrap();
        let b = service.encrypt("same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let service = AesGcmCredentialService;
        let sealed = service.encrypt("secret", &key()).unwrap();
        let result = service.decrypt(&sealed, &key());
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        let short = SecretString::from(base64::engine::general_purpose::STANDARD.encode([0u8; 16]));
        let result = AesGcmCredentialService.encrypt("x", &short);
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength(16))));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 4]);
        let result = AesGcmCredentialService.decrypt(&short, &key());
        assert!(matches!(result, Err(CryptoError::TruncatedCiphertext(4))));
    }

    #[test]
    fn test_credentials_seal_roundtrip_and_masking() {
        let service = AesGcmCredentialService;
        let key = key();
        let creds = BrokerCredentials::new("api_key_123456789", "secret_456");

        let sealed = creds.seal(&service, &key).unwrap();
        let restored = BrokerCredentials::unseal(&sealed, &service, &key).unwrap();
        assert_eq!(restored.api_key, "api_key_123456789");
        assert_eq!(restored.api_secret.expose_secret(), "secret_456");

        let debug = format!("{:?}", restored);
        assert!(!debug.contains("secret_456"));
        assert!(debug.contains("api_...6789"));
    }
}

//! 마스터 키와 브로커 자격증명 명령어.
//!
//! # 사용 예시
//!
//! ```bash
//! # 새 마스터 키 (.env의 TRADER_MASTER_KEY로 저장)
//! trader keygen
//!
//! # 계좌에 저장할 암호문 생성
//! trader encrypt-credentials --api-key AKIA... --api-secret-env BINANCE_API_SECRET
//! ```

use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use trader_core::crypto::generate_master_key;
use trader_core::{AesGcmCredentialService, BrokerCredentials};

/// 마스터 키를 담는 환경 변수.
pub const MASTER_KEY_ENV: &str = "TRADER_MASTER_KEY";

/// 새 마스터 키 (base64, 32바이트).
pub fn keygen() -> String {
    generate_master_key()
}

/// 환경 변수에서 마스터 키를 읽습니다.
pub fn master_key_from_env() -> Result<SecretString> {
    std::env::var(MASTER_KEY_ENV)
        .map(SecretString::from)
        .map_err(|_| anyhow!("{} 환경 변수가 설정되지 않았습니다", MASTER_KEY_ENV))
}

/// 자격증명을 암호화하고, 같은 키로 복원되는지 확인한 뒤 암호문을 반환합니다.
pub fn encrypt_credentials(
    api_key: &str,
    api_secret: &str,
    master_key: &SecretString,
) -> Result<String> {
    let service = AesGcmCredentialService;
    let credentials = BrokerCredentials::new(api_key, api_secret);
    let sealed = credentials
        .seal(&service, master_key)
        .context("자격증명 암호화 실패")?;

    let restored =
        BrokerCredentials::unseal(&sealed, &service, master_key).context("암호문 검증 실패")?;
    if restored.api_key != api_key {
        return Err(anyhow!("암호문 검증 실패: API 키 불일치"));
    }
    Ok(sealed)
}

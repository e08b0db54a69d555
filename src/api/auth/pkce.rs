//! PKCE生成モジュール
//!
//! Authorization Code フローのコード交換を端末内の秘密値に紐付けます（RFC 7636）。
//!
//! ## フォーマット
//!
//! ```text
//! code_verifier  = 43〜128文字の unreserved 文字列
//! code_challenge = BASE64URL(SHA256(code_verifier))  // パディングなし
//! ```
//!
//! ## 使用例
//!
//! ```
//! use liftlens::api::auth::PkceChallenge;
//!
//! let pkce = PkceChallenge::generate();
//! assert_eq!(pkce.method(), "S256");
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// RFC 7636 の unreserved 文字
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// 生成するverifierの長さ
const VERIFIER_LENGTH: usize = 64;

/// verifierとchallengeのペア
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    verifier: String,
    challenge: String,
}

impl PkceChallenge {
    /// 新しいペアを生成
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}

/// code_verifierを生成する
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFIER_LENGTH)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}

/// S256方式のcode_challengeを生成する
///
/// # Arguments
///
/// * `verifier` - code_verifier
///
/// # Returns
///
/// SHA-256ハッシュのURL-safe Base64（パディングなし）
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// CSRF対策のstateを生成する
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

//! 認証モジュール
//!
//! バックエンドAPIの呼び出しに必要な認証機能を提供します。
//!
//! ## 機能
//!
//! - トークン保管（OSのセキュアストレージ / メモリ）
//! - PKCE verifier / challenge 生成
//! - Authorization Code + PKCE によるサインイン、サインアウト
//! - ターミナル用の認可プロンプト

mod pkce;
pub mod prompt;
pub mod session;
mod token_store;

pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state, PkceChallenge};
pub use prompt::ConsolePrompt;
pub use session::{AuthSession, AuthorizationPrompt, PromptOutcome};
pub use token_store::{
    KeyringTokenStore, MemoryTokenStore, TokenKind, TokenSet, TokenStore, TokenStoreError,
};

/// 認証関連のエラー型
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// IDトークンが保存されていない
    #[error("Not signed in")]
    NotSignedIn,

    /// 認可画面が結果なしで閉じられた（タイムアウト含む）
    #[error("Sign-in was cancelled")]
    Cancelled,

    /// プロバイダーが認可を拒否した、またはstateが一致しない
    #[error("Sign-in was denied: {0}")]
    Denied(String),

    /// 認可コードとトークンの交換に失敗
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// サインインが既に進行中
    #[error("Sign-in already in progress")]
    AlreadyInProgress,

    /// セキュアストレージのエラー
    #[error("Token store error: {0}")]
    Store(#[from] TokenStoreError),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotSignedIn => "not_signed_in",
            Self::Cancelled => "cancelled",
            Self::Denied(_) => "denied",
            Self::ExchangeFailed(_) => "exchange_failed",
            Self::AlreadyInProgress => "already_in_progress",
            Self::Store(_) => "token_store",
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

//! クレート全体のエラー型
//!
//! 各レイヤーは自分のエラー型（`AuthError`、`ApiError`、`UploadError`、
//! `ValidationError`）を返し、ここで一つの `LiftError` にまとめます。
//! 種別の変換は行わず、包むだけです。

use crate::api::auth::{AuthError, TokenStoreError};
use crate::api::transport::ApiError;
use crate::flow::ValidationError;
use crate::upload::UploadError;

/// アップロード・ジョブ処理で発生しうる全エラー
#[derive(Debug, thiserror::Error)]
pub enum LiftError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<TokenStoreError> for LiftError {
    fn from(err: TokenStoreError) -> Self {
        Self::Auth(AuthError::Store(err))
    }
}

impl LiftError {
    /// 安定したsnake_caseの種別タグ（ログ・テスト用）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.kind(),
            Self::Api(e) => e.kind(),
            Self::Upload(e) => e.kind(),
            Self::Validation(e) => e.kind(),
        }
    }

    /// サインイン画面へ戻すべきエラーか
    pub fn requires_sign_in(&self) -> bool {
        match self {
            Self::Auth(AuthError::NotSignedIn) => true,
            Self::Api(ApiError::Status { status, .. }) => *status == 401,
            _ => false,
        }
    }
}

pub type LiftResult<T> = Result<T, LiftError>;

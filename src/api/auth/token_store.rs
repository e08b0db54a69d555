//! トークン保管モジュール
//!
//! access / id / refresh の3つのBearerトークンを保存・読み込み・削除します。
//! 本番ではOSのクレデンシャルストア（`keyring`）、テストではメモリを使います。

use parking_lot::RwLock;
use std::collections::HashMap;

/// 保存するトークンの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum TokenKind {
    #[display("access_token")]
    Access,
    #[display("id_token")]
    Id,
    #[display("refresh_token")]
    Refresh,
}

impl TokenKind {
    pub const ALL: [TokenKind; 3] = [TokenKind::Access, TokenKind::Id, TokenKind::Refresh];

    /// セキュアストレージ上のキー名
    pub fn key(&self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Id => "id_token",
            TokenKind::Refresh => "refresh_token",
        }
    }
}

/// トークン一式（各トークンは独立して存在しうる）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl TokenSet {
    pub fn get(&self, kind: TokenKind) -> Option<&str> {
        match kind {
            TokenKind::Access => self.access_token.as_deref(),
            TokenKind::Id => self.id_token.as_deref(),
            TokenKind::Refresh => self.refresh_token.as_deref(),
        }
    }

    /// 認証済みAPI呼び出しにはIDトークンが必須
    pub fn is_authenticated(&self) -> bool {
        self.id_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        TokenKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

/// セキュアストレージのエラー
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    /// ストレージが利用できない（ロック中、サービス未起動など）
    #[error("Secure storage unavailable: {0}")]
    Unavailable(String),

    /// 保存されている値が壊れている
    #[error("Stored credential for {key} is unreadable: {reason}")]
    Corrupt { key: &'static str, reason: String },
}

/// トークン保管の抽象
///
/// 未設定のキーを読んだ場合は `Ok(None)`。ストレージ自体の失敗は必ず `Err`。
pub trait TokenStore: Send + Sync {
    fn set(&self, kind: TokenKind, value: &str) -> Result<(), TokenStoreError>;

    fn get(&self, kind: TokenKind) -> Result<Option<String>, TokenStoreError>;

    fn remove(&self, kind: TokenKind) -> Result<(), TokenStoreError>;

    /// 全キーを削除。1つ失敗しても残りの削除は続け、最初のエラーを返す
    fn clear(&self) -> Result<(), TokenStoreError> {
        let mut first_error = None;
        for kind in TokenKind::ALL {
            if let Err(e) = self.remove(kind) {
                tracing::warn!(key = kind.key(), error = %e, "⚠️ Failed to remove token");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 3つのトークンをまとめて読み込み
    fn load(&self) -> Result<TokenSet, TokenStoreError> {
        Ok(TokenSet {
            access_token: self.get(TokenKind::Access)?,
            id_token: self.get(TokenKind::Id)?,
            refresh_token: self.get(TokenKind::Refresh)?,
        })
    }

    /// 存在するトークンだけを書き込み
    fn store(&self, tokens: &TokenSet) -> Result<(), TokenStoreError> {
        for kind in TokenKind::ALL {
            if let Some(value) = tokens.get(kind) {
                self.set(kind, value)?;
            }
        }
        Ok(())
    }
}

/// OSクレデンシャルストアを使うトークン保管
///
/// 操作ごとに `keyring::Entry` を開き、スコープを抜けると解放されます。
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, kind: TokenKind) -> Result<keyring::Entry, TokenStoreError> {
        keyring::Entry::new(&self.service, kind.key()).map_err(|e| map_keyring_error(kind, e))
    }
}

fn map_keyring_error(kind: TokenKind, err: keyring::Error) -> TokenStoreError {
    match err {
        keyring::Error::BadEncoding(_) => TokenStoreError::Corrupt {
            key: kind.key(),
            reason: "not valid UTF-8".to_string(),
        },
        other => TokenStoreError::Unavailable(other.to_string()),
    }
}

impl TokenStore for KeyringTokenStore {
    fn set(&self, kind: TokenKind, value: &str) -> Result<(), TokenStoreError> {
        self.entry(kind)?
            .set_password(value)
            .map_err(|e| map_keyring_error(kind, e))
    }

    fn get(&self, kind: TokenKind) -> Result<Option<String>, TokenStoreError> {
        match self.entry(kind)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(kind, e)),
        }
    }

    fn remove(&self, kind: TokenKind) -> Result<(), TokenStoreError> {
        match self.entry(kind)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(kind, e)),
        }
    }
}

/// メモリ上のトークン保管（テスト・一時利用）
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<TokenKind, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: &TokenSet) -> Self {
        let store = Self::new();
        {
            let mut map = store.tokens.write();
            for kind in TokenKind::ALL {
                if let Some(value) = tokens.get(kind) {
                    map.insert(kind, value.to_string());
                }
            }
        }
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn set(&self, kind: TokenKind, value: &str) -> Result<(), TokenStoreError> {
        self.tokens.write().insert(kind, value.to_string());
        Ok(())
    }

    fn get(&self, kind: TokenKind) -> Result<Option<String>, TokenStoreError> {
        Ok(self.tokens.read().get(&kind).cloned())
    }

    fn remove(&self, kind: TokenKind) -> Result<(), TokenStoreError> {
        self.tokens.write().remove(&kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tokens() -> TokenSet {
        TokenSet {
            access_token: Some("test_access".into()),
            id_token: Some("test_id".into()),
            refresh_token: Some("test_refresh".into()),
        }
    }

    #[test]
    fn test_token_kind_keys() {
        assert_eq!(TokenKind::Access.key(), "access_token");
        assert_eq!(TokenKind::Id.key(), "id_token");
        assert_eq!(TokenKind::Refresh.key(), "refresh_token");
        assert_eq!(TokenKind::Id.to_string(), "id_token");
    }

    #[test]
    fn test_memory_store_get_unset_is_absent() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get(TokenKind::Id).unwrap(), None);
    }

    #[test]
    fn test_memory_store_store_and_load() {
        let store = MemoryTokenStore::new();
        store.store(&create_test_tokens()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, create_test_tokens());
        assert!(loaded.is_authenticated());
    }

    #[test]
    fn test_partial_set_only_writes_present_tokens() {
        let store = MemoryTokenStore::new();
        let partial = TokenSet {
            access_token: Some("a".into()),
            id_token: None,
            refresh_token: Some("r".into()),
        };
        store.store(&partial).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("a"));
        assert!(loaded.id_token.is_none());
        assert!(!loaded.is_authenticated());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MemoryTokenStore::with_tokens(&create_test_tokens());
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());

        // 既に空でも成功する
        store.clear().unwrap();
        for kind in TokenKind::ALL {
            assert_eq!(store.get(kind).unwrap(), None);
        }
    }

    struct FailingRemoveStore {
        inner: MemoryTokenStore,
    }

    impl TokenStore for FailingRemoveStore {
        fn set(&self, kind: TokenKind, value: &str) -> Result<(), TokenStoreError> {
            self.inner.set(kind, value)
        }
        fn get(&self, kind: TokenKind) -> Result<Option<String>, TokenStoreError> {
            self.inner.get(kind)
        }
        fn remove(&self, kind: TokenKind) -> Result<(), TokenStoreError> {
            if kind == TokenKind::Access {
                return Err(TokenStoreError::Unavailable("locked".into()));
            }
            self.inner.remove(kind)
        }
    }

    #[test]
    fn test_clear_continues_after_failure() {
        let store = FailingRemoveStore {
            inner: MemoryTokenStore::with_tokens(&create_test_tokens()),
        };

        assert!(store.clear().is_err());
        // 失敗したキー以外は削除されている
        assert_eq!(store.get(TokenKind::Id).unwrap(), None);
        assert_eq!(store.get(TokenKind::Refresh).unwrap(), None);
        assert!(store.get(TokenKind::Access).unwrap().is_some());
    }
}

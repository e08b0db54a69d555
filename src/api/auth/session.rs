//! サインインセッション
//!
//! Authorization Code + PKCE でIDプロバイダーからトークンを取得し、
//! `TokenStore` に保存します。サインアウト（ローカル / プロバイダー側）も扱います。
//!
//! ## 認証フロー
//!
//! 1. PKCE verifier / challenge と state を生成
//! 2. 外部の認可画面（ブラウザ等）を開き、リダイレクトを待つ
//! 3. リダイレクトURLから認可コードを取り出す
//! 4. コード + verifier をトークンエンドポイントで交換
//! 5. 受け取ったトークンを保存

use super::{AuthError, AuthResult, PkceChallenge, TokenSet, TokenStore};
use crate::config::IdentityConfig;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 外部認可画面の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// リダイレクトURIに戻ってきた（クエリ付きURL全体）
    Redirected(String),
    /// 結果なしで閉じられた
    Dismissed,
}

/// 外部の認可画面を開くインターフェース
///
/// ブラウザのリダイレクト完了はアプリの制御外で非同期に起こるため、
/// 一度だけ完了する `Future` として扱います。
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// 認可URLを開き、リダイレクトURIに戻るまで待つ
    async fn authorize(&self, authorization_url: &str, redirect_uri: &str)
        -> AuthResult<PromptOutcome>;

    /// ログアウトURLを開く
    async fn open_logout(&self, logout_url: &str, redirect_uri: &str) -> AuthResult<()>;
}

/// トークンエンドポイントのレスポンス
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuthエラーレスポンス
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// サインインセッション
pub struct AuthSession {
    identity: IdentityConfig,
    tokens: Arc<dyn TokenStore>,
    prompt: Arc<dyn AuthorizationPrompt>,
    http_client: reqwest::Client,
    /// サインインとサインアウトのトークン書き込みを直列化する
    sign_in_lock: tokio::sync::Mutex<()>,
}

impl AuthSession {
    pub fn new(
        identity: IdentityConfig,
        tokens: Arc<dyn TokenStore>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        Self::with_client(identity, tokens, prompt, reqwest::Client::new())
    }

    pub fn with_client(
        identity: IdentityConfig,
        tokens: Arc<dyn TokenStore>,
        prompt: Arc<dyn AuthorizationPrompt>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            identity,
            tokens,
            prompt,
            http_client,
            sign_in_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.tokens)
    }

    /// IDトークンが保存されているか
    pub fn is_signed_in(&self) -> AuthResult<bool> {
        Ok(self.tokens.get(super::TokenKind::Id)?.is_some())
    }

    /// 保存済みトークンをすべて削除
    ///
    /// サインアウトと違い、ストレージのエラーはそのまま返します。
    pub fn clear_tokens(&self) -> AuthResult<()> {
        self.tokens.clear()?;
        debug!("🧹 Tokens cleared");
        Ok(())
    }

    /// サインイン
    ///
    /// 失敗時はローカルのトークンを消し、未認証状態に戻します。
    /// 進行中のサインインがある場合は `AlreadyInProgress` で即座に失敗します。
    pub async fn sign_in(&self) -> AuthResult<TokenSet> {
        let _guard = self
            .sign_in_lock
            .try_lock()
            .map_err(|_| AuthError::AlreadyInProgress)?;

        info!("🔐 Starting sign-in");
        match self.run_sign_in().await {
            Ok(tokens) => {
                info!(
                    has_access = tokens.access_token.is_some(),
                    has_id = tokens.id_token.is_some(),
                    has_refresh = tokens.refresh_token.is_some(),
                    "✅ Sign-in completed"
                );
                Ok(tokens)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "❌ Sign-in failed");
                self.clear_local();
                Err(e)
            }
        }
    }

    async fn run_sign_in(&self) -> AuthResult<TokenSet> {
        let pkce = PkceChallenge::generate();
        let state = super::generate_state();
        let authorization_url = self.authorization_url(&pkce, &state)?;

        let outcome = tokio::time::timeout(
            self.identity.prompt_timeout(),
            self.prompt
                .authorize(authorization_url.as_str(), &self.identity.redirect_uri),
        )
        .await
        .map_err(|_| {
            warn!(
                timeout_secs = self.identity.prompt_timeout_secs,
                "⏱️ Authorization prompt timed out"
            );
            AuthError::Cancelled
        })??;

        let redirect = match outcome {
            PromptOutcome::Redirected(url) => url,
            PromptOutcome::Dismissed => return Err(AuthError::Cancelled),
        };

        let code = parse_redirect(&redirect, &state)?;
        debug!("🔑 Authorization code received");

        let tokens = self.exchange_code(&code, pkce.verifier()).await?;
        if tokens.id_token.is_none() {
            warn!("⚠️ Token response did not include an id_token");
        }
        // 前回セッションのトークンを残さない
        self.tokens.clear()?;
        self.tokens.store(&tokens)?;

        Ok(tokens)
    }

    /// 認可URLを組み立てる
    fn authorization_url(&self, pkce: &PkceChallenge, state: &str) -> AuthResult<Url> {
        let scope = self.identity.scopes.join(" ");
        Url::parse_with_params(
            &self.identity.authorization_endpoint(),
            &[
                ("response_type", "code"),
                ("client_id", self.identity.client_id.as_str()),
                ("redirect_uri", self.identity.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("code_challenge", pkce.challenge()),
                ("code_challenge_method", pkce.method()),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::ExchangeFailed(format!("invalid authorization endpoint: {}", e)))
    }

    /// 認可コードをトークンに交換する
    async fn exchange_code(&self, code: &str, verifier: &str) -> AuthResult<TokenSet> {
        let token_endpoint = self.identity.token_endpoint();
        debug!(endpoint = %token_endpoint, "📡 Exchanging authorization code");

        let response = self
            .http_client
            .post(&token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.identity.client_id.as_str()),
                ("code", code),
                ("redirect_uri", self.identity.redirect_uri.as_str()),
                ("code_verifier", verifier),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("❌ Token request failed: {}", e);
                AuthError::ExchangeFailed(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{} ({})", err.error, description),
                    None => err.error,
                },
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(AuthError::ExchangeFailed(reason));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::ExchangeFailed(format!("invalid token response: {}", e)))?;
        debug!(
            token_type = ?parsed.token_type,
            expires_in = ?parsed.expires_in,
            "📄 Token response received"
        );

        Ok(TokenSet {
            access_token: parsed.access_token,
            id_token: parsed.id_token,
            refresh_token: parsed.refresh_token,
        })
    }

    /// ローカルのトークンを削除（失敗しない）
    pub async fn sign_out_local(&self) {
        let _guard = self.sign_in_lock.lock().await;
        self.clear_local();
        info!("👋 Signed out locally");
    }

    /// プロバイダー側のセッションも終了してからローカルを削除
    ///
    /// ログアウト画面を開けなくてもローカルの削除は必ず行います。
    pub async fn sign_out_remote(&self) {
        let _guard = self.sign_in_lock.lock().await;

        match self.logout_url() {
            Ok(url) => {
                let result = tokio::time::timeout(
                    self.identity.prompt_timeout(),
                    self.prompt
                        .open_logout(url.as_str(), &self.identity.redirect_uri),
                )
                .await;
                match result {
                    Ok(Ok(())) => info!("🌐 Provider session ended"),
                    Ok(Err(e)) => warn!(error = %e, "⚠️ Failed to open logout page"),
                    Err(_) => warn!("⏱️ Logout page timed out"),
                }
            }
            Err(e) => warn!(error = %e, "⚠️ Invalid logout endpoint"),
        }

        self.clear_local();
        info!("👋 Signed out");
    }

    fn logout_url(&self) -> AuthResult<Url> {
        Url::parse_with_params(
            &self.identity.logout_endpoint(),
            &[
                ("client_id", self.identity.client_id.as_str()),
                ("logout_uri", self.identity.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| AuthError::ExchangeFailed(format!("invalid logout endpoint: {}", e)))
    }

    fn clear_local(&self) {
        if let Err(e) = self.tokens.clear() {
            error!(error = %e, "❌ Failed to clear some tokens");
        }
    }
}

/// リダイレクトURLから認可コードを取り出す
fn parse_redirect(redirect: &str, expected_state: &str) -> AuthResult<String> {
    let url = Url::parse(redirect)
        .map_err(|e| AuthError::ExchangeFailed(format!("invalid redirect URL: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AuthError::Denied(match error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        }));
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::Denied("state mismatch".to_string()));
    }

    code.filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::ExchangeFailed("redirect did not contain a code".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{MemoryTokenStore, TokenKind};
    use parking_lot::Mutex;

    /// 決まった結果を返す認可画面
    struct ScriptedPrompt {
        outcome: PromptOutcome,
        seen_url: Mutex<Option<String>>,
        logout_fails: bool,
    }

    impl ScriptedPrompt {
        fn new(outcome: PromptOutcome) -> Self {
            Self {
                outcome,
                seen_url: Mutex::new(None),
                logout_fails: false,
            }
        }
    }

    #[async_trait]
    impl AuthorizationPrompt for ScriptedPrompt {
        async fn authorize(
            &self,
            authorization_url: &str,
            _redirect_uri: &str,
        ) -> AuthResult<PromptOutcome> {
            *self.seen_url.lock() = Some(authorization_url.to_string());
            Ok(self.outcome.clone())
        }

        async fn open_logout(&self, _logout_url: &str, _redirect_uri: &str) -> AuthResult<()> {
            if self.logout_fails {
                Err(AuthError::Cancelled)
            } else {
                Ok(())
            }
        }
    }

    /// 解放されるまで戻らない認可画面
    struct BlockingPrompt {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl AuthorizationPrompt for BlockingPrompt {
        async fn authorize(&self, _: &str, _: &str) -> AuthResult<PromptOutcome> {
            self.release.notified().await;
            Ok(PromptOutcome::Dismissed)
        }

        async fn open_logout(&self, _: &str, _: &str) -> AuthResult<()> {
            Ok(())
        }
    }

    fn identity() -> IdentityConfig {
        IdentityConfig {
            domain_url: "https://auth.example.com".into(),
            client_id: "client-abc".into(),
            ..Default::default()
        }
    }

    fn signed_in_store() -> Arc<MemoryTokenStore> {
        Arc::new(MemoryTokenStore::with_tokens(&TokenSet {
            access_token: Some("a".into()),
            id_token: Some("i".into()),
            refresh_token: Some("r".into()),
        }))
    }

    #[test]
    fn test_authorization_url_params() {
        let session = AuthSession::new(
            identity(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(ScriptedPrompt::new(PromptOutcome::Dismissed)),
        );
        let pkce = PkceChallenge::generate();
        let url = session.authorization_url(&pkce, "state-1").unwrap();

        assert!(url
            .as_str()
            .starts_with("https://auth.example.com/oauth2/authorize?"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("response_type").as_deref(), Some("code"));
        assert_eq!(get("client_id").as_deref(), Some("client-abc"));
        assert_eq!(get("redirect_uri").as_deref(), Some("liftlens://auth"));
        assert_eq!(get("scope").as_deref(), Some("openid email profile"));
        assert_eq!(get("code_challenge").as_deref(), Some(pkce.challenge()));
        assert_eq!(get("code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(get("state").as_deref(), Some("state-1"));
    }

    #[test]
    fn test_parse_redirect_success() {
        let code = parse_redirect("liftlens://auth?code=abc123&state=s1", "s1").unwrap();
        assert_eq!(code, "abc123");
    }

    #[test]
    fn test_parse_redirect_denied() {
        let result = parse_redirect(
            "liftlens://auth?error=access_denied&error_description=nope&state=s1",
            "s1",
        );
        match result {
            Err(AuthError::Denied(reason)) => assert!(reason.contains("access_denied")),
            other => panic!("Expected Denied, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_redirect_state_mismatch() {
        let result = parse_redirect("liftlens://auth?code=abc&state=other", "s1");
        assert!(matches!(result, Err(AuthError::Denied(_))));
    }

    #[test]
    fn test_parse_redirect_missing_code() {
        let result = parse_redirect("liftlens://auth?state=s1", "s1");
        assert!(matches!(result, Err(AuthError::ExchangeFailed(_))));
    }

    #[tokio::test]
    async fn test_dismissed_prompt_is_cancelled_and_clears_tokens() {
        let store = signed_in_store();
        let prompt = Arc::new(ScriptedPrompt::new(PromptOutcome::Dismissed));
        let session = AuthSession::new(identity(), store.clone(), prompt.clone());

        let result = session.sign_in().await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
        assert!(prompt.seen_url.lock().is_some());
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_timeout_is_cancelled() {
        let mut config = identity();
        config.prompt_timeout_secs = 0;
        let prompt = Arc::new(BlockingPrompt {
            release: tokio::sync::Notify::new(),
        });
        let session = AuthSession::new(config, Arc::new(MemoryTokenStore::new()), prompt);

        let result = session.sign_in().await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_concurrent_sign_in_fails_fast() {
        let store = signed_in_store();
        let prompt = Arc::new(BlockingPrompt {
            release: tokio::sync::Notify::new(),
        });
        let session = Arc::new(AuthSession::new(identity(), store.clone(), prompt.clone()));

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.sign_in().await }
        });
        tokio::task::yield_now().await;
        while session.sign_in_lock.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        let second = session.sign_in().await;
        assert!(matches!(second, Err(AuthError::AlreadyInProgress)));
        // 2回目の失敗では既存トークンを消さない
        assert!(store.get(TokenKind::Id).unwrap().is_some());

        prompt.release.notify_one();
        let first = first.await.unwrap();
        assert!(matches!(first, Err(AuthError::Cancelled)));
    }

    #[test]
    fn test_clear_tokens() {
        let store = signed_in_store();
        let session = AuthSession::new(
            identity(),
            store.clone(),
            Arc::new(ScriptedPrompt::new(PromptOutcome::Dismissed)),
        );
        assert!(session.is_signed_in().unwrap());
        session.clear_tokens().unwrap();
        assert!(!session.is_signed_in().unwrap());
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_local_clears_all_keys() {
        let store = signed_in_store();
        let session = AuthSession::new(
            identity(),
            store.clone(),
            Arc::new(ScriptedPrompt::new(PromptOutcome::Dismissed)),
        );

        session.sign_out_local().await;
        session.sign_out_local().await;

        for kind in TokenKind::ALL {
            assert_eq!(store.get(kind).unwrap(), None);
        }
        assert!(!session.is_signed_in().unwrap());
    }

    #[tokio::test]
    async fn test_sign_out_remote_clears_even_if_logout_fails() {
        let store = signed_in_store();
        let mut prompt = ScriptedPrompt::new(PromptOutcome::Dismissed);
        prompt.logout_fails = true;
        let session = AuthSession::new(identity(), store.clone(), Arc::new(prompt));

        session.sign_out_remote().await;
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_logout_url() {
        let session = AuthSession::new(
            identity(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(ScriptedPrompt::new(PromptOutcome::Dismissed)),
        );
        let url = session.logout_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/logout?client_id=client-abc&logout_uri=liftlens%3A%2F%2Fauth"
        );
    }
}

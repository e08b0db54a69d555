//! スタブのトークンエンドポイントを使ったサインインの統合テスト

use async_trait::async_trait;
use liftlens::api::auth::{
    generate_code_challenge, AuthResult, AuthorizationPrompt, PromptOutcome,
};
use liftlens::config::IdentityConfig;
use liftlens::{AuthError, AuthSession, MemoryTokenStore, TokenKind, TokenSet, TokenStore};
use mock_server::{StubConfig, StubServer};
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;

/// 認可URLのstateをそのまま返す「ブラウザ」
struct StubBrowser {
    code: String,
    seen_urls: Mutex<Vec<String>>,
    logout_urls: Mutex<Vec<String>>,
}

impl StubBrowser {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            seen_urls: Mutex::new(Vec::new()),
            logout_urls: Mutex::new(Vec::new()),
        }
    }

    fn last_params(&self) -> HashMap<String, String> {
        let urls = self.seen_urls.lock();
        let url = Url::parse(urls.last().expect("authorize was called")).expect("valid url");
        url.query_pairs().into_owned().collect()
    }
}

#[async_trait]
impl AuthorizationPrompt for StubBrowser {
    async fn authorize(&self, url: &str, redirect_uri: &str) -> AuthResult<PromptOutcome> {
        self.seen_urls.lock().push(url.to_string());
        let state = Url::parse(url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "state")
                    .map(|(_, v)| v.into_owned())
            })
            .unwrap_or_default();
        Ok(PromptOutcome::Redirected(format!(
            "{}?code={}&state={}",
            redirect_uri, self.code, state
        )))
    }

    async fn open_logout(&self, url: &str, _redirect_uri: &str) -> AuthResult<()> {
        self.logout_urls.lock().push(url.to_string());
        Ok(())
    }
}

fn identity(server: &StubServer) -> IdentityConfig {
    IdentityConfig {
        domain_url: server.base_url(),
        client_id: "client-abc".to_string(),
        ..IdentityConfig::default()
    }
}

#[tokio::test]
async fn test_sign_in_exchanges_code_with_pkce() {
    let server = StubServer::start(StubConfig::default()).await;
    let store = Arc::new(MemoryTokenStore::new());
    let browser = Arc::new(StubBrowser::new("good-code"));
    let session = AuthSession::new(identity(&server), store.clone(), browser.clone());

    let tokens = session.sign_in().await.expect("sign-in should succeed");
    assert_eq!(tokens.id_token.as_deref(), Some("stub-id"));
    assert!(session.is_signed_in().expect("store readable"));
    assert_eq!(
        store.get(TokenKind::Access).expect("get").as_deref(),
        Some("stub-access")
    );
    assert_eq!(
        store.get(TokenKind::Refresh).expect("get").as_deref(),
        Some("stub-refresh")
    );

    let params = browser.last_params();
    assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));
    assert_eq!(params.get("client_id").map(String::as_str), Some("client-abc"));

    // 交換時のverifierが認可URLのchallengeと一致する
    let token_calls = server.calls_to("POST", "/oauth2/token");
    assert_eq!(token_calls.len(), 1);
    let form = token_calls[0].form();
    let verifier = form.get("code_verifier").expect("verifier sent");
    assert_eq!(
        params.get("code_challenge").map(String::as_str),
        Some(generate_code_challenge(verifier).as_str())
    );
    assert_eq!(form.get("grant_type").map(String::as_str), Some("authorization_code"));
}

#[tokio::test]
async fn test_rejected_code_is_exchange_failure() {
    let server = StubServer::start(StubConfig::default()).await;
    let store = Arc::new(MemoryTokenStore::new());
    let browser = Arc::new(StubBrowser::new("bad-code"));
    let session = AuthSession::new(identity(&server), store.clone(), browser);

    let err = session.sign_in().await.expect_err("bad code");
    assert!(matches!(err, AuthError::ExchangeFailed(_)));
    assert_eq!(err.kind(), "exchange_failed");
    assert!(err.to_string().contains("invalid_grant"));
    assert!(!session.is_signed_in().expect("store readable"));
}

#[tokio::test]
async fn test_sign_out_remote_uses_logout_endpoint() {
    let server = StubServer::start(StubConfig::default()).await;
    let store = Arc::new(MemoryTokenStore::new());
    let browser = Arc::new(StubBrowser::new("good-code"));
    let session = AuthSession::new(identity(&server), store.clone(), browser.clone());

    session.sign_in().await.expect("sign-in should succeed");
    session.sign_out_remote().await;

    for kind in TokenKind::ALL {
        assert_eq!(store.get(kind).expect("get"), None);
    }
    let logout = browser.logout_urls.lock().clone();
    assert_eq!(logout.len(), 1);
    assert!(logout[0].starts_with(&format!("{}/logout?client_id=client-abc", server.base_url())));
}

#[tokio::test]
async fn test_sign_out_local_twice_is_harmless() {
    let server = StubServer::start(StubConfig::default()).await;
    let store = Arc::new(MemoryTokenStore::new());
    let session = AuthSession::new(
        identity(&server),
        store.clone(),
        Arc::new(StubBrowser::new("good-code")),
    );

    session.sign_in().await.expect("sign-in should succeed");
    session.sign_out_local().await;
    session.sign_out_local().await;

    for kind in TokenKind::ALL {
        assert_eq!(store.get(kind).expect("get"), None);
    }
}

#[tokio::test]
async fn test_re_sign_in_does_not_keep_previous_tokens() {
    let server = StubServer::start(StubConfig {
        omit_id_token: true,
        ..StubConfig::default()
    })
    .await;
    let store = Arc::new(MemoryTokenStore::with_tokens(&TokenSet {
        access_token: Some("old-access".to_string()),
        id_token: Some("old-id".to_string()),
        refresh_token: Some("old-refresh".to_string()),
    }));
    let session = AuthSession::new(
        identity(&server),
        store.clone(),
        Arc::new(StubBrowser::new("good-code")),
    );

    let tokens = session.sign_in().await.expect("sign-in should succeed");
    assert_eq!(tokens.id_token, None);

    // id_token のない応答では未サインインのまま
    assert_eq!(store.get(TokenKind::Id).expect("get"), None);
    assert!(!session.is_signed_in().expect("store readable"));
    assert_eq!(
        store.get(TokenKind::Access).expect("get").as_deref(),
        Some("stub-access")
    );
    assert_eq!(
        store.get(TokenKind::Refresh).expect("get").as_deref(),
        Some("stub-refresh")
    );
}

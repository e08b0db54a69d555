//! 認証付きHTTPトランスポート
//!
//! すべてのバックエンド呼び出しにIDトークンをBearerとして付与し、
//! 失敗を `ApiError` に統一します。リトライは一切行いません
//! （古いトークンでの401ループを避けるため、判断は呼び出し側に任せる）。

use crate::api::auth::{AuthError, TokenKind, TokenStore};
use crate::LiftResult;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// HTTPメソッド
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::PUT => reqwest::Method::PUT,
            HttpMethod::DELETE => reqwest::Method::DELETE,
        }
    }
}

/// REST呼び出しのエラー
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 2xx以外のレスポンス
    #[error("API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// レスポンスが得られなかった
    #[error("API request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// 2xxだがボディを解釈できない
    #[error("Failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "api_status",
            Self::Network(_) => "api_network",
            Self::Decode { .. } => "api_decode",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 認証付きトランスポート
#[derive(Clone)]
pub struct AuthenticatedTransport {
    base_url: String,
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
}

impl AuthenticatedTransport {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_client(base_url, tokens, reqwest::Client::new())
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self::with_client(base_url, tokens, http_client))
    }

    pub fn with_client(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// リクエストを送信してJSONレスポンスを返す
    ///
    /// IDトークンがなければネットワークに触れる前に `NotSignedIn` で失敗します。
    pub async fn request<B, R>(
        &self,
        path: &str,
        method: HttpMethod,
        body: Option<&B>,
    ) -> LiftResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id_token = self
            .tokens
            .get(TokenKind::Id)?
            .ok_or(AuthError::NotSignedIn)?;

        let url = format!("{}{}", self.base_url, path);
        let request_id = uuid::Uuid::new_v4();
        debug!(%request_id, %method, path, "📡 API request");

        let mut builder = self
            .http_client
            .request(method.into(), &url)
            .bearer_auth(&id_token);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!(%request_id, path, "❌ HTTP request failed: {}", e);
            ApiError::Network(e)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(ApiError::Network)?;
        debug!(
            %request_id,
            status = status.as_u16(),
            response_size_bytes = text.len(),
            "📨 API response"
        );

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        serde_json::from_str(&text).map_err(|e| {
            error!(%request_id, path, "❌ Failed to parse JSON response: {}", e);
            ApiError::Decode {
                path: path.to_string(),
                source: e,
            }
            .into()
        })
    }

    /// GET リクエストの便利メソッド
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> LiftResult<R> {
        self.request::<(), R>(path, HttpMethod::GET, None).await
    }

    /// POST リクエストの便利メソッド
    pub async fn post<B, R>(&self, path: &str, body: &B) -> LiftResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(path, HttpMethod::POST, Some(body)).await
    }
}

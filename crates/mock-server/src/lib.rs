//! liftlens 用のスタブバックエンド
//!
//! REST API（`/upload-url`, `/jobs`）、署名付きストレージへのPUT、
//! IDプロバイダーのトークンエンドポイントを1つの一時ポートで提供します。
//! 受けたリクエストはすべて記録され、テストから呼び出しの有無を検証できます。

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use warp::Filter;
use warp::http::{HeaderMap, Method, Response, StatusCode};

/// トークンエンドポイントが既定で受け付ける認可コード
pub const VALID_CODE: &str = "good-code";

#[derive(Debug, Clone)]
pub struct StubConfig {
    /// `/upload-url` が払い出すジョブID（`None` ならランダム）
    pub job_id: Option<String>,
    /// `/upload-url` が返すアップロードURLを上書き
    pub upload_url: Option<String>,
    /// ストレージPUTが返すステータス
    pub storage_status: u16,
    /// ストレージPUTが応答するまでの遅延
    pub storage_delay: Option<Duration>,
    /// `POST /jobs` が返すステータス文字列
    pub create_status: String,
    /// `GET /jobs/{id}` が順に返すステータス。最後の値を繰り返す
    pub poll_statuses: Vec<String>,
    /// 設定時はすべてのRESTエンドポイントがこのステータスで応答
    pub api_status_override: Option<u16>,
    /// 設定時はREST呼び出しに `Bearer <token>` が必須
    pub expected_token: Option<String>,
    pub valid_code: String,
    /// トークン応答から `id_token` を省く
    pub omit_id_token: bool,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            job_id: None,
            upload_url: None,
            storage_status: 200,
            storage_delay: None,
            create_status: "pending".to_string(),
            poll_statuses: vec!["complete".to_string()],
            api_status_override: None,
            expected_token: None,
            valid_code: VALID_CODE.to_string(),
            omit_id_token: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body_len: usize,
    /// ストレージ以外の呼び出しのUTF-8ボディ
    pub body: Option<String>,
}

impl RecordedCall {
    pub fn json(&self) -> Option<Value> {
        self.body.as_deref().and_then(|b| serde_json::from_str(b).ok())
    }

    /// `application/x-www-form-urlencoded` ボディを解析
    pub fn form(&self) -> HashMap<String, String> {
        self.body.as_deref().map(parse_form).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Jobs {
    created: HashMap<String, String>,
    polls: HashMap<String, usize>,
}

struct StubState {
    config: StubConfig,
    base_url: OnceLock<String>,
    calls: Mutex<Vec<RecordedCall>>,
    jobs: Mutex<Jobs>,
}

pub struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubServer {
    /// 一時ポートで起動
    pub async fn start(config: StubConfig) -> Self {
        Self::start_on(([127, 0, 0, 1], 0).into(), config).await
    }

    pub async fn start_on(bind: SocketAddr, config: StubConfig) -> Self {
        let state = Arc::new(StubState {
            config,
            base_url: OnceLock::new(),
            calls: Mutex::new(Vec::new()),
            jobs: Mutex::new(Jobs::default()),
        });

        let with_state = {
            let state = Arc::clone(&state);
            warp::any().map(move || Arc::clone(&state))
        };
        let routes = warp::method()
            .and(warp::path::full())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .and(with_state)
            .and_then(handle);

        let (tx, rx) = oneshot::channel::<()>();
        let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(bind, async move {
            rx.await.ok();
        });
        let _ = state.base_url.set(format!("http://{}", addr));
        tokio::spawn(server);
        log::info!("stub backend listening on {}", addr);

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// メソッドが一致し、パスが `path_prefix` で始まる呼び出し
    pub fn calls_to(&self, method: &str, path_prefix: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path.starts_with(path_prefix))
            .collect()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn reply(status: u16, body: Value) -> Response<String> {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("content-type", "application/json")
        .body(body.to_string())
        .unwrap_or_default()
}

fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (decode_component(k), decode_component(v)))
        .collect()
}

/// `+` を空白に戻してからパーセントデコード（不正な列は元の文字列のまま）
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

async fn handle(
    method: Method,
    path: warp::path::FullPath,
    headers: HeaderMap,
    body: warp::hyper::body::Bytes,
    state: Arc<StubState>,
) -> Result<Response<String>, Infallible> {
    let path = path.as_str().to_string();
    let is_storage = path.starts_with("/storage/");

    let call = RecordedCall {
        method: method.to_string(),
        path: path.clone(),
        authorization: header(&headers, "authorization"),
        content_type: header(&headers, "content-type"),
        content_length: header(&headers, "content-length").and_then(|v| v.parse().ok()),
        body_len: body.len(),
        body: if is_storage {
            None
        } else {
            Some(String::from_utf8_lossy(&body).into_owned())
        },
    };
    log::info!("{} {} ({} bytes)", call.method, call.path, call.body_len);
    if let Ok(mut calls) = state.calls.lock() {
        calls.push(call.clone());
    }

    if is_storage {
        if let Some(delay) = state.config.storage_delay {
            tokio::time::sleep(delay).await;
        }
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let response = match (method.as_str(), segments.as_slice()) {
        ("PUT", ["storage", _]) => storage_put(&state),
        ("POST", ["oauth2", "token"]) => token(&state, &call),
        ("GET", ["logout"]) => reply(200, json!({})),
        (m, segs) => {
            if let Some(rejection) = check_api_auth(&state, &call) {
                return Ok(rejection);
            }
            match (m, segs) {
                ("POST", ["upload-url"]) => upload_url(&state, &call),
                ("POST", ["jobs"]) => create_job(&state, &call),
                ("GET", ["jobs", id]) => get_job(&state, id),
                ("GET", ["jobs", id, "results"]) => get_results(&state, id),
                _ => reply(404, json!({ "message": "Not found" })),
            }
        }
    };
    Ok(response)
}

fn check_api_auth(state: &StubState, call: &RecordedCall) -> Option<Response<String>> {
    let Some(auth) = call.authorization.as_deref() else {
        return Some(reply(401, json!({ "message": "Unauthorized" })));
    };
    if let Some(expected) = &state.config.expected_token {
        if auth != format!("Bearer {}", expected) {
            return Some(reply(401, json!({ "message": "Unauthorized" })));
        }
    }
    state
        .config
        .api_status_override
        .map(|status| reply(status, json!({ "message": "Overridden" })))
}

fn storage_put(state: &StubState) -> Response<String> {
    let status = state.config.storage_status;
    if (200..300).contains(&status) {
        return reply(status, json!({}));
    }
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN))
        .header("content-type", "application/xml")
        .body("<Error><Code>AccessDenied</Code></Error>".to_string())
        .unwrap_or_default()
}

fn token(state: &StubState, call: &RecordedCall) -> Response<String> {
    let form = call.form();
    let grant_ok = form.get("grant_type").map(String::as_str) == Some("authorization_code");
    let code_ok = form.get("code") == Some(&state.config.valid_code);
    let verifier_ok = form.get("code_verifier").is_some_and(|v| v.len() >= 43);

    if grant_ok && code_ok && verifier_ok {
        let mut tokens = json!({
            "access_token": "stub-access",
            "id_token": "stub-id",
            "refresh_token": "stub-refresh",
            "token_type": "Bearer",
            "expires_in": 3600
        });
        if state.config.omit_id_token {
            if let Some(map) = tokens.as_object_mut() {
                map.remove("id_token");
            }
        }
        reply(200, tokens)
    } else {
        reply(
            400,
            json!({ "error": "invalid_grant", "error_description": "Invalid authorization code" }),
        )
    }
}

fn upload_url(state: &StubState, call: &RecordedCall) -> Response<String> {
    let has_content_type = call
        .json()
        .and_then(|v| v.get("contentType").and_then(Value::as_str).map(str::to_string))
        .is_some();
    if !has_content_type {
        return reply(400, json!({ "message": "contentType is required" }));
    }

    let job_id = state
        .config
        .job_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let upload_url = state.config.upload_url.clone().unwrap_or_else(|| {
        let base = state.base_url.get().cloned().unwrap_or_default();
        format!("{}/storage/{}?X-Amz-Signature=stub", base, job_id)
    });
    reply(200, json!({ "jobId": job_id, "uploadUrl": upload_url }))
}

fn create_job(state: &StubState, call: &RecordedCall) -> Response<String> {
    let Some(body) = call.json() else {
        return reply(400, json!({ "message": "Invalid JSON" }));
    };
    let job_id = body.get("jobId").and_then(Value::as_str).unwrap_or_default();
    let lift_type = body.get("liftType").and_then(Value::as_str).unwrap_or_default();
    if job_id.is_empty() || lift_type.is_empty() {
        return reply(400, json!({ "message": "jobId and liftType are required" }));
    }

    if let Ok(mut jobs) = state.jobs.lock() {
        jobs.created.insert(job_id.to_string(), lift_type.to_string());
    }
    reply(
        201,
        json!({ "jobId": job_id, "status": state.config.create_status, "liftType": lift_type }),
    )
}

fn next_status(state: &StubState, job_id: &str) -> Option<(String, String)> {
    let mut jobs = state.jobs.lock().ok()?;
    let lift_type = jobs.created.get(job_id)?.clone();
    let count = jobs.polls.entry(job_id.to_string()).or_insert(0);
    let statuses = &state.config.poll_statuses;
    let status = statuses
        .get(*count)
        .or_else(|| statuses.last())
        .cloned()
        .unwrap_or_else(|| "pending".to_string());
    *count += 1;
    Some((status, lift_type))
}

fn get_job(state: &StubState, job_id: &str) -> Response<String> {
    match next_status(state, job_id) {
        Some((status, lift_type)) => reply(
            200,
            json!({ "jobId": job_id, "status": status, "liftType": lift_type }),
        ),
        None => reply(404, json!({ "message": "Job not found" })),
    }
}

fn get_results(state: &StubState, job_id: &str) -> Response<String> {
    let known = state
        .jobs
        .lock()
        .map(|jobs| jobs.created.contains_key(job_id))
        .unwrap_or(false);
    if !known {
        return reply(404, json!({ "message": "Job not found" }));
    }

    let status = state
        .config
        .poll_statuses
        .last()
        .cloned()
        .unwrap_or_else(|| "complete".to_string());
    let urls: Vec<Value> = ["meta", "landmarks", "summary", "viz"]
        .iter()
        .map(|name| {
            let key = format!("results/{}/{}", job_id, name);
            json!({ "name": name, "key": key, "url": format!("https://stub/{}", key) })
        })
        .collect();
    reply(200, json!({ "jobId": job_id, "status": status, "urls": urls }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form() {
        let form = parse_form("grant_type=authorization_code&code=abc&scope=openid+email");
        assert_eq!(form.get("code").map(String::as_str), Some("abc"));
        assert_eq!(form.get("scope").map(String::as_str), Some("openid email"));

        let form = parse_form("code_verifier=abc%7Edef&redirect_uri=liftlens%3A%2F%2Fauth&bad=%zz");
        assert_eq!(form.get("code_verifier").map(String::as_str), Some("abc~def"));
        assert_eq!(form.get("redirect_uri").map(String::as_str), Some("liftlens://auth"));
        assert_eq!(form.get("bad").map(String::as_str), Some("%zz"));
    }
}

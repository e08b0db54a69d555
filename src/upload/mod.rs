//! 動画アップロードモジュール
//!
//! 署名付きURLへ動画を単発のPUTで送信します。レジューム・分割アップロードは行いません。
//! 署名付きURLは1回限りの可能性があるため、失敗後の再試行には新しい
//! `UploadTarget` が必要です（再試行の判断は呼び出し側）。

mod progress;
mod source;

pub use progress::{NoProgress, ProgressListener};
pub use source::VideoSource;

use crate::api::jobs::UploadTarget;
use crate::config::UploadConfig;
use bytes::Bytes;
use progress::ProgressReporter;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// アップロードのエラー
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Video file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Video file is empty")]
    EmptyFile,

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// ストレージが2xx以外を返した
    #[error("Storage rejected the upload with HTTP {status}: {body}")]
    StorageRejected { status: u16, body: String },

    /// 接続断などネットワークレベルの失敗
    #[error("Network error during upload: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Upload was cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => "file_not_found",
            Self::EmptyFile => "empty_file",
            Self::Read { .. } => "file_read",
            Self::StorageRejected { .. } => "storage_rejected",
            Self::Network(_) => "network",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 署名付きURLへのアップローダー
#[derive(Debug, Clone)]
pub struct BinaryUploader {
    http_client: reqwest::Client,
    content_type: String,
    chunk_size: usize,
}

impl BinaryUploader {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(UploadError::Network)?;
        Ok(Self::with_client(
            http_client,
            config.content_type.clone(),
            config.chunk_size(),
        ))
    }

    pub fn with_client(
        http_client: reqwest::Client,
        content_type: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            http_client,
            content_type: content_type.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// 動画をアップロードする
    ///
    /// `target` はここで消費されます。
    pub async fn upload(
        &self,
        target: UploadTarget,
        source: VideoSource,
        progress: Option<Arc<dyn ProgressListener>>,
    ) -> Result<(), UploadError> {
        let reporter = Arc::new(ProgressReporter::new(progress));

        let data = source.resolve().await?;
        let total = data.len();
        info!(
            job_id = %target.job_id,
            upload_url = %redact_url(&target.upload_url),
            size_bytes = total,
            "⬆️ Starting video upload"
        );

        reporter.report(0);
        let result = self.put(&target.upload_url, data, Arc::clone(&reporter)).await;
        match &result {
            Ok(()) => {
                reporter.finish();
                info!(job_id = %target.job_id, "✅ Video uploaded");
            }
            Err(e) => {
                reporter.abort();
                error!(job_id = %target.job_id, kind = e.kind(), "❌ Upload failed: {}", e);
            }
        }
        result
    }

    async fn put(
        &self,
        upload_url: &str,
        data: Bytes,
        reporter: Arc<ProgressReporter>,
    ) -> Result<(), UploadError> {
        let total = data.len();
        let chunks: Vec<Bytes> = (0..total)
            .step_by(self.chunk_size)
            .map(|start| data.slice(start..(start + self.chunk_size).min(total)))
            .collect();

        // ボディが読み出されるたびに送信済みバイト数を通知
        let mut sent = 0usize;
        let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len();
            reporter.report_bytes(sent, total);
            Ok::<Bytes, std::io::Error>(chunk)
        }));

        let response = self
            .http_client
            .put(upload_url)
            .header(CONTENT_TYPE, &self.content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(UploadError::Network)?;

        let status = response.status();
        debug!(status = status.as_u16(), "📡 Storage response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::StorageRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// 署名部分（クエリ）をログに出さない
fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => url.chars().take(100).collect(),
    }
}

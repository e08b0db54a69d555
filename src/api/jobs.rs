//! ジョブAPI
//!
//! | Method | Path                  | Body                    |
//! |--------|-----------------------|-------------------------|
//! | POST   | /upload-url           | {contentType}           |
//! | POST   | /jobs                 | {jobId, liftType}       |
//! | GET    | /jobs/{jobId}         |                         |
//! | GET    | /jobs/{jobId}/results |                         |

use crate::api::transport::AuthenticatedTransport;
use crate::LiftResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// 1回限りの書き込み許可（署名付きURL）
///
/// アップロードで一度だけ消費され、永続化されません。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub job_id: String,
    pub upload_url: String,
}

/// ジョブの状態
///
/// 未知の値はそのまま `Other` に保持します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Other(s) => s.as_str(),
        }
    }

    /// これ以上変化しない状態か
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "complete" | "completed" => JobStatus::Complete,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(value),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// サーバー側の解析ジョブ（読み取り専用のスナップショット）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub lift_type: Option<String>,
}

/// 結果ファイルの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum ResultName {
    #[display("meta")]
    Meta,
    #[display("landmarks")]
    Landmarks,
    #[display("summary")]
    Summary,
    #[display("viz")]
    Viz,
}

/// 結果ファイルへのリンク
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultUrl {
    pub name: ResultName,
    pub key: String,
    pub url: String,
}

/// ジョブ結果（不変のスナップショット）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub urls: Vec<ResultUrl>,
}

impl JobResults {
    pub fn url_for(&self, name: ResultName) -> Option<&ResultUrl> {
        self.urls.iter().find(|u| u.name == name)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlRequest<'a> {
    content_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest<'a> {
    job_id: &'a str,
    lift_type: &'a str,
}

/// ジョブAPIクライアント
#[derive(Clone)]
pub struct JobsClient {
    transport: AuthenticatedTransport,
}

impl JobsClient {
    pub fn new(transport: AuthenticatedTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    /// 署名付きアップロードURLを要求
    pub async fn request_upload_url(&self, content_type: &str) -> LiftResult<UploadTarget> {
        let target: UploadTarget = self
            .transport
            .post("/upload-url", &UploadUrlRequest { content_type })
            .await?;
        info!(job_id = %target.job_id, "🎫 Upload URL issued");
        Ok(target)
    }

    /// 解析ジョブを作成
    pub async fn create_job(&self, job_id: &str, lift_type: &str) -> LiftResult<Job> {
        let job: Job = self
            .transport
            .post("/jobs", &CreateJobRequest { job_id, lift_type })
            .await?;
        info!(job_id = %job.job_id, status = %job.status, "🧾 Job created");
        Ok(job)
    }

    /// ジョブ状態を1回取得
    pub async fn get_job(&self, job_id: &str) -> LiftResult<Job> {
        self.transport
            .get(&format!("/jobs/{}", urlencoding::encode(job_id)))
            .await
    }

    /// ジョブ結果を取得（完了前でもサーバーの応答をそのまま返す）
    pub async fn get_job_results(&self, job_id: &str) -> LiftResult<JobResults> {
        self.transport
            .get(&format!("/jobs/{}/results", urlencoding::encode(job_id)))
            .await
    }
}

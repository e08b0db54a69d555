//! ジョブオーケストレーター
//!
//! 「アップロードURL要求 → 動画アップロード → ジョブ作成」を一つの操作にまとめます。
//! どのステップも自動リトライせず、失敗した時点で元のエラーをそのまま返します。

use crate::api::jobs::{Job, JobResults, JobsClient};
use crate::upload::{BinaryUploader, ProgressListener, UploadError, VideoSource};
use crate::LiftResult;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// ポーリング設定
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    /// 最大試行回数（Noneなら終端状態まで続ける）
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: Some(120),
        }
    }
}

pub struct JobOrchestrator {
    jobs: JobsClient,
    uploader: BinaryUploader,
}

impl JobOrchestrator {
    pub fn new(jobs: JobsClient, uploader: BinaryUploader) -> Self {
        Self { jobs, uploader }
    }

    pub fn jobs(&self) -> &JobsClient {
        &self.jobs
    }

    /// 動画をアップロードして解析ジョブを作成
    pub async fn submit(
        &self,
        lift_type: &str,
        source: VideoSource,
        progress: Option<Arc<dyn ProgressListener>>,
    ) -> LiftResult<Job> {
        let target = self
            .jobs
            .request_upload_url(self.uploader.content_type())
            .await?;
        let job_id = target.job_id.clone();

        self.uploader.upload(target, source, progress).await?;

        self.jobs.create_job(&job_id, lift_type).await
    }

    /// `submit` と同じだが、トークンのキャンセルで中断できる
    ///
    /// アップロード中のキャンセルは `UploadError::Cancelled`。
    /// ジョブ作成が始まった後はキャンセルしても完了を待ちます。
    pub async fn submit_cancellable(
        &self,
        lift_type: &str,
        source: VideoSource,
        progress: Option<Arc<dyn ProgressListener>>,
        cancel: CancellationToken,
    ) -> LiftResult<Job> {
        let target = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled.into()),
            target = self.jobs.request_upload_url(self.uploader.content_type()) => target?,
        };
        let job_id = target.job_id.clone();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "🛑 Upload cancelled");
                return Err(UploadError::Cancelled.into());
            }
            result = self.uploader.upload(target, source, progress) => result?,
        }

        self.jobs.create_job(&job_id, lift_type).await
    }

    /// ジョブ状態を1回取得
    pub async fn get_status(&self, job_id: &str) -> LiftResult<Job> {
        self.jobs.get_job(job_id).await
    }

    /// ジョブ結果を取得
    pub async fn get_results(&self, job_id: &str) -> LiftResult<JobResults> {
        self.jobs.get_job_results(job_id).await
    }

    /// 終端状態になるまで一定間隔でポーリング
    ///
    /// 最大試行回数に達した場合は最後に取得したジョブを返します。
    pub async fn wait_for_completion(&self, job_id: &str, policy: &PollPolicy) -> LiftResult<Job> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let job = self.get_status(job_id).await?;
            debug!(job_id, attempt, status = %job.status, "🔄 Job polled");

            let exhausted = policy.max_attempts.is_some_and(|max| attempt >= max);
            if job.status.is_terminal() || exhausted {
                return Ok(job);
            }
            tokio::time::sleep(policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, Some(120));
    }
}

//! アップロードフロー制御
//!
//! 呼び出し側（画面・CLI）向けの状態機械です。
//!
//! ```text
//! Idle → FileSelected → Uploading{progress} → Submitting → Succeeded
//!                                   └──────────────┴──────→ Failed{error}
//! ```
//!
//! 1つのコントローラーで同時に進行するアップロードは最大1つです。
//! エラー種別からユーザー向けメッセージへの変換はここだけで行います。

use crate::api::auth::AuthError;
use crate::api::jobs::Job;
use crate::api::transport::ApiError;
use crate::orchestrator::JobOrchestrator;
use crate::upload::{ProgressListener, UploadError, VideoSource};
use crate::{LiftError, LiftResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// リフトの種類
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum LiftType {
    #[display("bench")]
    Bench,
    #[display("squat")]
    Squat,
    #[display("deadlift")]
    Deadlift,
}

impl LiftType {
    pub const ALL: [LiftType; 3] = [LiftType::Bench, LiftType::Squat, LiftType::Deadlift];

    pub fn label(&self) -> &'static str {
        match self {
            LiftType::Bench => "Bench",
            LiftType::Squat => "Squat",
            LiftType::Deadlift => "Deadlift",
        }
    }
}

impl FromStr for LiftType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bench" => Ok(LiftType::Bench),
            "squat" => Ok(LiftType::Squat),
            "deadlift" => Ok(LiftType::Deadlift),
            other => Err(format!(
                "unknown lift type '{}' (expected bench, squat or deadlift)",
                other
            )),
        }
    }
}

/// 送信前の入力チェックエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No lift type selected")]
    MissingLiftType,

    #[error("No video selected")]
    MissingFile,

    #[error("An upload is already in progress")]
    SubmitInProgress,
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingLiftType => "missing_lift_type",
            Self::MissingFile => "missing_file",
            Self::SubmitInProgress => "submit_in_progress",
        }
    }
}

/// 失敗の表示用情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    pub kind: &'static str,
    pub message: String,
    /// サインイン画面へ戻すべきか
    pub requires_sign_in: bool,
}

impl From<&LiftError> for FlowFailure {
    fn from(err: &LiftError) -> Self {
        Self {
            kind: err.kind(),
            message: user_message(err),
            requires_sign_in: err.requires_sign_in(),
        }
    }
}

/// フローの状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    FileSelected,
    Uploading { progress: u8 },
    Submitting,
    Succeeded(Job),
    Failed(FlowFailure),
}

impl FlowState {
    /// アップロードまたはジョブ作成の最中か
    pub fn is_busy(&self) -> bool {
        matches!(self, FlowState::Uploading { .. } | FlowState::Submitting)
    }
}

/// エラーをユーザー向けメッセージに変換
pub fn user_message(err: &LiftError) -> String {
    match err {
        LiftError::Auth(e) => match e {
            AuthError::NotSignedIn => "Please sign in to upload videos.".into(),
            AuthError::Cancelled => "Sign-in was cancelled.".into(),
            AuthError::Denied(_) => "Sign-in was denied.".into(),
            AuthError::ExchangeFailed(_) => "Sign-in failed. Please try again.".into(),
            AuthError::AlreadyInProgress => "Sign-in is already in progress.".into(),
            AuthError::Store(_) => "Could not access secure storage on this device.".into(),
        },
        LiftError::Api(e) => match e {
            ApiError::Status { status: 401, .. } => {
                "Your session has expired. Please sign in again.".into()
            }
            ApiError::Status { status, .. } => format!(
                "The server returned an error ({}). Please try again.",
                status
            ),
            ApiError::Network(_) => {
                "Could not reach the server. Check your connection and try again.".into()
            }
            ApiError::Decode { .. } => "The server sent an unexpected response.".into(),
        },
        LiftError::Upload(e) => match e {
            UploadError::FileNotFound { .. } => "The selected video could not be found.".into(),
            UploadError::EmptyFile => "The selected video is empty.".into(),
            UploadError::Read { .. } => "The selected video could not be read.".into(),
            UploadError::StorageRejected { status, .. } => format!(
                "The upload was rejected by storage (HTTP {}). Please try again.",
                status
            ),
            UploadError::Network(_) => {
                "Network error during upload. Check your connection and try again.".into()
            }
            UploadError::Cancelled => "Upload cancelled.".into(),
        },
        LiftError::Validation(e) => match e {
            ValidationError::MissingLiftType => "Please select a lift type.".into(),
            ValidationError::MissingFile => "Please select a video.".into(),
            ValidationError::SubmitInProgress => "An upload is already in progress.".into(),
        },
    }
}

/// 成功時のメッセージ
pub fn success_message(lift_type: LiftType) -> String {
    format!("{} lift uploaded for analysis!", lift_type.label())
}

#[derive(Debug, Default)]
struct Selection {
    lift_type: Option<LiftType>,
    source: Option<VideoSource>,
}

/// 進行中の送信
///
/// 完了前に送信の Future が破棄された場合、Drop で Failed(cancelled) に戻す。
struct InFlight<'a> {
    controller: &'a UploadFlowController,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(controller: &'a UploadFlowController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut selection = self.controller.selection.lock();
        selection.source = None;
        let err = LiftError::from(UploadError::Cancelled);
        warn!("🛑 Submit dropped before completion");
        self.controller
            .state
            .send_replace(FlowState::Failed(FlowFailure::from(&err)));
    }
}

/// アップロードフローコントローラー
pub struct UploadFlowController {
    orchestrator: Arc<JobOrchestrator>,
    /// 選択状態。Uploadingへの遷移もこのロック内で行う
    selection: Mutex<Selection>,
    state: Arc<watch::Sender<FlowState>>,
}

impl UploadFlowController {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            orchestrator,
            selection: Mutex::new(Selection::default()),
            state: Arc::new(state),
        }
    }

    /// 現在の状態
    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    /// 状態変化の購読
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    pub fn lift_type(&self) -> Option<LiftType> {
        self.selection.lock().lift_type
    }

    pub fn has_file(&self) -> bool {
        self.selection.lock().source.is_some()
    }

    /// 送信可能か（両方選択済みかつ処理中でない）
    pub fn can_submit(&self) -> bool {
        let selection = self.selection.lock();
        selection.lift_type.is_some()
            && selection.source.is_some()
            && !self.state.borrow().is_busy()
    }

    /// リフト種別を選択。処理中は無視して `false`
    pub fn select_lift_type(&self, lift_type: LiftType) -> bool {
        let mut selection = self.selection.lock();
        if self.state.borrow().is_busy() {
            warn!("⚠️ Ignoring lift type selection while uploading");
            return false;
        }
        selection.lift_type = Some(lift_type);
        self.state.send_replace(FlowState::FileSelected);
        true
    }

    /// 動画を選択。処理中は無視して `false`
    pub fn select_file(&self, source: VideoSource) -> bool {
        let mut selection = self.selection.lock();
        if self.state.borrow().is_busy() {
            warn!("⚠️ Ignoring file selection while uploading");
            return false;
        }
        info!(file = %source.display_name(), "🎬 Video selected");
        selection.source = Some(source);
        self.state.send_replace(FlowState::FileSelected);
        true
    }

    /// 選択を破棄して Idle に戻す。処理中は無視して `false`
    pub fn clear_selection(&self) -> bool {
        let mut selection = self.selection.lock();
        if self.state.borrow().is_busy() {
            return false;
        }
        *selection = Selection::default();
        self.state.send_replace(FlowState::Idle);
        true
    }

    /// 送信
    pub async fn submit(&self) -> LiftResult<Job> {
        self.run_submit(None).await
    }

    /// キャンセル可能な送信（画面を離れた時など）
    pub async fn submit_cancellable(&self, cancel: CancellationToken) -> LiftResult<Job> {
        self.run_submit(Some(cancel)).await
    }

    async fn run_submit(&self, cancel: Option<CancellationToken>) -> LiftResult<Job> {
        let (lift_type, source, guard) = self.begin_upload()?;
        info!(lift_type = %lift_type, file = %source.display_name(), "🚀 Submitting lift");

        let listener = self.progress_listener();
        let lift = lift_type.to_string();
        let result = match cancel {
            Some(cancel) => {
                self.orchestrator
                    .submit_cancellable(&lift, source, Some(listener), cancel)
                    .await
            }
            None => self.orchestrator.submit(&lift, source, Some(listener)).await,
        };
        guard.disarm();

        let mut selection = self.selection.lock();
        match &result {
            Ok(job) => {
                info!(
                    job_id = %job.job_id,
                    status = %job.status,
                    "🎉 {}",
                    success_message(lift_type)
                );
                *selection = Selection::default();
                self.state.send_replace(FlowState::Succeeded(job.clone()));
            }
            Err(e) => {
                let failure = FlowFailure::from(e);
                warn!(kind = failure.kind, "❌ Submit failed: {}", e);
                // 動画は破棄、リフト種別は残す
                selection.source = None;
                self.state.send_replace(FlowState::Failed(failure));
            }
        }
        result
    }

    /// 入力チェックと Uploading への遷移を1つのロック内で行う
    fn begin_upload(&self) -> LiftResult<(LiftType, VideoSource, InFlight<'_>)> {
        let mut selection = self.selection.lock();
        if self.state.borrow().is_busy() {
            return Err(ValidationError::SubmitInProgress.into());
        }
        let lift_type = selection.lift_type.ok_or(ValidationError::MissingLiftType)?;
        let source = selection.source.take().ok_or(ValidationError::MissingFile)?;

        self.state.send_replace(FlowState::Uploading { progress: 0 });
        Ok((lift_type, source, InFlight::new(self)))
    }

    fn progress_listener(&self) -> Arc<dyn ProgressListener> {
        let state = Arc::clone(&self.state);
        Arc::new(move |percent: u8| {
            state.send_if_modified(|current| match current {
                FlowState::Uploading { .. } if percent >= 100 => {
                    *current = FlowState::Submitting;
                    true
                }
                FlowState::Uploading { progress } if *progress != percent => {
                    *progress = percent;
                    true
                }
                _ => false,
            });
        })
    }
}

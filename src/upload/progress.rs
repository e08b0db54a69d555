//! アップロード進捗通知
//!
//! 通知される値は 0〜100 の範囲で単調増加し、成功時は最後に必ず 100 になります。
//! 失敗または完了の後は一切通知しません。

use parking_lot::Mutex;
use std::sync::Arc;

/// 進捗を受け取るインターフェース
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, percent: u8);
}

impl<F> ProgressListener for F
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        self(percent)
    }
}

/// 何もしないリスナー
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_progress(&self, _percent: u8) {}
}

#[derive(Debug, Default)]
struct ReporterState {
    last: Option<u8>,
    closed: bool,
}

/// リスナーへの通知を単調性・終端条件付きで中継する
pub(crate) struct ProgressReporter {
    listener: Arc<dyn ProgressListener>,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub(crate) fn new(listener: Option<Arc<dyn ProgressListener>>) -> Self {
        Self {
            listener: listener.unwrap_or_else(|| Arc::new(NoProgress)),
            state: Mutex::new(ReporterState::default()),
        }
    }

    pub(crate) fn report(&self, percent: u8) {
        let percent = percent.min(100);
        {
            let mut state = self.state.lock();
            if state.closed || state.last.is_some_and(|last| percent <= last) {
                return;
            }
            state.last = Some(percent);
        }
        self.listener.on_progress(percent);
    }

    /// 送信済みバイト数から通知（完了の 100 は `finish` だけが出す）
    pub(crate) fn report_bytes(&self, sent: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = ((sent as u128 * 100) / total as u128).min(99) as u8;
        self.report(percent);
    }

    /// 成功: 100 を通知して閉じる
    pub(crate) fn finish(&self) {
        self.report(100);
        self.state.lock().closed = true;
    }

    /// 失敗: 以後の通知を止める
    pub(crate) fn abort(&self) {
        self.state.lock().closed = true;
    }
}

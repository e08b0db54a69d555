//! 動画ソース
//!
//! ランタイムによって動画は「メモリ上のバイナリ」か「ファイルパス参照」の
//! どちらかで渡されます。ここで一度だけ正規化し、以降は同じバイト列として扱います。

use super::UploadError;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// アップロード対象の動画
#[derive(Debug, Clone)]
pub enum VideoSource {
    /// メモリ上のバイナリ（サイズは既知）
    Blob(Bytes),
    /// ファイルパス参照（サイズは読み込み時に取得）
    PathRef(PathBuf),
}

impl VideoSource {
    pub fn blob(data: impl Into<Bytes>) -> Self {
        VideoSource::Blob(data.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        VideoSource::PathRef(path.into())
    }

    /// 表示用の名前
    pub fn display_name(&self) -> String {
        match self {
            VideoSource::Blob(data) => format!("<in-memory video, {} bytes>", data.len()),
            VideoSource::PathRef(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    /// バイト列に正規化する
    ///
    /// 空のソースはネットワークに触れる前に `EmptyFile` で失敗します。
    pub(crate) async fn resolve(self) -> Result<Bytes, UploadError> {
        let data = match self {
            VideoSource::Blob(data) => data,
            VideoSource::PathRef(path) => read_path(&path).await?,
        };

        if data.is_empty() {
            return Err(UploadError::EmptyFile);
        }
        Ok(data)
    }
}

async fn read_path(path: &Path) -> Result<Bytes, UploadError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| io_error(path, e))?;

    if !metadata.is_file() {
        return Err(UploadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if metadata.len() == 0 {
        return Err(UploadError::EmptyFile);
    }

    tracing::debug!(
        path = %path.display(),
        size_bytes = metadata.len(),
        "📂 Reading video file"
    );
    let contents = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
    Ok(Bytes::from(contents))
}

fn io_error(path: &Path, err: std::io::Error) -> UploadError {
    if err.kind() == ErrorKind::NotFound {
        UploadError::FileNotFound {
            path: path.to_path_buf(),
        }
    } else {
        UploadError::Read {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

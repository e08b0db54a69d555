//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// APIのベースURLを上書きする環境変数
pub const API_URL_ENV: &str = "LIFTLENS_API_URL";

/// バックエンドAPI設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// IDプロバイダー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// プロバイダーのベースURL（例: https://example.auth.us-east-1.amazoncognito.com）
    pub domain_url: String,
    pub client_id: String,
    /// アプリ固有スキームのリダイレクト先
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// 認可画面の待ち時間上限（秒）
    pub prompt_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            domain_url: "https://auth.example.com".to_string(),
            client_id: String::new(),
            redirect_uri: "liftlens://auth".to_string(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            prompt_timeout_secs: 300,
        }
    }
}

impl IdentityConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.domain_url.trim_end_matches('/'), path)
    }

    pub fn authorization_endpoint(&self) -> String {
        self.endpoint("/oauth2/authorize")
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("/oauth2/token")
    }

    pub fn logout_endpoint(&self) -> String {
        self.endpoint("/logout")
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

/// アップロード設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub content_type: String,
    /// 送信チャンクサイズ（KiB）。進捗通知の粒度になる
    pub chunk_size_kib: usize,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            content_type: "video/mp4".to_string(),
            chunk_size_kib: 256,
            timeout_secs: 600,
        }
    }
}

impl UploadConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kib.max(1) * 1024
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// セキュアストレージ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub keyring_service: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keyring_service: "dev.liftlens.tokens".to_string(),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 環境変数による上書きを適用
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.is_empty() {
                debug!(url = %url, "🔧 API base URL overridden by environment");
                self.api.base_url = url;
            }
        }
    }
}

/// 設定管理
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG設定ディレクトリを使用してConfigManagerを作成
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("dev", "liftlens", "liftlens")
            .context("Failed to determine config directory")?;
        Ok(Self::with_dir(project_dirs.config_dir()))
    }

    /// 指定ディレクトリを使用
    pub fn with_dir(config_dir: &Path) -> Self {
        Self {
            config_path: config_dir.join("config.toml"),
        }
    }

    /// 設定を読み込み（ファイルがなければデフォルト）
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "📄 Config file not found, using defaults"
            );
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.config_path.display()))?;

        debug!(path = %self.config_path.display(), "📄 Config loaded");
        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, toml_string)?;

        info!(path = %self.config_path.display(), "💾 Config saved");
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// デフォルトのログディレクトリ
pub fn default_log_dir() -> Option<PathBuf> {
    ProjectDirs::from("dev", "liftlens", "liftlens").map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_endpoints() {
        let identity = IdentityConfig {
            domain_url: "https://auth.example.com/".into(),
            ..Default::default()
        };
        assert_eq!(
            identity.authorization_endpoint(),
            "https://auth.example.com/oauth2/authorize"
        );
        assert_eq!(
            identity.token_endpoint(),
            "https://auth.example.com/oauth2/token"
        );
        assert_eq!(identity.logout_endpoint(), "https://auth.example.com/logout");
    }

    #[test]
    fn test_default_scopes_and_content_type() {
        let config = AppConfig::default();
        assert_eq!(config.identity.scopes, vec!["openid", "email", "profile"]);
        assert_eq!(config.upload.content_type, "video/mp4");
        assert_eq!(config.upload.chunk_size(), 256 * 1024);
    }

    #[test]
    fn test_load_missing_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(temp_dir.path());

        let config = manager.load_config().unwrap();
        assert_eq!(config.api.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(&temp_dir.path().join("nested"));

        let mut config = AppConfig::default();
        config.api.base_url = "https://api.example.com".into();
        config.identity.client_id = "client-123".into();
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.api.base_url, "https://api.example.com");
        assert_eq!(loaded.identity.client_id, "client-123");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(temp_dir.path());
        fs::write(
            manager.config_path(),
            "[api]\nbase_url = \"https://x\"\ntimeout_secs = 5\n",
        )
        .unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.api.timeout_secs, 5);
        assert_eq!(loaded.identity.redirect_uri, "liftlens://auth");
    }
}

pub mod auth; // 認証（トークン保管・PKCE・サインイン）
pub mod jobs; // ジョブAPI（アップロードURL・ジョブ作成・状態・結果）
pub mod transport; // Bearer付きHTTPトランスポート

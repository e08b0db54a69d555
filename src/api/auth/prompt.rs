//! ターミナル用の認可プロンプト
//!
//! アプリ固有スキームへのリダイレクトはCLIでは受け取れないため、
//! 認可URLを表示し、ブラウザのアドレスバーに表示されたリダイレクトURLを
//! 貼り付けてもらいます。空行またはEOFはキャンセル扱いです。

use super::{AuthResult, AuthorizationPrompt, PromptOutcome};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Debug, Default, Clone)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthorizationPrompt for ConsolePrompt {
    async fn authorize(
        &self,
        authorization_url: &str,
        redirect_uri: &str,
    ) -> AuthResult<PromptOutcome> {
        eprintln!("Open this URL in your browser to sign in:\n\n  {}\n", authorization_url);
        eprintln!(
            "After signing in, paste the URL starting with {} (empty line to cancel):",
            redirect_uri
        );

        let mut reader = BufReader::new(tokio::io::stdin());
        read_redirect(&mut reader, redirect_uri).await
    }

    async fn open_logout(&self, logout_url: &str, _redirect_uri: &str) -> AuthResult<()> {
        eprintln!("Open this URL to end the provider session:\n\n  {}\n", logout_url);
        Ok(())
    }
}

/// リダイレクトURLが入力されるまで読み続ける
async fn read_redirect<R>(reader: &mut R, redirect_uri: &str) -> AuthResult<PromptOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(PromptOutcome::Dismissed),
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ Failed to read from stdin");
                return Ok(PromptOutcome::Dismissed);
            }
        };

        let line = line.trim();
        if line.is_empty() {
            return Ok(PromptOutcome::Dismissed);
        }
        if line.starts_with(redirect_uri) {
            return Ok(PromptOutcome::Redirected(line.to_string()));
        }
        eprintln!("That does not look like a {} URL, try again:", redirect_uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_redirect_line() {
        let mut input: &[u8] = b"liftlens://auth?code=c&state=s\n";
        let outcome = read_redirect(&mut input, "liftlens://auth").await.unwrap();
        assert_eq!(
            outcome,
            PromptOutcome::Redirected("liftlens://auth?code=c&state=s".into())
        );
    }

    #[tokio::test]
    async fn test_skips_unrelated_lines() {
        let mut input: &[u8] = b"https://example.com\n  liftlens://auth?code=x  \n";
        let outcome = read_redirect(&mut input, "liftlens://auth").await.unwrap();
        assert_eq!(outcome, PromptOutcome::Redirected("liftlens://auth?code=x".into()));
    }

    #[tokio::test]
    async fn test_empty_line_and_eof_dismiss() {
        let mut input: &[u8] = b"\n";
        assert_eq!(
            read_redirect(&mut input, "liftlens://auth").await.unwrap(),
            PromptOutcome::Dismissed
        );

        let mut input: &[u8] = b"";
        assert_eq!(
            read_redirect(&mut input, "liftlens://auth").await.unwrap(),
            PromptOutcome::Dismissed
        );
    }
}

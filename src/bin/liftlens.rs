use anyhow::Context;
use clap::{Parser, Subcommand};
use liftlens::api::auth::ConsolePrompt;
use liftlens::flow::{success_message, user_message};
use liftlens::utils::{self, format_size, format_timestamp, trim_filename};
use liftlens::{
    AppConfig, AuthSession, AuthenticatedTransport, BinaryUploader, ConfigManager, FlowState,
    JobOrchestrator, JobsClient, KeyringTokenStore, LiftError, LiftType, PollPolicy, TokenKind,
    TokenStore, UploadFlowController, VideoSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// リフト動画をアップロードして解析ジョブを追跡するCLI
#[derive(Parser, Debug)]
#[command(name = "liftlens", version, about)]
struct Cli {
    /// 設定ディレクトリ（省略時はOS標準の場所）
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// ブラウザでサインイン
    Login,
    /// サインアウト
    Logout {
        /// プロバイダー側のセッションも終了する
        #[arg(long)]
        remote: bool,
    },
    /// サインイン状態を表示
    Whoami,
    /// 動画をアップロードしてジョブを作成
    Upload {
        /// bench / squat / deadlift
        #[arg(long)]
        lift: LiftType,
        file: PathBuf,
        /// 解析完了まで待つ
        #[arg(long)]
        wait: bool,
    },
    /// ジョブ状態を1回取得
    Status { job_id: String },
    /// ジョブ結果のURL一覧
    Results { job_id: String },
    /// 終端状態になるまでジョブを監視
    Watch {
        job_id: String,
        /// ポーリング間隔（秒）
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config_dir {
        Some(dir) => ConfigManager::with_dir(dir),
        None => ConfigManager::new()?,
    };
    let mut config = config_manager.load_config().unwrap_or_else(|e| {
        eprintln!("⚠️ Failed to load config, using defaults: {:#}", e);
        AppConfig::default()
    });
    config.apply_env_overrides();

    #[cfg(feature = "debug-tokio")]
    console_subscriber::init();

    #[cfg(not(feature = "debug-tokio"))]
    let _log_guard = utils::init_logging(&config.log)?;

    tracing::info!(api = %config.api.base_url, "🏋️ Starting liftlens");

    let tokens: Arc<dyn TokenStore> =
        Arc::new(KeyringTokenStore::new(config.storage.keyring_service.clone()));

    let result = match cli.command {
        Command::Login => login(&config, tokens).await,
        Command::Logout { remote } => logout(&config, tokens, remote).await,
        Command::Whoami => whoami(tokens),
        Command::Upload { lift, file, wait } => {
            upload(&config, tokens, lift, file, wait).await
        }
        Command::Status { job_id } => status(&config, tokens, &job_id).await,
        Command::Results { job_id } => results(&config, tokens, &job_id).await,
        Command::Watch { job_id, interval } => {
            let policy = PollPolicy {
                interval: Duration::from_secs(interval.max(1)),
                max_attempts: None,
            };
            watch(&config, tokens, &job_id, &policy).await
        }
    };

    if let Err(e) = &result {
        if let Some(lift_error) = e.downcast_ref::<LiftError>() {
            eprintln!("❌ {}", user_message(lift_error));
            if lift_error.requires_sign_in() {
                eprintln!("   Run `liftlens login` to sign in.");
            }
        }
    }
    result
}

fn session(config: &AppConfig, tokens: Arc<dyn TokenStore>) -> AuthSession {
    AuthSession::new(config.identity.clone(), tokens, Arc::new(ConsolePrompt::new()))
}

fn orchestrator(
    config: &AppConfig,
    tokens: Arc<dyn TokenStore>,
) -> anyhow::Result<Arc<JobOrchestrator>> {
    let transport = AuthenticatedTransport::with_timeout(
        config.api.base_url.clone(),
        tokens,
        config.api.timeout(),
    )?;
    let uploader = BinaryUploader::new(&config.upload)?;
    Ok(Arc::new(JobOrchestrator::new(
        JobsClient::new(transport),
        uploader,
    )))
}

async fn login(config: &AppConfig, tokens: Arc<dyn TokenStore>) -> anyhow::Result<()> {
    let tokens = session(config, tokens)
        .sign_in()
        .await
        .map_err(LiftError::from)?;
    eprintln!(
        "✅ Signed in (refresh token {})",
        if tokens.refresh_token.is_some() {
            "stored"
        } else {
            "not issued"
        }
    );
    Ok(())
}

async fn logout(
    config: &AppConfig,
    tokens: Arc<dyn TokenStore>,
    remote: bool,
) -> anyhow::Result<()> {
    let session = session(config, tokens);
    if remote {
        session.sign_out_remote().await;
    } else {
        session.sign_out_local().await;
    }
    eprintln!("👋 Signed out");
    Ok(())
}

fn whoami(tokens: Arc<dyn TokenStore>) -> anyhow::Result<()> {
    let set = tokens.load().map_err(LiftError::from)?;
    if set.is_authenticated() {
        println!("Signed in");
    } else {
        println!("Not signed in");
    }
    for kind in TokenKind::ALL {
        let present = set.get(kind).is_some();
        println!("  {:<8} {}", kind.to_string(), if present { "✔" } else { "-" });
    }
    Ok(())
}

async fn upload(
    config: &AppConfig,
    tokens: Arc<dyn TokenStore>,
    lift_type: LiftType,
    file: PathBuf,
    wait: bool,
) -> anyhow::Result<()> {
    let orchestrator = orchestrator(config, tokens)?;
    let controller = UploadFlowController::new(Arc::clone(&orchestrator));

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    if let Ok(meta) = tokio::fs::metadata(&file).await {
        eprintln!(
            "🎬 {} ({})",
            trim_filename(&name, 50),
            format_size(meta.len())
        );
    }

    controller.select_lift_type(lift_type);
    controller.select_file(VideoSource::path(file));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("🛑 Interrupt received, cancelling upload");
                cancel.cancel();
            }
        })
    };

    let mut states = controller.subscribe();
    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state {
                FlowState::Uploading { progress } => {
                    eprint!("\r⬆️  Uploading... {:>3}%", progress);
                }
                FlowState::Submitting => {
                    eprintln!("\r⬆️  Uploading... 100%");
                    eprintln!("🧾 Creating job...");
                }
                FlowState::Succeeded(_) | FlowState::Failed(_) => {
                    eprintln!();
                    break;
                }
                FlowState::Idle | FlowState::FileSelected => {}
            }
        }
    });

    let result = controller.submit_cancellable(cancel).await;
    ctrl_c.abort();
    // 送信側を閉じて表示タスクを終わらせる
    drop(controller);
    let _ = printer.await;
    let job = result?;

    eprintln!("🎉 {}", success_message(lift_type));
    println!("{}", job.job_id);

    if wait {
        let job = orchestrator
            .wait_for_completion(&job.job_id, &PollPolicy::default())
            .await?;
        eprintln!("📋 Job {} is {}", job.job_id, job.status);
        if job.status.is_complete() {
            print_results(&orchestrator, &job.job_id).await?;
        }
    }
    Ok(())
}

async fn status(
    config: &AppConfig,
    tokens: Arc<dyn TokenStore>,
    job_id: &str,
) -> anyhow::Result<()> {
    let job = orchestrator(config, tokens)?.get_status(job_id).await?;
    println!(
        "{}\t{}\t{}",
        job.job_id,
        job.status,
        job.lift_type.as_deref().unwrap_or("-")
    );
    Ok(())
}

async fn results(
    config: &AppConfig,
    tokens: Arc<dyn TokenStore>,
    job_id: &str,
) -> anyhow::Result<()> {
    let orchestrator = orchestrator(config, tokens)?;
    print_results(&orchestrator, job_id).await
}

async fn print_results(orchestrator: &JobOrchestrator, job_id: &str) -> anyhow::Result<()> {
    let results = orchestrator
        .get_results(job_id)
        .await
        .with_context(|| format!("Failed to fetch results for {}", job_id))?;
    println!("{}\t{}", results.job_id, results.status);
    for url in &results.urls {
        println!("  {:<10} {}", url.name.to_string(), url.url);
    }
    Ok(())
}

async fn watch(
    config: &AppConfig,
    tokens: Arc<dyn TokenStore>,
    job_id: &str,
    policy: &PollPolicy,
) -> anyhow::Result<()> {
    let orchestrator = orchestrator(config, tokens)?;
    let mut last = None;
    loop {
        let job = orchestrator.get_status(job_id).await?;
        if last.as_ref() != Some(&job.status) {
            println!("[{}] {} {}", format_timestamp(), job.job_id, job.status);
            last = Some(job.status.clone());
        }
        if job.status.is_terminal() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

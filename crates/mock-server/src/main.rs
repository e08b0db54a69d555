use clap::Parser;
use mock_server::{StubConfig, StubServer};
use std::net::SocketAddr;

/// liftlens 用のスタブバックエンド
#[derive(Parser, Debug)]
#[command(name = "mock-server", version)]
struct Args {
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// 固定のジョブID（省略時はランダム）
    #[arg(long)]
    job_id: Option<String>,

    /// ストレージPUTが返すHTTPステータス
    #[arg(long, default_value_t = 200)]
    storage_status: u16,

    /// GET /jobs/{id} が順に返すステータス
    #[arg(long, value_delimiter = ',', default_value = "pending,processing,complete")]
    poll_statuses: Vec<String>,

    #[arg(long)]
    expected_token: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = StubConfig {
        job_id: args.job_id,
        storage_status: args.storage_status,
        poll_statuses: args.poll_statuses,
        expected_token: args.expected_token,
        ..StubConfig::default()
    };

    let bind: SocketAddr = ([127, 0, 0, 1], args.port).into();
    let server = StubServer::start_on(bind, config).await;
    log::info!("mock server ready at {}", server.base_url());

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {}", e);
    }
    log::info!("shutting down");
}

// ABOUTME: workflowd-agent binary - dials the dispatcher and executes the commands it receives
// ABOUTME: --version prints version and build time; Ctrl+C cancels running tasks and exits

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use workflowd_agent::{AgentRuntime, ProcessExecutor, ProcessExecutorConfig, RuntimeExit};
use workflowd_grpc::ChannelConfig;

const BUILD_TIME: &str = match option_env!("WORKFLOWD_BUILD_TIME") {
    Some(t) => t,
    None => "unknown",
};

#[derive(Parser)]
#[command(name = "workflowd-agent")]
#[command(about = "Agent that executes commands pushed by the workflowd dispatcher")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Print current version and exit
    #[arg(long)]
    version: bool,

    /// Dispatcher address
    #[arg(
        short,
        long,
        env = "WORKFLOWD_SERVER",
        default_value = "http://127.0.0.1:50051"
    )]
    server: String,

    /// Seconds to wait for the connection to the dispatcher
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Kill a command after this many seconds (0 = no limit)
    #[arg(short, long, default_value_t = 0)]
    timeout: u64,

    /// Debug-level logging for workflowd crates
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Agent Version: {}", env!("CARGO_PKG_VERSION"));
        println!("Build Time: {BUILD_TIME}");
        return Ok(());
    }

    workflowd_log::init(cli.verbose);

    let executor = ProcessExecutor::new(ProcessExecutorConfig {
        timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
    });
    let runtime = AgentRuntime::new(Arc::new(executor));
    let channel = ChannelConfig::new(&cli.server)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            tracing::info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        });
    }

    let exit = runtime.run(&channel, cancel).await.inspect_err(|e| {
        tracing::error!(error = %e, "Agent failed");
    })?;
    match exit {
        RuntimeExit::StreamClosed => tracing::info!("Dispatcher closed the stream"),
        RuntimeExit::Cancelled => tracing::info!("Agent stopped"),
    }
    Ok(())
}

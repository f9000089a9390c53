// ABOUTME: workflowd-server binary - resolves configuration and runs the dispatcher
// ABOUTME: --version prints version and build time, otherwise serves until interrupted

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use workflowd_server::{Config, ServeConfig};

const BUILD_TIME: &str = match option_env!("WORKFLOWD_BUILD_TIME") {
    Some(t) => t,
    None => "unknown",
};

#[derive(Parser)]
#[command(name = "workflowd-server")]
#[command(about = "Dispatcher that pushes commands to connected workflowd agents")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Print current version and exit
    #[arg(long)]
    version: bool,

    /// Config file (default: ./config.toml, then ~/.workflowd/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Debug-level logging for workflowd crates
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("APIServer Version: {}", env!("CARGO_PKG_VERSION"));
        println!("Build Time: {BUILD_TIME}");
        return Ok(());
    }

    workflowd_log::init(cli.verbose);

    let (config, path) = Config::resolve(cli.config.as_deref())?;
    tracing::info!(path = %path.display(), "Loaded config");

    let mut serve_config = ServeConfig::from(&config);
    if let Some(listen) = cli.listen {
        serve_config.listen_addr = listen;
    }

    workflowd_server::run(serve_config).await
}

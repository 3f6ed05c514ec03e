use std::net::SocketAddr;

use anyhow::Context;
use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        None => {
            // A missing .env in the working directory is fine.
            let _ = dotenvy::dotenv();
        }
    }

    server::logger::init(&args.log);

    let config = config::Config::from_env()?;
    let port = args.port.unwrap_or(config.server.port);
    let listen_address = SocketAddr::from(([0, 0, 0, 0], port));

    let shutdown_signal = CancellationToken::new();
    {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutdown requested");
                shutdown_signal.cancel();
            }
        });
    }

    server::serve(server::ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_owned(),
        bound_addr_sender: None,
    })
    .await
}

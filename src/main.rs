//! Server binary: parse configuration, install signal handling, serve.

use std::sync::Arc;

use anyhow::Result;

use cloak_server::config::CliArgs;
use cloak_server::logger::{self, log};
use cloak_server::Server;

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    args.validate()?;

    logger::init(args.log_level());

    log::info!(
        listen = %args.listen,
        tcp_timeout = ?args.tcp_timeout,
        udp_timeout = ?args.udp_timeout,
        "Starting relay server"
    );

    let server = Arc::new(Server::new(
        &args.listen,
        &args.password,
        args.tcp_timeout,
        args.udp_timeout,
    )?);

    // Graceful shutdown on SIGINT/SIGTERM.
    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
                let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
                tokio::select! {
                    _ = sigint.recv() => log::info!("SIGINT received, shutting down"),
                    _ = sigterm.recv() => log::info!("SIGTERM received, shutting down"),
                }
            }

            #[cfg(not(unix))]
            {
                tokio::signal::ctrl_c().await.ok();
                log::info!("Shutdown signal received");
            }

            server.shutdown();
        });
    }

    server.listen_and_serve().await?;
    Ok(())
}

//! burrowd - point-to-point encrypted tunnel daemon
//!
//! Bridges a TUN device with an encrypted UDP rendezvous transport so two
//! endpoints can exchange IP traffic across an untrusted network while
//! discovering each other through a shared handshake phrase.

mod config;
mod iface;
mod packet;
mod relay;
mod supervisor;

use anyhow::Context;
use burrow_net::{Cipher, ClientSocket, RendezvousSocket, ServerSocket};
use clap::Parser;
use config::{Config, Role};
use iface::TunInterface;
use std::process::ExitCode;
use supervisor::ParentWatcher;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    let level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive(format!("burrowd={level}").parse().unwrap())
                .add_directive(format!("burrow_net={level}").parse().unwrap()),
        )
        .init();

    info!(
        "burrowd v{} - encrypted tunnel daemon",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(reason) => {
            info!(?reason, "exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<relay::Shutdown> {
    let cipher = Cipher::new(&config.key);
    info!(fingerprint = %cipher.fingerprint(), "shared key loaded");

    let iface = TunInterface::open(&config).context("failed to bring up virtual interface")?;
    let (addr, dest) = config.tunnel_addrs();
    info!(
        %addr, %dest, netmask = %config.netmask, mtu = config.mtu,
        "virtual interface up"
    );

    let socket = match config.role {
        Role::Server => {
            let server = ServerSocket::bind(config.rendezvous, cipher.clone())
                .await
                .context("failed to bind rendezvous socket")?;
            info!(listen = %server.local_addr()?, "running as server");
            RendezvousSocket::Server(server)
        }
        Role::Client => {
            let client = ClientSocket::connect(config.rendezvous)
                .await
                .context("failed to open rendezvous socket")?;
            info!(peer = %client.peer(), "running as client");
            RendezvousSocket::Client(client)
        }
    };

    let watcher = ParentWatcher::new(config.parent_pid);

    let reason = relay::run(
        iface,
        socket,
        cipher,
        watcher,
        config.mtu as usize,
        terminated(),
    )
    .await?;
    Ok(reason)
}

/// Resolves on SIGTERM or an interactive interrupt; both terminate the
/// relay identically.
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(err) => {
            error!(%err, "SIGTERM handler unavailable");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

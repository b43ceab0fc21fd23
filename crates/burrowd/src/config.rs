//! Configuration for burrowd

use clap::{Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};

/// burrowd - point-to-point encrypted tunnel daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "burrowd")]
#[command(about = "Bridges a TUN device with an encrypted UDP rendezvous transport")]
pub struct Config {
    /// Endpoint role
    #[arg(long, value_enum)]
    pub role: Role,

    /// Tunnel address of the server endpoint
    #[arg(long)]
    pub server_ip: Ipv4Addr,

    /// Tunnel address of the client endpoint
    #[arg(long)]
    pub client_ip: Ipv4Addr,

    /// Shared tunnel key
    #[arg(long, env = "BURROW_KEY")]
    pub key: String,

    /// Rendezvous bind address (server role) or target address (client role)
    #[arg(long, default_value_t = default_rendezvous())]
    pub rendezvous: SocketAddr,

    /// Tunnel netmask
    #[arg(long, default_value = "255.255.255.0")]
    pub netmask: Ipv4Addr,

    /// Tunnel MTU
    #[arg(long, default_value = "1400")]
    pub mtu: u16,

    /// Supervising parent process; the daemon exits when it goes away
    #[arg(long)]
    pub parent_pid: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Which end of the tunnel this process is.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

fn default_rendezvous() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, burrow_net::RENDEZVOUS_PORT))
}

impl Config {
    /// Local and remote tunnel addresses for this role.
    pub fn tunnel_addrs(&self) -> (Ipv4Addr, Ipv4Addr) {
        match self.role {
            Role::Server => (self.server_ip, self.client_ip),
            Role::Client => (self.client_ip, self.server_ip),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key.is_empty() {
            anyhow::bail!("Shared key cannot be empty");
        }
        if self.mtu < 576 {
            anyhow::bail!("MTU below the IPv4 minimum of 576");
        }
        if self.server_ip == self.client_ip {
            anyhow::bail!("Server and client tunnel addresses must differ");
        }
        Ok(())
    }
}

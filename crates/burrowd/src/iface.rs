//! Virtual interface adapter
//!
//! Wraps the TUN device behind the narrow one-packet-at-a-time surface the
//! relay loop needs, instead of handing the whole device around.

use crate::config::Config;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use tun::AsyncDevice;

/// Packet I/O surface over the virtual interface.
#[allow(async_fn_in_trait)]
pub trait PacketIo {
    /// Read one packet into `buf`, returning its length.
    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one packet.
    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Release the device.
    fn close(self);
}

/// TUN-backed implementation.
pub struct TunInterface {
    device: AsyncDevice,
}

impl TunInterface {
    /// Configure and bring up the TUN device. Failure here is fatal setup
    /// and must abort startup before the relay loop begins.
    pub fn open(config: &Config) -> tun::Result<Self> {
        let (addr, dest) = config.tunnel_addrs();

        let mut tun_config = tun::Configuration::default();
        tun_config
            .address(addr)
            .destination(dest)
            .netmask(config.netmask)
            .mtu(config.mtu as i32)
            .up();

        let device = tun::create_as_async(&tun_config)?;
        Ok(Self { device })
    }
}

impl PacketIo for TunInterface {
    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.read(buf).await
    }

    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.device.write_all(packet).await
    }

    fn close(self) {
        debug!("virtual interface shutting down");
        drop(self.device);
    }
}

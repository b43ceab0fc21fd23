//! Relay loop bridging the virtual interface and the rendezvous socket
//!
//! A single task owns both handles and the peer registry, so there is no
//! locking anywhere on the datapath. Each iteration waits on the interface,
//! the socket, a bounded maintenance tick, and the shutdown signal; the
//! tick guarantees the loop regains control even under total I/O idleness.

use crate::iface::PacketIo;
use crate::packet;
use crate::supervisor::ParentWatcher;
use burrow_net::rendezvous::{RendezvousError, RendezvousSocket};
use burrow_net::{envelope, Cipher};
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Cadence of the maintenance wake. Bounds how long termination and
/// parent-death detection can lag behind.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(500);

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Virtual interface error: {0}")]
    Interface(#[from] io::Error),
}

/// Why the loop ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Shutdown {
    /// Termination signal delivered
    Signal,
    /// Supervising parent went away
    ParentGone,
}

/// One loop wake-up. Every readiness source maps to exactly one variant,
/// so the handling below stays exhaustive.
enum Wake {
    Terminate,
    Tick,
    FromInterface(io::Result<usize>),
    FromSocket(Result<Option<Vec<u8>>, RendezvousError>),
}

/// Seal an outbound frame for the wire. The server role seals inside its
/// own send path; client datagrams cross the socket as-is, so the sealing
/// happens here.
async fn send_frame(
    socket: &mut RendezvousSocket,
    cipher: &Cipher,
    frame: &[u8],
) -> Result<(), RendezvousError> {
    match socket {
        RendezvousSocket::Server(_) => socket.send(frame).await,
        RendezvousSocket::Client(_) => {
            let sealed = cipher.encrypt(&envelope::encode(envelope::unix_now(), frame))?;
            socket.send(&sealed).await
        }
    }
}

/// Recover the outer frame from a received datagram. The server role hands
/// back already-unsealed frames; the client role hands back the sealed
/// blob verbatim, which is opened here. Undecryptable and truncated blobs
/// are dropped.
fn open_frame(socket: &RendezvousSocket, cipher: &Cipher, datagram: Vec<u8>) -> Option<Vec<u8>> {
    match socket {
        RendezvousSocket::Server(_) => Some(datagram),
        RendezvousSocket::Client(_) => {
            let body = match cipher.decrypt(&datagram) {
                Ok(body) => body,
                Err(err) => {
                    debug!(%err, "datagram dropped");
                    return None;
                }
            };
            match envelope::decode(&body) {
                Ok((_, frame)) => Some(frame.to_vec()),
                Err(err) => {
                    debug!(%err, "envelope dropped");
                    None
                }
            }
        }
    }
}

/// Drive the datapath until a shutdown condition, then close both handles.
///
/// Cancellation is cooperative: a termination request is observed at the
/// next wake, never preempting an in-flight read or write.
pub async fn run<I, F>(
    mut iface: I,
    mut socket: RendezvousSocket,
    cipher: Cipher,
    watcher: ParentWatcher,
    mtu: usize,
    shutdown: F,
) -> Result<Shutdown, RelayError>
where
    I: PacketIo,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut tick = time::interval(MAINTENANCE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut iface_buf = vec![0u8; mtu];

    let outcome = loop {
        let wake = tokio::select! {
            biased;
            _ = &mut shutdown => Wake::Terminate,
            _ = tick.tick() => Wake::Tick,
            read = iface.read_packet(&mut iface_buf) => Wake::FromInterface(read),
            received = socket.receive() => Wake::FromSocket(received),
        };

        match wake {
            Wake::Terminate => {
                info!("termination requested");
                break Ok(Shutdown::Signal);
            }
            Wake::Tick => {
                // Maintenance rides the tick, keeping liveness checks
                // bounded by MAINTENANCE_INTERVAL regardless of how often
                // I/O wakes fire.
                if !watcher.parent_alive() {
                    info!("parent process gone");
                    break Ok(Shutdown::ParentGone);
                }
                socket.maintain().await;
            }
            Wake::FromInterface(Ok(len)) => {
                debug!(len, "interface -> tunnel");
                match packet::serialize(&iface_buf[..len]) {
                    Ok(frame) => {
                        if let Err(err) = send_frame(&mut socket, &cipher, &frame).await {
                            warn!(%err, "tunnel send failed");
                        }
                    }
                    Err(err) => warn!(%err, "outbound packet dropped"),
                }
            }
            Wake::FromInterface(Err(err)) => {
                warn!(%err, "virtual interface read failed");
                break Err(RelayError::Interface(err));
            }
            Wake::FromSocket(Ok(Some(datagram))) => {
                if let Some(frame) = open_frame(&socket, &cipher, datagram) {
                    match packet::parse(&frame) {
                        Ok(data) => {
                            debug!(len = data.len(), "tunnel -> interface");
                            if let Err(err) = iface.write_packet(&data).await {
                                warn!(%err, "interface write failed");
                            }
                        }
                        Err(err) => warn!(%err, "malformed packet dropped"),
                    }
                }
            }
            // Handshake, undecryptable, or stray traffic already digested
            // by the socket.
            Wake::FromSocket(Ok(None)) => {}
            Wake::FromSocket(Err(err)) => {
                debug!(%err, "receive failed, datagram dropped");
            }
        }
    };

    iface.close();
    socket.close();
    outcome
}

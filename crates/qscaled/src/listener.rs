//! UDP listener with fragment reassembly.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use qscale_ingest::IngestPool;
use qscale_relay::Forwarder;

/// Upper bound on a reassembled payload; anything longer is flushed as is.
const MAX_PAYLOAD: usize = 64 * 1024;

/// Joins reads that filled the receive buffer with the reads that follow
/// from the same peer.
///
/// A read shorter than the buffer completes that peer's payload.
#[derive(Debug)]
pub struct Reassembler {
    buf_size: usize,
    pending: HashMap<SocketAddr, Vec<u8>>,
}

impl Reassembler {
    /// Reassembler for reads into a buffer of `buf_size` bytes.
    pub fn new(buf_size: usize) -> Self {
        Self {
            buf_size,
            pending: HashMap::new(),
        }
    }

    /// Feed one read from `peer`. Returns the completed payload, if any.
    pub fn push(&mut self, peer: SocketAddr, chunk: &[u8]) -> Option<Vec<u8>> {
        let pending = self.pending.entry(peer).or_default();
        pending.extend_from_slice(chunk);
        if chunk.len() == self.buf_size && pending.len() < MAX_PAYLOAD {
            return None;
        }
        self.pending.remove(&peer)
    }

    /// Bytes buffered for `peer`.
    pub fn pending_len(&self, peer: &SocketAddr) -> usize {
        self.pending.get(peer).map_or(0, Vec::len)
    }
}

pub struct Listener {
    socket: UdpSocket,
    max_datagram: usize,
}

impl Listener {
    /// Bind the UDP socket; reads use a `max_datagram` byte buffer.
    pub async fn bind(addr: &str, max_datagram: usize) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            max_datagram: max_datagram.max(1),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until shutdown. Each completed payload goes to the pool
    /// (blocking when its lane is full) and then to the forwarder.
    pub async fn run(
        self,
        pool: &IngestPool,
        forwarder: &Forwarder,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.max_datagram];
        let mut reassembler = Reassembler::new(self.max_datagram);

        info!(addr = %self.local_addr()?, "udp listener started");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (n, peer) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "udp receive failed");
                            continue;
                        }
                    };
                    let Some(payload) = reassembler.push(peer, &buf[..n]) else {
                        debug!(%peer, pending = reassembler.pending_len(&peer), "fragment buffered");
                        continue;
                    };
                    if payload.is_empty() {
                        continue;
                    }
                    let copy = (!forwarder.is_empty()).then(|| payload.clone());
                    pool.submit(payload).await?;
                    if let Some(copy) = copy {
                        forwarder.dispatch(copy);
                    }
                }
                _ = shutdown.changed() => {
                    info!("udp listener shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

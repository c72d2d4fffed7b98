//! Raw payload duplication to auxiliary syslog collectors.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use qscale_core::ForwardConfig;

use crate::error::{RelayError, RelayResult};

/// Attempts per payload per target.
const SEND_ATTEMPTS: usize = 2;

#[derive(Debug)]
struct RsyslogTarget {
    address: String,
    socket: UdpSocket,
}

impl RsyslogTarget {
    async fn connect(address: &str) -> RelayResult<Self> {
        let peer: SocketAddr = tokio::net::lookup_host(address)
            .await
            .map_err(|source| RelayError::Resolve {
                address: address.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| RelayError::NoAddress(address.to_string()))?;

        let local = if peer.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket_err = |source| RelayError::Socket {
            target: address.to_string(),
            source,
        };
        let socket = UdpSocket::bind(local).await.map_err(socket_err)?;
        socket.connect(peer).await.map_err(socket_err)?;

        Ok(Self {
            address: address.to_string(),
            socket,
        })
    }

    /// Send once, retrying a single time on error or short write.
    async fn send(&self, data: &[u8]) -> RelayResult<()> {
        let mut last = None;
        for attempt in 1..=SEND_ATTEMPTS {
            let err = match self.socket.send(data).await {
                Ok(n) if n == data.len() => return Ok(()),
                Ok(n) => RelayError::ShortWrite {
                    target: self.address.clone(),
                    sent: n,
                    len: data.len(),
                },
                Err(source) => RelayError::Send {
                    target: self.address.clone(),
                    source,
                },
            };
            debug!(target = %self.address, attempt, error = %err, "forward attempt failed");
            last = Some(err);
        }
        Err(last.unwrap_or_else(|| RelayError::NoAddress(self.address.clone())))
    }
}

/// Duplicates every completed payload to all configured targets.
#[derive(Debug, Clone, Default)]
pub struct Forwarder {
    targets: Vec<Arc<RsyslogTarget>>,
}

impl Forwarder {
    /// Open one connected UDP socket per `rsyslog` target. Other kinds are
    /// skipped with a warning; an unresolvable address is an error.
    pub async fn from_configs(configs: &[ForwardConfig]) -> RelayResult<Self> {
        let mut targets = Vec::with_capacity(configs.len());
        for config in configs {
            if !config.kind.eq_ignore_ascii_case("rsyslog") {
                warn!(kind = %config.kind, address = %config.address, "unsupported forward kind, skipping");
                continue;
            }
            let target = RsyslogTarget::connect(&config.address).await?;
            info!(target = %config.address, "forwarding raw payloads");
            targets.push(Arc::new(target));
        }
        Ok(Self { targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Send to every target concurrently and wait. Returns how many
    /// targets received the payload.
    pub async fn forward(&self, payload: Arc<[u8]>) -> usize {
        let mut sends = JoinSet::new();
        for target in &self.targets {
            let target = Arc::clone(target);
            let payload = Arc::clone(&payload);
            sends.spawn(async move {
                let result = target.send(&payload).await;
                if let Err(e) = &result {
                    warn!(target = %target.address, error = %e, "forward failed");
                }
                result.is_ok()
            });
        }

        let mut delivered = 0;
        while let Some(joined) = sends.join_next().await {
            if matches!(joined, Ok(true)) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Fire-and-forget variant of [`forward`](Self::forward).
    pub fn dispatch(&self, payload: Vec<u8>) {
        if self.targets.is_empty() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.forward(payload.into()).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rsyslog(address: &str) -> ForwardConfig {
        ForwardConfig {
            kind: "rsyslog".into(),
            address: address.into(),
        }
    }

    async fn collector() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    async fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; 2048];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn duplicates_to_every_target() {
        let (a, a_addr) = collector().await;
        let (b, b_addr) = collector().await;
        let forwarder = Forwarder::from_configs(&[rsyslog(&a_addr), rsyslog(&b_addr)])
            .await
            .unwrap();
        assert_eq!(forwarder.len(), 2);

        let payload: Arc<[u8]> = Arc::from(&b"nginx: {\"service\":\"web\"}"[..]);
        assert_eq!(forwarder.forward(payload.clone()).await, 2);

        assert_eq!(recv(&a).await, payload.to_vec());
        assert_eq!(recv(&b).await, payload.to_vec());
    }

    #[tokio::test]
    async fn unknown_kinds_are_skipped() {
        let (_a, a_addr) = collector().await;
        let configs = [
            ForwardConfig {
                kind: "kafka".into(),
                address: "127.0.0.1:9092".into(),
            },
            rsyslog(&a_addr),
        ];
        let forwarder = Forwarder::from_configs(&configs).await.unwrap();
        assert_eq!(forwarder.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_target_is_an_error() {
        let err = Forwarder::from_configs(&[rsyslog("not an address")])
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Resolve { .. }));
    }

    #[tokio::test]
    async fn dispatch_delivers_in_background() {
        let (a, a_addr) = collector().await;
        let forwarder = Forwarder::from_configs(&[rsyslog(&a_addr)]).await.unwrap();

        forwarder.dispatch(b"hello".to_vec());
        assert_eq!(recv(&a).await, b"hello");
    }

    #[tokio::test]
    async fn empty_forwarder_is_a_no_op() {
        let forwarder = Forwarder::default();
        assert!(forwarder.is_empty());
        assert_eq!(forwarder.forward(Arc::from(&b"x"[..])).await, 0);
    }
}

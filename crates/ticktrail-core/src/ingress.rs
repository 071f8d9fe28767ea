//! UDP ingress: the single producer feeding the pipeline.
//!
//! Each datagram is copied into the raw queue with `try_send`, so a slow
//! consumer never stalls the socket. When the queue is full the datagram is
//! shed. Shedding is data loss and is always logged: once when an episode
//! starts and once, with the total, when the queue accepts again.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;
use crate::shutdown::ShutdownSignal;

/// A bound telemetry socket.
#[derive(Debug)]
pub struct Ingress {
    socket: UdpSocket,
    max_datagram_bytes: usize,
}

impl Ingress {
    /// Bind the socket.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, max_datagram_bytes: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "telemetry ingress listening");
        Ok(Self {
            socket,
            max_datagram_bytes: max_datagram_bytes.max(1),
        })
    }

    /// The address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until shutdown is requested or the queue closes.
    ///
    /// Dropping `queue` on return is what lets downstream stages drain.
    pub async fn run(
        self,
        queue: mpsc::Sender<Vec<u8>>,
        metrics: Arc<PipelineMetrics>,
        shutdown: Arc<ShutdownSignal>,
    ) {
        let mut buf = vec![0_u8; self.max_datagram_bytes];
        let mut shed = Shedding::default();

        loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received,
                () = shutdown.wait() => break,
            };

            let len = match received {
                Ok((len, peer)) => {
                    debug!(%peer, len, "datagram received");
                    len
                }
                Err(e) => {
                    warn!(error = %e, "UDP receive error");
                    continue;
                }
            };
            metrics.record_received();

            let payload = buf.get(..len).unwrap_or_default().to_vec();
            match queue.try_send(payload) {
                Ok(()) => shed.recovered(),
                Err(TrySendError::Full(_)) => {
                    metrics.record_dropped();
                    shed.dropped();
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("raw queue closed, ingress stopping");
                    break;
                }
            }
        }

        shed.recovered();
        info!("telemetry ingress stopped");
    }
}

/// Tracks one shedding episode for logging.
#[derive(Debug, Default)]
struct Shedding {
    dropped: u64,
}

impl Shedding {
    fn dropped(&mut self) {
        if self.dropped == 0 {
            warn!("raw queue full, shedding datagrams (data loss)");
        }
        self.dropped = self.dropped.saturating_add(1);
    }

    fn recovered(&mut self) {
        if self.dropped > 0 {
            warn!(
                dropped = self.dropped,
                "shedding episode ended, datagrams were lost"
            );
            self.dropped = 0;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn bound() -> Ingress {
        Ingress::bind("127.0.0.1:0".parse().unwrap(), 2048)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn forwards_datagrams_in_order() {
        let ingress = bound().await;
        let addr = ingress.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = Arc::new(PipelineMetrics::new());
        let shutdown = Arc::new(ShutdownSignal::new());
        let task = tokio::spawn(ingress.run(tx, Arc::clone(&metrics), Arc::clone(&shutdown)));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"one", addr).await.unwrap();
        sender.send_to(b"two", addr).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(first.unwrap(), b"one");
        assert_eq!(second.unwrap(), b"two");

        shutdown.request();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(metrics.snapshot().received, 2);
    }

    #[tokio::test]
    async fn full_queue_sheds_and_counts() {
        let ingress = bound().await;
        let addr = ingress.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let metrics = Arc::new(PipelineMetrics::new());
        let shutdown = Arc::new(ShutdownSignal::new());
        let task = tokio::spawn(ingress.run(tx, Arc::clone(&metrics), Arc::clone(&shutdown)));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..3 {
            sender.send_to(b"x", addr).await.unwrap();
        }

        let deadline = tokio::time::Instant::now()
            .checked_add(Duration::from_secs(2))
            .unwrap();
        while metrics.snapshot().received < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.request();
        task.await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 3);
        assert_eq!(snapshot.dropped, 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}

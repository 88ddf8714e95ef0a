//! RTMP accept loop
//!
//! Accepts TCP connections, enforces the connection limit and spawns one
//! [`Connection`] task per socket. Stops accepting when the shutdown token
//! fires; live connections see the same token and wind down on their own.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use super::config::IngestConfig;
use super::connection::Connection;
use crate::error::Result;
use crate::relay::SessionGate;
use crate::shutdown::Shutdown;
use crate::stats::StreamStats;

pub struct IngestServer<G: SessionGate> {
    config: IngestConfig,
    gate: Arc<G>,
    stats: Arc<StreamStats>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<G: SessionGate> IngestServer<G> {
    pub fn new(config: IngestConfig, gate: Arc<G>, stats: Arc<StreamStats>) -> Self {
        let connection_semaphore =
            (config.max_connections > 0).then(|| Arc::new(Semaphore::new(config.max_connections)));

        Self {
            config,
            gate,
            stats,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Bind the configured address
    ///
    /// Kept separate from [`serve`](Self::serve) so a bind failure surfaces
    /// at startup, before anything is spawned.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "RTMP ingest listening");
        Ok(listener)
    }

    /// Accept until shutdown
    pub async fn serve(&self, listener: TcpListener, mut shutdown: Shutdown) -> Result<()> {
        let token = shutdown.clone();

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("RTMP ingest stopped accepting");
            }
            _ = self.accept_loop(&listener, token) => {}
        }
        Ok(())
    }

    async fn accept_loop(&self, listener: &TcpListener, shutdown: Shutdown) {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, shutdown.clone());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr, shutdown: Shutdown) {
        let permit = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(session_id = session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let connection = Connection::new(
            session_id,
            socket,
            peer_addr,
            self.config.clone(),
            Arc::clone(&self.gate),
            Arc::clone(&self.stats),
            shutdown,
        );

        tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                tracing::debug!(session_id = session_id, error = %e, "Connection error");
            }
            drop(permit);
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{RelayConfig, StreamRegistry};
    use crate::shutdown;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn server(max_connections: usize) -> IngestServer<StreamRegistry> {
        let stats = Arc::new(StreamStats::new());
        let registry = Arc::new(StreamRegistry::new(
            "key",
            RelayConfig::default(),
            Arc::clone(&stats),
        ));
        let config = IngestConfig::with_addr("127.0.0.1:0".parse().unwrap())
            .max_connections(max_connections);
        IngestServer::new(config, registry, stats)
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let stats = Arc::new(StreamStats::new());
        let registry = Arc::new(StreamRegistry::new("key", RelayConfig::default(), Arc::clone(&stats)));
        let server = IngestServer::new(IngestConfig::with_addr(addr), registry, stats);

        assert!(server.bind().await.is_err());
    }

    #[tokio::test]
    async fn test_serve_returns_on_shutdown() {
        let server = Arc::new(server(0));
        let listener = server.bind().await.unwrap();
        let (trigger, token) = shutdown::channel();

        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener, token).await }
        });

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_closes_extra_sockets() {
        let server = Arc::new(server(1));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_trigger, token) = shutdown::channel();

        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener, token).await }
        });

        let _first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}

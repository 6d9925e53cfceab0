//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::operations::OperationCoordinator;
use crate::coordinator::session::handle_connection;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Coordinator {
    config: CoordinatorConfig,
    listener: TcpListener,
    ops: Arc<OperationCoordinator>,
}

impl Coordinator {
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let ops = Arc::new(OperationCoordinator::new(
            config.replication_factor,
            config.timeout(),
        ));
        Ok(Self {
            config,
            listener,
            ops,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn operations(&self) -> Arc<OperationCoordinator> {
        self.ops.clone()
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!("Starting coordinator");
        tracing::info!("  Listening: {}", self.local_addr()?);
        tracing::info!("  Replication factor: {}", self.config.replication_factor);
        tracing::info!("  Timeout: {} ms", self.config.timeout_ms);
        tracing::info!(
            "  Rebalance period: {} ms (rebalancing disabled)",
            self.config.rebalance_period_ms
        );

        tracing::info!("✓ Coordinator ready");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let ops = self.ops.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, ops).await {
                            tracing::warn!("Connection {} closed with error: {}", peer, e);
                        }
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("Coordinator shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

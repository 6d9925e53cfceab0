//! Storage node server

use crate::common::protocol::{
    tokens, write_line, DataRequest, ReplicaCommand, ReplicaMessage,
};
use crate::common::{retry_with_backoff, Error, ReplicaConfig, ReplicaId, Result};
use crate::replica::store::FileStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const JOIN_RETRIES: usize = 16;
const JOIN_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct ReplicaServer {
    config: ReplicaConfig,
    listener: TcpListener,
    store: Arc<FileStore>,
}

impl ReplicaServer {
    pub async fn bind(config: ReplicaConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(FileStore::open(&config.data_dir, config.clean_on_start).await?);
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self {
            config,
            listener,
            store,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The identity announced to the coordinator
    pub fn id(&self) -> Result<ReplicaId> {
        Ok(ReplicaId(self.local_addr()?.port()))
    }

    pub fn store(&self) -> Arc<FileStore> {
        self.store.clone()
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let id = self.id()?;
        tracing::info!("Starting replica {}", id);
        tracing::info!("  Listening: {}", self.local_addr()?);
        tracing::info!("  Coordinator: {}", self.config.coordinator_addr);
        tracing::info!("  Data directory: {}", self.store.root().display());

        let coordinator = join_coordinator(self.config.coordinator_addr, id, self.config.timeout())
            .await?;
        let (read_half, mut write_half) = coordinator.into_split();

        // Single writer towards the coordinator, shared by all client tasks
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(line) = control_rx.recv().await {
                tracing::debug!("-> coordinator: {}", line);
                if let Err(e) = write_line(&mut write_half, &line).await {
                    tracing::warn!("Write to coordinator failed: {}", e);
                    break;
                }
            }
        });

        let controller = {
            let store = self.store.clone();
            let control_tx = control_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("<- coordinator: {}", line);
                    if let Some(reply) = handle_command(&store, &line).await {
                        if control_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
            })
        };
        tokio::pin!(controller);

        tracing::info!("✓ Replica {} ready", id);

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let store = self.store.clone();
                    let control_tx = control_tx.clone();
                    let timeout = self.config.timeout();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, store, control_tx, timeout).await {
                            tracing::warn!("Client {} closed with error: {}", peer, e);
                        }
                    });
                }
                _ = &mut controller => {
                    break Err(Error::ConnectionFailed("coordinator closed the connection".into()));
                }
                _ = &mut shutdown => {
                    tracing::info!("Replica {} shutting down", id);
                    break Ok(());
                }
            }
        };

        controller.abort();
        writer.abort();
        result
    }
}

async fn join_coordinator(addr: SocketAddr, id: ReplicaId, timeout: Duration) -> Result<TcpStream> {
    let connect = retry_with_backoff(
        || async move {
            TcpStream::connect(addr)
                .await
                .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))
        },
        JOIN_RETRIES,
        JOIN_RETRY_DELAY,
    );
    let mut stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| Error::ConnectionFailed(format!("coordinator {} unreachable", addr)))??;

    write_line(&mut stream, &format!("{} {}", tokens::JOIN, id)).await?;
    tracing::info!("Joined coordinator at {}", addr);
    Ok(stream)
}

/// Answer one coordinator command; `None` means no reply is due.
pub async fn handle_command(store: &FileStore, line: &str) -> Option<String> {
    let command = match ReplicaCommand::parse(line) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("Ignoring coordinator line {:?}: {}", line, e);
            return None;
        }
    };

    match command {
        ReplicaCommand::List => match store.list() {
            Ok(names) => Some(ReplicaMessage::List(names).to_string()),
            Err(e) => {
                tracing::error!("Listing files failed: {}", e);
                None
            }
        },
        ReplicaCommand::Remove { filename } => match store.remove(&filename).await {
            Ok(true) => Some(ReplicaMessage::RemoveAck(filename).to_string()),
            Ok(false) => Some(ReplicaMessage::RemoveMissing(filename).to_string()),
            Err(e) => {
                // No answer: the coordinator's deadline reports the failure
                tracing::error!("Removing {} failed: {}", filename, e);
                None
            }
        },
        ReplicaCommand::Rebalance(args) => {
            tracing::debug!("Ignoring rebalance request ({})", args);
            None
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    store: Arc<FileStore>,
    control_tx: mpsc::UnboundedSender<String>,
    timeout: Duration,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end();
        tracing::debug!("<- client: {}", line);

        match DataRequest::parse(line) {
            Ok(DataRequest::Store { filename, size }) => {
                write_line(&mut write_half, tokens::ACK).await?;
                store
                    .put_from(&filename, &mut reader, size, timeout)
                    .await?;
                tracing::info!("Stored {} ({} bytes)", filename, size);
                control_tx
                    .send(ReplicaMessage::StoreAck(filename).to_string())
                    .map_err(|_| Error::ConnectionFailed("coordinator link closed".into()))?;
            }
            Ok(DataRequest::LoadData { filename }) => match store.get(&filename).await? {
                Some(data) => {
                    write_half.write_all(&data).await?;
                    write_half.flush().await?;
                }
                None => {
                    // Closing tells the client to ask the coordinator for another replica
                    tracing::debug!("{} not stored here, closing", filename);
                    return Ok(());
                }
            },
            Err(e) => tracing::warn!("Ignoring client line {:?}: {}", line, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_handle_list_and_remove() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), true).await.unwrap();
        store.put("a.txt", b"abc").await.unwrap();

        assert_eq!(
            handle_command(&store, "LIST").await.as_deref(),
            Some("LIST a.txt")
        );
        assert_eq!(
            handle_command(&store, "REMOVE a.txt").await.as_deref(),
            Some("REMOVE_ACK a.txt")
        );
        assert_eq!(
            handle_command(&store, "REMOVE a.txt").await.as_deref(),
            Some("ERROR_FILE_DOES_NOT_EXIST a.txt")
        );
        assert_eq!(handle_command(&store, "LIST").await.as_deref(), Some("LIST"));
    }

    async fn spawn_client_handler(
        store: Arc<FileStore>,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let store = store.clone();
                let control_tx = control_tx.clone();
                tokio::spawn(async move {
                    let _ = handle_client(stream, store, control_tx, Duration::from_secs(1)).await;
                });
            }
        });
        (addr, control_rx)
    }

    #[tokio::test]
    async fn test_oversized_store_does_not_take_down_replica() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path(), true).await.unwrap());
        let (addr, mut control_rx) = spawn_client_handler(store.clone()).await;

        {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            write_line(&mut write_half, "STORE big 70368744177664")
                .await
                .unwrap();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ACK"));
            write_half.write_all(b"abc").await.unwrap();
            write_half.shutdown().await.unwrap();
            // The handler gives up and closes the connection
            assert!(lines.next_line().await.unwrap().is_none());
        }
        assert!(!store.contains("big").unwrap());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        write_line(&mut write_half, "STORE small 3").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ACK"));
        write_half.write_all(b"xyz").await.unwrap();

        assert_eq!(control_rx.recv().await.as_deref(), Some("STORE_ACK small"));
        assert_eq!(
            handle_command(&store, "LIST").await.as_deref(),
            Some("LIST small")
        );
    }

    #[tokio::test]
    async fn test_ignores_rebalance_and_garbage() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), true).await.unwrap();
        assert!(handle_command(&store, "REBALANCE 0 0").await.is_none());
        assert!(handle_command(&store, "WHAT").await.is_none());
    }
}

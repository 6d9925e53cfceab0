//! Client library
//!
//! Talks to the coordinator over one control connection and to replicas
//! directly for file contents. Replica ports announced by the coordinator
//! are resolved against the coordinator's host.

use crate::common::protocol::{tokens, write_line, ClientRequest, DataRequest, Reply};
use crate::common::{validate_filename, Error, ReplicaId, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub struct Client {
    coordinator: SocketAddr,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl Client {
    /// Connect to a coordinator.
    ///
    /// `timeout` bounds every network step; for stores and removes it
    /// should exceed the coordinator's own ACK timeout.
    pub async fn connect(coordinator: SocketAddr, timeout_after: Duration) -> Result<Self> {
        let stream = timeout(timeout_after, TcpStream::connect(coordinator))
            .await
            .map_err(|_| Error::ConnectionFailed(format!("{}: connect timed out", coordinator)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", coordinator, e)))?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            coordinator,
            lines: BufReader::new(read_half).lines(),
            writer,
            timeout: timeout_after,
        })
    }

    pub fn coordinator(&self) -> SocketAddr {
        self.coordinator
    }

    async fn send(&mut self, request: &ClientRequest) -> Result<()> {
        let line = request.to_string();
        tracing::debug!("-> coordinator: {}", line);
        write_line(&mut self.writer, &line).await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let line = timeout(self.timeout, self.lines.next_line())
            .await??
            .ok_or_else(|| Error::ConnectionFailed("coordinator closed the connection".into()))?;
        tracing::debug!("<- coordinator: {}", line);
        Reply::parse(&line)
    }

    async fn request(&mut self, request: &ClientRequest) -> Result<Reply> {
        self.send(request).await?;
        self.read_reply().await
    }

    pub async fn list(&mut self) -> Result<Vec<String>> {
        match self.request(&ClientRequest::List).await? {
            Reply::List(names) => Ok(names),
            other => Err(unexpected(other, "")),
        }
    }

    /// Store `data` under `filename` on every replica the coordinator picks.
    pub async fn store(&mut self, filename: &str, data: &[u8]) -> Result<()> {
        validate_filename(filename)?;
        let request = ClientRequest::Store {
            filename: filename.to_string(),
            size: data.len() as u64,
        };
        let targets = match self.request(&request).await? {
            Reply::StoreTo(targets) => targets,
            other => return Err(unexpected(other, filename)),
        };

        for target in &targets {
            // A failed upload is reported by the coordinator as a failed store
            if let Err(e) = self.upload(*target, filename, data).await {
                tracing::warn!("Upload of {} to replica {} failed: {}", filename, target, e);
            }
        }

        match self.read_reply().await? {
            Reply::StoreComplete => Ok(()),
            other => Err(unexpected(other, filename)),
        }
    }

    /// Fetch `filename`, falling back to other replicas until one answers.
    pub async fn load(&mut self, filename: &str) -> Result<Vec<u8>> {
        let mut reply = self
            .request(&ClientRequest::Load {
                filename: filename.to_string(),
            })
            .await?;

        loop {
            let (replica, size) = match reply {
                Reply::LoadFrom { replica, size } => (replica, size),
                other => return Err(unexpected(other, filename)),
            };

            match self.download(replica, filename, size).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    tracing::warn!("Load of {} from replica {} failed: {}", filename, replica, e);
                }
            }

            reply = self
                .request(&ClientRequest::Reload {
                    filename: filename.to_string(),
                })
                .await?;
        }
    }

    pub async fn remove(&mut self, filename: &str) -> Result<()> {
        let request = ClientRequest::Remove {
            filename: filename.to_string(),
        };
        match self.request(&request).await? {
            Reply::RemoveComplete => Ok(()),
            other => Err(unexpected(other, filename)),
        }
    }

    fn replica_addr(&self, replica: ReplicaId) -> SocketAddr {
        SocketAddr::new(self.coordinator.ip(), replica.port())
    }

    async fn open_replica(&self, replica: ReplicaId) -> Result<TcpStream> {
        let addr = self.replica_addr(replica);
        timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionFailed(format!("{}: connect timed out", addr)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))
    }

    async fn upload(&self, replica: ReplicaId, filename: &str, data: &[u8]) -> Result<()> {
        let stream = self.open_replica(replica).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let header = DataRequest::Store {
            filename: filename.to_string(),
            size: data.len() as u64,
        };
        write_line(&mut write_half, &header.to_string()).await?;

        match timeout(self.timeout, lines.next_line()).await?? {
            Some(line) if line.trim() == tokens::ACK => {}
            Some(line) => return Err(Error::Protocol(format!("expected ACK, got {:?}", line))),
            None => return Err(Error::ConnectionFailed("replica closed before ACK".into())),
        }

        write_half.write_all(data).await?;
        write_half.flush().await?;
        Ok(())
    }

    async fn download(&self, replica: ReplicaId, filename: &str, size: u64) -> Result<Vec<u8>> {
        let mut stream = self.open_replica(replica).await?;
        let request = DataRequest::LoadData {
            filename: filename.to_string(),
        };
        write_line(&mut stream, &request.to_string()).await?;

        let mut data = vec![0u8; size as usize];
        timeout(self.timeout, stream.read_exact(&mut data)).await??;
        Ok(data)
    }
}

fn unexpected(reply: Reply, filename: &str) -> Error {
    match reply {
        Reply::Error(token) => Error::from_wire_token(&token, filename),
        other => Error::Protocol(format!("unexpected reply: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn scripted_coordinator(script: Vec<(&'static str, &'static str)>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            for (expect, reply) in script {
                let line = lines.next_line().await.unwrap().unwrap();
                assert_eq!(line, expect);
                write_line(&mut write_half, reply).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_list_and_errors() {
        let addr = scripted_coordinator(vec![
            ("LIST", "LIST a.txt b.txt"),
            ("REMOVE gone", "ERROR_FILE_DOES_NOT_EXIST"),
            ("LOAD gone", "ERROR_FILE_DOES_NOT_EXIST"),
        ])
        .await;

        let mut client = Client::connect(addr, Duration::from_secs(2)).await.unwrap();
        assert_eq!(client.list().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert!(matches!(client.remove("gone").await, Err(Error::NotFound(_))));
        assert!(matches!(client.load("gone").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_exhausted_after_reload() {
        // Port 1 refuses connections, so the client must fall back to RELOAD
        let addr = scripted_coordinator(vec![
            ("LOAD f", "LOAD_FROM 1 3"),
            ("RELOAD f", "ERROR_LOAD"),
        ])
        .await;

        let mut client = Client::connect(addr, Duration::from_secs(2)).await.unwrap();
        assert!(matches!(
            client.load("f").await,
            Err(Error::LoadExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_store_rejected_before_upload() {
        let addr = scripted_coordinator(vec![("STORE f 3", "ERROR_NOT_ENOUGH_DSTORES")]).await;

        let mut client = Client::connect(addr, Duration::from_secs(2)).await.unwrap();
        assert!(matches!(
            client.store("f", b"abc").await,
            Err(Error::InsufficientReplicas { .. })
        ));
    }
}

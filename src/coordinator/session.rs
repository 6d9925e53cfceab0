//! Connection handling
//!
//! The first line of a connection decides what the peer is: `JOIN <port>`
//! opens a replica session, anything else a client session in which that
//! first line is already a request.

use crate::common::protocol::{parse_join, write_line, ClientRequest, Reply};
use crate::common::{Error, ReplicaId, Result};
use crate::coordinator::operations::OperationCoordinator;
use crate::coordinator::replica_link::ReplicaLink;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader, Lines};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ops: Arc<OperationCoordinator>,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let first = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(()),
    };

    match parse_join(&first) {
        Ok(Some(id)) => replica_session(id, peer, lines, write_half, ops).await,
        Ok(None) => client_session(first, peer, lines, write_half, &ops).await,
        Err(e) => {
            tracing::warn!("Rejecting {}: {}", peer, e);
            Ok(())
        }
    }
}

async fn replica_session<R>(
    id: ReplicaId,
    peer: SocketAddr,
    mut lines: Lines<R>,
    mut write_half: OwnedWriteHalf,
    ops: Arc<OperationCoordinator>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tracing::info!("Replica {} joining from {}", id, peer);
    let (link, mut outbound) = ReplicaLink::new(id);

    let writer = tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if let Err(e) = write_line(&mut write_half, &line).await {
                tracing::warn!("Replica {}: write failed: {}", id, e);
                break;
            }
        }
    });

    // Runs beside the read loop, which is what delivers the LIST answer
    let handshake = {
        let link = link.clone();
        let ops = ops.clone();
        tokio::spawn(async move {
            let files = link.request_file_list(ops.timeout()).await;
            if let Err(e) = ops.registry().register(id, link, files) {
                tracing::error!("Replica {}: registration failed: {}", id, e);
            }
        })
    };

    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!("<- replica {}: {}", id, line);
                link.dispatch(&line);
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(Error::from(e)),
        }
    };

    link.close();
    handshake.abort();
    let _ = handshake.await;
    ops.registry().deregister(id, &link)?;
    writer.abort();
    tracing::info!("Replica {} disconnected", id);
    result
}

async fn client_session<R>(
    first: String,
    peer: SocketAddr,
    mut lines: Lines<R>,
    mut writer: OwnedWriteHalf,
    ops: &OperationCoordinator,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tracing::debug!("Client connected from {}", peer);
    let mut next = Some(first);

    loop {
        let line = match next.take() {
            Some(line) => line,
            None => match lines.next_line().await? {
                Some(line) => line,
                None => break,
            },
        };
        tracing::debug!("<- client {}: {}", peer, line);

        let request = match ClientRequest::parse(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Client {}: ignoring {:?}: {}", peer, line, e);
                continue;
            }
        };
        handle_request(ops, request, &mut writer).await?;
    }

    tracing::debug!("Client {} disconnected", peer);
    Ok(())
}

/// Run one client request and write its reply (two replies for a store).
pub async fn handle_request<W>(
    ops: &OperationCoordinator,
    request: ClientRequest,
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let kind = request.kind();
    let outcome = match request {
        ClientRequest::List => ops.list().map(Reply::List),
        ClientRequest::Store { filename, size } => match ops.begin_store(&filename, size) {
            Ok(pending) => {
                // A failed write drops `pending`, which rolls the store back
                send_reply(writer, &Reply::StoreTo(pending.targets().to_vec())).await?;
                pending.finish().await.map(|_| Reply::StoreComplete)
            }
            Err(e) => Err(e),
        },
        ClientRequest::Load { filename } => ops.load(&filename).map(|t| Reply::LoadFrom {
            replica: t.replica,
            size: t.size,
        }),
        ClientRequest::Reload { filename } => ops.reload(&filename).map(|t| Reply::LoadFrom {
            replica: t.replica,
            size: t.size,
        }),
        ClientRequest::Remove { filename } => {
            ops.remove(&filename).await.map(|_| Reply::RemoveComplete)
        }
    };

    let reply = match outcome {
        Ok(reply) => reply,
        Err(e) => {
            match &e {
                Error::Internal(_) => tracing::error!("{:?} failed: {}", kind, e),
                _ => tracing::info!("{:?} refused: {}", kind, e),
            }
            Reply::Error(e.wire_token(kind).to_string())
        }
    };
    send_reply(writer, &reply).await
}

async fn send_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<()> {
    let line = reply.to_string();
    tracing::debug!("-> client: {}", line);
    write_line(writer, &line).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_store_refused_without_replicas() {
        let ops = OperationCoordinator::new(2, Duration::from_millis(50));
        let mut out = tokio_test::io::Builder::new()
            .write(b"ERROR_NOT_ENOUGH_DSTORES\n")
            .build();
        handle_request(
            &ops,
            ClientRequest::Store {
                filename: "a.txt".into(),
                size: 10,
            },
            &mut out,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_store_writes_targets_then_failure() {
        let ops = OperationCoordinator::new(1, Duration::from_millis(50));
        let (link, _outbound) = ReplicaLink::new(ReplicaId(4001));
        ops.registry()
            .register(ReplicaId(4001), link, Vec::new())
            .unwrap();

        let mut out = tokio_test::io::Builder::new()
            .write(b"STORE_TO 4001\n")
            .write(b"ERROR_STORE_FAILED\n")
            .build();
        handle_request(
            &ops,
            ClientRequest::Store {
                filename: "a.txt".into(),
                size: 10,
            },
            &mut out,
        )
        .await
        .unwrap();
        assert!(ops.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_file_errors() {
        let ops = OperationCoordinator::new(1, Duration::from_millis(50));
        let mut out = tokio_test::io::Builder::new()
            .write(b"ERROR_FILE_DOES_NOT_EXIST\n")
            .write(b"ERROR_FILE_DOES_NOT_EXIST\n")
            .write(b"LIST\n")
            .build();
        for request in [
            ClientRequest::Load {
                filename: "nope".into(),
            },
            ClientRequest::Remove {
                filename: "nope".into(),
            },
            ClientRequest::List,
        ] {
            handle_request(&ops, request, &mut out).await.unwrap();
        }
    }
}

//! Control-line protocol shared by the coordinator, storage nodes and clients
//!
//! Every control message is one line of space-separated tokens. File
//! contents travel as a raw byte segment of known length right after the
//! control line that announced them.

use crate::common::utils::validate_filename;
use crate::common::{Error, Result};
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Wire tokens
pub mod tokens {
    pub const JOIN: &str = "JOIN";
    pub const LIST: &str = "LIST";
    pub const STORE: &str = "STORE";
    pub const STORE_TO: &str = "STORE_TO";
    pub const STORE_ACK: &str = "STORE_ACK";
    pub const STORE_COMPLETE: &str = "STORE_COMPLETE";
    pub const LOAD: &str = "LOAD";
    pub const LOAD_FROM: &str = "LOAD_FROM";
    pub const LOAD_DATA: &str = "LOAD_DATA";
    pub const RELOAD: &str = "RELOAD";
    pub const REMOVE: &str = "REMOVE";
    pub const REMOVE_ACK: &str = "REMOVE_ACK";
    pub const REMOVE_COMPLETE: &str = "REMOVE_COMPLETE";
    pub const REBALANCE: &str = "REBALANCE";
    pub const ACK: &str = "ACK";

    pub const ERROR_NOT_ENOUGH_DSTORES: &str = "ERROR_NOT_ENOUGH_DSTORES";
    pub const ERROR_FILE_ALREADY_EXISTS: &str = "ERROR_FILE_ALREADY_EXISTS";
    pub const ERROR_FILE_DOES_NOT_EXIST: &str = "ERROR_FILE_DOES_NOT_EXIST";
    pub const ERROR_LOAD: &str = "ERROR_LOAD";
    pub const ERROR_STORE_FAILED: &str = "ERROR_STORE_FAILED";
    pub const ERROR_REMOVE_FAILED: &str = "ERROR_REMOVE_FAILED";
    pub const ERROR_INTERNAL: &str = "ERROR_INTERNAL";
}

/// A replica is known by the port its clients connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId(pub u16);

impl ReplicaId {
    pub fn port(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ReplicaId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u16>()
            .map(ReplicaId)
            .map_err(|_| Error::Protocol(format!("invalid port: {}", s)))
    }
}

/// Which client operation a request (or its failure) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    List,
    Store,
    Load,
    Reload,
    Remove,
}

fn filename_arg<'a>(parts: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<String> {
    let name = parts
        .next()
        .ok_or_else(|| Error::Protocol(format!("missing filename: {}", line)))?;
    validate_filename(name)?;
    Ok(name.to_string())
}

fn size_arg<'a>(parts: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<u64> {
    parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("missing or invalid size: {}", line)))
}

fn write_names(f: &mut fmt::Formatter<'_>, token: &str, names: &[String]) -> fmt::Result {
    write!(f, "{}", token)?;
    for name in names {
        write!(f, " {}", name)?;
    }
    Ok(())
}

/// Write one control line and flush it.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// First line of a connection: `JOIN <port>` marks a storage node.
pub fn parse_join(line: &str) -> Result<Option<ReplicaId>> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some(tokens::JOIN) {
        return Ok(None);
    }
    let port = parts
        .next()
        .ok_or_else(|| Error::Protocol(format!("JOIN without port: {}", line)))?;
    Ok(Some(port.parse::<ReplicaId>()?))
}

/// Client → coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    List,
    Store { filename: String, size: u64 },
    Load { filename: String },
    Reload { filename: String },
    Remove { filename: String },
}

impl ClientRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(tokens::LIST) => Ok(ClientRequest::List),
            Some(tokens::STORE) => {
                let filename = filename_arg(&mut parts, line)?;
                let size = size_arg(&mut parts, line)?;
                Ok(ClientRequest::Store { filename, size })
            }
            Some(tokens::LOAD) => Ok(ClientRequest::Load {
                filename: filename_arg(&mut parts, line)?,
            }),
            Some(tokens::RELOAD) => Ok(ClientRequest::Reload {
                filename: filename_arg(&mut parts, line)?,
            }),
            Some(tokens::REMOVE) => Ok(ClientRequest::Remove {
                filename: filename_arg(&mut parts, line)?,
            }),
            _ => Err(Error::Protocol(format!("unknown client request: {}", line))),
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            ClientRequest::List => RequestKind::List,
            ClientRequest::Store { .. } => RequestKind::Store,
            ClientRequest::Load { .. } => RequestKind::Load,
            ClientRequest::Reload { .. } => RequestKind::Reload,
            ClientRequest::Remove { .. } => RequestKind::Remove,
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRequest::List => write!(f, "{}", tokens::LIST),
            ClientRequest::Store { filename, size } => {
                write!(f, "{} {} {}", tokens::STORE, filename, size)
            }
            ClientRequest::Load { filename } => write!(f, "{} {}", tokens::LOAD, filename),
            ClientRequest::Reload { filename } => write!(f, "{} {}", tokens::RELOAD, filename),
            ClientRequest::Remove { filename } => write!(f, "{} {}", tokens::REMOVE, filename),
        }
    }
}

/// Coordinator → client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    List(Vec<String>),
    StoreTo(Vec<ReplicaId>),
    StoreComplete,
    LoadFrom { replica: ReplicaId, size: u64 },
    RemoveComplete,
    Error(String),
}

impl Reply {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(tokens::LIST) => Ok(Reply::List(parts.map(str::to_string).collect())),
            Some(tokens::STORE_TO) => Ok(Reply::StoreTo(
                parts
                    .map(str::parse::<ReplicaId>)
                    .collect::<Result<Vec<_>>>()?,
            )),
            Some(tokens::STORE_COMPLETE) => Ok(Reply::StoreComplete),
            Some(tokens::LOAD_FROM) => {
                let replica = parts
                    .next()
                    .ok_or_else(|| Error::Protocol(format!("LOAD_FROM without port: {}", line)))?
                    .parse::<ReplicaId>()?;
                let size = size_arg(&mut parts, line)?;
                Ok(Reply::LoadFrom { replica, size })
            }
            Some(tokens::REMOVE_COMPLETE) => Ok(Reply::RemoveComplete),
            Some(token) if token.starts_with("ERROR") => Ok(Reply::Error(token.to_string())),
            _ => Err(Error::Protocol(format!("unknown reply: {}", line))),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::List(names) => write_names(f, tokens::LIST, names),
            Reply::StoreTo(targets) => {
                write!(f, "{}", tokens::STORE_TO)?;
                for target in targets {
                    write!(f, " {}", target)?;
                }
                Ok(())
            }
            Reply::StoreComplete => write!(f, "{}", tokens::STORE_COMPLETE),
            Reply::LoadFrom { replica, size } => {
                write!(f, "{} {} {}", tokens::LOAD_FROM, replica, size)
            }
            Reply::RemoveComplete => write!(f, "{}", tokens::REMOVE_COMPLETE),
            Reply::Error(token) => write!(f, "{}", token),
        }
    }
}

/// Coordinator → replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaCommand {
    List,
    Remove { filename: String },
    Rebalance(String),
}

impl ReplicaCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(tokens::LIST) => Ok(ReplicaCommand::List),
            Some(tokens::REMOVE) => Ok(ReplicaCommand::Remove {
                filename: filename_arg(&mut parts, line)?,
            }),
            Some(tokens::REBALANCE) => Ok(ReplicaCommand::Rebalance(
                parts.collect::<Vec<_>>().join(" "),
            )),
            _ => Err(Error::Protocol(format!("unknown replica command: {}", line))),
        }
    }
}

impl fmt::Display for ReplicaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaCommand::List => write!(f, "{}", tokens::LIST),
            ReplicaCommand::Remove { filename } => write!(f, "{} {}", tokens::REMOVE, filename),
            ReplicaCommand::Rebalance(args) => write!(f, "{} {}", tokens::REBALANCE, args),
        }
    }
}

/// Replica → coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaMessage {
    List(Vec<String>),
    StoreAck(String),
    RemoveAck(String),
    /// `ERROR_FILE_DOES_NOT_EXIST <filename>` in answer to a remove
    RemoveMissing(String),
}

impl ReplicaMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(tokens::LIST) => Ok(ReplicaMessage::List(
                parts.map(str::to_string).collect(),
            )),
            Some(tokens::STORE_ACK) => Ok(ReplicaMessage::StoreAck(filename_arg(&mut parts, line)?)),
            Some(tokens::REMOVE_ACK) => {
                Ok(ReplicaMessage::RemoveAck(filename_arg(&mut parts, line)?))
            }
            Some(tokens::ERROR_FILE_DOES_NOT_EXIST) => Ok(ReplicaMessage::RemoveMissing(
                filename_arg(&mut parts, line)?,
            )),
            _ => Err(Error::Protocol(format!("unknown replica message: {}", line))),
        }
    }
}

impl fmt::Display for ReplicaMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaMessage::List(names) => write_names(f, tokens::LIST, names),
            ReplicaMessage::StoreAck(name) => write!(f, "{} {}", tokens::STORE_ACK, name),
            ReplicaMessage::RemoveAck(name) => write!(f, "{} {}", tokens::REMOVE_ACK, name),
            ReplicaMessage::RemoveMissing(name) => {
                write!(f, "{} {}", tokens::ERROR_FILE_DOES_NOT_EXIST, name)
            }
        }
    }
}

/// Client → replica, bypassing the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    Store { filename: String, size: u64 },
    LoadData { filename: String },
}

impl DataRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(tokens::STORE) => {
                let filename = filename_arg(&mut parts, line)?;
                let size = size_arg(&mut parts, line)?;
                Ok(DataRequest::Store { filename, size })
            }
            Some(tokens::LOAD_DATA) => Ok(DataRequest::LoadData {
                filename: filename_arg(&mut parts, line)?,
            }),
            _ => Err(Error::Protocol(format!("unknown data request: {}", line))),
        }
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRequest::Store { filename, size } => {
                write!(f, "{} {} {}", tokens::STORE, filename, size)
            }
            DataRequest::LoadData { filename } => write!(f, "{} {}", tokens::LOAD_DATA, filename),
        }
    }
}

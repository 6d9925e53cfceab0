//! File persistence on a storage node
//!
//! One file per stored name under the data directory, plus an in-memory
//! name → size index so listings never touch the disk.

use crate::common::{validate_filename, Error, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

pub struct FileStore {
    root: PathBuf,
    files: Mutex<HashMap<String, u64>>,
}

impl FileStore {
    /// Open or create the data directory.
    ///
    /// With `clean` set, existing files are deleted; otherwise they are
    /// indexed and will be reported to the coordinator.
    pub async fn open(root: &Path, clean: bool) -> Result<Self> {
        tokio::fs::create_dir_all(root).await?;

        let mut files = HashMap::new();
        let mut dir = tokio::fs::read_dir(root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if clean {
                tokio::fs::remove_file(entry.path()).await?;
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if validate_filename(name).is_ok() => {
                    files.insert(name.to_string(), meta.len());
                }
                _ => tracing::warn!("Skipping unusable file {:?}", entry.path()),
            }
        }

        if clean {
            tracing::info!("Cleared data directory {}", root.display());
        } else {
            tracing::info!("Indexed {} file(s) in {}", files.len(), root.display());
        }

        Ok(Self {
            root: root.to_path_buf(),
            files: Mutex::new(files),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_filename(name)?;
        tokio::fs::write(self.root.join(name), data).await?;
        self.files.lock()?.insert(name.to_string(), data.len() as u64);
        Ok(())
    }

    /// Stream exactly `size` bytes from `reader` into `name`.
    ///
    /// The payload goes straight to disk, so the announced size is never
    /// allocated up front. A short read or a timeout deletes the partial file.
    pub async fn put_from<R>(
        &self,
        name: &str,
        reader: &mut R,
        size: u64,
        timeout: Duration,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        validate_filename(name)?;
        let path = self.root.join(name);
        self.files.lock()?.remove(name);

        let written = tokio::time::timeout(timeout, async {
            let mut file = tokio::fs::File::create(&path).await?;
            let copied = tokio::io::copy(&mut reader.take(size), &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(copied)
        })
        .await;

        let failure = match written {
            Ok(Ok(copied)) if copied == size => None,
            Ok(Ok(copied)) => Some(Error::Protocol(format!(
                "{}: expected {} bytes, received {}",
                name, size, copied
            ))),
            Ok(Err(e)) => Some(e.into()),
            Err(e) => Some(e.into()),
        };
        if let Some(e) = failure {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                if rm.kind() != ErrorKind::NotFound {
                    tracing::warn!("Could not delete partial {}: {}", path.display(), rm);
                }
            }
            return Err(e);
        }

        self.files.lock()?.insert(name.to_string(), size);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if !self.contains(name)? {
            return Ok(None);
        }
        match tokio::fs::read(self.root.join(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("{} is indexed but missing on disk", name);
                self.files.lock()?.remove(name);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns false if the file was not stored here.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        if self.files.lock()?.remove(name).is_none() {
            return Ok(false);
        }
        match tokio::fs::remove_file(self.root.join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.files.lock()?.contains_key(name))
    }

    pub fn size_of(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.files.lock()?.get(name).copied())
    }

    /// Stored names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

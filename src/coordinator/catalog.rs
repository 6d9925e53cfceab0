//! File catalog
//!
//! Maps each filename to its committed size, its operation state and its
//! reload cursor. Every state transition goes through one check-and-set
//! under the catalog mutex, which is what keeps a store, a remove and a
//! load of the same name from overlapping.

use crate::common::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Operation state of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Idle,
    Storing,
    Removing,
}

impl FileState {
    pub fn is_locked(&self) -> bool {
        matches!(self, FileState::Storing | FileState::Removing)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileState::Idle => write!(f, "idle"),
            FileState::Storing => write!(f, "store in progress"),
            FileState::Removing => write!(f, "remove in progress"),
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    /// Set once a store commits
    size: Option<u64>,
    state: FileState,
    /// Number of holding replicas already handed out in the current load sequence
    cursor: usize,
}

/// Committed size and cursor position of a loadable file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadView {
    pub size: u64,
    pub cursor: usize,
}

/// File catalog
#[derive(Default)]
pub struct FileCatalog {
    entries: Mutex<HashMap<String, CatalogEntry>>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a store or remove of `filename` is in flight
    pub fn is_locked(&self, filename: &str) -> Result<bool> {
        let entries = self.entries.lock()?;
        Ok(entries
            .get(filename)
            .map(|e| e.state.is_locked())
            .unwrap_or(false))
    }

    /// Is `filename` committed and visible to list and load?
    pub fn contains(&self, filename: &str) -> Result<bool> {
        let entries = self.entries.lock()?;
        Ok(entries
            .get(filename)
            .map(|e| e.state == FileState::Idle && e.size.is_some())
            .unwrap_or(false))
    }

    /// Committed size, if the file is visible
    pub fn size_of(&self, filename: &str) -> Result<Option<u64>> {
        let entries = self.entries.lock()?;
        Ok(entries
            .get(filename)
            .filter(|e| e.state == FileState::Idle)
            .and_then(|e| e.size))
    }

    /// Committed filenames, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock()?;
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.state == FileState::Idle && e.size.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    // === Store ===

    /// Admit a store: the name must be unknown and unlocked.
    pub fn try_begin_store(&self, filename: &str) -> Result<()> {
        let mut entries = self.entries.lock()?;
        match entries.get(filename) {
            Some(entry) if entry.state.is_locked() => Err(Error::Locked {
                filename: filename.to_string(),
                state: entry.state,
            }),
            Some(_) => Err(Error::AlreadyExists(filename.to_string())),
            None => {
                entries.insert(
                    filename.to_string(),
                    CatalogEntry {
                        size: None,
                        state: FileState::Storing,
                        cursor: 0,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn commit_store(&self, filename: &str, size: u64) -> Result<()> {
        let mut entries = self.entries.lock()?;
        match entries.get_mut(filename) {
            Some(entry) if entry.state == FileState::Storing => {
                entry.size = Some(size);
                entry.state = FileState::Idle;
                entry.cursor = 0;
                Ok(())
            }
            other => Err(Error::Internal(format!(
                "commit_store on {} in state {:?}",
                filename,
                other.map(|e| e.state)
            ))),
        }
    }

    /// Drop an uncommitted entry. Placement records are the registry's to undo.
    pub fn abort_store(&self, filename: &str) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if entries
            .get(filename)
            .map(|e| e.state == FileState::Storing)
            .unwrap_or(false)
        {
            entries.remove(filename);
        }
        Ok(())
    }

    // === Remove ===

    /// Admit a remove: the file must be committed and unlocked.
    /// Returns the committed size.
    pub fn try_begin_remove(&self, filename: &str) -> Result<u64> {
        let mut entries = self.entries.lock()?;
        let entry = entries
            .get_mut(filename)
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        if entry.state.is_locked() {
            return Err(Error::Locked {
                filename: filename.to_string(),
                state: entry.state,
            });
        }
        let size = entry
            .size
            .ok_or_else(|| Error::Internal(format!("idle entry {} has no size", filename)))?;
        entry.state = FileState::Removing;
        Ok(size)
    }

    pub fn commit_remove(&self, filename: &str) -> Result<()> {
        let mut entries = self.entries.lock()?;
        match entries.get(filename).map(|e| e.state) {
            Some(FileState::Removing) => {
                entries.remove(filename);
                Ok(())
            }
            state => Err(Error::Internal(format!(
                "commit_remove on {} in state {:?}",
                filename, state
            ))),
        }
    }

    /// Put a file whose remove failed back into service.
    pub fn abort_remove(&self, filename: &str) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if let Some(entry) = entries.get_mut(filename) {
            if entry.state == FileState::Removing {
                entry.state = FileState::Idle;
                entry.cursor = 0;
            }
        }
        Ok(())
    }

    // === Reload cursor ===

    pub fn reload_cursor(&self, filename: &str) -> Result<Option<usize>> {
        let entries = self.entries.lock()?;
        Ok(entries.get(filename).map(|e| e.cursor))
    }

    /// Start a fresh load sequence at the first holding replica.
    pub fn reset_cursor(&self, filename: &str) -> Result<LoadView> {
        self.with_loadable(filename, |entry| entry.cursor = 0)
    }

    /// Move on to the next holding replica.
    pub fn advance_cursor(&self, filename: &str) -> Result<LoadView> {
        self.with_loadable(filename, |entry| entry.cursor += 1)
    }

    fn with_loadable(
        &self,
        filename: &str,
        update: impl FnOnce(&mut CatalogEntry),
    ) -> Result<LoadView> {
        let mut entries = self.entries.lock()?;
        let entry = entries
            .get_mut(filename)
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        if entry.state.is_locked() {
            return Err(Error::Locked {
                filename: filename.to_string(),
                state: entry.state,
            });
        }
        let size = entry
            .size
            .ok_or_else(|| Error::Internal(format!("idle entry {} has no size", filename)))?;
        update(entry);
        Ok(LoadView {
            size,
            cursor: entry.cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(catalog: &FileCatalog, name: &str, size: u64) {
        catalog.try_begin_store(name).unwrap();
        catalog.commit_store(name, size).unwrap();
    }

    #[test]
    fn test_store_lifecycle() {
        let catalog = FileCatalog::new();
        assert!(!catalog.is_locked("a.txt").unwrap());

        catalog.try_begin_store("a.txt").unwrap();
        assert!(catalog.is_locked("a.txt").unwrap());
        assert!(!catalog.contains("a.txt").unwrap());
        assert!(catalog.list().unwrap().is_empty());

        catalog.commit_store("a.txt", 100).unwrap();
        assert!(!catalog.is_locked("a.txt").unwrap());
        assert!(catalog.contains("a.txt").unwrap());
        assert_eq!(catalog.size_of("a.txt").unwrap(), Some(100));
        assert_eq!(catalog.list().unwrap(), vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_abort_store_discards_entry() {
        let catalog = FileCatalog::new();
        catalog.try_begin_store("a.txt").unwrap();
        catalog.abort_store("a.txt").unwrap();
        assert!(!catalog.contains("a.txt").unwrap());
        assert!(!catalog.is_locked("a.txt").unwrap());
        assert_eq!(catalog.reload_cursor("a.txt").unwrap(), None);
        // Name is free again
        catalog.try_begin_store("a.txt").unwrap();
    }

    #[test]
    fn test_begin_store_conflicts() {
        let catalog = FileCatalog::new();
        catalog.try_begin_store("a.txt").unwrap();
        assert!(matches!(
            catalog.try_begin_store("a.txt"),
            Err(Error::Locked {
                state: FileState::Storing,
                ..
            })
        ));

        catalog.commit_store("a.txt", 1).unwrap();
        assert!(matches!(
            catalog.try_begin_store("a.txt"),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_remove_lifecycle() {
        let catalog = FileCatalog::new();
        assert!(matches!(
            catalog.try_begin_remove("a.txt"),
            Err(Error::NotFound(_))
        ));

        committed(&catalog, "a.txt", 10);
        assert_eq!(catalog.try_begin_remove("a.txt").unwrap(), 10);
        assert!(catalog.is_locked("a.txt").unwrap());
        // Hidden from listings while removing
        assert!(catalog.list().unwrap().is_empty());
        assert!(matches!(
            catalog.try_begin_remove("a.txt"),
            Err(Error::Locked { .. })
        ));
        assert!(matches!(
            catalog.try_begin_store("a.txt"),
            Err(Error::Locked { .. })
        ));

        catalog.commit_remove("a.txt").unwrap();
        assert!(!catalog.contains("a.txt").unwrap());
        assert!(!catalog.is_locked("a.txt").unwrap());
    }

    #[test]
    fn test_abort_remove_restores_idle() {
        let catalog = FileCatalog::new();
        committed(&catalog, "a.txt", 10);
        catalog.try_begin_remove("a.txt").unwrap();
        catalog.abort_remove("a.txt").unwrap();
        assert!(catalog.contains("a.txt").unwrap());
        assert!(!catalog.is_locked("a.txt").unwrap());
    }

    #[test]
    fn test_commit_without_begin_is_internal_error() {
        let catalog = FileCatalog::new();
        assert!(matches!(
            catalog.commit_store("a.txt", 1),
            Err(Error::Internal(_))
        ));
        assert!(matches!(
            catalog.commit_remove("a.txt"),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_reload_cursor() {
        let catalog = FileCatalog::new();
        committed(&catalog, "a.txt", 5);

        assert_eq!(
            catalog.reset_cursor("a.txt").unwrap(),
            LoadView { size: 5, cursor: 0 }
        );
        assert_eq!(catalog.advance_cursor("a.txt").unwrap().cursor, 1);
        assert_eq!(catalog.advance_cursor("a.txt").unwrap().cursor, 2);
        assert_eq!(catalog.reload_cursor("a.txt").unwrap(), Some(2));
        assert_eq!(catalog.reset_cursor("a.txt").unwrap().cursor, 0);
    }

    #[test]
    fn test_cursor_refused_while_locked() {
        let catalog = FileCatalog::new();
        catalog.try_begin_store("a.txt").unwrap();
        assert!(matches!(
            catalog.reset_cursor("a.txt"),
            Err(Error::Locked { .. })
        ));
        assert!(matches!(
            catalog.advance_cursor("b.txt"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_begin_store_admits_one() {
        let catalog = std::sync::Arc::new(FileCatalog::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                std::thread::spawn(move || catalog.try_begin_store("x").is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}

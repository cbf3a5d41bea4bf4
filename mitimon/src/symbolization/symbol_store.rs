//! Local symbol stores
//!
//! Debug files are looked up in one writable cache directory followed by any
//! number of read-only stores, using the layouts symbol servers populate:
//!
//! ```text
//! <store>/ntkrnlmp.pdb/<GUID><AGE>/ntkrnlmp.pdb     (PE / CodeView)
//! <store>/.build-id/ab/cdef0123....debug            (ELF / GNU build-id)
//! ```

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use super::provider::DebugIdentity;
use crate::domain::SymbolError;

/// Ordered set of directories searched for debug files
#[derive(Debug, Clone)]
pub struct SymbolStore {
    cache_dir: PathBuf,
    search_dirs: Vec<PathBuf>,
}

impl SymbolStore {
    /// Open the store, creating the cache directory if needed
    ///
    /// # Errors
    /// Returns [`SymbolError::SymbolDirectory`] if the cache directory cannot be created
    pub fn open(cache_dir: impl Into<PathBuf>, search_dirs: Vec<PathBuf>) -> Result<Self, SymbolError> {
        let store = Self { cache_dir: cache_dir.into(), search_dirs };
        store.ensure_cache_dir()?;
        Ok(store)
    }

    /// Make sure the cache directory still exists
    ///
    /// # Errors
    /// Returns [`SymbolError::SymbolDirectory`] if it cannot be created
    pub fn ensure_cache_dir(&self) -> Result<(), SymbolError> {
        fs::create_dir_all(&self.cache_dir).map_err(|source| SymbolError::SymbolDirectory {
            path: self.cache_dir.clone(),
            source,
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directories in search order: the cache first
    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.cache_dir.as_path()).chain(self.search_dirs.iter().map(PathBuf::as_path))
    }

    /// Path a debug file would have inside `store`
    #[must_use]
    pub fn candidate(store: &Path, identity: &DebugIdentity) -> Option<PathBuf> {
        match identity {
            DebugIdentity::Pdb { file_name, .. } => {
                let key = identity.symstore_key()?;
                Some(store.join(file_name).join(key).join(file_name))
            }
            DebugIdentity::BuildId(id) if id.len() > 1 => {
                let hex: String = id.iter().map(|byte| format!("{byte:02x}")).collect();
                let (dir, rest) = hex.split_at(2);
                Some(store.join(".build-id").join(dir).join(format!("{rest}.debug")))
            }
            DebugIdentity::BuildId(_) | DebugIdentity::Embedded(_) => None,
        }
    }

    /// Find the debug file for an identity
    #[must_use]
    pub fn find(&self, identity: &DebugIdentity) -> Option<PathBuf> {
        if let DebugIdentity::Embedded(path) = identity {
            return path.is_file().then(|| path.clone());
        }

        self.dirs().filter_map(|dir| Self::candidate(dir, identity)).find(|candidate| {
            let found = candidate.is_file();
            debug!("Probing {} -> {}", candidate.display(), if found { "hit" } else { "miss" });
            found
        })
    }
}

//! Scripted in-memory symbol provider shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mitimon::domain::{Address, ModuleHandle, Pid, SymbolError};
use mitimon::symbolization::{
    DebugIdentity, LineHit, LoadedModuleInfo, SymbolEngine, SymbolHit, SymbolProvider,
};

/// An image the scripted engine knows about, keyed by path
#[derive(Debug, Clone, Default)]
pub struct ScriptedImage {
    pub preferred_base: u64,
    pub image_size: u64,
    /// (rva, name), any order
    pub symbols: Vec<(u64, String)>,
    /// (rva, len, file, line)
    pub lines: Vec<(u64, u64, String, u32)>,
}

impl ScriptedImage {
    pub fn new(image_size: u64) -> Self {
        Self { preferred_base: 0x1_4000_0000, image_size, ..Self::default() }
    }

    pub fn symbol(mut self, rva: u64, name: &str) -> Self {
        self.symbols.push((rva, name.to_string()));
        self
    }

    pub fn line(mut self, rva: u64, len: u64, file: &str, line: u32) -> Self {
        self.lines.push((rva, len, file.to_string(), line));
        self
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub engines: AtomicUsize,
    pub identity_lookups: AtomicUsize,
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    images: HashMap<String, ScriptedImage>,
    /// Paths whose identity is known but whose debug file is missing
    missing_debug: HashSet<String>,
    /// Bases at which loading fails
    rejected_bases: HashSet<u64>,
    fail_engine: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(mut self, path: &str, image: ScriptedImage) -> Self {
        self.images.insert(path.to_string(), image);
        self
    }

    pub fn without_debug_file(mut self, path: &str) -> Self {
        self.missing_debug.insert(path.to_string());
        self
    }

    pub fn reject_base(mut self, base: u64) -> Self {
        self.rejected_bases.insert(base);
        self
    }

    pub fn failing_engine(mut self) -> Self {
        self.fail_engine = true;
        self
    }

    pub fn engine(&self) -> ScriptedEngine {
        self.create_engine(Pid(1)).unwrap()
    }
}

impl SymbolProvider for ScriptedProvider {
    type Engine = ScriptedEngine;

    fn create_engine(&self, _pid: Pid) -> Result<ScriptedEngine, SymbolError> {
        if self.fail_engine {
            return Err(SymbolError::SymbolDirectory {
                path: PathBuf::from("/scripted"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "scripted"),
            });
        }
        self.counters.engines.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedEngine {
            images: self.images.clone(),
            missing_debug: self.missing_debug.clone(),
            rejected_bases: self.rejected_bases.clone(),
            counters: Arc::clone(&self.counters),
            loaded: HashMap::new(),
            next_handle: 1,
        })
    }
}

struct Loaded {
    name: String,
    base: u64,
    image: ScriptedImage,
}

impl Loaded {
    fn rva(&self, address: Address) -> Option<u64> {
        address.0.checked_sub(self.base).filter(|rva| *rva < self.image.image_size)
    }
}

pub struct ScriptedEngine {
    images: HashMap<String, ScriptedImage>,
    missing_debug: HashSet<String>,
    rejected_bases: HashSet<u64>,
    counters: Arc<Counters>,
    loaded: HashMap<ModuleHandle, Loaded>,
    next_handle: u64,
}

impl ScriptedEngine {
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    fn containing(&self, address: Address) -> Option<(&Loaded, u64)> {
        self.loaded.values().find_map(|loaded| loaded.rva(address).map(|rva| (loaded, rva)))
    }
}

impl SymbolEngine for ScriptedEngine {
    fn file_index_info(&self, image_path: &str) -> Result<DebugIdentity, SymbolError> {
        self.counters.identity_lookups.fetch_add(1, Ordering::SeqCst);
        if self.images.contains_key(image_path) {
            Ok(DebugIdentity::Embedded(PathBuf::from(image_path)))
        } else {
            Err(SymbolError::Io {
                path: PathBuf::from(image_path),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            })
        }
    }

    fn find_debug_file(&self, identity: &DebugIdentity) -> Result<PathBuf, SymbolError> {
        match identity {
            DebugIdentity::Embedded(path)
                if !self.missing_debug.contains(path.to_string_lossy().as_ref()) =>
            {
                Ok(path.clone())
            }
            other => Err(SymbolError::DebugFileNotFound(other.to_string())),
        }
    }

    fn load_module(
        &mut self,
        image_path: &str,
        module_name: &str,
        base: Option<Address>,
        _debug_file: &Path,
    ) -> Result<ModuleHandle, SymbolError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        let image = self.images.get(image_path).cloned().ok_or_else(|| SymbolError::Parse {
            path: PathBuf::from(image_path),
            message: "unknown image".to_string(),
        })?;
        let base = base.map_or(image.preferred_base, |base| base.0);
        if self.rejected_bases.contains(&base) {
            return Err(SymbolError::Parse {
                path: PathBuf::from(image_path),
                message: format!("rejected base 0x{base:x}"),
            });
        }

        let handle = ModuleHandle(self.next_handle);
        self.next_handle += 1;
        self.loaded.insert(handle, Loaded { name: module_name.to_string(), base, image });
        Ok(handle)
    }

    fn module_info(&self, module: ModuleHandle) -> Result<LoadedModuleInfo, SymbolError> {
        self.loaded
            .get(&module)
            .map(|loaded| LoadedModuleInfo {
                base: Address(loaded.base),
                image_size: loaded.image.image_size,
            })
            .ok_or(SymbolError::ModuleNotLoaded(module.0))
    }

    fn unload_module(&mut self, module: ModuleHandle) {
        if self.loaded.remove(&module).is_some() {
            self.counters.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn symbol_from_addr(&self, address: Address) -> Option<SymbolHit> {
        let (loaded, rva) = self.containing(address)?;
        loaded
            .image
            .symbols
            .iter()
            .filter(|(start, _)| *start <= rva)
            .max_by_key(|(start, _)| *start)
            .map(|(start, name)| SymbolHit { name: name.clone(), displacement: rva - start })
    }

    fn line_from_addr(&self, address: Address) -> Option<LineHit> {
        let (loaded, rva) = self.containing(address)?;
        loaded
            .image
            .lines
            .iter()
            .find(|(start, len, _, _)| *start <= rva && rva < start + len)
            .map(|(start, _, file, line)| LineHit {
                file: file.clone(),
                line: *line,
                displacement: rva - start,
            })
    }

    fn symbol_from_name(&self, module_name: &str, symbol: &str) -> Option<Address> {
        self.loaded.values().filter(|loaded| loaded.name == module_name).find_map(|loaded| {
            loaded
                .image
                .symbols
                .iter()
                .find(|(_, name)| name == symbol)
                .map(|(rva, _)| Address(loaded.base + rva))
        })
    }
}

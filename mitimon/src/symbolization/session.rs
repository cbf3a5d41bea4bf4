// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;

use super::base_recovery::guess_image_base;
use super::provider::{SymbolEngine, SymbolProvider};
use crate::domain::{Address, LocateError, ModuleHandle, SymbolError};
use crate::registry::{ModuleRecord, ProcessRecord};

/// Resolves addresses of one process snapshot to readable locations
///
/// Owns a private copy of the process record, one engine context, and a memo
/// of module load attempts keyed by base:
///
/// - `Some(handle)`: loaded
/// - `None`: tried and failed, never retried in this session
/// - absent: not tried yet
///
/// Dropping the session unloads every module it opened, then drops the engine.
pub struct SymbolSession<E: SymbolEngine> {
    process: ProcessRecord,
    engine: E,
    modules: HashMap<Address, Option<ModuleHandle>>,
}

impl<E: SymbolEngine> SymbolSession<E> {
    #[must_use]
    pub fn new(process: ProcessRecord, engine: E) -> Self {
        Self { process, engine, modules: HashMap::new() }
    }

    /// Create an engine for the snapshot's pid and wrap it in a session
    ///
    /// # Errors
    /// Returns an error if the provider cannot initialize an engine
    pub fn open<P>(provider: &P, process: ProcessRecord) -> Result<Self, SymbolError>
    where
        P: SymbolProvider<Engine = E>,
    {
        let engine = provider.create_engine(process.pid())?;
        Ok(Self::new(process, engine))
    }

    #[must_use]
    pub fn process(&self) -> &ProcessRecord {
        &self.process
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Load symbols for a module once per session
    ///
    /// Success and failure are both remembered, so the expensive lookup (which
    /// may download a debug file) happens at most once per base.
    pub fn ensure_loaded(&mut self, module: &ModuleRecord) -> bool {
        if let Some(previous) = self.modules.get(&module.base()) {
            return previous.is_some();
        }

        let outcome = match self.load(module) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Symbols unavailable for {} at {}: {e}", module.name(), module.base());
                None
            }
        };
        self.modules.insert(module.base(), outcome);
        outcome.is_some()
    }

    fn locate_debug_file(&self, image_path: &str) -> Result<PathBuf, SymbolError> {
        let identity = self.engine.file_index_info(image_path)?;
        info!("Locating symbols file {identity}...");
        self.engine.find_debug_file(&identity)
    }

    fn load(&mut self, module: &ModuleRecord) -> Result<ModuleHandle, SymbolError> {
        let debug_file = self.locate_debug_file(module.path())?;
        let handle =
            self.engine.load_module(module.path(), module.name(), Some(module.base()), &debug_file)?;

        if let Err(e) = self.engine.module_info(handle) {
            self.engine.unload_module(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Describe an address as precisely as the available data allows
    ///
    /// Never fails. Each step appends to the previous one and the first step
    /// that has nothing to add ends the string:
    ///
    /// ```text
    /// 0x00007ffe12345678
    /// 0x00007ffe12345678 ntdll+0x5678
    /// 0x00007ffe12345678 ntdll+0x5678 ntdll!NtWaitForSingleObject+0x14
    /// 0x00007ffe12345678 ntdll+0x5678 ntdll!NtWaitForSingleObject+0x14 wait.c:42+0x4
    /// ```
    pub fn symbolicate(&mut self, address: Address) -> String {
        let mut result = address.to_string();

        let Some((module, offset)) = self
            .process
            .decompose(address)
            .and_then(|(base, offset)| self.process.image(base).map(|m| (m.clone(), offset)))
        else {
            return result;
        };
        result.push_str(&format!(" {}+0x{offset:x}", module.name()));

        if !self.ensure_loaded(&module) {
            return result;
        }

        let Some(symbol) = self.engine.symbol_from_addr(address) else {
            return result;
        };
        result.push_str(&format!(" {}!{}+0x{:x}", module.name(), symbol.name, symbol.displacement));

        let Some(line) = self.engine.line_from_addr(address) else {
            return result;
        };
        result.push_str(&format!(" {}:{}+0x{:x}", line.file, line.line, line.displacement));

        result
    }

    /// Find the load base of a module no notification ever announced
    ///
    /// `observed` must be an address inside the exported function `symbol`.
    /// A reference copy of the image is loaded at its preferred base to learn
    /// the export's RVA and the image size; the base is then guessed (see
    /// [`guess_image_base`]) and verified by loading the module there for real.
    /// On success the module is added to this session's snapshot and memo.
    ///
    /// # Errors
    /// Returns the named [`LocateError`] for the step that failed
    pub fn locate_unannounced_module(
        &mut self,
        name: &str,
        path: &str,
        symbol: &str,
        observed: Address,
    ) -> Result<ModuleRecord, LocateError> {
        let not_found = |source| LocateError::NotFound { module: name.to_string(), source };

        let debug_file = self.locate_debug_file(path).map_err(not_found)?;
        let reference =
            self.engine.load_module(path, name, None, &debug_file).map_err(not_found)?;
        let measured = self.measure_reference(reference, name, symbol);
        self.engine.unload_module(reference);
        let (image_size, symbol_rva) = measured?;

        let guess = guess_image_base(symbol_rva, observed);
        debug!(
            "{name}!{symbol} at RVA 0x{symbol_rva:x}, observed {observed}, next page: {}, base {}",
            guess.next_page, guess.base
        );

        let module = ModuleRecord::from_raw(guess.base, image_size, path);
        self.process.add_image(module.clone());

        let verification_failed = |source| LocateError::VerificationFailed {
            module: name.to_string(),
            base: guess.base.0,
            source,
        };
        let handle = self
            .engine
            .load_module(path, name, Some(guess.base), &debug_file)
            .map_err(verification_failed)?;
        if let Err(e) = self.engine.module_info(handle) {
            self.engine.unload_module(handle);
            return Err(verification_failed(e));
        }

        if let Some(Some(stale)) = self.modules.insert(guess.base, Some(handle)) {
            self.engine.unload_module(stale);
        }

        match self.engine.symbol_from_name(name, symbol) {
            Some(relocated) => debug!("{name}!{symbol} now at {relocated}"),
            None => warn!("{name}!{symbol} missing after reload at {}", guess.base),
        }

        Ok(module)
    }

    /// Image size and export RVA from a reference load
    fn measure_reference(
        &self,
        reference: ModuleHandle,
        name: &str,
        symbol: &str,
    ) -> Result<(u64, u64), LocateError> {
        let info = self
            .engine
            .module_info(reference)
            .map_err(|source| LocateError::NotFound { module: name.to_string(), source })?;

        let symbol_rva = self
            .engine
            .symbol_from_name(name, symbol)
            .and_then(|address| address.offset_from(info.base))
            .ok_or_else(|| LocateError::SymbolNotFound {
                module: name.to_string(),
                symbol: symbol.to_string(),
            })?;

        Ok((info.image_size, symbol_rva))
    }
}

impl<E: SymbolEngine> Drop for SymbolSession<E> {
    fn drop(&mut self) {
        for handle in self.modules.drain().filter_map(|(_, handle)| handle) {
            self.engine.unload_module(handle);
        }
    }
}

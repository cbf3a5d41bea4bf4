//! Symbol engine over on-disk images, using `object` for symbol tables and
//! `addr2line` for DWARF line tables.

use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::debug;
use object::read::pe::{ImageNtHeaders as _, ImageOptionalHeader as _};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionKind, SymbolKind};
use rustc_demangle::demangle;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use super::base_recovery::page_round_up;
use super::provider::{
    DebugIdentity, LineHit, LoadedModuleInfo, SymbolEngine, SymbolHit, SymbolProvider,
};
use super::symbol_store::SymbolStore;
use crate::domain::{Address, ModuleHandle, Pid, SymbolError};

type DwarfContext = Context<EndianRcSlice<RunTimeEndian>>;

/// Symbol provider backed by on-disk images and DWARF debug files
///
/// Symbols come from the image's symbol table and export directory; source
/// lines come from DWARF found either in the image or in a debug file from
/// the [`SymbolStore`].
#[derive(Debug, Clone)]
pub struct ObjectSymbolProvider {
    store: Arc<SymbolStore>,
}

impl ObjectSymbolProvider {
    #[must_use]
    pub fn new(store: SymbolStore) -> Self {
        Self { store: Arc::new(store) }
    }

    #[must_use]
    pub fn store(&self) -> &SymbolStore {
        &self.store
    }
}

impl SymbolProvider for ObjectSymbolProvider {
    type Engine = ObjectSymbolEngine;

    fn create_engine(&self, pid: Pid) -> Result<ObjectSymbolEngine, SymbolError> {
        self.store.ensure_cache_dir()?;
        debug!("Symbol engine initialized for {pid}");
        Ok(ObjectSymbolEngine {
            pid,
            store: Arc::clone(&self.store),
            modules: HashMap::new(),
            next_handle: 1,
        })
    }
}

/// One engine context; owns every module loaded into it
///
/// Not `Send`: the DWARF contexts are reference counted. Engines are created
/// and dropped on the resolver worker that uses them.
pub struct ObjectSymbolEngine {
    pid: Pid,
    store: Arc<SymbolStore>,
    modules: HashMap<ModuleHandle, LoadedImage>,
    next_handle: u64,
}

struct LoadedImage {
    name: String,
    base: Address,
    image_size: u64,
    /// Address the image was linked at; symbol and DWARF addresses are relative to it
    link_base: u64,
    /// Sorted by RVA
    symbols: Vec<ImageSymbol>,
    lines: Option<DwarfContext>,
}

struct ImageSymbol {
    rva: u64,
    name: String,
}

impl LoadedImage {
    fn rva_of(&self, address: Address) -> Option<u64> {
        address.offset_from(self.base).filter(|rva| *rva < self.image_size)
    }

    fn symbol_at(&self, rva: u64) -> Option<SymbolHit> {
        let idx = self.symbols.partition_point(|symbol| symbol.rva <= rva);
        let symbol = self.symbols.get(idx.checked_sub(1)?)?;
        Some(SymbolHit { name: symbol.name.clone(), displacement: rva - symbol.rva })
    }

    fn line_at(&self, rva: u64) -> Option<LineHit> {
        let ctx = self.lines.as_ref()?;
        let probe = self.link_base.wrapping_add(rva);

        // Prefer the line-table row covering the probe so the displacement is exact
        let ranged = ctx.find_location_range(probe, probe.wrapping_add(1)).ok().and_then(|mut rows| {
            rows.find(|(start, len, _)| *start <= probe && probe < start.saturating_add(*len))
        });

        let (displacement, location) = match ranged {
            Some((start, _, location)) => (probe - start, location),
            None => (0, ctx.find_location(probe).ok().flatten()?),
        };

        Some(LineHit {
            file: location.file?.to_string(),
            line: location.line?,
            displacement,
        })
    }
}

impl ObjectSymbolEngine {
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.modules.len()
    }

    fn image_at(&self, address: Address) -> Option<(&LoadedImage, u64)> {
        self.modules
            .values()
            .find_map(|image| image.rva_of(address).map(|rva| (image, rva)))
    }
}

impl SymbolEngine for ObjectSymbolEngine {
    fn file_index_info(&self, image_path: &str) -> Result<DebugIdentity, SymbolError> {
        let path = Path::new(image_path);
        let data = read_file(path)?;
        let obj = object::File::parse(&*data).map_err(|e| parse_error(path, &e))?;

        if has_dwarf(&obj) {
            return Ok(DebugIdentity::Embedded(path.to_path_buf()));
        }

        if let Ok(Some(code_view)) = obj.pdb_info() {
            let recorded = String::from_utf8_lossy(code_view.path());
            let file_name = recorded.rsplit(['\\', '/']).next().unwrap_or(&recorded).to_string();
            return Ok(DebugIdentity::Pdb { file_name, guid: code_view.guid(), age: code_view.age() });
        }

        if let Ok(Some(build_id)) = obj.build_id() {
            return Ok(DebugIdentity::BuildId(build_id.to_vec()));
        }

        // Nothing better than the image's own symbol table
        Ok(DebugIdentity::Embedded(path.to_path_buf()))
    }

    fn find_debug_file(&self, identity: &DebugIdentity) -> Result<std::path::PathBuf, SymbolError> {
        self.store
            .find(identity)
            .ok_or_else(|| SymbolError::DebugFileNotFound(identity.to_string()))
    }

    fn load_module(
        &mut self,
        image_path: &str,
        module_name: &str,
        base: Option<Address>,
        debug_file: &Path,
    ) -> Result<ModuleHandle, SymbolError> {
        let path = Path::new(image_path);
        let data = read_file(path)?;
        let obj = object::File::parse(&*data).map_err(|e| parse_error(path, &e))?;

        let link_base = obj.relative_address_base();
        let image_size = declared_image_size(&obj, link_base);
        if image_size == 0 {
            return Err(SymbolError::EmptyImage(path.to_path_buf()));
        }

        let symbols = collect_symbols(&obj, link_base, image_size);
        let lines = if debug_file == path {
            load_dwarf(&obj).ok()
        } else {
            load_debug_file(debug_file)
        };

        let image = LoadedImage {
            name: module_name.to_string(),
            base: base.unwrap_or(Address(link_base)),
            image_size,
            link_base,
            symbols,
            lines,
        };
        debug!(
            "Loaded {} at {} (size 0x{:x}, {} symbols, lines: {})",
            image.name,
            image.base,
            image.image_size,
            image.symbols.len(),
            image.lines.is_some()
        );

        let handle = ModuleHandle(self.next_handle);
        self.next_handle += 1;
        self.modules.insert(handle, image);
        Ok(handle)
    }

    fn module_info(&self, module: ModuleHandle) -> Result<LoadedModuleInfo, SymbolError> {
        self.modules
            .get(&module)
            .map(|image| LoadedModuleInfo { base: image.base, image_size: image.image_size })
            .ok_or(SymbolError::ModuleNotLoaded(module.0))
    }

    fn unload_module(&mut self, module: ModuleHandle) {
        if let Some(image) = self.modules.remove(&module) {
            debug!("Unloaded {} from {}", image.name, image.base);
        }
    }

    fn symbol_from_addr(&self, address: Address) -> Option<SymbolHit> {
        let (image, rva) = self.image_at(address)?;
        image.symbol_at(rva)
    }

    fn line_from_addr(&self, address: Address) -> Option<LineHit> {
        let (image, rva) = self.image_at(address)?;
        image.line_at(rva)
    }

    fn symbol_from_name(&self, module_name: &str, symbol: &str) -> Option<Address> {
        self.modules
            .values()
            .filter(|image| image.name.eq_ignore_ascii_case(module_name))
            .find_map(|image| {
                image
                    .symbols
                    .iter()
                    .find(|candidate| candidate.name == symbol)
                    .map(|candidate| image.base.wrapping_add(candidate.rva))
            })
    }
}

/// Demangle a Rust symbol name; other names pass through unchanged
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    format!("{:#}", demangle(symbol))
}

fn read_file(path: &Path) -> Result<Vec<u8>, SymbolError> {
    fs::read(path).map_err(|source| SymbolError::Io { path: path.to_path_buf(), source })
}

fn parse_error(path: &Path, err: &object::Error) -> SymbolError {
    SymbolError::Parse { path: path.to_path_buf(), message: err.to_string() }
}

fn has_dwarf(obj: &object::File<'_>) -> bool {
    obj.section_by_name(".debug_info").is_some_and(|section| section.size() > 0)
}

/// `SizeOfImage` for PE images, otherwise the page-rounded extent of what the
/// loader maps
///
/// ELF images use their loadable segments. Without segments, only sections
/// that occupy memory at runtime count; debug and note sections sit at
/// address 0 and would inflate the extent.
fn declared_image_size(obj: &object::File<'_>, link_base: u64) -> u64 {
    let declared = match obj {
        object::File::Pe32(pe) => Some(pe.nt_headers().optional_header().size_of_image()),
        object::File::Pe64(pe) => Some(pe.nt_headers().optional_header().size_of_image()),
        _ => None,
    };
    if let Some(size) = declared {
        return u64::from(size);
    }

    let extent = |address: u64, size: u64| {
        (size > 0).then(|| address.checked_sub(link_base)).flatten().map(|rva| rva + size)
    };

    let end = obj
        .segments()
        .filter_map(|segment| extent(segment.address(), segment.size()))
        .max()
        .or_else(|| {
            obj.sections()
                .filter(|section| is_mapped(section.kind()))
                .filter_map(|section| extent(section.address(), section.size()))
                .max()
        })
        .unwrap_or(0);
    page_round_up(end)
}

fn is_mapped(kind: SectionKind) -> bool {
    matches!(
        kind,
        SectionKind::Text
            | SectionKind::Data
            | SectionKind::ReadOnlyData
            | SectionKind::ReadOnlyDataWithRel
            | SectionKind::ReadOnlyString
            | SectionKind::UninitializedData
            | SectionKind::Tls
            | SectionKind::UninitializedTls
    )
}

fn collect_symbols(obj: &object::File<'_>, link_base: u64, image_size: u64) -> Vec<ImageSymbol> {
    let mut symbols = Vec::new();
    let mut push = |address: u64, name: &str| {
        if name.is_empty() {
            return;
        }
        match address.checked_sub(link_base) {
            Some(rva) if rva < image_size => {
                symbols.push(ImageSymbol { rva, name: demangle_symbol(name) });
            }
            _ => {}
        }
    };

    for symbol in obj.symbols() {
        if symbol.is_definition() && symbol.kind() == SymbolKind::Text {
            if let Ok(name) = symbol.name() {
                push(symbol.address(), name);
            }
        }
    }

    if let Ok(exports) = obj.exports() {
        for export in exports {
            if let Ok(name) = std::str::from_utf8(export.name()) {
                push(export.address(), name);
            }
        }
    }

    symbols.sort_by(|a, b| a.rva.cmp(&b.rva).then_with(|| a.name.cmp(&b.name)));
    symbols.dedup_by(|a, b| a.rva == b.rva && a.name == b.name);
    symbols
}

fn load_dwarf(obj: &object::File<'_>) -> Result<DwarfContext, gimli::Error> {
    let endian = if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

    let load_section = |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
        let data = obj
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
        Ok(EndianRcSlice::new(Rc::from(&*data), endian))
    };

    let dwarf = gimli::Dwarf::load(&load_section)?;
    Context::from_dwarf(dwarf)
}

/// Lines from a separate debug file; files `object` cannot parse (e.g. PDB) yield none
fn load_debug_file(debug_file: &Path) -> Option<DwarfContext> {
    let data = fs::read(debug_file).ok()?;
    match object::File::parse(&*data) {
        Ok(obj) => load_dwarf(&obj).ok(),
        Err(e) => {
            debug!("No line information from {}: {e}", debug_file.display());
            None
        }
    }
}

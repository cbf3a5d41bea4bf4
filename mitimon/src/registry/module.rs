//! Loaded-module records and the naming rules applied to raw image identifiers

use crate::domain::Address;

/// Device-root prefix that makes an NT-native device path openable from user mode
pub const GLOBALROOT_PREFIX: &str = r"\\?\GLOBALROOT";

/// A module loaded into one process
///
/// Immutable once built: a module that moves is replaced, never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    base: Address,
    size: u64,
    name: String,
    path: String,
}

impl ModuleRecord {
    /// Build a record from the raw identifier reported by the event source
    #[must_use]
    pub fn from_raw(base: Address, size: u64, raw_name: &str) -> Self {
        Self {
            base,
            size,
            name: name_from_raw(raw_name),
            path: path_from_raw(raw_name),
        }
    }

    #[must_use]
    pub fn base(&self) -> Address {
        self.base
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Short module name, e.g. `ntdll`
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Openable on-disk path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if an address falls within `[base, base + size)`
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        address.offset_from(self.base).is_some_and(|offset| offset < self.size)
    }
}

/// Derive a module name: the last path component without a `.dll`/`.exe` suffix
///
/// ```
/// use mitimon::registry::name_from_raw;
///
/// assert_eq!(name_from_raw(r"C:\Windows\System32\ntoskrnl.exe"), "ntoskrnl");
/// assert_eq!(name_from_raw("notepad"), "notepad");
/// ```
#[must_use]
pub fn name_from_raw(raw_name: &str) -> String {
    let file_name = raw_name.rsplit(['\\', '/']).next().unwrap_or(raw_name);

    let stem_len = file_name.len().saturating_sub(4);
    if file_name.is_char_boundary(stem_len) {
        let suffix = &file_name[stem_len..];
        if suffix.eq_ignore_ascii_case(".dll") || suffix.eq_ignore_ascii_case(".exe") {
            return file_name[..stem_len].to_string();
        }
    }

    file_name.to_string()
}

/// Normalize a raw identifier into an openable path
///
/// NT device paths (`\Device\...`, used for kernel-space images) are rewritten
/// under [`GLOBALROOT_PREFIX`]; everything else is returned unchanged.
#[must_use]
pub fn path_from_raw(raw_name: &str) -> String {
    if raw_name.starts_with('\\') && !raw_name.starts_with(r"\\") {
        format!("{GLOBALROOT_PREFIX}{raw_name}")
    } else {
        raw_name.to_string()
    }
}

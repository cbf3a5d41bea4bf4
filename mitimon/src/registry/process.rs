//! Per-process image tables

use std::collections::BTreeMap;

use super::module::ModuleRecord;
use crate::domain::{Address, Pid};

/// Image name given to processes the registry has never heard of
pub const UNKNOWN_PROCESS_NAME: &str = "unknown";

/// One traced process and the modules loaded into it
///
/// Cloning produces an independent snapshot; later edits to the live record do
/// not show through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pid: Pid,
    image_name: String,
    images: BTreeMap<Address, ModuleRecord>,
}

impl ProcessRecord {
    /// Create a record, seeded with the kernel module when it is already known
    #[must_use]
    pub fn new(pid: Pid, image_name: impl Into<String>, kernel: Option<&ModuleRecord>) -> Self {
        let mut record = Self { pid, image_name: image_name.into(), images: BTreeMap::new() };
        if let Some(kernel) = kernel {
            record.add_image(kernel.clone());
        }
        record
    }

    /// Stand-in for a pid with no registry entry; never stored in the registry
    #[must_use]
    pub fn placeholder(pid: Pid, kernel: Option<&ModuleRecord>) -> Self {
        Self::new(pid, UNKNOWN_PROCESS_NAME, kernel)
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// Insert a module; returns `false` if its base is already taken
    pub fn add_image(&mut self, module: ModuleRecord) -> bool {
        match self.images.entry(module.base()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(module);
                true
            }
        }
    }

    pub fn remove_image(&mut self, base: Address) -> bool {
        self.images.remove(&base).is_some()
    }

    #[must_use]
    pub fn image(&self, base: Address) -> Option<&ModuleRecord> {
        self.images.get(&base)
    }

    pub fn images(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.images.values()
    }

    #[must_use]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Split an address into `(module base, offset)`
    ///
    /// Candidates are visited from the highest base at or below `address`
    /// downwards, so overlapping images resolve deterministically to the one
    /// with the greatest base that still contains the address.
    #[must_use]
    pub fn decompose(&self, address: Address) -> Option<(Address, u64)> {
        self.images
            .range(..=address)
            .rev()
            .find(|(_, module)| module.contains(address))
            .and_then(|(base, _)| address.offset_from(*base).map(|offset| (*base, offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessRecord {
        let mut record = ProcessRecord::new(Pid(100), "a.exe", None);
        assert!(record.add_image(ModuleRecord::from_raw(Address(0x1000), 0x2000, "a.exe")));
        assert!(record.add_image(ModuleRecord::from_raw(Address(0x10000), 0x1000, "b.dll")));
        record
    }

    #[test]
    fn test_decompose_hits_and_misses() {
        let record = record();

        assert_eq!(record.decompose(Address(0x1500)), Some((Address(0x1000), 0x500)));
        assert_eq!(record.decompose(Address(0x1000)), Some((Address(0x1000), 0)));
        assert_eq!(record.decompose(Address(0x10FFF)), Some((Address(0x10000), 0xFFF)));
        assert_eq!(record.decompose(Address(0x3000)), None);
        assert_eq!(record.decompose(Address(0x5000)), None);
        assert_eq!(record.decompose(Address(0x0FFF)), None);
    }

    #[test]
    fn test_decompose_nested_overlap_is_deterministic() {
        let mut record = ProcessRecord::new(Pid(1), "x", None);
        record.add_image(ModuleRecord::from_raw(Address(0x1000), 0x10000, "outer.dll"));
        record.add_image(ModuleRecord::from_raw(Address(0x4000), 0x1000, "inner.dll"));

        assert_eq!(record.decompose(Address(0x4800)), Some((Address(0x4000), 0x800)));
        // Past the inner image, the outer one still contains the address
        assert_eq!(record.decompose(Address(0x6000)), Some((Address(0x1000), 0x5000)));
    }

    #[test]
    fn test_add_image_keeps_first() {
        let mut record = record();
        assert!(!record.add_image(ModuleRecord::from_raw(Address(0x1000), 0x10, "other.dll")));
        assert_eq!(record.image(Address(0x1000)).unwrap().name(), "a");
    }

    #[test]
    fn test_remove_unknown_image() {
        let mut record = record();
        assert!(!record.remove_image(Address(0x9999)));
        assert_eq!(record.image_count(), 2);
        assert!(record.remove_image(Address(0x10000)));
        assert_eq!(record.image_count(), 1);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut live = record();
        let snapshot = live.clone();
        live.remove_image(Address(0x1000));

        assert!(snapshot.image(Address(0x1000)).is_some());
        assert!(live.image(Address(0x1000)).is_none());
    }

    #[test]
    fn test_placeholder_seeded_with_kernel() {
        let kernel = ModuleRecord::from_raw(Address(0xFFFF_F800_0000_0000), 0x100_0000, "ntoskrnl.exe");
        let record = ProcessRecord::placeholder(Pid(42), Some(&kernel));

        assert_eq!(record.image_name(), UNKNOWN_PROCESS_NAME);
        assert_eq!(record.image_count(), 1);
        assert_eq!(
            record.decompose(Address(0xFFFF_F800_0000_1234)),
            Some((Address(0xFFFF_F800_0000_0000), 0x1234))
        );
    }
}

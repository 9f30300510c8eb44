// =============================================================================
// MinimalOS NextGen - Pager Address Translation
// =============================================================================
//
// The mutex broker never walks hardware page tables itself. It asks an
// `AddressSpace` (the trapping task's view of memory) to translate the
// mutex word's virtual address into the physical key.
//
// The pager already tracks every mapping it installs for a task, so the
// shadow map below (`PageMap`) answers translations without touching CR3:
//
//   virtual page number ──► PageTableEntry { phys frame | flags }
//
// A translation succeeds only for a PRESENT leaf that is USER-accessible;
// anything else is "unmapped" from the trapping task's point of view and
// the boundary turns it into -EINVAL.
//
// ENTRY LAYOUT (same bit positions as the x86_64 PTE):
//   ```text
//   63  62..52  51..12       11..9   8   7   6   5   4   3   2   1   0
//   ┌───┬──────┬────────────┬───────┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//   │NXE│ Avail│ Phys Addr  │ Avail │ G │PS │ D │ A │PCD│PWT│U/S│R/W│ P │
//   └───┴──────┴────────────┴───────┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//   ```
//
// =============================================================================

use alloc::collections::BTreeMap;
use bitflags::bitflags;

use crate::memory::address::{PhysAddr, VirtAddr, PAGE_SIZE};

// =============================================================================
// Translation collaborator
// =============================================================================

/// A task's address space, as far as the mutex broker is concerned.
///
/// `translate` must not block: it runs on the trap path before the control
/// lock is taken, but the caller may still be holding its own locks.
pub trait AddressSpace {
    /// Translates `virt` to the physical address it maps to (page offset
    /// included), or `None` if the address is not mapped for user access.
    fn translate(&self, virt: VirtAddr) -> Option<PhysAddr>;
}

impl<A: AddressSpace + ?Sized> AddressSpace for &A {
    fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        (**self).translate(virt)
    }
}

// =============================================================================
// Page Table Flags
// =============================================================================

bitflags! {
    /// Page attributes recorded for each mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTableFlags: u64 {
        /// Page is present in physical memory.
        const PRESENT       = 1 << 0;

        /// Page is writable.
        const WRITABLE      = 1 << 1;

        /// Page is accessible from user mode (Ring 3).
        const USER          = 1 << 2;

        /// No-Execute.
        const NO_EXECUTE    = 1 << 63;
    }
}

impl PageTableFlags {
    /// Ordinary user data page: the only kind a mutex word may live in.
    pub const USER_DATA: Self =
        Self::PRESENT.union(Self::WRITABLE).union(Self::USER).union(Self::NO_EXECUTE);

    /// Pager-private page (mapped for the pager, invisible to the task).
    pub const PAGER_DATA: Self =
        Self::PRESENT.union(Self::WRITABLE).union(Self::NO_EXECUTE);
}

// =============================================================================
// Page Table Entry
// =============================================================================

/// Mask for extracting the physical frame from an entry.
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// One shadow mapping: physical frame plus attributes, packed like a PTE.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// Packs a page-aligned frame and its flags.
    #[inline]
    pub fn new(frame: PhysAddr, flags: PageTableFlags) -> Self {
        debug_assert!(
            frame.is_page_aligned(),
            "VMM: page table entry address must be page-aligned"
        );
        Self((frame.as_u64() & ADDR_MASK) | flags.bits())
    }

    /// Returns the flags portion of this entry.
    #[inline]
    pub fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0)
    }

    /// Returns the physical frame stored in this entry.
    #[inline]
    pub fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & ADDR_MASK)
    }

    /// Returns `true` if the PRESENT bit is set.
    #[inline]
    pub fn is_present(self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    /// Returns `true` if userspace may touch this page.
    #[inline]
    pub fn is_user(self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT | PageTableFlags::USER)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PTE({} {:?})", self.addr(), self.flags())
        } else {
            write!(f, "PTE(empty)")
        }
    }
}

// =============================================================================
// Error types
// =============================================================================

/// Error returned when a mapping operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The virtual page is already mapped.
    AlreadyMapped,
    /// The virtual address lies outside user space.
    NotUserAddress,
}

/// Error returned when an unmap operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapError {
    /// The virtual address is not currently mapped.
    NotMapped,
}

// =============================================================================
// PageMap: the pager's shadow of a task's user mappings
// =============================================================================

/// Per-task record of the user pages the pager has installed.
#[derive(Debug, Default)]
pub struct PageMap {
    pages: BTreeMap<u64, PageTableEntry>,
}

impl PageMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Records a 4 KiB mapping `virt → frame`.
    ///
    /// Both addresses are rounded down to their page.
    pub fn map(
        &mut self,
        virt: VirtAddr,
        frame: PhysAddr,
        flags: PageTableFlags,
    ) -> Result<(), MapError> {
        if !virt.is_user() {
            return Err(MapError::NotUserAddress);
        }
        let vpn = virt.as_u64() / PAGE_SIZE;
        if self.pages.contains_key(&vpn) {
            return Err(MapError::AlreadyMapped);
        }
        self.pages
            .insert(vpn, PageTableEntry::new(frame.page_align_down(), flags));
        Ok(())
    }

    /// Records `count` consecutive pages starting at `virt` → `frame`.
    ///
    /// All-or-nothing: on failure no page of the range is left mapped.
    pub fn map_range(
        &mut self,
        virt: VirtAddr,
        frame: PhysAddr,
        count: u64,
        flags: PageTableFlags,
    ) -> Result<(), MapError> {
        for i in 0..count {
            let offset = i * PAGE_SIZE;
            if let Err(e) = self.map(VirtAddr::new(virt.as_u64() + offset), frame + offset, flags) {
                for j in 0..i {
                    let _ = self.unmap(VirtAddr::new(virt.as_u64() + j * PAGE_SIZE));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Removes the mapping for the page containing `virt`, returning its frame.
    pub fn unmap(&mut self, virt: VirtAddr) -> Result<PhysAddr, UnmapError> {
        self.pages
            .remove(&(virt.as_u64() / PAGE_SIZE))
            .map(PageTableEntry::addr)
            .ok_or(UnmapError::NotMapped)
    }

    /// Returns the entry for the page containing `virt`, if any.
    pub fn entry(&self, virt: VirtAddr) -> Option<PageTableEntry> {
        self.pages.get(&(virt.as_u64() / PAGE_SIZE)).copied()
    }

    /// Number of mapped pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl AddressSpace for PageMap {
    fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let entry = self.entry(virt)?;
        if !entry.is_user() {
            return None;
        }
        Some(entry.addr() + virt.page_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_keeps_page_offset() {
        let mut map = PageMap::new();
        map.map(VirtAddr::new(0x40_0000), PhysAddr::new(0x9000), PageTableFlags::USER_DATA)
            .unwrap();
        assert_eq!(
            map.translate(VirtAddr::new(0x40_0010)),
            Some(PhysAddr::new(0x9010))
        );
        assert_eq!(map.translate(VirtAddr::new(0x40_1000)), None);
    }

    #[test]
    fn pager_private_pages_do_not_translate() {
        let mut map = PageMap::new();
        map.map(VirtAddr::new(0x5000), PhysAddr::new(0xA000), PageTableFlags::PAGER_DATA)
            .unwrap();
        assert_eq!(map.translate(VirtAddr::new(0x5000)), None);
    }

    #[test]
    fn double_map_and_unmap() {
        let mut map = PageMap::new();
        let virt = VirtAddr::new(0x7000);
        map.map(virt, PhysAddr::new(0x1000), PageTableFlags::USER_DATA).unwrap();
        assert_eq!(
            map.map(virt, PhysAddr::new(0x2000), PageTableFlags::USER_DATA),
            Err(MapError::AlreadyMapped)
        );
        assert_eq!(map.unmap(virt), Ok(PhysAddr::new(0x1000)));
        assert_eq!(map.unmap(virt), Err(UnmapError::NotMapped));
        assert!(map.is_empty());
    }

    #[test]
    fn kernel_half_is_rejected() {
        let mut map = PageMap::new();
        assert_eq!(
            map.map(
                VirtAddr::new(0xFFFF_8000_0000_0000),
                PhysAddr::new(0x1000),
                PageTableFlags::USER_DATA
            ),
            Err(MapError::NotUserAddress)
        );
    }

    #[test]
    fn map_range_is_all_or_nothing() {
        let mut map = PageMap::new();
        map.map(VirtAddr::new(0x12000), PhysAddr::new(0x1000), PageTableFlags::USER_DATA)
            .unwrap();
        let result = map.map_range(
            VirtAddr::new(0x10000),
            PhysAddr::new(0x20000),
            4,
            PageTableFlags::USER_DATA,
        );
        assert_eq!(result, Err(MapError::AlreadyMapped));
        assert_eq!(map.len(), 1);

        map.map_range(VirtAddr::new(0x30000), PhysAddr::new(0x40000), 3, PageTableFlags::USER_DATA)
            .unwrap();
        assert_eq!(
            map.translate(VirtAddr::new(0x32008)),
            Some(PhysAddr::new(0x42008))
        );
    }
}

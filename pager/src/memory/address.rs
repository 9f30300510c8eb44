// =============================================================================
// MinimalOS NextGen - Pager Address Types
// =============================================================================
//
// A userspace mutex is named by the virtual address of its word, but two
// tasks sharing that word may map it at different virtual addresses. The
// broker therefore keys every contended mutex by the PHYSICAL address the
// word translates to, the one identity every mapping agrees on.
//
// Mixing the two up would silently split one mutex into two registry entries
// (lost wakeup) or merge two mutexes into one (spurious handoff), so they
// are separate newtypes. Converting between them only happens through an
// `AddressSpace` translation (see vmm.rs).
//
// x86_64 ADDRESS SPACE:
//   - Physical: 52 bits max
//   - Virtual: 48 bits canonical, lower half is user space
//     0x0000_0000_0000_0000 .. 0x0000_7FFF_FFFF_FFFF
//
// =============================================================================

use core::fmt;

// =============================================================================
// PhysAddr: the contention key
// =============================================================================

/// A physical memory address.
///
/// Used as the registry key for contended mutexes: stable across every task
/// that maps the same physical page, whatever virtual address it picked.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Creates a new physical address.
    ///
    /// # Panics
    /// Debug-asserts that the address fits in 52 bits.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        debug_assert!(
            addr & 0xFFF0_0000_0000_0000 == 0,
            "Physical address exceeds 52-bit limit"
        );
        Self(addr)
    }

    /// Returns the raw u64 value of this physical address.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this address is aligned to a 4KB page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Aligns this address down to the nearest 4KB page boundary.
    #[inline]
    pub const fn page_align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }
}

/// The `P:` prefix distinguishes physical keys from virtual addresses in
/// log output.
impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P:{:#010X}", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P:{:#010X}", self.0)
    }
}

/// Byte offset within a physical region (page base + word offset).
impl core::ops::Add<u64> for PhysAddr {
    type Output = Self;
    #[inline]
    fn add(self, offset: u64) -> Self {
        Self::new(self.0 + offset)
    }
}

// =============================================================================
// VirtAddr: what userspace hands us
// =============================================================================

/// A virtual memory address as seen by the trapping task.
///
/// Built from untrusted syscall arguments, so construction does no
/// validation. The trap boundary bounds it against the configured user
/// range before it is ever translated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Wraps a raw virtual address without validation.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw u64 value of this virtual address.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is a user-space address (lower half).
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < USER_SPACE_END
    }

    /// Extracts the 12-bit page offset (the part within a 4KB page).
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V:{:#018X}", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V:{:#018X}", self.0)
    }
}

// =============================================================================
// Constants
// =============================================================================

/// Size of a standard page (4 KiB).
pub const PAGE_SIZE: u64 = 4096;

/// The upper bound of user-space canonical addresses.
/// Anything at or above this address is kernel memory.
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Size of a userspace mutex word in bytes.
pub const MUTEX_WORD_SIZE: u64 = 4;

//! Page-granular sizing for linear memories.

use std::fmt;

/// The size of one WebAssembly page: 64 KiB.
pub const WASM_PAGE_SIZE: usize = 0x10000;

/// How many pages a 32-bit linear memory can address.
pub const WASM_MAX_PAGES: u32 = 0x10000;

/// A count of WebAssembly pages.
///
/// Linear memories are sized, bounded and grown in whole pages; the linker
/// never deals in partial pages, so all size arithmetic lives on this
/// newtype.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pages(pub u32);

impl Pages {
    /// The upper bound of any page count, [`WASM_MAX_PAGES`].
    pub const MAX: Self = Self(WASM_MAX_PAGES);

    /// Add `more` pages, or `None` once the sum would pass the 32-bit
    /// address-space limit.
    pub fn checked_add(self, more: Self) -> Option<Self> {
        let total = u64::from(self.0) + u64::from(more.0);
        if total <= u64::from(WASM_MAX_PAGES) {
            Some(Self(total as u32))
        } else {
            None
        }
    }

    /// Subtract `fewer` pages, or `None` if that would go negative.
    pub fn checked_sub(self, fewer: Self) -> Option<Self> {
        self.0.checked_sub(fewer.0).map(Self)
    }

    /// The number of bytes covered by this many pages.
    pub fn byte_size(self) -> usize {
        (self.0 as usize) * WASM_PAGE_SIZE
    }
}

impl fmt::Display for Pages {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

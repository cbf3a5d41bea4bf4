//! Recovering the load base of a module nobody announced
//!
//! The loader only ever relocates an image by whole pages, so the low 12 bits
//! of any byte's runtime address equal the low 12 bits of its RVA no matter
//! where the image lands. Given one runtime address believed to lie inside a
//! known export, that is enough to pin down the image base:
//!
//! ```text
//! observed  = 0x7FFE_1234      symbol RVA = 0x2234
//! symPage   = 0x7FFE_1000      (low 12 bits match: no adjustment)
//! base      = symPage - PageAlign(0x2234) = 0x7FFE_1000 - 0x2000 = 0x7FFD_F000
//! ```
//!
//! When the observed address is a few bytes into the function body and that
//! walks across a page boundary, its in-page offset is *smaller* than the
//! symbol's. The observed page is then one past the symbol's page and gets
//! pulled back by one page before subtracting.
//!
//! The guess is only as good as the assumption that the observed address is
//! within one page of the export's entry point. The caller verifies it by
//! loading the module for real at the guessed base.

use crate::domain::Address;

pub const PAGE_SIZE: u64 = 0x1000;
const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Round an address down to its page
#[must_use]
pub fn page_align(value: u64) -> u64 {
    value & !PAGE_MASK
}

/// Offset within the page (the low 12 bits)
#[must_use]
pub fn page_offset(value: u64) -> u64 {
    value & PAGE_MASK
}

/// Result of [`guess_image_base`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseGuess {
    pub base: Address,
    /// The observed address sat on the page after the symbol's entry page
    pub next_page: bool,
}

/// Compute the probable load base from a symbol RVA and one observed address
#[must_use]
pub fn guess_image_base(symbol_rva: u64, observed: Address) -> BaseGuess {
    let next_page = page_offset(observed.0) < page_offset(symbol_rva);

    let mut symbol_page = page_align(observed.0);
    if next_page {
        symbol_page = symbol_page.wrapping_sub(PAGE_SIZE);
    }

    BaseGuess {
        base: Address(symbol_page.wrapping_sub(page_align(symbol_rva))),
        next_page,
    }
}

/// Round a size up to a whole number of pages
#[must_use]
pub fn page_round_up(value: u64) -> u64 {
    value.saturating_add(PAGE_MASK) & !PAGE_MASK
}

#![no_std]
//! Trait boundaries for the external capabilities the flash-backed object queue
//! consumes: a page-addressable NAND flash driver and a wall-clock source.
//!
//! Neither trait is implemented against real hardware here — that is an external
//! collaborator's responsibility (see `flashq-core`'s crate docs). This crate only
//! defines the shape of the capability and, behind `#[cfg(test)]`-free `pub mod mock`,
//! a RAM-backed implementation used by `flashq-core`'s own tests.

mod address;
mod fmt;
pub mod iter;
pub mod mock;

pub use address::{BlockId, FlashAddress, PageId};

/// A page-addressable NAND flash device.
///
/// Reads and writes operate on a single page at a time; erase operates on a whole
/// block. Implementations report bad blocks rather than failing silently, and may
/// additionally surface bad blocks via [`Driver::page_write`] / [`Driver::block_erase`]
/// returning an error — either signal is honored by the engine built on top.
pub trait Driver {
    /// Device-specific I/O error.
    type Error: core::fmt::Debug;

    /// Number of blocks on the device.
    const NUM_BLOCKS: u32;

    /// Number of pages per block.
    const PAGES_PER_BLOCK: u32;

    /// Size in bytes of a single page.
    const PAGE_SIZE: usize;

    /// Read exactly one page's worth of data (or fewer trailing bytes, per `buf.len()`)
    /// starting at `addr`.
    fn page_read(&mut self, addr: FlashAddress, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `buf` (at most `PAGE_SIZE` bytes) into the page at `addr`.
    fn page_write(&mut self, addr: FlashAddress, buf: &[u8]) -> Result<(), Self::Error>;

    /// Erase a whole block, returning it to the all-ones state.
    fn block_erase(&mut self, block: BlockId) -> Result<(), Self::Error>;

    /// Query whether the device considers `block` permanently unusable.
    fn is_bad(&mut self, block: BlockId) -> Result<bool, Self::Error>;

    /// Diagnostic mapping from a logical block number to whatever physical
    /// identifier the device uses internally (chip-select, die, plane, ...).
    fn phys_block(&self, block: BlockId) -> u32;

    /// Iterate over every block index on the device, in order.
    fn block_iter(&self) -> iter::BlockIter {
        iter::BlockIter {
            count: 0,
            block_count: Self::NUM_BLOCKS as u16,
        }
    }
}

/// Wall-clock source, consumed at enqueue time to stamp each object's header.
pub trait Clock {
    /// Seconds since whatever epoch the caller cares about; only used for display
    /// and for a monotonically-informative (not monotonically-guaranteed) header field.
    fn now_secs(&self) -> u64;
}

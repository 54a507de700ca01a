use crate::fmt;
use crate::{BlockId, Driver, FlashAddress, PageId};

/// A RAM-backed flash device used by `flashq-core`'s tests.
///
/// Mirrors the shape of `embedded_nand::test::VirtualNandFlash` from the driver
/// ecosystem this crate's `Driver` trait is modeled on, but addresses pages
/// directly rather than flat byte offsets, and supports fault injection so the
/// engine's bad-block and write-failure recovery paths are exercisable.
#[derive(Debug, Clone)]
pub struct VirtualFlash<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize>
{
    storage: [[[u8; PAGE_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT],
    bad: [bool; BLOCK_COUNT],
    /// One-shot fault: the next write to this address fails, then the injection clears.
    fail_write_once: Option<FlashAddress>,
    /// One-shot fault: the next erase of this block fails, then the injection clears.
    fail_erase_once: Option<BlockId>,
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize>
    VirtualFlash<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    pub fn new() -> Self {
        Self {
            storage: [[[0xFF; PAGE_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT],
            bad: [false; BLOCK_COUNT],
            fail_write_once: None,
            fail_erase_once: None,
        }
    }

    /// Mark `block` bad for [`Driver::is_bad`], without touching its contents.
    pub fn mark_bad(&mut self, block: BlockId) {
        fmt::debug!("mock flash: marking block {} bad", block.as_u16());
        self.bad[block.as_usize()] = true;
    }

    /// Arrange for the next write to `addr` to fail with [`Error::Injected`].
    pub fn fail_next_write_at(&mut self, addr: FlashAddress) {
        fmt::trace!(
            "mock flash: arming write-fault at block {} page {}",
            addr.block.as_u16(),
            addr.page.as_usize()
        );
        self.fail_write_once = Some(addr);
    }

    /// Arrange for the next erase of `block` to fail with [`Error::Injected`].
    pub fn fail_next_erase(&mut self, block: BlockId) {
        fmt::trace!("mock flash: arming erase-fault at block {}", block.as_u16());
        self.fail_erase_once = Some(block);
    }
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize> Default
    for VirtualFlash<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Injected failure from `fail_next_write_at` / `fail_next_erase`.
    Injected,
    OutOfBounds,
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize> Driver
    for VirtualFlash<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    type Error = Error;

    const NUM_BLOCKS: u32 = BLOCK_COUNT as u32;
    const PAGES_PER_BLOCK: u32 = PAGES_PER_BLOCK as u32;
    const PAGE_SIZE: usize = PAGE_SIZE;

    fn page_read(&mut self, addr: FlashAddress, buf: &mut [u8]) -> Result<(), Self::Error> {
        if addr.block.as_usize() >= BLOCK_COUNT || addr.page.as_usize() >= PAGES_PER_BLOCK {
            return Err(Error::OutOfBounds);
        }
        let page = &self.storage[addr.block.as_usize()][addr.page.as_usize()];
        buf.copy_from_slice(&page[..buf.len()]);
        Ok(())
    }

    fn page_write(&mut self, addr: FlashAddress, buf: &[u8]) -> Result<(), Self::Error> {
        if addr.block.as_usize() >= BLOCK_COUNT || addr.page.as_usize() >= PAGES_PER_BLOCK {
            return Err(Error::OutOfBounds);
        }
        if self.fail_write_once == Some(addr) {
            self.fail_write_once = None;
            fmt::warn!(
                "mock flash: injected write failure at block {} page {}",
                addr.block.as_u16(),
                addr.page.as_usize()
            );
            return Err(Error::Injected);
        }
        let page = &mut self.storage[addr.block.as_usize()][addr.page.as_usize()];
        // NAND semantics: writing can only clear bits, never set them, within an erase cycle.
        for (a, b) in page.iter_mut().zip(buf.iter()) {
            *a &= *b;
        }
        Ok(())
    }

    fn block_erase(&mut self, block: BlockId) -> Result<(), Self::Error> {
        if block.as_usize() >= BLOCK_COUNT {
            return Err(Error::OutOfBounds);
        }
        if self.fail_erase_once == Some(block) {
            self.fail_erase_once = None;
            fmt::warn!("mock flash: injected erase failure at block {}", block.as_u16());
            return Err(Error::Injected);
        }
        self.storage[block.as_usize()]
            .iter_mut()
            .for_each(|page| page.fill(0xFF));
        Ok(())
    }

    fn is_bad(&mut self, block: BlockId) -> Result<bool, Self::Error> {
        if block.as_usize() >= BLOCK_COUNT {
            return Err(Error::OutOfBounds);
        }
        let bad = self.bad[block.as_usize()];
        if bad {
            fmt::trace!("mock flash: block {} reported bad", block.as_u16());
        }
        Ok(bad)
    }

    fn phys_block(&self, block: BlockId) -> u32 {
        block.as_u16() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Adds logging to the test automatically; control with RUST_LOG="LEVEL"
    // (requires --features log passed to cargo test).
    use test_log::test;

    const PAGE_SIZE: usize = 64;
    const PAGES_PER_BLOCK: usize = 4;
    const BLOCK_COUNT: usize = 8;

    #[test]
    fn write_then_read_round_trips() {
        let mut flash = VirtualFlash::<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>::new();
        let addr = FlashAddress::new(BlockId::new(2), PageId::new(1));
        let data = [0xAB; PAGE_SIZE];
        flash.page_write(addr, &data).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        flash.page_read(addr, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn erase_resets_to_all_ones() {
        let mut flash = VirtualFlash::<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>::new();
        let addr = FlashAddress::new(BlockId::new(0), PageId::new(0));
        flash.page_write(addr, &[0x00; PAGE_SIZE]).unwrap();
        flash.block_erase(BlockId::new(0)).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        flash.page_read(addr, &mut out).unwrap();
        assert_eq!(out, [0xFF; PAGE_SIZE]);
    }

    #[test]
    fn injected_write_failure_fires_once() {
        let mut flash = VirtualFlash::<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>::new();
        let addr = FlashAddress::new(BlockId::new(1), PageId::new(0));
        flash.fail_next_write_at(addr);
        assert!(flash.page_write(addr, &[0; PAGE_SIZE]).is_err());
        assert!(flash.page_write(addr, &[0; PAGE_SIZE]).is_ok());
    }

    #[test]
    fn bad_block_is_reported() {
        let mut flash = VirtualFlash::<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>::new();
        flash.mark_bad(BlockId::new(3));
        assert!(flash.is_bad(BlockId::new(3)).unwrap());
        assert!(!flash.is_bad(BlockId::new(4)).unwrap());
    }
}

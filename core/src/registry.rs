//! Block registry: the dense array of per-block control records plus the free and
//! bad intrusive doubly-linked lists threaded through it.
//!
//! Modeled on `FlashMap`'s block bookkeeping (`next_spare_block`,
//! `checked_erase_block`), generalized from a single "next spare block" cursor
//! to full free/bad lists with lazy erase-on-allocate.

use flash_device::{BlockId, Driver};

use crate::config::FLASH_MAX_PAGES_PER_BLOCK;
use crate::error::Error;

const BITMAP_BYTES: usize = FLASH_MAX_PAGES_PER_BLOCK.div_ceil(8);

/// Per-block control record: chain links, the usable page ceiling, and a
/// page-liveness bitmap.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub next: BlockId,
    pub prev: BlockId,
    /// Highest usable page index in this block. Equals `pages_per_block` for a
    /// healthy block; reduced to the failing page index after a mid-block write
    /// failure (§4.2).
    pub max_pages: u32,
    page_use: [u8; BITMAP_BYTES],
}

impl BlockRecord {
    fn detached(pages_per_block: u32) -> Self {
        BlockRecord {
            next: BlockId::INVALID,
            prev: BlockId::INVALID,
            max_pages: pages_per_block,
            page_use: [0xFF; BITMAP_BYTES],
        }
    }

    pub fn is_live(&self, page: u32) -> bool {
        let (byte, bit) = (page as usize / 8, page as usize % 8);
        self.page_use[byte] & (1 << bit) != 0
    }

    /// Clear the liveness bit for `page`. Returns `true` if the bit was
    /// previously set (i.e. this call is the one that deletes the page).
    pub fn delete_page(&mut self, page: u32) -> bool {
        let (byte, bit) = (page as usize / 8, page as usize % 8);
        let was_live = self.page_use[byte] & (1 << bit) != 0;
        self.page_use[byte] &= !(1 << bit);
        was_live
    }

    /// Count of live (or unused) pages among `[0, max_pages)`.
    pub fn live_count(&self) -> u32 {
        (0..self.max_pages).filter(|&p| self.is_live(p)).count() as u32
    }
}

/// An intrusive doubly-linked list threaded through a [`BlockRegistry`]'s record
/// array. `out` is the dequeue end (allocation pops here), `back` is the enqueue
/// end (reclaim appends here).
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockList {
    pub out: BlockId,
    pub back: BlockId,
    pub count: u32,
}

impl BlockList {
    fn empty() -> Self {
        BlockList {
            out: BlockId::INVALID,
            back: BlockId::INVALID,
            count: 0,
        }
    }
}

/// Append `block` at the enqueue end of `list`. No removal primitive is exposed;
/// removal from `out` is inlined in [`BlockRegistry::allocate`].
fn list_append(blocks: &mut [BlockRecord], list: &mut BlockList, block: BlockId) {
    let old_back = list.back;
    blocks[block.as_usize()].prev = old_back;
    blocks[block.as_usize()].next = BlockId::INVALID;
    if old_back.is_valid() {
        blocks[old_back.as_usize()].next = block;
    } else {
        list.out = block;
    }
    list.back = block;
    list.count += 1;
}

pub struct BlockRegistry {
    blocks: Vec<BlockRecord>,
    pub free: BlockList,
    pub bad: BlockList,
    pub used_count: u32,
    pub error_count: u32,
    pages_per_block: u32,
}

impl BlockRegistry {
    pub fn new(num_blocks: u32, pages_per_block: u32) -> Self {
        BlockRegistry {
            blocks: (0..num_blocks)
                .map(|_| BlockRecord::detached(pages_per_block))
                .collect(),
            free: BlockList::empty(),
            bad: BlockList::empty(),
            used_count: 0,
            error_count: 0,
            pages_per_block,
        }
    }

    pub fn num_blocks(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn pages_per_block(&self) -> u32 {
        self.pages_per_block
    }

    pub fn record(&self, block: BlockId) -> &BlockRecord {
        &self.blocks[block.as_usize()]
    }

    pub fn record_mut(&mut self, block: BlockId) -> &mut BlockRecord {
        &mut self.blocks[block.as_usize()]
    }

    /// Reset a block's bookkeeping and place it on the free list, or the bad list
    /// if the driver now reports it bad. Does not erase; erase happens lazily at
    /// allocation time (§4.1). Returns `true` if the block landed on the free list.
    pub fn reclaim<D: Driver>(&mut self, driver: &mut D, block: BlockId) -> Result<bool, Error<D>>
    where
        D: std::fmt::Debug,
    {
        self.blocks[block.as_usize()] = BlockRecord::detached(self.pages_per_block);
        self.used_count = self.used_count.saturating_sub(1);
        match driver.is_bad(block) {
            Ok(true) => {
                list_append(&mut self.blocks, &mut self.bad, block);
                Ok(false)
            }
            Ok(false) => {
                list_append(&mut self.blocks, &mut self.free, block);
                Ok(true)
            }
            Err(e) => {
                self.error_count += 1;
                Err(Error::Flash(e))
            }
        }
    }

    /// Pop a block from the free list, erasing it before handing it to the
    /// caller. A block whose erase fails is demoted to the bad list and the next
    /// free candidate is tried. Fails only once the free list is exhausted.
    pub fn allocate<D: Driver>(&mut self, driver: &mut D) -> Result<BlockId, Error<D>>
    where
        D: std::fmt::Debug,
    {
        loop {
            let candidate = self.free.out;
            if !candidate.is_valid() {
                return Err(Error::FailedStore);
            }
            let next = self.blocks[candidate.as_usize()].next;
            self.free.out = next;
            if next.is_valid() {
                self.blocks[next.as_usize()].prev = BlockId::INVALID;
            } else {
                self.free.back = BlockId::INVALID;
            }
            self.free.count -= 1;

            match driver.block_erase(candidate) {
                Ok(()) => {
                    self.blocks[candidate.as_usize()] = BlockRecord::detached(self.pages_per_block);
                    self.used_count += 1;
                    return Ok(candidate);
                }
                Err(_) => {
                    self.error_count += 1;
                    list_append(&mut self.blocks, &mut self.bad, candidate);
                }
            }
        }
    }

    /// `init(FORMAT)`: reclaim every block on the device. Returns the number of
    /// blocks processed (landing on either the free or the bad list).
    pub fn format<D: Driver>(&mut self, driver: &mut D) -> Result<u32, Error<D>>
    where
        D: std::fmt::Debug,
    {
        let n = self.num_blocks();
        for i in 0..n {
            self.reclaim(driver, BlockId::new(i as u16))?;
        }
        Ok(n)
    }

    /// Splice `block` out of its current chain (`prev.next <- next`,
    /// `next.prev <- prev`) and reclaim it. Used when a block becomes entirely
    /// deleted (§4.3) or needs bridging-around after a write failure (§4.2).
    pub fn unlink_and_reclaim<D: Driver>(
        &mut self,
        driver: &mut D,
        block: BlockId,
    ) -> Result<bool, Error<D>>
    where
        D: std::fmt::Debug,
    {
        let (prev, next) = {
            let rec = self.record(block);
            (rec.prev, rec.next)
        };
        if prev.is_valid() {
            self.record_mut(prev).next = next;
        }
        if next.is_valid() {
            self.record_mut(next).prev = prev;
        }
        self.reclaim(driver, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_device::mock::VirtualFlash;
    use test_log::test;

    type Flash = VirtualFlash<64, 4, 8>;

    #[test]
    fn format_splits_blocks_between_free_and_bad() {
        let mut flash = Flash::new();
        flash.mark_bad(BlockId::new(3));
        let mut registry = BlockRegistry::new(8, 4);
        let reclaimed = registry.format(&mut flash).unwrap();
        assert_eq!(reclaimed, 8);
        assert_eq!(registry.free.count, 7);
        assert_eq!(registry.bad.count, 1);
        assert_eq!(registry.used_count, 0);
    }

    #[test]
    fn allocate_fails_once_free_list_is_exhausted() {
        let mut flash = Flash::new();
        let mut registry = BlockRegistry::new(8, 4);
        registry.format(&mut flash).unwrap();
        for _ in 0..8 {
            registry.allocate(&mut flash).unwrap();
        }
        assert!(matches!(
            registry.allocate(&mut flash),
            Err(Error::FailedStore)
        ));
        assert_eq!(registry.used_count, 8);
    }

    #[test]
    fn reclaim_after_allocate_returns_free_count_to_original() {
        let mut flash = Flash::new();
        let mut registry = BlockRegistry::new(8, 4);
        registry.format(&mut flash).unwrap();
        let allocated: Vec<_> = (0..8).map(|_| registry.allocate(&mut flash).unwrap()).collect();
        assert_eq!(registry.free.count, 0);
        // Reclaim in reverse order; the free list is a list, not a set, so this
        // still must restore the original count (P2).
        for block in allocated.into_iter().rev() {
            registry.reclaim(&mut flash, block).unwrap();
        }
        assert_eq!(registry.free.count, 8);
        assert_eq!(registry.used_count, 0);
    }

    #[test]
    fn erase_failure_during_allocate_demotes_to_bad_and_retries() {
        let mut flash = Flash::new();
        let mut registry = BlockRegistry::new(8, 4);
        registry.format(&mut flash).unwrap();
        flash.fail_next_erase(BlockId::new(0));
        let got = registry.allocate(&mut flash).unwrap();
        assert_ne!(got, BlockId::new(0));
        assert_eq!(registry.bad.count, 1);
        assert_eq!(registry.free.count, 6);
    }
}

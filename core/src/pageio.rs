//! Page-level read/write engine: walks page addresses through the block-linked
//! topology, handling write failures by truncating the current block and
//! chaining in a fresh replacement.

use flash_device::{Driver, FlashAddress, PageId};
use std::fmt::Debug;

use crate::error::Error;
use crate::registry::BlockRegistry;

fn precondition_ok(registry: &BlockRegistry, addr: FlashAddress) -> bool {
    addr.block.is_valid()
        && (addr.block.as_u16() as u32) < registry.num_blocks()
        && addr.page.as_u32() < registry.record(addr.block).max_pages
}

/// Write `buf` starting at `*addr`, advancing `*addr` past the last byte written
/// and extending the chain (allocating fresh blocks) as needed.
///
/// On a page-write failure, truncates the current block (or bridges around it,
/// if the failure was on the block's very first page) and splices in a freshly
/// allocated replacement, then retries the same bytes — see §4.2.
pub fn data_write<D: Driver + Debug>(
    registry: &mut BlockRegistry,
    driver: &mut D,
    addr: &mut FlashAddress,
    buf: &[u8],
) -> Result<(), Error<D>> {
    if !precondition_ok(registry, *addr) {
        return Err(Error::FailedStore);
    }

    let page_size = D::PAGE_SIZE;
    let mut offset = 0usize;
    while offset < buf.len() {
        // Extend the chain if the cursor has run off the end of the current block.
        if addr.page.as_u32() == registry.record(addr.block).max_pages {
            let fresh = registry.allocate(driver)?;
            registry.record_mut(addr.block).next = fresh;
            registry.record_mut(fresh).prev = addr.block;
            *addr = FlashAddress::new(fresh, PageId::new(0));
        }

        let chunk = (buf.len() - offset).min(page_size);
        let mut page_buf = vec![0u8; page_size];
        page_buf[..chunk].copy_from_slice(&buf[offset..offset + chunk]);

        match driver.page_write(*addr, &page_buf) {
            Ok(()) => {
                offset += chunk;
                addr.page += 1;
            }
            Err(_) => {
                registry.error_count += 1;
                let failing_page = addr.page.as_u32();
                let replacement = if failing_page > 0 {
                    // Prefix of this block is valid; truncate and keep it in the chain.
                    registry.record_mut(addr.block).max_pages = failing_page;
                    let fresh = registry.allocate(driver)?;
                    registry.record_mut(addr.block).next = fresh;
                    registry.record_mut(fresh).prev = addr.block;
                    fresh
                } else {
                    // The block is useless: bridge its predecessor straight to the
                    // replacement and reclaim the failed block.
                    let prev = registry.record(addr.block).prev;
                    let fresh = registry.allocate(driver)?;
                    if prev.is_valid() {
                        registry.record_mut(prev).next = fresh;
                        registry.record_mut(fresh).prev = prev;
                    }
                    registry.reclaim(driver, addr.block)?;
                    fresh
                };
                *addr = FlashAddress::new(replacement, PageId::new(0));
                // Retry the same chunk against the replacement block.
            }
        }
    }
    Ok(())
}

/// Read `buf.len()` bytes starting at `*addr`, following `next_block` links as
/// needed and advancing `*addr` past the last byte read. A missing `next` link
/// mid-read is a hard failure (§4.2).
pub fn data_read<D: Driver + Debug>(
    registry: &mut BlockRegistry,
    driver: &mut D,
    addr: &mut FlashAddress,
    buf: &mut [u8],
) -> Result<(), Error<D>> {
    if !precondition_ok(registry, *addr) {
        return Err(Error::FailedStore);
    }

    let page_size = D::PAGE_SIZE;
    let mut offset = 0usize;
    while offset < buf.len() {
        if addr.page.as_u32() == registry.record(addr.block).max_pages {
            let next = registry.record(addr.block).next;
            if !next.is_valid() {
                return Err(Error::FailedStore);
            }
            *addr = FlashAddress::new(next, PageId::new(0));
        }

        let chunk = (buf.len() - offset).min(page_size);
        let mut page_buf = vec![0u8; page_size];
        driver.page_read(*addr, &mut page_buf).map_err(|e| {
            registry.error_count += 1;
            Error::Flash(e)
        })?;
        buf[offset..offset + chunk].copy_from_slice(&page_buf[..chunk]);
        offset += chunk;
        addr.page += 1;
    }
    Ok(())
}

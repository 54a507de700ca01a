//! Object framing: header assembly on write, header validation and payload
//! scatter on read, resynchronization after a corrupt read, and page-granular
//! deletion with block reclaim.

use std::fmt::Debug;

use flash_device::{Clock, Driver, FlashAddress};

use crate::error::Error;
use crate::header::{ObjectHeader, Sid, HEADER_SIZE};
use crate::pageio::data_read;
use crate::pageio::data_write;
use crate::registry::BlockRegistry;

/// Assemble a header plus scatter-gathered `d1`/`d2` into `stage` and hand the
/// framed object off to [`data_write`], advancing `write_addr` past it.
///
/// `max_data_size` is the store's *total* buffer bound (payload + header, per
/// `create`'s convention). `stage` must be at least that large.
#[allow(clippy::too_many_arguments)]
pub fn object_write<D: Driver + Debug, C: Clock>(
    registry: &mut BlockRegistry,
    driver: &mut D,
    clock: &C,
    write_addr: &mut FlashAddress,
    handle: u32,
    max_data_size: usize,
    pages_per_block: u32,
    stage: &mut [u8],
    d1: &[u8],
    d2: &[u8],
) -> Result<Sid, Error<D>> {
    let needed = HEADER_SIZE + d1.len() + d2.len();
    if needed > max_data_size {
        return Err(Error::StoreFull);
    }
    let free_pages = registry.free.count.saturating_mul(pages_per_block) as usize;
    let page_size = D::PAGE_SIZE;
    if free_pages.saturating_mul(page_size) < needed {
        return Err(Error::StoreFull);
    }

    let sid = Sid::from_address(*write_addr, pages_per_block);
    let header = ObjectHeader {
        timestamp: clock.now_secs(),
        handle,
        size: (d1.len() + d2.len()) as u32,
        sid: sid.as_u32(),
    };
    stage[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    stage[HEADER_SIZE..HEADER_SIZE + d1.len()].copy_from_slice(d1);
    stage[HEADER_SIZE + d1.len()..needed].copy_from_slice(d2);

    data_write(registry, driver, write_addr, &stage[..needed])?;
    Ok(sid)
}

/// Read one object starting at `*addr` into `stage`, validating its header and
/// advancing `*addr` one page past the object's last page on success.
///
/// Returns `FailedStore` without touching flash if `already_locked` is set —
/// the caller (the store layer) owns the single-outstanding-lease check and
/// passes its current `stage_locked` flag through here, matching the source's
/// placement of that refusal inside `object_read` itself.
pub fn object_read<D: Driver + Debug>(
    registry: &mut BlockRegistry,
    driver: &mut D,
    addr: &mut FlashAddress,
    stage: &mut [u8],
    expected_handle: u32,
    max_data_size: usize,
    already_locked: bool,
) -> Result<ObjectHeader, Error<D>> {
    if already_locked {
        return Err(Error::FailedStore);
    }
    let page_size = D::PAGE_SIZE;
    if stage.len() < page_size {
        return Err(Error::FailedMem);
    }

    let mut cursor = *addr;
    data_read(registry, driver, &mut cursor, &mut stage[..page_size])?;
    let header = ObjectHeader::from_bytes(&stage[..HEADER_SIZE]).ok_or(Error::FailedStore)?;
    if header.size as usize > max_data_size || header.handle != expected_handle {
        return Err(Error::FailedStore);
    }

    let total = HEADER_SIZE + header.size as usize;
    if total > page_size {
        let remainder = total - page_size;
        if stage.len() < total {
            return Err(Error::FailedMem);
        }
        data_read(registry, driver, &mut cursor, &mut stage[page_size..page_size + remainder])?;
    }

    *addr = cursor;
    Ok(header)
}

/// Forward-walk pages from `*addr`, reading only a header-sized prefix of each,
/// until one's sync magic matches. Leaves `*addr` at the start of that page.
pub fn object_scan<D: Driver + Debug>(
    registry: &mut BlockRegistry,
    driver: &mut D,
    addr: &mut FlashAddress,
) -> Result<(), Error<D>> {
    let mut probe_buf = vec![0u8; HEADER_SIZE];
    let max_iters = registry.num_blocks() as u64 * registry.pages_per_block() as u64 + 1;
    for _ in 0..max_iters {
        let candidate = *addr;
        let mut probe = candidate;
        if data_read(registry, driver, &mut probe, &mut probe_buf).is_ok()
            && ObjectHeader::sync_matches(&probe_buf)
        {
            *addr = candidate;
            return Ok(());
        }
        *addr = probe;
    }
    Err(Error::FailedStore)
}

/// Translate `sid` to an address, confirm the on-flash header agrees, then
/// page-wise mark the object's pages deleted, reclaiming any block whose pages
/// are now entirely deleted.
pub fn object_delete<D: Driver + Debug>(
    registry: &mut BlockRegistry,
    driver: &mut D,
    sid: Sid,
    page_size: usize,
    pages_per_block: u32,
) -> Result<(), Error<D>> {
    let start = sid.to_address(pages_per_block);
    if !start.block.is_valid() || (start.block.as_u16() as u32) >= registry.num_blocks() {
        return Err(Error::FailedStore);
    }

    let mut header_buf = vec![0u8; HEADER_SIZE];
    let mut cursor = start;
    data_read(registry, driver, &mut cursor, &mut header_buf)?;
    let header = ObjectHeader::from_bytes(&header_buf).ok_or(Error::FailedStore)?;
    if header.sid != sid.as_u32() {
        return Err(Error::FailedStore);
    }

    let mut pages_left = header.page_count(page_size);
    let mut block = start.block;
    let mut page = start.page.as_u32();
    let mut deleted_in_block = registry.record(block).max_pages - registry.record(block).live_count();

    while pages_left > 0 {
        let max_pages = registry.record(block).max_pages;
        if registry.record_mut(block).delete_page(page) {
            deleted_in_block += 1;
        }
        pages_left -= 1;
        page += 1;

        if deleted_in_block >= max_pages {
            let next = registry.record(block).next;
            registry.unlink_and_reclaim(driver, block)?;
            if pages_left == 0 {
                break;
            }
            if !next.is_valid() {
                return Err(Error::FailedStore);
            }
            block = next;
            page = 0;
            deleted_in_block = registry.record(block).max_pages - registry.record(block).live_count();
        } else if page == max_pages {
            let next = registry.record(block).next;
            if pages_left == 0 {
                break;
            }
            if !next.is_valid() {
                return Err(Error::FailedStore);
            }
            block = next;
            page = 0;
            deleted_in_block = registry.record(block).max_pages - registry.record(block).live_count();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use flash_device::mock::VirtualFlash;
    use flash_device::PageId;
    use test_log::test;

    type Flash = VirtualFlash<64, 4, 8>;

    fn formatted() -> (Flash, BlockRegistry) {
        let mut flash = Flash::new();
        let mut registry = BlockRegistry::new(8, 4);
        registry.format(&mut flash).unwrap();
        (flash, registry)
    }

    #[test]
    fn write_then_read_round_trips_header_and_payload() {
        let (mut flash, mut registry) = formatted();
        let clock = FakeClock::new(42);
        let first = registry.allocate(&mut flash).unwrap();
        let mut write_addr = FlashAddress::new(first, PageId::new(0));
        let mut stage = vec![0u8; 64];
        let sid = object_write(
            &mut registry,
            &mut flash,
            &clock,
            &mut write_addr,
            0,
            64,
            4,
            &mut stage,
            b"hello",
            b" world",
        )
        .unwrap();

        let mut read_addr = FlashAddress::new(first, PageId::new(0));
        let mut read_stage = vec![0u8; 64];
        let header = object_read(&mut registry, &mut flash, &mut read_addr, &mut read_stage, 0, 64, false)
            .unwrap();
        assert_eq!(header.sid, sid.as_u32());
        assert_eq!(header.size as usize, 11);
        assert_eq!(&read_stage[HEADER_SIZE..HEADER_SIZE + 11], b"hello world");
    }

    #[test]
    fn object_read_refuses_when_already_locked() {
        let (mut flash, mut registry) = formatted();
        let first = registry.allocate(&mut flash).unwrap();
        let mut addr = FlashAddress::new(first, PageId::new(0));
        let mut stage = vec![0u8; 64];
        assert!(matches!(
            object_read(&mut registry, &mut flash, &mut addr, &mut stage, 0, 64, true),
            Err(Error::FailedStore)
        ));
    }

    #[test]
    fn scan_resynchronizes_past_a_corrupted_header() {
        let (mut flash, mut registry) = formatted();
        let clock = FakeClock::new(1);
        let first = registry.allocate(&mut flash).unwrap();
        let mut write_addr = FlashAddress::new(first, PageId::new(0));
        let mut stage = vec![0u8; 64];
        object_write(&mut registry, &mut flash, &clock, &mut write_addr, 0, 64, 4, &mut stage, b"one", &[])
            .unwrap();
        object_write(&mut registry, &mut flash, &clock, &mut write_addr, 0, 64, 4, &mut stage, b"two", &[])
            .unwrap();

        // Zero out the first object's page directly; NAND can only clear bits,
        // so this is a physically valid corruption that destroys the sync magic.
        flash
            .page_write(FlashAddress::new(first, PageId::new(0)), &[0u8; 64])
            .unwrap();

        let mut scan_addr = FlashAddress::new(first, PageId::new(0));
        object_scan(&mut registry, &mut flash, &mut scan_addr).unwrap();
        assert_eq!(scan_addr, FlashAddress::new(first, PageId::new(1)));
    }

    #[test]
    fn delete_reclaims_a_block_left_entirely_deleted() {
        let (mut flash, mut registry) = formatted();
        let clock = FakeClock::new(1);
        let first = registry.allocate(&mut flash).unwrap();
        let mut write_addr = FlashAddress::new(first, PageId::new(0));
        // Exactly fills all 4 pages of the block (248 bytes = header + payload).
        let payload = vec![0x11u8; 220];
        let mut stage = vec![0u8; 248];
        let sid = object_write(
            &mut registry,
            &mut flash,
            &clock,
            &mut write_addr,
            0,
            248,
            4,
            &mut stage,
            &payload,
            &[],
        )
        .unwrap();

        let free_before = registry.free.count;
        object_delete(&mut registry, &mut flash, sid, 64, 4).unwrap();
        assert_eq!(registry.free.count, free_before + 1);
        assert_eq!(registry.used_count, 0);
    }

    #[test]
    fn delete_leaves_a_partially_used_block_on_the_used_chain() {
        // A block with unused trailing pages cannot become "entirely deleted"
        // until every one of its pages has held (and lost) an object.
        let (mut flash, mut registry) = formatted();
        let clock = FakeClock::new(1);
        let first = registry.allocate(&mut flash).unwrap();
        let mut write_addr = FlashAddress::new(first, PageId::new(0));
        let mut stage = vec![0u8; 64];
        let sid = object_write(&mut registry, &mut flash, &clock, &mut write_addr, 0, 64, 4, &mut stage, b"x", &[])
            .unwrap();

        let free_before = registry.free.count;
        object_delete(&mut registry, &mut flash, sid, 64, 4).unwrap();
        assert_eq!(registry.free.count, free_before);
        assert_eq!(registry.used_count, 1);
    }
}

//! Flash-backed object queue: free-block management, linked-block read/write,
//! object framing, and multi-store multiplexing over one page-addressable NAND
//! device.
//!
//! The device driver and wall-clock are external collaborators — see
//! [`flash_device::Driver`] and [`flash_device::Clock`] — this crate owns
//! everything above that boundary: the block registry, the page-level engine,
//! object framing, the store table, and the public [`FlashQueue`] API that
//! serializes access to all of it behind one process-wide lock (§5).

mod fmt;

pub mod clock;
pub mod config;
pub mod error;
pub mod header;
pub mod object;
pub mod pageio;
pub mod registry;
pub mod store;

use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use flash_device::{Clock, Driver, FlashAddress, PageId};

pub use config::{Mode, StoreAttributes, FLASH_MAX_STORES};
pub use error::{Error, Result};
pub use header::Sid;

use registry::BlockRegistry;
use store::Store;

/// Snapshot returned by [`FlashQueue::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub free_count: u32,
    pub used_count: u32,
    pub bad_count: u32,
    pub error_count: u32,
}

struct Inner<D, C> {
    driver: D,
    clock: C,
    registry: BlockRegistry,
    stores: Vec<Store>,
}

/// The owning context for one flash device: the block registry, the store
/// table, and the driver/clock handles, all behind one mutex.
///
/// Mirrors the source's globals (driver, device lock, block registry, store
/// table) collapsed into a single constructed value, per the design notes'
/// "process-wide state" re-architecture — callers construct one via
/// [`FlashQueue::init`] and pass it explicitly (or share it behind an `Arc`).
pub struct FlashQueue<D: Driver + Debug, C: Clock> {
    inner: Mutex<Inner<D, C>>,
    /// Per-store object counts, outside the mutex so `getcount` never blocks
    /// on it (§5: "`getcount` does not take the lock").
    counts: Vec<AtomicU32>,
}

impl<D: Driver + Debug, C: Clock> FlashQueue<D, C> {
    /// `init(driver, mode)`: build a fresh context and, in [`Mode::Format`],
    /// reclaim every block. Returns the number of blocks reclaimed (0 for
    /// [`Mode::Recover`], which is currently a no-op — see the design notes).
    pub fn init(mut driver: D, clock: C, mode: Mode) -> Result<(Self, u32), D> {
        let mut registry = BlockRegistry::new(D::NUM_BLOCKS, D::PAGES_PER_BLOCK);
        let reclaimed = match mode {
            Mode::Format => registry.format(&mut driver)?,
            Mode::Recover => 0,
        };
        let stores = (0..FLASH_MAX_STORES).map(|_| Store::vacant()).collect();
        let counts = (0..FLASH_MAX_STORES).map(|_| AtomicU32::new(0)).collect();
        let queue = FlashQueue {
            inner: Mutex::new(Inner {
                driver,
                clock,
                registry,
                stores,
            }),
            counts,
        };
        fmt::info!("flashq: init complete, {} blocks reclaimed", reclaimed);
        Ok((queue, reclaimed))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<D, C>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `stats(out, log, reset)`: snapshot the registry's counters, optionally
    /// logging every bad block and/or zeroing `error_count`.
    pub fn stats(&self, log_bad_blocks: bool, reset_errors: bool) -> Stats {
        let mut inner = self.lock();
        let snapshot = Stats {
            free_count: inner.registry.free.count,
            used_count: inner.registry.used_count,
            bad_count: inner.registry.bad.count,
            error_count: inner.registry.error_count,
        };
        if log_bad_blocks {
            let mut b = inner.registry.bad.out;
            while b.is_valid() {
                fmt::warn!("flashq: bad block {}", b.as_u16());
                b = inner.registry.record(b).next;
            }
        }
        if reset_errors {
            inner.registry.error_count = 0;
        }
        snapshot
    }

    /// `create(attr?)`: allocate a store-table slot. `attr.max_data_size` must
    /// be at least `page_size`; the slot's actual buffer bound is that value
    /// plus the header size, per the source's "field names the total buffer
    /// bound" convention.
    pub fn create(&self, attr: Option<StoreAttributes>) -> Result<usize, D> {
        if attr.is_some_and(|a| a.max_data_size < D::PAGE_SIZE) {
            return Err(Error::InvalidHandle);
        }
        let attr = attr.unwrap_or(StoreAttributes {
            max_data_size: D::PAGE_SIZE - header::HEADER_SIZE,
        });
        let total = attr.max_data_size + header::HEADER_SIZE;

        let mut inner = self.lock();
        let handle = inner
            .stores
            .iter()
            .position(|s| !s.in_use)
            .ok_or(Error::InvalidHandle)?;

        let store = &mut inner.stores[handle];
        store.in_use = true;
        store.attributes = StoreAttributes {
            max_data_size: total,
        };
        store.write_addr = FlashAddress::INVALID;
        store.read_addr = FlashAddress::INVALID;
        store.write_stage = vec![0u8; total];
        store.read_stage = vec![0u8; total];
        store.stage_locked = false;
        store.staged_sid = None;
        self.counts[handle].store(0, Ordering::Relaxed);
        Ok(handle)
    }

    /// `destroy(h)`: free the staging buffers and mark the slot vacant.
    /// Does not reclaim blocks still referenced by the store's chain; a
    /// caller must drain the store first (source's stated assumption).
    pub fn destroy(&self, handle: usize) -> Result<(), D> {
        let mut inner = self.lock();
        let store = inner.stores.get_mut(handle).ok_or(Error::InvalidHandle)?;
        if !store.in_use {
            return Err(Error::InvalidHandle);
        }
        *store = Store::vacant();
        Ok(())
    }

    /// `enqueue`: frame and write one object, scatter-gathering `d1`/`d2`.
    /// The `timeout` argument is accepted for interface stability and ignored,
    /// per the design notes.
    pub fn enqueue(
        &self,
        handle: usize,
        d1: &[u8],
        d2: &[u8],
        _timeout: Option<std::time::Duration>,
    ) -> Result<Sid, D> {
        let mut inner = self.lock();
        let pages_per_block = inner.registry.pages_per_block();
        let Inner {
            driver,
            clock,
            registry,
            stores,
        } = &mut *inner;
        let store = stores.get_mut(handle).ok_or(Error::InvalidHandle)?;
        if !store.in_use {
            return Err(Error::InvalidHandle);
        }

        if !store.write_addr.is_valid() {
            let first = registry.allocate(driver)?;
            store.write_addr = FlashAddress::new(first, PageId::new(0));
        }
        if !store.read_addr.is_valid() {
            store.read_addr = store.write_addr;
        }

        let sid = object::object_write(
            registry,
            driver,
            clock,
            &mut store.write_addr,
            handle as u32,
            store.attributes.max_data_size,
            pages_per_block,
            &mut store.write_stage,
            d1,
            d2,
        )?;
        self.counts[handle].fetch_add(1, Ordering::Relaxed);
        Ok(sid)
    }

    /// `dequeue`: read the object at the store's read cursor, advancing it.
    /// Returns [`Error::Timeout`] on an empty store without touching the
    /// stage; on a validation failure, resynchronizes with `object_scan`
    /// before propagating the original error (lossy recovery, per §7).
    pub fn dequeue(
        &self,
        handle: usize,
        _timeout: Option<std::time::Duration>,
    ) -> Result<(Sid, Vec<u8>), D> {
        let mut inner = self.lock();
        let Inner {
            driver,
            registry,
            stores,
            ..
        } = &mut *inner;
        let store = stores.get_mut(handle).ok_or(Error::InvalidHandle)?;
        if !store.in_use {
            return Err(Error::InvalidHandle);
        }
        if store.is_empty() {
            return Err(Error::Timeout);
        }
        if store.stage_locked {
            return Err(Error::FailedStore);
        }

        let mut addr = store.read_addr;
        let result = object::object_read(
            registry,
            driver,
            &mut addr,
            &mut store.read_stage,
            handle as u32,
            store.attributes.max_data_size,
            store.stage_locked,
        );
        match result {
            Ok(header) => {
                let sid = Sid::from_raw(header.sid).ok_or(Error::FailedStore)?;
                store.read_addr = addr;
                store.stage_locked = true;
                store.staged_sid = Some(sid);
                let payload = store.read_stage[header::HEADER_SIZE
                    ..header::HEADER_SIZE + header.size as usize]
                    .to_vec();
                Ok((sid, payload))
            }
            Err(e) => {
                fmt::warn!("flashq: dequeue failed on handle {}, resynchronizing", handle);
                let mut scan_addr = store.read_addr;
                let _ = object::object_scan(registry, driver, &mut scan_addr);
                store.read_addr = scan_addr;
                Err(e)
            }
        }
    }

    /// `retrieve`: read the object named by `sid` without disturbing the
    /// store's read cursor (it operates on a local copy of the address).
    pub fn retrieve(
        &self,
        handle: usize,
        sid: Sid,
        _timeout: Option<std::time::Duration>,
    ) -> Result<Vec<u8>, D> {
        let mut inner = self.lock();
        let pages_per_block = inner.registry.pages_per_block();
        let Inner {
            driver,
            registry,
            stores,
            ..
        } = &mut *inner;
        let store = stores.get_mut(handle).ok_or(Error::InvalidHandle)?;
        if !store.in_use {
            return Err(Error::InvalidHandle);
        }

        let mut addr = sid.to_address(pages_per_block);
        let header = object::object_read(
            registry,
            driver,
            &mut addr,
            &mut store.read_stage,
            handle as u32,
            store.attributes.max_data_size,
            store.stage_locked,
        )?;
        store.stage_locked = true;
        store.staged_sid = Some(sid);
        Ok(store.read_stage[header::HEADER_SIZE..header::HEADER_SIZE + header.size as usize].to_vec())
    }

    /// `release(h, sid)`: unlock the read stage, iff `sid` matches the object
    /// currently staged there. On mismatch, the stage stays locked.
    ///
    /// The source documents `release` as lock-free (it only toggles a flag
    /// whose sole writer is the owning store). Here it takes the same lock as
    /// every other entry point — a deliberate deviation, since validating
    /// against `staged_sid` means reading state that `dequeue`/`retrieve`
    /// could be concurrently mutating, which safe Rust does not allow without
    /// synchronization (see the design notes).
    pub fn release(&self, handle: usize, sid: Sid) -> Result<(), D> {
        let mut inner = self.lock();
        let store = inner.stores.get_mut(handle).ok_or(Error::InvalidHandle)?;
        if !store.in_use {
            return Err(Error::InvalidHandle);
        }
        if store.staged_sid != Some(sid) {
            return Err(Error::FailedStore);
        }
        store.stage_locked = false;
        store.staged_sid = None;
        Ok(())
    }

    /// `relinquish(h, sid)`: mark the object's pages deleted and decrement
    /// `object_count`, reclaiming any block left entirely deleted. Valid
    /// regardless of whether the object was ever dequeued.
    pub fn relinquish(&self, handle: usize, sid: Sid) -> Result<(), D> {
        let mut inner = self.lock();
        let page_size = D::PAGE_SIZE;
        let pages_per_block = inner.registry.pages_per_block();
        let Inner {
            driver,
            registry,
            stores,
            ..
        } = &mut *inner;
        let store = stores.get_mut(handle).ok_or(Error::InvalidHandle)?;
        if !store.in_use {
            return Err(Error::InvalidHandle);
        }
        object::object_delete(registry, driver, sid, page_size, pages_per_block)?;
        self.counts[handle].fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// `getcount(h)`: the store's live object count. Lock-free, per §5.
    pub fn getcount(&self, handle: usize) -> Result<u32, D> {
        self.counts
            .get(handle)
            .map(|c| c.load(Ordering::Relaxed))
            .ok_or(Error::InvalidHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_device::mock::VirtualFlash;
    use test_log::test;

    const PAGE_SIZE: usize = 64;
    const PAGES_PER_BLOCK: usize = 4;
    const BLOCK_COUNT: usize = 8;

    type Flash = VirtualFlash<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>;

    fn new_queue() -> FlashQueue<Flash, clock::FakeClock> {
        let (queue, reclaimed) =
            FlashQueue::init(Flash::new(), clock::FakeClock::new(1_000), Mode::Format).unwrap();
        assert_eq!(reclaimed, BLOCK_COUNT as u32);
        queue
    }

    #[test]
    fn format_reclaims_every_block() {
        let queue = new_queue();
        let stats = queue.stats(false, false);
        assert_eq!(stats.free_count, BLOCK_COUNT as u32);
        assert_eq!(stats.used_count, 0);
        assert_eq!(stats.bad_count, 0);
    }

    #[test]
    fn enqueue_dequeue_release_round_trips() {
        let queue = new_queue();
        let h = queue.create(None).unwrap();
        let payload: Vec<u8> = (0u8..50).map(|i| i % 255).collect();
        let sid = queue.enqueue(h, &payload, &[], None).unwrap();
        let (got_sid, got) = queue.dequeue(h, None).unwrap();
        assert_eq!(got_sid, sid);
        assert_eq!(got, payload);
        queue.release(h, sid).unwrap();
        assert_eq!(queue.getcount(h).unwrap(), 1);
        queue.relinquish(h, sid).unwrap();
        assert_eq!(queue.getcount(h).unwrap(), 0);
    }

    #[test]
    fn dequeue_on_empty_store_times_out() {
        let queue = new_queue();
        let h = queue.create(None).unwrap();
        assert!(matches!(queue.dequeue(h, None), Err(Error::Timeout)));
    }

    #[test]
    fn dequeue_while_locked_fails() {
        let queue = new_queue();
        let h = queue.create(None).unwrap();
        let sid = queue.enqueue(h, b"hello", &[], None).unwrap();
        queue.enqueue(h, b"world", &[], None).unwrap();
        queue.dequeue(h, None).unwrap();
        assert!(matches!(queue.dequeue(h, None), Err(Error::FailedStore)));
        queue.release(h, sid).unwrap();
        queue.dequeue(h, None).unwrap();
    }

    #[test]
    fn release_with_mismatched_sid_leaves_stage_locked() {
        let queue = new_queue();
        let h = queue.create(None).unwrap();
        queue.enqueue(h, b"hello", &[], None).unwrap();
        let (sid, _) = queue.dequeue(h, None).unwrap();
        let bogus = Sid::from_raw(sid.as_u32() + 1).unwrap();
        assert!(matches!(queue.release(h, bogus), Err(Error::FailedStore)));
        assert!(matches!(queue.dequeue(h, None), Err(Error::FailedStore)));
        queue.release(h, sid).unwrap();
    }

    #[test]
    fn spanning_object_round_trips_across_pages() {
        let queue = new_queue();
        let h = queue.create(Some(StoreAttributes { max_data_size: 300 }))
            .unwrap();
        let payload = vec![0x7Au8; 300];
        let sid = queue.enqueue(h, &payload, &[], None).unwrap();
        let (got_sid, got) = queue.dequeue(h, None).unwrap();
        assert_eq!(got_sid, sid);
        assert_eq!(got, payload);
    }

    #[test]
    fn store_full_does_not_mutate_cursors() {
        let queue = new_queue();
        let h = queue.create(Some(StoreAttributes {
            max_data_size: PAGE_SIZE * BLOCK_COUNT * PAGES_PER_BLOCK,
        }))
        .unwrap();
        // Establish the chain with a small write first, so the huge write below
        // exercises object_write's own free-page check rather than the
        // first-block allocation enqueue performs unconditionally.
        queue.enqueue(h, b"seed", &[], None).unwrap();

        let huge = vec![0u8; PAGE_SIZE * BLOCK_COUNT * PAGES_PER_BLOCK];
        let before = queue.lock().stores[h].write_addr;
        assert!(matches!(queue.enqueue(h, &huge, &[], None), Err(Error::StoreFull)));
        let after = queue.lock().stores[h].write_addr;
        assert_eq!(before, after);
    }

    #[test]
    fn create_rejects_undersized_attributes() {
        let queue = new_queue();
        let result = queue.create(Some(StoreAttributes { max_data_size: 1 }));
        assert!(matches!(result, Err(Error::InvalidHandle)));
    }

    #[test]
    fn destroy_frees_the_slot_for_reuse() {
        let queue = new_queue();
        let h = queue.create(None).unwrap();
        queue.destroy(h).unwrap();
        let h2 = queue.create(None).unwrap();
        assert_eq!(h, h2);
    }

    #[test]
    fn relinquish_is_valid_without_a_prior_dequeue() {
        let queue = new_queue();
        let h = queue.create(None).unwrap();
        let sid = queue.enqueue(h, b"abc", &[], None).unwrap();
        queue.relinquish(h, sid).unwrap();
        assert_eq!(queue.getcount(h).unwrap(), 0);
    }
}

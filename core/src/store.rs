//! Store record: one logical queue's read/write cursors and staging buffers.
//!
//! `object_count` is deliberately *not* a field here — it lives in
//! [`crate::FlashQueue`]'s own `AtomicU32` table, so `getcount` can read it
//! without acquiring the process-wide lock (§5).

use flash_device::FlashAddress;

use crate::config::StoreAttributes;
use crate::header::Sid;

/// One entry in the store table.
pub struct Store {
    pub in_use: bool,
    pub attributes: StoreAttributes,
    pub write_addr: FlashAddress,
    pub read_addr: FlashAddress,
    pub write_stage: Vec<u8>,
    pub read_stage: Vec<u8>,
    pub stage_locked: bool,
    /// SID currently framed in `read_stage`, set by `dequeue`/`retrieve` and
    /// checked by `release`. `None` whenever `stage_locked` is false.
    pub staged_sid: Option<Sid>,
}

impl Store {
    pub fn vacant() -> Self {
        Store {
            in_use: false,
            attributes: StoreAttributes { max_data_size: 0 },
            write_addr: FlashAddress::INVALID,
            read_addr: FlashAddress::INVALID,
            write_stage: Vec::new(),
            read_stage: Vec::new(),
            stage_locked: false,
            staged_sid: None,
        }
    }

    /// (I3): a store is empty iff its read and write cursors coincide.
    pub fn is_empty(&self) -> bool {
        self.read_addr == self.write_addr
    }
}

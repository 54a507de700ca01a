//! Object framing: the fixed header prepended to every enqueued object, encoded
//! explicitly as little-endian bytes (no pointer-cast header view — see the
//! REDESIGN FLAGS in the design notes).

use std::num::NonZeroU32;

use flash_device::FlashAddress;

/// `"BP FLASH"` as a 64-bit little-endian magic.
pub const SYNC_MAGIC: u64 = 0x425020464C415348;

/// `sync(8) + timestamp(8) + handle(4) + size(4) + sid(4)`.
pub const HEADER_SIZE: usize = 28;

/// A one-based Storage IDentifier: `block * pages_per_block + page + 1`.
///
/// Opaque to callers; round-trips through [`Sid::to_address`] /
/// [`Sid::from_address`] and is never manufactured by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sid(NonZeroU32);

impl Sid {
    pub fn from_address(addr: FlashAddress, pages_per_block: u32) -> Self {
        let raw = addr.to_sid(pages_per_block);
        Sid(NonZeroU32::new(raw).expect("sid is always >= 1"))
    }

    pub fn to_address(self, pages_per_block: u32) -> FlashAddress {
        FlashAddress::from_sid(self.0.get(), pages_per_block)
    }

    pub fn as_u32(self) -> u32 {
        self.0.get()
    }

    /// Reconstruct a [`Sid`] from its wire form. Returns `None` for `0`, which is
    /// never a valid SID.
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Sid)
    }
}

/// The fixed 28-byte header prepended to every object on flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub timestamp: u64,
    pub handle: u32,
    pub size: u32,
    pub sid: u32,
}

impl ObjectHeader {
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&SYNC_MAGIC.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..20].copy_from_slice(&self.handle.to_le_bytes());
        buf[20..24].copy_from_slice(&self.size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.sid.to_le_bytes());
        buf
    }

    /// Decode and validate a header out of `buf`'s first [`HEADER_SIZE`] bytes.
    /// Returns `None` if the slice is short or the sync magic does not match.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE || !Self::sync_matches(buf) {
            return None;
        }
        Some(ObjectHeader {
            timestamp: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            handle: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            sid: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        })
    }

    /// Check only the sync magic, without decoding the rest. Used by
    /// `object_scan` to resynchronize after a failed dequeue.
    pub fn sync_matches(buf: &[u8]) -> bool {
        buf.len() >= 8 && u64::from_le_bytes(buf[0..8].try_into().unwrap()) == SYNC_MAGIC
    }

    /// Number of pages this object (header + payload) occupies.
    pub fn page_count(&self, page_size: usize) -> u32 {
        ((HEADER_SIZE + self.size as usize).div_ceil(page_size)) as u32
    }
}

/// Size of the store table: the number of independent logical queues that can be
/// live at once.
pub const FLASH_MAX_STORES: usize = 16;

/// Upper bound on `pages_per_block` across every supported device; sizes the
/// compile-time `page_use` bitmap in [`crate::registry::BlockRecord`].
pub const FLASH_MAX_PAGES_PER_BLOCK: usize = 256;

/// Initialization mode passed to [`crate::FlashQueue::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Reclaim every block on the device, discarding any prior contents. Mandatory
    /// on first use of a device.
    Format,
    /// Reserved for a future crash-recovery scan. Currently a no-op that leaves
    /// every list empty, identical to starting from an unformatted device.
    Recover,
}

/// Attributes supplied to [`crate::FlashQueue::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAttributes {
    /// Maximum size, in bytes, of an enqueued object's payload.
    pub max_data_size: usize,
}

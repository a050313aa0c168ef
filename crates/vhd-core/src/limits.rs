//! Resource limits and overflow-checked arithmetic for untrusted on-disk
//! sizes, trimmed down from the wider disk-image toolkit's allocation
//! guards to the ones a VHD parser actually needs.

use crate::Error;

/// BAT entry counts at or above this are rejected before any allocation.
pub const MAX_BAT_ENTRIES: u32 = 1 << 31;

/// Parent-chain recursion depth at or beyond this fails the open.
pub const MAX_PARENT_DEPTH: u32 = 4096;

/// A parent locator's `data_len` must be strictly below this to be honored
/// as a name.
pub const MAX_LOCATOR_DATA_LEN: u32 = 1024;

/// Ceiling on any single buffer this crate allocates from an on-disk size
/// field (a BAT, a bitmap, a locator string).
pub const MAX_ALLOCATION_SIZE: u64 = 256 * 1024 * 1024;

/// Validate that a size is within allocation limits before it is used to
/// size a `Vec` or read buffer.
pub fn validate_allocation_size(size: u64, limit: u64, context: &str) -> crate::Result<usize> {
    if size > limit {
        return Err(Error::invalid(format!(
            "{context} size {size} exceeds limit {limit}"
        )));
    }
    usize::try_from(size).map_err(|_| Error::invalid(format!("{context} size exceeds platform limits")))
}

/// Multiply two `u64`s, failing instead of wrapping on overflow.
pub fn checked_multiply_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::invalid(format!("{context}: multiplication overflow")))
}

/// Multiply two `u32`s widened to `u64`, failing instead of wrapping on overflow.
pub fn checked_multiply_u32_to_u64(a: u32, b: u32, context: &str) -> crate::Result<u64> {
    (a as u64)
        .checked_mul(b as u64)
        .ok_or_else(|| Error::invalid(format!("{context}: multiplication overflow")))
}

/*!
 * Core Types
 * Common types used across the state heap allocator
 */

/// Byte offset inside a heap
pub type Offset = usize;

/// Size type for heap and block operations
pub type Size = usize;

/// GPU virtual address of a heap or block
pub type GpuAddress = u64;

/// Round `value` up to a multiple of `alignment` (power of two, or 1)
#[inline]
pub const fn align_ceil(value: Size, alignment: Size) -> Size {
    if alignment <= 1 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}

/// `align_ceil` that reports overflow instead of wrapping
#[inline]
pub const fn checked_align_ceil(value: Size, alignment: Size) -> Option<Size> {
    if alignment <= 1 {
        return Some(value);
    }
    match value.checked_add(alignment - 1) {
        Some(raised) => Some(raised & !(alignment - 1)),
        None => None,
    }
}

/// Round `value` down to a multiple of `alignment` (power of two, or 1)
#[inline]
pub const fn align_floor(value: Size, alignment: Size) -> Size {
    if alignment <= 1 {
        value
    } else {
        value & !(alignment - 1)
    }
}

/// Bytes needed to move `value` up to the next multiple of `alignment`
#[inline]
pub const fn align_offset(value: Size, alignment: Size) -> Size {
    align_ceil(value, alignment) - value
}

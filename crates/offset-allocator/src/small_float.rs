//! Size-class codec.
//!
//! Sizes are binned with a tiny floating point format: a 5-bit exponent and a
//! 3-bit mantissa packed into a single class index
//! (`exponent << MANTISSA_BITS | mantissa`). The high bit of a normalized value
//! is implicit, exactly like IEEE floats, so each power-of-two range is split
//! into [`MANTISSA_VALUE`] equally sized classes. The relative gap between two
//! neighboring classes therefore stays around 1/8 no matter how large the
//! sizes get.
//!
//! ```text
//! size     class   exponent  mantissa
//! 0..8     0..8    0         size (denormal)
//! 8        8       1         0
//! 9        9       1         1
//! 17       16/17   2         0/1      (round down / round up)
//! 32       24      3         0
//! 34       24/25   3         0/1      (round down / round up)
//! ```

/// Number of mantissa bits in a class index.
pub const MANTISSA_BITS: u32 = 3;
/// Number of classes per exponent step.
pub const MANTISSA_VALUE: u32 = 1 << MANTISSA_BITS;
const MANTISSA_MASK: u32 = MANTISSA_VALUE - 1;

/// Splits a normalized size into its `(exponent, mantissa, low_bits_mask)`.
///
/// `size` must be at least [`MANTISSA_VALUE`].
fn normalize(size: u32) -> (u32, u32, u32) {
    debug_assert!(size >= MANTISSA_VALUE);
    let highest_set_bit = u32::BITS - 1 - size.leading_zeros();
    let mantissa_start_bit = highest_set_bit - MANTISSA_BITS;
    let exponent = mantissa_start_bit + 1;
    let mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;
    let low_bits_mask = (1 << mantissa_start_bit) - 1;
    (exponent, mantissa, low_bits_mask)
}

/// Converts a size into the smallest class whose canonical size is `>= size`.
///
/// Used when searching for a bin that is able to hold a request. Dropped low
/// bits bump the mantissa, which may carry over into the exponent.
#[must_use]
pub fn uint_to_float_round_up(size: u32) -> u32 {
    if size < MANTISSA_VALUE {
        return size;
    }
    let (exponent, mut mantissa, low_bits_mask) = normalize(size);
    if size & low_bits_mask != 0 {
        mantissa += 1;
    }
    // `+` instead of `|` so that a mantissa overflow carries into the exponent.
    (exponent << MANTISSA_BITS) + mantissa
}

/// Converts a size into the largest class whose canonical size is `<= size`.
///
/// Free regions are filed under this class so that any region found through
/// [`uint_to_float_round_up`] is guaranteed to fit the request.
#[must_use]
pub fn uint_to_float_round_down(size: u32) -> u32 {
    if size < MANTISSA_VALUE {
        return size;
    }
    let (exponent, mantissa, _) = normalize(size);
    (exponent << MANTISSA_BITS) | mantissa
}

/// Returns the canonical size of a class, or `None` if it does not fit in a
/// `u32`.
///
/// Classes produced by [`uint_to_float_round_down`] always fit. Only the
/// topmost classes, which can never hold a region, overflow.
#[must_use]
pub fn checked_float_to_uint(float_value: u32) -> Option<u32> {
    let exponent = float_value >> MANTISSA_BITS;
    let mantissa = float_value & MANTISSA_MASK;
    if exponent == 0 {
        return Some(mantissa);
    }
    let normalized = mantissa | MANTISSA_VALUE;
    let shift = exponent - 1;
    (shift <= normalized.leading_zeros()).then(|| normalized << shift)
}

/// Returns the canonical size of a class.
///
/// # Panics
///
/// Panics if the canonical size of `float_value` does not fit in a `u32`.
#[must_use]
pub fn float_to_uint(float_value: u32) -> u32 {
    let Some(size) = checked_float_to_uint(float_value) else {
        panic!("size class {float_value} does not fit in u32");
    };
    size
}

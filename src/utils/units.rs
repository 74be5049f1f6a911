//! Unit conversion utilities

/// Memory conversion constants
pub const BYTES_PER_KB: u64 = 1024;
pub const BYTES_PER_MB: u64 = BYTES_PER_KB * 1024;

/// Convert millicelsius to celsius
#[inline]
pub fn millicelsius_to_celsius(millicelsius: u32) -> u32 {
    millicelsius / 1000
}

/// Convert a byte count to mebibytes
#[inline]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

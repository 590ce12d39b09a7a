//! Miscellaneous utilities.

pub mod checksum;
pub mod hexdump;

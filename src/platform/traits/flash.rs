//! Flash interface trait
//!
//! This module defines the Flash storage interface that platform
//! implementations must provide. Flash holds the configuration block and
//! the telemetry log ring.

use crate::platform::Result;

/// Flash interface trait
///
/// # Flash Characteristics
///
/// - Flash is organized in blocks (typically 4 KB)
/// - Erase operations set all bytes to 0xFF
/// - Write operations can only change bits from 1 to 0 (erase first)
///
/// # Memory Layout
///
/// ```text
/// [Firmware]      0x000000 - 0x040000 - DO NOT WRITE
/// [Config Block]  0x040000 - 0x041000 (4 KB)
/// [Log Ring]      0x041000 - 0x051000 (64 KB)
/// ```
pub trait FlashInterface {
    /// Read `buf.len()` bytes starting at `address`.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `address`.
    ///
    /// The target region must have been erased; writing only clears bits.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Erase `size` bytes starting at `address`.
    ///
    /// Both must be aligned to [`block_size`](Self::block_size).
    fn erase(&mut self, address: u32, size: u32) -> Result<()>;

    /// Minimum erasable unit size in bytes.
    fn block_size(&self) -> u32;

    /// Total Flash capacity in bytes.
    fn capacity(&self) -> u32;
}

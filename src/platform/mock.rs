//! Host-test platform mocks
//!
//! `MockFlash` emulates NOR flash semantics (erase to 0xFF, write clears
//! bits) in RAM and can cut power mid-write to exercise torn-record
//! recovery. `MockClock` is a manually advanced seconds counter.

use crate::platform::error::{FlashError, PlatformError, Result};
use crate::platform::traits::{Clock, FlashInterface};
use core::cell::Cell;

/// RAM-backed flash with NOR write semantics.
pub struct MockFlash<const SIZE: usize> {
    mem: [u8; SIZE],
    block_size: u32,
    /// When set, the next write completes only this many bytes, then fails.
    fail_after: Option<usize>,
}

impl<const SIZE: usize> MockFlash<SIZE> {
    pub fn new(block_size: u32) -> Self {
        Self {
            mem: [0xFF; SIZE],
            block_size,
            fail_after: None,
        }
    }

    /// Arm a power-cut: the next write stores `bytes` bytes and then fails.
    pub fn cut_power_after(&mut self, bytes: usize) {
        self.fail_after = Some(bytes);
    }

    pub fn raw(&self) -> &[u8] {
        &self.mem
    }
}

impl<const SIZE: usize> FlashInterface for MockFlash<SIZE> {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let start = address as usize;
        let end = start + buf.len();
        if end > SIZE {
            return Err(PlatformError::Flash(FlashError::InvalidAddress));
        }
        buf.copy_from_slice(&self.mem[start..end]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let start = address as usize;
        if start + data.len() > SIZE {
            return Err(PlatformError::Flash(FlashError::InvalidAddress));
        }
        let limit = self.fail_after.take().unwrap_or(data.len());
        for (i, &b) in data.iter().enumerate() {
            if i >= limit {
                return Err(PlatformError::Flash(FlashError::WriteFailed));
            }
            // NOR: bits only go 1 -> 0
            self.mem[start + i] &= b;
        }
        Ok(())
    }

    fn erase(&mut self, address: u32, size: u32) -> Result<()> {
        if address % self.block_size != 0 || size % self.block_size != 0 {
            return Err(PlatformError::Flash(FlashError::InvalidAddress));
        }
        let start = address as usize;
        let end = start + size as usize;
        if end > SIZE {
            return Err(PlatformError::Flash(FlashError::InvalidAddress));
        }
        self.mem[start..end].fill(0xFF);
        Ok(())
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn capacity(&self) -> u32 {
        SIZE as u32
    }
}

/// Manually advanced clock for host tests.
pub struct MockClock {
    secs: Cell<u32>,
}

impl MockClock {
    pub fn new(start: u32) -> Self {
        Self {
            secs: Cell::new(start),
        }
    }

    pub fn advance(&self, secs: u32) {
        self.secs.set(self.secs.get() + secs);
    }
}

impl Clock for MockClock {
    fn now_secs(&self) -> u32 {
        self.secs.get()
    }
}

//! Flash log ring
//!
//! Append-only circular store of packed telemetry points. Each slot holds
//! one [`TelemetryPoint`] in its wire layout plus a trailing CRC-16; a
//! slot whose id reads 0xFFFFFFFF (erased flash) or whose CRC fails is
//! empty. Records never straddle an erase block: each block carries
//! `SLOTS_PER_BLOCK` slots and is erased as a whole when the head wraps
//! into it, so the oldest records go first.
//!
//! Only the collector writes; the log transmitter and the CLI read.

use crate::core::datapoint::{TelemetryPoint, POINT_ID_EMPTY, POINT_WIRE_LEN};
use crate::platform::{FlashInterface, Result};
use core::cell::RefCell;
use crc::{Crc, CRC_16_IBM_SDLC};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Log ring shared between the collector (writer) and the log
/// transmitter and CLI (readers).
pub type SharedLogRing<F> = Mutex<CriticalSectionRawMutex, RefCell<LogRing<F>>>;

/// Slot stride: packed point, CRC-16, padding up to 80 bytes.
pub const LOG_SLOT_STRIDE: u32 = 80;

/// Bytes actually written per slot.
pub const LOG_RECORD_LEN: usize = POINT_WIRE_LEN + 2;

const RECORD_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Wear-aware flash ring of telemetry records.
pub struct LogRing<F: FlashInterface> {
    flash: F,
    base: u32,
    /// Total slot count (multiple of slots-per-block)
    slots: u32,
    slots_per_block: u32,
    /// Next slot to write
    head: u32,
    /// Slot of the oldest surviving record
    oldest: u32,
    /// Number of readable records
    count: u32,
}

impl<F: FlashInterface> LogRing<F> {
    /// Mount the ring over `size` bytes at `base`, scanning for the most
    /// recent record to continue after.
    pub fn mount(mut flash: F, base: u32, size: u32) -> Result<Self> {
        let block = flash.block_size();
        let slots_per_block = block / LOG_SLOT_STRIDE;
        let blocks = size / block;
        let slots = blocks * slots_per_block;

        let mut head = 0;
        let mut oldest = 0;
        let mut count = 0;
        let mut max_id = 0u32;
        let mut min_id = u32::MAX;
        for slot in 0..slots {
            let addr = Self::slot_addr_in(base, block, slots_per_block, slot);
            let mut buf = [0u8; LOG_RECORD_LEN];
            flash.read(addr, &mut buf)?;
            if Self::record_valid(&buf).is_some() {
                let id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                count += 1;
                if id >= max_id {
                    max_id = id;
                    head = (slot + 1) % slots;
                }
                if id < min_id {
                    min_id = id;
                    oldest = slot;
                }
            }
        }
        Ok(Self {
            flash,
            base,
            slots,
            slots_per_block,
            head,
            oldest,
            count,
        })
    }

    fn slot_addr_in(base: u32, block: u32, per_block: u32, slot: u32) -> u32 {
        base + (slot / per_block) * block + (slot % per_block) * LOG_SLOT_STRIDE
    }

    fn slot_addr(&self, slot: u32) -> u32 {
        Self::slot_addr_in(
            self.base,
            self.flash.block_size(),
            self.slots_per_block,
            slot,
        )
    }

    fn record_valid(buf: &[u8; LOG_RECORD_LEN]) -> Option<TelemetryPoint> {
        let id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if id == POINT_ID_EMPTY {
            return None;
        }
        let stored = u16::from_le_bytes([buf[POINT_WIRE_LEN], buf[POINT_WIRE_LEN + 1]]);
        if RECORD_CRC.checksum(&buf[..POINT_WIRE_LEN]) != stored {
            return None;
        }
        let mut wire = [0u8; POINT_WIRE_LEN];
        wire.copy_from_slice(&buf[..POINT_WIRE_LEN]);
        TelemetryPoint::from_bytes(&wire)
    }

    /// Most recent record, for seeding the collector after a reset.
    pub fn last_point(&mut self) -> Option<TelemetryPoint> {
        if self.count == 0 {
            return None;
        }
        let slot = (self.head + self.slots - 1) % self.slots;
        self.read_slot(slot)
    }

    fn read_slot(&mut self, slot: u32) -> Option<TelemetryPoint> {
        let addr = self.slot_addr(slot);
        let mut buf = [0u8; LOG_RECORD_LEN];
        self.flash.read(addr, &mut buf).ok()?;
        Self::record_valid(&buf)
    }

    /// Append one record at the head. Entering a new erase block wipes it
    /// first, dropping the oldest records stored there.
    pub fn append(&mut self, point: &TelemetryPoint) -> Result<()> {
        if self.head % self.slots_per_block == 0 {
            let block_start = self.head;
            // count surviving records inside the block about to be erased
            let mut lost = 0;
            for s in block_start..block_start + self.slots_per_block {
                if self.count > 0 && (s + self.slots - self.oldest) % self.slots < self.count {
                    lost += 1;
                }
            }
            let addr = self.slot_addr(block_start);
            self.flash.erase(addr, self.flash.block_size())?;
            if lost > 0 {
                self.count -= lost;
                self.oldest = (block_start + self.slots_per_block) % self.slots;
            }
        }

        let mut buf = [0u8; LOG_RECORD_LEN];
        buf[..POINT_WIRE_LEN].copy_from_slice(&point.to_bytes());
        let crc = RECORD_CRC.checksum(&buf[..POINT_WIRE_LEN]);
        buf[POINT_WIRE_LEN..].copy_from_slice(&crc.to_le_bytes());
        let addr = self.slot_addr(self.head);
        self.flash.write(addr, &buf)?;

        if self.count == 0 {
            self.oldest = self.head;
        }
        self.head = (self.head + 1) % self.slots;
        self.count += 1;
        Ok(())
    }

    /// Read the `index`-th record, oldest first. Torn or erased slots are
    /// skipped transparently.
    pub fn get(&mut self, index: u32) -> Option<TelemetryPoint> {
        if index >= self.count {
            return None;
        }
        let mut seen = 0;
        for i in 0..self.slots {
            let slot = (self.oldest + i) % self.slots;
            if let Some(p) = self.read_slot(slot) {
                if seen == index {
                    return Some(p);
                }
                seen += 1;
            }
        }
        None
    }

    /// Number of readable records.
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datapoint::GpsState;
    use crate::platform::mock::MockFlash;

    const BASE: u32 = 0;
    const SIZE: u32 = 8192; // two 4 KB blocks, 51 slots each

    fn point(id: u32) -> TelemetryPoint {
        let mut p = TelemetryPoint::empty();
        p.id = id;
        p.sys_time = id * 10;
        p.gps_state = GpsState::LockedOff;
        p.gps_lat = 481_234_500;
        p.gps_lon = 91_234_500;
        p.adc_vbat = 4000;
        p
    }

    fn ring(flash: MockFlash<8192>) -> LogRing<MockFlash<8192>> {
        LogRing::mount(flash, BASE, SIZE).unwrap()
    }

    #[test]
    fn pristine_ring_is_empty() {
        let mut r = ring(MockFlash::new(4096));
        assert!(r.is_empty());
        assert!(r.last_point().is_none());
        assert!(r.get(0).is_none());
    }

    #[test]
    fn survives_power_cycle_in_order() {
        let mut r = ring(MockFlash::new(4096));
        for id in 1..=3 {
            r.append(&point(id)).unwrap();
        }
        // "power cycle": remount over the same flash contents
        let LogRing { flash, .. } = r;
        let mut r = ring(flash);
        assert_eq!(r.len(), 3);
        for (i, id) in (1..=3).enumerate() {
            assert_eq!(r.get(i as u32).unwrap().id, id);
        }
        assert!(r.get(3).is_none());
        assert_eq!(r.last_point().unwrap().id, 3);
        // appends continue after the last record
        r.append(&point(4)).unwrap();
        assert_eq!(r.get(3).unwrap().id, 4);
    }

    #[test]
    fn torn_write_leaves_ring_consistent() {
        let mut r = ring(MockFlash::new(4096));
        r.append(&point(1)).unwrap();
        // second write is cut mid-record
        r.flash.cut_power_after(10);
        let _ = r.append(&point(2));
        let LogRing { flash, .. } = r;
        let mut r = ring(flash);
        // the torn record is either absent entirely or never readable
        assert_eq!(r.len(), 1);
        assert_eq!(r.get(0).unwrap().id, 1);
        assert_eq!(r.last_point().unwrap().id, 1);
    }

    #[test]
    fn wrap_erases_oldest_block_first() {
        let mut r = ring(MockFlash::new(4096));
        // 102 slots total; fill every slot and push into the wrap
        for id in 1..=103 {
            r.append(&point(id)).unwrap();
        }
        // wrapping erased block 0 (records 1..=51)
        assert_eq!(r.get(0).unwrap().id, 52);
        assert_eq!(r.last_point().unwrap().id, 103);
        assert_eq!(r.len(), 52);
    }

    #[test]
    fn corrupt_slot_is_skipped_on_read() {
        let mut r = ring(MockFlash::new(4096));
        for id in 1..=3 {
            r.append(&point(id)).unwrap();
        }
        // clobber the CRC of the middle record in place
        let mut r2 = {
            let LogRing { mut flash, .. } = r;
            let addr = LOG_SLOT_STRIDE + POINT_WIRE_LEN as u32;
            flash.write(addr, &[0x00, 0x00]).unwrap();
            ring(flash)
        };
        assert_eq!(r2.len(), 2);
        assert_eq!(r2.get(0).unwrap().id, 1);
        assert_eq!(r2.get(1).unwrap().id, 3);
    }
}

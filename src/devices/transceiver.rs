//! Transceiver facade (Si446x class)
//!
//! The radio manager is the only caller. The driver behind this trait owns
//! SPI access, PLL programming and the TX/RX FIFOs; demodulated AX.25
//! frames come back whole, FCS included.

use crate::communication::hdlc::BitBuf;
use crate::platform::Result;
use heapless::Vec;

/// Maximum demodulated frame size delivered by the driver (addresses,
/// control, PID, 256-byte info field and FCS).
pub const MAX_RX_FRAME: usize = 340;

/// Modulation variants supported on the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    Afsk1200,
    Fsk9600,
}

/// One received frame with its signal strength.
#[derive(Debug, Clone)]
pub struct RxFrame {
    /// Raw AX.25 frame bytes including the FCS
    pub data: Vec<u8, MAX_RX_FRAME>,
    /// Raw RSSI register value at sync detect (dBm = raw/2 - 130)
    pub rssi: u8,
}

/// Convert a raw Si446x RSSI register value to dBm.
pub fn rssi_to_dbm(raw: u8) -> i16 {
    raw as i16 / 2 - 130
}

/// Transceiver interface. One exclusive owner: the radio manager.
#[allow(async_fn_in_trait)]
pub trait Transceiver {
    async fn set_frequency(&mut self, hz: u32) -> Result<()>;

    /// Power level 0..=0x7F, mapped to the chip's dBm table.
    async fn set_power(&mut self, level: u8) -> Result<()>;

    async fn set_modulation(&mut self, modulation: Modulation) -> Result<()>;

    /// Sample the current RSSI register.
    async fn read_rssi(&mut self) -> Result<u8>;

    /// Key the transmitter, clock out the prepared bitstream, unkey.
    /// Returns once the FIFO is flushed.
    async fn transmit(&mut self, bits: &BitBuf) -> Result<()>;

    /// Enter receive on the given frequency. Demodulated frames are
    /// pushed into the radio manager through its RX channel by the
    /// driver's interrupt glue.
    async fn start_rx(&mut self, hz: u32) -> Result<()>;

    /// Hard-reset the chip after a fault.
    async fn reset(&mut self) -> Result<()>;
}

/// Scripted transceiver for host tests.
pub struct MockTransceiver {
    /// RSSI values returned in order; the last one repeats.
    pub rssi_script: Vec<u8, 16>,
    rssi_idx: usize,
    /// Fail the next `transmit` calls with a hardware error.
    pub tx_failures: u32,
    pub frequency: u32,
    pub power: u8,
    pub modulation: Option<Modulation>,
    pub resets: u32,
    /// Bit lengths of every transmitted stream, in order.
    pub transmissions: Vec<usize, 32>,
    pub rx_frequency: u32,
}

impl MockTransceiver {
    pub fn quiet() -> Self {
        Self {
            rssi_script: Vec::new(),
            rssi_idx: 0,
            tx_failures: 0,
            frequency: 0,
            power: 0,
            modulation: None,
            resets: 0,
            transmissions: Vec::new(),
            rx_frequency: 0,
        }
    }

    pub fn with_rssi(script: &[u8]) -> Self {
        let mut t = Self::quiet();
        t.rssi_script = Vec::from_slice(script).unwrap_or_default();
        t
    }
}

impl Transceiver for MockTransceiver {
    async fn set_frequency(&mut self, hz: u32) -> Result<()> {
        self.frequency = hz;
        Ok(())
    }

    async fn set_power(&mut self, level: u8) -> Result<()> {
        self.power = level;
        Ok(())
    }

    async fn set_modulation(&mut self, modulation: Modulation) -> Result<()> {
        self.modulation = Some(modulation);
        Ok(())
    }

    async fn read_rssi(&mut self) -> Result<u8> {
        let raw = match self.rssi_script.get(self.rssi_idx) {
            Some(&v) => {
                self.rssi_idx += 1;
                v
            }
            None => *self.rssi_script.last().unwrap_or(&0),
        };
        Ok(raw)
    }

    async fn transmit(&mut self, bits: &BitBuf) -> Result<()> {
        use crate::platform::{PlatformError, SpiError};
        if self.tx_failures > 0 {
            self.tx_failures -= 1;
            return Err(PlatformError::Spi(SpiError::TransferFailed));
        }
        let _ = self.transmissions.push(bits.len_bits());
        Ok(())
    }

    async fn start_rx(&mut self, hz: u32) -> Result<()> {
        self.rx_frequency = hz;
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }
}

//! Camera facade
//!
//! The image thread only needs a JPEG byte stream; sensor bring-up, DCMI
//! wiring and JPEG compression are the driver's business.

use crate::platform::Result;

/// Capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Resolution {
    Qvga = 0,
    Vga = 1,
    Xga = 2,
}

impl Resolution {
    /// Frame dimensions in pixels.
    pub fn dims(&self) -> (u16, u16) {
        match self {
            Resolution::Qvga => (320, 240),
            Resolution::Vga => (640, 480),
            Resolution::Xga => (1024, 768),
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Resolution::Qvga,
            1 => Resolution::Vga,
            2 => Resolution::Xga,
            _ => return None,
        })
    }
}

/// Camera interface.
pub trait Camera {
    /// Take a picture into `buf`, returning the JPEG length.
    fn capture(&mut self, res: Resolution, quality: u8, buf: &mut [u8]) -> Result<usize>;
}

/// Canned-JPEG camera for host tests.
pub struct MockCamera<'a> {
    pub jpeg: &'a [u8],
    pub fails: bool,
}

impl<'a> Camera for MockCamera<'a> {
    fn capture(&mut self, _res: Resolution, _quality: u8, buf: &mut [u8]) -> Result<usize> {
        use crate::platform::PlatformError;
        if self.fails {
            return Err(PlatformError::ResourceUnavailable);
        }
        if buf.len() < self.jpeg.len() {
            return Err(PlatformError::ResourceUnavailable);
        }
        buf[..self.jpeg.len()].copy_from_slice(self.jpeg);
        Ok(self.jpeg.len())
    }
}

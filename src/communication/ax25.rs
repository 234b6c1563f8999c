//! AX.25 UI framing
//!
//! Address encoding (shifted ASCII, SSID, H-bit), UI control/PID, info
//! field and the CRC-16-CCITT FCS. Only UI frames exist on this link;
//! connected-mode AX.25 is not supported.

use crc::{Crc, CRC_16_IBM_SDLC};
use heapless::{String, Vec};

/// Maximum info field length accepted at encode time.
pub const MAX_INFO: usize = 256;

/// Maximum digipeater path entries.
pub const MAX_PATH: usize = 8;

/// Maximum encoded frame size: 10 addresses, control, PID, info, FCS.
pub const MAX_FRAME: usize = 2 + 7 * (2 + MAX_PATH) + MAX_INFO + 2;

/// AX.25 FCS (CRC-16-CCITT, reflected, init/xorout 0xFFFF).
const FCS: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

const CONTROL_UI: u8 = 0x03;
const PID_NO_LAYER3: u8 = 0xF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ax25Error {
    /// Info field exceeds [`MAX_INFO`]
    PacketTooLong,
    /// More than [`MAX_PATH`] digipeaters
    PathTooLong,
    /// Callsign text is empty, too long or has an invalid SSID
    BadAddress,
    /// Frame shorter than the UI minimum
    FrameTooShort,
    /// FCS check failed
    FcsMismatch,
    /// Not a UI frame or address field malformed
    Malformed,
}

impl core::fmt::Display for Ax25Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Ax25Error::PacketTooLong => write!(f, "info field too long"),
            Ax25Error::PathTooLong => write!(f, "too many digipeaters"),
            Ax25Error::BadAddress => write!(f, "invalid callsign"),
            Ax25Error::FrameTooShort => write!(f, "frame too short"),
            Ax25Error::FcsMismatch => write!(f, "FCS check failed"),
            Ax25Error::Malformed => write!(f, "malformed frame"),
        }
    }
}

/// A callsign with SSID, e.g. `DL7AD-12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Callsign {
    /// Space-padded uppercase ASCII
    call: [u8; 6],
    ssid: u8,
}

impl Callsign {
    /// Placeholder address used in freshly allocated packet buffers.
    pub const NOCALL: Callsign = Callsign {
        call: *b"N0CALL",
        ssid: 0,
    };

    /// Parse `CALL` or `CALL-SSID` text.
    pub fn parse(text: &str) -> Result<Self, Ax25Error> {
        let (base, ssid) = match text.split_once('-') {
            Some((b, s)) => (b, s.parse::<u8>().map_err(|_| Ax25Error::BadAddress)?),
            None => (text, 0),
        };
        if base.is_empty() || base.len() > 6 || ssid > 15 {
            return Err(Ax25Error::BadAddress);
        }
        let mut call = [b' '; 6];
        for (i, c) in base.bytes().enumerate() {
            if !c.is_ascii_alphanumeric() {
                return Err(Ax25Error::BadAddress);
            }
            call[i] = c.to_ascii_uppercase();
        }
        Ok(Self { call, ssid })
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    pub fn with_ssid(&self, ssid: u8) -> Self {
        Self {
            call: self.call,
            ssid,
        }
    }

    /// Base call without SSID as a str.
    pub fn base(&self) -> &str {
        let len = self.call.iter().position(|&c| c == b' ').unwrap_or(6);
        // call bytes are validated ASCII
        core::str::from_utf8(&self.call[..len]).unwrap_or("")
    }

    /// `CALL-SSID` text (no suffix when SSID is 0).
    pub fn format(&self) -> String<9> {
        let mut s = String::new();
        let _ = s.push_str(self.base());
        if self.ssid != 0 {
            let _ = s.push('-');
            if self.ssid >= 10 {
                let _ = s.push((b'0' + self.ssid / 10) as char);
            }
            let _ = s.push((b'0' + self.ssid % 10) as char);
        }
        s
    }

    /// Packed storage form: six call bytes plus the SSID.
    pub fn to_bytes(&self) -> [u8; 7] {
        let mut out = [0u8; 7];
        out[..6].copy_from_slice(&self.call);
        out[6] = self.ssid;
        out
    }

    /// Parse the packed storage form.
    pub fn from_bytes(bytes: &[u8; 7]) -> Option<Self> {
        let mut call = [b' '; 6];
        call.copy_from_slice(&bytes[..6]);
        if bytes[6] > 15 {
            return None;
        }
        Some(Self {
            call,
            ssid: bytes[6],
        })
    }

    fn encode(&self, ssid_extra: u8, last: bool, out: &mut Vec<u8, MAX_FRAME>) {
        for &c in &self.call {
            let _ = out.push(c << 1);
        }
        let _ = out.push(ssid_extra | (self.ssid << 1) | last as u8);
    }

    fn decode(bytes: &[u8]) -> Result<(Self, bool, bool), Ax25Error> {
        let mut call = [b' '; 6];
        for i in 0..6 {
            call[i] = bytes[i] >> 1;
        }
        let ssid = (bytes[6] >> 1) & 0x0F;
        let h_bit = bytes[6] & 0x80 != 0;
        let last = bytes[6] & 0x01 != 0;
        Ok((Self { call, ssid }, h_bit, last))
    }
}

impl core::fmt::Display for Callsign {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// One digipeater path entry with its has-been-repeated bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathElement {
    pub call: Callsign,
    pub repeated: bool,
}

/// An AX.25 UI frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub dest: Callsign,
    pub src: Callsign,
    pub path: Vec<PathElement, MAX_PATH>,
    pub info: Vec<u8, MAX_INFO>,
}

impl Ax25Frame {
    /// Const empty frame for static packet buffers.
    pub const fn empty() -> Self {
        Self {
            dest: Callsign::NOCALL,
            src: Callsign::NOCALL,
            path: Vec::new(),
            info: Vec::new(),
        }
    }

    /// Build a UI frame; `path` is a comma-separated list like `WIDE1-1,WIDE2-1`.
    pub fn new(src: Callsign, dest: Callsign, path_text: &str) -> Result<Self, Ax25Error> {
        let mut path = Vec::new();
        for entry in path_text.split(',').filter(|e| !e.is_empty()) {
            let entry = entry.trim();
            let (text, repeated) = match entry.strip_suffix('*') {
                Some(t) => (t, true),
                None => (entry, false),
            };
            path.push(PathElement {
                call: Callsign::parse(text)?,
                repeated,
            })
            .map_err(|_| Ax25Error::PathTooLong)?;
        }
        Ok(Self {
            dest,
            src,
            path,
            info: Vec::new(),
        })
    }

    pub fn set_info(&mut self, info: &[u8]) -> Result<(), Ax25Error> {
        self.info = Vec::from_slice(info).map_err(|_| Ax25Error::PacketTooLong)?;
        Ok(())
    }

    /// Encode to wire bytes with FCS appended (low byte first).
    pub fn encode(&self) -> Result<Vec<u8, MAX_FRAME>, Ax25Error> {
        if self.info.len() > MAX_INFO {
            return Err(Ax25Error::PacketTooLong);
        }
        let mut out: Vec<u8, MAX_FRAME> = Vec::new();
        // Command frame per APRS: C-bit set on destination only
        self.dest.encode(0xE0, false, &mut out);
        self.src.encode(0x60, self.path.is_empty(), &mut out);
        for (i, elem) in self.path.iter().enumerate() {
            let extra = 0x60 | ((elem.repeated as u8) << 7);
            elem.call
                .encode(extra, i + 1 == self.path.len(), &mut out);
        }
        let _ = out.push(CONTROL_UI);
        let _ = out.push(PID_NO_LAYER3);
        out.extend_from_slice(&self.info)
            .map_err(|_| Ax25Error::PacketTooLong)?;
        let fcs = FCS.checksum(&out);
        let _ = out.push((fcs & 0xFF) as u8);
        let _ = out.push((fcs >> 8) as u8);
        Ok(out)
    }

    /// Decode wire bytes, verifying the FCS. Frames failing the check are
    /// rejected with [`Ax25Error::FcsMismatch`] and must be dropped.
    pub fn decode(bytes: &[u8]) -> Result<Self, Ax25Error> {
        // dest + src + control + pid + fcs
        if bytes.len() < 7 * 2 + 2 + 2 {
            return Err(Ax25Error::FrameTooShort);
        }
        let (payload, fcs_bytes) = bytes.split_at(bytes.len() - 2);
        let fcs = u16::from_le_bytes([fcs_bytes[0], fcs_bytes[1]]);
        if FCS.checksum(payload) != fcs {
            return Err(Ax25Error::FcsMismatch);
        }

        let (dest, _, last) = Callsign::decode(&payload[0..7])?;
        if last {
            return Err(Ax25Error::Malformed);
        }
        let (src, _, mut last) = Callsign::decode(&payload[7..14])?;
        let mut pos = 14;
        let mut path = Vec::new();
        while !last {
            if payload.len() < pos + 7 {
                return Err(Ax25Error::Malformed);
            }
            let (call, repeated, l) = Callsign::decode(&payload[pos..pos + 7])?;
            path.push(PathElement { call, repeated })
                .map_err(|_| Ax25Error::PathTooLong)?;
            last = l;
            pos += 7;
        }
        if payload.len() < pos + 2 {
            return Err(Ax25Error::Malformed);
        }
        if payload[pos] != CONTROL_UI || payload[pos + 1] != PID_NO_LAYER3 {
            return Err(Ax25Error::Malformed);
        }
        let info =
            Vec::from_slice(&payload[pos + 2..]).map_err(|_| Ax25Error::PacketTooLong)?;
        Ok(Self {
            dest,
            src,
            path,
            info,
        })
    }

    /// Info field as text, lossy for non-ASCII bytes.
    pub fn info_str(&self) -> &str {
        core::str::from_utf8(&self.info).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(path: &str, info: &[u8]) -> Ax25Frame {
        let mut f = Ax25Frame::new(
            Callsign::parse("DL7AD-12").unwrap(),
            Callsign::parse("APECAN").unwrap(),
            path,
        )
        .unwrap();
        f.set_info(info).unwrap();
        f
    }

    #[test]
    fn callsign_parse_and_format() {
        let c = Callsign::parse("dl7ad-12").unwrap();
        assert_eq!(c.format().as_str(), "DL7AD-12");
        assert_eq!(c.base(), "DL7AD");
        assert_eq!(c.ssid(), 12);
        let plain = Callsign::parse("WIDE1").unwrap();
        assert_eq!(plain.format().as_str(), "WIDE1");
        assert!(Callsign::parse("TOOLONGCALL").is_err());
        assert!(Callsign::parse("DL7AD-16").is_err());
        assert!(Callsign::parse("").is_err());
    }

    #[test]
    fn roundtrip_all_path_lengths() {
        let paths = [
            "",
            "WIDE1-1",
            "WIDE1-1,WIDE2-2",
            "WIDE1-1*,WIDE2-2",
            "A-1,B-2,C-3,D-4,E-5,F-6,G-7,H-8",
        ];
        for p in paths {
            let f = frame(p, b"!4903.50N/07201.75W>Test");
            let encoded = f.encode().unwrap();
            let decoded = Ax25Frame::decode(&encoded).unwrap();
            assert_eq!(f, decoded, "path {:?}", p);
        }
    }

    #[test]
    fn nine_path_entries_rejected() {
        let r = Ax25Frame::new(
            Callsign::parse("N0CALL").unwrap(),
            Callsign::parse("APRS").unwrap(),
            "A-1,B-2,C-3,D-4,E-5,F-6,G-7,H-8,I-9",
        );
        assert_eq!(r.unwrap_err(), Ax25Error::PathTooLong);
    }

    #[test]
    fn corrupted_frame_fails_fcs() {
        let f = frame("WIDE1-1", b"hello");
        let mut encoded = f.encode().unwrap();
        encoded[20] ^= 0x01;
        assert_eq!(Ax25Frame::decode(&encoded), Err(Ax25Error::FcsMismatch));
    }

    #[test]
    fn oversized_info_rejected_at_encode_time() {
        let mut f = frame("", b"");
        assert_eq!(f.set_info(&[b'x'; 257]), Err(Ax25Error::PacketTooLong));
    }

    #[test]
    fn h_bit_survives_roundtrip() {
        let f = frame("WIDE1-1*,WIDE2-1", b"x");
        let decoded = Ax25Frame::decode(&f.encode().unwrap()).unwrap();
        assert!(decoded.path[0].repeated);
        assert!(!decoded.path[1].repeated);
    }

    #[test]
    fn fcs_known_vector() {
        // CRC-16/X-25 of "123456789" is 0x906E
        assert_eq!(FCS.checksum(b"123456789"), 0x906E);
    }
}

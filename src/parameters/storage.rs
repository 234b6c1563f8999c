//! Configuration persistence
//!
//! One flash block holds the serialized [`Config`] behind a magic,
//! version and CRC-32. Saves erase and rewrite the block atomically from
//! the caller's view: a torn write fails the CRC at the next boot and the
//! defaults apply.

use super::{
    BaseConf, BeaconConf, Config, ImageConf, LogConf, RadioConf, RxConf, SleepRule, ThreadConf,
};
use crate::communication::aprs::AprsSymbol;
use crate::communication::ax25::Callsign;
use crate::devices::camera::Resolution;
use crate::devices::transceiver::Modulation;
use crate::platform::{FlashInterface, PlatformError};
use crate::subsystems::radio::Frequency;
use crc::{Crc, CRC_32_ISO_HDLC};
use heapless::String;

/// Flash address of the configuration block.
pub const CONFIG_BLOCK_ADDR: u32 = 0x040000;

/// Serialized size cap, well under one erase block.
pub const CONFIG_MAX_LEN: usize = 512;

const CONFIG_MAGIC: [u8; 4] = *b"STRC";
const CONFIG_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2; // magic, version, payload length

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Magic/version/CRC check failed; use defaults
    Invalid,
    /// Serialized form would not fit the block
    TooLarge,
    Flash(PlatformError),
}

impl From<PlatformError> for ConfigError {
    fn from(e: PlatformError) -> Self {
        ConfigError::Flash(e)
    }
}

/// Load the configuration block. [`ConfigError::Invalid`] means fall back
/// to [`Config::default`].
pub fn load<F: FlashInterface>(flash: &mut F) -> Result<Config, ConfigError> {
    let mut buf = [0u8; CONFIG_MAX_LEN];
    flash.read(CONFIG_BLOCK_ADDR, &mut buf)?;
    if buf[..4] != CONFIG_MAGIC {
        return Err(ConfigError::Invalid);
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != CONFIG_VERSION {
        return Err(ConfigError::Invalid);
    }
    let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if len == 0 || HEADER_LEN + len + 4 > CONFIG_MAX_LEN {
        return Err(ConfigError::Invalid);
    }
    let crc_at = HEADER_LEN + len;
    let stored = u32::from_le_bytes([
        buf[crc_at],
        buf[crc_at + 1],
        buf[crc_at + 2],
        buf[crc_at + 3],
    ]);
    if CRC32.checksum(&buf[..crc_at]) != stored {
        return Err(ConfigError::Invalid);
    }
    let mut r = ByteReader {
        buf: &buf[HEADER_LEN..crc_at],
        pos: 0,
    };
    decode_config(&mut r).ok_or(ConfigError::Invalid)
}

/// Serialize and write the configuration block.
pub fn save<F: FlashInterface>(flash: &mut F, config: &Config) -> Result<(), ConfigError> {
    let mut buf = [0xFFu8; CONFIG_MAX_LEN];
    let mut w = ByteWriter { buf: &mut buf, pos: HEADER_LEN };
    encode_config(&mut w, config).ok_or(ConfigError::TooLarge)?;
    let payload_len = w.pos - HEADER_LEN;
    buf[..4].copy_from_slice(&CONFIG_MAGIC);
    buf[4..6].copy_from_slice(&CONFIG_VERSION.to_le_bytes());
    buf[6..8].copy_from_slice(&(payload_len as u16).to_le_bytes());
    let crc_at = HEADER_LEN + payload_len;
    let crc = CRC32.checksum(&buf[..crc_at]);
    buf[crc_at..crc_at + 4].copy_from_slice(&crc.to_le_bytes());

    flash.erase(CONFIG_BLOCK_ADDR, flash.block_size())?;
    flash.write(CONFIG_BLOCK_ADDR, &buf[..crc_at + 4])?;
    Ok(())
}

struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    fn u8(&mut self, v: u8) -> Option<()> {
        if self.pos >= self.buf.len() {
            return None;
        }
        self.buf[self.pos] = v;
        self.pos += 1;
        Some(())
    }

    fn bool(&mut self, v: bool) -> Option<()> {
        self.u8(v as u8)
    }

    fn u16(&mut self, v: u16) -> Option<()> {
        for b in v.to_le_bytes() {
            self.u8(b)?;
        }
        Some(())
    }

    fn u32(&mut self, v: u32) -> Option<()> {
        for b in v.to_le_bytes() {
            self.u8(b)?;
        }
        Some(())
    }

    fn bytes(&mut self, data: &[u8]) -> Option<()> {
        for &b in data {
            self.u8(b)?;
        }
        Some(())
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn u8(&mut self) -> Option<u8> {
        let v = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn bool(&mut self) -> Option<bool> {
        Some(self.u8()? != 0)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(out)
    }
}

fn put_call(w: &mut ByteWriter, c: &Callsign) -> Option<()> {
    w.bytes(&c.to_bytes())
}

fn get_call(r: &mut ByteReader) -> Option<Callsign> {
    let mut bytes = [0u8; 7];
    bytes.copy_from_slice(r.take(7)?);
    Callsign::from_bytes(&bytes)
}

fn put_path(w: &mut ByteWriter, p: &String<16>) -> Option<()> {
    w.u8(p.len() as u8)?;
    w.bytes(p.as_bytes())
}

fn get_path(r: &mut ByteReader) -> Option<String<16>> {
    let len = r.u8()? as usize;
    if len > 16 {
        return None;
    }
    let bytes = r.take(len)?;
    let mut s = String::new();
    s.push_str(core::str::from_utf8(bytes).ok()?).ok()?;
    Some(s)
}

fn put_thread(w: &mut ByteWriter, t: &ThreadConf) -> Option<()> {
    w.bool(t.active)?;
    w.u32(t.cycle_s)?;
    w.u32(t.init_delay_s)
}

fn get_thread(r: &mut ByteReader) -> Option<ThreadConf> {
    Some(ThreadConf {
        active: r.bool()?,
        cycle_s: r.u32()?,
        init_delay_s: r.u32()?,
    })
}

fn put_radio(w: &mut ByteWriter, c: &RadioConf) -> Option<()> {
    w.u8(c.pwr)?;
    match c.freq {
        Frequency::Static(hz) => {
            w.u8(0)?;
            w.u32(hz)?;
        }
        Frequency::AprsRegional => {
            w.u8(1)?;
            w.u32(0)?;
        }
    }
    w.u8(match c.modulation {
        Modulation::Afsk1200 => 0,
        Modulation::Fsk9600 => 1,
    })?;
    w.u16(c.preamble)?;
    w.u8(c.cca_rssi)
}

fn get_radio(r: &mut ByteReader) -> Option<RadioConf> {
    let pwr = r.u8()?;
    let freq = match r.u8()? {
        0 => Frequency::Static(r.u32()?),
        1 => {
            r.u32()?;
            Frequency::AprsRegional
        }
        _ => return None,
    };
    let modulation = match r.u8()? {
        0 => Modulation::Afsk1200,
        1 => Modulation::Fsk9600,
        _ => return None,
    };
    Some(RadioConf {
        pwr,
        freq,
        modulation,
        preamble: r.u16()?,
        cca_rssi: r.u8()?,
    })
}

fn put_sleep(w: &mut ByteWriter, s: &SleepRule) -> Option<()> {
    match s {
        SleepRule::Disabled => {
            w.u8(0)?;
            w.u16(0)
        }
        SleepRule::VbatBelow(mv) => {
            w.u8(1)?;
            w.u16(*mv)
        }
        SleepRule::VsolBelow(mv) => {
            w.u8(2)?;
            w.u16(*mv)
        }
    }
}

fn get_sleep(r: &mut ByteReader) -> Option<SleepRule> {
    let tag = r.u8()?;
    let mv = r.u16()?;
    Some(match tag {
        0 => SleepRule::Disabled,
        1 => SleepRule::VbatBelow(mv),
        2 => SleepRule::VsolBelow(mv),
        _ => return None,
    })
}

fn put_beacon(w: &mut ByteWriter, b: &BeaconConf) -> Option<()> {
    put_thread(w, &b.thread)?;
    put_radio(w, &b.radio)?;
    put_sleep(w, &b.sleep)?;
    put_call(w, &b.call)?;
    put_path(w, &b.path)?;
    w.u8(b.symbol as u8)?;
    w.u32(b.tel_enc_cycle_s)?;
    w.bool(b.run_once)
}

fn get_beacon(r: &mut ByteReader) -> Option<BeaconConf> {
    Some(BeaconConf {
        thread: get_thread(r)?,
        radio: get_radio(r)?,
        sleep: get_sleep(r)?,
        call: get_call(r)?,
        path: get_path(r)?,
        symbol: AprsSymbol::from_u8(r.u8()?)?,
        tel_enc_cycle_s: r.u32()?,
        run_once: r.bool()?,
    })
}

fn put_image(w: &mut ByteWriter, i: &ImageConf) -> Option<()> {
    put_thread(w, &i.thread)?;
    put_radio(w, &i.radio)?;
    put_sleep(w, &i.sleep)?;
    put_call(w, &i.call)?;
    put_path(w, &i.path)?;
    w.u8(i.res as u8)?;
    w.u8(i.quality)?;
    w.u8(i.retries)
}

fn get_image(r: &mut ByteReader) -> Option<ImageConf> {
    Some(ImageConf {
        thread: get_thread(r)?,
        radio: get_radio(r)?,
        sleep: get_sleep(r)?,
        call: get_call(r)?,
        path: get_path(r)?,
        res: Resolution::from_u8(r.u8()?)?,
        quality: r.u8()?,
        retries: r.u8()?,
    })
}

fn encode_config(w: &mut ByteWriter, c: &Config) -> Option<()> {
    put_beacon(w, &c.pos_pri)?;
    put_beacon(w, &c.pos_sec)?;
    put_image(w, &c.img_pri)?;
    put_image(w, &c.img_sec)?;
    put_thread(w, &c.log.thread)?;
    put_radio(w, &c.log.radio)?;
    put_call(w, &c.log.call)?;
    put_path(w, &c.log.path)?;
    w.bool(c.rx.active)?;
    put_radio(w, &c.rx.radio)?;
    put_call(w, &c.rx.call)?;
    w.bool(c.base.enabled)?;
    put_call(w, &c.base.call)?;
    put_path(w, &c.base.path)?;
    w.u32(c.aprsd_window_s)?;
    w.u32(c.dedup_window_s)?;
    w.bool(c.dig_active)?;
    w.bool(c.keep_cam_switched_on)?;
    w.u16(c.gps_on_vbat)?;
    w.u16(c.gps_off_vbat)?;
    w.u16(c.gps_onper_vbat)?;
    w.u32(c.log_fallback_window_s)?;
    w.u32(c.wdg_timeout_s)
}

fn decode_config(r: &mut ByteReader) -> Option<Config> {
    Some(Config {
        pos_pri: get_beacon(r)?,
        pos_sec: get_beacon(r)?,
        img_pri: get_image(r)?,
        img_sec: get_image(r)?,
        log: LogConf {
            thread: get_thread(r)?,
            radio: get_radio(r)?,
            call: get_call(r)?,
            path: get_path(r)?,
        },
        rx: RxConf {
            active: r.bool()?,
            radio: get_radio(r)?,
            call: get_call(r)?,
        },
        base: BaseConf {
            enabled: r.bool()?,
            call: get_call(r)?,
            path: get_path(r)?,
        },
        aprsd_window_s: r.u32()?,
        dedup_window_s: r.u32()?,
        dig_active: r.bool()?,
        keep_cam_switched_on: r.bool()?,
        gps_on_vbat: r.u16()?,
        gps_off_vbat: r.u16()?,
        gps_onper_vbat: r.u16()?,
        log_fallback_window_s: r.u32()?,
        wdg_timeout_s: r.u32()?,
    })
}

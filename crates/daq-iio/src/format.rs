//! Sample data formats and hardware ⇄ host conversion.
//!
//! A [`DataFormat`] describes how one sample of a channel is stored in the
//! hardware buffer: storage width, number of significant bits, right shift,
//! signedness, byte order and repeat count. The kernel exposes it as a short
//! string such as `le:s12/16>>4` (little-endian, signed, 12 significant bits
//! in 16-bit storage, shifted left by 4) or `be:U32/32X4>>0` (big-endian,
//! fully defined unsigned, 4 repeats).

use std::fmt;
use std::str::FromStr;

use crate::error::{IioError, Result};

/// Storage and encoding of one channel sample.
///
/// Value conversion works on storage units of at most 64 bits. Wider
/// channels can still be read and written raw, but converting reads and
/// writes on them fail with
/// [`InvalidConfiguration`](crate::IioError::InvalidConfiguration).
#[derive(Debug, Clone, PartialEq)]
pub struct DataFormat {
    /// Storage width in bits
    pub length: u32,
    /// Significant bits
    pub bits: u32,
    /// Right shift to apply to the stored value
    pub shift: u32,
    /// Two's complement value
    pub is_signed: bool,
    /// Value already occupies the full storage width (no masking or sign extension)
    pub is_fully_defined: bool,
    /// Big-endian storage
    pub is_big_endian: bool,
    /// Whether `scale` is meaningful
    pub with_scale: bool,
    /// Multiplier from raw value to physical unit
    pub scale: f64,
    /// Number of consecutive storage units per sample
    pub repeat: u32,
}

impl Default for DataFormat {
    fn default() -> Self {
        Self {
            length: 16,
            bits: 16,
            shift: 0,
            is_signed: false,
            is_fully_defined: true,
            is_big_endian: false,
            with_scale: false,
            scale: 1.0,
            repeat: 1,
        }
    }
}

impl DataFormat {
    /// Signed little-endian format with `bits` significant bits in `length` storage.
    pub fn signed(bits: u32, length: u32) -> Self {
        Self {
            length,
            bits,
            is_signed: true,
            is_fully_defined: bits == length,
            ..Self::default()
        }
    }

    /// Unsigned little-endian format with `bits` significant bits in `length` storage.
    pub fn unsigned(bits: u32, length: u32) -> Self {
        Self {
            length,
            bits,
            is_signed: false,
            is_fully_defined: bits == length,
            ..Self::default()
        }
    }

    /// Set the byte order.
    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.is_big_endian = big_endian;
        self
    }

    /// Set the right shift.
    pub fn with_shift(mut self, shift: u32) -> Self {
        self.shift = shift;
        self
    }

    /// Set the repeat count.
    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Declare a scale factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.with_scale = true;
        self.scale = scale;
        self
    }

    /// Bytes of one storage unit.
    pub fn storage_bytes(&self) -> usize {
        self.length.div_ceil(8) as usize
    }

    /// Bytes of one full sample (storage unit × repeat).
    pub fn sample_bytes(&self) -> usize {
        self.storage_bytes() * self.repeat as usize
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(IioError::attribute("type", message));

        if self.length == 0 {
            return invalid("storage length must be non-zero".to_string());
        }
        if self.bits == 0 || self.bits > self.length {
            return invalid(format!(
                "{} significant bits do not fit {}-bit storage",
                self.bits, self.length
            ));
        }
        if self.bits + self.shift > self.length {
            return invalid(format!(
                "{} bits shifted by {} overflow {}-bit storage",
                self.bits, self.shift, self.length
            ));
        }
        if self.repeat == 0 {
            return invalid("repeat count must be at least 1".to_string());
        }
        Ok(())
    }

    /// Whether values can be converted to/from host integers.
    ///
    /// True for storage units of up to 64 bits.
    pub fn is_convertible(&self) -> bool {
        self.storage_bytes() <= 8
    }

    fn width(&self) -> u32 {
        if self.is_fully_defined {
            self.storage_bytes() as u32 * 8
        } else {
            self.bits
        }
    }

    fn load(&self, src: &[u8]) -> u64 {
        let len = self.storage_bytes();
        let mut raw = 0u64;
        if self.is_big_endian {
            for &b in &src[..len] {
                raw = (raw << 8) | u64::from(b);
            }
        } else {
            for &b in src[..len].iter().rev() {
                raw = (raw << 8) | u64::from(b);
            }
        }
        raw
    }

    fn store(&self, raw: u64, dst: &mut [u8]) {
        let len = self.storage_bytes();
        for i in 0..len {
            let byte = (raw >> (8 * i)) as u8;
            if self.is_big_endian {
                dst[len - 1 - i] = byte;
            } else {
                dst[i] = byte;
            }
        }
    }

    /// Decode one storage unit from hardware encoding.
    ///
    /// `src` must hold at least [`storage_bytes`](Self::storage_bytes) bytes and
    /// the format must be [convertible](Self::is_convertible).
    pub fn decode(&self, src: &[u8]) -> i64 {
        let raw = self.load(src) >> self.shift;
        let width = self.width();
        let value = raw & low_mask(width);
        if self.is_signed && width < 64 && value & (1 << (width - 1)) != 0 {
            (value | !low_mask(width)) as i64
        } else {
            value as i64
        }
    }

    /// Encode one value into hardware encoding.
    ///
    /// Bits above the significant width are discarded.
    pub fn encode(&self, value: i64, dst: &mut [u8]) {
        let raw = (value as u64 & low_mask(self.bits)) << self.shift;
        self.store(raw, dst);
    }

    /// Convert one storage unit to host byte order, shifted and sign-extended.
    pub fn to_host(&self, src: &[u8], dst: &mut [u8]) {
        let value = self.decode(src);
        let len = self.storage_bytes();
        let bytes = value.to_ne_bytes();
        if cfg!(target_endian = "little") {
            dst[..len].copy_from_slice(&bytes[..len]);
        } else {
            dst[..len].copy_from_slice(&bytes[8 - len..]);
        }
    }

    /// Convert one host-order storage unit back to hardware encoding.
    pub fn from_host(&self, src: &[u8], dst: &mut [u8]) {
        let value = host_value(src, self.storage_bytes(), self.is_signed);
        self.encode(value, dst);
    }

    /// Apply the declared scale, if any.
    pub fn scaled(&self, value: i64) -> f64 {
        if self.with_scale {
            value as f64 * self.scale
        } else {
            value as f64
        }
    }
}

/// Read a host-endian integer of `len` bytes.
pub(crate) fn host_value(src: &[u8], len: usize, signed: bool) -> i64 {
    let mut bytes = [0u8; 8];
    if cfg!(target_endian = "little") {
        bytes[..len].copy_from_slice(&src[..len]);
    } else {
        bytes[8 - len..].copy_from_slice(&src[..len]);
    }
    let raw = u64::from_ne_bytes(bytes);
    let width = len as u32 * 8;
    if signed && width < 64 && raw & (1 << (width - 1)) != 0 {
        (raw | !low_mask(width)) as i64
    } else {
        raw as i64
    }
}

fn low_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl FromStr for DataFormat {
    type Err = IioError;

    /// Parse the kernel scan-element format, `[bl]e:[sSuU]BITS/LENGTH[XREPEAT]>>SHIFT`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || IioError::attribute("type", format!("malformed data format '{s}'"));

        let (endian, rest) = s.split_once(':').ok_or_else(bad)?;
        let is_big_endian = match endian {
            "be" => true,
            "le" => false,
            _ => return Err(bad()),
        };

        let mut chars = rest.chars();
        let sign = chars.next().ok_or_else(bad)?;
        let (is_signed, upper) = match sign {
            's' => (true, false),
            'S' => (true, true),
            'u' => (false, false),
            'U' => (false, true),
            _ => return Err(bad()),
        };
        let rest = chars.as_str();

        let (layout, shift) = rest.split_once(">>").ok_or_else(bad)?;
        let shift: u32 = shift.trim().parse().map_err(|_| bad())?;
        let (bits, storage) = layout.split_once('/').ok_or_else(bad)?;
        let bits: u32 = bits.parse().map_err(|_| bad())?;
        let (length, repeat) = match storage.split_once('X') {
            Some((length, repeat)) => (
                length.parse().map_err(|_| bad())?,
                repeat.parse().map_err(|_| bad())?,
            ),
            None => (storage.parse().map_err(|_| bad())?, 1),
        };

        let format = Self {
            length,
            bits,
            shift,
            is_signed,
            is_fully_defined: upper || bits == length,
            is_big_endian,
            with_scale: false,
            scale: 1.0,
            repeat,
        };
        format.validate()?;
        Ok(format)
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match (self.is_signed, self.is_fully_defined && self.bits != self.length) {
            (true, false) => 's',
            (true, true) => 'S',
            (false, false) => 'u',
            (false, true) => 'U',
        };
        write!(
            f,
            "{}e:{}{}/{}",
            if self.is_big_endian { 'b' } else { 'l' },
            sign,
            self.bits,
            self.length
        )?;
        if self.repeat > 1 {
            write!(f, "X{}", self.repeat)?;
        }
        write!(f, ">>{}", self.shift)
    }
}

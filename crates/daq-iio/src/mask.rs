//! Channel selection bitsets.
//!
//! A [`ChannelsMask`] has one bit per channel of a device. Bit `n` selects the
//! scan element whose index is `n`; the selected channels, in ascending index
//! order, form the per-sample layout of any buffer created from the mask.

use crate::channel::Channel;
use crate::device::Device;
use crate::error::{IioError, Result};

const WORD_BITS: usize = 32;

/// Bitset of enabled channels, sized to a device's channel count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelsMask {
    size: usize,
    words: Vec<u32>,
}

impl ChannelsMask {
    /// Create a mask of `channel_count` bits, all cleared.
    pub fn new(channel_count: usize) -> Result<Self> {
        if channel_count == 0 {
            return Err(IioError::Allocation {
                op: "create_channels_mask",
                reason: "a channels mask needs at least one channel".to_string(),
            });
        }

        let nb_words = channel_count.div_ceil(WORD_BITS);
        let mut words = Vec::new();
        words
            .try_reserve_exact(nb_words)
            .map_err(|e| IioError::Allocation {
                op: "create_channels_mask",
                reason: e.to_string(),
            })?;
        words.resize(nb_words, 0);

        Ok(Self {
            size: channel_count,
            words,
        })
    }

    /// Create an empty mask matching `device`.
    pub fn for_device(device: &Device) -> Result<Self> {
        Self::new(device.channels_count())
    }

    /// Number of bits (the owning device's channel count).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Set bit `bit`. Returns `false` when out of range.
    pub fn set_bit(&mut self, bit: usize) -> bool {
        if bit >= self.size {
            return false;
        }
        self.words[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
        true
    }

    /// Clear bit `bit`. Returns `false` when out of range.
    pub fn clear_bit(&mut self, bit: usize) -> bool {
        if bit >= self.size {
            return false;
        }
        self.words[bit / WORD_BITS] &= !(1 << (bit % WORD_BITS));
        true
    }

    /// Whether bit `bit` is set. Out of range bits read as clear.
    pub fn test_bit(&self, bit: usize) -> bool {
        bit < self.size && self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Number of set bits.
    pub fn enabled_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set bits, in ascending order.
    pub fn iter_enabled(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |&bit| self.test_bit(bit))
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Overwrite this mask with `src`.
    pub fn copy_from(&mut self, src: &ChannelsMask) -> Result<()> {
        if self.size != src.size {
            return Err(IioError::DeviceMismatch {
                op: "copy_channels_mask",
                device: String::new(),
                mask_size: src.size,
                channel_count: self.size,
            });
        }
        self.words.copy_from_slice(&src.words);
        Ok(())
    }

    /// Enable exactly `channels` among the channels of `device`.
    ///
    /// Every other channel of the device is disabled. Buffers already created
    /// from this mask keep their own snapshot and are not affected.
    pub fn set_channels(&mut self, device: &Device, channels: &[&Channel]) -> Result<()> {
        device.check_mask("set_channels", self)?;

        for chn in channels {
            if chn.device_id() != device.id() {
                return Err(IioError::InvalidConfiguration {
                    op: "set_channels",
                    device: device.id().to_string(),
                    reason: format!(
                        "channel '{}' belongs to device '{}'",
                        chn.id(),
                        chn.device_id()
                    ),
                });
            }
            if !chn.is_scan_element() {
                return Err(IioError::NotScanElement {
                    device: device.id().to_string(),
                    channel: chn.id().to_string(),
                });
            }
        }

        self.clear();
        for chn in channels {
            if let Some(index) = chn.index() {
                self.set_bit(index as usize);
            }
        }
        Ok(())
    }

    /// Bytes per sample of all enabled channels of `device`.
    pub fn sample_size(&self, device: &Device) -> Result<usize> {
        device.sample_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_channels_rejected() {
        let err = ChannelsMask::new(0).unwrap_err();
        assert!(matches!(err, IioError::Allocation { .. }));
    }

    #[test]
    fn test_bits_across_words() {
        let mut mask = ChannelsMask::new(70).unwrap();
        assert!(mask.is_empty());
        assert!(mask.set_bit(0));
        assert!(mask.set_bit(33));
        assert!(mask.set_bit(69));
        assert!(!mask.set_bit(70));
        assert_eq!(mask.enabled_count(), 3);
        assert_eq!(mask.iter_enabled().collect::<Vec<_>>(), vec![0, 33, 69]);

        assert!(mask.clear_bit(33));
        assert!(!mask.test_bit(33));
        assert!(!mask.test_bit(500));
        assert_eq!(mask.enabled_count(), 2);
    }

    #[test]
    fn test_copy_requires_same_size() {
        let mut a = ChannelsMask::new(4).unwrap();
        let mut b = ChannelsMask::new(4).unwrap();
        b.set_bit(2);
        a.copy_from(&b).unwrap();
        assert_eq!(a, b);

        let c = ChannelsMask::new(5).unwrap();
        assert!(matches!(
            a.copy_from(&c),
            Err(IioError::DeviceMismatch { .. })
        ));
    }
}

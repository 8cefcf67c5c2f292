//! Transport seam between buffers and the hardware.
//!
//! A [`RingBackend`] opens one [`RingIo`] per hardware ring. The buffer's
//! worker thread drives it: one [`RingIo::transfer`] call per enqueued
//! block, in submission order. Real transports (local kernel interface,
//! network, USB) implement these traits outside this crate; [`sim`] provides
//! an in-process implementation.

/// In-process simulated rings and attribute store.
pub mod sim;

use std::sync::Arc;

use crate::channel::Direction;
use crate::device::Device;
use crate::error::Result;
use crate::mask::ChannelsMask;

/// Parameters of an enabled ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingParams {
    /// Bytes per sample.
    pub sample_size: usize,
    /// Transfer direction of every enabled channel.
    pub direction: Direction,
}

/// One block's worth of data moving through the ring.
#[derive(Debug)]
pub enum Transfer<'a> {
    /// Fill `dst` with samples from the device.
    Read(&'a mut [u8]),
    /// Send `src` to the device; `cyclic` replays it until the ring stops.
    Write {
        /// Block contents.
        src: &'a [u8],
        /// Replay until the ring stops.
        cyclic: bool,
    },
}

impl Transfer<'_> {
    /// Bytes moved by the transfer.
    pub fn len(&self) -> usize {
        match self {
            Self::Read(dst) => dst.len(),
            Self::Write { src, .. } => src.len(),
        }
    }

    /// True for a zero-length transfer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens hardware rings.
pub trait RingBackend: Send + Sync {
    /// Open ring `hw_index` of `device` for the channels in `mask`.
    fn open_ring(
        &self,
        device: &Device,
        hw_index: u32,
        mask: &ChannelsMask,
    ) -> Result<Arc<dyn RingIo>>;
}

/// An open hardware ring.
///
/// Transfers are issued from a single worker thread; `cancel` may be called
/// from any thread and must make a pending `transfer` return promptly.
pub trait RingIo: Send + Sync {
    /// Start or stop the hardware.
    fn set_enabled(&self, enabled: bool, params: RingParams) -> Result<()>;

    /// Move one block of data, blocking until the hardware is done with it.
    fn transfer(&self, transfer: Transfer<'_>) -> Result<()>;

    /// Abort the pending transfer, if any.
    fn cancel(&self);
}

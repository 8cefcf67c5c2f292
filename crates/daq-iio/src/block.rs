//! Blocks: units of memory exchanged with a hardware ring.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::buffer::{Buffer, Slot};
use crate::channel::Channel;
use crate::device::{Device, SampleLayout};
use crate::error::{IioError, Result};
use crate::mask::ChannelsMask;

/// A block of sample memory belonging to a [`Buffer`].
///
/// While enqueued the block belongs to the hardware: its contents can be
/// neither read nor written until [`dequeue`](Self::dequeue) returns.
#[derive(Debug)]
pub struct Block<'buf> {
    buffer: &'buf Buffer,
    slot: Arc<Slot>,
    layout: Arc<SampleLayout>,
}

impl<'buf> Block<'buf> {
    /// Allocate a block of `size` bytes. The buffer must be enabled.
    pub fn create(buffer: &'buf Buffer, size: usize) -> Result<Self> {
        let (slot, layout) = buffer.shared().register_block(size)?;
        Ok(Self {
            buffer,
            slot,
            layout,
        })
    }

    /// Allocate a block holding `samples` samples.
    pub fn create_for_samples(buffer: &'buf Buffer, samples: usize) -> Result<Self> {
        let size = samples
            .checked_mul(buffer.sample_size()?)
            .ok_or_else(|| IioError::Allocation {
                op: "create_block",
                reason: format!("{samples} samples overflow the address space"),
            })?;
        Self::create(buffer, size)
    }

    /// Buffer the block belongs to.
    pub fn buffer(&self) -> &'buf Buffer {
        self.buffer
    }

    /// Device of the owning buffer.
    pub fn device(&self) -> &Device {
        self.buffer.device()
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.slot.size
    }

    /// Samples the block can hold.
    pub fn samples(&self) -> usize {
        self.slot.size / self.layout.sample_size()
    }

    /// Bytes handed to the hardware by the last enqueue.
    pub fn bytes_used(&self) -> usize {
        self.buffer.shared().bytes_used(self.slot.id)
    }

    /// True from enqueue until the transfer is dequeued.
    pub fn is_enqueued(&self) -> bool {
        self.buffer.shared().is_enqueued(self.slot.id)
    }

    pub(crate) fn layout(&self) -> &SampleLayout {
        &self.layout
    }

    pub(crate) fn with_data<R>(&self, op: &'static str, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let data = self.buffer.shared().lock_data(op, &self.slot)?;
        Ok(f(data.as_slice()))
    }

    pub(crate) fn with_data_mut<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut data = self.buffer.shared().lock_data(op, &self.slot)?;
        Ok(f(data.as_mut_slice()))
    }

    /// Snapshot of the block contents.
    pub fn read(&self) -> Result<Bytes> {
        self.with_data("read_block", Bytes::copy_from_slice)
    }

    /// Copy `src` to the start of the block. Returns the bytes copied.
    pub fn write(&self, src: &[u8]) -> Result<usize> {
        self.with_data_mut("write_block", |data| {
            let len = src.len().min(data.len());
            data[..len].copy_from_slice(&src[..len]);
            len
        })
    }

    /// Hand the first `count` bytes to the hardware (`None` or `0`: all).
    ///
    /// With `cyclic` the hardware replays the block until the buffer is
    /// disabled; only output buffers accept it.
    pub fn enqueue(&self, count: Option<usize>, cyclic: bool) -> Result<()> {
        self.buffer.shared().enqueue(&self.slot, count, cyclic)
    }

    /// Wait for the hardware to finish with the block.
    ///
    /// `nonblock` returns `WouldBlock` instead of waiting. Waits are bounded
    /// by the context timeout.
    pub fn dequeue(&self, nonblock: bool) -> Result<()> {
        self.buffer.shared().dequeue(self.slot.id, nonblock)
    }

    /// Byte offset of the first sample of `channel`, if it is in the layout.
    pub fn first_offset(&self, channel: &Channel) -> Option<usize> {
        if channel.device_id() != self.device().id() {
            return None;
        }
        let index = channel.index()?;
        self.layout.entry(index).map(|entry| entry.offset)
    }

    /// Call `f` for each sample of each channel enabled in `mask`, in layout
    /// order, and return the sum of its results.
    ///
    /// `mask` may select a subset of the buffer's channels; channels outside
    /// the buffer's own mask are never visited.
    pub fn foreach_sample<F>(&self, mask: &ChannelsMask, mut f: F) -> Result<usize>
    where
        F: FnMut(&Channel, &[u8]) -> Result<usize>,
    {
        let device = self.buffer.device();
        device.check_mask("foreach_sample", mask)?;
        let stride = self.layout.sample_size();

        let data = self.with_data("foreach_sample", Bytes::copy_from_slice)?;
        let mut total = 0;
        let mut visited = 0;
        for sample in data.chunks_exact(stride) {
            for entry in self.layout.entries() {
                if !mask.test_bit(entry.index as usize) {
                    continue;
                }
                let Some(channel) = device.channel(entry.position) else {
                    continue;
                };
                total += f(channel, &sample[entry.offset..entry.offset + entry.len])?;
                visited += 1;
            }
        }
        trace!(device = %device.id(), visited, "Visited block samples");
        Ok(total)
    }
}

impl Drop for Block<'_> {
    fn drop(&mut self) {
        self.buffer.shared().unregister_block(self.slot.id);
        trace!(device = %self.buffer.device().id(), block = self.slot.id, "Block released");
    }
}

//! Streams: a pool of blocks cycled through one buffer.
//!
//! A [`Stream`] owns `pool_size` blocks and lends them out one at a time with
//! [`Stream::next_block`]. For input buffers every block is enqueued up
//! front and `next_block` hands out completed blocks in FIFO order. For
//! output buffers the first pass hands out the fresh blocks for filling;
//! afterwards each call waits for the oldest transfer to finish.
//!
//! The block returned by `next_block` is recycled by the following call: it
//! is re-enqueued unless the caller already enqueued it. Because
//! `next_block` borrows the stream mutably, a block reference cannot survive
//! the call that recycles it.

use tracing::{debug, trace};

use crate::block::Block;
use crate::buffer::Buffer;
use crate::channel::Direction;
use crate::error::{IioError, Result};

/// Outcome of [`Stream::next_block`].
#[derive(Debug)]
pub enum StreamPoll<'s, 'buf> {
    /// The next block, completed by the hardware (input) or free to fill
    /// (output).
    Block(&'s Block<'buf>),
    /// The context timeout expired; calling again resumes with the same block.
    TimedOut,
    /// The buffer was cancelled.
    Cancelled,
}

impl StreamPoll<'_, '_> {
    /// True when a block was returned.
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }
}

fn classify<'s, 'buf>(err: IioError) -> Result<StreamPoll<'s, 'buf>> {
    match err {
        IioError::Timeout { .. } => Ok(StreamPoll::TimedOut),
        IioError::Cancelled { .. } => Ok(StreamPoll::Cancelled),
        err => Err(err),
    }
}

/// Block pool streaming through a [`Buffer`].
///
/// Dropping the stream waits for every enqueued block to complete. With a
/// context timeout of 0 on a ring that never completes, that wait does not
/// end on its own: [`cancel`](Buffer::cancel) the buffer first.
#[derive(Debug)]
pub struct Stream<'buf> {
    buffer: &'buf Buffer,
    blocks: Vec<Block<'buf>>,
    next: usize,
    current: Option<usize>,
    fresh: usize,
}

impl<'buf> Stream<'buf> {
    /// Create a stream of `pool_size` blocks of `samples_per_block` samples.
    ///
    /// The buffer must be enabled. Input streams enqueue every block
    /// immediately, so `pool_size` may not exceed the ring depth.
    pub fn create(buffer: &'buf Buffer, samples_per_block: usize, pool_size: usize) -> Result<Self> {
        if samples_per_block == 0 || pool_size == 0 {
            return Err(IioError::Allocation {
                op: "create_stream",
                reason: format!(
                    "{pool_size} blocks of {samples_per_block} samples is an empty pool"
                ),
            });
        }
        if !buffer.is_enabled() {
            return Err(IioError::BufferNotEnabled {
                op: "create_stream",
                device: buffer.device().id().to_string(),
            });
        }

        let blocks = (0..pool_size)
            .map(|_| Block::create_for_samples(buffer, samples_per_block))
            .collect::<Result<Vec<_>>>()?;

        let direction = buffer.direction();
        let fresh = match direction {
            Direction::Input => {
                for block in &blocks {
                    block.enqueue(None, false)?;
                }
                0
            }
            Direction::Output => pool_size,
        };

        debug!(
            device = %buffer.device().id(),
            pool_size,
            samples_per_block,
            direction = %direction,
            "Stream created"
        );

        Ok(Self {
            buffer,
            blocks,
            next: 0,
            current: None,
            fresh,
        })
    }

    /// Create a stream with the context's default pool size.
    pub fn with_default_pool(buffer: &'buf Buffer, samples_per_block: usize) -> Result<Self> {
        Self::create(buffer, samples_per_block, buffer.default_stream_pool_size())
    }

    /// Buffer the stream cycles through.
    pub fn buffer(&self) -> &'buf Buffer {
        self.buffer
    }

    /// Number of blocks in the pool.
    pub fn pool_size(&self) -> usize {
        self.blocks.len()
    }

    /// Size in bytes of each block.
    pub fn block_size(&self) -> usize {
        self.blocks.first().map_or(0, Block::size)
    }

    /// Recycle the previous block and return the next one.
    pub fn next_block(&mut self) -> Result<StreamPoll<'_, 'buf>> {
        if self.buffer.is_cancelled() {
            return Ok(StreamPoll::Cancelled);
        }

        if let Some(prev) = self.current.take() {
            let block = &self.blocks[prev];
            if !block.is_enqueued() {
                if let Err(e) = block.enqueue(None, false) {
                    self.current = Some(prev);
                    return classify(e);
                }
            }
        }

        let idx = self.next;
        if self.fresh > 0 {
            self.fresh -= 1;
        } else if let Err(e) = self.blocks[idx].dequeue(false) {
            if !e.is_timeout() {
                // Failed transfer is consumed, recycle the block next call.
                self.current = Some(idx);
                self.next = (idx + 1) % self.blocks.len();
            }
            return classify(e);
        }

        self.current = Some(idx);
        self.next = (idx + 1) % self.blocks.len();
        trace!(device = %self.buffer.device().id(), block = idx, "Stream yielded block");
        Ok(StreamPoll::Block(&self.blocks[idx]))
    }
}

/// Blocks until every enqueued block completes. Cancel the buffer first if
/// the ring may never complete them.
impl Drop for Stream<'_> {
    fn drop(&mut self) {
        let mut abandoned = 0;
        for block in &self.blocks {
            if block.is_enqueued() && block.dequeue(false).is_err() {
                abandoned += 1;
            }
        }
        debug!(
            device = %self.buffer.device().id(),
            pool_size = self.blocks.len(),
            abandoned,
            "Stream destroyed"
        );
    }
}

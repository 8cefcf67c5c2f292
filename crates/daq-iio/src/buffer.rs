//! Hardware buffers.
//!
//! A [`Buffer`] binds a device, a snapshot of a channels mask and one
//! hardware ring (`hw_index`). It follows the lifecycle
//!
//! ```text
//! Created ──enable──▶ Enabled ◀──enable── Disabled
//!                        │                   ▲
//!                        └──────disable──────┘
//! ```
//!
//! and ends in `Destroyed` when dropped. While enabled, [`Block`]s are
//! created against it and enqueued; a per-buffer worker thread hands them to
//! the [`RingIo`] in submission order and publishes each completion, which
//! [`Block::dequeue`] waits for.
//!
//! [`Block`]: crate::Block
//! [`Block::dequeue`]: crate::Block::dequeue

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::attr::{Attr, AttrMap, AttrScope};
use crate::backend::{RingIo, RingParams, Transfer};
use crate::channel::Direction;
use crate::context::Context;
use crate::device::{Device, SampleLayout};
use crate::error::{BufferState, IioError, Result};
use crate::mask::ChannelsMask;

/// Memory of one block, shared with the worker while a transfer runs.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) id: u64,
    pub(crate) size: usize,
    pub(crate) data: Mutex<Vec<u8>>,
}

#[derive(Debug)]
enum TransferState {
    Idle,
    Queued { bytes_used: usize, cyclic: bool },
    InFlight,
    Done(Result<()>),
}

#[derive(Debug)]
struct SlotState {
    transfer: TransferState,
    bytes_used: usize,
}

#[derive(Debug)]
struct RingState {
    lifecycle: BufferState,
    cancelled: bool,
    cyclic_locked: bool,
    shutdown: bool,
    queue: VecDeque<Arc<Slot>>,
    in_flight: Option<u64>,
    slots: HashMap<u64, SlotState>,
    next_id: u64,
}

impl RingState {
    fn outstanding(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    /// Complete every queued and in-flight transfer with `Cancelled`.
    fn fail_pending(&mut self, op: &'static str, device: &str) -> usize {
        let mut failed = 0;
        let queued: Vec<u64> = self.queue.drain(..).map(|slot| slot.id).collect();
        for id in queued.into_iter().chain(self.in_flight) {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.transfer = TransferState::Done(Err(IioError::Cancelled {
                    op,
                    device: device.to_string(),
                }));
                failed += 1;
            }
        }
        failed
    }
}

/// State shared between a buffer, its blocks, its worker and cancellers.
pub(crate) struct RingShared {
    device: Arc<Device>,
    hw_index: u32,
    mask: ChannelsMask,
    layout: Option<Arc<SampleLayout>>,
    io: Arc<dyn RingIo>,
    timeout: Option<Duration>,
    depth: usize,
    state: Mutex<RingState>,
    work: Condvar,
    done: Condvar,
}

impl RingShared {
    fn device_id(&self) -> String {
        self.device.id().to_string()
    }

    fn not_enabled(&self, op: &'static str, state: BufferState) -> IioError {
        if state == BufferState::Destroyed {
            IioError::InvalidState { op, state }
        } else {
            IioError::BufferNotEnabled {
                op,
                device: self.device_id(),
            }
        }
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        let failed = state.fail_pending("cancel", self.device.id());
        let in_flight = state.in_flight.is_some();
        drop(state);

        if in_flight {
            self.io.cancel();
        }
        warn!(
            device = %self.device.id(),
            hw_index = self.hw_index,
            failed,
            "Buffer cancelled"
        );
        self.done.notify_all();
    }

    /// Allocate and register the memory of a new block.
    pub(crate) fn register_block(&self, size: usize) -> Result<(Arc<Slot>, Arc<SampleLayout>)> {
        let mut state = self.state.lock();
        if state.lifecycle != BufferState::Enabled {
            return Err(self.not_enabled("create_block", state.lifecycle));
        }
        let layout = self
            .layout
            .clone()
            .ok_or_else(|| self.not_enabled("create_block", state.lifecycle))?;

        if size == 0 || size < layout.sample_size() {
            return Err(IioError::Allocation {
                op: "create_block",
                reason: format!(
                    "{size} bytes cannot hold one {}-byte sample",
                    layout.sample_size()
                ),
            });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| IioError::Allocation {
                op: "create_block",
                reason: e.to_string(),
            })?;
        data.resize(size, 0);

        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(
            id,
            SlotState {
                transfer: TransferState::Idle,
                bytes_used: 0,
            },
        );
        trace!(device = %self.device.id(), block = id, size, "Block created");

        Ok((
            Arc::new(Slot {
                id,
                size,
                data: Mutex::new(data),
            }),
            layout,
        ))
    }

    pub(crate) fn unregister_block(&self, id: u64) {
        let mut state = self.state.lock();
        state.queue.retain(|slot| slot.id != id);
        state.slots.remove(&id);
    }

    fn enqueued(state: &RingState, id: u64) -> bool {
        state
            .slots
            .get(&id)
            .is_some_and(|slot| !matches!(slot.transfer, TransferState::Idle))
    }

    pub(crate) fn is_enqueued(&self, id: u64) -> bool {
        Self::enqueued(&self.state.lock(), id)
    }

    pub(crate) fn bytes_used(&self, id: u64) -> usize {
        self.state
            .lock()
            .slots
            .get(&id)
            .map_or(0, |slot| slot.bytes_used)
    }

    /// Lock a block's memory, refusing while it is enqueued.
    pub(crate) fn lock_data<'a>(
        &self,
        op: &'static str,
        slot: &'a Slot,
    ) -> Result<MutexGuard<'a, Vec<u8>>> {
        let state = self.state.lock();
        if Self::enqueued(&state, slot.id) {
            return Err(IioError::BlockBusy {
                op,
                device: self.device_id(),
            });
        }
        Ok(slot.data.lock())
    }

    pub(crate) fn enqueue(&self, slot: &Arc<Slot>, count: Option<usize>, cyclic: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.lifecycle != BufferState::Enabled {
            return Err(self.not_enabled("enqueue_block", state.lifecycle));
        }
        if state.cancelled {
            return Err(IioError::Cancelled {
                op: "enqueue_block",
                device: self.device_id(),
            });
        }
        if Self::enqueued(&state, slot.id) {
            return Err(IioError::BlockBusy {
                op: "enqueue_block",
                device: self.device_id(),
            });
        }

        let size = slot.size;
        let bytes_used = match count {
            None | Some(0) => size,
            Some(count) if count > size => {
                return Err(IioError::InvalidConfiguration {
                    op: "enqueue_block",
                    device: self.device_id(),
                    reason: format!("{count} bytes requested from a {size}-byte block"),
                });
            }
            Some(count) => count,
        };

        if cyclic && self.direction() != Direction::Output {
            return Err(IioError::InvalidConfiguration {
                op: "enqueue_block",
                device: self.device_id(),
                reason: "cyclic transfers need an output buffer".to_string(),
            });
        }
        if state.cyclic_locked {
            return Err(IioError::HardwareBusy {
                device: self.device_id(),
                hw_index: self.hw_index,
                reason: "ring is replaying a cyclic block".to_string(),
            });
        }
        if state.outstanding() >= self.depth {
            return Err(IioError::RingFull {
                device: self.device_id(),
                depth: self.depth,
            });
        }

        let Some(entry) = state.slots.get_mut(&slot.id) else {
            return Err(IioError::InvalidState {
                op: "enqueue_block",
                state: state.lifecycle,
            });
        };
        entry.transfer = TransferState::Queued { bytes_used, cyclic };
        entry.bytes_used = bytes_used;
        state.queue.push_back(slot.clone());
        if cyclic {
            state.cyclic_locked = true;
        }
        trace!(device = %self.device.id(), block = slot.id, bytes_used, cyclic, "Block enqueued");
        drop(state);

        self.work.notify_one();
        Ok(())
    }

    pub(crate) fn dequeue(&self, id: u64, nonblock: bool) -> Result<()> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        loop {
            let lifecycle = state.lifecycle;
            let Some(slot) = state.slots.get_mut(&id) else {
                return Err(IioError::InvalidState {
                    op: "dequeue_block",
                    state: lifecycle,
                });
            };

            match std::mem::replace(&mut slot.transfer, TransferState::Idle) {
                TransferState::Idle => {
                    return Err(IioError::InvalidState {
                        op: "dequeue_block",
                        state: lifecycle,
                    });
                }
                TransferState::Done(result) => {
                    trace!(device = %self.device.id(), block = id, ok = result.is_ok(), "Block dequeued");
                    return result;
                }
                pending => slot.transfer = pending,
            }

            if nonblock {
                return Err(IioError::WouldBlock {
                    device: self.device_id(),
                });
            }

            match deadline {
                None => self.done.wait(&mut state),
                Some(deadline) => {
                    if self.done.wait_until(&mut state, deadline).timed_out() {
                        let finished = state.slots.get(&id).is_some_and(|slot| {
                            matches!(slot.transfer, TransferState::Done(_))
                        });
                        if !finished {
                            return Err(IioError::Timeout {
                                op: "dequeue_block",
                                device: self.device_id(),
                                timeout: self.timeout.unwrap_or_default(),
                            });
                        }
                    }
                }
            }
        }
    }

    fn direction(&self) -> Direction {
        match self.layout.as_ref().and_then(|layout| layout.direction()) {
            Some(direction) => direction,
            None if self.device.is_tx() => Direction::Output,
            None => Direction::Input,
        }
    }

    fn next_job(&self) -> Option<(Arc<Slot>, usize, bool)> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.lifecycle == BufferState::Enabled && !state.cancelled {
                if let Some(slot) = state.queue.pop_front() {
                    let job = match state.slots.get_mut(&slot.id) {
                        Some(entry) => match entry.transfer {
                            TransferState::Queued { bytes_used, cyclic } => {
                                entry.transfer = TransferState::InFlight;
                                Some((bytes_used, cyclic))
                            }
                            _ => None,
                        },
                        None => None,
                    };
                    if let Some((bytes_used, cyclic)) = job {
                        state.in_flight = Some(slot.id);
                        return Some((slot, bytes_used, cyclic));
                    }
                    continue;
                }
            }
            self.work.wait(&mut state);
        }
    }

    fn run_worker(&self) {
        let direction = self.direction();
        while let Some((slot, bytes_used, cyclic)) = self.next_job() {
            let result = {
                let mut data = slot.data.lock();
                let data = &mut data[..bytes_used];
                let transfer = match direction {
                    Direction::Input => Transfer::Read(data),
                    Direction::Output => Transfer::Write { src: data, cyclic },
                };
                self.io.transfer(transfer)
            };

            if let Err(e) = &result {
                if e.is_cancelled() {
                    debug!(device = %self.device.id(), block = slot.id, "Transfer cancelled");
                } else {
                    warn!(device = %self.device.id(), block = slot.id, error = %e, "Transfer failed");
                }
            }

            let mut state = self.state.lock();
            state.in_flight = None;
            if let Some(entry) = state.slots.get_mut(&slot.id) {
                if matches!(entry.transfer, TransferState::InFlight) {
                    entry.transfer = TransferState::Done(result);
                }
            }
            drop(state);
            self.done.notify_all();
        }
        trace!(device = %self.device.id(), hw_index = self.hw_index, "Ring worker exiting");
    }
}

/// Cancels a buffer from another thread.
#[derive(Clone)]
pub struct BufferCanceller {
    shared: Arc<RingShared>,
}

impl BufferCanceller {
    /// Wake every waiter of the buffer with `Cancelled`.
    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

impl std::fmt::Debug for BufferCanceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCanceller")
            .field("device", &self.shared.device.id())
            .field("hw_index", &self.shared.hw_index)
            .finish()
    }
}

/// A hardware buffer of a device.
pub struct Buffer {
    shared: Arc<RingShared>,
    attrs: AttrMap,
    stream_pool_size: usize,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("device", &self.shared.device.id())
            .field("hw_index", &self.shared.hw_index)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Buffer {
    /// Create a buffer for the channels enabled in `mask`.
    ///
    /// The mask is copied; later changes to it do not affect the buffer. A
    /// mask with no channel enabled is accepted here and rejected by
    /// [`enable`](Self::enable).
    pub fn create(
        ctx: &Context,
        device: &Arc<Device>,
        mask: &ChannelsMask,
        hw_index: u32,
    ) -> Result<Self> {
        device.check_mask("create_buffer", mask)?;

        let layout = device.layout("create_buffer", mask).ok().map(Arc::new);
        let io = ctx.backend().open_ring(device, hw_index, mask)?;

        let scope = AttrScope::Buffer {
            device: device.id().to_string(),
            hw_index,
        };
        let attrs = device.buffer_attrs().rescoped(&scope);

        let shared = Arc::new(RingShared {
            device: device.clone(),
            hw_index,
            mask: mask.clone(),
            layout,
            io,
            timeout: ctx.timeout(),
            depth: ctx.config().ring_depth,
            state: Mutex::new(RingState {
                lifecycle: BufferState::Created,
                cancelled: false,
                cyclic_locked: false,
                shutdown: false,
                queue: VecDeque::new(),
                in_flight: None,
                slots: HashMap::new(),
                next_id: 0,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("iio-ring-{}-{hw_index}", device.id()))
                .spawn(move || shared.run_worker())
                .map_err(|e| IioError::Allocation {
                    op: "create_buffer",
                    reason: format!("failed to spawn ring worker: {e}"),
                })?
        };

        debug!(
            device = %device.id(),
            hw_index,
            channels = mask.enabled_count(),
            "Buffer created"
        );

        Ok(Self {
            shared,
            attrs,
            stream_pool_size: ctx.config().stream_pool_size,
            worker: Some(worker),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<RingShared> {
        &self.shared
    }

    /// Device the buffer belongs to.
    pub fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    /// Hardware buffer index on the device.
    pub fn hw_index(&self) -> u32 {
        self.shared.hw_index
    }

    /// The mask snapshot taken at creation.
    pub fn channels_mask(&self) -> &ChannelsMask {
        &self.shared.mask
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BufferState {
        self.shared.state.lock().lifecycle
    }

    /// True while the hardware ring is running.
    pub fn is_enabled(&self) -> bool {
        self.state() == BufferState::Enabled
    }

    /// True after [`cancel`](Self::cancel) until the next enable.
    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    /// Transfer direction of the buffer.
    pub fn direction(&self) -> Direction {
        self.shared.direction()
    }

    /// Bytes per sample.
    pub fn sample_size(&self) -> Result<usize> {
        match &self.shared.layout {
            Some(layout) => Ok(layout.sample_size()),
            None => self.shared.device.sample_size(&self.shared.mask),
        }
    }

    /// Blocks currently registered with the buffer.
    pub fn nb_blocks(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Blocking-call timeout, `None` waits forever.
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.timeout
    }

    /// Pool size used by [`Stream::with_default_pool`](crate::Stream::with_default_pool).
    pub fn default_stream_pool_size(&self) -> usize {
        self.stream_pool_size
    }

    /// Buffer attributes.
    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    /// Look up a buffer attribute by name.
    pub fn find_attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    /// Start the hardware ring.
    ///
    /// Fails when no channel is enabled, when the mask mixes input and
    /// output channels, or when another buffer has the same ring enabled.
    pub fn enable(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        match state.lifecycle {
            BufferState::Enabled => return Ok(()),
            BufferState::Destroyed => {
                return Err(IioError::InvalidState {
                    op: "enable_buffer",
                    state: state.lifecycle,
                })
            }
            BufferState::Created | BufferState::Disabled => {}
        }

        let layout = match &shared.layout {
            Some(layout) => layout.clone(),
            None => Arc::new(shared.device.layout("enable_buffer", &shared.mask)?),
        };
        let Some(direction) = layout.direction() else {
            return Err(IioError::InvalidConfiguration {
                op: "enable_buffer",
                device: shared.device_id(),
                reason: "channels mask mixes input and output channels".to_string(),
            });
        };

        shared.device.claim_ring(shared.hw_index)?;
        let params = RingParams {
            sample_size: layout.sample_size(),
            direction,
        };
        if let Err(e) = shared.io.set_enabled(true, params) {
            shared.device.release_ring(shared.hw_index);
            return Err(e);
        }

        state.lifecycle = BufferState::Enabled;
        state.cancelled = false;
        drop(state);
        shared.work.notify_all();

        debug!(
            device = %shared.device.id(),
            hw_index = shared.hw_index,
            sample_size = params.sample_size,
            direction = %direction,
            "Buffer enabled"
        );
        Ok(())
    }

    /// Stop the hardware ring.
    ///
    /// Every queued or in-flight block completes with `Cancelled`. Calling
    /// this on a buffer that is not enabled does nothing.
    pub fn disable(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        match state.lifecycle {
            BufferState::Enabled => {}
            BufferState::Created | BufferState::Disabled => return Ok(()),
            BufferState::Destroyed => {
                return Err(IioError::InvalidState {
                    op: "disable_buffer",
                    state: state.lifecycle,
                })
            }
        }

        state.lifecycle = BufferState::Disabled;
        state.cyclic_locked = false;
        let failed = state.fail_pending("disable_buffer", shared.device.id());
        if state.in_flight.is_some() {
            drop(state);
            shared.io.cancel();
            state = shared.state.lock();
            while state.in_flight.is_some() {
                shared.done.wait(&mut state);
            }
        }
        drop(state);
        shared.done.notify_all();

        let params = RingParams {
            sample_size: shared.layout.as_ref().map_or(0, |layout| layout.sample_size()),
            direction: shared.direction(),
        };
        let result = shared.io.set_enabled(false, params);
        shared.device.release_ring(shared.hw_index);

        debug!(
            device = %shared.device.id(),
            hw_index = shared.hw_index,
            failed,
            "Buffer disabled"
        );
        result
    }

    /// Wake all waiters with `Cancelled`.
    ///
    /// Enqueues fail with `Cancelled` until the buffer is disabled and
    /// enabled again.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Handle for cancelling this buffer from another thread.
    pub fn canceller(&self) -> BufferCanceller {
        BufferCanceller {
            shared: self.shared.clone(),
        }
    }

    /// Release the buffer.
    ///
    /// Returns `InvalidState` when the buffer is still enabled; the ring is
    /// then force-released all the same.
    pub fn destroy(self) -> Result<()> {
        let state = self.state();
        if state == BufferState::Enabled {
            error!(
                device = %self.shared.device.id(),
                hw_index = self.shared.hw_index,
                "Buffer destroyed while enabled"
            );
            if let Err(e) = self.disable() {
                error!(device = %self.shared.device.id(), error = %e, "Forced disable failed");
            }
            return Err(IioError::InvalidState {
                op: "destroy_buffer",
                state,
            });
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.is_enabled() {
            error!(
                device = %self.shared.device.id(),
                hw_index = self.shared.hw_index,
                "Buffer dropped while enabled, disabling"
            );
            if let Err(e) = self.disable() {
                error!(device = %self.shared.device.id(), error = %e, "Forced disable failed");
            }
        }

        {
            let mut state = self.shared.state.lock();
            state.lifecycle = BufferState::Destroyed;
            state.shutdown = true;
        }
        self.shared.work.notify_all();
        self.shared.done.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(device = %self.shared.device.id(), "Ring worker panicked");
            }
        }
        debug!(
            device = %self.shared.device.id(),
            hw_index = self.shared.hw_index,
            "Buffer destroyed"
        );
    }
}

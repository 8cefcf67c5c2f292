//! In-process simulated hardware.
//!
//! [`SimBackend`] opens rings that complete transfers immediately: RX blocks
//! are filled by a per-device sample source, TX blocks are recorded. Tests
//! can stall a device (transfers block until resumed or cancelled), inject
//! transfer failures and watch how many rings are open or enabled.
//!
//! [`MemoryAttrStore`] keeps attribute values in memory and emulates the
//! `direct_reg_access` debug attribute as a small register file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use super::{RingBackend, RingIo, RingParams, Transfer};
use crate::attr::{AttrIo, AttrScope};
use crate::device::Device;
use crate::error::{IioError, Result};
use crate::mask::ChannelsMask;

/// Fills an RX block. Receives the per-device transfer sequence number.
pub type RxSource = Arc<dyn Fn(u64, &mut [u8]) + Send + Sync>;

/// A block received by a simulated TX ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// Block contents as handed to the ring.
    pub data: Bytes,
    /// Whether the block was submitted for cyclic replay.
    pub cyclic: bool,
}

type RingKey = (String, u32);

#[derive(Default)]
struct SimState {
    enabled: BTreeMap<RingKey, RingParams>,
    cancelled: HashSet<RingKey>,
    stalled: HashSet<String>,
    fail_next: HashMap<String, String>,
    fail_disable: HashMap<String, String>,
    fail_open: Option<String>,
    sequence: HashMap<String, u64>,
    sources: HashMap<String, RxSource>,
    tx_log: HashMap<String, Vec<TxRecord>>,
}

#[derive(Default)]
struct SimShared {
    open_rings: AtomicUsize,
    state: Mutex<SimState>,
    wake: Condvar,
}

/// Simulated transport. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SimBackend {
    shared: Arc<SimShared>,
}

impl fmt::Debug for SimBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBackend")
            .field("open_rings", &self.open_rings())
            .field("enabled_rings", &self.enabled_rings())
            .finish()
    }
}

impl SimBackend {
    /// Backend with no open rings and default sample sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rings currently open (created buffers not yet dropped).
    pub fn open_rings(&self) -> usize {
        self.shared.open_rings.load(Ordering::SeqCst)
    }

    /// Rings currently started.
    pub fn enabled_rings(&self) -> usize {
        self.shared.state.lock().enabled.len()
    }

    /// Whether ring `hw_index` of `device` is started.
    pub fn is_enabled(&self, device: &str, hw_index: u32) -> bool {
        self.shared
            .state
            .lock()
            .enabled
            .contains_key(&(device.to_string(), hw_index))
    }

    /// Replace the sample generator of `device`.
    ///
    /// The default source fills every byte of a block with the low byte of
    /// the transfer sequence number (1 for the first transfer).
    pub fn set_rx_source(
        &self,
        device: &str,
        source: impl Fn(u64, &mut [u8]) + Send + Sync + 'static,
    ) {
        self.shared
            .state
            .lock()
            .sources
            .insert(device.to_string(), Arc::new(source));
    }

    /// Block every transfer of `device` until [`resume`](Self::resume).
    pub fn stall(&self, device: &str) {
        self.shared.state.lock().stalled.insert(device.to_string());
    }

    /// Let stalled transfers of `device` proceed.
    pub fn resume(&self, device: &str) {
        self.shared.state.lock().stalled.remove(device);
        self.shared.wake.notify_all();
    }

    /// Make the next transfer of `device` fail with a backend error.
    pub fn fail_next_transfer(&self, device: &str, message: impl Into<String>) {
        self.shared
            .state
            .lock()
            .fail_next
            .insert(device.to_string(), message.into());
    }

    /// Make the next attempt to stop a ring of `device` fail.
    ///
    /// The ring keeps running until it is dropped.
    pub fn fail_next_disable(&self, device: &str, message: impl Into<String>) {
        self.shared
            .state
            .lock()
            .fail_disable
            .insert(device.to_string(), message.into());
    }

    /// Make every following `open_ring` fail (`None` to stop).
    pub fn fail_open(&self, message: Option<String>) {
        self.shared.state.lock().fail_open = message;
    }

    /// Blocks received so far by TX rings of `device`.
    pub fn tx_records(&self, device: &str) -> Vec<TxRecord> {
        self.shared
            .state
            .lock()
            .tx_log
            .get(device)
            .cloned()
            .unwrap_or_default()
    }
}

impl RingBackend for SimBackend {
    fn open_ring(
        &self,
        device: &Device,
        hw_index: u32,
        mask: &ChannelsMask,
    ) -> Result<Arc<dyn RingIo>> {
        if let Some(reason) = self.shared.state.lock().fail_open.clone() {
            return Err(IioError::Allocation {
                op: "open_ring",
                reason,
            });
        }

        self.shared.open_rings.fetch_add(1, Ordering::SeqCst);
        debug!(
            device = %device.id(),
            hw_index,
            channels = mask.enabled_count(),
            "Simulated ring opened"
        );
        Ok(Arc::new(SimRing {
            key: (device.id().to_string(), hw_index),
            shared: self.shared.clone(),
        }))
    }
}

struct SimRing {
    key: RingKey,
    shared: Arc<SimShared>,
}

impl SimRing {
    fn device(&self) -> &str {
        &self.key.0
    }
}

impl RingIo for SimRing {
    fn set_enabled(&self, enabled: bool, params: RingParams) -> Result<()> {
        let mut state = self.shared.state.lock();
        if enabled {
            state.cancelled.remove(&self.key);
            state.enabled.insert(self.key.clone(), params);
        } else if let Some(message) = state.fail_disable.remove(self.device()) {
            return Err(IioError::Backend {
                device: self.device().to_string(),
                message,
            });
        } else {
            state.enabled.remove(&self.key);
        }
        trace!(device = %self.device(), hw_index = self.key.1, enabled, "Simulated ring toggled");
        self.shared.wake.notify_all();
        Ok(())
    }

    fn transfer(&self, transfer: Transfer<'_>) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if state.cancelled.contains(&self.key) {
                return Err(IioError::Cancelled {
                    op: "transfer",
                    device: self.device().to_string(),
                });
            }
            if !state.enabled.contains_key(&self.key) {
                return Err(IioError::Backend {
                    device: self.device().to_string(),
                    message: "ring is not enabled".to_string(),
                });
            }
            if !state.stalled.contains(self.device()) {
                break;
            }
            self.shared.wake.wait(&mut state);
        }

        if let Some(message) = state.fail_next.remove(self.device()) {
            return Err(IioError::Backend {
                device: self.device().to_string(),
                message,
            });
        }

        let sequence = state.sequence.entry(self.device().to_string()).or_insert(0);
        *sequence += 1;
        let sequence = *sequence;

        match transfer {
            Transfer::Read(dst) => {
                let source = state.sources.get(self.device()).cloned();
                drop(state);
                match source {
                    Some(source) => source(sequence, dst),
                    None => dst.fill(sequence as u8),
                }
            }
            Transfer::Write { src, cyclic } => {
                state
                    .tx_log
                    .entry(self.device().to_string())
                    .or_default()
                    .push(TxRecord {
                        data: Bytes::copy_from_slice(src),
                        cyclic,
                    });
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        self.shared.state.lock().cancelled.insert(self.key.clone());
        self.shared.wake.notify_all();
    }
}

impl Drop for SimRing {
    fn drop(&mut self) {
        self.shared.state.lock().enabled.remove(&self.key);
        self.shared.open_rings.fetch_sub(1, Ordering::SeqCst);
    }
}

const REG_ACCESS_ATTR: &str = "direct_reg_access";

#[derive(Debug, Default)]
struct RegisterFile {
    selected: HashMap<String, u32>,
    values: HashMap<(String, u32), u32>,
}

/// Attribute values held in memory.
#[derive(Debug, Default)]
pub struct MemoryAttrStore {
    values: RwLock<HashMap<(AttrScope, String), String>>,
    registers: Mutex<RegisterFile>,
}

fn parse_reg(attr: &str, text: &str) -> Result<u32> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| IioError::attribute(attr, format!("'{text}': {e}")))
}

impl MemoryAttrStore {
    /// Store with no values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset a value.
    pub fn set(&self, scope: &AttrScope, name: &str, value: &str) {
        self.values
            .write()
            .insert((scope.clone(), name.to_string()), value.to_string());
    }

    /// Stored value, if any.
    pub fn get(&self, scope: &AttrScope, name: &str) -> Option<String> {
        self.values
            .read()
            .get(&(scope.clone(), name.to_string()))
            .cloned()
    }

    /// Current value of an emulated register.
    pub fn register(&self, scope: &AttrScope, address: u32) -> Option<u32> {
        let AttrScope::Debug { device } = scope else {
            return None;
        };
        self.registers
            .lock()
            .values
            .get(&(device.clone(), address))
            .copied()
    }
}

impl AttrIo for MemoryAttrStore {
    fn read(&self, scope: &AttrScope, name: &str) -> Result<String> {
        if let (AttrScope::Debug { device }, REG_ACCESS_ATTR) = (scope, name) {
            let registers = self.registers.lock();
            let address = registers.selected.get(device).copied().unwrap_or(0);
            let value = registers
                .values
                .get(&(device.clone(), address))
                .copied()
                .unwrap_or(0);
            return Ok(format!("0x{value:x}"));
        }

        self.get(scope, name)
            .ok_or_else(|| IioError::attribute(name, "no value"))
    }

    fn write(&self, scope: &AttrScope, name: &str, value: &str) -> Result<()> {
        if let (AttrScope::Debug { device }, REG_ACCESS_ATTR) = (scope, name) {
            let mut words = value.split_whitespace();
            let address = parse_reg(name, words.next().unwrap_or_default())?;
            let mut registers = self.registers.lock();
            match words.next() {
                Some(word) => {
                    let reg_value = parse_reg(name, word)?;
                    registers.values.insert((device.clone(), address), reg_value);
                }
                None => {
                    registers.selected.insert(device.clone(), address);
                }
            }
            return Ok(());
        }

        self.set(scope, name, value);
        Ok(())
    }
}

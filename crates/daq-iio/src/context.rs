//! I/O contexts: the devices of one transport and their shared settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backend::RingBackend;
use crate::buffer::Buffer;
use crate::config::ContextConfig;
use crate::device::Device;
use crate::error::Result;
use crate::mask::ChannelsMask;

/// Devices reachable through one transport.
pub struct Context {
    backend: Arc<dyn RingBackend>,
    devices: Vec<Arc<Device>>,
    config: ContextConfig,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("devices", &self.devices.iter().map(|d| d.id()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context with the default configuration.
    pub fn new(backend: Arc<dyn RingBackend>, devices: Vec<Arc<Device>>) -> Self {
        Self::with_config(backend, devices, ContextConfig::default())
    }

    /// Create a context with an explicit configuration.
    pub fn with_config(
        backend: Arc<dyn RingBackend>,
        devices: Vec<Arc<Device>>,
        config: ContextConfig,
    ) -> Self {
        debug!(devices = devices.len(), timeout_ms = config.timeout_ms, "Context created");
        Self {
            backend,
            devices,
            config,
        }
    }

    pub(crate) fn backend(&self) -> &dyn RingBackend {
        self.backend.as_ref()
    }

    /// Current configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Timeout applied to buffers created from now on.
    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    /// Set the timeout in milliseconds (0 = wait forever).
    ///
    /// Buffers already created keep the timeout they were created with.
    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.config.timeout_ms = timeout_ms;
    }

    /// All devices, in discovery order.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Number of devices.
    pub fn devices_count(&self) -> usize {
        self.devices.len()
    }

    /// Device at `position`.
    pub fn device(&self, position: usize) -> Option<&Arc<Device>> {
        self.devices.get(position)
    }

    /// Find a device by id, name or label.
    pub fn find_device(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.iter().find(|dev| {
            dev.id() == name || dev.name() == Some(name) || dev.label() == Some(name)
        })
    }

    /// Create a buffer on ring `hw_index` of `device`.
    pub fn create_buffer(
        &self,
        device: &Arc<Device>,
        mask: &ChannelsMask,
        hw_index: u32,
    ) -> Result<Buffer> {
        Buffer::create(self, device, mask, hw_index)
    }
}

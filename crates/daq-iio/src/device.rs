//! Devices and their sample layout.
//!
//! A [`Device`] is built once from discovered metadata ([`DeviceBuilder`])
//! and shared read-only behind an `Arc`. Besides its channel list and
//! attribute maps it owns the table of claimed hardware rings, so that only
//! one buffer per `(device, hw_index)` can be enabled at a time.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::attr::{Attr, AttrIo, AttrMap, AttrScope};
use crate::channel::{Channel, ChannelBuilder, Direction};
use crate::context::Context;
use crate::error::{IioError, Result};
use crate::mask::ChannelsMask;

const REG_ACCESS_ATTR: &str = "direct_reg_access";
const TRIGGER_ATTR: &str = "trigger/current_trigger";

/// Whether a device streams data or only triggers other devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Regular device, may have channels and buffers.
    Device,
    /// Trigger: named, channel-less, id starting with `trigger`.
    Trigger,
}

/// Position of one enabled channel within a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LayoutEntry {
    pub(crate) index: u32,
    /// Position of the channel in the device channel list.
    pub(crate) position: usize,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

/// Byte layout of one sample for a given mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SampleLayout {
    entries: Vec<LayoutEntry>,
    sample_size: usize,
    direction: Option<Direction>,
}

impl SampleLayout {
    pub(crate) fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Transfer direction, `None` when the mask mixes inputs and outputs.
    pub(crate) fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub(crate) fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub(crate) fn entry(&self, index: u32) -> Option<&LayoutEntry> {
        self.entries.iter().find(|e| e.index == index)
    }
}

/// Describes a device during discovery.
pub struct DeviceBuilder {
    id: String,
    name: Option<String>,
    label: Option<String>,
    io: Arc<dyn AttrIo>,
    channels: Vec<ChannelBuilder>,
    attrs: Vec<String>,
    debug_attrs: Vec<String>,
    buffer_attrs: Vec<String>,
}

impl DeviceBuilder {
    /// Set the device name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the device label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a channel.
    pub fn channel(mut self, channel: ChannelBuilder) -> Self {
        self.channels.push(channel);
        self
    }

    /// Declare a device attribute.
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attrs.push(name.into());
        self
    }

    /// Declare a debug attribute.
    pub fn debug_attr(mut self, name: impl Into<String>) -> Self {
        self.debug_attrs.push(name.into());
        self
    }

    /// Declare an attribute of the device's hardware buffers.
    pub fn buffer_attr(mut self, name: impl Into<String>) -> Self {
        self.buffer_attrs.push(name.into());
        self
    }

    /// Validate the description and freeze it.
    ///
    /// Channels are ordered by scan index; channels without an index go last
    /// in declaration order.
    pub fn build(mut self) -> Result<Arc<Device>> {
        let count = self.channels.len();
        for chn in &self.channels {
            let Some(index) = chn.index() else { continue };
            if index as usize >= count {
                return Err(IioError::InvalidConfiguration {
                    op: "build_device",
                    device: self.id.clone(),
                    reason: format!(
                        "channel '{}' has scan index {index} but the device has {count} channels",
                        chn.id()
                    ),
                });
            }
            chn.format().validate().map_err(|e| IioError::InvalidConfiguration {
                op: "build_device",
                device: self.id.clone(),
                reason: format!("channel '{}': {e}", chn.id()),
            })?;
        }

        self.channels
            .sort_by_key(|chn| chn.index().map_or(u64::MAX, u64::from));

        let io = &self.io;
        let device_id = self.id.clone();
        let channels: Vec<Channel> = self
            .channels
            .into_iter()
            .map(|builder| {
                let scope = AttrScope::Channel {
                    device: device_id.clone(),
                    channel: builder.id().to_string(),
                    output: builder.is_output(),
                };
                builder.finish(&device_id, |name, filename| {
                    let attr = Attr::new(name, scope.clone(), io.clone());
                    match filename {
                        Some(filename) => attr.with_filename(filename),
                        None => attr,
                    }
                })
            })
            .collect();

        let map = |names: Vec<String>, scope: AttrScope| {
            let mut map = AttrMap::new();
            for name in names {
                map.insert(Attr::new(name, scope.clone(), io.clone()));
            }
            map
        };
        let attrs = map(
            self.attrs,
            AttrScope::Device {
                device: device_id.clone(),
            },
        );
        let debug_attrs = map(
            self.debug_attrs,
            AttrScope::Debug {
                device: device_id.clone(),
            },
        );
        let buffer_attrs = map(
            self.buffer_attrs,
            AttrScope::Buffer {
                device: device_id.clone(),
                hw_index: 0,
            },
        );

        let trigger_attr = Attr::new(
            TRIGGER_ATTR,
            AttrScope::Device {
                device: device_id.clone(),
            },
            io.clone(),
        );

        let is_trigger =
            channels.is_empty() && self.name.is_some() && device_id.starts_with("trigger");
        let kind = if is_trigger {
            DeviceKind::Trigger
        } else {
            DeviceKind::Device
        };

        debug!(
            device = %device_id,
            channels = channels.len(),
            kind = ?kind,
            "Device described"
        );

        Ok(Arc::new(Device {
            id: device_id,
            name: self.name,
            label: self.label,
            kind,
            channels,
            attrs,
            debug_attrs,
            buffer_attrs,
            trigger_attr,
            claimed_rings: Mutex::new(BTreeSet::new()),
        }))
    }
}

/// A device of an I/O context.
#[derive(Debug)]
pub struct Device {
    id: String,
    name: Option<String>,
    label: Option<String>,
    kind: DeviceKind,
    channels: Vec<Channel>,
    attrs: AttrMap,
    debug_attrs: AttrMap,
    buffer_attrs: AttrMap,
    trigger_attr: Attr,
    claimed_rings: Mutex<BTreeSet<u32>>,
}

impl Device {
    /// Start describing a device whose attributes go through `io`.
    pub fn builder(id: impl Into<String>, io: Arc<dyn AttrIo>) -> DeviceBuilder {
        DeviceBuilder {
            id: id.into(),
            name: None,
            label: None,
            io,
            channels: Vec::new(),
            attrs: Vec::new(),
            debug_attrs: Vec::new(),
            buffer_attrs: Vec::new(),
        }
    }

    /// Device id, unique within the context.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device name, if the driver reports one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Device label, if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether the device is a trigger.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Shorthand for `kind() == DeviceKind::Trigger`.
    pub fn is_trigger(&self) -> bool {
        self.kind == DeviceKind::Trigger
    }

    /// Channels in scan index order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of channels.
    pub fn channels_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel at `position` in the channel list.
    pub fn channel(&self, position: usize) -> Option<&Channel> {
        self.channels.get(position)
    }

    /// Find a channel by id or name in the given direction.
    pub fn find_channel(&self, name: &str, output: bool) -> Option<&Channel> {
        self.channels.iter().find(|chn| {
            chn.is_output() == output && (chn.id() == name || chn.name() == Some(name))
        })
    }

    /// Whether buffers of this device transmit (any output scan element).
    pub fn is_tx(&self) -> bool {
        self.channels
            .iter()
            .any(|chn| chn.is_output() && chn.is_scan_element())
    }

    /// Device attributes.
    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    /// Debug attributes.
    pub fn debug_attrs(&self) -> &AttrMap {
        &self.debug_attrs
    }

    /// Attribute template of this device's hardware buffers.
    pub fn buffer_attrs(&self) -> &AttrMap {
        &self.buffer_attrs
    }

    /// Look up a device attribute by name.
    pub fn find_attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    /// Look up a debug attribute by name.
    pub fn find_debug_attr(&self, name: &str) -> Option<&Attr> {
        self.debug_attrs.get(name)
    }

    /// Read a hardware register through the debug interface.
    pub fn reg_read(&self, address: u32) -> Result<u32> {
        let attr = self.debug_attrs.require(REG_ACCESS_ATTR)?;
        attr.write(&format!("0x{address:x}"))?;
        let value = attr.read_i64()?;
        u32::try_from(value)
            .map_err(|_| IioError::attribute(REG_ACCESS_ATTR, format!("{value} is not a register value")))
    }

    /// Write a hardware register through the debug interface.
    pub fn reg_write(&self, address: u32, value: u32) -> Result<()> {
        self.debug_attrs
            .require(REG_ACCESS_ATTR)?
            .write(&format!("0x{address:x} 0x{value:x}"))
    }

    /// Bind `trigger` to this device, or unbind with `None`.
    ///
    /// The trigger is recorded by name in the device's
    /// `trigger/current_trigger` attribute.
    pub fn set_trigger(&self, trigger: Option<&Device>) -> Result<()> {
        let value = match trigger {
            Some(trig) if !trig.is_trigger() => {
                return Err(IioError::InvalidConfiguration {
                    op: "set_trigger",
                    device: self.id.clone(),
                    reason: format!("device '{}' is not a trigger", trig.id),
                })
            }
            Some(trig) => trig.name.as_deref().unwrap_or_default(),
            None => "",
        };
        self.trigger_attr.write(value)?;
        debug!(device = %self.id, trigger = value, "Trigger set");
        Ok(())
    }

    /// Name of the bound trigger, `None` when unbound.
    pub fn trigger_name(&self) -> Result<Option<String>> {
        let value = self.trigger_attr.read()?;
        let name = value.trim_end_matches(['\0', '\n']);
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    /// The bound trigger, looked up by name among the devices of `ctx`.
    pub fn trigger(&self, ctx: &Context) -> Result<Option<Arc<Device>>> {
        let Some(name) = self.trigger_name()? else {
            return Ok(None);
        };
        ctx.devices()
            .iter()
            .find(|dev| dev.name() == Some(name.as_str()))
            .cloned()
            .map(Some)
            .ok_or_else(|| IioError::InvalidConfiguration {
                op: "get_trigger",
                device: self.id.clone(),
                reason: format!("no device named '{name}'"),
            })
    }

    pub(crate) fn check_mask(&self, op: &'static str, mask: &ChannelsMask) -> Result<()> {
        if mask.size() != self.channels.len() {
            return Err(IioError::DeviceMismatch {
                op,
                device: self.id.clone(),
                mask_size: mask.size(),
                channel_count: self.channels.len(),
            });
        }
        Ok(())
    }

    /// Sample layout of the channels enabled in `mask`.
    ///
    /// Channels sharing a scan index share one slot.
    pub(crate) fn layout(&self, op: &'static str, mask: &ChannelsMask) -> Result<SampleLayout> {
        self.check_mask(op, mask)?;

        let mut entries: Vec<LayoutEntry> = Vec::new();
        let mut offset = 0;
        for (position, chn) in self.channels.iter().enumerate() {
            let Some(index) = chn.index() else { continue };
            if !mask.test_bit(index as usize) || entries.last().is_some_and(|e| e.index == index) {
                continue;
            }
            let len = chn.data_format().sample_bytes();
            entries.push(LayoutEntry {
                index,
                position,
                offset,
                len,
            });
            offset += len;
        }

        if entries.is_empty() {
            return Err(IioError::InvalidConfiguration {
                op,
                device: self.id.clone(),
                reason: "no channel enabled".to_string(),
            });
        }

        let has_view = |index: u32, output: bool| {
            self.channels
                .iter()
                .any(|chn| chn.index() == Some(index) && chn.is_output() == output)
        };
        let direction = if entries.iter().all(|e| has_view(e.index, true)) {
            Some(Direction::Output)
        } else if entries.iter().all(|e| has_view(e.index, false)) {
            Some(Direction::Input)
        } else {
            None
        };

        Ok(SampleLayout {
            entries,
            sample_size: offset,
            direction,
        })
    }

    /// Bytes per sample for the channels enabled in `mask`.
    pub fn sample_size(&self, mask: &ChannelsMask) -> Result<usize> {
        Ok(self.layout("sample_size", mask)?.sample_size)
    }

    /// Create an empty mask sized to this device.
    pub fn create_mask(&self) -> Result<ChannelsMask> {
        ChannelsMask::for_device(self)
    }

    /// Whether a buffer currently has ring `hw_index` enabled.
    pub fn is_ring_claimed(&self, hw_index: u32) -> bool {
        self.claimed_rings.lock().contains(&hw_index)
    }

    pub(crate) fn claim_ring(&self, hw_index: u32) -> Result<()> {
        if !self.claimed_rings.lock().insert(hw_index) {
            return Err(IioError::HardwareBusy {
                device: self.id.clone(),
                hw_index,
                reason: "already enabled by another buffer".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn release_ring(&self, hw_index: u32) {
        self.claimed_rings.lock().remove(&hw_index);
    }
}

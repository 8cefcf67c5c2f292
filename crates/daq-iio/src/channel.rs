//! Channels: one data stream of a device.
//!
//! Channels are described once through [`ChannelBuilder`] and are immutable
//! afterwards. A channel with a scan index can take part in buffered I/O:
//! its bit in a [`ChannelsMask`] is its index, and its samples are
//! interleaved with those of the other enabled channels inside a
//! [`Block`].

use std::fmt;

use crate::attr::{Attr, AttrMap};
use crate::block::Block;
use crate::device::LayoutEntry;
use crate::error::{IioError, Result};
use crate::format::{host_value, DataFormat};
use crate::mask::ChannelsMask;

/// Data direction of a channel or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host (RX).
    Input,
    /// Host to device (TX).
    Output,
}

impl Direction {
    /// True for [`Direction::Output`].
    pub fn is_output(self) -> bool {
        self == Self::Output
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Physical quantity measured or generated by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Voltage.
    Voltage,
    /// Current.
    Current,
    /// Power.
    Power,
    /// Acceleration.
    Accel,
    /// Angular velocity.
    AnglVel,
    /// Magnetic field.
    Magn,
    /// Illuminance.
    Light,
    /// Light intensity.
    Intensity,
    /// Proximity.
    Proximity,
    /// Temperature.
    Temp,
    /// Inclination.
    Incli,
    /// Rotation.
    Rot,
    /// Angle.
    Angl,
    /// Sample timestamp.
    Timestamp,
    /// Capacitance.
    Capacitance,
    /// Alternating voltage (DDS, PLL outputs).
    AltVoltage,
    /// Correlated colour temperature.
    Cct,
    /// Pressure.
    Pressure,
    /// Relative humidity.
    HumidityRelative,
    /// Activity classification.
    Activity,
    /// Step counter.
    Steps,
    /// Energy.
    Energy,
    /// Distance.
    Distance,
    /// Velocity.
    Velocity,
    /// Gas concentration.
    Concentration,
    /// Resistance.
    Resistance,
    /// pH.
    Ph,
    /// UV index.
    UvIndex,
    /// Gravity.
    Gravity,
    /// Relative position.
    PositionRelative,
    /// Phase.
    Phase,
    /// Particulate mass concentration.
    MassConcentration,
    /// Counter.
    Count,
    /// Index (e.g. encoder index pulse).
    Index,
    /// Id matched no known type.
    Unknown,
}

const CHANNEL_TYPE_NAMES: &[(&str, ChannelType)] = &[
    ("voltage", ChannelType::Voltage),
    ("current", ChannelType::Current),
    ("power", ChannelType::Power),
    ("accel", ChannelType::Accel),
    ("anglvel", ChannelType::AnglVel),
    ("magn", ChannelType::Magn),
    ("illuminance", ChannelType::Light),
    ("intensity", ChannelType::Intensity),
    ("proximity", ChannelType::Proximity),
    ("temp", ChannelType::Temp),
    ("incli", ChannelType::Incli),
    ("rot", ChannelType::Rot),
    ("angl", ChannelType::Angl),
    ("timestamp", ChannelType::Timestamp),
    ("capacitance", ChannelType::Capacitance),
    ("altvoltage", ChannelType::AltVoltage),
    ("cct", ChannelType::Cct),
    ("pressure", ChannelType::Pressure),
    ("humidityrelative", ChannelType::HumidityRelative),
    ("activity", ChannelType::Activity),
    ("steps", ChannelType::Steps),
    ("energy", ChannelType::Energy),
    ("distance", ChannelType::Distance),
    ("velocity", ChannelType::Velocity),
    ("concentration", ChannelType::Concentration),
    ("resistance", ChannelType::Resistance),
    ("ph", ChannelType::Ph),
    ("uvindex", ChannelType::UvIndex),
    ("gravity", ChannelType::Gravity),
    ("positionrelative", ChannelType::PositionRelative),
    ("phase", ChannelType::Phase),
    ("massconcentration", ChannelType::MassConcentration),
    ("count", ChannelType::Count),
    ("index", ChannelType::Index),
];

impl ChannelType {
    /// Derive the type from a channel id such as `voltage0` or `accel_x`.
    ///
    /// The type name must be followed by the end of the id, a digit or `_`.
    pub fn from_id(id: &str) -> Self {
        CHANNEL_TYPE_NAMES
            .iter()
            .find(|(name, _)| {
                id.strip_prefix(name).is_some_and(|rest| {
                    rest.chars()
                        .next()
                        .map_or(true, |c| c == '_' || c.is_ascii_digit())
                })
            })
            .map_or(Self::Unknown, |&(_, ty)| ty)
    }
}

/// Channel modifier (axis, colour, I/Q component, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// No modifier.
    None,
    /// X axis.
    X,
    /// Y axis.
    Y,
    /// Z axis.
    Z,
    /// X and Y axes combined.
    XAndY,
    /// X and Z axes combined.
    XAndZ,
    /// Y and Z axes combined.
    YAndZ,
    /// All three axes combined.
    XAndYAndZ,
    /// Either X or Y axis.
    XOrY,
    /// Either X or Z axis.
    XOrZ,
    /// Either Y or Z axis.
    YOrZ,
    /// Any axis.
    XOrYOrZ,
    /// Visible and infrared light.
    LightBoth,
    /// Infrared light.
    LightIr,
    /// Root of the sum of squares of X and Y.
    RootSumSquaredXY,
    /// Sum of squares of X, Y and Z.
    SumSquaredXYZ,
    /// Unfiltered light.
    LightClear,
    /// Red light.
    LightRed,
    /// Green light.
    LightGreen,
    /// Blue light.
    LightBlue,
    /// Quaternion.
    Quaternion,
    /// Temperature.
    Temp,
    /// Ambient reading.
    Ambient,
    /// Object reading.
    Object,
    /// Magnetic north.
    NorthMagn,
    /// True north.
    NorthTrue,
    /// Tilt-compensated magnetic north.
    NorthMagnTiltComp,
    /// Tilt-compensated true north.
    NorthTrueTiltComp,
    /// Running activity.
    Running,
    /// Jogging activity.
    Jogging,
    /// Walking activity.
    Walking,
    /// No activity.
    Still,
    /// Root of the sum of squares of X, Y and Z.
    RootSumSquaredXYZ,
    /// In-phase component.
    I,
    /// Quadrature component.
    Q,
    /// Carbon dioxide.
    Co2,
    /// Volatile organic compounds.
    Voc,
    /// Ultraviolet light.
    LightUv,
    /// Deep ultraviolet light.
    LightDuv,
    /// PM1 particulates.
    Pm1,
    /// PM2.5 particulates.
    Pm2p5,
    /// PM4 particulates.
    Pm4,
    /// PM10 particulates.
    Pm10,
    /// Ethanol.
    Ethanol,
    /// Hydrogen.
    H2,
    /// Oxygen.
    O2,
    /// Linear X.
    LinearX,
    /// Linear Y.
    LinearY,
    /// Linear Z.
    LinearZ,
    /// Pitch.
    Pitch,
    /// Yaw.
    Yaw,
    /// Roll.
    Roll,
}

const MODIFIER_NAMES: &[(&str, Modifier)] = &[
    ("x", Modifier::X),
    ("y", Modifier::Y),
    ("z", Modifier::Z),
    ("x&y", Modifier::XAndY),
    ("x&z", Modifier::XAndZ),
    ("y&z", Modifier::YAndZ),
    ("x&y&z", Modifier::XAndYAndZ),
    ("x|y", Modifier::XOrY),
    ("x|z", Modifier::XOrZ),
    ("y|z", Modifier::YOrZ),
    ("x|y|z", Modifier::XOrYOrZ),
    ("both", Modifier::LightBoth),
    ("ir", Modifier::LightIr),
    ("sqrt(x^2+y^2)", Modifier::RootSumSquaredXY),
    ("x^2+y^2+z^2", Modifier::SumSquaredXYZ),
    ("clear", Modifier::LightClear),
    ("red", Modifier::LightRed),
    ("green", Modifier::LightGreen),
    ("blue", Modifier::LightBlue),
    ("quaternion", Modifier::Quaternion),
    ("temp", Modifier::Temp),
    ("ambient", Modifier::Ambient),
    ("object", Modifier::Object),
    ("from_north_magnetic", Modifier::NorthMagn),
    ("from_north_true", Modifier::NorthTrue),
    ("from_north_magnetic_tilt_comp", Modifier::NorthMagnTiltComp),
    ("from_north_true_tilt_comp", Modifier::NorthTrueTiltComp),
    ("running", Modifier::Running),
    ("jogging", Modifier::Jogging),
    ("walking", Modifier::Walking),
    ("still", Modifier::Still),
    ("sqrt(x^2+y^2+z^2)", Modifier::RootSumSquaredXYZ),
    ("i", Modifier::I),
    ("q", Modifier::Q),
    ("co2", Modifier::Co2),
    ("voc", Modifier::Voc),
    ("uv", Modifier::LightUv),
    ("duv", Modifier::LightDuv),
    ("pm1", Modifier::Pm1),
    ("pm2p5", Modifier::Pm2p5),
    ("pm4", Modifier::Pm4),
    ("pm10", Modifier::Pm10),
    ("ethanol", Modifier::Ethanol),
    ("h2", Modifier::H2),
    ("o2", Modifier::O2),
    ("linear_x", Modifier::LinearX),
    ("linear_y", Modifier::LinearY),
    ("linear_z", Modifier::LinearZ),
    ("pitch", Modifier::Pitch),
    ("yaw", Modifier::Yaw),
    ("roll", Modifier::Roll),
];

impl Modifier {
    /// Derive the modifier from the text after the first `_` of a channel id.
    ///
    /// The longest modifier name prefixing that text wins.
    pub fn from_id(id: &str) -> Self {
        let Some((_, rest)) = id.split_once('_') else {
            return Self::None;
        };
        MODIFIER_NAMES
            .iter()
            .filter(|(name, _)| rest.starts_with(name))
            .max_by_key(|(name, _)| name.len())
            .map_or(Self::None, |&(_, modifier)| modifier)
    }
}

/// Describes a channel during device discovery.
#[derive(Debug, Clone)]
pub struct ChannelBuilder {
    id: String,
    name: Option<String>,
    label: Option<String>,
    direction: Direction,
    index: Option<u32>,
    format: DataFormat,
    attrs: Vec<(String, Option<String>)>,
}

impl ChannelBuilder {
    /// Set the channel name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the channel label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Mark the channel as an output (host to device).
    pub fn output(mut self) -> Self {
        self.direction = Direction::Output;
        self
    }

    /// Make the channel a scan element with the given index and format.
    pub fn scan_element(mut self, index: u32, format: DataFormat) -> Self {
        self.index = Some(index);
        self.format = format;
        self
    }

    /// Declare a channel attribute.
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attrs.push((name.into(), None));
        self
    }

    /// Declare a channel attribute backed by a differently named file.
    pub fn attr_with_filename(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        self.attrs.push((name.into(), Some(filename.into())));
        self
    }

    pub(crate) fn index(&self) -> Option<u32> {
        self.index
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn format(&self) -> &DataFormat {
        &self.format
    }

    pub(crate) fn is_output(&self) -> bool {
        self.direction.is_output()
    }

    /// Finish the channel once the owning device is known.
    pub(crate) fn finish(
        self,
        device_id: &str,
        make_attr: impl Fn(&str, Option<String>) -> Attr,
    ) -> Channel {
        let mut attrs = AttrMap::new();
        for (name, filename) in self.attrs {
            attrs.insert(make_attr(&name, filename));
        }

        Channel {
            chan_type: ChannelType::from_id(&self.id),
            modifier: Modifier::from_id(&self.id),
            id: self.id,
            name: self.name,
            label: self.label,
            direction: self.direction,
            index: self.index,
            format: self.format,
            attrs,
            device_id: device_id.to_string(),
        }
    }
}

/// A channel of a device.
#[derive(Debug, Clone)]
pub struct Channel {
    id: String,
    name: Option<String>,
    label: Option<String>,
    direction: Direction,
    index: Option<u32>,
    format: DataFormat,
    chan_type: ChannelType,
    modifier: Modifier,
    attrs: AttrMap,
    device_id: String,
}

impl Channel {
    /// Start describing an input channel.
    pub fn builder(id: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder {
            id: id.into(),
            name: None,
            label: None,
            direction: Direction::Input,
            index: None,
            format: DataFormat::default(),
            attrs: Vec::new(),
        }
    }

    /// Channel id, unique per direction within the device.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Extended name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Input or output.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True for output channels.
    pub fn is_output(&self) -> bool {
        self.direction.is_output()
    }

    /// Whether the channel can take part in buffered I/O.
    pub fn is_scan_element(&self) -> bool {
        self.index.is_some()
    }

    /// Scan index, `None` for channels that cannot be buffered.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Sample storage format.
    pub fn data_format(&self) -> &DataFormat {
        &self.format
    }

    /// Quantity type derived from the id.
    pub fn channel_type(&self) -> ChannelType {
        self.chan_type
    }

    /// Modifier derived from the id.
    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    /// Id of the owning device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Channel attributes.
    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    /// Find an attribute by name.
    ///
    /// Names carrying the channel name as prefix (`voltage0_raw`) are
    /// accepted too.
    pub fn find_attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name).or_else(|| {
            let prefix = self.name.as_deref()?;
            let stripped = name.strip_prefix(prefix)?.strip_prefix('_')?;
            self.attrs.get(stripped)
        })
    }

    fn bit(&self, mask: &ChannelsMask) -> Result<usize> {
        let index = self.index.ok_or_else(|| IioError::NotScanElement {
            device: self.device_id.clone(),
            channel: self.id.clone(),
        })?;
        let bit = index as usize;
        if bit >= mask.size() {
            return Err(IioError::DeviceMismatch {
                op: "channel_mask_bit",
                device: self.device_id.clone(),
                mask_size: mask.size(),
                channel_count: bit + 1,
            });
        }
        Ok(bit)
    }

    /// Enable this channel in `mask`. Idempotent.
    pub fn enable(&self, mask: &mut ChannelsMask) -> Result<()> {
        let bit = self.bit(mask)?;
        mask.set_bit(bit);
        Ok(())
    }

    /// Disable this channel in `mask`. Idempotent.
    pub fn disable(&self, mask: &mut ChannelsMask) -> Result<()> {
        let bit = self.bit(mask)?;
        mask.clear_bit(bit);
        Ok(())
    }

    /// Whether this channel's bit is set in `mask`.
    pub fn is_enabled(&self, mask: &ChannelsMask) -> bool {
        self.index.is_some_and(|index| mask.test_bit(index as usize))
    }

    fn entry(&self, op: &'static str, block: &Block<'_>) -> Result<LayoutEntry> {
        if block.device().id() != self.device_id {
            return Err(IioError::NotEnabled {
                op,
                channel: self.id.clone(),
            });
        }
        self.index
            .and_then(|index| block.layout().entry(index))
            .copied()
            .ok_or_else(|| IioError::NotEnabled {
                op,
                channel: self.id.clone(),
            })
    }

    fn require_convertible(&self, op: &'static str) -> Result<()> {
        if self.format.is_convertible() {
            Ok(())
        } else {
            Err(IioError::InvalidConfiguration {
                op,
                device: self.device_id.clone(),
                reason: format!(
                    "channel '{}' has {}-bit storage, too wide for conversion",
                    self.id, self.format.length
                ),
            })
        }
    }

    /// Extract this channel's samples from `block`.
    ///
    /// With `raw` the bytes are copied untouched; otherwise each storage unit
    /// is converted to a host-order integer of the same width.
    pub fn read(&self, block: &Block<'_>, raw: bool) -> Result<Vec<u8>> {
        let entry = self.entry("read_channel", block)?;
        if !raw {
            self.require_convertible("read_channel")?;
        }
        let stride = block.layout().sample_size();
        let unit = self.format.storage_bytes();
        let len = self.format.sample_bytes();

        block.with_data("read_channel", |data| {
            let mut out = Vec::with_capacity(data.len() / stride * len);
            let mut pos = entry.offset;
            while pos + len <= data.len() {
                let sample = &data[pos..pos + len];
                if raw {
                    out.extend_from_slice(sample);
                } else {
                    for chunk in sample.chunks_exact(unit) {
                        let start = out.len();
                        out.resize(start + unit, 0);
                        self.format.to_host(chunk, &mut out[start..]);
                    }
                }
                pos += stride;
            }
            out
        })
    }

    /// Scatter `src` into this channel's sample slots of `block`.
    ///
    /// Returns the number of bytes consumed from `src`.
    pub fn write(&self, block: &Block<'_>, src: &[u8], raw: bool) -> Result<usize> {
        let entry = self.entry("write_channel", block)?;
        if !raw {
            self.require_convertible("write_channel")?;
        }
        let stride = block.layout().sample_size();
        let unit = self.format.storage_bytes();
        let len = self.format.sample_bytes();

        block.with_data_mut("write_channel", |data| {
            let mut consumed = 0;
            let mut pos = entry.offset;
            while pos + len <= data.len() && consumed + len <= src.len() {
                let sample = &src[consumed..consumed + len];
                let dst = &mut data[pos..pos + len];
                if raw {
                    dst.copy_from_slice(sample);
                } else {
                    for (from, to) in sample.chunks_exact(unit).zip(dst.chunks_exact_mut(unit)) {
                        self.format.from_host(from, to);
                    }
                }
                consumed += len;
                pos += stride;
            }
            consumed
        })
    }

    /// Decode every storage unit of this channel in `block`.
    pub fn read_values(&self, block: &Block<'_>) -> Result<Vec<i64>> {
        let host = self.read(block, false)?;
        let unit = self.format.storage_bytes();
        Ok(host
            .chunks_exact(unit)
            .map(|chunk| host_value(chunk, unit, self.format.is_signed))
            .collect())
    }

    /// Decode every value of this channel in `block` and apply its scale.
    pub fn read_scaled(&self, block: &Block<'_>) -> Result<Vec<f64>> {
        Ok(self
            .read_values(block)?
            .into_iter()
            .map(|v| self.format.scaled(v))
            .collect())
    }

    /// Encode `values` into this channel's slots of `block`.
    ///
    /// Returns the number of values written.
    pub fn write_values(&self, block: &Block<'_>, values: &[i64]) -> Result<usize> {
        let entry = self.entry("write_channel", block)?;
        self.require_convertible("write_channel")?;
        let stride = block.layout().sample_size();
        let unit = self.format.storage_bytes();
        let len = self.format.sample_bytes();

        block.with_data_mut("write_channel", |data| {
            let mut values = values.iter();
            let mut written = 0;
            let mut pos = entry.offset;
            'samples: while pos + len <= data.len() {
                for slot in data[pos..pos + len].chunks_exact_mut(unit) {
                    let Some(&value) = values.next() else {
                        break 'samples;
                    };
                    self.format.encode(value, slot);
                    written += 1;
                }
                pos += stride;
            }
            written
        })
    }
}

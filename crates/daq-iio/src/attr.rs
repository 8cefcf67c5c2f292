//! Named attributes of devices, channels and buffers.
//!
//! Attributes are discovered once, when the device is described, and kept in
//! an [`AttrMap`] keyed by name. Each [`Attr`] is a small handle that knows its
//! scope and reads or writes its value through an [`AttrIo`] collaborator; the
//! core never interprets attribute values itself.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{IioError, Result};

/// Where an attribute lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrScope {
    /// Device attribute
    Device {
        /// Device id.
        device: String,
    },
    /// Debug attribute of a device
    Debug {
        /// Device id.
        device: String,
    },
    /// Channel attribute (channel ids are only unique per direction)
    Channel {
        /// Device id.
        device: String,
        /// Channel id.
        channel: String,
        /// Output channel.
        output: bool,
    },
    /// Attribute of one hardware buffer of a device
    Buffer {
        /// Device id.
        device: String,
        /// Hardware buffer index.
        hw_index: u32,
    },
}

/// Attribute I/O collaborator (sysfs files, network protocol, ...).
pub trait AttrIo: Send + Sync {
    /// Read the current value.
    fn read(&self, scope: &AttrScope, name: &str) -> Result<String>;

    /// Write a new value.
    fn write(&self, scope: &AttrScope, name: &str, value: &str) -> Result<()>;
}

/// Handle to a single attribute.
#[derive(Clone)]
pub struct Attr {
    name: String,
    filename: Option<String>,
    scope: AttrScope,
    io: Arc<dyn AttrIo>,
}

impl fmt::Debug for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attr")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Attr {
    /// Create an attribute handle.
    pub fn new(name: impl Into<String>, scope: AttrScope, io: Arc<dyn AttrIo>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            scope,
            io,
        }
    }

    /// Set the backing file name, when it differs from the attribute name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file name, when it differs from the name.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Where the attribute lives.
    pub fn scope(&self) -> &AttrScope {
        &self.scope
    }

    /// Read the raw string value.
    pub fn read(&self) -> Result<String> {
        self.io.read(&self.scope, &self.name)
    }

    /// Write a raw string value.
    pub fn write(&self, value: &str) -> Result<()> {
        self.io.write(&self.scope, &self.name, value)
    }

    /// Read and parse as integer (decimal or `0x` hexadecimal).
    pub fn read_i64(&self) -> Result<i64> {
        let value = self.read()?;
        let trimmed = value.trim();
        let parsed = match trimmed.strip_prefix("0x") {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => trimmed.parse(),
        };
        parsed.map_err(|e| IioError::attribute(&self.name, format!("'{trimmed}': {e}")))
    }

    /// Read and parse as floating point.
    pub fn read_f64(&self) -> Result<f64> {
        let value = self.read()?;
        value
            .trim()
            .parse()
            .map_err(|e| IioError::attribute(&self.name, format!("'{}': {e}", value.trim())))
    }

    /// Read and parse as boolean (`0`/`1`).
    pub fn read_bool(&self) -> Result<bool> {
        Ok(self.read_i64()? != 0)
    }

    /// Write an integer value.
    pub fn write_i64(&self, value: i64) -> Result<()> {
        self.write(&value.to_string())
    }

    /// Write a floating point value.
    pub fn write_f64(&self, value: f64) -> Result<()> {
        self.write(&value.to_string())
    }

    /// Write a boolean as `0`/`1`.
    pub fn write_bool(&self, value: bool) -> Result<()> {
        self.write(if value { "1" } else { "0" })
    }

    /// Same attribute, re-targeted at another scope.
    pub(crate) fn rescoped(&self, scope: AttrScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }
}

/// Attributes of one scope, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct AttrMap {
    attrs: BTreeMap<String, Attr>,
}

impl AttrMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute, replacing any with the same name.
    pub fn insert(&mut self, attr: Attr) {
        self.attrs.insert(attr.name.clone(), attr);
    }

    /// Look up an attribute by name.
    pub fn get(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    /// Look up an attribute, failing with a descriptive error.
    pub fn require(&self, name: &str) -> Result<&Attr> {
        self.get(name)
            .ok_or_else(|| IioError::attribute(name, "no such attribute"))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// True when the map holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Attribute names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// Attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Attr> {
        self.attrs.values()
    }

    pub(crate) fn rescoped(&self, scope: &AttrScope) -> Self {
        Self {
            attrs: self
                .attrs
                .iter()
                .map(|(name, attr)| (name.clone(), attr.rescoped(scope.clone())))
                .collect(),
        }
    }
}

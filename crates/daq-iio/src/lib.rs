//! Buffered streaming I/O for industrial-I/O data acquisition devices.
//!
//! This crate implements the buffer, block and stream model used to move
//! sample data between a host and IIO devices (ADCs, DACs, transceivers).
//! Device discovery and the transport are collaborators: devices are
//! described through builders, and hardware rings are reached through the
//! [`RingBackend`] / [`RingIo`] traits.
//!
//! # Architecture
//!
//! ## Description
//! - [`Context`] - devices of one transport plus the shared [`ContextConfig`]
//! - [`Device`] / [`Channel`] - immutable metadata, built once
//! - [`ChannelsMask`] - which channels take part in a buffer
//! - [`DataFormat`] - hardware sample encoding and conversion
//! - [`Attr`] / [`AttrMap`] - named attributes read through [`AttrIo`]
//!
//! ## Streaming
//! - [`Buffer`] - one hardware ring, `Created → Enabled ⇄ Disabled`
//! - [`Block`] - sample memory enqueued to and dequeued from the ring
//! - [`Stream`] - a pool of blocks cycled in FIFO order
//!
//! Blocks and streams borrow their buffer, so neither can outlive it.
//! Blocking calls are bounded by the context timeout and can be woken from
//! another thread with a [`BufferCanceller`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use daq_iio::backend::sim::{MemoryAttrStore, SimBackend};
//! use daq_iio::{Channel, Context, DataFormat, Device, Stream, StreamPoll};
//!
//! # fn example() -> daq_iio::Result<()> {
//! let adc = Device::builder("iio:device0", Arc::new(MemoryAttrStore::new()))
//!     .name("adc")
//!     .channel(Channel::builder("voltage0").scan_element(0, DataFormat::signed(16, 16)))
//!     .channel(Channel::builder("voltage1").scan_element(1, DataFormat::signed(16, 16)))
//!     .build()?;
//! let ctx = Context::new(Arc::new(SimBackend::new()), vec![adc.clone()]);
//!
//! let mut mask = adc.create_mask()?;
//! for chn in adc.channels() {
//!     chn.enable(&mut mask)?;
//! }
//!
//! let buffer = ctx.create_buffer(&adc, &mask, 0)?;
//! buffer.enable()?;
//! {
//!     let mut stream = Stream::create(&buffer, 1024, 4)?;
//!     while let StreamPoll::Block(block) = stream.next_block()? {
//!         let samples = adc.channels()[0].read_values(block)?;
//!         println!("{} samples", samples.len());
//!     }
//! }
//! buffer.disable()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod attr;
pub mod backend;
pub mod block;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod mask;
pub mod stream;

pub use attr::{Attr, AttrIo, AttrMap, AttrScope};
pub use backend::{RingBackend, RingIo, RingParams, Transfer};
pub use block::Block;
pub use buffer::{Buffer, BufferCanceller};
pub use channel::{Channel, ChannelBuilder, ChannelType, Direction, Modifier};
pub use config::ContextConfig;
pub use context::Context;
pub use device::{Device, DeviceBuilder, DeviceKind};
pub use error::{BufferState, IioError, Result};
pub use format::DataFormat;
pub use mask::ChannelsMask;
pub use stream::{Stream, StreamPoll};

//! Shared fixtures: a simulated context with an ADC, a DAC and a device
//! mixing input and output scan elements.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use daq_iio::backend::sim::{MemoryAttrStore, SimBackend};
use daq_iio::{Channel, ChannelsMask, Context, ContextConfig, DataFormat, Device};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Log to stderr, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const ADC: &str = "iio:device0";
pub const DAC: &str = "iio:device1";
pub const MIXED: &str = "iio:device2";

pub struct Rig {
    pub backend: SimBackend,
    pub ctx: Context,
    pub adc: Arc<Device>,
    pub dac: Arc<Device>,
    pub mixed: Arc<Device>,
}

pub fn rig() -> Rig {
    rig_with(ContextConfig::default())
}

pub fn rig_with(config: ContextConfig) -> Rig {
    init_tracing();
    let io = Arc::new(MemoryAttrStore::new());

    let adc = Device::builder(ADC, io.clone())
        .name("adc")
        .channel(Channel::builder("voltage0").scan_element(0, DataFormat::signed(16, 16)))
        .channel(Channel::builder("voltage1").scan_element(1, DataFormat::signed(16, 16)))
        .buffer_attr("length")
        .build()
        .unwrap();

    let dac = Device::builder(DAC, io.clone())
        .name("dac")
        .channel(
            Channel::builder("voltage0")
                .output()
                .scan_element(0, DataFormat::signed(16, 16)),
        )
        .channel(
            Channel::builder("voltage1")
                .output()
                .scan_element(1, DataFormat::signed(16, 16)),
        )
        .build()
        .unwrap();

    let mixed = Device::builder(MIXED, io)
        .name("transceiver")
        .channel(Channel::builder("voltage0").scan_element(0, DataFormat::signed(16, 16)))
        .channel(
            Channel::builder("voltage1")
                .output()
                .scan_element(1, DataFormat::signed(16, 16)),
        )
        .build()
        .unwrap();

    let backend = SimBackend::new();
    let ctx = Context::with_config(
        Arc::new(backend.clone()),
        vec![adc.clone(), dac.clone(), mixed.clone()],
        config,
    );

    Rig {
        backend,
        ctx,
        adc,
        dac,
        mixed,
    }
}

/// Mask with every scan element of `device` enabled.
pub fn full_mask(device: &Device) -> ChannelsMask {
    let mut mask = device.create_mask().unwrap();
    for chn in device.channels().iter().filter(|c| c.is_scan_element()) {
        chn.enable(&mut mask).unwrap();
    }
    mask
}

/// RX source writing sample `i` as `(i, -i)` in two little-endian int16.
pub fn ramp_source(_sequence: u64, dst: &mut [u8]) {
    for (i, sample) in dst.chunks_exact_mut(4).enumerate() {
        let value = i as i16;
        sample[..2].copy_from_slice(&value.to_le_bytes());
        sample[2..].copy_from_slice(&(-value).to_le_bytes());
    }
}

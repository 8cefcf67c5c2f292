//! Sample layout, channel extraction and conversion.

mod common;

use std::sync::Arc;

use common::{full_mask, ramp_source, rig, ADC};
use daq_iio::backend::sim::{MemoryAttrStore, SimBackend};
use daq_iio::{Block, Channel, ChannelsMask, Context, DataFormat, Device, IioError};

fn mixed_formats() -> Arc<Device> {
    Device::builder("iio:device3", Arc::new(MemoryAttrStore::new()))
        .channel(Channel::builder("voltage0").scan_element(0, DataFormat::signed(16, 16)))
        .channel(
            Channel::builder("voltage1")
                .scan_element(1, DataFormat::unsigned(12, 16).with_shift(4)),
        )
        .channel(Channel::builder("accel_x").scan_element(2, DataFormat::signed(32, 32)))
        .channel(
            Channel::builder("voltage3")
                .scan_element(3, DataFormat::signed(16, 16).with_repeat(4)),
        )
        .channel(Channel::builder("timestamp").scan_element(4, DataFormat::signed(64, 64)))
        .build()
        .unwrap()
}

#[test]
fn test_sample_size_is_sum_of_enabled_storage() {
    let dev = mixed_formats();
    let mut mask = dev.create_mask().unwrap();

    let mut expected = 0;
    for (chn, bytes) in dev.channels().iter().zip([2, 2, 4, 8, 8]) {
        chn.enable(&mut mask).unwrap();
        expected += bytes;
        assert_eq!(mask.sample_size(&dev).unwrap(), expected);
    }

    dev.channels()[2].disable(&mut mask).unwrap();
    assert_eq!(dev.sample_size(&mask).unwrap(), 20);
}

#[test]
fn test_set_channels_selects_exactly() {
    let dev = mixed_formats();
    let mut mask = full_mask(&dev);
    let chans = [&dev.channels()[1], &dev.channels()[4]];
    mask.set_channels(&dev, &chans).unwrap();
    assert_eq!(mask.iter_enabled().collect::<Vec<_>>(), vec![1, 4]);
    assert_eq!(dev.sample_size(&mask).unwrap(), 10);

    let foreign = rig();
    let err = mask
        .set_channels(&dev, &[&foreign.adc.channels()[0]])
        .unwrap_err();
    assert!(matches!(err, IioError::InvalidConfiguration { .. }));
}

#[test]
fn test_two_int16_channels_interleave() {
    let rig = rig();
    rig.backend.set_rx_source(ADC, ramp_source);
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    assert_eq!(buffer.sample_size().unwrap(), 4);

    let block = Block::create_for_samples(&buffer, 8).unwrap();
    block.enqueue(None, false).unwrap();
    block.dequeue(false).unwrap();

    let ch0 = rig.adc.find_channel("voltage0", false).unwrap();
    let ch1 = rig.adc.find_channel("voltage1", false).unwrap();
    assert_eq!(block.first_offset(ch0), Some(0));
    assert_eq!(block.first_offset(ch1), Some(2));

    assert_eq!(ch0.read_values(&block).unwrap(), (0..8).collect::<Vec<i64>>());
    assert_eq!(
        ch1.read_values(&block).unwrap(),
        (0..8).map(|i: i64| -i).collect::<Vec<_>>()
    );

    let raw = ch1.read(&block, true).unwrap();
    assert_eq!(raw.len(), 16);
    assert_eq!(&raw[2..4], &(-1i16).to_le_bytes());

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_write_then_read_round_trip() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.dac, &full_mask(&rig.dac), 0)
        .unwrap();
    buffer.enable().unwrap();
    let block = Block::create_for_samples(&buffer, 4).unwrap();

    let ch0 = rig.dac.find_channel("voltage0", true).unwrap();
    let ch1 = rig.dac.find_channel("voltage1", true).unwrap();

    let values = [100, -200, 300, -400];
    assert_eq!(ch0.write_values(&block, &values).unwrap(), 4);
    assert_eq!(ch0.read_values(&block).unwrap(), values);

    let host: Vec<u8> = [1i16, 2, 3, 4].iter().flat_map(|v| v.to_ne_bytes()).collect();
    assert_eq!(ch1.write(&block, &host, false).unwrap(), 8);
    assert_eq!(ch1.read(&block, false).unwrap(), host);

    // Channel 0 is untouched by writes to channel 1.
    assert_eq!(ch0.read_values(&block).unwrap(), values);

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_write_stops_at_block_end() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.dac, &full_mask(&rig.dac), 0)
        .unwrap();
    buffer.enable().unwrap();
    let block = Block::create_for_samples(&buffer, 2).unwrap();

    let ch0 = &rig.dac.channels()[0];
    assert_eq!(ch0.write(&block, &[0xaa; 10], true).unwrap(), 4);
    assert_eq!(ch0.write_values(&block, &[1, 2, 3]).unwrap(), 2);

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_shifted_big_endian_conversion() {
    let io = Arc::new(MemoryAttrStore::new());
    let dev = Device::builder("iio:device4", io)
        .channel(
            Channel::builder("voltage0").scan_element(0, "be:s12/16>>4".parse().unwrap()),
        )
        .build()
        .unwrap();
    let backend = SimBackend::new();
    let ctx = Context::new(Arc::new(backend.clone()), vec![dev.clone()]);

    let buffer = ctx.create_buffer(&dev, &full_mask(&dev), 0).unwrap();
    buffer.enable().unwrap();
    let block = Block::create_for_samples(&buffer, 2).unwrap();

    // -1 and 0x7ff, shifted left by 4, big endian, garbage in the low nibble.
    block.write(&[0xff, 0xf3, 0x7f, 0xf5]).unwrap();
    let chn = &dev.channels()[0];
    assert_eq!(chn.read_values(&block).unwrap(), vec![-1, 0x7ff]);

    chn.write_values(&block, &[-2048, 5]).unwrap();
    assert_eq!(&block.read().unwrap()[..], &[0x80, 0x00, 0x00, 0x50]);

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_scaled_values() {
    let io = Arc::new(MemoryAttrStore::new());
    let dev = Device::builder("iio:device5", io)
        .channel(
            Channel::builder("voltage0")
                .scan_element(0, DataFormat::signed(16, 16).with_scale(0.5)),
        )
        .build()
        .unwrap();
    let ctx = Context::new(Arc::new(SimBackend::new()), vec![dev.clone()]);
    let buffer = ctx.create_buffer(&dev, &full_mask(&dev), 0).unwrap();
    buffer.enable().unwrap();
    let block = Block::create_for_samples(&buffer, 2).unwrap();

    let chn = &dev.channels()[0];
    chn.write_values(&block, &[10, -3]).unwrap();
    assert_eq!(chn.read_scaled(&block).unwrap(), vec![5.0, -1.5]);

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_channel_outside_buffer_mask_not_enabled() {
    let rig = rig();
    let mut mask = rig.adc.create_mask().unwrap();
    rig.adc.channels()[0].enable(&mut mask).unwrap();
    let buffer = rig.ctx.create_buffer(&rig.adc, &mask, 0).unwrap();
    buffer.enable().unwrap();
    let block = Block::create(&buffer, 8).unwrap();

    let ch1 = &rig.adc.channels()[1];
    assert!(matches!(
        ch1.read(&block, false),
        Err(IioError::NotEnabled { .. })
    ));
    assert_eq!(block.first_offset(ch1), None);

    let foreign = &rig.dac.channels()[0];
    assert!(matches!(
        foreign.read(&block, true),
        Err(IioError::NotEnabled { .. })
    ));

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_foreach_sample_visits_selected_channels() {
    let rig = rig();
    rig.backend.set_rx_source(ADC, ramp_source);
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    let block = Block::create_for_samples(&buffer, 4).unwrap();
    block.enqueue(None, false).unwrap();
    block.dequeue(false).unwrap();

    let mut seen = Vec::new();
    let total = block
        .foreach_sample(&full_mask(&rig.adc), |chn, bytes| {
            seen.push((chn.id().to_string(), bytes.len()));
            Ok(bytes.len())
        })
        .unwrap();
    assert_eq!(total, 16);
    assert_eq!(seen.len(), 8);
    assert_eq!(seen[0].0, "voltage0");
    assert_eq!(seen[1].0, "voltage1");

    let mut only_second = ChannelsMask::new(2).unwrap();
    only_second.set_bit(1);
    let mut values = Vec::new();
    block
        .foreach_sample(&only_second, |_, bytes| {
            values.push(i16::from_le_bytes([bytes[0], bytes[1]]));
            Ok(1)
        })
        .unwrap();
    assert_eq!(values, vec![0, -1, -2, -3]);

    let err = block
        .foreach_sample(&full_mask(&rig.adc), |_, _| {
            Err(IioError::Attribute {
                name: "stop".to_string(),
                message: "abort".to_string(),
            })
        })
        .unwrap_err();
    assert!(err.to_string().contains("abort"));

    drop(block);
    buffer.disable().unwrap();
}

#[test]
fn test_wide_channel_is_raw_only() {
    let io = Arc::new(MemoryAttrStore::new());
    let dev = Device::builder("iio:device6", io)
        .channel(Channel::builder("voltage0").scan_element(0, DataFormat::signed(128, 128)))
        .build()
        .unwrap();
    let ctx = Context::new(Arc::new(SimBackend::new()), vec![dev.clone()]);
    let buffer = ctx.create_buffer(&dev, &full_mask(&dev), 0).unwrap();
    buffer.enable().unwrap();
    let block = Block::create_for_samples(&buffer, 2).unwrap();
    let chn = &dev.channels()[0];

    for err in [
        chn.read_values(&block).unwrap_err(),
        chn.read(&block, false).unwrap_err(),
        chn.write(&block, &[0; 32], false).unwrap_err(),
        chn.write_values(&block, &[1, 2]).unwrap_err(),
    ] {
        assert!(
            matches!(err, IioError::InvalidConfiguration { .. }),
            "unexpected error: {err}"
        );
    }

    assert_eq!(chn.write(&block, &[0x5a; 32], true).unwrap(), 32);
    assert_eq!(chn.read(&block, true).unwrap(), vec![0x5a; 32]);

    drop(block);
    buffer.disable().unwrap();
}

//! Block pools cycling through a buffer.

mod common;

use std::thread;
use std::time::Duration;

use common::{full_mask, rig, rig_with, ADC, DAC};
use daq_iio::{ContextConfig, IioError, Stream, StreamPoll};

fn expect_block<'s, 'buf>(poll: StreamPoll<'s, 'buf>) -> &'s daq_iio::Block<'buf> {
    match poll {
        StreamPoll::Block(block) => block,
        other => panic!("expected a block, got {other:?}"),
    }
}

#[test]
fn test_rx_stream_yields_blocks_in_order() {
    for pool_size in [1, 2, 4] {
        let rig = rig();
        let buffer = rig
            .ctx
            .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
            .unwrap();
        buffer.enable().unwrap();

        let mut stream = Stream::create(&buffer, 8, pool_size).unwrap();
        assert_eq!(stream.pool_size(), pool_size);
        assert_eq!(stream.block_size(), 32);

        for k in 1..=10u8 {
            let block = expect_block(stream.next_block().unwrap());
            let data = block.read().unwrap();
            assert!(
                data.iter().all(|&b| b == k),
                "pool {pool_size}: block {k} holds {:?}",
                &data[..4]
            );
        }
        drop(stream);
        buffer.disable().unwrap();
    }
}

#[test]
fn test_tx_stream_hands_out_fresh_blocks_first() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.dac, &full_mask(&rig.dac), 0)
        .unwrap();
    buffer.enable().unwrap();

    let mut stream = Stream::create(&buffer, 2, 2).unwrap();
    for k in 0..5u8 {
        let block = expect_block(stream.next_block().unwrap());
        assert!(!block.is_enqueued());
        block.write(&[k; 8]).unwrap();
    }
    // Waiting for the next free block guarantees the first four were sent.
    expect_block(stream.next_block().unwrap());
    let records = rig.backend.tx_records(DAC);
    assert!(records.len() >= 4);
    for (k, record) in records.iter().take(4).enumerate() {
        assert!(record.data.iter().all(|&b| b == k as u8));
    }

    drop(stream);
    buffer.disable().unwrap();
}

#[test]
fn test_block_enqueued_by_caller_is_not_enqueued_again() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.dac, &full_mask(&rig.dac), 0)
        .unwrap();
    buffer.enable().unwrap();

    let mut stream = Stream::create(&buffer, 2, 2).unwrap();
    let block = expect_block(stream.next_block().unwrap());
    block.write(&[0xaa; 8]).unwrap();
    block.enqueue(Some(4), false).unwrap();

    let block = expect_block(stream.next_block().unwrap());
    block.write(&[0xbb; 8]).unwrap();
    expect_block(stream.next_block().unwrap());
    expect_block(stream.next_block().unwrap());

    let records = rig.backend.tx_records(DAC);
    assert!(records.len() >= 2);
    assert_eq!(&records[0].data[..], &[0xaa; 4]);
    assert_eq!(&records[1].data[..], &[0xbb; 8]);

    drop(stream);
    buffer.disable().unwrap();
}

#[test]
fn test_cancelled_buffer_stops_stream() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();

    let mut stream = Stream::create(&buffer, 4, 2).unwrap();
    assert!(stream.next_block().unwrap().is_block());

    buffer.cancel();
    assert!(matches!(stream.next_block().unwrap(), StreamPoll::Cancelled));
    assert!(matches!(stream.next_block().unwrap(), StreamPoll::Cancelled));

    drop(stream);
    buffer.disable().unwrap();
}

#[test]
fn test_stream_requires_enabled_buffer_and_pool() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();

    assert!(matches!(
        Stream::create(&buffer, 4, 2),
        Err(IioError::BufferNotEnabled { .. })
    ));

    buffer.enable().unwrap();
    assert!(matches!(
        Stream::create(&buffer, 4, 0),
        Err(IioError::Allocation { .. })
    ));
    assert!(matches!(
        Stream::create(&buffer, 0, 2),
        Err(IioError::Allocation { .. })
    ));
    assert_eq!(buffer.nb_blocks(), 0);
    buffer.disable().unwrap();
}

#[test]
fn test_default_pool_size_comes_from_config() {
    let rig = rig_with(ContextConfig::default().with_stream_pool_size(3));
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();

    let stream = Stream::with_default_pool(&buffer, 4).unwrap();
    assert_eq!(stream.pool_size(), 3);
    assert_eq!(buffer.nb_blocks(), 3);

    drop(stream);
    assert_eq!(buffer.nb_blocks(), 0);
    buffer.disable().unwrap();
}

#[test]
fn test_timed_out_stream_resumes_with_same_block() {
    let rig = rig_with(ContextConfig::default().with_timeout_ms(50));
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    rig.backend.stall(ADC);

    let mut stream = Stream::create(&buffer, 4, 2).unwrap();
    assert!(matches!(stream.next_block().unwrap(), StreamPoll::TimedOut));

    rig.backend.resume(ADC);
    let block = expect_block(stream.next_block().unwrap());
    assert!(block.read().unwrap().iter().all(|&b| b == 1));

    drop(stream);
    buffer.disable().unwrap();
}

#[test]
fn test_rx_pool_deeper_than_ring_is_rejected() {
    let rig = rig_with(ContextConfig::default().with_ring_depth(2));
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    rig.backend.stall(ADC);

    assert!(matches!(
        Stream::create(&buffer, 4, 3),
        Err(IioError::RingFull { depth: 2, .. })
    ));
    assert_eq!(buffer.nb_blocks(), 0);

    rig.backend.resume(ADC);
    buffer.disable().unwrap();
}

#[test]
fn test_backend_failure_skips_to_next_block() {
    let rig = rig();
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    rig.backend.stall(ADC);
    rig.backend.fail_next_transfer(ADC, "overrun");

    let mut stream = Stream::create(&buffer, 4, 2).unwrap();
    rig.backend.resume(ADC);

    let err = stream.next_block().unwrap_err();
    assert!(matches!(err, IioError::Backend { .. }));

    // First block failed before consuming a sequence number.
    let block = expect_block(stream.next_block().unwrap());
    assert!(block.read().unwrap().iter().all(|&b| b == 1));
    let block = expect_block(stream.next_block().unwrap());
    assert!(block.read().unwrap().iter().all(|&b| b == 2));

    drop(stream);
    buffer.disable().unwrap();
}

#[test]
fn test_cancel_wakes_blocked_stream() {
    let rig = rig_with(ContextConfig::default().with_timeout_ms(0));
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    rig.backend.stall(ADC);

    let mut stream = Stream::create(&buffer, 4, 2).unwrap();
    let canceller = buffer.canceller();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    // No timeout: only the cancel can end this wait.
    assert!(matches!(stream.next_block().unwrap(), StreamPoll::Cancelled));
    handle.join().unwrap();

    rig.backend.resume(ADC);
    drop(stream);
    buffer.disable().unwrap();
}

#[test]
fn test_drop_after_cancel_returns_on_stalled_ring() {
    let rig = rig_with(ContextConfig::default().with_timeout_ms(0));
    let buffer = rig
        .ctx
        .create_buffer(&rig.adc, &full_mask(&rig.adc), 0)
        .unwrap();
    buffer.enable().unwrap();
    rig.backend.stall(ADC);

    let stream = Stream::create(&buffer, 4, 3).unwrap();
    assert_eq!(buffer.nb_blocks(), 3);
    buffer.cancel();

    // Ring stays stalled; the blocks were failed by the cancel.
    drop(stream);
    assert_eq!(buffer.nb_blocks(), 0);

    rig.backend.resume(ADC);
    buffer.disable().unwrap();
}

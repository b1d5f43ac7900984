//! Integration tests for the data source contract
//!
//! These tests drive sources the way the engine's demux thread does:
//! - open through a factory slot, then size/read/seek until EOF
//! - cancel from another thread while a read is blocked
//! - close twice, and close after cancel

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{temp_file, BlockingSource, Shared};
use mpv_bridge::data_source::{
    pipe, FactorySlot, FileDataSourceFactory, MemoryDataSourceFactory, OpenStreams, StreamHandle,
};
use mpv_bridge::{DataSource, DataSourceError, MpvError, DATA_SOURCE_SCHEME};

fn memory_slot(locator: &str, len: usize) -> FactorySlot {
    let factory = MemoryDataSourceFactory::new();
    let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
    factory.insert(locator, data);
    let slot = FactorySlot::new();
    slot.set(Arc::new(factory)).unwrap();
    slot
}

#[test]
fn test_hundred_byte_walkthrough() {
    let slot = memory_slot("abc", 100);
    let source = slot.open(DATA_SOURCE_SCHEME, "datasource://abc").unwrap();
    let mut buf = [0u8; 50];

    assert_eq!(source.size(), Ok(100));
    assert_eq!(source.read(&mut buf), Ok(50));
    assert_eq!(buf[49], 49);

    source.seek(90).unwrap();
    assert_eq!(source.read(&mut buf), Ok(10));
    assert_eq!(&buf[..10], &[90, 91, 92, 93, 94, 95, 96, 97, 98, 99]);
    assert_eq!(source.read(&mut buf), Ok(0));
    source.close();
}

#[test]
fn test_stream_handle_walkthrough() {
    let slot = memory_slot("abc", 100);
    let streams = OpenStreams::new();
    let stream = streams
        .open(&slot, DATA_SOURCE_SCHEME, "datasource://abc", 16)
        .unwrap();
    let mut buf = [0u8; 50];

    assert_eq!(stream.size(), 100);
    // Filled in chunks of 16 up to the requested length.
    assert_eq!(stream.read_into(&mut buf), 50);
    assert_eq!(stream.seek(90), 90);
    assert_eq!(stream.read_into(&mut buf), 10);
    assert_eq!(stream.read_into(&mut buf), 0);

    assert_eq!(streams.live().len(), 1);
    assert_eq!(streams.close_all(), 1);
    assert!(stream.is_closed());
}

#[test]
fn test_unknown_locator_and_missing_factory() {
    let slot = memory_slot("abc", 10);
    assert!(matches!(
        slot.open(DATA_SOURCE_SCHEME, "datasource://nope"),
        Err(DataSourceError::NotFound { .. })
    ));

    let empty = FactorySlot::new();
    assert!(matches!(
        empty.open(DATA_SOURCE_SCHEME, "datasource://abc"),
        Err(DataSourceError::FactoryNotRegistered)
    ));
    assert_eq!(
        OpenStreams::new()
            .open(&empty, DATA_SOURCE_SCHEME, "datasource://abc", 16)
            .map(|_| ()),
        Err(MpvError::LoadingFailed)
    );
}

#[test]
fn test_cancel_unblocks_blocked_read() {
    let source = BlockingSource::new(1000);
    let stream = Arc::new(StreamHandle::new(
        "datasource://slow",
        Box::new(Shared(Arc::clone(&source))),
        1024,
    ));

    let reader = {
        let stream = Arc::clone(&stream);
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            stream.read_into(&mut buf)
        })
    };
    source.wait_reading();

    let started = Instant::now();
    stream.cancel();
    let result = reader.join().unwrap();
    assert!(result < 0);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_close_twice_and_after_cancel() {
    let source = BlockingSource::new(10);
    let stream = StreamHandle::new("datasource://x", Box::new(Shared(Arc::clone(&source))), 8);

    stream.cancel();
    stream.cancel();
    stream.close();
    stream.close();

    assert_eq!(source.closes.load(Ordering::SeqCst), 1);
    assert!(source.closed.load(Ordering::SeqCst));
    let mut buf = [0u8; 4];
    assert!(stream.read_into(&mut buf) < 0);
}

#[test]
fn test_pipe_fed_from_another_thread() {
    let (writer, source) = pipe();
    let producer = thread::spawn(move || {
        for chunk in [b"hello ".as_slice(), b"pipe ".as_slice(), b"world".as_slice()] {
            writer.write(chunk).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        writer.finish();
    });

    let mut out = Vec::new();
    let mut buf = [0u8; 4];
    loop {
        let n = source.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    producer.join().unwrap();
    assert_eq!(out, b"hello pipe world");
    assert_eq!(source.size(), Ok(16));
}

#[test]
fn test_pipe_cancel_unblocks_reader() {
    let (_writer, source) = pipe();
    let source = Arc::new(source);
    let reader = {
        let source = Arc::clone(&source);
        thread::spawn(move || {
            let mut buf = [0u8; 8];
            source.read(&mut buf)
        })
    };
    thread::sleep(Duration::from_millis(20));
    source.cancel();
    assert_eq!(reader.join().unwrap(), Err(DataSourceError::Cancelled));
}

#[test]
fn test_file_factory_with_root() {
    let path = temp_file("ds", "clip.bin", &[7u8; 300]);
    let factory = FileDataSourceFactory::with_root(path.parent().unwrap());
    let slot = FactorySlot::new();
    slot.set(Arc::new(factory)).unwrap();

    let source = slot.open(DATA_SOURCE_SCHEME, "datasource://clip.bin").unwrap();
    assert_eq!(source.size(), Ok(300));
    source.seek(290).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(source.read(&mut buf), Ok(10));
    assert_eq!(source.read(&mut buf), Ok(0));
    source.close();
    source.close();

    assert!(slot
        .open(DATA_SOURCE_SCHEME, "datasource://../escape.bin")
        .is_err());
}

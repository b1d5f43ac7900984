//! Integration tests for EngineHandle
//!
//! These tests run the in-process backend end to end:
//! - lifecycle and use after destroy
//! - property errors, observation and change delivery
//! - `datasource://` playback through a registered factory
//! - destroy while a data source read is blocked

mod common;

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use common::{temp_file, BlockingSource, Recorder, Seen, Shared, WAIT};
use mpv_bridge::data_source::MemoryDataSourceFactory;
use mpv_bridge::engine::StubBackend;
use mpv_bridge::{
    AppContext, CommandReply, DataSource, DataSourceError, EndFileReason, EngineConfig,
    EngineHandle, ErrorCode, EventId, EventObserver, Format, LogLevel, MpvError, PropertyValue,
};

fn engine() -> EngineHandle {
    let engine = EngineHandle::with_backend(
        &AppContext::default(),
        EngineConfig::default(),
        Arc::new(StubBackend::new()),
    )
    .unwrap();
    engine.init().unwrap();
    engine
}

#[test]
fn test_context_closed_after_destroy() {
    let engine = engine();
    engine.destroy().unwrap();

    let err = engine.set_property_int("volume", 5).unwrap_err();
    assert_eq!(err, MpvError::ContextClosed);
    assert_eq!(err.code(), -1000);
    assert_eq!(
        engine.set_option_string("hwdec", "auto"),
        Err(MpvError::ContextClosed)
    );
    assert_eq!(engine.unobserve_property(1), Err(MpvError::ContextClosed));
    assert_eq!(
        engine.request_log_messages(LogLevel::Warn),
        Err(MpvError::ContextClosed)
    );
    // Second destroy is a no-op.
    assert_eq!(engine.destroy(), Ok(()));
}

#[test]
fn test_rejected_property_returns_code() {
    let engine = engine();
    let err = engine.set_property_int("invalid-prop", 5).unwrap_err();
    assert_eq!(err, MpvError::PropertyNotFound);
    assert_eq!(err.code(), -8);

    let err = engine.get_property_string("invalid-prop").unwrap_err();
    assert!(err.is_absent());
}

#[test]
fn test_volume_change_reaches_two_observers_in_order() {
    let engine = engine();
    let first = Recorder::new();
    let second = Recorder::new();
    engine.add_observer(first.clone());
    engine.add_observer(second.clone());

    engine.observe_property("volume", Format::Double, 42).unwrap();
    engine.set_property_double("volume", 0.5).unwrap();

    for recorder in [&first, &second] {
        let seen = recorder.wait_for("volume 0.5", |seen| {
            seen.iter().any(|item| {
                matches!(item, Seen::Property(change) if change.value == PropertyValue::Double(0.5))
            })
        });
        let changes: Vec<_> = seen
            .into_iter()
            .filter_map(|item| match item {
                Seen::Property(change) => Some(change),
                _ => None,
            })
            .collect();
        // Initial value first, then the update.
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].double_val(), 100.0);
        let update = &changes[1];
        assert_eq!(update.name, "volume");
        assert_eq!(update.format, Format::Double);
        assert_eq!(update.token, 42);
        assert_eq!(update.double_val(), 0.5);
    }
}

#[test]
fn test_unobserve_stops_notifications() {
    let engine = engine();
    let recorder = Recorder::new();
    engine.add_observer(recorder.clone());

    engine.observe_property("pause", Format::Flag, 7).unwrap();
    recorder.wait_for("initial pause", |seen| seen.len() == 1);
    engine.unobserve_property(7).unwrap();
    engine.set_property_bool("pause", true).unwrap();
    engine.command_with_token(&["ignore"], 99).unwrap();

    recorder.wait_for("reply", |seen| {
        seen.iter()
            .any(|item| matches!(item, Seen::Reply(reply) if reply.token == 99))
    });
    let properties = recorder
        .seen()
        .iter()
        .filter(|item| matches!(item, Seen::Property(_)))
        .count();
    assert_eq!(properties, 1);
}

#[test]
fn test_command_outcome_arrives_as_reply() {
    let engine = engine();
    let recorder = Recorder::new();
    engine.add_observer(recorder.clone());

    // Accepted synchronously, fails asynchronously.
    engine.command_with_token(&["seek", "10"], 5).unwrap();
    let seen = recorder.wait_for("reply", |seen| {
        seen.iter().any(|item| matches!(item, Seen::Reply(_)))
    });
    let reply = seen
        .into_iter()
        .find_map(|item| match item {
            Seen::Reply(reply) => Some(reply),
            _ => None,
        })
        .unwrap();
    assert_eq!(reply.token, 5);
    assert_eq!(reply.result, Err(MpvError::Command));

    assert_eq!(
        engine.command(&["no-such-command"]),
        Err(MpvError::InvalidParameter)
    );
}

#[test]
fn test_datasource_playback_end_to_end() {
    let engine = engine();
    let factory = MemoryDataSourceFactory::new();
    factory.insert("abc", vec![1u8; 100]);
    engine.set_data_source_factory(Arc::new(factory)).unwrap();

    let recorder = Recorder::new();
    engine.add_observer(recorder.clone());
    engine.command(&["loadfile", "datasource://abc"]).unwrap();

    let end = recorder.wait_end_file();
    assert_eq!(end.reason, EndFileReason::Eof);
    assert_eq!(end.error, None);

    let ids = recorder.event_ids();
    let position = |id| ids.iter().position(|seen| *seen == id).unwrap();
    assert!(position(EventId::CommandReply) < position(EventId::StartFile));
    assert!(position(EventId::StartFile) < position(EventId::FileLoaded));
    assert!(position(EventId::FileLoaded) < position(EventId::EndFile));

    // Properties were reset once the file ended.
    assert_eq!(engine.get_property_bool("eof-reached"), Ok(true));
    assert_eq!(engine.open_stream_count(), 0);
}

#[test]
fn test_missing_locator_ends_with_loading_failed() {
    let engine = engine();
    engine
        .set_data_source_factory(Arc::new(MemoryDataSourceFactory::new()))
        .unwrap();
    let recorder = Recorder::new();
    engine.add_observer(recorder.clone());

    engine.command(&["loadfile", "datasource://missing"]).unwrap();
    let end = recorder.wait_end_file();
    assert_eq!(end.reason, EndFileReason::Error);
    assert_eq!(end.error, Some(MpvError::LoadingFailed));
}

#[test]
fn test_datasource_without_factory_fails_fast() {
    let engine = engine();
    assert_eq!(
        engine.command(&["loadfile", "datasource://abc"]),
        Err(MpvError::LoadingFailed)
    );
}

#[test]
fn test_plain_file_playback() {
    let path = temp_file("engine", "plain.bin", &[3u8; 4096]);
    let engine = engine();
    let recorder = Recorder::new();
    engine.add_observer(recorder.clone());

    engine
        .command(&["loadfile", path.to_str().unwrap()])
        .unwrap();
    assert_eq!(recorder.wait_end_file().reason, EndFileReason::Eof);
}

#[test]
fn test_destroy_cancels_blocked_read_and_closes_stream() {
    let source = BlockingSource::new(1 << 20);
    let engine = engine();
    {
        let source = Arc::clone(&source);
        engine
            .set_data_source_factory(Arc::new(
                move |_: &str| -> Result<Box<dyn DataSource>, DataSourceError> {
                    Ok(Box::new(Shared(Arc::clone(&source))))
                },
            ))
            .unwrap();
    }
    engine.command(&["loadfile", "datasource://slow"]).unwrap();
    source.wait_reading();
    assert_eq!(engine.open_stream_count(), 1);

    let started = Instant::now();
    engine.destroy().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(source.closes.load(Ordering::SeqCst), 1);
    assert_eq!(engine.open_stream_count(), 0);
}

#[test]
fn test_thumbnail_only_while_loaded() {
    let engine = engine();
    assert!(engine.grab_thumbnail(64).is_none());
}

#[test]
fn test_log_observer_receives_engine_lines() {
    let engine = engine();
    let logs = Recorder::new();
    engine.add_log_observer(logs.clone());
    engine.command(&["script-message", "hello"]).unwrap();

    let seen = logs.wait_for("command log", |seen| {
        seen.iter().any(|item| {
            matches!(item, Seen::Log(line) if line.text.contains("script-message"))
        })
    });
    assert!(seen.iter().all(|item| matches!(item, Seen::Log(_))));
}

#[test]
fn test_app_context_and_config_options_are_applied() {
    let dir = temp_file("ctx", "marker", b"").parent().unwrap().to_path_buf();
    let mut config = EngineConfig::default();
    config.options.insert("hwdec".to_string(), "auto".to_string());
    // Unknown options are logged and skipped, never fatal.
    config
        .options
        .insert("no-such-option".to_string(), "1".to_string());

    let engine = EngineHandle::with_backend(
        &AppContext::new(&dir, &dir),
        config,
        Arc::new(StubBackend::new()),
    )
    .unwrap();
    engine.init().unwrap();
    assert_eq!(engine.get_property_string("hwdec"), Ok("auto".to_string()));
}

/// Runs `action` against the engine from the event thread on the first
/// command reply, then reports the outcome.
struct OnReply<T: Send> {
    engine: Mutex<Weak<EngineHandle>>,
    entered: Mutex<Option<Sender<()>>>,
    done: Mutex<Option<Sender<T>>>,
    action: fn(&EngineHandle) -> T,
}

impl<T: Send + 'static> OnReply<T> {
    fn attach(
        engine: &Arc<EngineHandle>,
        action: fn(&EngineHandle) -> T,
    ) -> (mpsc::Receiver<()>, mpsc::Receiver<T>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        engine.add_observer(Arc::new(Self {
            engine: Mutex::new(Arc::downgrade(engine)),
            entered: Mutex::new(Some(entered_tx)),
            done: Mutex::new(Some(done_tx)),
            action,
        }));
        (entered_rx, done_rx)
    }
}

impl<T: Send> EventObserver for OnReply<T> {
    fn on_command_reply(&self, _reply: &CommandReply) {
        let Some(done) = self.done.lock().unwrap().take() else {
            return;
        };
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        let Some(engine) = self.engine.lock().unwrap().upgrade() else {
            return;
        };
        let _ = done.send((self.action)(&engine));
    }
}

#[test]
fn test_destroy_returns_while_observer_queries_handle() {
    let engine = Arc::new(engine());
    let (entered, queried) = OnReply::attach(&engine, |engine| {
        // Still inside the callback when destroy starts joining.
        thread::sleep(Duration::from_millis(200));
        (engine.is_destroyed(), engine.is_initialized())
    });

    engine.command_with_token(&["ignore"], 1).unwrap();
    entered.recv_timeout(WAIT).unwrap();

    let (destroyed_tx, destroyed) = mpsc::channel();
    {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let _ = destroyed_tx.send(engine.destroy());
        });
    }

    assert_eq!(destroyed.recv_timeout(WAIT), Ok(Ok(())));
    assert!(queried.recv_timeout(WAIT).is_ok());
    assert!(engine.is_destroyed());
    assert_eq!(engine.command(&["stop"]), Err(MpvError::ContextClosed));
}

#[test]
fn test_observer_destroys_handle_from_event_thread() {
    let engine = Arc::new(engine());
    let (_entered, destroyed) = OnReply::attach(&engine, |engine| engine.destroy());

    engine.command_with_token(&["ignore"], 7).unwrap();

    assert_eq!(destroyed.recv_timeout(WAIT), Ok(Ok(())));
    assert!(engine.is_destroyed());
    assert_eq!(engine.set_property_int("volume", 5), Err(MpvError::ContextClosed));
    assert_eq!(engine.command(&["stop"]), Err(MpvError::ContextClosed));
    assert_eq!(engine.init(), Err(MpvError::ContextClosed));
    assert_eq!(engine.destroy(), Ok(()));
}

//! In-process reference engine.
//!
//! Behaves like the native player as far as the boundary can observe:
//! options and typed properties with format conversion, asynchronous
//! commands answered by COMMAND_REPLY, property watches, filtered log
//! messages, and a demux thread per loaded file that pulls bytes through
//! the registered stream protocol. No decoding happens; a file counts as
//! loaded once its first bytes arrive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{NativeBackend, NativeEvent, StreamOpener};
use crate::data_source::{FileDataSource, StreamHandle, DEFAULT_READ_CHUNK_SIZE};
use crate::engine::thumbnail::{Frame, PixelFormat};
use crate::error::MpvError;
use crate::events::{CommandReply, EndFile, EndFileReason, EventId, LogLevel, LogLine, PropertyChange};
use crate::property::{Format, Node};

/// Size of the demuxer's read buffer
const DEMUX_BUFFER_SIZE: usize = 128 * 1024;

/// Size of the synthetic frame served while a file is loaded
const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 180;

/// Options that are not also runtime properties, with their value format.
const OPTIONS: &[(&str, Format)] = &[
    ("config", Format::String),
    ("config-dir", Format::String),
    ("gpu-shader-cache-dir", Format::String),
    ("icc-cache-dir", Format::String),
    ("msg-level", Format::String),
    ("wid", Format::Int64),
    ("script-opts", Format::String),
];

fn option_format(name: &str) -> Option<Format> {
    OPTIONS
        .iter()
        .find(|(option, _)| *option == name)
        .map(|(_, format)| *format)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone)]
struct PropertySlot {
    value: Node,
    access: Access,
}

fn default_properties() -> BTreeMap<String, PropertySlot> {
    let rw = |value| PropertySlot {
        value,
        access: Access::ReadWrite,
    };
    let ro = |value| PropertySlot {
        value,
        access: Access::ReadOnly,
    };
    [
        ("volume", rw(Node::Double(100.0))),
        ("speed", rw(Node::Double(1.0))),
        ("pause", rw(Node::Flag(false))),
        ("hwdec", rw(Node::String("no".into()))),
        ("idle-active", ro(Node::Flag(true))),
        ("eof-reached", ro(Node::None)),
        ("path", ro(Node::None)),
        ("filename", ro(Node::None)),
        ("file-size", ro(Node::None)),
        ("stream-pos", ro(Node::None)),
    ]
    .into_iter()
    .map(|(name, slot)| (name.to_string(), slot))
    .collect()
}

/// Parse `value` into `format`, accepting the string form of any scalar.
fn coerce(value: &Node, format: Format) -> Result<Node, MpvError> {
    match value {
        Node::String(text) if format != Format::String => Node::parse(format, text),
        other => other.convert_to(format),
    }
}

fn change_event(name: &str, format: Format, token: u64, value: &Node) -> NativeEvent {
    let change = match value.convert_to(format) {
        Ok(node) => PropertyChange::from_node(name, format, token, &node),
        Err(_) => PropertyChange::from_node(name, Format::None, token, &Node::None),
    };
    NativeEvent::property(change)
}

// ============================================================================
// EVENT QUEUE
// ============================================================================

#[derive(Default)]
struct QueueState {
    events: VecDeque<NativeEvent>,
    wakeup: bool,
}

#[derive(Default)]
struct EventQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl EventQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: NativeEvent) {
        self.lock().events.push_back(event);
        self.ready.notify_all();
    }

    fn wakeup(&self) {
        self.lock().wakeup = true;
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Option<Duration>) -> NativeEvent {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return event;
            }
            if std::mem::take(&mut state.wakeup) {
                return NativeEvent::none();
            }
            state = match deadline {
                None => self.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return NativeEvent::none();
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

// ============================================================================
// ENGINE STATE
// ============================================================================

#[derive(Debug, Clone)]
struct Watch {
    token: u64,
    name: String,
    format: Format,
}

struct StubState {
    initialized: bool,
    terminated: bool,
    properties: BTreeMap<String, PropertySlot>,
    options: HashMap<String, Node>,
    watches: Vec<Watch>,
    log_level: LogLevel,
    loaded: bool,
}

struct StubShared {
    state: Mutex<StubState>,
    queue: EventQueue,
    protocols: RwLock<HashMap<String, StreamOpener>>,
}

impl StubShared {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, id: EventId, token: u64) {
        self.queue.push(NativeEvent::basic(id, token));
    }

    fn log(&self, level: LogLevel, prefix: &str, text: impl Into<String>) {
        let requested = self.lock().log_level;
        if requested != LogLevel::None && level <= requested {
            self.queue
                .push(NativeEvent::log(LogLine::new(prefix, level, text)));
        }
    }

    fn reply(&self, token: u64, result: Result<(), MpvError>) {
        self.queue
            .push(NativeEvent::command_reply(CommandReply { token, result }));
    }

    /// Store a property value and notify its watchers. Events are queued
    /// under the state lock so watchers see changes in write order.
    fn store(&self, state: &mut StubState, name: &str, value: Node) {
        let Some(slot) = state.properties.get_mut(name) else {
            return;
        };
        if slot.value == value {
            return;
        }
        slot.value = value.clone();
        for watch in state.watches.iter().filter(|watch| watch.name == name) {
            self.queue
                .push(change_event(name, watch.format, watch.token, &value));
        }
    }

    fn set_property(&self, name: &str, value: &Node) -> Result<(), MpvError> {
        let mut state = self.lock();
        let Some(slot) = state.properties.get(name).cloned() else {
            drop(state);
            return self.set_option_value(name, value, MpvError::PropertyNotFound);
        };
        if slot.access == Access::ReadOnly {
            return Err(MpvError::PropertyError);
        }
        let value = coerce(value, slot.value.format())?;
        self.store(&mut state, name, value);
        Ok(())
    }

    fn get_property(&self, name: &str, format: Format) -> Result<Node, MpvError> {
        let state = self.lock();
        if let Some(slot) = state.properties.get(name) {
            return slot.value.convert_to(format);
        }
        if let Some(value) = state.options.get(name) {
            return value.convert_to(format);
        }
        if option_format(name).is_some() {
            return Err(MpvError::PropertyUnavailable);
        }
        Err(MpvError::PropertyNotFound)
    }

    /// Set a pure option. `missing` is returned when `name` is unknown.
    fn set_option_value(&self, name: &str, value: &Node, missing: MpvError) -> Result<(), MpvError> {
        let format = option_format(name).ok_or(missing)?;
        let value = match (format, value) {
            (Format::String, Node::Array(items))
                if items.iter().all(|item| matches!(item, Node::String(_))) =>
            {
                value.clone()
            }
            _ => coerce(value, format).map_err(|_| MpvError::OptionFormat)?,
        };
        self.lock().options.insert(name.to_string(), value);
        Ok(())
    }

    fn open_stream(&self, uri: &str) -> Result<Arc<StreamHandle>, MpvError> {
        let scheme = uri.split_once("://").map(|(scheme, _)| scheme);
        if let Some(scheme) = scheme {
            let opener = self
                .protocols
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(scheme)
                .cloned();
            if let Some(opener) = opener {
                return opener(uri);
            }
        }

        let path = match scheme {
            None => uri,
            Some("file") => &uri["file://".len()..],
            Some(other) => {
                self.log(
                    LogLevel::Error,
                    "stream",
                    format!("No protocol handler found to open URL {} ({})", uri, other),
                );
                return Err(MpvError::LoadingFailed);
            }
        };
        let source = FileDataSource::open(path).map_err(|err| {
            self.log(LogLevel::Error, "stream", format!("Failed to open {}: {}", path, err));
            MpvError::LoadingFailed
        })?;
        Ok(Arc::new(StreamHandle::new(
            uri,
            Box::new(source),
            DEFAULT_READ_CHUNK_SIZE,
        )))
    }
}

// ============================================================================
// PLAYBACK
// ============================================================================

#[derive(Default)]
struct ControlState {
    stop: Option<EndFileReason>,
    stream: Option<Arc<StreamHandle>>,
}

#[derive(Default)]
struct PlaybackControl {
    state: Mutex<ControlState>,
}

impl PlaybackControl {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_stop(&self, reason: EndFileReason) {
        let stream = {
            let mut control = self.lock();
            control.stop.get_or_insert(reason);
            control.stream.clone()
        };
        if let Some(stream) = stream {
            stream.cancel();
        }
    }

    fn attach(&self, stream: Arc<StreamHandle>) {
        let stopping = {
            let mut control = self.lock();
            control.stream = Some(Arc::clone(&stream));
            control.stop.is_some()
        };
        if stopping {
            stream.cancel();
        }
    }

    fn stop_reason(&self) -> Option<EndFileReason> {
        self.lock().stop
    }
}

struct ActivePlayback {
    control: Arc<PlaybackControl>,
    thread: JoinHandle<()>,
}

fn demux(shared: Arc<StubShared>, control: Arc<PlaybackControl>, uri: String) {
    shared.emit(EventId::StartFile, 0);
    shared.log(LogLevel::Info, "cplayer", format!("Playing: {}", uri));

    let (reason, error) = match shared.open_stream(&uri) {
        Ok(stream) => {
            control.attach(Arc::clone(&stream));
            let outcome = pump(&shared, &control, &stream, &uri);
            stream.close();
            outcome
        }
        Err(err) => (EndFileReason::Error, Some(err)),
    };

    {
        let mut state = shared.lock();
        state.loaded = false;
        for name in ["path", "filename", "file-size", "stream-pos"] {
            shared.store(&mut state, name, Node::None);
        }
        shared.store(
            &mut state,
            "eof-reached",
            Node::Flag(reason == EndFileReason::Eof),
        );
        shared.store(&mut state, "idle-active", Node::Flag(true));
    }

    match error {
        Some(err) => shared.log(
            LogLevel::Error,
            "cplayer",
            format!("Playback of {} failed: {}", uri, err),
        ),
        None => shared.log(LogLevel::V, "cplayer", format!("End of file ({:?})", reason)),
    }
    shared.queue.push(NativeEvent::end_file(EndFile {
        reason,
        error,
        token: 0,
    }));
}

/// Read the stream to its end. Returns the END_FILE reason and error.
fn pump(
    shared: &StubShared,
    control: &PlaybackControl,
    stream: &StreamHandle,
    uri: &str,
) -> (EndFileReason, Option<MpvError>) {
    let size = stream.size();
    {
        let mut state = shared.lock();
        let filename = uri.rsplit(['/', ':']).next().unwrap_or(uri).to_string();
        shared.store(&mut state, "path", Node::String(uri.to_string()));
        shared.store(&mut state, "filename", Node::String(filename));
        if size >= 0 {
            shared.store(&mut state, "file-size", Node::Int64(size));
        }
        shared.store(&mut state, "stream-pos", Node::Int64(0));
        shared.store(&mut state, "eof-reached", Node::Flag(false));
        shared.store(&mut state, "idle-active", Node::Flag(false));
    }

    let mut buffer = vec![0u8; DEMUX_BUFFER_SIZE];
    let mut position = 0i64;
    loop {
        let n = stream.read_into(&mut buffer);
        if n > 0 {
            position += n;
            let first = {
                let mut state = shared.lock();
                shared.store(&mut state, "stream-pos", Node::Int64(position));
                !std::mem::replace(&mut state.loaded, true)
            };
            if first {
                shared.emit(EventId::FileLoaded, 0);
                shared.emit(EventId::PlaybackRestart, 0);
            }
            continue;
        }
        if n == 0 {
            return if position == 0 {
                shared.log(LogLevel::Error, "cplayer", "Failed to recognize file format.");
                (EndFileReason::Error, Some(MpvError::UnknownFormat))
            } else {
                (EndFileReason::Eof, None)
            };
        }
        return match control.stop_reason() {
            Some(reason) => (reason, None),
            None if position == 0 => (EndFileReason::Error, Some(MpvError::LoadingFailed)),
            None => (EndFileReason::Error, Some(MpvError::Generic)),
        };
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Command {
    LoadFile { url: String },
    Stop,
    Quit,
    Seek,
    ScriptMessage,
    Ignore,
}

fn parse_command(args: &[&str]) -> Result<Command, MpvError> {
    let (name, rest) = args.split_first().ok_or(MpvError::InvalidParameter)?;
    let command = match (*name, rest) {
        ("loadfile", [url]) | ("loadfile", [url, "replace"]) => Command::LoadFile {
            url: url.to_string(),
        },
        ("stop", []) => Command::Stop,
        ("quit", []) | ("quit", [_]) => Command::Quit,
        ("seek", [target, ..]) if rest.len() <= 2 => {
            target
                .parse::<f64>()
                .map_err(|_| MpvError::InvalidParameter)?;
            Command::Seek
        }
        ("script-message", _) => Command::ScriptMessage,
        ("ignore", []) => Command::Ignore,
        _ => return Err(MpvError::InvalidParameter),
    };
    Ok(command)
}

// ============================================================================
// BACKEND
// ============================================================================

/// In-process engine used by default, by the CLI and by tests.
pub struct StubBackend {
    shared: Arc<StubShared>,
    playback: Mutex<Option<ActivePlayback>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StubShared {
                state: Mutex::new(StubState {
                    initialized: false,
                    terminated: false,
                    properties: default_properties(),
                    options: HashMap::new(),
                    watches: Vec::new(),
                    log_level: LogLevel::None,
                    loaded: false,
                }),
                queue: EventQueue::default(),
                protocols: RwLock::new(HashMap::new()),
            }),
            playback: Mutex::new(None),
        }
    }

    fn ensure_running(&self) -> Result<(), MpvError> {
        let state = self.shared.lock();
        if state.terminated || !state.initialized {
            return Err(MpvError::Uninitialized);
        }
        Ok(())
    }

    fn start_playback(&self, url: String) -> Result<(), MpvError> {
        self.stop_playback(EndFileReason::Stop);

        let control = Arc::new(PlaybackControl::default());
        let shared = Arc::clone(&self.shared);
        let thread_control = Arc::clone(&control);
        let thread = thread::Builder::new()
            .name("mpv-demux".to_string())
            .spawn(move || demux(shared, thread_control, url))
            .map_err(|err| {
                tracing::error!("failed to spawn demux thread: {}", err);
                MpvError::NoMemory
            })?;

        *self.playback.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ActivePlayback { control, thread });
        Ok(())
    }

    /// Stop the current file, if any, and wait for its demux thread.
    fn stop_playback(&self, reason: EndFileReason) -> bool {
        let active = self
            .playback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(active) = active else {
            return false;
        };
        active.control.request_stop(reason);
        if active.thread.join().is_err() {
            tracing::error!("demux thread panicked");
        }
        true
    }

    fn run(&self, command: Command) -> Result<(), MpvError> {
        match command {
            Command::LoadFile { url } => self.start_playback(url),
            Command::Stop => {
                self.stop_playback(EndFileReason::Stop);
                Ok(())
            }
            Command::Quit => {
                self.stop_playback(EndFileReason::Quit);
                Ok(())
            }
            Command::Seek => {
                if !self.shared.lock().loaded {
                    return Err(MpvError::Command);
                }
                self.shared.emit(EventId::Seek, 0);
                self.shared.emit(EventId::PlaybackRestart, 0);
                Ok(())
            }
            Command::ScriptMessage => {
                self.shared.emit(EventId::ClientMessage, 0);
                Ok(())
            }
            Command::Ignore => Ok(()),
        }
    }

    fn synthetic_frame() -> Frame {
        let mut data = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 4) as usize);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                let b = (x * 255 / FRAME_WIDTH) as u8;
                let g = (y * 255 / FRAME_HEIGHT) as u8;
                data.extend_from_slice(&[b, g, 0x40, 0]);
            }
        }
        Frame {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            stride: FRAME_WIDTH as usize * 4,
            format: PixelFormat::Bgr0,
            data,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn initialize(&self) -> Result<(), MpvError> {
        let mut state = self.shared.lock();
        if state.terminated || state.initialized {
            return Err(MpvError::InvalidParameter);
        }
        state.initialized = true;
        drop(state);
        self.shared.log(LogLevel::V, "cplayer", "stub engine initialized");
        Ok(())
    }

    fn set_option(&self, name: &str, value: &Node) -> Result<(), MpvError> {
        if self.shared.lock().properties.contains_key(name) {
            return self.shared.set_property(name, value).map_err(|err| match err {
                MpvError::PropertyFormat => MpvError::OptionFormat,
                MpvError::PropertyError => MpvError::OptionError,
                other => other,
            });
        }
        self.shared
            .set_option_value(name, value, MpvError::OptionNotFound)
    }

    fn command_async(&self, token: u64, args: &[&str]) -> Result<(), MpvError> {
        self.ensure_running()?;
        let command = parse_command(args)?;
        self.shared
            .log(LogLevel::Debug, "cplayer", format!("Run command: {}", args.join(" ")));

        match command {
            // Answered before the new file starts, like the native loadfile.
            Command::LoadFile { .. } => {
                self.shared.reply(token, Ok(()));
                if let Err(err) = self.run(command) {
                    tracing::warn!(code = ?err, "loadfile could not start");
                }
            }
            Command::Quit => {
                let result = self.run(command);
                self.shared.reply(token, result);
                self.shared.emit(EventId::Shutdown, 0);
            }
            other => {
                let result = self.run(other);
                self.shared.reply(token, result);
            }
        }
        Ok(())
    }

    fn get_property(&self, name: &str, format: Format) -> Result<Node, MpvError> {
        self.ensure_running()?;
        self.shared.get_property(name, format)
    }

    fn set_property(&self, name: &str, value: &Node) -> Result<(), MpvError> {
        self.ensure_running()?;
        self.shared.set_property(name, value)
    }

    fn observe_property(&self, token: u64, name: &str, format: Format) -> Result<(), MpvError> {
        if matches!(format, Format::OsdString | Format::ByteArray) {
            return Err(MpvError::InvalidParameter);
        }
        let mut state = self.shared.lock();
        if state.terminated {
            return Err(MpvError::Uninitialized);
        }
        state.watches.push(Watch {
            token,
            name: name.to_string(),
            format,
        });
        let current = state
            .properties
            .get(name)
            .map(|slot| slot.value.clone())
            .unwrap_or(Node::None);
        self.shared
            .queue
            .push(change_event(name, format, token, &current));
        Ok(())
    }

    fn unobserve_property(&self, token: u64) -> Result<(), MpvError> {
        let mut state = self.shared.lock();
        if state.terminated {
            return Err(MpvError::Uninitialized);
        }
        state.watches.retain(|watch| watch.token != token);
        Ok(())
    }

    fn request_log_messages(&self, level: LogLevel) -> Result<(), MpvError> {
        self.shared.lock().log_level = level;
        Ok(())
    }

    fn register_stream_protocol(&self, scheme: &str, opener: StreamOpener) -> Result<(), MpvError> {
        let mut protocols = self
            .shared
            .protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if scheme.is_empty() || protocols.contains_key(scheme) {
            return Err(MpvError::InvalidParameter);
        }
        protocols.insert(scheme.to_string(), opener);
        Ok(())
    }

    fn wait_event(&self, timeout: Option<Duration>) -> NativeEvent {
        self.shared.queue.wait(timeout)
    }

    fn wakeup(&self) {
        self.shared.queue.wakeup();
    }

    fn grab_frame(&self) -> Result<Frame, MpvError> {
        self.ensure_running()?;
        if !self.shared.lock().loaded {
            return Err(MpvError::PropertyUnavailable);
        }
        Ok(Self::synthetic_frame())
    }

    fn terminate(&self) {
        self.stop_playback(EndFileReason::Quit);
        let mut state = self.shared.lock();
        state.terminated = true;
        state.watches.clear();
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.stop_playback(EndFileReason::Quit);
    }
}

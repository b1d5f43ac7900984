//! Backend over the native libmpv client API.
//!
//! Only built with the `libmpv` feature; `build.rs` emits the link
//! directive. Every callback libmpv makes into this module is wrapped in
//! `catch_unwind` so a panic never crosses back into C.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::{NativeBackend, NativeEvent, StreamOpener};
use crate::data_source::StreamHandle;
use crate::engine::thumbnail::Frame;
use crate::error::{check, ErrorCode, MpvError, MpvErrorCodes};
use crate::events::{
    CommandReply, EndFile, EndFileReason, EventId, LogLevel, LogLine, PropertyChange,
};
use crate::property::{Format, Node};

// ============================================================================
// RAW API
// ============================================================================

#[allow(non_camel_case_types)]
mod ffi {
    use std::ffi::{c_char, c_int, c_void};

    #[repr(C)]
    pub struct mpv_handle {
        _private: [u8; 0],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union mpv_node_u {
        pub string: *mut c_char,
        pub flag: c_int,
        pub int64: i64,
        pub double_: f64,
        pub list: *mut mpv_node_list,
        pub ba: *mut mpv_byte_array,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct mpv_node {
        pub u: mpv_node_u,
        pub format: c_int,
    }

    #[repr(C)]
    pub struct mpv_node_list {
        pub num: c_int,
        pub values: *mut mpv_node,
        pub keys: *mut *mut c_char,
    }

    #[repr(C)]
    pub struct mpv_byte_array {
        pub data: *mut c_void,
        pub size: usize,
    }

    #[repr(C)]
    pub struct mpv_event {
        pub event_id: c_int,
        pub error: c_int,
        pub reply_userdata: u64,
        pub data: *mut c_void,
    }

    #[repr(C)]
    pub struct mpv_event_property {
        pub name: *const c_char,
        pub format: c_int,
        pub data: *mut c_void,
    }

    #[repr(C)]
    pub struct mpv_event_log_message {
        pub prefix: *const c_char,
        pub level: *const c_char,
        pub text: *const c_char,
        pub log_level: c_int,
    }

    #[repr(C)]
    pub struct mpv_event_end_file {
        pub reason: c_int,
        pub error: c_int,
        pub playlist_entry_id: i64,
        pub playlist_insert_id: i64,
        pub playlist_insert_num_entries: c_int,
    }

    pub type ReadFn = unsafe extern "C" fn(*mut c_void, *mut c_char, u64) -> i64;
    pub type SeekFn = unsafe extern "C" fn(*mut c_void, i64) -> i64;
    pub type SizeFn = unsafe extern "C" fn(*mut c_void) -> i64;
    pub type CloseFn = unsafe extern "C" fn(*mut c_void);
    pub type CancelFn = unsafe extern "C" fn(*mut c_void);

    #[repr(C)]
    pub struct mpv_stream_cb_info {
        pub cookie: *mut c_void,
        pub read_fn: Option<ReadFn>,
        pub seek_fn: Option<SeekFn>,
        pub size_fn: Option<SizeFn>,
        pub close_fn: Option<CloseFn>,
        pub cancel_fn: Option<CancelFn>,
    }

    pub type OpenFn =
        unsafe extern "C" fn(*mut c_void, *mut c_char, *mut mpv_stream_cb_info) -> c_int;

    extern "C" {
        pub fn mpv_create() -> *mut mpv_handle;
        pub fn mpv_initialize(ctx: *mut mpv_handle) -> c_int;
        pub fn mpv_terminate_destroy(ctx: *mut mpv_handle);
        pub fn mpv_set_option(
            ctx: *mut mpv_handle,
            name: *const c_char,
            format: c_int,
            data: *mut c_void,
        ) -> c_int;
        pub fn mpv_command_async(
            ctx: *mut mpv_handle,
            reply_userdata: u64,
            args: *mut *const c_char,
        ) -> c_int;
        pub fn mpv_command_ret(
            ctx: *mut mpv_handle,
            args: *mut *const c_char,
            result: *mut mpv_node,
        ) -> c_int;
        pub fn mpv_get_property(
            ctx: *mut mpv_handle,
            name: *const c_char,
            format: c_int,
            data: *mut c_void,
        ) -> c_int;
        pub fn mpv_set_property(
            ctx: *mut mpv_handle,
            name: *const c_char,
            format: c_int,
            data: *mut c_void,
        ) -> c_int;
        pub fn mpv_observe_property(
            ctx: *mut mpv_handle,
            reply_userdata: u64,
            name: *const c_char,
            format: c_int,
        ) -> c_int;
        pub fn mpv_unobserve_property(ctx: *mut mpv_handle, registered_reply_userdata: u64)
            -> c_int;
        pub fn mpv_request_log_messages(ctx: *mut mpv_handle, min_level: *const c_char) -> c_int;
        pub fn mpv_wait_event(ctx: *mut mpv_handle, timeout: f64) -> *mut mpv_event;
        pub fn mpv_wakeup(ctx: *mut mpv_handle);
        pub fn mpv_free(data: *mut c_void);
        pub fn mpv_free_node_contents(node: *mut mpv_node);
        pub fn mpv_stream_cb_add_ro(
            ctx: *mut mpv_handle,
            protocol: *const c_char,
            user_data: *mut c_void,
            open_fn: OpenFn,
        ) -> c_int;
    }
}

fn cstring(value: &str) -> Result<CString, MpvError> {
    CString::new(value).map_err(|_| MpvError::InvalidParameter)
}

// ============================================================================
// NODE MARSHALING
// ============================================================================

/// A native node tree built from a [`Node`], together with the storage
/// its pointers refer to. Must outlive the call it is passed to.
struct OwnedNode {
    root: ffi::mpv_node,
    strings: Vec<CString>,
    values: Vec<Vec<ffi::mpv_node>>,
    keys: Vec<Vec<*mut c_char>>,
    lists: Vec<Box<ffi::mpv_node_list>>,
    arrays: Vec<Box<ffi::mpv_byte_array>>,
    bytes: Vec<Vec<u8>>,
}

impl OwnedNode {
    fn new(node: &Node) -> Result<Self, MpvError> {
        let mut owned = OwnedNode {
            root: ffi::mpv_node {
                u: ffi::mpv_node_u { int64: 0 },
                format: Format::None.as_raw(),
            },
            strings: Vec::new(),
            values: Vec::new(),
            keys: Vec::new(),
            lists: Vec::new(),
            arrays: Vec::new(),
            bytes: Vec::new(),
        };
        owned.root = owned.build(node)?;
        Ok(owned)
    }

    fn string(&mut self, value: &str) -> Result<*mut c_char, MpvError> {
        let value = cstring(value)?;
        let ptr = value.as_ptr() as *mut c_char;
        self.strings.push(value);
        Ok(ptr)
    }

    fn list(
        &mut self,
        mut values: Vec<ffi::mpv_node>,
        keys: Option<Vec<*mut c_char>>,
    ) -> *mut ffi::mpv_node_list {
        let mut list = Box::new(ffi::mpv_node_list {
            num: values.len() as c_int,
            values: values.as_mut_ptr(),
            keys: ptr::null_mut(),
        });
        if let Some(mut keys) = keys {
            list.keys = keys.as_mut_ptr();
            self.keys.push(keys);
        }
        self.values.push(values);
        let ptr = &mut *list as *mut ffi::mpv_node_list;
        self.lists.push(list);
        ptr
    }

    fn build(&mut self, node: &Node) -> Result<ffi::mpv_node, MpvError> {
        let (u, format) = match node {
            Node::None => (ffi::mpv_node_u { int64: 0 }, Format::None),
            Node::String(s) => (
                ffi::mpv_node_u {
                    string: self.string(s)?,
                },
                Format::String,
            ),
            Node::Flag(v) => (ffi::mpv_node_u { flag: c_int::from(*v) }, Format::Flag),
            Node::Int64(v) => (ffi::mpv_node_u { int64: *v }, Format::Int64),
            Node::Double(v) => (ffi::mpv_node_u { double_: *v }, Format::Double),
            Node::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.build(item))
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    ffi::mpv_node_u {
                        list: self.list(values, None),
                    },
                    Format::NodeArray,
                )
            }
            Node::Map(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                let mut keys = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    keys.push(self.string(key)?);
                    values.push(self.build(value)?);
                }
                (
                    ffi::mpv_node_u {
                        list: self.list(values, Some(keys)),
                    },
                    Format::NodeMap,
                )
            }
            Node::ByteArray(data) => {
                let mut data = data.clone();
                let mut array = Box::new(ffi::mpv_byte_array {
                    data: data.as_mut_ptr() as *mut c_void,
                    size: data.len(),
                });
                let ptr = &mut *array as *mut ffi::mpv_byte_array;
                self.bytes.push(data);
                self.arrays.push(array);
                (ffi::mpv_node_u { ba: ptr }, Format::ByteArray)
            }
        };
        Ok(ffi::mpv_node {
            u,
            format: format.as_raw(),
        })
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        &mut self.root as *mut ffi::mpv_node as *mut c_void
    }
}

unsafe fn string_from_raw(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// Copy a native node into an owned [`Node`].
unsafe fn node_from_raw(node: &ffi::mpv_node) -> Node {
    match Format::from_raw(node.format) {
        Some(Format::String | Format::OsdString) => Node::String(string_from_raw(node.u.string)),
        Some(Format::Flag) => Node::Flag(node.u.flag != 0),
        Some(Format::Int64) => Node::Int64(node.u.int64),
        Some(Format::Double) => Node::Double(node.u.double_),
        Some(Format::NodeArray) => {
            let list = &*node.u.list;
            Node::Array(
                (0..list.num.max(0) as usize)
                    .map(|i| node_from_raw(&*list.values.add(i)))
                    .collect(),
            )
        }
        Some(Format::NodeMap) => {
            let list = &*node.u.list;
            Node::Map(
                (0..list.num.max(0) as usize)
                    .map(|i| {
                        (
                            string_from_raw(*list.keys.add(i)),
                            node_from_raw(&*list.values.add(i)),
                        )
                    })
                    .collect(),
            )
        }
        Some(Format::ByteArray) => {
            let ba = &*node.u.ba;
            if ba.data.is_null() {
                Node::ByteArray(Vec::new())
            } else {
                Node::ByteArray(std::slice::from_raw_parts(ba.data as *const u8, ba.size).to_vec())
            }
        }
        Some(Format::None | Format::Node) | None => Node::None,
    }
}

/// Read the value behind an event data pointer of the given format.
unsafe fn value_from_raw(format: Format, data: *mut c_void) -> Node {
    if data.is_null() {
        return Node::None;
    }
    match format {
        Format::String | Format::OsdString => {
            Node::String(string_from_raw(*(data as *const *const c_char)))
        }
        Format::Flag => Node::Flag(*(data as *const c_int) != 0),
        Format::Int64 => Node::Int64(*(data as *const i64)),
        Format::Double => Node::Double(*(data as *const f64)),
        Format::Node => node_from_raw(&*(data as *const ffi::mpv_node)),
        _ => Node::None,
    }
}

// ============================================================================
// STREAM CALLBACKS
// ============================================================================

struct Protocol {
    opener: StreamOpener,
}

fn guard<T>(fallback: T, call: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        tracing::error!("panic in stream callback");
        fallback
    })
}

unsafe extern "C" fn stream_open(
    user_data: *mut c_void,
    uri: *mut c_char,
    info: *mut ffi::mpv_stream_cb_info,
) -> c_int {
    guard(MpvErrorCodes::LOADING_FAILED, || {
        let protocol = &*(user_data as *const Protocol);
        let uri = match CStr::from_ptr(uri).to_str() {
            Ok(uri) => uri,
            Err(_) => return MpvErrorCodes::LOADING_FAILED,
        };
        match (protocol.opener)(uri) {
            Ok(handle) => {
                let info = &mut *info;
                info.cookie = Arc::into_raw(handle) as *mut c_void;
                info.read_fn = Some(stream_read);
                info.seek_fn = Some(stream_seek);
                info.size_fn = Some(stream_size);
                info.close_fn = Some(stream_close);
                info.cancel_fn = Some(stream_cancel);
                MpvErrorCodes::SUCCESS
            }
            Err(err) => err.code(),
        }
    })
}

unsafe fn stream<'a>(cookie: *mut c_void) -> &'a StreamHandle {
    &*(cookie as *const StreamHandle)
}

unsafe extern "C" fn stream_read(cookie: *mut c_void, buf: *mut c_char, nbytes: u64) -> i64 {
    guard(-1, || {
        let len = usize::try_from(nbytes).unwrap_or(usize::MAX);
        let buf = std::slice::from_raw_parts_mut(buf as *mut u8, len);
        stream(cookie).read_into(buf)
    })
}

unsafe extern "C" fn stream_seek(cookie: *mut c_void, offset: i64) -> i64 {
    guard(i64::from(MpvErrorCodes::GENERIC), || stream(cookie).seek(offset))
}

unsafe extern "C" fn stream_size(cookie: *mut c_void) -> i64 {
    guard(i64::from(MpvErrorCodes::UNSUPPORTED), || stream(cookie).size())
}

unsafe extern "C" fn stream_cancel(cookie: *mut c_void) {
    guard((), || stream(cookie).cancel())
}

/// Called exactly once per opened stream; releases the cookie.
unsafe extern "C" fn stream_close(cookie: *mut c_void) {
    guard((), || {
        let handle = Arc::from_raw(cookie as *const StreamHandle);
        handle.close();
    })
}

// ============================================================================
// BACKEND
// ============================================================================

struct Context(*mut ffi::mpv_handle);

// libmpv client handles are thread-safe; destruction is serialized by the
// RwLock around `Context`.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

pub struct LibmpvBackend {
    ctx: RwLock<Option<Context>>,
    protocols: Mutex<Vec<Box<Protocol>>>,
}

impl LibmpvBackend {
    pub fn new() -> Result<Self, MpvError> {
        let ctx = unsafe { ffi::mpv_create() };
        if ctx.is_null() {
            tracing::error!("mpv_create returned null");
            return Err(MpvError::NoMemory);
        }
        Ok(Self {
            ctx: RwLock::new(Some(Context(ctx))),
            protocols: Mutex::new(Vec::new()),
        })
    }

    fn with_ctx<T>(
        &self,
        call: impl FnOnce(*mut ffi::mpv_handle) -> Result<T, MpvError>,
    ) -> Result<T, MpvError> {
        let guard = self.ctx.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(ctx) => call(ctx.0),
            None => Err(MpvError::Uninitialized),
        }
    }

    fn convert_event(event: &ffi::mpv_event) -> NativeEvent {
        let Some(id) = EventId::from_raw(event.event_id) else {
            tracing::trace!(raw = event.event_id, "skipping unknown event id");
            return NativeEvent::none();
        };
        let token = event.reply_userdata;
        unsafe {
            match id {
                EventId::LogMessage if !event.data.is_null() => {
                    let msg = &*(event.data as *const ffi::mpv_event_log_message);
                    let prefix = CStr::from_ptr(msg.prefix).to_bytes();
                    let text = CStr::from_ptr(msg.text).to_bytes();
                    match LogLine::from_raw_bytes(prefix, msg.log_level, text) {
                        Some(line) => NativeEvent::log(line),
                        None => NativeEvent::basic(EventId::LogMessage, token),
                    }
                }
                EventId::PropertyChange if !event.data.is_null() => {
                    let prop = &*(event.data as *const ffi::mpv_event_property);
                    let format = Format::from_raw(prop.format).unwrap_or(Format::None);
                    let value = value_from_raw(format, prop.data);
                    let name = string_from_raw(prop.name);
                    NativeEvent::property(PropertyChange::from_node(name, format, token, &value))
                }
                EventId::EndFile if !event.data.is_null() => {
                    let end = &*(event.data as *const ffi::mpv_event_end_file);
                    let reason = EndFileReason::from_raw(end.reason).unwrap_or(EndFileReason::Error);
                    let error = if reason == EndFileReason::Error {
                        MpvError::from_code(end.error)
                    } else {
                        None
                    };
                    NativeEvent::end_file(EndFile {
                        reason,
                        error,
                        token,
                    })
                }
                EventId::CommandReply => NativeEvent::command_reply(CommandReply {
                    token,
                    result: check(event.error),
                }),
                other => NativeEvent::basic(other, token),
            }
        }
    }
}

impl NativeBackend for LibmpvBackend {
    fn name(&self) -> &'static str {
        "libmpv"
    }

    fn initialize(&self) -> Result<(), MpvError> {
        self.with_ctx(|ctx| check(unsafe { ffi::mpv_initialize(ctx) }))
    }

    fn set_option(&self, name: &str, value: &Node) -> Result<(), MpvError> {
        let name = cstring(name)?;
        let mut node = OwnedNode::new(value)?;
        self.with_ctx(|ctx| {
            check(unsafe {
                ffi::mpv_set_option(ctx, name.as_ptr(), Format::Node.as_raw(), node.as_mut_ptr())
            })
        })
    }

    fn command_async(&self, token: u64, args: &[&str]) -> Result<(), MpvError> {
        let owned = args
            .iter()
            .map(|arg| cstring(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut argv: Vec<*const c_char> = owned.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(ptr::null());
        self.with_ctx(|ctx| check(unsafe { ffi::mpv_command_async(ctx, token, argv.as_mut_ptr()) }))
    }

    fn get_property(&self, name: &str, format: Format) -> Result<Node, MpvError> {
        let name = cstring(name)?;
        self.with_ctx(|ctx| unsafe {
            if matches!(format, Format::String | Format::OsdString) {
                let mut out: *mut c_char = ptr::null_mut();
                check(ffi::mpv_get_property(
                    ctx,
                    name.as_ptr(),
                    format.as_raw(),
                    &mut out as *mut *mut c_char as *mut c_void,
                ))?;
                let value = string_from_raw(out);
                ffi::mpv_free(out as *mut c_void);
                return Ok(Node::String(value));
            }
            let mut out = ffi::mpv_node {
                u: ffi::mpv_node_u { int64: 0 },
                format: Format::None.as_raw(),
            };
            check(ffi::mpv_get_property(
                ctx,
                name.as_ptr(),
                Format::Node.as_raw(),
                &mut out as *mut ffi::mpv_node as *mut c_void,
            ))?;
            let node = node_from_raw(&out);
            ffi::mpv_free_node_contents(&mut out);
            node.convert_to(format)
        })
    }

    fn set_property(&self, name: &str, value: &Node) -> Result<(), MpvError> {
        let name = cstring(name)?;
        let mut node = OwnedNode::new(value)?;
        self.with_ctx(|ctx| {
            check(unsafe {
                ffi::mpv_set_property(ctx, name.as_ptr(), Format::Node.as_raw(), node.as_mut_ptr())
            })
        })
    }

    fn observe_property(&self, token: u64, name: &str, format: Format) -> Result<(), MpvError> {
        let name = cstring(name)?;
        self.with_ctx(|ctx| {
            check(unsafe { ffi::mpv_observe_property(ctx, token, name.as_ptr(), format.as_raw()) })
        })
    }

    fn unobserve_property(&self, token: u64) -> Result<(), MpvError> {
        // Returns the number of removed watches on success.
        self.with_ctx(|ctx| check(unsafe { ffi::mpv_unobserve_property(ctx, token) }))
    }

    fn request_log_messages(&self, level: LogLevel) -> Result<(), MpvError> {
        let level = cstring(level.as_str())?;
        self.with_ctx(|ctx| check(unsafe { ffi::mpv_request_log_messages(ctx, level.as_ptr()) }))
    }

    fn register_stream_protocol(&self, scheme: &str, opener: StreamOpener) -> Result<(), MpvError> {
        let scheme = cstring(scheme)?;
        let protocol = Box::new(Protocol { opener });
        let user_data = &*protocol as *const Protocol as *mut c_void;
        self.with_ctx(|ctx| {
            check(unsafe { ffi::mpv_stream_cb_add_ro(ctx, scheme.as_ptr(), user_data, stream_open) })
        })?;
        self.protocols
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(protocol);
        Ok(())
    }

    fn wait_event(&self, timeout: Option<Duration>) -> NativeEvent {
        let timeout = timeout.map_or(-1.0, |t| t.as_secs_f64());
        self.with_ctx(|ctx| {
            let event = unsafe { ffi::mpv_wait_event(ctx, timeout) };
            if event.is_null() {
                return Ok(NativeEvent::none());
            }
            Ok(Self::convert_event(unsafe { &*event }))
        })
        .unwrap_or_else(|_| NativeEvent::basic(EventId::Shutdown, 0))
    }

    fn wakeup(&self) {
        let _ = self.with_ctx(|ctx| {
            unsafe { ffi::mpv_wakeup(ctx) };
            Ok(())
        });
    }

    fn grab_frame(&self) -> Result<Frame, MpvError> {
        let args = [cstring("screenshot-raw")?, cstring("video")?];
        let mut argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(ptr::null());
        self.with_ctx(|ctx| unsafe {
            let mut out = ffi::mpv_node {
                u: ffi::mpv_node_u { int64: 0 },
                format: Format::None.as_raw(),
            };
            check(ffi::mpv_command_ret(ctx, argv.as_mut_ptr(), &mut out))?;
            let node = node_from_raw(&out);
            ffi::mpv_free_node_contents(&mut out);
            Frame::from_node(&node)
        })
    }

    fn terminate(&self) {
        let ctx = self
            .ctx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ctx) = ctx {
            unsafe { ffi::mpv_terminate_destroy(ctx.0) };
        }
    }
}

impl Drop for LibmpvBackend {
    fn drop(&mut self) {
        self.terminate();
    }
}

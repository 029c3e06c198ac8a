//! `libtdjson` engine loaded with `libloading`.

use std::ffi::{CStr, CString, c_char, c_double, c_void};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::time::Duration;

use libloading::{Library, Symbol};
use serde_json::json;

use super::Engine;
use crate::error::{BridgeResult, LockResultExt};

const LOG_TARGET: &str = "tdbridge::engine::tdjson";

/// TDLib's default log file size before rotation (10 MB).
const DEFAULT_LOG_MAX_FILE_SIZE: i64 = 10 * 1024 * 1024;

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type SendFn = unsafe extern "C" fn(*mut c_void, *const c_char);
type ReceiveFn = unsafe extern "C" fn(*mut c_void, c_double) -> *const c_char;
type ExecuteFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> *const c_char;

/// Platform file name of the TDLib JSON library.
pub fn default_library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "tdjson.dll"
    } else if cfg!(target_os = "macos") {
        "libtdjson.dylib"
    } else {
        "libtdjson.so"
    }
}

/// Handle to a `td_json_client` instance.
pub struct TdJsonHandle(NonNull<c_void>);

// SAFETY: TDLib JSON clients may be used from any thread; the bridge never
// issues two receives on one client concurrently.
unsafe impl Send for TdJsonHandle {}
unsafe impl Sync for TdJsonHandle {}

/// Where the engine log currently goes, so the size limit can be re-applied.
struct LogStreamState {
    path: Option<String>,
    max_file_size: i64,
}

/// Engine backed by the `td_json_client_*` C interface.
pub struct TdJson {
    create_fn: CreateFn,
    destroy_fn: DestroyFn,
    send_fn: SendFn,
    receive_fn: ReceiveFn,
    execute_fn: ExecuteFn,
    log_stream: Mutex<LogStreamState>,
    /// Keeps the function pointers above valid
    _library: Library,
}

impl TdJson {
    /// Load `libtdjson` from an explicit path or a bare library name resolved
    /// by the platform loader.
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        log::debug!(target: LOG_TARGET, "Loading TDLib from {}", path.display());

        let library = unsafe { Library::new(path)? };

        let create_fn = Self::symbol::<CreateFn>(&library, "td_json_client_create")?;
        let destroy_fn = Self::symbol::<DestroyFn>(&library, "td_json_client_destroy")?;
        let send_fn = Self::symbol::<SendFn>(&library, "td_json_client_send")?;
        let receive_fn = Self::symbol::<ReceiveFn>(&library, "td_json_client_receive")?;
        let execute_fn = Self::symbol::<ExecuteFn>(&library, "td_json_client_execute")?;

        Ok(Self {
            create_fn,
            destroy_fn,
            send_fn,
            receive_fn,
            execute_fn,
            log_stream: Mutex::new(LogStreamState {
                path: None,
                max_file_size: DEFAULT_LOG_MAX_FILE_SIZE,
            }),
            _library: library,
        })
    }

    /// Load the library by its platform default name.
    pub fn load_default() -> BridgeResult<Self> {
        Self::load(default_library_name())
    }

    fn symbol<T: Copy>(library: &Library, name: &str) -> BridgeResult<T> {
        let symbol: Symbol<T> = unsafe { library.get(name.as_bytes())? };
        Ok(*symbol)
    }

    /// Copy a string returned by TDLib. The pointer is only valid until the
    /// next receive/execute on this thread, so it is copied immediately.
    fn copy_result(ptr: *const c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        let text = unsafe { CStr::from_ptr(ptr) };
        Some(text.to_string_lossy().into_owned())
    }

    fn request_cstring(request: &str) -> Option<CString> {
        match CString::new(request) {
            Ok(c) => Some(c),
            Err(e) => {
                log::error!(
                    target: LOG_TARGET,
                    "Dropping request containing a NUL byte at {}",
                    e.nul_position()
                );
                None
            }
        }
    }

    /// Execute a log configuration request, returning whether TDLib accepted it.
    fn execute_log_request(&self, request: serde_json::Value) -> bool {
        let response = self.execute(None, &request.to_string());
        match response.as_deref().map(serde_json::from_str::<serde_json::Value>) {
            Some(Ok(value)) => value.get("@type").and_then(|t| t.as_str()) == Some("ok"),
            _ => false,
        }
    }

    fn apply_log_stream(&self, state: &LogStreamState) -> bool {
        let stream = match &state.path {
            Some(path) => json!({
                "@type": "logStreamFile",
                "path": path,
                "max_file_size": state.max_file_size,
                "redirect_stderr": false,
            }),
            None => json!({ "@type": "logStreamDefault" }),
        };
        self.execute_log_request(json!({ "@type": "setLogStream", "log_stream": stream }))
    }
}

impl Engine for TdJson {
    type Handle = TdJsonHandle;

    fn create(&self) -> Option<TdJsonHandle> {
        let raw = unsafe { (self.create_fn)() };
        NonNull::new(raw).map(TdJsonHandle)
    }

    fn destroy(&self, handle: TdJsonHandle) {
        unsafe { (self.destroy_fn)(handle.0.as_ptr()) }
    }

    fn send(&self, handle: &TdJsonHandle, request: &str) {
        if let Some(request) = Self::request_cstring(request) {
            unsafe { (self.send_fn)(handle.0.as_ptr(), request.as_ptr()) }
        }
    }

    fn receive(&self, handle: &TdJsonHandle, timeout: Duration) -> Option<String> {
        let ptr = unsafe { (self.receive_fn)(handle.0.as_ptr(), timeout.as_secs_f64()) };
        Self::copy_result(ptr)
    }

    fn execute(&self, handle: Option<&TdJsonHandle>, request: &str) -> Option<String> {
        let request = Self::request_cstring(request)?;
        let client = handle.map_or(std::ptr::null_mut(), |h| h.0.as_ptr());
        let ptr = unsafe { (self.execute_fn)(client, request.as_ptr()) };
        Self::copy_result(ptr)
    }

    fn set_log_verbosity_level(&self, level: i32) {
        let accepted = self.execute_log_request(json!({
            "@type": "setLogVerbosityLevel",
            "new_verbosity_level": level,
        }));
        if !accepted {
            log::warn!(target: LOG_TARGET, "TDLib rejected log verbosity level {}", level);
        }
    }

    fn set_log_file_path(&self, path: &str) -> bool {
        let mut state = self.log_stream.lock().recover_poison("TdJson::set_log_file_path");
        let previous = state.path.take();
        state.path = (!path.is_empty()).then(|| path.to_string());
        let accepted = self.apply_log_stream(&state);
        if !accepted {
            state.path = previous;
        }
        accepted
    }

    fn set_log_max_file_size(&self, max_file_size: i64) {
        let mut state = self
            .log_stream
            .lock()
            .recover_poison("TdJson::set_log_max_file_size");
        state.max_file_size = max_file_size.max(1);
        if state.path.is_some() && !self.apply_log_stream(&state) {
            log::warn!(
                target: LOG_TARGET,
                "TDLib rejected log max file size {}",
                max_file_size
            );
        }
    }
}

impl std::fmt::Debug for TdJson {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdJson").finish_non_exhaustive()
    }
}

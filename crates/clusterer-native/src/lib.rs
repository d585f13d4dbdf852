//! Native clusterer library loaded by the host-side bridge.
//!
//! Exports the `initialize` / `destruct` handshake the installer drives, plus
//! a C ABI over named [`ClusterRegistry`] entries that the script runtime
//! bindings call. Every query requires an installed context.
//!
//! Conventions shared by all exports:
//! - strings in are NUL-terminated UTF-8, strings out are JSON and must be
//!   released with `clusterer_free_string`;
//! - failures return `-1` or null and record a message readable through
//!   `clusterer_last_error` on the same thread;
//! - panics never cross the boundary.

mod clusterer_ffi;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, Once, OnceLock, PoisonError};

use clusterer_engine::config::DEFAULT_LOG_FILTER;
use clusterer_engine::{ClusterError, ClusterRegistry, ConfigError, NativeConfig, NATIVE_ABI_VERSION};
use tracing_subscriber::EnvFilter;

pub use clusterer_ffi::*;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub(crate) enum NativeError {
    #[error("not initialized")]
    NotInitialized,

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("panicked during {function}: {message}")]
    Panic { function: String, message: String },
}

impl NativeError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Installed context + registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct InstalledContext {
    pub handle: i64,
    pub base_dir: PathBuf,
    pub config: NativeConfig,
}

fn installed() -> MutexGuard<'static, Option<InstalledContext>> {
    static INSTALLED: OnceLock<Mutex<Option<InstalledContext>>> = OnceLock::new();
    INSTALLED
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn registry() -> &'static ClusterRegistry {
    static REGISTRY: OnceLock<ClusterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ClusterRegistry::new)
}

/// Snapshot of the installed context, or `NotInitialized`.
pub(crate) fn require_installed() -> Result<InstalledContext, NativeError> {
    installed().clone().ok_or(NativeError::NotInitialized)
}

/// Handle and base directory of the installed context, if any.
pub fn installed_context() -> Option<(i64, PathBuf)> {
    installed()
        .as_ref()
        .map(|ctx| (ctx.handle, ctx.base_dir.clone()))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the fmt subscriber once per process. A host that already set a
/// global subscriber keeps it.
fn init_tracing(filter: &str) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Thread-local error
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<String>> = const { std::cell::RefCell::new(None) };
}

pub(crate) fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
}

/// Take the last error message recorded on this thread, or null.
/// The caller must free it with `clusterer_free_string`.
#[no_mangle]
pub extern "C" fn clusterer_last_error() -> *mut c_char {
    LAST_ERROR.with(|e| match e.borrow_mut().take() {
        Some(msg) => string_to_c(msg),
        None => std::ptr::null_mut(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a C string pointer to a `&str`. Returns `None` if null or invalid UTF-8.
pub(crate) unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Like [`cstr_to_str`] but reports which argument was bad.
pub(crate) unsafe fn required_str<'a>(
    ptr: *const c_char,
    name: &'static str,
) -> Result<&'a str, NativeError> {
    if ptr.is_null() {
        return Err(NativeError::invalid(name, "null pointer"));
    }
    cstr_to_str(ptr).ok_or_else(|| NativeError::invalid(name, "not valid UTF-8"))
}

pub(crate) fn string_to_c(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Run `f` with panics caught, recording any failure as the last error.
pub(crate) fn guarded<T>(function: &str, f: impl FnOnce() -> Result<T, NativeError>) -> Option<T> {
    let result = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        Err(NativeError::Panic {
            function: function.into(),
            message,
        })
    });

    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(function, error = %e, "native call failed");
            set_last_error(e.to_string());
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// ABI version of this library's exports.
#[no_mangle]
pub extern "C" fn clusterer_abi_version() -> u32 {
    NATIVE_ABI_VERSION
}

/// Bind the clusterer into the script runtime behind `handle`.
///
/// Reads `<base_dir>/clusterer.json` if present and installs logging. A zero
/// handle, a bad `base_dir` or a malformed config leaves the library
/// uninstalled with the reason in `clusterer_last_error`. A repeated call for
/// the installed handle is ignored; a different handle replaces the installed
/// context and drops the clusterers loaded under it.
///
/// # Safety
/// `base_dir` must be a valid NUL-terminated C string or null.
#[no_mangle]
pub unsafe extern "C" fn initialize(handle: i64, base_dir: *const c_char) {
    guarded("initialize", || {
        if handle == 0 {
            return Err(NativeError::invalid("handle", "script runtime context is 0"));
        }
        let base_dir = PathBuf::from(required_str(base_dir, "base_dir")?);
        install(handle, &base_dir)
    });
}

fn install(handle: i64, base_dir: &Path) -> Result<(), NativeError> {
    let mut slot = installed();
    if let Some(current) = slot.as_ref() {
        if current.handle == handle {
            tracing::debug!(handle, "already initialized for this context; ignoring");
            return Ok(());
        }
    }

    let config = NativeConfig::load_from_dir(base_dir);
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = match &config {
        Ok(config) => config.effective_log_filter(rust_log.as_deref()),
        Err(_) => NativeConfig::default().effective_log_filter(rust_log.as_deref()),
    };
    init_tracing(&filter);

    let config = config.inspect_err(|e| {
        tracing::warn!(path = %base_dir.display(), error = %e, "refusing to initialize");
    })?;

    if let Some(previous) = slot.take() {
        // Clusterers belong to the runtime they were loaded from.
        registry().clear();
        tracing::warn!(
            previous = previous.handle,
            handle,
            "rebinding clusterer to a new script runtime"
        );
    }

    *slot = Some(InstalledContext {
        handle,
        base_dir: base_dir.to_path_buf(),
        config,
    });
    tracing::info!(handle, path = %base_dir.display(), "clusterer initialized");
    Ok(())
}

/// Drop every loaded clusterer and forget the installed context. No-op when
/// not installed.
#[no_mangle]
pub extern "C" fn destruct() {
    guarded("destruct", || {
        let Some(ctx) = installed().take() else {
            tracing::debug!("destruct without initialize; nothing to release");
            return Ok(());
        };
        registry().clear();
        tracing::info!(handle = ctx.handle, "clusterer destructed");
        Ok(())
    });
}

// ---------------------------------------------------------------------------
// Memory management
// ---------------------------------------------------------------------------

/// Free a string previously returned by a `clusterer_*` function.
///
/// # Safety
/// `ptr` must have been allocated by `CString::into_raw()` from this library,
/// or be null (in which case this is a no-op).
#[no_mangle]
pub unsafe extern "C" fn clusterer_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

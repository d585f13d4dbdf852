//! Host-side install handshake with the native clusterer library.
//!
//! The host hands over an opaque script-runtime context handle and a
//! writable base directory. [`NativeBridgeInstaller`] loads the native
//! library once, checks its ABI version, and calls its `initialize` entry
//! point, which binds the clusterer functions into the script runtime.
//! `teardown` calls `destruct` when the hosting module goes away.
//!
//! ```text
//! Uninstalled --install--> Installed --teardown--> Destroyed
//!                              ^                        |
//!                              +--------install---------+
//! ```
//!
//! A second `install` while installed never reaches native `initialize`.

#[cfg(feature = "dylib")]
pub mod dylib;
pub mod module;

use std::num::NonZeroI64;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// ABI version this crate expects from `clusterer_abi_version`.
pub const NATIVE_ABI_VERSION: u32 = 1;

/// Errors from installing or tearing down the native bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("script runtime context is unavailable (handle is 0)")]
    ContextUnavailable,

    #[error("invalid base directory {path}: {reason}")]
    InvalidBaseDir { path: PathBuf, reason: String },

    #[cfg(feature = "dylib")]
    #[error("failed to load library at {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("native library '{name}' not found in any of {searched:?}")]
    LibraryNotFound { name: String, searched: Vec<PathBuf> },

    #[error("required symbol '{symbol}' not found in {path}")]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error("native library does not export clusterer_abi_version")]
    AbiVersionMissing,

    #[error("native ABI version {found} does not match expected {expected}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("native library unavailable after an earlier failure: {reason}")]
    Unavailable { reason: String },

    #[error("already installed with context handle {handle:#x}")]
    AlreadyInstalled { handle: i64 },

    #[error("native library panicked during {function}: {message}")]
    Panic { function: String, message: String },
}

/// Run `f`, turning a panic into [`BridgeError::Panic`].
pub(crate) fn catch_native<T>(function: &str, f: impl FnOnce() -> T) -> Result<T, BridgeError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        BridgeError::Panic {
            function: function.into(),
            message,
        }
    })
}

// ---------------------------------------------------------------------------
// Context handle + base directory
// ---------------------------------------------------------------------------

/// Non-zero opaque script-runtime context handle.
///
/// The host passes `0` when no script runtime is attached (for example under
/// a remote debugger), which [`ContextHandle::new`] rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(NonZeroI64);

impl ContextHandle {
    pub fn new(raw: i64) -> Option<Self> {
        NonZeroI64::new(raw).map(Self)
    }

    pub fn get(self) -> i64 {
        self.0.get()
    }
}

/// Checks run on the base directory before touching the native library.
pub type DirValidator = fn(&Path) -> Result<(), BridgeError>;

/// The path must be absolute and name an existing, writable directory.
pub fn validate_base_dir(path: &Path) -> Result<(), BridgeError> {
    let invalid = |reason: &str| BridgeError::InvalidBaseDir {
        path: path.to_path_buf(),
        reason: reason.into(),
    };

    if path.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }
    if !path.is_absolute() {
        return Err(invalid("path is not absolute"));
    }
    let meta = std::fs::metadata(path).map_err(|e| invalid(&e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory"));
    }
    if meta.permissions().readonly() {
        return Err(invalid("directory is read-only"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The entry points exported by the native library.
pub trait NativeEntryPoints: Send + Sync {
    /// Value of `clusterer_abi_version`, or `None` if the library doesn't
    /// export it.
    fn abi_version(&self) -> Option<u32>;

    fn initialize(&self, handle: ContextHandle, base_dir: &Path) -> Result<(), BridgeError>;

    fn destruct(&self) -> Result<(), BridgeError>;
}

/// Produces the native entry points. Called at most once per installer.
pub trait LibraryLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn NativeEntryPoints>, BridgeError>;
}

// ---------------------------------------------------------------------------
// NativeBridgeInstaller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Uninstalled,
    Installed {
        handle: ContextHandle,
        base_dir: PathBuf,
    },
    Destroyed,
}

/// Drives the install/teardown lifecycle for one hosting module instance.
pub struct NativeBridgeInstaller {
    loader: Arc<dyn LibraryLoader>,
    require_abi_version: bool,
    validate_dir: DirValidator,
    native: Option<Arc<dyn NativeEntryPoints>>,
    load_failure: Option<String>,
    state: InstallState,
}

impl NativeBridgeInstaller {
    pub fn new(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            loader,
            require_abi_version: false,
            validate_dir: validate_base_dir,
            native: None,
            load_failure: None,
            state: InstallState::Uninstalled,
        }
    }

    /// Installer backed by [`dylib::DylibLoader`].
    #[cfg(feature = "dylib")]
    pub fn from_config(config: &crate::config::BridgeConfig) -> Self {
        Self::new(Arc::new(dylib::DylibLoader::new(config.clone())))
            .require_abi_version(config.require_abi_version)
    }

    /// Fail install when the library doesn't report an ABI version.
    pub fn require_abi_version(mut self, required: bool) -> Self {
        self.require_abi_version = required;
        self
    }

    /// Replace the base directory check.
    pub fn with_dir_validator(mut self, validate: DirValidator) -> Self {
        self.validate_dir = validate;
        self
    }

    pub fn state(&self) -> &InstallState {
        &self.state
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.state, InstallState::Installed { .. })
    }

    /// Load the native library if needed and bind it to `handle`.
    ///
    /// Repeating an install with the same handle and directory is a no-op.
    /// A different context while installed fails with
    /// [`BridgeError::AlreadyInstalled`]; tear down first.
    pub fn install(&mut self, handle: i64, base_dir: &Path) -> Result<(), BridgeError> {
        let Some(handle) = ContextHandle::new(handle) else {
            tracing::warn!("script runtime context unavailable; native bindings not installed");
            return Err(BridgeError::ContextUnavailable);
        };

        if let InstallState::Installed {
            handle: current,
            base_dir: current_dir,
        } = &self.state
        {
            if *current == handle && current_dir == base_dir {
                tracing::warn!(
                    handle = handle.get(),
                    "native bridge already installed; ignoring repeated install"
                );
                return Ok(());
            }
            return Err(BridgeError::AlreadyInstalled {
                handle: current.get(),
            });
        }

        (self.validate_dir)(base_dir)?;

        let native = self.native()?;
        catch_native("initialize", || native.initialize(handle, base_dir))??;

        self.state = InstallState::Installed {
            handle,
            base_dir: base_dir.to_path_buf(),
        };
        tracing::info!(
            handle = handle.get(),
            path = %base_dir.display(),
            "native bridge installed"
        );
        Ok(())
    }

    /// Release native state for the installed context. No-op unless
    /// installed.
    pub fn teardown(&mut self) {
        if !self.is_installed() {
            tracing::debug!(state = ?self.state, "teardown without install; nothing to release");
            return;
        }
        self.state = InstallState::Destroyed;

        let Some(native) = self.native.as_ref() else {
            return;
        };
        match catch_native("destruct", || native.destruct()) {
            Ok(Ok(())) => tracing::info!("native bridge torn down"),
            Ok(Err(e)) | Err(e) => tracing::warn!(error = %e, "native destruct failed"),
        }
    }

    /// The loaded entry points, loading and ABI-checking on first use.
    ///
    /// A failed load is remembered: later calls return
    /// [`BridgeError::Unavailable`] without asking the loader again.
    fn native(&mut self) -> Result<Arc<dyn NativeEntryPoints>, BridgeError> {
        if let Some(native) = &self.native {
            return Ok(Arc::clone(native));
        }
        if let Some(reason) = &self.load_failure {
            return Err(BridgeError::Unavailable {
                reason: reason.clone(),
            });
        }

        match self.load_checked() {
            Ok(native) => {
                self.native = Some(Arc::clone(&native));
                Ok(native)
            }
            Err(e) => {
                tracing::warn!(error = %e, "native library unavailable");
                self.load_failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn load_checked(&self) -> Result<Arc<dyn NativeEntryPoints>, BridgeError> {
        let native = self.loader.load()?;
        match native.abi_version() {
            Some(found) if found != NATIVE_ABI_VERSION => Err(BridgeError::AbiMismatch {
                expected: NATIVE_ABI_VERSION,
                found,
            }),
            None if self.require_abi_version => Err(BridgeError::AbiVersionMissing),
            None => {
                tracing::debug!("native library has no ABI version export; accepting");
                Ok(native)
            }
            Some(_) => Ok(native),
        }
    }
}

impl std::fmt::Debug for NativeBridgeInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBridgeInstaller")
            .field("state", &self.state)
            .field("loaded", &self.native.is_some())
            .field("load_failure", &self.load_failure)
            .field("require_abi_version", &self.require_abi_version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Observed native calls, shared between a loader and its entry points.
    #[derive(Default)]
    pub struct Calls {
        pub loads: AtomicUsize,
        pub initialized: Mutex<Vec<(i64, PathBuf)>>,
        pub destructs: AtomicUsize,
    }

    impl Calls {
        pub fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        pub fn destructs(&self) -> usize {
            self.destructs.load(Ordering::SeqCst)
        }

        pub fn initialized(&self) -> Vec<(i64, PathBuf)> {
            self.initialized.lock().clone()
        }
    }

    #[derive(Clone, Copy, Default)]
    pub enum InitBehavior {
        #[default]
        Succeed,
        Fail,
        Panic,
    }

    pub struct CountingNative {
        calls: Arc<Calls>,
        abi: Option<u32>,
        init: InitBehavior,
    }

    impl NativeEntryPoints for CountingNative {
        fn abi_version(&self) -> Option<u32> {
            self.abi
        }

        fn initialize(&self, handle: ContextHandle, base_dir: &Path) -> Result<(), BridgeError> {
            match self.init {
                InitBehavior::Succeed => {
                    self.calls
                        .initialized
                        .lock()
                        .push((handle.get(), base_dir.to_path_buf()));
                    Ok(())
                }
                InitBehavior::Fail => Err(BridgeError::InvalidBaseDir {
                    path: base_dir.to_path_buf(),
                    reason: "rejected by native".into(),
                }),
                InitBehavior::Panic => panic!("initialize exploded"),
            }
        }

        fn destruct(&self) -> Result<(), BridgeError> {
            self.calls.destructs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct CountingLoader {
        pub calls: Arc<Calls>,
        pub abi: Option<u32>,
        pub init: InitBehavior,
        pub fail: bool,
    }

    impl CountingLoader {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(Calls::default()),
                abi: Some(NATIVE_ABI_VERSION),
                init: InitBehavior::Succeed,
                fail: false,
            }
        }

        pub fn into_installer(self) -> (NativeBridgeInstaller, Arc<Calls>) {
            let calls = Arc::clone(&self.calls);
            let installer =
                NativeBridgeInstaller::new(Arc::new(self)).with_dir_validator(|_| Ok(()));
            (installer, calls)
        }
    }

    impl LibraryLoader for CountingLoader {
        fn load(&self) -> Result<Arc<dyn NativeEntryPoints>, BridgeError> {
            self.calls.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BridgeError::LibraryNotFound {
                    name: "clusterer_native".into(),
                    searched: vec![],
                });
            }
            Ok(Arc::new(CountingNative {
                calls: Arc::clone(&self.calls),
                abi: self.abi,
                init: self.init,
            }))
        }
    }
}

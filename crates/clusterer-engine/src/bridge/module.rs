//! Host registration surface: the `Clusterer` module and its package.
//!
//! A host that hosts script modules asks a [`Package`] for its native
//! modules and view managers, then drives each [`NativeModule`] through its
//! lifecycle callbacks. The clusterer contributes one module and no view
//! managers.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{BridgeError, InstallState, LibraryLoader, NativeBridgeInstaller};

/// A host-managed native module.
pub trait NativeModule: Send + Sync {
    /// Name scripts use to look the module up.
    fn name(&self) -> &'static str;

    /// Called once when the host creates the module.
    fn initialize(&self) {}

    /// Called when the host destroys the module instance.
    fn invalidate(&self) {}
}

/// A host-managed native view. The clusterer registers none.
pub trait ViewManager: Send + Sync {
    fn name(&self) -> &'static str;
}

/// A bundle of modules and view managers registered with the host together.
pub trait Package {
    fn create_native_modules(&self) -> Vec<Box<dyn NativeModule>>;

    fn create_view_managers(&self) -> Vec<Box<dyn ViewManager>>;
}

/// The `Clusterer` native module.
///
/// Owns the install lifecycle for one module instance; [`invalidate`]
/// tears the native bindings down.
///
/// [`invalidate`]: NativeModule::invalidate
pub struct ClustererModule {
    installer: Mutex<NativeBridgeInstaller>,
}

impl ClustererModule {
    pub const NAME: &'static str = "Clusterer";

    pub fn new(installer: NativeBridgeInstaller) -> Self {
        Self {
            installer: Mutex::new(installer),
        }
    }

    /// Install the native bindings into the script runtime behind `handle`.
    ///
    /// Returns `false` instead of an error; the host treats clustering as
    /// unavailable in that case.
    pub fn install_lib(&self, handle: i64, base_dir: &Path) -> bool {
        match self.installer.lock().install(handle, base_dir) {
            Ok(()) => true,
            Err(BridgeError::ContextUnavailable) => false,
            Err(e) => {
                tracing::warn!(
                    path = %base_dir.display(),
                    error = %e,
                    "failed to install clusterer native bindings"
                );
                false
            }
        }
    }

    pub fn state(&self) -> InstallState {
        self.installer.lock().state().clone()
    }
}

impl NativeModule for ClustererModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn invalidate(&self) {
        self.installer.lock().teardown();
    }
}

impl std::fmt::Debug for ClustererModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("ClustererModule");
        match self.installer.try_lock() {
            Some(installer) => out.field("installer", &*installer),
            None => out.field("installer", &format_args!("<locked>")),
        };
        out.finish()
    }
}

/// Registers [`ClustererModule`] with the host.
#[derive(Clone)]
pub struct ClustererPackage {
    loader: Arc<dyn LibraryLoader>,
    require_abi_version: bool,
}

impl ClustererPackage {
    pub fn new(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            loader,
            require_abi_version: false,
        }
    }

    /// Package whose modules load the native library described by `config`.
    #[cfg(feature = "dylib")]
    pub fn from_config(config: &crate::config::BridgeConfig) -> Self {
        Self {
            loader: Arc::new(super::dylib::DylibLoader::new(config.clone())),
            require_abi_version: config.require_abi_version,
        }
    }

    pub fn require_abi_version(mut self, required: bool) -> Self {
        self.require_abi_version = required;
        self
    }

    /// A fresh module with its own installer over the shared loader.
    pub fn create_module(&self) -> ClustererModule {
        let installer = NativeBridgeInstaller::new(Arc::clone(&self.loader))
            .require_abi_version(self.require_abi_version);
        ClustererModule::new(installer)
    }
}

impl Package for ClustererPackage {
    fn create_native_modules(&self) -> Vec<Box<dyn NativeModule>> {
        vec![Box::new(self.create_module())]
    }

    fn create_view_managers(&self) -> Vec<Box<dyn ViewManager>> {
        Vec::new()
    }
}

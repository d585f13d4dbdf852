//! Native entry points backed by a shared library loaded with `libloading`.
//!
//! # C ABI contract
//!
//! The library must export:
//!
//! - `initialize(handle: i64, base_dir: *const c_char)`: binds the clusterer
//!   into the script runtime behind `handle`. `base_dir` is NUL-terminated UTF-8.
//! - `destruct()`: releases everything `initialize` set up.
//!
//! and may export `clusterer_abi_version() -> u32`.
//!
//! Libraries are opened at most once per process: [`DylibLoader`] keeps a
//! process-wide cache keyed by the resolved path, and loaded libraries are
//! never unloaded.

use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::{catch_native, BridgeError, ContextHandle, LibraryLoader, NativeEntryPoints};
use crate::config::BridgeConfig;

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type InitializeFn = unsafe extern "C" fn(i64, *const c_char);
type DestructFn = unsafe extern "C" fn();

/// A loaded native clusterer library.
///
/// Function pointers are resolved once at load time and stay valid because
/// the library is owned alongside them.
pub struct DylibEntryPoints {
    _library: libloading::Library,
    path: PathBuf,
    abi_version_fn: Option<AbiVersionFn>,
    initialize_fn: InitializeFn,
    destruct_fn: DestructFn,
}

// Safety: libloading::Library is Send + Sync and the cached items are plain
// function pointers.
unsafe impl Send for DylibEntryPoints {}
unsafe impl Sync for DylibEntryPoints {}

impl DylibEntryPoints {
    /// Open the library at `path` and resolve its entry points.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let library =
            unsafe { libloading::Library::new(path) }.map_err(|e| BridgeError::LoadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        let initialize_fn = Self::load_symbol::<InitializeFn>(&library, path, "initialize")?;
        let destruct_fn = Self::load_symbol::<DestructFn>(&library, path, "destruct")?;
        let abi_version_fn = Self::try_load_symbol::<AbiVersionFn>(&library, "clusterer_abi_version");

        Ok(Self {
            _library: library,
            path: path.to_path_buf(),
            abi_version_fn,
            initialize_fn,
            destruct_fn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_symbol<T: Copy>(
        library: &libloading::Library,
        path: &Path,
        name: &str,
    ) -> Result<T, BridgeError> {
        unsafe { library.get::<T>(name.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|_| BridgeError::SymbolNotFound {
                path: path.to_path_buf(),
                symbol: name.to_string(),
            })
    }

    fn try_load_symbol<T: Copy>(library: &libloading::Library, name: &str) -> Option<T> {
        unsafe { library.get::<T>(name.as_bytes()) }
            .map(|sym| *sym)
            .ok()
    }
}

impl NativeEntryPoints for DylibEntryPoints {
    fn abi_version(&self) -> Option<u32> {
        let f = self.abi_version_fn?;
        match catch_native("clusterer_abi_version", || unsafe { f() }) {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ABI version query failed");
                None
            }
        }
    }

    fn initialize(&self, handle: ContextHandle, base_dir: &Path) -> Result<(), BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidBaseDir {
            path: base_dir.to_path_buf(),
            reason: reason.into(),
        };
        let dir = base_dir.to_str().ok_or_else(|| invalid("path is not valid UTF-8"))?;
        let dir = CString::new(dir).map_err(|_| invalid("path contains a NUL byte"))?;

        let initialize_fn = self.initialize_fn;
        catch_native("initialize", || unsafe {
            initialize_fn(handle.get(), dir.as_ptr())
        })
    }

    fn destruct(&self) -> Result<(), BridgeError> {
        let destruct_fn = self.destruct_fn;
        catch_native("destruct", || unsafe { destruct_fn() })
    }
}

impl std::fmt::Debug for DylibEntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DylibEntryPoints")
            .field("path", &self.path)
            .field("has_abi_version", &self.abi_version_fn.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

fn library_cache() -> &'static Mutex<HashMap<PathBuf, Arc<DylibEntryPoints>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<DylibEntryPoints>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// `libclusterer_native.so`, `clusterer_native.dll`, `libclusterer_native.dylib`.
pub fn platform_file_name(stem: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        stem,
        std::env::consts::DLL_SUFFIX
    )
}

/// Resolves and opens the native library described by a [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct DylibLoader {
    config: BridgeConfig,
}

impl DylibLoader {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Paths tried in order. An explicit `library_path` is the only
    /// candidate; with no search paths the bare file name is handed to the
    /// system loader.
    pub fn candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.config.library_path {
            return vec![path.clone()];
        }
        let file_name = platform_file_name(&self.config.library_name);
        if self.config.search_paths.is_empty() {
            return vec![PathBuf::from(file_name)];
        }
        self.config
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .collect()
    }

    fn resolve(&self) -> Result<PathBuf, BridgeError> {
        if self.config.library_path.is_some() || self.config.search_paths.is_empty() {
            // Let the loader report what's wrong with an explicit or system path.
            return Ok(self.candidates().remove(0));
        }

        let candidates = self.candidates();
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(BridgeError::LibraryNotFound {
                name: platform_file_name(&self.config.library_name),
                searched: self.config.search_paths.clone(),
            }),
        }
    }
}

impl LibraryLoader for DylibLoader {
    fn load(&self) -> Result<Arc<dyn NativeEntryPoints>, BridgeError> {
        let path = self.resolve()?;

        let mut cache = library_cache().lock();
        if let Some(loaded) = cache.get(&path) {
            tracing::debug!(path = %path.display(), "reusing loaded native library");
            return Ok(Arc::clone(loaded) as Arc<dyn NativeEntryPoints>);
        }

        let loaded = Arc::new(DylibEntryPoints::open(&path)?);
        cache.insert(path.clone(), Arc::clone(&loaded));
        tracing::info!(path = %path.display(), "native library loaded");
        Ok(loaded)
    }
}

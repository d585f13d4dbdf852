//! Configuration for the host-side bridge and the native library.
//!
//! [`BridgeConfig`] tells the installer where to find the native library.
//! [`NativeConfig`] is read by the native library itself from
//! `<base_dir>/clusterer.json` during `initialize`.
//!
//! # Example
//!
//! ```json
//! {
//!   "logFilter": "clusterer=debug",
//!   "defaultOptions": { "radius": 60, "maxZoom": 18 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::types::ClusterOptions;

/// Explicit native library file; overrides the name + search path lookup.
pub const LIBRARY_PATH_ENV: &str = "CLUSTERER_LIBRARY_PATH";
/// `1` / `true` makes the `clusterer_abi_version` export mandatory.
pub const REQUIRE_ABI_ENV: &str = "CLUSTERER_REQUIRE_ABI";
/// File name of [`NativeConfig`] inside the install base directory.
pub const NATIVE_CONFIG_FILE: &str = "clusterer.json";
/// Log filter when neither `RUST_LOG` nor `logFilter` is set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Where and how the installer loads the native library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Library stem without platform prefix or extension.
    pub library_name: String,
    /// Exact library file. Takes precedence over `library_name`.
    pub library_path: Option<PathBuf>,
    /// Directories searched in order. Empty means the system loader path.
    pub search_paths: Vec<PathBuf>,
    /// Reject libraries that don't export `clusterer_abi_version`.
    pub require_abi_version: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            library_name: "clusterer_native".into(),
            library_path: None,
            search_paths: Vec::new(),
            require_abi_version: false,
        }
    }
}

impl BridgeConfig {
    /// Defaults overlaid with `CLUSTERER_LIBRARY_PATH` and
    /// `CLUSTERER_REQUIRE_ABI` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Read a JSON config file, then overlay the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_json(path)?;
        config.overlay_env(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn overlay_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = lookup(LIBRARY_PATH_ENV).filter(|v| !v.is_empty()) {
            self.library_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(REQUIRE_ABI_ENV) {
            self.require_abi_version = parse_flag(REQUIRE_ABI_ENV, &raw)?;
        }
        Ok(self)
    }
}

/// Settings the native library reads from the install base directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Options for `clusterer_load` calls that pass none.
    pub default_options: ClusterOptions,
}

impl NativeConfig {
    /// Load `<base_dir>/clusterer.json`. A missing file yields defaults; an
    /// unreadable or malformed one, or invalid default options, is an error.
    pub fn load_from_dir(base_dir: &Path) -> Result<Self, ConfigError> {
        let path = base_dir.join(NATIVE_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let config: Self = read_json(&path)?;
        config.default_options.validate()?;
        Ok(config)
    }

    /// `rust_log` if set and non-empty, else `log_filter`, else `"info"`.
    pub fn effective_log_filter(&self, rust_log: Option<&str>) -> String {
        rust_log
            .filter(|v| !v.trim().is_empty())
            .or(self.log_filter.as_deref())
            .unwrap_or(DEFAULT_LOG_FILTER)
            .to_string()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Env {
            key: key.into(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn bridge_defaults() {
        let config: BridgeConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.library_name, "clusterer_native");
        assert!(!config.require_abi_version);
    }

    #[test]
    fn bridge_camel_case_fields() {
        let config: BridgeConfig = serde_json::from_value(json!({
            "libraryName": "custom",
            "searchPaths": ["/opt/lib"],
            "requireAbiVersion": true
        }))
        .unwrap();
        assert_eq!(config.library_name, "custom");
        assert_eq!(config.search_paths, vec![PathBuf::from("/opt/lib")]);
        assert!(config.require_abi_version);
    }

    #[test]
    fn env_overrides_library_path_and_abi_flag() {
        let config = BridgeConfig::default()
            .overlay_env(env(&[
                (LIBRARY_PATH_ENV, "/tmp/libclusterer_native.so"),
                (REQUIRE_ABI_ENV, "TRUE"),
            ]))
            .unwrap();
        assert_eq!(
            config.library_path,
            Some(PathBuf::from("/tmp/libclusterer_native.so"))
        );
        assert!(config.require_abi_version);
    }

    #[test]
    fn empty_library_path_is_ignored() {
        let config = BridgeConfig::default()
            .overlay_env(env(&[(LIBRARY_PATH_ENV, "")]))
            .unwrap();
        assert!(config.library_path.is_none());
    }

    #[test]
    fn bad_abi_flag_is_an_error() {
        let err = BridgeConfig::default()
            .overlay_env(env(&[(REQUIRE_ABI_ENV, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == REQUIRE_ABI_ENV));
    }

    /// Tests that read or set the `CLUSTERER_*` process variables.
    static PROCESS_ENV: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn clear_process_env() {
        std::env::remove_var(LIBRARY_PATH_ENV);
        std::env::remove_var(REQUIRE_ABI_ENV);
    }

    #[test]
    fn bridge_from_file() {
        let _env = PROCESS_ENV.lock().unwrap_or_else(|e| e.into_inner());
        clear_process_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(
            &path,
            r#"{"libraryName": "from_file", "searchPaths": ["/opt/lib"]}"#,
        )
        .unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.library_name, "from_file");
        assert_eq!(config.search_paths, vec![PathBuf::from("/opt/lib")]);
        assert!(config.library_path.is_none());

        let err = BridgeConfig::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn process_environment_overrides_defaults_and_file() {
        let _env = PROCESS_ENV.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, r#"{"libraryPath": "/opt/old.so"}"#).unwrap();

        std::env::set_var(LIBRARY_PATH_ENV, "/opt/env/libclusterer_native.so");
        std::env::set_var(REQUIRE_ABI_ENV, "1");
        let from_env = BridgeConfig::from_env();
        let from_file = BridgeConfig::from_file(&path);
        std::env::set_var(REQUIRE_ABI_ENV, "sometimes");
        let bad_flag = BridgeConfig::from_env();
        clear_process_env();

        let from_env = from_env.unwrap();
        assert_eq!(
            from_env.library_path,
            Some(PathBuf::from("/opt/env/libclusterer_native.so"))
        );
        assert!(from_env.require_abi_version);
        assert_eq!(from_env.library_name, "clusterer_native");

        let from_file = from_file.unwrap();
        assert_eq!(
            from_file.library_path,
            Some(PathBuf::from("/opt/env/libclusterer_native.so"))
        );
        assert!(from_file.require_abi_version);

        assert!(matches!(bad_flag, Err(ConfigError::Env { .. })));
        assert_eq!(BridgeConfig::from_env().unwrap(), BridgeConfig::default());
    }

    #[test]
    fn native_config_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = NativeConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config, NativeConfig::default());
    }

    #[test]
    fn native_config_reads_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(NATIVE_CONFIG_FILE),
            r#"{"logFilter": "debug", "defaultOptions": {"radius": 60}}"#,
        )
        .unwrap();

        let config = NativeConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.default_options.radius, 60);
        assert_eq!(config.default_options.max_zoom, 16);
    }

    #[test]
    fn native_config_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NATIVE_CONFIG_FILE), "{not json").unwrap();

        let err = NativeConfig::load_from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn native_config_invalid_options_are_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(NATIVE_CONFIG_FILE),
            r#"{"defaultOptions": {"minZoom": 10, "maxZoom": 2}}"#,
        )
        .unwrap();

        let err = NativeConfig::load_from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Options(_)));
    }

    #[test]
    fn log_filter_priority() {
        let config = NativeConfig {
            log_filter: Some("warn".into()),
            ..NativeConfig::default()
        };
        assert_eq!(config.effective_log_filter(Some("trace")), "trace");
        assert_eq!(config.effective_log_filter(Some("  ")), "warn");
        assert_eq!(config.effective_log_filter(None), "warn");
        assert_eq!(NativeConfig::default().effective_log_filter(None), "info");
    }
}

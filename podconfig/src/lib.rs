//! # podplay Configuration Module
//!
//! This module provides configuration management for podplay, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use podconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config()?;
//!
//! // Access configuration values
//! let buffer_ms = config.get_playback_buffer_ms()?;
//! let user_agent = config.get_user_agent()?;
//!
//! // Update configuration values
//! config.set_playback_buffer_ms(750)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("podplay.yaml");

lazy_static! {
    static ref CONFIG: std::result::Result<Arc<Config>, String> = Config::load_config("")
        .map(Arc::new)
        .map_err(|e| format!("{e:#}"));
}

pub const ENV_CONFIG_DIR: &str = "PODPLAY_CONFIG";
pub const ENV_PREFIX: &str = "PODPLAY_CONFIG__";
const DEFAULT_DIR_NAME: &str = ".podplay";

// Default values for configuration
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_REDIRECTS: usize = 10;
const DEFAULT_CHANNEL_SIZE: usize = 16;
const DEFAULT_CHUNK_DURATION_MS: usize = 50;
const DEFAULT_PLAYBACK_BUFFER_MS: usize = 500;
const DEFAULT_VOLUME: f64 = 1.0;
const DEFAULT_LOG_MIN_LEVEL: &str = "warn";

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => Ok(n.as_u64().unwrap_or_default() as usize),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => Ok(n.as_u64().unwrap_or($default)),
                Ok(Value::String(s)) => match s.parse::<u64>() {
                    Ok(v) => Ok(v),
                    Err(_) => {
                        tracing::warn!(
                            "Invalid value '{}' for {}, using default {}",
                            s,
                            $path.join("."),
                            $default
                        );
                        Ok($default)
                    }
                },
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for podplay
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// # Examples
///
/// ```no_run
/// use podconfig::Config;
///
/// let config = Config::load_config("/tmp/podplay")?;
/// let channel_size = config.get_channel_size()?;
/// println!("Pipeline channel size: {}", channel_size);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

// Implémentation manuelle de Clone
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.lock_data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(DEFAULT_DIR_NAME).exists() {
            return DEFAULT_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            return home.join(DEFAULT_DIR_NAME).to_string_lossy().to_string();
        }

        // Default fallback
        DEFAULT_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        // Create if doesn't exist
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        // Verify it's a directory
        if !path.is_dir() {
            return Err(anyhow!(
                "Config path {} is not a directory",
                path.display()
            ));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PODPLAY_CONFIG` environment variable
    /// 3. `.podplay` in the current directory
    /// 4. `.podplay` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for write permission.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Un fichier vide se désérialise en Null : on garde alors les valeurs par défaut
        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        if !external_value.is_null() {
            merge_yaml(&mut default_value, &external_value);
        }
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    fn lock_data(&self) -> MutexGuard<'_, Value> {
        // Un panic pendant une écriture ne rend pas l'arbre YAML incohérent
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the directory holding `config.yaml`
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock_data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["playback", "buffer_ms"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock_data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Deserializes a whole configuration subtree into a typed structure
    ///
    /// ```no_run
    /// # use podconfig::Config;
    /// #[derive(serde::Deserialize)]
    /// struct Playback { buffer_ms: u64, device: String }
    ///
    /// let config = Config::load_config("/tmp/podplay")?;
    /// let playback: Playback = config.get_section(&["playback"])?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn get_section<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let value = self.get_value(path)?;
        serde_yaml::from_value(value)
            .map_err(|e| anyhow!("Invalid configuration section {}: {}", path.join("."), e))
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        let new_key = Value::String(s.to_lowercase());
                        let new_val = Self::lower_keys_value(v);
                        new_map.insert(new_key, new_val);
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// User-Agent sent with every HTTP request
    ///
    /// An empty value falls back to [`podutils::default_user_agent`].
    pub fn get_user_agent(&self) -> Result<String> {
        match self.get_value(&["http", "user_agent"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            _ => Ok(podutils::default_user_agent()),
        }
    }

    pub fn set_user_agent(&self, user_agent: String) -> Result<()> {
        self.set_value(&["http", "user_agent"], Value::String(user_agent))
    }

    impl_u64_config!(
        get_connect_timeout_ms,
        set_connect_timeout_ms,
        &["http", "connect_timeout_ms"],
        DEFAULT_CONNECT_TIMEOUT_MS
    );

    impl_u64_config!(
        get_read_timeout_ms,
        set_read_timeout_ms,
        &["http", "read_timeout_ms"],
        DEFAULT_READ_TIMEOUT_MS
    );

    impl_usize_config!(
        get_max_redirects,
        set_max_redirects,
        &["http", "max_redirects"],
        DEFAULT_MAX_REDIRECTS
    );

    impl_usize_config!(
        get_channel_size,
        set_channel_size,
        &["pipeline", "channel_size"],
        DEFAULT_CHANNEL_SIZE
    );

    impl_usize_config!(
        get_chunk_duration_ms,
        set_chunk_duration_ms,
        &["pipeline", "chunk_duration_ms"],
        DEFAULT_CHUNK_DURATION_MS
    );

    impl_usize_config!(
        get_playback_buffer_ms,
        set_playback_buffer_ms,
        &["playback", "buffer_ms"],
        DEFAULT_PLAYBACK_BUFFER_MS
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL.to_string()
    );

    /// Nom du périphérique de sortie, `None` pour le périphérique par défaut
    pub fn get_playback_device(&self) -> Result<Option<String>> {
        match self.get_value(&["playback", "device"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    pub fn set_playback_device(&self, device: Option<String>) -> Result<()> {
        self.set_value(
            &["playback", "device"],
            Value::String(device.unwrap_or_default()),
        )
    }

    /// Volume linéaire appliqué en sortie, borné à `0.0..=1.0`
    pub fn get_playback_volume(&self) -> Result<f32> {
        let volume = match self.get_value(&["playback", "volume"]) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(DEFAULT_VOLUME),
            _ => DEFAULT_VOLUME,
        };
        Ok(volume.clamp(0.0, 1.0) as f32)
    }

    pub fn set_playback_volume(&self, volume: f32) -> Result<()> {
        let n = Number::from(f64::from(volume.clamp(0.0, 1.0)));
        self.set_value(&["playback", "volume"], Value::Number(n))
    }
}

/// Returns the global configuration instance
///
/// The instance is lazily loaded on first access from the directory found by
/// [`Config::config_dir`]. A load failure is reported on every call.
///
/// # Examples
///
/// ```no_run
/// use podconfig::get_config;
///
/// let config = get_config()?;
/// let level = config.get_log_min_level()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_config() -> Result<Arc<Config>> {
    match &*CONFIG {
        Ok(config) => Ok(config.clone()),
        Err(message) => Err(anyhow!("Failed to load podplay configuration: {}", message)),
    }
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_scalars_and_keeps_missing_keys() {
        let mut default: Value =
            serde_yaml::from_str("playback:\n  buffer_ms: 500\n  device: \"\"\n").unwrap();
        let external: Value = serde_yaml::from_str("playback:\n  buffer_ms: 900\n").unwrap();

        merge_yaml(&mut default, &external);

        assert_eq!(
            Config::get_value_internal(&default, &["playback", "buffer_ms"]).unwrap(),
            Value::Number(Number::from(900))
        );
        assert_eq!(
            Config::get_value_internal(&default, &["playback", "device"]).unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn keys_are_lowercased_recursively() {
        let value: Value = serde_yaml::from_str("HTTP:\n  User_Agent: test\n").unwrap();
        let lowered = Config::lower_keys_value(value);
        assert_eq!(
            Config::get_value_internal(&lowered, &["http", "user_agent"]).unwrap(),
            Value::String("test".into())
        );
    }

    #[test]
    fn env_values_are_parsed_as_yaml() {
        assert_eq!(
            Config::convert_env_value("42"),
            Value::Number(Number::from(42))
        );
        assert_eq!(Config::convert_env_value("true"), Value::Bool(true));
        assert_eq!(
            Config::convert_env_value("hw:0,0"),
            Value::String("hw:0,0".into())
        );
    }

    #[test]
    fn embedded_defaults_parse() {
        let value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(Config::get_value_internal(&value, &["playback", "buffer_ms"]).is_ok());
        assert!(Config::get_value_internal(&value, &["http", "max_redirects"]).is_ok());
    }
}

//! # Luciole Configuration Module
//!
//! This module provides configuration management for Luciole, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use lucconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let name = config.get_server_name();
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("luciole.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load Luciole configuration"));
}

const ENV_CONFIG_DIR: &str = "LUCIOLE_CONFIG";
const ENV_PREFIX: &str = "LUCIOLE_CONFIG__";

const DEFAULT_HTTP_PORT: u16 = 3689;
const DEFAULT_SERVER_NAME: &str = "Luciole";
const DEFAULT_DB_PATH: &str = "songs.db";

/// Configuration manager for Luciole
///
/// Holds the merged YAML document (embedded defaults + external file +
/// environment overrides) behind a mutex, and exposes typed getters for the
/// handful of values the server needs.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".luciole").exists() {
            return ".luciole".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".luciole");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".luciole".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("Config path is not a directory"));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Loads the configuration from the specified directory
    ///
    /// The directory is searched in order: the `directory` argument, the
    /// `LUCIOLE_CONFIG` environment variable, `.luciole` in the current
    /// directory, then `.luciole` in the home directory. The external
    /// `config.yaml` is merged over the embedded defaults, then environment
    /// overrides are applied.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&config_dir))?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            let external: Value = serde_yaml::from_slice(&data)?;
            merge_yaml(&mut merged, &external);
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
        }

        Self::apply_env_overrides(&mut merged);

        Ok(Config {
            config_dir,
            path,
            data: Mutex::new(merged),
        })
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().map_err(|_| anyhow!("Config lock poisoned"))?;
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Gets a configuration value at the specified path
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["server", "http_port"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().map_err(|_| anyhow!("Config lock poisoned"))?;
        let mut current = &*data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                if let Some(next) = map.get(Value::String(key.to_string())) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Sets a configuration value at the specified path (in memory)
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().map_err(|_| anyhow!("Config lock poisoned"))?;
        Self::set_value_internal(&mut data, path, value)
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = Value::String(path[0].to_string());
            if path.len() == 1 {
                map.insert(key, value);
            } else {
                let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = serde_yaml::from_str::<Value>(&value)
                    .unwrap_or(Value::String(value.clone()));
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn get_string(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    // ---- Typed getters ----

    /// Nom annoncé du serveur (bannière DAAP et service mDNS)
    pub fn get_server_name(&self) -> String {
        self.get_string(&["server", "name"], DEFAULT_SERVER_NAME)
    }

    /// Port HTTP/DAAP
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["server", "http_port"]) {
            Ok(Value::Number(n)) => n.as_u64().map(|p| p as u16).unwrap_or(DEFAULT_HTTP_PORT),
            _ => DEFAULT_HTTP_PORT,
        }
    }

    /// Mot de passe de lecture, `None` si vide
    pub fn get_password(&self) -> Option<String> {
        let p = self.get_string(&["server", "password"], "");
        if p.is_empty() { None } else { Some(p) }
    }

    /// Chemin du catalogue SQLite, résolu relativement au répertoire de config
    pub fn get_db_path(&self) -> String {
        let raw = self.get_string(&["library", "db_path"], DEFAULT_DB_PATH);
        let path = Path::new(&raw);
        if path.is_absolute() {
            raw
        } else {
            Path::new(&self.config_dir)
                .join(path)
                .to_string_lossy()
                .to_string()
        }
    }

    /// Nom du fichier de pochette, `None` si non configuré
    pub fn get_art_filename(&self) -> Option<String> {
        let f = self.get_string(&["library", "art_filename"], "");
        if f.is_empty() { None } else { Some(f) }
    }

    /// Types de codec transcodés en WAV côté serveur
    pub fn get_transcode_codecs(&self) -> Vec<String> {
        match self.get_value(&["transcode", "codecs"]) {
            Ok(Value::Sequence(seq)) => seq
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Ligne de commande du transcodeur, `None` si non configurée
    pub fn get_transcode_command(&self) -> Option<String> {
        let c = self.get_string(&["transcode", "command"], "");
        if c.is_empty() { None } else { Some(c) }
    }

    /// Nom d'hôte mDNS annoncé (repli sur le nom du serveur)
    pub fn get_mdns_hostname(&self) -> String {
        let h = self.get_string(&["mdns", "hostname"], "");
        if h.is_empty() { self.get_server_name() } else { h }
    }
}

/// Merge récursif de deux documents YAML (l'overlay gagne)
fn merge_yaml(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(k) {
                    Some(base_v) => merge_yaml(base_v, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Retourne la configuration globale (singleton)
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

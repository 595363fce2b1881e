/*
 *  config.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Configuration document: defaults, file, CLI overrides, sanitising,
 *  validation and locked persistence
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::errors::ConfigError;
use crate::file_lock;
use crate::plugins::PluginKind;

/// Free-form key/value settings of one plugin.
pub type PluginSettings = Map<String, Value>;

pub const HARDWARE_MAPPINGS: [&str; 3] = ["regular", "adafruit-hat", "adafruit-hat-pwm"];
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 10;
pub const CYCLE_DURATION_RANGE: (u64, u64) = (10, 3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matrix: MatrixConfig,
    pub defaults: DefaultsConfig,
    pub api_keys: BTreeMap<String, String>,
    pub plugins: PluginsConfig,
    pub current_state: CurrentState,
    pub plugin_cycle: PluginCycle,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub rows: u32,
    pub cols: u32,
    pub chain_length: u32,
    pub parallel: u32,
    pub brightness: u8,
    pub hardware_mapping: String,
    pub gpio_slowdown: u32,
}

impl MatrixConfig {
    /// Pixel width of the whole chain.
    pub fn width(&self) -> u32 {
        self.cols * self.chain_length.max(1)
    }

    pub fn height(&self) -> u32 {
        self.rows * self.parallel.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub fps: u32,
    pub scroll_speed: u32,
    /// hard cap on a single plugin refresh
    pub fetch_timeout_secs: u64,
    /// wait before retrying a refresh that failed with a transient error
    pub fetch_retry_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub enabled: Vec<String>,
    pub default: String,
    pub settings: BTreeMap<String, PluginSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentState {
    #[serde(alias = "current_plugin")]
    pub active_plugin: String,
    #[serde(alias = "current_gif")]
    pub active_gif: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginCycle {
    pub enabled: bool,
    pub plugins: Vec<String>,
    /// seconds each plugin stays on screen
    pub duration: u64,
    /// epoch seconds of the last rotation
    pub last_switch: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub bind: String,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            rows: 32,
            cols: 32,
            chain_length: 1,
            parallel: 1,
            brightness: 70,
            hardware_mapping: "adafruit-hat".to_string(),
            gpio_slowdown: 2,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self { fps: 30, scroll_speed: 20, fetch_timeout_secs: 10, fetch_retry_secs: 60 }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: ["clock", "weather", "prayer", "gif", "moon"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default: "clock".to_string(),
            settings: default_plugin_settings(),
        }
    }
}

impl Default for CurrentState {
    fn default() -> Self {
        Self { active_plugin: "clock".to_string(), active_gif: String::new() }
    }
}

impl Default for PluginCycle {
    fn default() -> Self {
        Self { enabled: false, plugins: Vec::new(), duration: 30, last_switch: 0 }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8081".to_string() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matrix: MatrixConfig::default(),
            defaults: DefaultsConfig::default(),
            api_keys: BTreeMap::new(),
            plugins: PluginsConfig::default(),
            current_state: CurrentState::default(),
            plugin_cycle: PluginCycle::default(),
            remote: RemoteConfig::default(),
        }
    }
}

fn as_map(v: Value) -> PluginSettings {
    match v {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

pub fn default_plugin_settings() -> BTreeMap<String, PluginSettings> {
    let mut s = BTreeMap::new();
    s.insert("clock".into(), as_map(json!({ "show_seconds": false, "format_24h": true })));
    s.insert(
        "weather".into(),
        as_map(json!({ "update_interval": 3600, "city_id": 4791160, "units": "imperial" })),
    );
    s.insert(
        "prayer".into(),
        as_map(json!({
            "latitude": 38.903481,
            "longitude": -77.262817,
            "method": 1,
            "update_interval": 14400
        })),
    );
    s.insert(
        "gif".into(),
        as_map(json!({
            "directory": "resources/images/gifs",
            "current_gif": "matrix",
            "show_clock": true
        })),
    );
    s.insert("moon".into(), as_map(json!({ "show_text": true })));
    s.insert("intro".into(), as_map(json!({ "display_time": 10 })));
    s.insert(
        "stock".into(),
        as_map(json!({
            "symbols": ["AAPL", "MSFT", "AMZN"],
            "update_interval": 900,
            "rotation_interval": 4
        })),
    );
    s.insert(
        "wmata".into(),
        as_map(json!({
            "stations": ["K04", "C01"],
            "update_interval": 30,
            "max_trains": 3,
            "display_mode": "alternating"
        })),
    );
    s
}

impl Config {
    /// Settings a plugin is activated with: its own section plus the values
    /// other sections feed into it (shared API keys, the selected GIF).
    pub fn effective_settings(&self, plugin: &str) -> PluginSettings {
        let mut settings = self.plugins.settings.get(plugin).cloned().unwrap_or_default();

        if let Some(service) = PluginKind::from_name(plugin).and_then(|k| k.api_service()) {
            let has_key = settings
                .get("api_key")
                .and_then(Value::as_str)
                .is_some_and(|k| !k.trim().is_empty());
            if !has_key {
                if let Some(key) = self.api_keys.get(service).filter(|k| !k.trim().is_empty()) {
                    settings.insert("api_key".into(), Value::String(key.clone()));
                }
            }
        }

        if plugin == "gif" && !self.current_state.active_gif.is_empty() {
            settings.insert(
                "current_gif".into(),
                Value::String(self.current_state.active_gif.clone()),
            );
        }
        settings
    }

    /// Directory the GIF library lives in.
    pub fn gif_directory(&self) -> PathBuf {
        self.plugins
            .settings
            .get("gif")
            .and_then(|s| s.get("directory"))
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("resources/images/gifs"))
    }

    pub fn is_enabled(&self, plugin: &str) -> bool {
        self.plugins.enabled.iter().any(|p| p == plugin)
    }

    /// Repair values that would otherwise fail validation. Returns a note
    /// for every change made.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut notes = Vec::new();
        let m = &mut self.matrix;

        clamp_u32(&mut m.rows, 8, 128, "matrix.rows", &mut notes);
        clamp_u32(&mut m.cols, 8, 256, "matrix.cols", &mut notes);
        clamp_u32(&mut m.chain_length, 1, 8, "matrix.chain_length", &mut notes);
        clamp_u32(&mut m.parallel, 1, 3, "matrix.parallel", &mut notes);
        clamp_u32(&mut m.gpio_slowdown, 0, 10, "matrix.gpio_slowdown", &mut notes);
        if !(1..=100).contains(&m.brightness) {
            let b = m.brightness.clamp(1, 100);
            notes.push(format!("matrix.brightness {} -> {}", m.brightness, b));
            m.brightness = b;
        }
        if !HARDWARE_MAPPINGS.contains(&m.hardware_mapping.as_str()) {
            notes.push(format!("matrix.hardware_mapping '{}' -> 'adafruit-hat'", m.hardware_mapping));
            m.hardware_mapping = "adafruit-hat".to_string();
        }
        clamp_u32(&mut self.defaults.fps, 1, 60, "defaults.fps", &mut notes);
        if self.defaults.fetch_timeout_secs == 0 {
            notes.push("defaults.fetch_timeout_secs 0 -> 10".to_string());
            self.defaults.fetch_timeout_secs = 10;
        }

        let mut enabled: Vec<String> = Vec::new();
        for name in self.plugins.enabled.drain(..) {
            if PluginKind::from_name(&name).is_none() {
                notes.push(format!("dropped unknown plugin '{name}'"));
            } else if !enabled.contains(&name) {
                enabled.push(name);
            }
        }
        if enabled.is_empty() {
            notes.push("no plugins enabled, falling back to clock".to_string());
            enabled.push("clock".to_string());
        }
        self.plugins.enabled = enabled;

        if !self.is_enabled(&self.plugins.default) {
            let first = self.plugins.enabled[0].clone();
            notes.push(format!("default plugin '{}' -> '{}'", self.plugins.default, first));
            self.plugins.default = first;
        }
        if !self.is_enabled(&self.current_state.active_plugin) {
            notes.push(format!(
                "active plugin '{}' -> '{}'",
                self.current_state.active_plugin, self.plugins.default
            ));
            self.current_state.active_plugin = self.plugins.default.clone();
        }

        let before = self.plugin_cycle.plugins.len();
        let enabled = self.plugins.enabled.clone();
        self.plugin_cycle.plugins.retain(|p| enabled.contains(p));
        if self.plugin_cycle.plugins.len() != before {
            notes.push("removed disabled plugins from the cycle list".to_string());
        }
        if self.plugin_cycle.enabled && self.plugin_cycle.plugins.is_empty() {
            notes.push("cycling disabled: empty plugin list".to_string());
            self.plugin_cycle.enabled = false;
        }
        let (lo, hi) = CYCLE_DURATION_RANGE;
        if !(lo..=hi).contains(&self.plugin_cycle.duration) {
            let d = self.plugin_cycle.duration.clamp(lo, hi);
            notes.push(format!("plugin_cycle.duration {} -> {}", self.plugin_cycle.duration, d));
            self.plugin_cycle.duration = d;
        }
        notes
    }

    /// Structural invariants. Plugin settings are checked separately by
    /// [`validate_plugin_settings`] since a bad section only disables
    /// that plugin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matrix;
        if !(8..=128).contains(&m.rows) {
            return Err(ConfigError::Validation("matrix.rows must be 8..=128".into()));
        }
        if !(8..=256).contains(&m.cols) {
            return Err(ConfigError::Validation("matrix.cols must be 8..=256".into()));
        }
        if !(1..=8).contains(&m.chain_length) {
            return Err(ConfigError::Validation("matrix.chain_length must be 1..=8".into()));
        }
        if !(1..=100).contains(&m.brightness) {
            return Err(ConfigError::Validation("matrix.brightness must be 1..=100".into()));
        }
        if !HARDWARE_MAPPINGS.contains(&m.hardware_mapping.as_str()) {
            return Err(ConfigError::Validation(format!(
                "matrix.hardware_mapping must be one of {}",
                HARDWARE_MAPPINGS.join("|")
            )));
        }
        if m.gpio_slowdown > 10 {
            return Err(ConfigError::Validation("matrix.gpio_slowdown must be 0..=10".into()));
        }
        if !(1..=60).contains(&self.defaults.fps) {
            return Err(ConfigError::Validation("defaults.fps must be 1..=60".into()));
        }
        if self.plugins.enabled.is_empty() {
            return Err(ConfigError::Validation("plugins.enabled must not be empty".into()));
        }
        for name in &self.plugins.enabled {
            if PluginKind::from_name(name).is_none() {
                return Err(ConfigError::UnknownPlugin(name.clone()));
            }
        }
        if !self.is_enabled(&self.plugins.default) {
            return Err(ConfigError::NotEnabled(self.plugins.default.clone()));
        }
        if !self.is_enabled(&self.current_state.active_plugin) {
            return Err(ConfigError::NotEnabled(self.current_state.active_plugin.clone()));
        }
        validate_cycle(&self.plugin_cycle, &self.plugins.enabled)?;
        Ok(())
    }
}

fn clamp_u32(v: &mut u32, lo: u32, hi: u32, what: &str, notes: &mut Vec<String>) {
    if *v < lo || *v > hi {
        let c = (*v).clamp(lo, hi);
        notes.push(format!("{what} {} -> {c}", *v));
        *v = c;
    }
}

pub fn validate_cycle(cycle: &PluginCycle, enabled: &[String]) -> Result<(), ConfigError> {
    if cycle.enabled && cycle.plugins.is_empty() {
        return Err(ConfigError::Validation("plugin_cycle.plugins must not be empty".into()));
    }
    for p in &cycle.plugins {
        if !enabled.contains(p) {
            return Err(ConfigError::NotEnabled(p.clone()));
        }
    }
    let (lo, hi) = CYCLE_DURATION_RANGE;
    if !(lo..=hi).contains(&cycle.duration) {
        return Err(ConfigError::Validation(format!(
            "plugin_cycle.duration must be {lo}..={hi} seconds"
        )));
    }
    Ok(())
}

/// Per-plugin sanity checks on a settings section.
pub fn validate_plugin_settings(plugin: &str, settings: &PluginSettings) -> Result<(), ConfigError> {
    if let Some(v) = settings.get("update_interval") {
        match v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())) {
            Some(n) if n >= MIN_UPDATE_INTERVAL_SECS => {}
            _ => {
                return Err(ConfigError::invalid(
                    plugin,
                    "update_interval",
                    format!("must be at least {MIN_UPDATE_INTERVAL_SECS} seconds"),
                ));
            }
        }
    }
    match plugin {
        "weather" => {
            if let Some(units) = settings.get("units").and_then(Value::as_str) {
                if !["metric", "imperial", "kelvin"].contains(&units) {
                    return Err(ConfigError::invalid(plugin, "units", "metric|imperial|kelvin"));
                }
            }
            if let Some(id) = settings.get("city_id") {
                let ok = id.as_i64().map(|n| n > 0).unwrap_or_else(|| {
                    id.as_str().and_then(|s| s.parse::<i64>().ok()).is_some_and(|n| n > 0)
                });
                if !ok {
                    return Err(ConfigError::invalid(plugin, "city_id", "must be a positive number"));
                }
            }
        }
        "prayer" => {
            if let Some(lat) = settings.get("latitude").and_then(Value::as_f64) {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(ConfigError::invalid(plugin, "latitude", "must be within -90..=90"));
                }
            }
            if let Some(lon) = settings.get("longitude").and_then(Value::as_f64) {
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(ConfigError::invalid(plugin, "longitude", "must be within -180..=180"));
                }
            }
        }
        "stock" => {
            if let Some(symbols) = settings.get("symbols").and_then(Value::as_array) {
                for s in symbols {
                    let ok = s.as_str().is_some_and(is_stock_symbol);
                    if !ok {
                        return Err(ConfigError::invalid(plugin, "symbols", format!("bad symbol {s}")));
                    }
                }
            }
        }
        "wmata" => {
            if let Some(stations) = settings.get("stations").and_then(Value::as_array) {
                if stations.len() > 2 {
                    return Err(ConfigError::invalid(plugin, "stations", "at most two stations"));
                }
                for s in stations {
                    if !s.as_str().is_some_and(is_station_code) {
                        return Err(ConfigError::invalid(plugin, "stations", format!("bad code {s}")));
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn is_stock_symbol(s: &str) -> bool {
    (1..=5).contains(&s.len()) && s.chars().all(|c| c.is_ascii_uppercase())
}

/// WMATA station codes look like `A01`.
pub fn is_station_code(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 3 && b[0].is_ascii_uppercase() && b[1].is_ascii_digit() && b[2].is_ascii_digit()
}

/// Loose accessors over a settings map. Values typed in from the web UI
/// arrive as strings, so numbers and booleans are parsed from text too.
pub trait SettingsExt {
    fn str_or(&self, key: &str, default: &str) -> String;
    fn u64_or(&self, key: &str, default: u64) -> u64;
    fn f64_opt(&self, key: &str) -> Option<f64>;
    fn bool_or(&self, key: &str, default: bool) -> bool;
    fn str_list(&self, key: &str) -> Option<Vec<String>>;
    fn api_key(&self) -> Option<String>;
}

impl SettingsExt for PluginSettings {
    fn str_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => default.to_string(),
        }
    }

    fn u64_or(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn f64_opt(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_i64().map(|i| i != 0).unwrap_or(default),
            _ => default,
        }
    }

    fn str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            // "AAPL, MSFT" from a text box
            Value::String(s) => Some(
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.get("api_key")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }
}

/// Serialisation picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }

    pub fn parse(self, text: &str) -> Result<Config, ConfigError> {
        Ok(match self {
            ConfigFormat::Yaml => serde_yaml::from_str(text)?,
            ConfigFormat::Json => serde_json::from_str(text)?,
        })
    }

    pub fn render(self, cfg: &Config) -> Result<String, ConfigError> {
        Ok(match self {
            ConfigFormat::Yaml => serde_yaml::to_string(cfg)?,
            ConfigFormat::Json => serde_json::to_string_pretty(cfg)?,
        })
    }
}

/// The persisted configuration document.
///
/// Every save rewrites the whole file under a lock. If someone edited the
/// file since we last touched it the edit is reported and overwritten.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    format: ConfigFormat,
    last_mtime: Option<SystemTime>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = ConfigFormat::for_path(&path);
        Self { path, format, last_mtime: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, creating it with defaults when absent.
    pub fn load(&mut self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            info!("Config {} not found, writing defaults", self.path.display());
            let cfg = Config::default();
            self.save(&cfg)?;
            return Ok(cfg);
        }
        let raw = file_lock::read_locked(&self.path)?;
        let text = String::from_utf8_lossy(&raw);
        let cfg = self.format.parse(&text)?;
        self.last_mtime = self.mtime();
        Ok(cfg)
    }

    pub fn save(&mut self, cfg: &Config) -> Result<(), ConfigError> {
        if let (Some(seen), Some(now)) = (self.last_mtime, self.mtime()) {
            if now != seen {
                warn!(
                    "Config {} was modified externally; overwriting with current state",
                    self.path.display()
                );
            }
        }
        let text = self.format.render(cfg)?;
        file_lock::write_atomic(&self.path, text.as_bytes())?;
        self.last_mtime = self.mtime();
        Ok(())
    }

    fn mtime(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

/// CLI overrides layered over the file.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "infocube", about = "InfoCube LED matrix display", version)]
pub struct Cli {
    /// Path to a YAML or JSON config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Target frame rate
    #[arg(long)]
    pub fps: Option<u32>,
    /// Panel brightness 1..=100
    #[arg(long)]
    pub brightness: Option<u8>,
    /// Plugin to start with
    #[arg(long)]
    pub plugin: Option<String>,
    /// GIF to play when the gif plugin is active
    #[arg(long)]
    pub gif: Option<String>,
    /// Address of the remote command server
    #[arg(long)]
    pub bind: Option<String>,
    /// Write a PPM snapshot of the headless surface to this path
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub snapshot: Option<PathBuf>,
    /// Frames between snapshots
    #[arg(long, default_value_t = 30)]
    pub snapshot_every: u64,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Resolve, read, override, sanitise and validate. The returned store is
/// the one every later change is written through.
pub fn load(cli: &Cli) -> Result<(Config, ConfigStore), ConfigError> {
    let path = match cli.config.as_ref() {
        Some(p) => p.clone(),
        None => find_config_file().unwrap_or_else(default_config_path),
    };
    let mut store = ConfigStore::new(path);
    let mut cfg = store.load()?;
    info!("Loaded config from {}", store.path().display());

    seed_env_keys(&mut cfg);
    apply_cli_overrides(&mut cfg, cli);

    for note in cfg.sanitize() {
        warn!("Config repaired: {note}");
    }
    cfg.validate()?;
    for (name, settings) in &cfg.plugins.settings {
        if let Err(e) = validate_plugin_settings(name, settings) {
            warn!("{e}");
        }
    }

    if cli.dump_config {
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok((cfg, store))
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    if let Some(home) = home_dir() {
        let p = home.join(".config/infocube/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/infocube.yaml");
        if p.exists() { return Some(p) }
    }
    for candidate in &["infocube.yaml", "config.yaml", "config.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".config/infocube/config.yaml"),
        None => PathBuf::from("config.yaml"),
    }
}

fn seed_env_keys(cfg: &mut Config) {
    if cfg.api_keys.get("openweathermap").is_none_or(|k| k.is_empty()) {
        if let Ok(key) = std::env::var("WEATHER_APP_ID") {
            if !key.is_empty() {
                cfg.api_keys.insert("openweathermap".into(), key);
            }
        }
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(fps) = cli.fps                 { cfg.defaults.fps = fps; }
    if let Some(b) = cli.brightness            { cfg.matrix.brightness = b; }
    if let Some(p) = cli.plugin.as_ref()       { cfg.current_state.active_plugin = p.clone(); }
    if let Some(g) = cli.gif.as_ref()          { cfg.current_state.active_gif = g.clone(); }
    if let Some(bind) = cli.bind.as_ref()      { cfg.remote.bind = bind.clone(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.matrix.width(), 32);
        assert_eq!(cfg.defaults.fps, 30);
        assert_eq!(cfg.current_state.active_plugin, "clock");
    }

    #[test]
    fn test_sanitize_repairs_bad_values() {
        let mut cfg = Config::default();
        cfg.matrix.rows = 4;
        cfg.matrix.brightness = 0;
        cfg.matrix.hardware_mapping = "bogus".into();
        cfg.defaults.fps = 240;
        cfg.plugins.enabled = vec!["toaster".into(), "moon".into(), "moon".into()];
        cfg.plugins.default = "clock".into();
        cfg.current_state.active_plugin = "weather".into();
        cfg.plugin_cycle = PluginCycle {
            enabled: true,
            plugins: vec!["clock".into()],
            duration: 5,
            last_switch: 0,
        };

        let notes = cfg.sanitize();
        assert!(!notes.is_empty());
        assert_eq!(cfg.matrix.rows, 8);
        assert_eq!(cfg.matrix.brightness, 1);
        assert_eq!(cfg.matrix.hardware_mapping, "adafruit-hat");
        assert_eq!(cfg.defaults.fps, 60);
        assert_eq!(cfg.plugins.enabled, vec!["moon".to_string()]);
        assert_eq!(cfg.plugins.default, "moon");
        assert_eq!(cfg.current_state.active_plugin, "moon");
        // clock was dropped from enabled so the cycle emptied out
        assert!(!cfg.plugin_cycle.enabled);
        assert_eq!(cfg.plugin_cycle.duration, 10);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_sanitize_empty_enabled_falls_back_to_clock() {
        let mut cfg = Config::default();
        cfg.plugins.enabled.clear();
        cfg.sanitize();
        assert_eq!(cfg.plugins.enabled, vec!["clock".to_string()]);
    }

    #[test]
    fn test_validate_rejects_cycle_with_disabled_plugin() {
        let mut cfg = Config::default();
        cfg.plugin_cycle.enabled = true;
        cfg.plugin_cycle.plugins = vec!["clock".into(), "stock".into()];
        assert!(matches!(cfg.validate(), Err(ConfigError::NotEnabled(p)) if p == "stock"));
    }

    #[test]
    fn test_effective_settings_pulls_shared_key_and_gif() {
        let mut cfg = Config::default();
        cfg.api_keys.insert("finnhub".into(), "abc123".into());
        cfg.current_state.active_gif = "fireworks".into();

        let stock = cfg.effective_settings("stock");
        assert_eq!(stock.api_key().as_deref(), Some("abc123"));

        let gif = cfg.effective_settings("gif");
        assert_eq!(gif.str_or("current_gif", ""), "fireworks");

        // an explicit per-plugin key wins
        cfg.plugins
            .settings
            .get_mut("stock")
            .unwrap()
            .insert("api_key".into(), json!("own-key"));
        assert_eq!(cfg.effective_settings("stock").api_key().as_deref(), Some("own-key"));
    }

    #[test]
    fn test_plugin_settings_validation() {
        let bad_units = as_map(json!({ "units": "furlongs" }));
        assert!(validate_plugin_settings("weather", &bad_units).is_err());

        let bad_interval = as_map(json!({ "update_interval": 5 }));
        assert!(validate_plugin_settings("moon", &bad_interval).is_err());

        let bad_symbol = as_map(json!({ "symbols": ["AAPL", "toolong"] }));
        assert!(validate_plugin_settings("stock", &bad_symbol).is_err());

        let too_many = as_map(json!({ "stations": ["A01", "B02", "C03"] }));
        assert!(validate_plugin_settings("wmata", &too_many).is_err());

        let lat = as_map(json!({ "latitude": 95.0 }));
        assert!(validate_plugin_settings("prayer", &lat).is_err());

        for (name, settings) in default_plugin_settings() {
            validate_plugin_settings(&name, &settings).unwrap();
        }
    }

    #[test]
    fn test_settings_ext_is_lenient() {
        let s = as_map(json!({
            "interval": "45",
            "flag": "yes",
            "list": "AAPL, MSFT ,",
            "lat": "38.5",
            "api_key": "  "
        }));
        assert_eq!(s.u64_or("interval", 1), 45);
        assert!(s.bool_or("flag", false));
        assert_eq!(s.str_list("list").unwrap(), vec!["AAPL", "MSFT"]);
        assert_eq!(s.f64_opt("lat"), Some(38.5));
        assert_eq!(s.api_key(), None);
        assert_eq!(s.u64_or("missing", 7), 7);
    }

    #[test]
    fn test_legacy_state_keys_accepted() {
        let cfg: Config = serde_yaml::from_str(
            "current_state:\n  current_plugin: moon\n  current_gif: matrix\n",
        )
        .unwrap();
        assert_eq!(cfg.current_state.active_plugin, "moon");
        assert_eq!(cfg.current_state.active_gif, "matrix");
        // unspecified sections fall back to defaults
        assert_eq!(cfg.matrix.rows, 32);
    }

    #[test]
    fn test_store_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infocube.yaml");
        let mut store = ConfigStore::new(&path);
        let cfg = store.load().unwrap();
        assert!(path.exists());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::for_path(Path::new("a/config.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::for_path(Path::new("a/config.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::for_path(Path::new("config")), ConfigFormat::Yaml);
    }
}

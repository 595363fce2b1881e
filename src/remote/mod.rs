/*
 *  remote/mod.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  State shared between the remote command side and the display loop
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

//! Remote control
//!
//! The remote side writes, the display loop reads. Every write replaces
//! the whole configuration value under one mutex and bumps a version
//! counter; the loop compares versions once per iteration. A switch
//! request and a run command are single slots, so the last write wins.
//!
//! Writing the document to disk happens after the mutex is released, on
//! the blocking pool when a runtime is present. Snapshots carry their
//! version and an older one never overwrites a newer one.

pub mod server;

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, watch};

use crate::config::{self, Config, ConfigStore, PluginCycle, PluginSettings};
use crate::display::LoopState;
use crate::errors::ConfigError;
use crate::plugins::PluginKind;

/// Lifecycle requests for the display loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCommand {
    Start,
    Stop,
    Restart,
    Shutdown,
}

/// What the loop reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayStatus {
    pub state: LoopState,
    pub active_plugin: Option<String>,
    pub frames: u64,
    pub dropped_frames: u64,
    /// consecutive render failures of the active plugin
    pub render_failures: u32,
    pub brightness: u8,
    pub fps: u32,
    /// last fetch or activation error per plugin
    pub last_errors: BTreeMap<String, String>,
}

impl Default for DisplayStatus {
    fn default() -> Self {
        Self {
            state: LoopState::Stopped,
            active_plugin: None,
            frames: 0,
            dropped_frames: 0,
            render_failures: 0,
            brightness: 0,
            fps: 0,
            last_errors: BTreeMap::new(),
        }
    }
}

struct ControlState {
    version: u64,
    config: Config,
    pending_switch: Option<String>,
    run_command: Option<RunCommand>,
}

/// Owns the config store; serialises writes to disk.
struct ConfigWriter {
    store: ConfigStore,
    /// version of the last snapshot on disk
    written: u64,
}

impl ConfigWriter {
    fn write(&mut self, version: u64, config: &Config) {
        if version < self.written {
            debug!("Config v{} superseded by v{}, not written", version, self.written);
            return;
        }
        match self.store.save(config) {
            Ok(()) => self.written = version,
            Err(e) => warn!("Failed to persist config to {}: {}", self.store.path().display(), e),
        }
    }
}

/// Handle to the shared state; cheap to clone.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<ControlState>>,
    writer: Option<Arc<Mutex<ConfigWriter>>>,
    status: Arc<watch::Sender<DisplayStatus>>,
    wake: Arc<Notify>,
}

impl SharedState {
    /// `store` is where every change is persisted, `None` keeps changes in
    /// memory only.
    pub fn new(config: Config, store: Option<ConfigStore>) -> Self {
        let (tx, _rx) = watch::channel(DisplayStatus::default());
        Self {
            inner: Arc::new(Mutex::new(ControlState {
                version: 1,
                config,
                pending_switch: None,
                run_command: None,
            })),
            writer: store.map(|store| Arc::new(Mutex::new(ConfigWriter { store, written: 0 }))),
            status: Arc::new(tx),
            wake: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install `config` as a new version, release the state, then write
    /// the snapshot out.
    fn commit(&self, mut state: MutexGuard<'_, ControlState>, config: Config) {
        state.config = config;
        state.version += 1;
        let Some(writer) = self.writer.clone() else { return };
        let (version, snapshot) = (state.version, state.config.clone());
        drop(state);

        let write = move || lock_writer(&writer).write(version, &snapshot);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }

    /// Write the current configuration now, on the calling thread.
    fn persist_now(&self) {
        let Some(writer) = self.writer.as_ref() else { return };
        let (version, snapshot) = {
            let state = self.lock();
            (state.version, state.config.clone())
        };
        lock_writer(writer).write(version, &snapshot);
    }

    pub fn remote(&self) -> RemoteControl {
        RemoteControl { shared: self.clone() }
    }

    pub fn view(&self) -> ControlView {
        ControlView { shared: self.clone() }
    }

    pub fn config(&self) -> Config {
        self.lock().config.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn status(&self) -> DisplayStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayStatus> {
        self.status.subscribe()
    }

    /// Re-read the configuration from its store.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(writer) = self.writer.as_ref() else {
            return Ok(());
        };
        let config = {
            let mut writer = lock_writer(writer);
            let mut config = writer.store.load()?;
            for note in config.sanitize() {
                warn!("Config repaired: {note}");
            }
            config.validate()?;
            info!("Reloaded config from {}", writer.store.path().display());
            config
        };
        let mut state = self.lock();
        state.config = config;
        state.version += 1;
        Ok(())
    }

    /// Wait for the next run command.
    pub async fn next_run_command(&self) -> RunCommand {
        loop {
            let notified = self.wake.notified();
            if let Some(cmd) = self.lock().run_command.take() {
                return cmd;
            }
            notified.await;
        }
    }
}

/// Writer side: every method validates, applies and persists.
#[derive(Clone)]
pub struct RemoteControl {
    shared: SharedState,
}

impl RemoteControl {
    pub fn config(&self) -> Config {
        self.shared.config()
    }

    pub fn status(&self) -> DisplayStatus {
        self.shared.status()
    }

    /// Ask the loop to show `plugin`. The request replaces any earlier one
    /// not yet seen.
    pub fn set_plugin(&self, plugin: &str) -> Result<(), ConfigError> {
        let mut state = self.shared.lock();
        if PluginKind::from_name(plugin).is_none() {
            return Err(ConfigError::UnknownPlugin(plugin.to_string()));
        }
        if !state.config.is_enabled(plugin) {
            return Err(ConfigError::NotEnabled(plugin.to_string()));
        }
        let mut config = state.config.clone();
        config.current_state.active_plugin = plugin.to_string();
        state.pending_switch = Some(plugin.to_string());
        self.shared.commit(state, config);
        info!("Remote: switch to '{}' requested", plugin);
        Ok(())
    }

    /// Select the GIF to play and switch to the gif plugin.
    pub fn set_gif(&self, gif: &str) -> Result<(), ConfigError> {
        let mut state = self.shared.lock();
        if !state.config.is_enabled("gif") {
            return Err(ConfigError::NotEnabled("gif".to_string()));
        }
        let mut config = state.config.clone();
        config.current_state.active_gif = gif.to_string();
        config.current_state.active_plugin = "gif".to_string();
        state.pending_switch = Some("gif".to_string());
        self.shared.commit(state, config);
        info!("Remote: GIF '{}' selected", gif);
        Ok(())
    }

    pub fn set_brightness(&self, percent: u8) -> Result<(), ConfigError> {
        if !(1..=100).contains(&percent) {
            return Err(ConfigError::Validation("brightness must be 1..=100".into()));
        }
        let mut state = self.shared.lock();
        let mut config = state.config.clone();
        config.matrix.brightness = percent;
        self.shared.commit(state, config);
        Ok(())
    }

    pub fn plugin_cycle(&self) -> PluginCycle {
        self.shared.lock().config.plugin_cycle.clone()
    }

    pub fn set_plugin_cycle(&self, enabled: bool, plugins: Vec<String>, duration: u64) -> Result<(), ConfigError> {
        let mut state = self.shared.lock();
        let cycle = PluginCycle {
            enabled,
            plugins,
            duration,
            last_switch: state.config.plugin_cycle.last_switch,
        };
        config::validate_cycle(&cycle, &state.config.plugins.enabled)?;
        let mut config = state.config.clone();
        config.plugin_cycle = cycle;
        self.shared.commit(state, config);
        info!("Remote: plugin cycling {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn plugin_settings(&self, plugin: &str) -> Result<PluginSettings, ConfigError> {
        if PluginKind::from_name(plugin).is_none() {
            return Err(ConfigError::UnknownPlugin(plugin.to_string()));
        }
        Ok(self.shared.lock().config.plugins.settings.get(plugin).cloned().unwrap_or_default())
    }

    /// Merge `changes` into the plugin's settings section.
    pub fn set_plugin_settings(&self, plugin: &str, changes: PluginSettings) -> Result<(), ConfigError> {
        if PluginKind::from_name(plugin).is_none() {
            return Err(ConfigError::UnknownPlugin(plugin.to_string()));
        }
        let mut state = self.shared.lock();
        let mut merged = state.config.plugins.settings.get(plugin).cloned().unwrap_or_default();
        merged.extend(changes);
        config::validate_plugin_settings(plugin, &merged)?;
        let mut config = state.config.clone();
        config.plugins.settings.insert(plugin.to_string(), merged);
        self.shared.commit(state, config);
        info!("Remote: settings of '{}' updated", plugin);
        Ok(())
    }

    pub fn request(&self, cmd: RunCommand) {
        self.shared.lock().run_command = Some(cmd);
        self.shared.wake.notify_one();
        info!("Remote: {:?} requested", cmd);
    }
}

/// Reader side, owned by the display loop.
#[derive(Clone)]
pub struct ControlView {
    shared: SharedState,
}

impl ControlView {
    /// Current configuration and its version.
    pub fn snapshot(&self) -> (u64, Config) {
        let state = self.shared.lock();
        (state.version, state.config.clone())
    }

    /// The configuration, if it changed since version `seen`.
    pub fn config_if_changed(&self, seen: &mut u64) -> Option<Config> {
        let state = self.shared.lock();
        if state.version == *seen {
            return None;
        }
        *seen = state.version;
        Some(state.config.clone())
    }

    pub fn take_pending_switch(&self) -> Option<String> {
        self.shared.lock().pending_switch.take()
    }

    /// Stop, restart and shutdown requests. A start request while running
    /// is dropped here.
    pub fn take_run_command(&self) -> Option<RunCommand> {
        let mut state = self.shared.lock();
        match state.run_command {
            Some(RunCommand::Start) => {
                state.run_command = None;
                None
            }
            _ => state.run_command.take(),
        }
    }

    /// Note a switch the loop made on its own (cycling, fallback). Not a
    /// new version: the loop already knows.
    pub fn record_switch(&self, plugin: &str, cycled_at: Option<i64>) {
        let mut state = self.shared.lock();
        state.config.current_state.active_plugin = plugin.to_string();
        if let Some(at) = cycled_at {
            state.config.plugin_cycle.last_switch = at;
        }
    }

    pub fn publish(&self, status: DisplayStatus) {
        self.shared.status.send_replace(status);
    }

    /// Write the current configuration out, blocking until it is on disk.
    pub fn persist(&self) {
        self.shared.persist_now();
    }
}

fn lock_writer(writer: &Mutex<ConfigWriter>) -> MutexGuard<'_, ConfigWriter> {
    writer.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> SharedState {
        SharedState::new(Config::default(), None)
    }

    #[test]
    fn test_last_switch_request_wins() {
        let s = shared();
        let remote = s.remote();
        remote.set_plugin("weather").unwrap();
        remote.set_plugin("moon").unwrap();
        assert_eq!(s.view().take_pending_switch().as_deref(), Some("moon"));
        assert_eq!(s.view().take_pending_switch(), None);
        assert_eq!(s.config().current_state.active_plugin, "moon");
    }

    #[test]
    fn test_rejects_disabled_and_unknown() {
        let remote = shared().remote();
        assert!(matches!(remote.set_plugin("stock"), Err(ConfigError::NotEnabled(_))));
        assert!(matches!(remote.set_plugin("transition"), Err(ConfigError::UnknownPlugin(_))));
        assert!(remote.set_brightness(0).is_err());
        assert!(remote.set_plugin_cycle(true, vec!["clock".into()], 5).is_err());
        assert!(remote.set_plugin_cycle(true, vec![], 30).is_err());
    }

    #[test]
    fn test_version_bumps_once_per_write() {
        let s = shared();
        let view = s.view();
        let (mut seen, _) = view.snapshot();
        assert!(view.config_if_changed(&mut seen).is_none());
        s.remote().set_brightness(40).unwrap();
        let cfg = view.config_if_changed(&mut seen).unwrap();
        assert_eq!(cfg.matrix.brightness, 40);
        assert!(view.config_if_changed(&mut seen).is_none());

        view.record_switch("moon", Some(1_700_000_000));
        assert!(view.config_if_changed(&mut seen).is_none());
        assert_eq!(s.config().plugin_cycle.last_switch, 1_700_000_000);
    }

    #[test]
    fn test_settings_merge_and_validate() {
        let remote = shared().remote();
        let changes = json!({ "units": "metric" });
        remote.set_plugin_settings("weather", changes.as_object().unwrap().clone()).unwrap();
        let s = remote.plugin_settings("weather").unwrap();
        assert_eq!(s["units"], "metric");
        assert_eq!(s["city_id"], 4791160);

        let bad = json!({ "update_interval": 5 });
        assert!(remote.set_plugin_settings("weather", bad.as_object().unwrap().clone()).is_err());
        assert_eq!(remote.plugin_settings("weather").unwrap()["update_interval"], 3600);
    }

    #[test]
    fn test_start_while_running_is_dropped() {
        let s = shared();
        s.remote().request(RunCommand::Start);
        assert_eq!(s.view().take_run_command(), None);
        s.remote().request(RunCommand::Stop);
        assert_eq!(s.view().take_run_command(), Some(RunCommand::Stop));
    }

    #[test]
    fn test_persists_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infocube.yaml");
        let mut store = ConfigStore::new(&path);
        let cfg = store.load().unwrap();
        let s = SharedState::new(cfg, Some(store));
        s.remote().set_gif("nyan").unwrap();

        let mut reread = ConfigStore::new(&path);
        let back = reread.load().unwrap();
        assert_eq!(back.current_state.active_gif, "nyan");
        assert_eq!(back.current_state.active_plugin, "gif");
    }

    #[test]
    fn test_older_snapshot_never_overwrites_newer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infocube.yaml");
        let mut writer = ConfigWriter { store: ConfigStore::new(&path), written: 0 };
        let mut newer = Config::default();
        newer.matrix.brightness = 70;
        let mut older = Config::default();
        older.matrix.brightness = 20;

        writer.write(5, &newer);
        writer.write(4, &older);
        assert_eq!(ConfigStore::new(&path).load().unwrap().matrix.brightness, 70);
        // same version again is a loop-side update and is written
        newer.current_state.active_plugin = "moon".into();
        writer.write(5, &newer);
        assert_eq!(ConfigStore::new(&path).load().unwrap().current_state.active_plugin, "moon");
    }

    #[tokio::test]
    async fn test_write_behind_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infocube.yaml");
        let s = SharedState::new(Config::default(), Some(ConfigStore::new(&path)));
        for b in [10, 20, 30] {
            s.remote().set_brightness(b).unwrap();
        }
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            // loading a missing file would write defaults, so look first
            let on_disk = path
                .exists()
                .then(|| ConfigStore::new(&path).load().ok())
                .flatten()
                .map(|c| c.matrix.brightness);
            if on_disk == Some(30) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "last write never landed: {on_disk:?}");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_next_run_command_wakes() {
        let s = shared();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.next_run_command().await })
        };
        tokio::task::yield_now().await;
        s.remote().request(RunCommand::Start);
        assert_eq!(waiter.await.unwrap(), RunCommand::Start);
    }
}

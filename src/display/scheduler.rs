/*
 *  display/scheduler.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  The frame loop: commands, cycling, refresh, render, pace
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

//! Frame scheduler
//!
//! One iteration per frame period, in a fixed order:
//!
//! 1. run commands (stop, restart, shutdown)
//! 2. configuration changes, then a pending manual switch
//! 3. cycling and hand-off from plugins that finish on their own
//! 4. refresh of the active plugin, off the loop with a hard timeout
//! 5. render into the loop-owned frame and show it
//! 6. publish status
//!
//! Pacing happens in [`Scheduler::run`]. Only a [`HardwareError`] ends the
//! loop from the inside; every plugin failure is handled here by policy.

use chrono::Local;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use log::{debug, error, info, trace, warn};
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{Config, PluginSettings};
use crate::display::cycle::CycleState;
use crate::display::error::HardwareError;
use crate::display::traits::BoxedSurface;
use crate::display::{Frame, LoopState};
use crate::errors::{ConfigError, FetchError, RenderError};
use crate::pacer::Pacer;
use crate::plugins::{FetchPayload, PluginKind, PluginRegistry, needs_refresh};
use crate::remote::{ControlView, DisplayStatus, RunCommand};

/// Consecutive render failures before falling back to the default plugin.
pub const MAX_RENDER_FAILURES: u32 = 3;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("render surface failed: {0}")]
    Hardware(#[from] HardwareError),
    #[error("no enabled plugin could be activated")]
    NoPlugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    Restart,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Exit(ExitReason),
}

/// Refresh bookkeeping of one plugin.
#[derive(Debug, Clone, Default)]
struct RefreshTracker {
    last_success: Option<Instant>,
    last_attempt: Option<Instant>,
    /// set after a failure: whether it looked transient
    failure: Option<bool>,
}

struct InFlight {
    plugin: String,
    handle: JoinHandle<()>,
    rx: oneshot::Receiver<Result<FetchPayload, FetchError>>,
}

pub struct Scheduler {
    registry: PluginRegistry,
    surface: BoxedSurface,
    control: ControlView,
    config: Config,
    version: u64,
    frame: Frame,
    pacer: Pacer,
    cycle: CycleState,
    state: LoopState,
    active: Option<String>,
    active_settings: PluginSettings,
    /// settings each plugin last activated with, active or not
    last_activated: HashMap<String, PluginSettings>,
    activated_at: Instant,
    trackers: HashMap<String, RefreshTracker>,
    in_flight: Option<InFlight>,
    render_failures: u32,
    frames: u64,
    last_errors: BTreeMap<String, String>,
}

impl Scheduler {
    pub fn new(registry: PluginRegistry, surface: BoxedSurface, control: ControlView) -> Self {
        let (version, config) = control.snapshot();
        let now = Instant::now();
        Self {
            frame: Frame::new(config.matrix.width(), config.matrix.height(), Rgb888::BLACK),
            pacer: Pacer::new(config.defaults.fps),
            registry,
            surface,
            control,
            config,
            version,
            cycle: CycleState::new(now),
            state: LoopState::Stopped,
            active: None,
            active_settings: PluginSettings::new(),
            last_activated: HashMap::new(),
            activated_at: now,
            trackers: HashMap::new(),
            in_flight: None,
            render_failures: 0,
            frames: 0,
            last_errors: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn active_plugin(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn render_failures(&self) -> u32 {
        self.render_failures
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn dropped_frames(&self) -> u64 {
        self.pacer.overruns()
    }

    pub fn last_error(&self, plugin: &str) -> Option<&str> {
        self.last_errors.get(plugin).map(String::as_str)
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Bring the surface up and activate the first plugin that accepts its
    /// settings: the active one, then the default, then the enabled list.
    pub fn start(&mut self, now: Instant) -> Result<(), SchedulerError> {
        self.state = LoopState::Starting;
        self.publish();

        self.surface.init(&self.config.matrix)?;
        self.surface.set_brightness(self.config.matrix.brightness)?;
        let (w, h) = self.surface.dimensions();
        if (w as usize, h as usize) != (self.frame.width(), self.frame.height()) {
            self.frame = Frame::new(w, h, Rgb888::BLACK);
        }
        info!(
            "Surface '{}' up: {}x{} @ {} fps",
            self.surface.capabilities().name,
            w,
            h,
            self.config.defaults.fps
        );

        // the configured active plugin already reflects any request made
        // before start
        if let Some(dropped) = self.control.take_pending_switch() {
            debug!("Switch to '{}' made before start dropped", dropped);
        }
        let mut candidates = vec![
            self.config.current_state.active_plugin.clone(),
            self.config.plugins.default.clone(),
        ];
        candidates.extend(self.config.plugins.enabled.iter().cloned());
        candidates.dedup();

        let mut tried: Vec<String> = Vec::new();
        for name in candidates {
            if tried.contains(&name) {
                continue;
            }
            if self.activate(&name, now).is_ok() {
                break;
            }
            tried.push(name);
        }
        let Some(active) = self.active.clone() else {
            let _ = self.surface.release();
            self.state = LoopState::Stopped;
            self.publish();
            return Err(SchedulerError::NoPlugin);
        };

        self.cycle = CycleState::new(now);
        self.control.record_switch(&active, None);
        self.state = LoopState::Running;
        self.publish();
        Ok(())
    }

    /// One loop iteration at monotonic time `now`; `wall_secs` is the
    /// epoch time recorded with cycle rotations.
    pub fn tick(&mut self, now: Instant, wall_secs: i64) -> Result<TickOutcome, HardwareError> {
        if let Some(cmd) = self.control.take_run_command() {
            let reason = match cmd {
                RunCommand::Restart => ExitReason::Restart,
                RunCommand::Shutdown => ExitReason::Shutdown,
                _ => ExitReason::Stopped,
            };
            info!("Display loop {:?} requested", reason);
            self.shutdown()?;
            return Ok(TickOutcome::Exit(reason));
        }

        if let Some(config) = self.control.config_if_changed(&mut self.version) {
            self.apply_config(config, now)?;
        }
        if let Some(target) = self.control.take_pending_switch() {
            // a manual switch restarts the dwell, so a rotation due now waits
            self.cycle.reset(now);
            if let Err(e) = self.switch_to(&target, now) {
                warn!("Switch to '{}' rejected: {}", target, e);
            }
            self.sync_active(None);
        }

        self.advance_cycle(now, wall_secs);
        self.hand_off_finished(now);
        self.poll_refresh(now);
        self.start_refresh(now);
        self.render(now)?;
        self.publish();
        Ok(TickOutcome::Continue)
    }

    /// Start, then tick once per frame period until told to exit.
    pub async fn run(mut self) -> Result<ExitReason, SchedulerError> {
        self.start(Instant::now())?;
        loop {
            let started = Instant::now();
            match self.tick(started, Local::now().timestamp()) {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Exit(reason)) => return Ok(reason),
                Err(e) => {
                    error!("Render surface failed: {}", e);
                    self.abandon();
                    return Err(e.into());
                }
            }
            match self.pacer.remaining(started, Instant::now()) {
                Some(left) => tokio::time::sleep(left).await,
                None => {
                    trace!("frame overrun ({} total)", self.pacer.overruns());
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn apply_config(&mut self, config: Config, now: Instant) -> Result<(), HardwareError> {
        if config.defaults.fps != self.config.defaults.fps {
            info!("Frame rate {} -> {}", self.config.defaults.fps, config.defaults.fps);
            self.pacer.set_fps(config.defaults.fps);
        }
        if config.matrix.brightness != self.config.matrix.brightness {
            info!("Brightness {} -> {}", self.config.matrix.brightness, config.matrix.brightness);
            self.surface.set_brightness(config.matrix.brightness)?;
        }
        let (old, new) = (&self.config.plugin_cycle, &config.plugin_cycle);
        if old.enabled != new.enabled || old.plugins != new.plugins || old.duration != new.duration {
            debug!("Plugin cycle changed, dwell restarted");
            self.cycle.reset(now);
        }
        self.config = config;

        let Some(active) = self.active.clone() else {
            return Ok(());
        };
        let settings = self.config.effective_settings(&active);
        if settings != self.active_settings {
            self.reinitialise(&active, settings, now);
        }
        Ok(())
    }

    /// Re-activate the active plugin with new settings. Rejected settings
    /// leave it running with the old ones.
    fn reinitialise(&mut self, name: &str, settings: PluginSettings, now: Instant) {
        info!("Settings of '{}' changed, re-initialising", name);
        self.abort_refresh();
        let Some(plugin) = self.registry.get_mut(name) else {
            return;
        };
        let old = std::mem::take(&mut self.active_settings);
        plugin.deactivate();
        match plugin.activate(&settings) {
            Ok(()) => {
                self.last_activated.insert(name.to_string(), settings.clone());
                self.active_settings = settings;
                self.activated_at = now;
                self.render_failures = 0;
                self.trackers.remove(name);
                self.last_errors.remove(name);
            }
            Err(e) => {
                warn!("New settings of '{}' rejected: {}", name, e);
                self.last_errors.insert(name.to_string(), e.to_string());
                match plugin.activate(&old) {
                    Ok(()) => self.active_settings = old,
                    Err(e) => {
                        warn!("'{}' cannot be restored: {}", name, e);
                        self.active = None;
                        let default = self.config.plugins.default.clone();
                        if default == name || self.activate(&default, now).is_err() {
                            error!("No plugin active");
                        }
                        self.sync_active(None);
                    }
                }
            }
        }
    }

    fn advance_cycle(&mut self, now: Instant, wall_secs: i64) {
        if !self.cycle.due(&self.config.plugin_cycle, now) {
            return;
        }
        let cycle = self.config.plugin_cycle.clone();
        let current = self.active.clone().unwrap_or_default();
        let mut rejected: Vec<String> = Vec::new();
        loop {
            let registry = &self.registry;
            let next = self.cycle.next(&cycle, &current, |p| {
                registry.contains(p) && !rejected.iter().any(|r| r == p)
            });
            let Some(next) = next else { break };
            if next == current {
                break;
            }
            match self.switch_to(&next, now) {
                Ok(()) => {
                    info!("Cycled to '{}'", next);
                    break;
                }
                Err(e) => {
                    warn!("Cycle skipped '{}': {}", next, e);
                    rejected.push(next);
                }
            }
        }
        self.cycle.reset(now);
        self.sync_active(Some(wall_secs));
    }

    fn hand_off_finished(&mut self, now: Instant) {
        let Some(active) = self.active.clone() else { return };
        let elapsed = now.saturating_duration_since(self.activated_at);
        let done = self.registry.get(&active).is_some_and(|p| p.finished(elapsed));
        let default = self.config.plugins.default.clone();
        if !done || default == active {
            return;
        }
        info!("'{}' finished, handing over to '{}'", active, default);
        if let Err(e) = self.switch_to(&default, now) {
            warn!("Hand-off to '{}' failed: {}", default, e);
        }
        self.cycle.reset(now);
        self.sync_active(None);
    }

    fn poll_refresh(&mut self, now: Instant) {
        let Some(mut job) = self.in_flight.take() else { return };
        let result = match job.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => {
                self.in_flight = Some(job);
                return;
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(FetchError::Network("refresh task ended without a result".to_string()))
            }
        };

        let tracker = self.trackers.entry(job.plugin.clone()).or_default();
        match &result {
            Ok(_) => {
                tracker.last_success = Some(now);
                tracker.failure = None;
                debug!("'{}' refreshed", job.plugin);
            }
            Err(e) => {
                tracker.failure = Some(e.is_retryable());
                warn!("'{}' refresh failed: {}", job.plugin, e);
            }
        }
        let Some(plugin) = self.registry.get_mut(&job.plugin) else { return };
        plugin.apply_refresh(result);
        match plugin.last_error() {
            Some(e) => self.last_errors.insert(job.plugin, e),
            None => self.last_errors.remove(&job.plugin),
        };
    }

    fn refresh_due(&self, name: &str, now: Instant) -> bool {
        let Some(plugin) = self.registry.get(name) else { return false };
        let Some(interval) = plugin.refresh_interval() else { return false };
        let tracker = self.trackers.get(name).cloned().unwrap_or_default();
        match tracker.failure {
            None => plugin.needs_refresh(now, tracker.last_success),
            Some(retryable) => {
                let wait = if retryable {
                    Duration::from_secs(self.config.defaults.fetch_retry_secs).min(interval)
                } else {
                    interval
                };
                needs_refresh(now, tracker.last_attempt, wait)
            }
        }
    }

    fn start_refresh(&mut self, now: Instant) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(name) = self.active.clone() else { return };
        if !self.refresh_due(&name, now) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, '{}' cannot refresh", name);
            return;
        };
        let Some(task) = self.registry.get(&name).and_then(|p| p.refresh()) else { return };

        let limit = Duration::from_secs(self.config.defaults.fetch_timeout_secs);
        let (tx, rx) = oneshot::channel();
        let handle = runtime.spawn(async move {
            let result = match tokio::time::timeout(limit, task).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            };
            let _ = tx.send(result);
        });
        self.trackers.entry(name.clone()).or_default().last_attempt = Some(now);
        debug!("Refreshing '{}'", name);
        self.in_flight = Some(InFlight { plugin: name, handle, rx });
    }

    fn abort_refresh(&mut self) {
        if let Some(job) = self.in_flight.take() {
            debug!("Abandoning refresh of '{}'", job.plugin);
            job.handle.abort();
        }
    }

    fn render(&mut self, now: Instant) -> Result<(), HardwareError> {
        let Some(name) = self.active.clone() else { return Ok(()) };
        let Some(plugin) = self.registry.get(&name) else { return Ok(()) };
        let elapsed = now.saturating_duration_since(self.activated_at);

        self.frame.clear_color(Rgb888::BLACK);
        let frame = &mut self.frame;
        let result = catch_unwind(AssertUnwindSafe(|| plugin.render_frame(elapsed, frame)))
            .unwrap_or_else(|payload| Err(RenderError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(()) => {
                self.surface.show(&self.frame)?;
                self.render_failures = 0;
                self.frames += 1;
            }
            Err(e) => {
                self.render_failures += 1;
                warn!("'{}' render failed ({}/{}): {}", name, self.render_failures, MAX_RENDER_FAILURES, e);
                if self.render_failures >= MAX_RENDER_FAILURES {
                    self.fall_back(&name, now);
                }
            }
        }
        Ok(())
    }

    fn fall_back(&mut self, failing: &str, now: Instant) {
        let default = self.config.plugins.default.clone();
        if default == failing {
            // nothing better to fall back to; keep retrying
            return;
        }
        warn!("'{}' keeps failing, falling back to '{}'", failing, default);
        if let Err(e) = self.switch_to(&default, now) {
            warn!("Fallback to '{}' failed: {}", default, e);
        }
        self.render_failures = 0;
        self.sync_active(None);
    }

    fn activate(&mut self, name: &str, now: Instant) -> Result<(), ConfigError> {
        let settings = self.config.effective_settings(name);
        let Some(plugin) = self.registry.get_mut(name) else {
            return Err(match PluginKind::from_name(name) {
                Some(_) => ConfigError::NotEnabled(name.to_string()),
                None => ConfigError::UnknownPlugin(name.to_string()),
            });
        };
        match plugin.activate(&settings) {
            Ok(()) => {
                info!("Activated '{}'", name);
                // changed settings while inactive: the plugin dropped its
                // cache, so its refresh schedule starts over
                let changed = self.last_activated.get(name).is_some_and(|old| *old != settings);
                if changed && self.trackers.remove(name).is_some() {
                    debug!("Settings of '{}' changed while inactive, refresh due", name);
                }
                self.last_activated.insert(name.to_string(), settings.clone());
                self.active = Some(name.to_string());
                self.active_settings = settings;
                self.activated_at = now;
                self.render_failures = 0;
                Ok(())
            }
            Err(e) => {
                warn!("Activation of '{}' failed: {}", name, e);
                self.last_errors.insert(name.to_string(), e.to_string());
                Err(e)
            }
        }
    }

    fn deactivate_active(&mut self) {
        self.abort_refresh();
        if let Some(name) = self.active.take() {
            if let Some(plugin) = self.registry.get_mut(&name) {
                plugin.deactivate();
            }
            debug!("Deactivated '{}'", name);
        }
    }

    /// Make `target` the active plugin. On rejection the previous plugin is
    /// active again, or the default when the previous cannot come back.
    pub fn switch_to(&mut self, target: &str, now: Instant) -> Result<(), ConfigError> {
        if self.active.as_deref() == Some(target) {
            return Ok(());
        }
        if !self.registry.contains(target) {
            return Err(match PluginKind::from_name(target) {
                Some(_) => ConfigError::NotEnabled(target.to_string()),
                None => ConfigError::UnknownPlugin(target.to_string()),
            });
        }
        let previous = self.active.clone();
        self.deactivate_active();
        if let Err(e) = self.activate(target, now) {
            self.restore(previous, target, now);
            return Err(e);
        }
        Ok(())
    }

    fn restore(&mut self, previous: Option<String>, rejected: &str, now: Instant) {
        if let Some(prev) = previous.as_deref() {
            if self.activate(prev, now).is_ok() {
                return;
            }
        }
        let default = self.config.plugins.default.clone();
        if default != rejected && previous.as_deref() != Some(default.as_str()) && self.activate(&default, now).is_ok() {
            return;
        }
        error!("No plugin active after rejected switch to '{}'", rejected);
    }

    /// Tell the shared state which plugin is on screen.
    fn sync_active(&self, cycled_at: Option<i64>) {
        if let Some(name) = self.active.as_deref() {
            self.control.record_switch(name, cycled_at);
        }
    }

    fn shutdown(&mut self) -> Result<(), HardwareError> {
        self.state = LoopState::Stopping;
        self.publish();
        self.deactivate_active();
        let released = self.surface.release();
        self.control.persist();
        self.state = LoopState::Stopped;
        self.publish();
        released
    }

    /// Best effort teardown after a hardware failure.
    fn abandon(&mut self) {
        self.deactivate_active();
        if let Err(e) = self.surface.release() {
            debug!("Release after failure: {}", e);
        }
        self.state = LoopState::Stopped;
        self.publish();
    }

    fn publish(&self) {
        self.control.publish(DisplayStatus {
            state: self.state,
            active_plugin: self.active.clone(),
            frames: self.frames,
            dropped_frames: self.pacer.overruns(),
            render_failures: self.render_failures,
            brightness: self.config.matrix.brightness,
            fps: self.config.defaults.fps,
            last_errors: self.last_errors.clone(),
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/*
 *  plugins/mod.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display plugin contract, the closed set of plugin kinds and the
 *  registry the scheduler drives
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

//! Display plugins
//!
//! A plugin is one self-contained display mode. The scheduler holds every
//! enabled plugin as a trait object and drives the active one through
//!
//! 1. `activate` with its effective settings (no network)
//! 2. `refresh` whenever `needs_refresh` says so, off the render loop
//! 3. `render_frame` once per frame, from cached data only
//! 4. `deactivate` when another plugin takes over
//!
//! Rendering is a pure function of cached data and the time since
//! activation, so a slow API never stalls the panel.

pub mod clock;
pub mod gif;
pub mod intro;
pub mod moon;
pub mod prayer;
pub mod stock;
pub mod weather;
pub mod wmata;

use log::{info, warn};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::config::PluginSettings;
use crate::display::Frame;
use crate::errors::{ConfigError, FetchError, RenderError};
use crate::fetch::aladhan::PrayerTimes;
use crate::fetch::finnhub::QuoteBatch;
use crate::fetch::openweather::WeatherReport;
use crate::fetch::wmata::StationBoard;

/// A refresh running detached from the plugin that started it.
pub type FetchTask = Pin<Box<dyn Future<Output = Result<FetchPayload, FetchError>> + Send + 'static>>;

/// What a finished refresh hands back to its plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPayload {
    Weather(WeatherReport),
    Prayer(PrayerTimes),
    Quotes(QuoteBatch),
    Trains(Vec<StationBoard>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub needs_network: bool,
}

/// Due when never refreshed, or when at least `interval` has passed.
pub fn needs_refresh(now: Instant, last_refresh: Option<Instant>, interval: Duration) -> bool {
    match last_refresh {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

pub trait DisplayPlugin: Send {
    fn descriptor(&self) -> &PluginDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    /// Prepare for display with `settings`. Must not touch the network.
    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError>;

    /// Period between refreshes, `None` for plugins with no external data.
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }

    fn needs_refresh(&self, now: Instant, last_refresh: Option<Instant>) -> bool {
        match self.refresh_interval() {
            Some(interval) => needs_refresh(now, last_refresh, interval),
            None => false,
        }
    }

    /// Start a fetch. The returned task owns everything it needs; its
    /// result comes back through [`DisplayPlugin::apply_refresh`].
    fn refresh(&self) -> Option<FetchTask> {
        None
    }

    /// Take a refresh result. An error must leave cached data untouched.
    fn apply_refresh(&mut self, _result: Result<FetchPayload, FetchError>) {}

    /// Draw one frame into a cleared `frame`.
    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError>;

    fn deactivate(&mut self) {}

    /// Most recent fetch failure, cleared by the next success.
    fn last_error(&self) -> Option<String> {
        None
    }

    /// True once a plugin that only runs for a while is done.
    fn finished(&self, _elapsed: Duration) -> bool {
        false
    }
}

/// Last-known-good data of a refreshing plugin.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    data: Option<T>,
    last_error: Option<String>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self { data: None, last_error: None }
    }
}

impl<T> Cached<T> {
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear(&mut self) {
        self.data = None;
        self.last_error = None;
    }

    /// Store a successful payload, or record the error and keep the data.
    pub fn apply(
        &mut self,
        plugin: &str,
        result: Result<FetchPayload, FetchError>,
        extract: impl FnOnce(FetchPayload) -> Option<T>,
    ) {
        match result {
            Ok(payload) => match extract(payload) {
                Some(data) => {
                    self.data = Some(data);
                    self.last_error = None;
                }
                None => {
                    warn!("{plugin}: refresh returned an unexpected payload");
                    self.last_error = Some("unexpected payload".to_string());
                }
            },
            Err(e) => {
                warn!("{plugin}: refresh failed: {e}");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// The closed set of display modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Clock,
    Weather,
    Prayer,
    Gif,
    Moon,
    Intro,
    Stock,
    Wmata,
}

impl PluginKind {
    pub const ALL: [PluginKind; 8] = [
        PluginKind::Clock,
        PluginKind::Weather,
        PluginKind::Prayer,
        PluginKind::Gif,
        PluginKind::Moon,
        PluginKind::Intro,
        PluginKind::Stock,
        PluginKind::Wmata,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PluginKind::Clock => "clock",
            PluginKind::Weather => "weather",
            PluginKind::Prayer => "prayer",
            PluginKind::Gif => "gif",
            PluginKind::Moon => "moon",
            PluginKind::Intro => "intro",
            PluginKind::Stock => "stock",
            PluginKind::Wmata => "wmata",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Key of the `api_keys` section entry this plugin falls back on.
    pub fn api_service(self) -> Option<&'static str> {
        match self {
            PluginKind::Weather => Some("openweathermap"),
            PluginKind::Stock => Some("finnhub"),
            PluginKind::Wmata => Some("wmata"),
            _ => None,
        }
    }

    /// A fresh, inactive plugin for a `width` x `height` panel.
    pub fn build(self, width: u32, height: u32) -> Result<Box<dyn DisplayPlugin>, FetchError> {
        Ok(match self {
            PluginKind::Clock => Box::new(clock::ClockPlugin::new(width, height)),
            PluginKind::Weather => Box::new(weather::WeatherPlugin::new(width, height)?),
            PluginKind::Prayer => Box::new(prayer::PrayerPlugin::new(width, height)?),
            PluginKind::Gif => Box::new(gif::GifPlugin::new(width, height)),
            PluginKind::Moon => Box::new(moon::MoonPlugin::new(width, height)),
            PluginKind::Intro => Box::new(intro::IntroPlugin::new(width, height)),
            PluginKind::Stock => Box::new(stock::StockPlugin::new(width, height)?),
            PluginKind::Wmata => Box::new(wmata::WmataPlugin::new(width, height)?),
        })
    }
}

/// Every plugin instance the scheduler may switch to.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn DisplayPlugin>>,
}

impl PluginRegistry {
    /// Build the enabled plugins. One that cannot be constructed is
    /// logged and left out.
    pub fn from_enabled(enabled: &[String], width: u32, height: u32) -> Self {
        let mut plugins = Vec::with_capacity(enabled.len());
        for name in enabled {
            let Some(kind) = PluginKind::from_name(name) else {
                warn!("Unknown plugin '{}' skipped", name);
                continue;
            };
            match kind.build(width, height) {
                Ok(p) => plugins.push(p),
                Err(e) => warn!("Plugin '{}' unavailable: {}", name, e),
            }
        }
        info!(
            "Registered plugins: {}",
            plugins.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );
        Self { plugins }
    }

    pub fn with_plugins(plugins: Vec<Box<dyn DisplayPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn get(&self, name: &str) -> Option<&dyn DisplayPlugin> {
        self.plugins.iter().find(|p| p.name() == name).map(|p| p.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn DisplayPlugin> {
        match self.plugins.iter_mut().find(|p| p.name() == name) {
            Some(p) => Some(p.as_mut()),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/*
 *  plugins/prayer.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Daily prayer times with the next one highlighted
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

use chrono::{DateTime, Local};
use embedded_graphics::mono_font::ascii::FONT_4X6;
use std::time::{Duration, Instant};

use super::clock::wall_time;
use super::{Cached, DisplayPlugin, FetchPayload, FetchTask, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt};
use crate::display::Frame;
use crate::draw::{self, GRAY, ORANGE, RED, SKY_BLUE, WHITE};
use crate::errors::{ConfigError, FetchError, RenderError};
use crate::fetch::HttpFetcher;
use crate::fetch::aladhan::{self, PrayerTimes};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "prayer",
    description: "Prayer times display",
    needs_network: true,
};

#[derive(Debug, Clone, PartialEq)]
struct PrayerSettings {
    latitude: f64,
    longitude: f64,
    method: u64,
    update_interval: Duration,
}

impl PrayerSettings {
    fn parse(s: &PluginSettings) -> Result<Self, ConfigError> {
        let latitude = s.f64_opt("latitude").ok_or_else(|| ConfigError::missing("prayer", "latitude"))?;
        let longitude = s.f64_opt("longitude").ok_or_else(|| ConfigError::missing("prayer", "longitude"))?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ConfigError::invalid("prayer", "latitude", "must be within -90..=90"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ConfigError::invalid("prayer", "longitude", "must be within -180..=180"));
        }
        Ok(Self {
            latitude,
            longitude,
            method: s.u64_or("method", 1),
            update_interval: Duration::from_secs(s.u64_or("update_interval", 14400)),
        })
    }
}

pub struct PrayerPlugin {
    width: u32,
    height: u32,
    fetcher: HttpFetcher,
    settings: Option<PrayerSettings>,
    cache: Cached<PrayerTimes>,
    activated_at: DateTime<Local>,
}

impl PrayerPlugin {
    pub fn new(width: u32, height: u32) -> Result<Self, FetchError> {
        Ok(Self {
            width,
            height,
            fetcher: HttpFetcher::new("aladhan", Duration::from_secs(3600))?,
            settings: None,
            cache: Cached::default(),
            activated_at: Local::now(),
        })
    }

    pub fn times(&self) -> Option<&PrayerTimes> {
        self.cache.data()
    }

    /// Draw the timetable as seen at `now`.
    pub fn draw_at(&self, now: DateTime<Local>, frame: &mut Frame) -> Result<(), RenderError> {
        let font = &FONT_4X6;
        let Some(times) = self.cache.data() else {
            return if self.cache.last_error().is_some() {
                Ok(draw::draw_placeholder(frame, "Prayer API", "Retrying...", font, RED)?)
            } else {
                Ok(draw::draw_placeholder(frame, "Prayer", "Loading", font, WHITE)?)
            };
        };
        let clock = now.time();
        let Some((next, _)) = times.next_after(clock) else {
            return Ok(draw::draw_placeholder(frame, "Prayer", "No times", font, RED)?);
        };

        let line = font.character_size.height as i32;
        let rows = times.times.len() as i32;
        if self.height as i32 >= rows * line + 1 && self.width >= 32 {
            let time_x = 1 + draw::text_width("Magh ", font) as i32;
            for (i, (name, at)) in times.times.iter().enumerate() {
                let y = 1 + i as i32 * line;
                let color = if i == next { ORANGE } else { WHITE };
                draw::draw_text(frame, name, 1, y, font, SKY_BLUE)?;
                draw::draw_text(frame, &at.format("%H:%M").to_string(), time_x, y, font, color)?;
            }
            if self.width >= 48 {
                if let Some(mins) = times.minutes_until_next(clock) {
                    let countdown = format!("-{}:{:02}", mins / 60, mins % 60);
                    let x = self.width as i32 - draw::text_width(&countdown, font) as i32 - 1;
                    draw::draw_text(frame, &countdown, x, 1 + next as i32 * line, font, GRAY)?;
                }
            }
        } else {
            let (name, at) = times.times[next];
            draw::draw_text_centered(frame, name, 0, font, ORANGE)?;
            draw::draw_text_centered(frame, &at.format("%H:%M").to_string(), line, font, WHITE)?;
        }
        Ok(())
    }
}

impl DisplayPlugin for PrayerPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        let parsed = PrayerSettings::parse(settings)?;
        if self.settings.as_ref().is_some_and(|old| {
            old.latitude != parsed.latitude || old.longitude != parsed.longitude || old.method != parsed.method
        }) {
            self.cache.clear();
        }
        self.settings = Some(parsed);
        self.activated_at = Local::now();
        Ok(())
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.settings.as_ref().map(|s| s.update_interval)
    }

    /// Also due once the cached timetable belongs to another day.
    fn needs_refresh(&self, now: Instant, last_refresh: Option<Instant>) -> bool {
        let Some(interval) = self.refresh_interval() else {
            return false;
        };
        let stale_day = self.cache.data().is_some_and(|t| t.date != Local::now().date_naive());
        stale_day || super::needs_refresh(now, last_refresh, interval)
    }

    fn refresh(&self) -> Option<FetchTask> {
        let s = self.settings.clone()?;
        let fetcher = self.fetcher.clone();
        Some(Box::pin(async move {
            aladhan::fetch_timings(&fetcher, s.latitude, s.longitude, s.method)
                .await
                .map(FetchPayload::Prayer)
        }))
    }

    fn apply_refresh(&mut self, result: Result<FetchPayload, FetchError>) {
        self.cache.apply(DESCRIPTOR.name, result, |p| match p {
            FetchPayload::Prayer(t) => Some(t),
            _ => None,
        });
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        self.draw_at(wall_time(self.activated_at, elapsed), frame)
    }

    fn last_error(&self) -> Option<String> {
        self.cache.last_error().map(str::to_string)
    }
}

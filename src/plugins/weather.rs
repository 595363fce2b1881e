/*
 *  plugins/weather.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Current conditions from OpenWeatherMap, three rotating pages
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

use embedded_graphics::mono_font::MonoFont;
use embedded_graphics::mono_font::ascii::{FONT_4X6, FONT_6X10, FONT_9X15};
use std::time::Duration;

use super::{Cached, DisplayPlugin, FetchPayload, FetchTask, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt};
use crate::display::Frame;
use crate::draw::{self, LIGHT_BLUE, LIME, PINK, RED, SKY_BLUE, WHITE, YELLOW};
use crate::errors::{ConfigError, FetchError, RenderError};
use crate::fetch::HttpFetcher;
use crate::fetch::openweather::{self, Units, WeatherReport};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "weather",
    description: "Current weather conditions",
    needs_network: true,
};

pub const PAGE_DURATION: Duration = Duration::from_secs(5);
const PAGES: u64 = 3;

#[derive(Debug, Clone, PartialEq)]
struct WeatherSettings {
    api_key: String,
    city_id: u64,
    units: Units,
    update_interval: Duration,
}

impl WeatherSettings {
    fn parse(s: &PluginSettings) -> Result<Self, ConfigError> {
        let api_key = s.api_key().ok_or_else(|| ConfigError::missing("weather", "api_key"))?;
        let city_id = s.u64_or("city_id", 4791160);
        if city_id == 0 {
            return Err(ConfigError::invalid("weather", "city_id", "must be a positive number"));
        }
        let units_raw = s.str_or("units", "imperial");
        let units = Units::parse(&units_raw)
            .ok_or_else(|| ConfigError::invalid("weather", "units", format!("unknown units '{units_raw}'")))?;
        Ok(Self {
            api_key,
            city_id,
            units,
            update_interval: Duration::from_secs(s.u64_or("update_interval", 3600)),
        })
    }
}

pub struct WeatherPlugin {
    width: u32,
    height: u32,
    fetcher: HttpFetcher,
    settings: Option<WeatherSettings>,
    cache: Cached<WeatherReport>,
}

impl WeatherPlugin {
    pub fn new(width: u32, height: u32) -> Result<Self, FetchError> {
        Ok(Self {
            width,
            height,
            fetcher: HttpFetcher::new("openweathermap", Duration::from_secs(300))?,
            settings: None,
            cache: Cached::default(),
        })
    }

    pub fn report(&self) -> Option<&WeatherReport> {
        self.cache.data()
    }

    fn units(&self) -> Units {
        self.settings.as_ref().map(|s| s.units).unwrap_or(Units::Imperial)
    }

    fn row_font(&self) -> &'static MonoFont<'static> {
        if self.height >= 32 && self.width >= 64 { &FONT_6X10 } else { &FONT_4X6 }
    }

    fn draw_page(&self, page: u64, r: &WeatherReport, frame: &mut Frame) -> Result<(), RenderError> {
        let font = self.row_font();
        let line = font.character_size.height as i32 + 1;
        let units = self.units();
        match page {
            0 => {
                let city = draw::fit_text(&r.city, font, self.width);
                draw::draw_text_centered(frame, &city, 1, font, WHITE)?;
                let temp = format!("{:.0}{}", r.temp, units.temp_suffix());
                let big = draw::pick_font(&temp, self.width, &[&FONT_9X15, &FONT_6X10, &FONT_4X6]);
                draw::draw_text_centered(frame, &temp, 1 + line + 2, big, SKY_BLUE)?;
            }
            1 => {
                let desc = draw::fit_text(&r.description, font, self.width);
                draw::draw_text(frame, &desc, 1, 1, font, WHITE)?;
                let hilo = format!("H{:.0} L{:.0}", r.temp_max, r.temp_min);
                draw::draw_text(frame, &hilo, 1, 1 + line, font, PINK)?;
                let hum = format!("Hum {}%", r.humidity);
                draw::draw_text(frame, &hum, 1, 1 + 2 * line, font, LIGHT_BLUE)?;
            }
            _ => {
                draw::draw_text(frame, "Wind:", 1, 1, font, YELLOW)?;
                let wind = format!("{:.1}{} {}", r.wind_speed, units.speed_suffix(), r.wind_compass());
                draw::draw_text(frame, &draw::fit_text(&wind, font, self.width), 1, 1 + line, font, WHITE)?;
                let pressure = format!("{}hPa", r.pressure);
                draw::draw_text(frame, &pressure, 1, 1 + 2 * line, font, LIME)?;
            }
        }
        Ok(())
    }
}

/// Page on screen `elapsed` after activation.
pub fn page_at(elapsed: Duration) -> u64 {
    (elapsed.as_secs() / PAGE_DURATION.as_secs()) % PAGES
}

impl DisplayPlugin for WeatherPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        let parsed = WeatherSettings::parse(settings)?;
        if self.settings.as_ref().is_some_and(|old| old.city_id != parsed.city_id || old.units != parsed.units) {
            self.cache.clear();
        }
        self.settings = Some(parsed);
        Ok(())
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.settings.as_ref().map(|s| s.update_interval)
    }

    fn refresh(&self) -> Option<FetchTask> {
        let s = self.settings.clone()?;
        let fetcher = self.fetcher.clone();
        Some(Box::pin(async move {
            openweather::fetch_current(&fetcher, &s.api_key, s.city_id, s.units)
                .await
                .map(FetchPayload::Weather)
        }))
    }

    fn apply_refresh(&mut self, result: Result<FetchPayload, FetchError>) {
        self.cache.apply(DESCRIPTOR.name, result, |p| match p {
            FetchPayload::Weather(r) => Some(r),
            _ => None,
        });
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        match self.cache.data() {
            Some(r) => self.draw_page(page_at(elapsed), r, frame),
            None if self.cache.last_error().is_some() => {
                Ok(draw::draw_placeholder(frame, "Weather", "API Error", &FONT_4X6, RED)?)
            }
            None => Ok(draw::draw_placeholder(frame, "Weather", "Loading", &FONT_4X6, WHITE)?),
        }
    }

    fn last_error(&self) -> Option<String> {
        self.cache.last_error().map(str::to_string)
    }
}

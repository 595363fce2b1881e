/*
 *  plugins/clock.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Wall clock with a date line
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

use chrono::{DateTime, Local, TimeDelta};
use embedded_graphics::mono_font::ascii::{FONT_4X6, FONT_5X7, FONT_6X10, FONT_7X13, FONT_9X15, FONT_10X20};
use std::time::Duration;

use super::{DisplayPlugin, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt};
use crate::display::Frame;
use crate::draw::{self, LIME, WHITE, YELLOW};
use crate::errors::{ConfigError, RenderError};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "clock",
    description: "Clock with date",
    needs_network: false,
};

/// Format string for the time line.
pub fn time_format(format_24h: bool, show_seconds: bool) -> &'static str {
    match (format_24h, show_seconds) {
        (true, false) => "%H:%M",
        (true, true) => "%H:%M:%S",
        (false, false) => "%I:%M%p",
        (false, true) => "%I:%M:%S%p",
    }
}

/// Wall time `elapsed` after `start`.
pub(crate) fn wall_time(start: DateTime<Local>, elapsed: Duration) -> DateTime<Local> {
    start + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero())
}

pub struct ClockPlugin {
    width: u32,
    height: u32,
    show_seconds: bool,
    format_24h: bool,
    activated_at: DateTime<Local>,
}

impl ClockPlugin {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            show_seconds: false,
            format_24h: true,
            activated_at: Local::now(),
        }
    }

    /// Draw the clock face for `now`.
    pub fn draw_at(&self, now: DateTime<Local>, frame: &mut Frame) -> Result<(), RenderError> {
        // day and date in lime, month in yellow, along the top
        let small = &FONT_4X6;
        let day = now.format("%a ").to_string();
        let date = now.format("%d ").to_string();
        let month = now.format("%b").to_string();
        let mut x = 1;
        for (part, color) in [(&day, LIME), (&date, LIME), (&month, YELLOW)] {
            draw::draw_text(frame, part, x, 1, small, color)?;
            x += draw::text_width(part, small) as i32 + small.character_spacing as i32;
        }

        let time = now.format(time_format(self.format_24h, self.show_seconds)).to_string();
        let fonts = [&FONT_10X20, &FONT_9X15, &FONT_7X13, &FONT_6X10, &FONT_5X7, &FONT_4X6];
        let top = small.character_size.height + 2;
        let room = self.height.saturating_sub(top);
        let candidates: Vec<_> = fonts
            .into_iter()
            .filter(|f| f.character_size.height <= room)
            .collect();
        let font = draw::pick_font(&time, self.width, &candidates);
        let y = top as i32 + (room as i32 - font.character_size.height as i32) / 2;
        draw::draw_text_centered(frame, &time, y.max(top as i32), font, WHITE)?;
        Ok(())
    }
}

impl DisplayPlugin for ClockPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        self.show_seconds = settings.bool_or("show_seconds", false);
        self.format_24h = settings.bool_or("format_24h", true);
        self.activated_at = Local::now();
        Ok(())
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        self.draw_at(wall_time(self.activated_at, elapsed), frame)
    }
}

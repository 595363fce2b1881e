/*
 *  plugins/moon.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Current moon phase drawn as a lit disc
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

use chrono::{DateTime, Local, Utc};
use embedded_graphics::mono_font::ascii::FONT_4X6;
use embedded_graphics::pixelcolor::Rgb888;
use std::f64::consts::PI;
use std::time::Duration;

use super::clock::wall_time;
use super::{DisplayPlugin, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt};
use crate::display::Frame;
use crate::draw::{self, SKY_BLUE, WHITE};
use crate::errors::{ConfigError, RenderError};
use crate::moon_phase::{self, MoonPhase};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "moon",
    description: "Moon phase display",
    needs_network: false,
};

const LIT: Rgb888 = Rgb888::new(230, 230, 200);
const DARK: Rgb888 = Rgb888::new(30, 30, 40);
/// Two text rows of the 4x6 font plus spacing.
const TEXT_ROWS: u32 = 15;

/// Phase names longer than the panel reads well are cut to their first word.
pub fn short_phase_name(name: &str) -> &str {
    if name.len() > 10 { name.split(' ').next().unwrap_or(name) } else { name }
}

/// Whether the point (x, y) of a unit disc is sunlit. `x` grows to the
/// right, the lit limb of a waxing moon.
pub fn is_lit(phase: &MoonPhase, x: f64, y: f64) -> bool {
    let half_chord = (1.0 - y * y).max(0.0).sqrt();
    let terminator = half_chord * (2.0 * PI * phase.fraction).cos();
    if phase.waxing() { x > terminator } else { x < -terminator }
}

pub struct MoonPlugin {
    width: u32,
    height: u32,
    show_text: bool,
    activated_at: DateTime<Local>,
}

impl MoonPlugin {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, show_text: true, activated_at: Local::now() }
    }

    fn draw_disc(&self, phase: &MoonPhase, frame: &mut Frame) {
        let room = if self.show_text { self.height.saturating_sub(TEXT_ROWS) } else { self.height };
        let diameter = self.width.min(room);
        if diameter < 4 {
            return;
        }
        let r = diameter as f64 / 2.0;
        let left = (self.width - diameter) / 2;
        let top = if self.show_text { 1 } else { (self.height - diameter) / 2 };
        for py in 0..diameter {
            for px in 0..diameter {
                let x = (px as f64 + 0.5 - r) / r;
                let y = (py as f64 + 0.5 - r) / r;
                if x * x + y * y > 1.0 {
                    continue;
                }
                let c = if is_lit(phase, x, y) { LIT } else { DARK };
                frame.set_pixel((left + px) as usize, (top + py) as usize, c);
            }
        }
    }

    /// Draw the moon as it is at `now`.
    pub fn draw_at(&self, now: DateTime<Local>, frame: &mut Frame) -> Result<(), RenderError> {
        let phase = moon_phase::phase_at(now.with_timezone(&Utc));
        self.draw_disc(&phase, frame);
        if self.show_text {
            let h = self.height as i32;
            let font = &FONT_4X6;
            let name = draw::fit_text(short_phase_name(phase.name()), font, self.width);
            draw::draw_text(frame, &name, 1, h - 13, font, WHITE)?;
            draw::draw_text(frame, &now.format("%b %d").to_string(), 1, h - 7, font, SKY_BLUE)?;
        }
        Ok(())
    }
}

impl DisplayPlugin for MoonPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        self.show_text = settings.bool_or("show_text", true);
        self.activated_at = Local::now();
        Ok(())
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        self.draw_at(wall_time(self.activated_at, elapsed), frame)
    }
}

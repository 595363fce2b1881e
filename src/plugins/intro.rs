/*
 *  plugins/intro.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Startup splash: name plus the address the remote API answers on
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

use embedded_graphics::mono_font::ascii::{FONT_4X6, FONT_5X7, FONT_6X10, FONT_7X13};
use embedded_graphics::pixelcolor::Rgb888;
use log::{debug, warn};
use std::time::Duration;

use super::{DisplayPlugin, PluginDescriptor};
use crate::config::{PluginSettings, SettingsExt};
use crate::display::Frame;
use crate::draw::{self, GRAY};
use crate::errors::{ConfigError, RenderError};

const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "intro",
    description: "Introduction screen",
    needs_network: false,
};

const TITLE_COLOR: Rgb888 = Rgb888::new(0, 191, 255);

pub struct IntroPlugin {
    width: u32,
    height: u32,
    text: String,
    display_time: Duration,
    scroll_speed: u32,
    address: Option<String>,
}

impl IntroPlugin {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            text: "InfoCube".to_string(),
            display_time: Duration::from_secs(10),
            scroll_speed: 20,
            address: None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

impl DisplayPlugin for IntroPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn activate(&mut self, settings: &PluginSettings) -> Result<(), ConfigError> {
        self.display_time = Duration::from_secs(settings.u64_or("display_time", 10));
        self.text = settings.str_or("text", "InfoCube");
        self.scroll_speed = settings.u64_or("scroll_speed", 20) as u32;
        self.address = match local_ip_address::local_ip() {
            Ok(ip) => Some(ip.to_string()),
            Err(e) => {
                warn!("intro: no local address: {e}");
                None
            }
        };
        debug!("intro: showing for {:?}, address {:?}", self.display_time, self.address);
        Ok(())
    }

    fn render_frame(&self, elapsed: Duration, frame: &mut Frame) -> Result<(), RenderError> {
        let small = &FONT_4X6;
        let has_ip = self.address.is_some();
        let room = if has_ip { self.height.saturating_sub(small.character_size.height + 2) } else { self.height };
        let candidates: Vec<_> = [&FONT_7X13, &FONT_6X10, &FONT_5X7, &FONT_4X6]
            .into_iter()
            .filter(|f| f.character_size.height <= room)
            .collect();
        let font = draw::pick_font(&self.text, self.width, &candidates);
        let y = (room as i32 - font.character_size.height as i32) / 2;
        draw::draw_text_centered(frame, &self.text, y.max(0), font, TITLE_COLOR)?;

        if let Some(ip) = &self.address {
            let w = draw::text_width(ip, small);
            let y = self.height as i32 - small.character_size.height as i32 - 1;
            if w <= self.width {
                draw::draw_text_centered(frame, ip, y, small, GRAY)?;
            } else {
                let x = draw::marquee_offset(w, self.width, elapsed, self.scroll_speed);
                draw::draw_text(frame, ip, x, y, small, GRAY)?;
            }
        }
        Ok(())
    }

    fn finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.display_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::RgbColor;
    use serde_json::json;

    #[test]
    fn test_finishes_after_display_time() {
        let mut p = IntroPlugin::new(64, 32);
        p.activate(json!({ "display_time": 3 }).as_object().unwrap()).unwrap();
        assert!(!p.finished(Duration::from_millis(2999)));
        assert!(p.finished(Duration::from_secs(3)));
    }

    #[test]
    fn test_renders_title() {
        let mut p = IntroPlugin::new(64, 32);
        p.activate(&PluginSettings::new()).unwrap();
        let mut frame = Frame::new(64, 32, Rgb888::BLACK);
        p.render_frame(Duration::from_secs(1), &mut frame).unwrap();
        assert!(frame.as_slice().contains(&TITLE_COLOR));
    }
}
